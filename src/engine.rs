use std::fmt;
use std::sync::Arc;

use crate::buffer::Buf;
use crate::config::{Config, DecryptFailurePolicy};
use crate::crypto::{NullCipher, RecordDecrypt, TranscriptSink};
use crate::crypto::{DecryptError, Transcript};
use crate::handshake::{next_fragment, HandshakeHeader};
use crate::holes::HoleState;
use crate::reassembler::{ReadContext, Reassembler};
use crate::record::{RecordHeader, Records};
use crate::types::{ContentType, HandshakeType, Sequence};
use crate::window::ReplayWindow;
use crate::Error;

/// A complete handshake message, reassembled from its fragments.
#[derive(Clone)]
pub struct HandshakeMessage {
    /// Epoch of the record carrying the first fragment.
    pub epoch: u16,
    /// Sequence of the record carrying the first fragment.
    pub sequence: Sequence,
    pub msg_type: HandshakeType,
    pub message_seq: u16,
    /// The message in TLS form: `msg_type ‖ length(u24) ‖ body`.
    pub data: Buf,
}

impl HandshakeMessage {
    /// The message body, without the 4 byte TLS header.
    pub fn body(&self) -> &[u8] {
        &self.data[HandshakeHeader::TLS_LEN..]
    }
}

impl fmt::Debug for HandshakeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeMessage")
            .field("msg_type", &self.msg_type)
            .field("message_seq", &self.message_seq)
            .field("sequence", &self.sequence)
            .field("len", &self.body().len())
            .finish()
    }
}

/// Unit handed out by the [`ReassemblyEngine`].
#[derive(Debug)]
pub enum Output {
    /// Decrypted application data.
    ApplicationData { sequence: Sequence, data: Buf },

    /// Decrypted alert. Interpreting it is left to the caller.
    Alert { sequence: Sequence, data: Buf },

    /// The peer switched its write cipher. Records after this are expected
    /// in the next epoch.
    ChangeCipherSpec { sequence: Sequence },

    /// A complete handshake message.
    Handshake(HandshakeMessage),

    /// The peer sent the flight preceding the current one again. It likely
    /// lost our reply, which should be retransmitted.
    FlightRetransmitted,
}

/// Inbound DTLS 1.2 record processing.
///
/// Owns the read epoch and read cipher, the anti-replay window and (while a
/// handshake is in progress) the handshake reassembler.
pub struct ReassemblyEngine<T: TranscriptSink = Transcript> {
    config: Arc<Config>,

    /// Epoch of the current read cipher.
    read_epoch: u16,

    /// Opens records of `read_epoch`.
    read_cipher: Box<dyn RecordDecrypt + Send>,

    /// Receives every hashable handshake message, in order.
    transcript: T,

    /// Present from the first handshake record until application data
    /// arrives under a newer epoch.
    reassembler: Option<Reassembler>,

    /// Anti-replay for application data and alerts.
    replay: ReplayWindow,
}

impl<T: TranscriptSink> ReassemblyEngine<T> {
    /// Create an engine at epoch 0, reading records in the clear.
    pub fn new(config: Arc<Config>, transcript: T) -> Self {
        ReassemblyEngine {
            config,
            read_epoch: 0,
            read_cipher: Box::new(NullCipher),
            transcript,
            reassembler: None,
            replay: ReplayWindow::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transcript(&self) -> &T {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut T {
        &mut self.transcript
    }

    /// Process a single record, header included.
    ///
    /// Returns the next ready unit, if any. Malformed, stale, replayed and
    /// undecryptable records are dropped and give `Ok(None)`. An `Err` is
    /// fatal for the connection.
    pub fn submit_record(&mut self, record: &[u8]) -> Result<Option<Output>, Error> {
        let (header, fragment) = match RecordHeader::parse_record(record) {
            Ok((header, fragment, _)) => (header, fragment),
            Err(e) => {
                trace!("Discard unparseable record: {}", e);
                return Ok(None);
            }
        };

        if !header.is_acceptable() {
            trace!(
                "Discard record {:?} {:?} {}",
                header.content_type,
                header.version,
                header.sequence
            );
            return Ok(None);
        }

        let sequence = header.sequence;
        let epoch = sequence.epoch;

        if epoch < self.read_epoch {
            trace!("Discard record of old epoch {}", sequence);
            return Ok(None);
        }

        if epoch > self.read_epoch {
            return self.submit_premature(header, fragment);
        }

        let result = self
            .read_cipher
            .decrypt(header.content_type, fragment, sequence);

        let (content_type, plaintext) = match result {
            Ok(v) => v,
            Err(e) => return self.decrypt_failed(sequence, e),
        };

        match content_type {
            ContentType::ApplicationData | ContentType::Alert => {
                Ok(self.deliver_record(content_type, sequence, plaintext))
            }
            ContentType::ChangeCipherSpec => self.submit_change_cipher_spec(sequence, &plaintext),
            ContentType::Handshake => self.submit_handshake(sequence, &plaintext),
            ContentType::Unknown(v) => {
                trace!("Discard record with inner content type {} {}", v, sequence);
                Ok(None)
            }
        }
    }

    /// Process every record of a datagram.
    ///
    /// Returns the units that became ready, in order. A malformed record only
    /// loses that record; a truncated one ends the datagram.
    pub fn submit_packet(&mut self, packet: &[u8]) -> Result<Vec<Output>, Error> {
        let mut out = Vec::new();

        for record in Records::new(packet) {
            if let Some(o) = self.submit_record(record)? {
                out.push(o);
            }
            while let Some(o) = self.take_ready_unit()? {
                out.push(o);
            }
        }

        Ok(out)
    }

    /// Next unit of an already complete flight, without submitting input.
    pub fn take_ready_unit(&mut self) -> Result<Option<Output>, Error> {
        let Some(reassembler) = &mut self.reassembler else {
            return Ok(None);
        };

        let mut ctx = ReadContext {
            read_epoch: self.read_epoch,
            cipher: &mut *self.read_cipher,
            transcript: &mut self.transcript,
            policy: self.config.decrypt_failure_policy(),
        };

        reassembler.take_ready(&mut ctx)
    }

    /// Install the cipher for the next read epoch.
    ///
    /// Ciphertext that was buffered ahead of this epoch becomes available
    /// through [`ReassemblyEngine::take_ready_unit`].
    pub fn change_read_cipher(&mut self, cipher: Box<dyn RecordDecrypt + Send>) -> Result<(), Error> {
        let epoch = self.read_epoch.checked_add(1).ok_or(Error::WrappedEpoch)?;
        debug!("Read epoch {} -> {}", self.read_epoch, epoch);

        self.read_epoch = epoch;
        self.read_cipher = cipher;
        self.replay.reset(epoch);
        Ok(())
    }

    /// The next flight from the peer is its final ChangeCipherSpec/Finished
    /// flight.
    pub fn expect_finish_flight(&mut self) {
        if let Some(reassembler) = &mut self.reassembler {
            reassembler.expect_finish_flight();
        }
    }

    /// Drop all handshake reassembly state.
    pub fn finish_handshake(&mut self) {
        if self.reassembler.take().is_some() {
            debug!("Handshake reassembly finished at read epoch {}", self.read_epoch);
        }
    }

    pub fn read_epoch(&self) -> u16 {
        self.read_epoch
    }

    /// The epoch and record sequence the reassembler expects next.
    pub fn next_expected(&self) -> Option<Sequence> {
        self.reassembler.as_ref().map(Reassembler::next_expected)
    }

    /// The handshake message sequence expected next.
    pub fn next_message_seq(&self) -> Option<u16> {
        self.reassembler.as_ref().map(Reassembler::next_message_seq)
    }

    /// Units held for reassembly.
    pub fn buffered_len(&self) -> usize {
        self.reassembler
            .as_ref()
            .map(Reassembler::buffered_len)
            .unwrap_or(0)
    }

    /// Fragment coverage of a message type in the current flight.
    pub fn hole_state(&self, msg_type: HandshakeType) -> HoleState {
        self.reassembler
            .as_ref()
            .map(|r| r.hole_state(msg_type))
            .unwrap_or(HoleState::NotSeen)
    }

    /// A record of the next epoch, before the read cipher for it is known.
    ///
    /// Only the peer's Finished (and its ChangeCipherSpec) may legitimately
    /// arrive this early. Those are held, anything else is dropped.
    fn submit_premature(
        &mut self,
        header: RecordHeader,
        fragment: &[u8],
    ) -> Result<Option<Output>, Error> {
        let sequence = header.sequence;
        let content_type = header.content_type;

        let is_handshake = content_type == ContentType::Handshake;
        let is_flight = is_handshake || content_type == ContentType::ChangeCipherSpec;
        let is_next_epoch = sequence.epoch - self.read_epoch == 1;

        if !is_flight || !is_next_epoch || (self.reassembler.is_none() && !is_handshake) {
            trace!("Discard premature record {:?} {}", content_type, sequence);
            return Ok(None);
        }

        let reassembler = self.ensure_reassembler(sequence.epoch);
        reassembler.queue_ciphertext(content_type, sequence, fragment)?;

        self.take_ready_unit()
    }

    fn submit_change_cipher_spec(
        &mut self,
        sequence: Sequence,
        payload: &[u8],
    ) -> Result<Option<Output>, Error> {
        if payload != [1] {
            trace!("Discard malformed ChangeCipherSpec {}", sequence);
            return Ok(None);
        }

        self.ensure_reassembler(sequence.epoch)
            .queue_change_cipher_spec(sequence)?;

        self.take_ready_unit()
    }

    fn submit_handshake(
        &mut self,
        sequence: Sequence,
        plaintext: &[u8],
    ) -> Result<Option<Output>, Error> {
        let mut rest = plaintext;

        while !rest.is_empty() {
            let (header, body, tail) = match next_fragment(rest) {
                Ok(v) => v,
                Err(reason) => {
                    trace!("Invalid handshake fragment in {}: {}", sequence, reason);
                    break;
                }
            };
            rest = tail;

            let starts_handshake = matches!(
                header.msg_type,
                HandshakeType::ClientHello | HandshakeType::HelloRequest
            );
            let renegotiates = self
                .reassembler
                .as_ref()
                .is_some_and(|r| r.handshake_epoch() < sequence.epoch);

            if starts_handshake && renegotiates {
                debug!("New handshake at epoch {}", sequence.epoch);
                self.reassembler = None;
            }

            self.ensure_reassembler(sequence.epoch)
                .queue_handshake(sequence, header, body)?;
        }

        self.take_ready_unit()
    }

    fn deliver_record(
        &mut self,
        content_type: ContentType,
        sequence: Sequence,
        data: Buf,
    ) -> Option<Output> {
        if self.config.replay_protection() && !self.replay.check_and_update(sequence) {
            trace!("Discard replayed {:?} {}", content_type, sequence);
            return None;
        }

        if self
            .reassembler
            .as_ref()
            .is_some_and(|r| r.handshake_epoch() < sequence.epoch)
        {
            debug!("Handshake done, dropping reassembly state");
            self.reassembler = None;
        }

        if content_type == ContentType::Alert {
            Some(Output::Alert { sequence, data })
        } else {
            Some(Output::ApplicationData { sequence, data })
        }
    }

    fn decrypt_failed(
        &mut self,
        sequence: Sequence,
        e: DecryptError,
    ) -> Result<Option<Output>, Error> {
        match self.config.decrypt_failure_policy() {
            DecryptFailurePolicy::Discard => {
                debug!("Discard undecryptable record {}: {}", sequence, e);
                Ok(None)
            }
            DecryptFailurePolicy::Fatal => {
                warn!("Failed to decrypt record {}: {}", sequence, e);
                Err(Error::DecryptFailed(e.to_string()))
            }
        }
    }

    /// The reassembler, created for `epoch` if there is none.
    fn ensure_reassembler(&mut self, epoch: u16) -> &mut Reassembler {
        let config = &self.config;
        self.reassembler.get_or_insert_with(|| {
            debug!("Start handshake reassembly at epoch {}", epoch);
            Reassembler::new(epoch, config)
        })
    }
}

impl<T: TranscriptSink> fmt::Debug for ReassemblyEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReassemblyEngine")
            .field("read_epoch", &self.read_epoch)
            .field("reassembler", &self.reassembler)
            .finish()
    }
}
