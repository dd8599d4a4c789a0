//! Handshake reassembly for one handshake epoch.
//!
//! Units are admitted through the gate, recorded in the current flight and
//! held in the ordered buffer. Nothing leaves the buffer before the whole
//! flight it belongs to has arrived. Then units are handed out one at a
//! time, in order.

use crate::buffer::Buf;
use crate::config::{Config, DecryptFailurePolicy};
use crate::crypto::{RecordDecrypt, TranscriptSink};
use crate::engine::{HandshakeMessage, Output};
use crate::error::ProtocolError;
use crate::flight::FlightState;
use crate::gate::{self, Admission, Expectation};
use crate::handshake::{next_fragment, HandshakeHeader};
use crate::holes::HoleState;
use crate::types::{ContentType, HandshakeType, Sequence};
use crate::unit::{Fragment, Insert, Record, Unit, UnitBuffer};
use crate::util::put_u24;
use crate::Error;

/// What extraction borrows from the engine.
pub(crate) struct ReadContext<'a> {
    pub read_epoch: u16,
    pub cipher: &'a mut dyn RecordDecrypt,
    pub transcript: &'a mut dyn TranscriptSink,
    pub policy: DecryptFailurePolicy,
}

enum Step {
    Deliver(Output),
    Continue,
    Wait,
}

#[derive(Debug)]
pub(crate) struct Reassembler {
    handshake_epoch: u16,
    buffer: UnitBuffer,
    flight: FlightState,
    preceding: Option<FlightState>,
    next_epoch: u16,
    next_seq: u64,
    next_message_seq: u16,
    expect_finish_flight: bool,
    flight_ready: bool,
    need_check: bool,
    max_message_size: usize,
}

impl Reassembler {
    pub fn new(handshake_epoch: u16, config: &Config) -> Self {
        Reassembler {
            handshake_epoch,
            buffer: UnitBuffer::new(config.max_buffered_units()),
            flight: FlightState::new(handshake_epoch),
            preceding: None,
            next_epoch: handshake_epoch,
            next_seq: 0,
            next_message_seq: 0,
            expect_finish_flight: false,
            flight_ready: false,
            need_check: false,
            max_message_size: config.max_handshake_message_size(),
        }
    }

    pub fn handshake_epoch(&self) -> u16 {
        self.handshake_epoch
    }

    /// The epoch and record sequence expected next.
    pub fn next_expected(&self) -> Sequence {
        Sequence::with_number(self.next_epoch, self.next_seq)
    }

    pub fn next_message_seq(&self) -> u16 {
        self.next_message_seq
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn hole_state(&self, msg_type: HandshakeType) -> HoleState {
        self.flight.holes.state(msg_type)
    }

    /// The next flight is the final ChangeCipherSpec/Finished one.
    pub fn expect_finish_flight(&mut self) {
        self.expect_finish_flight = true;
        // It may be buffered already.
        self.need_check = true;
    }

    fn expectation(&self) -> Expectation {
        Expectation {
            next_epoch: self.next_epoch,
            next_seq: self.next_seq,
            next_message_seq: self.next_message_seq,
            handshake_epoch: self.handshake_epoch,
        }
    }

    pub fn queue_handshake(
        &mut self,
        sequence: Sequence,
        header: HandshakeHeader,
        body: &[u8],
    ) -> Result<(), Error> {
        if header.length as usize > self.max_message_size {
            warn!(
                "Handshake {:?} of {} bytes exceeds maximum {}",
                header.msg_type, header.length, self.max_message_size
            );
            return Err(ProtocolError::MessageTooBig {
                length: header.length as usize,
                max: self.max_message_size,
            }
            .into());
        }

        let unit = Unit::Handshake(Fragment {
            sequence,
            header,
            body: Buf::from_slice(body),
        });

        if !self.admit(&unit)? {
            return Ok(());
        }
        self.cleanup_retransmit(&unit);

        // Fragment coverage must only count what is actually buffered.
        if !self.make_room(&unit) {
            return Ok(());
        }

        self.flight
            .note_handshake(sequence, &header, self.preceding.as_ref());

        let update = self.flight.fill(&header);
        if !update.is_accepted() {
            trace!(
                "Discard {:?} fragment {}+{} {}: {:?}",
                header.msg_type,
                header.fragment_offset,
                header.fragment_length,
                sequence,
                update
            );
            return Ok(());
        }

        // The Finished of a final flight arrives after the flight was found
        // ready, and must not reset that.
        let is_finished = header.msg_type == HandshakeType::Finished;
        self.buffer_unit(unit, !is_finished);
        Ok(())
    }

    pub fn queue_change_cipher_spec(&mut self, sequence: Sequence) -> Result<(), Error> {
        let unit = Unit::Plain(Record {
            content_type: ContentType::ChangeCipherSpec,
            sequence,
            payload: Buf::from_slice(&[1]),
            ciphertext: false,
        });

        if !self.admit(&unit)? {
            return Ok(());
        }
        self.cleanup_retransmit(&unit);

        if !self.make_room(&unit) {
            return Ok(());
        }

        self.flight
            .note_change_cipher_spec(sequence, self.expect_finish_flight);
        self.buffer_unit(unit, true);
        Ok(())
    }

    /// Hold a record of the next epoch until the read cipher catches up.
    pub fn queue_ciphertext(
        &mut self,
        content_type: ContentType,
        sequence: Sequence,
        payload: &[u8],
    ) -> Result<(), Error> {
        let unit = Unit::Plain(Record {
            content_type,
            sequence,
            payload: Buf::from_slice(payload),
            ciphertext: true,
        });

        if !self.admit(&unit)? {
            return Ok(());
        }
        self.cleanup_retransmit(&unit);

        if !self.make_room(&unit) {
            return Ok(());
        }

        self.buffer_unit(unit, true);
        Ok(())
    }

    fn admit(&self, unit: &Unit) -> Result<bool, Error> {
        match gate::admit(
            unit,
            self.expectation(),
            &self.flight,
            self.preceding.as_ref(),
        ) {
            Ok(Admission::Accept) => Ok(true),
            Ok(Admission::Drop(reason)) => {
                trace!("Discard {:?} {}: {}", unit.content_type(), unit.sequence(), reason);
                Ok(false)
            }
            Err(e) => {
                warn!("{}", e);
                Err(e.into())
            }
        }
    }

    /// Once the peer is past the preceding flight, anything still buffered
    /// from a retransmission of it is dead weight.
    fn cleanup_retransmit(&mut self, unit: &Unit) {
        let Some(preceding) = &self.preceding else {
            return;
        };
        if !gate::starts_new_flight(unit, preceding) {
            return;
        }

        let purged = self
            .buffer
            .purge_front_while(|u| gate::is_superseded(u, preceding));
        if purged > 0 {
            debug!("Evicted {} units of a retransmitted flight", purged);
        }
        self.preceding = None;
    }

    /// A full buffer gives up its last unit for one that sorts earlier.
    fn make_room(&mut self, unit: &Unit) -> bool {
        if self.buffer.has_room_for(unit) {
            return true;
        }

        let Some(evicted) = self.buffer.evict_for(unit) else {
            warn!(
                "Reassembly buffer full ({} units), dropping {}",
                self.buffer.len(),
                unit.sequence()
            );
            return false;
        };

        debug!(
            "Reassembly buffer full, evicted {} for {}",
            evicted.sequence(),
            unit.sequence()
        );
        if let Some(f) = evicted.fragment() {
            let header = &f.header;
            self.flight
                .holes
                .reopen(header.msg_type, header.fragment_offset, header.fragment_length);
        }
        true
    }

    fn buffer_unit(&mut self, unit: Unit, recheck: bool) {
        let sequence = unit.sequence();
        match self.buffer.insert(unit) {
            Insert::Inserted => trace!("Buffered unit {}: {:?}", sequence, self.buffer),
            Insert::Duplicate => trace!("Duplicate unit {}", sequence),
            Insert::Full => warn!("Reassembly buffer full, dropping {}", sequence),
        }

        if recheck {
            self.flight_ready = false;
            self.need_check = true;
        }
    }

    /// Hand out the next unit of a complete flight.
    pub fn take_ready(&mut self, ctx: &mut ReadContext<'_>) -> Result<Option<Output>, Error> {
        loop {
            if self.buffer.is_empty() {
                return Ok(None);
            }

            if !self.flight_ready && self.need_check {
                self.flight_ready = self
                    .flight
                    .is_ready(&self.buffer, self.expect_finish_flight);

                if self.flight_ready {
                    if let Some(preceding) = &self.preceding {
                        if self.flight.is_retransmit_of(preceding) {
                            debug!(
                                "Received a retransmission of flight {:?} from message {}",
                                preceding.first_type, preceding.min_message_seq
                            );
                            self.buffer.clear();
                            self.flight.reset_from(preceding);
                            self.flight_ready = false;
                            self.need_check = false;
                            return Ok(Some(Output::FlightRetransmitted));
                        }
                    }
                    debug!(
                        "Flight {:?} ready, messages {}-{}",
                        self.flight.first_type,
                        self.flight.min_message_seq,
                        self.flight.max_message_seq
                    );
                }

                self.need_check = false;
            }

            if !self.flight_ready {
                trace!("Flight {:?} not ready", self.flight.first_type);
                return Ok(None);
            }

            let front_is_ciphertext = self.buffer.front().is_some_and(Unit::is_ciphertext);
            if !front_is_ciphertext {
                let output = self.acquire_handshake(&mut *ctx.transcript)?;
                if self.buffer.is_empty() {
                    self.finish_flight();
                }
                return Ok(output);
            }

            match self.acquire_cached(ctx)? {
                Step::Deliver(output) => {
                    if self.buffer.is_empty() {
                        self.finish_flight();
                    }
                    return Ok(Some(output));
                }
                Step::Continue => continue,
                Step::Wait => return Ok(None),
            }
        }
    }

    /// The flight was handed out in full. Keep it as the preceding flight and
    /// start the next one.
    fn finish_flight(&mut self) {
        self.flight.holes.clear();
        let completed = self.flight.clone();
        self.flight.reset_from(&completed);

        if self.expect_finish_flight && completed.first_type.is_none() {
            self.expect_finish_flight = false;
        }

        debug!(
            "Flight {:?} delivered, next flight starts at message {}",
            completed.first_type, self.flight.min_message_seq
        );

        self.preceding = Some(completed);
        self.flight_ready = false;
        self.need_check = false;
    }

    fn acquire_handshake(
        &mut self,
        transcript: &mut dyn TranscriptSink,
    ) -> Result<Option<Output>, Error> {
        let Some(unit) = self.buffer.pop_front() else {
            return Ok(None);
        };

        let first = match unit {
            Unit::Plain(record) => {
                // Only a ChangeCipherSpec is buffered as plaintext record.
                self.next_epoch = record
                    .sequence
                    .epoch
                    .checked_add(1)
                    .ok_or(Error::WrappedEpoch)?;
                self.next_seq = 0;
                debug!(
                    "ChangeCipherSpec {}, expecting epoch {}",
                    record.sequence, self.next_epoch
                );
                return Ok(Some(Output::ChangeCipherSpec {
                    sequence: record.sequence,
                }));
            }
            Unit::Handshake(fragment) => fragment,
        };

        let header = first.header;
        let length = header.length as usize;
        let tls_len = HandshakeHeader::TLS_LEN;

        let mut data = Buf::zeroed(length + tls_len);
        data[0] = header.msg_type.as_u8();
        put_u24(&mut data[1..], header.length);
        copy_fragment(&mut data, &first);

        let mut max_seq = first.sequence.sequence_number;

        if header.is_fragmented() {
            while self
                .buffer
                .front()
                .and_then(Unit::fragment)
                .is_some_and(|f| f.header.message_seq == header.message_seq)
            {
                let Some(Unit::Handshake(fragment)) = self.buffer.pop_front() else {
                    break;
                };
                if fragment.header.length != header.length {
                    trace!("Skip inconsistent fragment {}", fragment.sequence);
                    continue;
                }
                copy_fragment(&mut data, &fragment);
                max_seq = max_seq.max(fragment.sequence.sequence_number);
            }
        }

        self.next_seq = max_seq + 1;
        self.next_message_seq = header.message_seq.wrapping_add(1);

        if header.msg_type.is_hashable() {
            let mut hashed = Buf::new();
            hashed.extend_from_slice(&header.unfragmented());
            hashed.extend_from_slice(&data[tls_len..]);
            transcript.append(&hashed);
        }

        debug!(
            "Handshake {:?} message_seq {} ({} bytes)",
            header.msg_type, header.message_seq, length
        );

        Ok(Some(Output::Handshake(HandshakeMessage {
            epoch: first.sequence.epoch,
            sequence: first.sequence,
            msg_type: header.msg_type,
            message_seq: header.message_seq,
            data,
        })))
    }

    /// Decrypt a record buffered ahead of its epoch.
    fn acquire_cached(&mut self, ctx: &mut ReadContext<'_>) -> Result<Step, Error> {
        let Some(front) = self.buffer.front() else {
            return Ok(Step::Wait);
        };

        let epoch = front.epoch();
        if epoch != ctx.read_epoch {
            if epoch < ctx.read_epoch {
                debug!("Discard stale buffered ciphertext {}", front.sequence());
                self.buffer.pop_front();
                self.flight_ready = false;
                self.need_check = true;
                return Ok(Step::Continue);
            }
            trace!("Buffered ciphertext waits for epoch {}", epoch);
            return Ok(Step::Wait);
        }

        let Some(Unit::Plain(record)) = self.buffer.pop_front() else {
            return Ok(Step::Wait);
        };

        let sequence = record.sequence;
        let result = ctx
            .cipher
            .decrypt(record.content_type, &record.payload, sequence);

        let plaintext = match result {
            Ok((ContentType::Handshake, plaintext)) => plaintext,
            Ok((ContentType::ApplicationData, data)) => {
                return Ok(Step::Deliver(Output::ApplicationData { sequence, data }));
            }
            Ok((ContentType::Alert, data)) => {
                return Ok(Step::Deliver(Output::Alert { sequence, data }));
            }
            Ok((ContentType::ChangeCipherSpec, payload)) if *payload == [1] => {
                self.next_epoch = sequence.epoch.checked_add(1).ok_or(Error::WrappedEpoch)?;
                self.next_seq = 0;
                debug!(
                    "Buffered ChangeCipherSpec {}, expecting epoch {}",
                    sequence, self.next_epoch
                );
                return Ok(Step::Deliver(Output::ChangeCipherSpec { sequence }));
            }
            Ok((content_type, _)) => {
                trace!("Discard buffered {:?} {}", content_type, sequence);
                return Ok(Step::Continue);
            }
            Err(e) => match ctx.policy {
                DecryptFailurePolicy::Discard => {
                    debug!("Discard undecryptable record {}: {}", sequence, e);
                    return Ok(Step::Continue);
                }
                DecryptFailurePolicy::Fatal => {
                    warn!("Failed to decrypt record {}: {}", sequence, e);
                    return Err(Error::DecryptFailed(e.to_string()));
                }
            },
        };

        let mut rest: &[u8] = &plaintext;
        while !rest.is_empty() {
            match next_fragment(rest) {
                Ok((header, body, tail)) => {
                    self.queue_handshake(sequence, header, body)?;
                    rest = tail;
                }
                Err(reason) => {
                    trace!("Invalid handshake fragment in {}: {}", sequence, reason);
                    break;
                }
            }
        }

        Ok(Step::Continue)
    }
}

fn copy_fragment(data: &mut [u8], fragment: &Fragment) {
    let start = HandshakeHeader::TLS_LEN + fragment.header.fragment_offset as usize;
    let end = start + fragment.body.len();
    // Ranges were validated on parse.
    if let Some(target) = data.get_mut(start..end) {
        target.copy_from_slice(&fragment.body);
    }
}
