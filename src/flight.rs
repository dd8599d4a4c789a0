//! The handshake flight being assembled.

use crate::handshake::HandshakeHeader;
use crate::holes::{HoleTracker, HoleUpdate};
use crate::types::{HandshakeType, Sequence};
use crate::unit::UnitBuffer;

/// Aggregate state of one flight.
///
/// When a flight has been delivered in full, a copy is kept as the
/// preceding flight. That copy is what retransmissions are recognised
/// against.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlightState {
    /// Type of the message opening the flight. `None` until one arrives, or
    /// for the final ChangeCipherSpec/Finished flight.
    pub first_type: Option<HandshakeType>,
    pub flight_epoch: u16,
    pub min_message_seq: u16,
    pub max_message_seq: u16,
    pub max_record_epoch: u16,
    /// `None` before any record of `max_record_epoch` was seen.
    pub max_record_seq: Option<u64>,
    pub holes: HoleTracker,
    /// The message sequence each handshake type is bound to in this flight.
    pub message_seqs: [Option<u16>; HandshakeType::SLOTS],
}

impl FlightState {
    pub fn new(epoch: u16) -> Self {
        FlightState {
            flight_epoch: epoch,
            max_record_epoch: epoch,
            ..Default::default()
        }
    }

    /// Whether `sequence` is at or before the last record of this flight.
    pub fn covers_record(&self, sequence: Sequence) -> bool {
        sequence.epoch < self.max_record_epoch
            || (sequence.epoch == self.max_record_epoch
                && Some(sequence.sequence_number) <= self.max_record_seq)
    }

    /// Update the flight bounds for an incoming handshake fragment.
    ///
    /// `preceding` is the previous flight, if it is still relevant: a fragment
    /// carrying its first message sequence may open a retransmission.
    pub fn note_handshake(
        &mut self,
        sequence: Sequence,
        header: &HandshakeHeader,
        preceding: Option<&FlightState>,
    ) {
        let message_seq = header.message_seq;
        let is_first = self.min_message_seq == message_seq
            || preceding.is_some_and(|p| p.min_message_seq == message_seq);

        if is_first && header.fragment_offset == 0 && header.msg_type != HandshakeType::Finished {
            self.first_type = Some(header.msg_type);
            self.flight_epoch = sequence.epoch;
            self.min_message_seq = message_seq;
        }

        if header.msg_type == HandshakeType::Finished {
            self.max_message_seq = message_seq;
            self.max_record_epoch = sequence.epoch;
            self.max_record_seq = Some(sequence.sequence_number);
        } else {
            self.max_message_seq = self.max_message_seq.max(message_seq);
            self.raise_max_record(sequence);
        }
    }

    /// Update the flight bounds for a ChangeCipherSpec.
    pub fn note_change_cipher_spec(&mut self, sequence: Sequence, expect_finish_flight: bool) {
        if expect_finish_flight {
            self.first_type = None;
            self.flight_epoch = sequence.epoch;
        }
        if self.max_record_seq < Some(sequence.sequence_number) {
            self.max_record_seq = Some(sequence.sequence_number);
        }
    }

    fn raise_max_record(&mut self, sequence: Sequence) {
        if sequence.epoch > self.max_record_epoch {
            self.max_record_epoch = sequence.epoch;
            self.max_record_seq = Some(sequence.sequence_number);
        } else if sequence.epoch == self.max_record_epoch
            && self.max_record_seq < Some(sequence.sequence_number)
        {
            self.max_record_seq = Some(sequence.sequence_number);
        }
    }

    /// Record the fragment in the hole tracker, binding the type to its
    /// message sequence when first seen.
    pub fn fill(&mut self, header: &HandshakeHeader) -> HoleUpdate {
        let update = self.holes.insert(
            header.msg_type,
            header.length,
            header.fragment_offset,
            header.fragment_length,
        );
        if update == HoleUpdate::Seeded {
            self.message_seqs[header.msg_type.slot()] = Some(header.message_seq);
        }
        update
    }

    pub fn bound_message_seq(&self, msg_type: HandshakeType) -> Option<u16> {
        self.message_seqs[msg_type.slot()]
    }

    /// Whether the whole flight has arrived and can be handed out.
    pub fn is_ready(&self, buffer: &UnitBuffer, expect_finish_flight: bool) -> bool {
        use HandshakeType::*;

        let Some(first_type) = self.first_type else {
            let ready = expect_finish_flight && buffer.has_finished_pair();
            trace!("Final flight received: {}", ready);
            return ready;
        };

        let complete = |t| self.holes.is_complete(t);
        let whole_flight =
            || buffer.is_complete_range(self.min_message_seq, self.max_message_seq, complete);

        match first_type {
            ClientHello | HelloRequest | HelloVerifyRequest => complete(first_type),

            ServerHello => {
                if !complete(ServerHello) {
                    return false;
                }
                if buffer.has_finished_pair() {
                    trace!("Abbreviated handshake flight");
                    return true;
                }
                complete(ServerHelloDone) && whole_flight()
            }

            Certificate | ClientKeyExchange => {
                if !complete(first_type) {
                    return false;
                }
                if first_type == Certificate
                    && buffer.needs_client_verify()
                    && !complete(CertificateVerify)
                {
                    return false;
                }
                buffer.has_finished_pair() && whole_flight()
            }

            _ => false,
        }
    }

    /// Same opening message as `other`, so the peer sent that flight again.
    pub fn is_retransmit_of(&self, other: &FlightState) -> bool {
        self.first_type == other.first_type && self.min_message_seq == other.min_message_seq
    }

    /// Start a new flight following `prev`.
    pub fn reset_from(&mut self, prev: &FlightState) {
        self.first_type = None;
        self.flight_epoch = prev.max_record_epoch;
        // A flight that crossed an epoch restarts message numbering.
        self.min_message_seq = if prev.flight_epoch != prev.max_record_epoch {
            0
        } else {
            prev.max_message_seq.wrapping_add(1)
        };
        self.max_message_seq = 0;
        self.max_record_epoch = self.flight_epoch;
        self.max_record_seq = Some(prev.max_record_seq.map_or(0, |s| s + 1));
        self.holes.clear();
        self.message_seqs = [None; HandshakeType::SLOTS];
    }
}
