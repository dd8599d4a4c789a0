//! Admission of units into the reassembly buffer.

use crate::error::ProtocolError;
use crate::flight::FlightState;
use crate::unit::Unit;

/// Where the reassembler expects the next record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expectation {
    pub next_epoch: u16,
    pub next_seq: u64,
    pub next_message_seq: u16,
    pub handshake_epoch: u16,
}

/// How far past the next expected message a fragment may be. A DTLS 1.2
/// flight is at most a handful of messages.
pub(crate) const MESSAGE_SEQ_WINDOW: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Accept,
    Drop(&'static str),
}

/// Decide whether `unit` is still of use.
///
/// Records of the epoch before `next_epoch` are only of interest while they
/// may belong to a retransmission of the preceding flight. Within the
/// expected epoch, anything before `next_seq` has been delivered already.
pub(crate) fn admit(
    unit: &Unit,
    expect: Expectation,
    flight: &FlightState,
    preceding: Option<&FlightState>,
) -> Result<Admission, ProtocolError> {
    let sequence = unit.sequence();
    let epoch = sequence.epoch;

    if let Some(prev_epoch) = expect.next_epoch.checked_sub(1) {
        if epoch < prev_epoch {
            return Ok(Admission::Drop("epoch too old"));
        }

        if epoch == prev_epoch {
            let Some(preceding) = preceding else {
                return Ok(Admission::Drop("previous epoch without a preceding flight"));
            };

            let keep = if let Some(f) = unit.fragment() {
                f.header.message_seq >= preceding.min_message_seq
            } else if unit.is_change_cipher_spec() {
                epoch == preceding.flight_epoch
            } else {
                !preceding.covers_record(sequence)
            };

            if !keep {
                return Ok(Admission::Drop("not part of the preceding flight"));
            }
        }
    }

    if epoch == expect.next_epoch && sequence.sequence_number < expect.next_seq {
        return Ok(Admission::Drop("already delivered"));
    }

    let window_end = expect.next_message_seq.saturating_add(MESSAGE_SEQ_WINDOW);
    if unit.fragment().is_some_and(|f| f.header.message_seq > window_end) {
        return Ok(Admission::Drop("message sequence too far ahead"));
    }

    if epoch == expect.handshake_epoch {
        if let Some(f) = unit.fragment() {
            let msg_type = f.header.msg_type;
            if let Some(bound) = flight.bound_message_seq(msg_type) {
                if bound != f.header.message_seq {
                    return Err(ProtocolError::AmbiguousMessageSequence {
                        msg_type,
                        first: bound,
                        second: f.header.message_seq,
                    });
                }
            }
        }
    }

    Ok(Admission::Accept)
}

/// Whether `unit` shows the peer has moved past the preceding flight.
pub(crate) fn starts_new_flight(unit: &Unit, preceding: &FlightState) -> bool {
    if preceding.flight_epoch < unit.epoch() {
        return true;
    }
    if let Some(f) = unit.fragment() {
        return preceding.max_message_seq < f.header.message_seq;
    }
    !unit.is_change_cipher_spec() && preceding.max_record_epoch < unit.epoch()
}

/// Whether a buffered unit belongs to the preceding flight, and so is a
/// leftover retransmission.
pub(crate) fn is_superseded(unit: &Unit, preceding: &FlightState) -> bool {
    if preceding.covers_record(unit.sequence()) {
        return true;
    }
    unit.fragment()
        .is_some_and(|f| f.header.message_seq <= preceding.max_message_seq)
}
