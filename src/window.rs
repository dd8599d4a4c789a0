use crate::types::Sequence;

/// Sliding replay window for DTLS record sequence numbers.
///
/// Maintains the latest accepted sequence number and a 64-bit bitmap of the
/// last 64 seen sequence numbers to reject duplicates and old records.
///
/// The window follows a single epoch. A record of a newer epoch restarts it;
/// records of an older epoch are rejected outright.
#[derive(Debug, Default)]
pub(crate) struct ReplayWindow {
    epoch: u16,
    max_seq: Option<u64>,
    window: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the given sequence is acceptable and update the window state.
    /// Returns true if fresh/acceptable, false if duplicate/too old.
    pub fn check_and_update(&mut self, sequence: Sequence) -> bool {
        if sequence.epoch < self.epoch {
            return false;
        }
        if sequence.epoch > self.epoch {
            self.reset(sequence.epoch);
        }

        let seqno = sequence.sequence_number;
        let Some(max_seq) = self.max_seq else {
            self.max_seq = Some(seqno);
            self.window = 1;
            return true;
        };

        if seqno > max_seq {
            let delta = seqno - max_seq;
            self.window = if delta >= 64 { 0 } else { self.window << delta };
            self.window |= 1; // mark newest as seen
            self.max_seq = Some(seqno);
            true
        } else {
            let offset = max_seq - seqno;
            if offset >= 64 {
                return false; // too old
            }
            let mask = 1u64 << offset;
            if (self.window & mask) != 0 {
                return false; // duplicate
            }
            self.window |= mask;
            true
        }
    }

    /// Forget everything seen and follow `epoch` from now on.
    pub fn reset(&mut self, epoch: u16) {
        self.epoch = epoch;
        self.max_seq = None;
        self.window = 0;
    }
}
