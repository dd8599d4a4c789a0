//! Per handshake type gap tracking.
//!
//! Every handshake type seen in the current flight owns a slot with the
//! declared message length and the byte ranges still missing. A slot with no
//! holes left is a complete message; a type without a slot has not been seen.

use tinyvec::TinyVec;

use crate::types::HandshakeType;

/// A missing byte range `[offset, limit)` of a handshake message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Hole {
    pub offset: u32,
    pub limit: u32,
}

impl Hole {
    fn new(offset: u32, limit: u32) -> Self {
        Hole { offset, limit }
    }

    fn overlaps(&self, offset: u32, end: u32) -> bool {
        self.limit > offset && self.offset < end
    }

    fn contains(&self, offset: u32, end: u32) -> bool {
        self.offset <= offset && end <= self.limit
    }
}

#[derive(Debug, Clone)]
struct Slot {
    length: u32,
    // Sorted, non-overlapping.
    holes: TinyVec<[Hole; 4]>,
}

/// Outcome of recording one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HoleUpdate {
    /// First fragment of this type. The slot was created and the fragment
    /// applied to it.
    Seeded,
    /// The fragment filled (part of) a hole.
    Filled,
    /// Every byte of the fragment was already present.
    Redundant,
    /// The message was already complete.
    AlreadyComplete,
    /// The fragment straddles a hole boundary.
    Overlapping,
    /// The fragment declares a different message length than earlier ones.
    Inconsistent,
}

impl HoleUpdate {
    /// Whether the fragment should be buffered.
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            HoleUpdate::Seeded | HoleUpdate::Filled | HoleUpdate::Redundant
        )
    }
}

/// Reassembly progress of one handshake type, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoleState {
    /// No fragment of this type in the current flight.
    NotSeen,
    /// Some bytes are still missing.
    Incomplete,
    /// Every byte of the message has been received.
    Complete,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct HoleTracker {
    slots: [Option<Slot>; HandshakeType::SLOTS],
}

impl HoleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment covering `[offset, offset + fragment_length)` of a
    /// message of `length` bytes.
    pub fn insert(
        &mut self,
        msg_type: HandshakeType,
        length: u32,
        offset: u32,
        fragment_length: u32,
    ) -> HoleUpdate {
        let end = offset + fragment_length;
        let slot = &mut self.slots[msg_type.slot()];

        let seeded = slot.is_none();
        let slot = slot.get_or_insert_with(|| {
            let mut holes = TinyVec::new();
            if offset != 0 || fragment_length != length {
                holes.push(Hole::new(0, length));
            }
            Slot { length, holes }
        });

        if !seeded {
            if slot.holes.is_empty() {
                return HoleUpdate::AlreadyComplete;
            }
            if slot.length != length {
                return HoleUpdate::Inconsistent;
            }
        }

        let Some(index) = slot.holes.iter().position(|h| h.overlaps(offset, end)) else {
            return if seeded {
                HoleUpdate::Seeded
            } else {
                HoleUpdate::Redundant
            };
        };

        let hole = slot.holes[index];
        if !hole.contains(offset, end) {
            return HoleUpdate::Overlapping;
        }

        slot.holes.remove(index);
        if end < hole.limit {
            slot.holes.insert(index, Hole::new(end, hole.limit));
        }
        if hole.offset < offset {
            slot.holes.insert(index, Hole::new(hole.offset, offset));
        }

        if seeded {
            HoleUpdate::Seeded
        } else {
            HoleUpdate::Filled
        }
    }

    /// Undo a fragment that was recorded but is no longer buffered.
    ///
    /// The range becomes a hole again, merged with its neighbours. A
    /// fragment that covered the whole message makes the type unseen.
    pub fn reopen(&mut self, msg_type: HandshakeType, offset: u32, fragment_length: u32) {
        let entry = &mut self.slots[msg_type.slot()];
        let Some(slot) = entry.as_mut() else {
            return;
        };

        let end = offset + fragment_length;
        if offset == 0 && end >= slot.length {
            *entry = None;
            return;
        }
        if fragment_length == 0 {
            return;
        }

        let mut merged = Hole::new(offset, end);
        slot.holes.retain(|h| {
            if h.limit < merged.offset || h.offset > merged.limit {
                return true;
            }
            merged.offset = merged.offset.min(h.offset);
            merged.limit = merged.limit.max(h.limit);
            false
        });

        let index = slot
            .holes
            .iter()
            .position(|h| h.offset > merged.offset)
            .unwrap_or(slot.holes.len());
        slot.holes.insert(index, merged);
    }

    pub fn is_complete(&self, msg_type: HandshakeType) -> bool {
        self.slots[msg_type.slot()]
            .as_ref()
            .is_some_and(|s| s.holes.is_empty())
    }

    pub fn is_seen(&self, msg_type: HandshakeType) -> bool {
        self.slots[msg_type.slot()].is_some()
    }

    pub fn state(&self, msg_type: HandshakeType) -> HoleState {
        match &self.slots[msg_type.slot()] {
            None => HoleState::NotSeen,
            Some(s) if s.holes.is_empty() => HoleState::Complete,
            Some(_) => HoleState::Incomplete,
        }
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    #[cfg(test)]
    fn holes(&self, msg_type: HandshakeType) -> Vec<Hole> {
        self.slots[msg_type.slot()]
            .as_ref()
            .map(|s| s.holes.to_vec())
            .unwrap_or_default()
    }
}
