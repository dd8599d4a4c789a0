//! Buffered reassembly units and their ordering.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;

use crate::buffer::Buf;
use crate::handshake::HandshakeHeader;
use crate::types::{ContentType, HandshakeType, Sequence};

/// A whole record held for later.
///
/// Either a ChangeCipherSpec, or a record of the next epoch that can't be
/// decrypted until the read cipher changes.
pub(crate) struct Record {
    pub content_type: ContentType,
    pub sequence: Sequence,
    pub payload: Buf,
    pub ciphertext: bool,
}

/// One fragment of a handshake message, in plaintext.
pub(crate) struct Fragment {
    pub sequence: Sequence,
    pub header: HandshakeHeader,
    pub body: Buf,
}

pub(crate) enum Unit {
    Plain(Record),
    Handshake(Fragment),
}

impl Unit {
    pub fn sequence(&self) -> Sequence {
        match self {
            Unit::Plain(r) => r.sequence,
            Unit::Handshake(f) => f.sequence,
        }
    }

    pub fn epoch(&self) -> u16 {
        self.sequence().epoch
    }

    /// Outer content type of the record this unit came from.
    pub fn content_type(&self) -> ContentType {
        match self {
            Unit::Plain(r) => r.content_type,
            Unit::Handshake(_) => ContentType::Handshake,
        }
    }

    pub fn is_change_cipher_spec(&self) -> bool {
        self.content_type() == ContentType::ChangeCipherSpec
    }

    pub fn is_ciphertext(&self) -> bool {
        matches!(self, Unit::Plain(r) if r.ciphertext)
    }

    pub fn fragment(&self) -> Option<&Fragment> {
        match self {
            Unit::Handshake(f) => Some(f),
            Unit::Plain(_) => None,
        }
    }
}

/// The single total order of the reassembly buffer.
///
/// Handshake fragments sort by message sequence, then fragment offset. Two
/// fragments at the same place with the same length are the same fragment,
/// no matter which record carried them. A ChangeCipherSpec is the last
/// message of its epoch. Everything else falls back to record order.
pub(crate) fn unit_order(a: &Unit, b: &Unit) -> Ordering {
    if let (Unit::Handshake(x), Unit::Handshake(y)) = (a, b) {
        let (hx, hy) = (&x.header, &y.header);
        return hx
            .message_seq
            .cmp(&hy.message_seq)
            .then(hx.fragment_offset.cmp(&hy.fragment_offset))
            .then_with(|| {
                if hx.fragment_length == hy.fragment_length {
                    Ordering::Equal
                } else {
                    x.sequence.cmp(&y.sequence)
                }
            });
    }

    let same_epoch = a.epoch() == b.epoch();
    match (a.is_change_cipher_spec(), b.is_change_cipher_spec()) {
        // One per epoch
        (true, true) => a.epoch().cmp(&b.epoch()),
        (true, false) if same_epoch && b.content_type() == ContentType::Handshake => {
            Ordering::Greater
        }
        (false, true) if same_epoch && a.content_type() == ContentType::Handshake => Ordering::Less,
        _ => a.sequence().cmp(&b.sequence()),
    }
}

/// Result of offering a unit to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insert {
    Inserted,
    Duplicate,
    Full,
}

/// Sorted, duplicate free buffer of units waiting for their flight.
///
/// The Debug implementation only shows metadata (counts by kind and the
/// record sequence range), not payload data.
pub(crate) struct UnitBuffer {
    units: VecDeque<Unit>,
    capacity: usize,
}

impl UnitBuffer {
    pub fn new(capacity: usize) -> Self {
        UnitBuffer {
            units: VecDeque::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, unit: Unit) -> Insert {
        match self.units.binary_search_by(|u| unit_order(u, &unit)) {
            Ok(_) => Insert::Duplicate,
            Err(_) if self.units.len() >= self.capacity => Insert::Full,
            Err(index) => {
                self.units.insert(index, unit);
                Insert::Inserted
            }
        }
    }

    /// Whether `unit` can be inserted, or is already present.
    pub fn has_room_for(&self, unit: &Unit) -> bool {
        self.units.len() < self.capacity
            || self.units.binary_search_by(|u| unit_order(u, unit)).is_ok()
    }

    /// Drop the last unit to make room for `unit`, if `unit` sorts before
    /// it. A full buffer keeps the units closest to the next message.
    pub fn evict_for(&mut self, unit: &Unit) -> Option<Unit> {
        let last = self.units.back()?;
        if unit_order(unit, last) != Ordering::Less {
            return None;
        }
        self.units.pop_back()
    }

    pub fn pop_front(&mut self) -> Option<Unit> {
        self.units.pop_front()
    }

    /// Remove units from the front for as long as `old` holds.
    pub fn purge_front_while(&mut self, mut old: impl FnMut(&Unit) -> bool) -> usize {
        let mut purged = 0;
        while self.units.front().is_some_and(&mut old) {
            self.units.pop_front();
            purged += 1;
        }
        purged
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }

    /// A ChangeCipherSpec and an encrypted handshake record (the Finished)
    /// are both buffered.
    pub fn has_finished_pair(&self) -> bool {
        let mut has_ccs = false;
        let mut has_finished = false;
        for unit in &self.units {
            if unit.is_change_cipher_spec() {
                if has_finished {
                    return true;
                }
                has_ccs = true;
            } else if unit.content_type() == ContentType::Handshake && unit.is_ciphertext() {
                if has_ccs {
                    return true;
                }
                has_finished = true;
            }
        }
        false
    }

    /// Whether the client Certificate carries a certificate, in which case a
    /// CertificateVerify follows it.
    pub fn needs_client_verify(&self) -> bool {
        // An empty certificate list is just its 3 byte length prefix.
        self.plaintext_fragments()
            .find(|f| f.header.msg_type == HandshakeType::Certificate)
            .is_some_and(|f| f.header.length > 3)
    }

    /// Every message from `min` to `max` is complete, judged by walking the
    /// plaintext fragments in order.
    ///
    /// The message at `min` is assumed checked by the caller.
    pub fn is_complete_range(
        &self,
        min: u16,
        max: u16,
        complete: impl Fn(HandshakeType) -> bool,
    ) -> bool {
        let mut present = min;
        for f in self.plaintext_fragments() {
            let seq = f.header.message_seq;
            if seq == present {
                continue;
            }
            if seq != present.wrapping_add(1) {
                break;
            }
            if !complete(f.header.msg_type) {
                return false;
            }
            present = seq;
        }
        present >= max
    }

    fn plaintext_fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.units.iter().map_while(Unit::fragment)
    }
}

impl Deref for UnitBuffer {
    type Target = VecDeque<Unit>;

    fn deref(&self) -> &Self::Target {
        &self.units
    }
}

impl fmt::Debug for UnitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fragments = 0;
        let mut ccs = 0;
        let mut ciphertext = 0;
        let mut min_seq: Option<Sequence> = None;
        let mut max_seq: Option<Sequence> = None;

        for unit in &self.units {
            match unit {
                Unit::Handshake(_) => fragments += 1,
                Unit::Plain(r) if r.ciphertext => ciphertext += 1,
                Unit::Plain(_) => ccs += 1,
            }

            let seq = unit.sequence();
            min_seq = Some(min_seq.map_or(seq, |m| m.min(seq)));
            max_seq = Some(max_seq.map_or(seq, |m| m.max(seq)));
        }

        let mut s = f.debug_struct("UnitBuffer");
        s.field("len", &self.units.len())
            .field("fragments", &fragments)
            .field("ccs", &ccs)
            .field("ciphertext", &ciphertext);

        if let (Some(min), Some(max)) = (min_seq, max_seq) {
            s.field(
                "seq_range",
                &format_args!(
                    "{}:{} - {}:{}",
                    min.epoch, min.sequence_number, max.epoch, max.sequence_number
                ),
            );
        }

        s.finish()
    }
}
