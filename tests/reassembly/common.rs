//! Shared helpers for reassembly integration tests.

#![allow(unused)]

use std::sync::Arc;

use dtls_reassembly::{Buf, Config, ContentType, HandshakeHeader, HandshakeType};
use dtls_reassembly::{Output, ReassemblyEngine, RecordHeader, Sequence, Transcript};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// A handshake message as the peer's handshake layer produces it.
#[derive(Debug, Clone)]
pub struct Msg {
    pub msg_type: HandshakeType,
    pub message_seq: u16,
    pub body: Vec<u8>,
}

impl Msg {
    pub fn new(msg_type: HandshakeType, message_seq: u16, len: usize) -> Self {
        Msg {
            msg_type,
            message_seq,
            body: body(len, msg_type.as_u8()),
        }
    }

    pub fn with_body(msg_type: HandshakeType, message_seq: u16, body: &[u8]) -> Self {
        Msg {
            msg_type,
            message_seq,
            body: body.to_vec(),
        }
    }

    /// Handshake header and data for `[offset, offset + len)` of the body.
    pub fn fragment(&self, offset: usize, len: usize) -> Vec<u8> {
        let header = HandshakeHeader {
            msg_type: self.msg_type,
            length: self.body.len() as u32,
            message_seq: self.message_seq,
            fragment_offset: offset as u32,
            fragment_length: len as u32,
        };
        let mut out = Buf::new();
        header.serialize(&self.body[offset..offset + len], &mut out);
        out.into_vec()
    }

    pub fn whole(&self) -> Vec<u8> {
        self.fragment(0, self.body.len())
    }

    /// Split into fragments of at most `max` body bytes.
    pub fn fragments(&self, max: usize) -> Vec<Vec<u8>> {
        if self.body.is_empty() {
            return vec![self.whole()];
        }
        (0..self.body.len())
            .step_by(max)
            .map(|offset| self.fragment(offset, max.min(self.body.len() - offset)))
            .collect()
    }

    /// The form the transcript hash is defined over.
    pub fn transcript_form(&self) -> Vec<u8> {
        self.whole()
    }

    /// `msg_type ‖ length(u24) ‖ body`
    pub fn tls_form(&self) -> Vec<u8> {
        let len = self.body.len() as u32;
        let mut out = vec![self.msg_type.as_u8()];
        out.extend_from_slice(&len.to_be_bytes()[1..]);
        out.extend_from_slice(&self.body);
        out
    }
}

pub fn body(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn record(content_type: ContentType, sequence: Sequence, fragment: &[u8]) -> Vec<u8> {
    let mut out = Buf::new();
    RecordHeader::new(content_type, sequence, fragment.len() as u16).serialize(fragment, &mut out);
    out.into_vec()
}

/// The peer's record layer.
#[derive(Debug, Default)]
pub struct Peer {
    pub epoch: u16,
    pub seq: u64,
}

impl Peer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&mut self) -> Sequence {
        let sequence = Sequence::with_number(self.epoch, self.seq);
        self.seq += 1;
        sequence
    }

    pub fn record(&mut self, content_type: ContentType, fragment: &[u8]) -> Vec<u8> {
        let sequence = self.next_sequence();
        record(content_type, sequence, fragment)
    }

    /// One record per fragment.
    pub fn handshake(&mut self, msgs: &[Msg], max_fragment: usize) -> Vec<Vec<u8>> {
        msgs.iter()
            .flat_map(|m| m.fragments(max_fragment))
            .map(|f| self.record(ContentType::Handshake, &f))
            .collect()
    }

    /// Sends the ChangeCipherSpec and moves to the next epoch.
    pub fn change_cipher_spec(&mut self) -> Vec<u8> {
        let ccs = self.record(ContentType::ChangeCipherSpec, &[1]);
        self.epoch += 1;
        self.seq = 0;
        ccs
    }
}

/// Server flight of a full handshake, as seen by the client.
pub fn server_flight(first_seq: u16) -> Vec<Msg> {
    use HandshakeType::*;
    vec![
        Msg::new(ServerHello, first_seq, 70),
        Msg::new(Certificate, first_seq + 1, 1500),
        Msg::new(ServerKeyExchange, first_seq + 2, 300),
        Msg::new(ServerHelloDone, first_seq + 3, 0),
    ]
}

pub fn engine() -> ReassemblyEngine {
    engine_with(Config::default())
}

pub fn engine_with(config: Config) -> ReassemblyEngine {
    let _ = env_logger::try_init();
    ReassemblyEngine::new(Arc::new(config), Transcript::new())
}

/// Submit records one by one, collecting everything that becomes ready.
pub fn submit_all(engine: &mut ReassemblyEngine, records: &[Vec<u8>]) -> Vec<Output> {
    let mut out = Vec::new();
    for r in records {
        if let Some(o) = engine.submit_record(r).expect("submit record") {
            out.push(o);
        }
        out.extend(drain(engine));
    }
    out
}

pub fn drain(engine: &mut ReassemblyEngine) -> Vec<Output> {
    let mut out = Vec::new();
    while let Some(o) = engine.take_ready_unit().expect("take ready unit") {
        out.push(o);
    }
    out
}

/// `(type, message_seq, tls form)` of every handshake output.
pub fn handshakes(outputs: &[Output]) -> Vec<(HandshakeType, u16, Vec<u8>)> {
    outputs
        .iter()
        .filter_map(|o| match o {
            Output::Handshake(m) => Some((m.msg_type, m.message_seq, m.data.to_vec())),
            _ => None,
        })
        .collect()
}

pub fn expected_handshakes(msgs: &[Msg]) -> Vec<(HandshakeType, u16, Vec<u8>)> {
    msgs.iter()
        .map(|m| (m.msg_type, m.message_seq, m.tls_form()))
        .collect()
}

pub fn expected_transcript(msgs: &[Msg]) -> Vec<u8> {
    msgs.iter()
        .filter(|m| m.msg_type.is_hashable())
        .flat_map(|m| m.transcript_form())
        .collect()
}

pub fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut items = items.to_vec();
    items.shuffle(&mut rng);
    items
}

pub fn count_retransmitted(outputs: &[Output]) -> usize {
    outputs
        .iter()
        .filter(|o| matches!(o, Output::FlightRetransmitted))
        .count()
}
