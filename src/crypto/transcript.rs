use sha2::{Digest, Sha256, Sha384};

use super::TranscriptSink;
use crate::buffer::Buf;

/// Hash algorithms for the handshake transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    SHA256,
    SHA384,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
        }
    }
}

/// Buffering handshake transcript.
///
/// The PRF hash is only known once the cipher suite is negotiated, which is
/// after the first messages have gone by. The transcript therefore keeps
/// the raw bytes and hashes on demand.
#[derive(Default)]
pub struct Transcript {
    data: Buf,
    messages: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw transcript so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of messages appended.
    pub fn message_count(&self) -> usize {
        self.messages
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> Buf {
        let mut out = Buf::new();
        match algorithm {
            HashAlgorithm::SHA256 => out.extend_from_slice(&Sha256::digest(&self.data)),
            HashAlgorithm::SHA384 => out.extend_from_slice(&Sha384::digest(&self.data)),
        }
        out
    }

    /// Start over, for a new handshake.
    pub fn clear(&mut self) {
        self.data.clear();
        self.messages = 0;
    }
}

impl TranscriptSink for Transcript {
    fn append(&mut self, message: &[u8]) {
        self.data.extend_from_slice(message);
        self.messages += 1;
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("messages", &self.messages)
            .field("len", &self.data.len())
            .finish()
    }
}
