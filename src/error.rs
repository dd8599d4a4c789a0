use thiserror::Error;

use crate::types::HandshakeType;

/// Errors surfaced by the reassembly engine.
///
/// Ordinary network noise (truncated records, replays, stale epochs) is never
/// an error; it is logged and dropped. Anything returned here is either a
/// configuration mistake or terminates the connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Parse incomplete")]
    ParseIncomplete,

    #[error("Malformed record: {0}")]
    MalformedRecord(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Decryption failed: {0}")]
    DecryptFailed(String),

    #[error("Epoch is not allowed to wrap")]
    WrappedEpoch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("Crypto error: {0}")]
    CryptoError(String),
}

/// Violations by the peer that must terminate the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// One handshake type was bound to two message sequence numbers
    /// within the same handshake epoch.
    #[error(
        "Two message sequence numbers ({first} and {second}) used for handshake type {msg_type:?}"
    )]
    AmbiguousMessageSequence {
        msg_type: HandshakeType,
        first: u16,
        second: u16,
    },

    /// The declared handshake message length is above the configured maximum.
    #[error("Handshake message of {length} bytes exceeds the maximum of {max}")]
    MessageTooBig { length: usize, max: usize },
}

impl Error {
    /// Whether this error is a peer protocol violation.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
