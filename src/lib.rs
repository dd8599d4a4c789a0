//! Handshake reassembly and replay detection for DTLS 1.2.
//!
//! Datagram transports deliver records out of order, duplicated or not at
//! all. The handshake layer above needs the opposite: one complete,
//! deduplicated byte buffer per handshake message, in message order, and a
//! clear signal when the peer retransmitted a whole flight it already sent.
//!
//! [`ReassemblyEngine`] sits between the two. It is sans-IO: hand it one
//! record (or one datagram) at a time and it returns at most one
//! reconstructed [`Output`] per call. Anything that becomes ready later is
//! drained with [`ReassemblyEngine::take_ready_unit`].
//!
//! ```
//! use std::sync::Arc;
//! use dtls_reassembly::{Config, Output, ReassemblyEngine, Transcript};
//!
//! let config = Arc::new(Config::default());
//! let mut engine = ReassemblyEngine::new(config, Transcript::new());
//!
//! // ClientHello, message_seq 0, unfragmented, 3 byte body.
//! let record = [
//!     22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 15, // record header
//!     1, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 3, // handshake header
//!     0xaa, 0xbb, 0xcc,
//! ];
//!
//! let out = engine.submit_record(&record).unwrap();
//! let Some(Output::Handshake(msg)) = out else { panic!() };
//! assert_eq!(msg.body(), &[0xaa, 0xbb, 0xcc]);
//! ```
//!
//! The record cipher and the transcript hash are collaborators supplied by
//! the caller through [`RecordDecrypt`] and [`TranscriptSink`]. Concrete
//! implementations for DTLS 1.2 AES-GCM and SHA-2 transcripts are included.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod buffer;
pub use buffer::Buf;

mod config;
pub use config::{Config, ConfigBuilder, DecryptFailurePolicy};

mod crypto;
pub use crypto::{AesGcmCipher, DecryptError, HashAlgorithm, NullCipher, RecordDecrypt};
pub use crypto::{Transcript, TranscriptSink};

mod engine;
pub use engine::{HandshakeMessage, Output, ReassemblyEngine};

mod error;
pub use error::{Error, ProtocolError};

mod flight;
mod gate;
mod handshake;
pub use handshake::HandshakeHeader;

mod holes;
pub use holes::HoleState;

mod reassembler;

mod record;
pub use record::{RecordHeader, Records};

mod types;
pub use types::{ContentType, HandshakeType, ProtocolVersion, Sequence};

mod unit;
mod util;
mod window;
