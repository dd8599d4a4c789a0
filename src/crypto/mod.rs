//! Record protection and transcript seams.
//!
//! The reassembly engine never touches key material. It calls out through
//! [`RecordDecrypt`] for records of the current read epoch, and hands every
//! reassembled handshake message to a [`TranscriptSink`].

use thiserror::Error;

use crate::buffer::Buf;
use crate::types::{ContentType, Sequence};

mod gcm;
mod transcript;

pub use gcm::AesGcmCipher;
pub use transcript::{HashAlgorithm, Transcript};

/// Why a record could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("Record too short: {0} bytes")]
    TooShort(usize),

    #[error("Record authentication failed")]
    BadRecordMac,
}

/// Read side record protection for one epoch.
pub trait RecordDecrypt {
    /// Open the protected `fragment` of a record.
    ///
    /// Returns the inner content type and the plaintext. In DTLS 1.2 the inner
    /// content type is the outer one.
    fn decrypt(
        &mut self,
        content_type: ContentType,
        fragment: &[u8],
        sequence: Sequence,
    ) -> Result<(ContentType, Buf), DecryptError>;
}

/// The epoch 0 read cipher. Records are in the clear.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCipher;

impl RecordDecrypt for NullCipher {
    fn decrypt(
        &mut self,
        content_type: ContentType,
        fragment: &[u8],
        _sequence: Sequence,
    ) -> Result<(ContentType, Buf), DecryptError> {
        Ok((content_type, Buf::from_slice(fragment)))
    }
}

/// Receives every reassembled, hashable handshake message.
///
/// Messages arrive in the DTLS transcript form: the 12 byte handshake header
/// with `fragment_offset = 0` and `fragment_length = length`, followed by the
/// body.
pub trait TranscriptSink {
    fn append(&mut self, message: &[u8]);
}

impl<T: TranscriptSink + ?Sized> TranscriptSink for &mut T {
    fn append(&mut self, message: &[u8]) {
        (**self).append(message)
    }
}

impl<T: TranscriptSink + ?Sized> TranscriptSink for Box<T> {
    fn append(&mut self, message: &[u8]) {
        (**self).append(message)
    }
}
