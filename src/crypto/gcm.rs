//! DTLS 1.2 AES-GCM record protection (RFC 5288, RFC 6347).

use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use super::{DecryptError, RecordDecrypt};
use crate::buffer::Buf;
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::Error;

/// Explicit nonce length for DTLS AEAD records.
///
/// The explicit nonce is transmitted with each record.
const DTLS_EXPLICIT_NONCE_LEN: usize = 8;

/// GCM authentication tag length.
const GCM_TAG_LEN: usize = 16;

/// Overhead per AEAD record (explicit nonce + tag).
const DTLS_AEAD_OVERHEAD: usize = DTLS_EXPLICIT_NONCE_LEN + GCM_TAG_LEN; // 24

/// Implicit part of the nonce, derived with the keys.
const FIXED_IV_LEN: usize = 4;

enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => {
                let key = Key::<Aes128Gcm>::from_slice(key);
                Ok(AesGcm::Aes128(Box::new(Aes128Gcm::new(key))))
            }
            32 => {
                let key = Key::<Aes256Gcm>::from_slice(key);
                Ok(AesGcm::Aes256(Box::new(Aes256Gcm::new(key))))
            }
            _ => Err(format!("Invalid key size for AES-GCM: {}", key.len())),
        }
    }

    fn encrypt(&self, nonce: &[u8; 12], aad: &[u8], data: &mut Buf) -> Result<(), aes_gcm::Error> {
        let nonce = GenericArray::from_slice(nonce);
        match self {
            AesGcm::Aes128(cipher) => cipher.encrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.encrypt_in_place(nonce, aad, data),
        }
    }

    fn decrypt(&self, nonce: &[u8; 12], aad: &[u8], data: &mut Buf) -> Result<(), aes_gcm::Error> {
        let nonce = GenericArray::from_slice(nonce);
        // decrypt_in_place removes the tag and shortens the buffer
        match self {
            AesGcm::Aes128(cipher) => cipher.decrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.decrypt_in_place(nonce, aad, data),
        }
    }
}

/// AES-GCM protection for the records of one epoch.
///
/// Opens records through [`RecordDecrypt`]. [`AesGcmCipher::seal`] produces
/// records in the same format, which is what a sender (or a test playing
/// the peer) needs.
pub struct AesGcmCipher {
    cipher: AesGcm,
    fixed_iv: [u8; FIXED_IV_LEN],
    rng: StdRng,
}

impl AesGcmCipher {
    /// Create a cipher from a 16 or 32 byte key and the 4 byte fixed IV.
    pub fn new(key: &[u8], fixed_iv: &[u8]) -> Result<Self, Error> {
        let cipher = AesGcm::new(key).map_err(Error::CryptoError)?;
        let fixed_iv = fixed_iv
            .try_into()
            .map_err(|_| Error::CryptoError(format!("Invalid fixed IV size: {}", fixed_iv.len())))?;

        Ok(AesGcmCipher {
            cipher,
            fixed_iv,
            rng: StdRng::from_entropy(),
        })
    }

    /// Protect `plaintext` as the fragment of a record.
    ///
    /// The result is `explicit_nonce ‖ ciphertext ‖ tag`.
    pub fn seal(
        &mut self,
        content_type: ContentType,
        sequence: Sequence,
        plaintext: &[u8],
    ) -> Result<Buf, Error> {
        let length = u16::try_from(plaintext.len())
            .map_err(|_| Error::CryptoError("Plaintext too long".to_string()))?;

        let mut explicit = [0u8; DTLS_EXPLICIT_NONCE_LEN];
        self.rng.fill_bytes(&mut explicit);

        let nonce = nonce(&self.fixed_iv, &explicit);
        let aad = aad(sequence, content_type, length);

        let mut data = Buf::from_slice(plaintext);
        self.cipher
            .encrypt(&nonce, &aad, &mut data)
            .map_err(|_| Error::CryptoError("AES-GCM encryption failed".to_string()))?;

        let mut out = Buf::new();
        out.extend_from_slice(&explicit);
        out.extend_from_slice(&data);
        Ok(out)
    }
}

impl RecordDecrypt for AesGcmCipher {
    fn decrypt(
        &mut self,
        content_type: ContentType,
        fragment: &[u8],
        sequence: Sequence,
    ) -> Result<(ContentType, Buf), DecryptError> {
        let Some(plaintext_len) = fragment.len().checked_sub(DTLS_AEAD_OVERHEAD) else {
            return Err(DecryptError::TooShort(fragment.len()));
        };
        let plaintext_len =
            u16::try_from(plaintext_len).map_err(|_| DecryptError::BadRecordMac)?;

        let (explicit, ciphertext) = fragment.split_at(DTLS_EXPLICIT_NONCE_LEN);
        let nonce = nonce(&self.fixed_iv, explicit);
        let aad = aad(sequence, content_type, plaintext_len);

        let mut data = Buf::from_slice(ciphertext);
        self.cipher
            .decrypt(&nonce, &aad, &mut data)
            .map_err(|_| DecryptError::BadRecordMac)?;

        Ok((content_type, data))
    }
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self.cipher {
            AesGcm::Aes128(_) => "Aes128",
            AesGcm::Aes256(_) => "Aes256",
        };
        f.debug_struct("AesGcmCipher")
            .field("cipher", &variant)
            .finish()
    }
}

/// Full AEAD nonce: fixed IV followed by the explicit nonce.
fn nonce(fixed_iv: &[u8; FIXED_IV_LEN], explicit: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..FIXED_IV_LEN].copy_from_slice(fixed_iv);
    nonce[FIXED_IV_LEN..].copy_from_slice(explicit);
    nonce
}

/// `epoch ‖ seq48 ‖ type ‖ version ‖ plaintext_length`
fn aad(sequence: Sequence, content_type: ContentType, length: u16) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&sequence.to_bytes());
    aad[8] = content_type.as_u8();
    aad[9..11].copy_from_slice(&ProtocolVersion::DTLS1_2.as_u16().to_be_bytes());
    aad[11..].copy_from_slice(&length.to_be_bytes());
    aad
}
