//! Payload sealing for state persisted at rest.
//!
//! AES-256-GCM with a fresh 96-bit nonce prepended to every ciphertext.
//! The key derives from an operator passphrase via SHA-256, so
//! configuration carries a passphrase rather than raw key bytes.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("sealed payload is too short to carry a nonce")]
    TooShort,
    #[error("failed to seal payload")]
    Seal,
    #[error("failed to open sealed payload; wrong key or corrupted data")]
    Open,
}

/// Seals and opens opaque byte payloads.
#[derive(Clone)]
pub struct PayloadCodec {
    cipher: Aes256Gcm,
}

impl PayloadCodec {
    /// Derive the cipher key from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Encrypt `plaintext`; the output is nonce || ciphertext, with the
    /// GCM tag appended to the ciphertext by the cipher.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|_| CodecError::Seal)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a payload produced by [`seal`](Self::seal). Tampering with
    /// any byte, nonce included, fails authentication.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        if sealed.len() < NONCE_LEN {
            return Err(CodecError::TooShort);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Open)
    }
}
