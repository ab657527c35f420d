//! Encryption capability slot.
//!
//! The engine does not ship a cipher. Deployments that need encrypted
//! artifacts install their own [`Encryptor`]; the default [`NoopEncryptor`]
//! passes bytes through unchanged and reports that it does not encrypt, so
//! artifacts are never labelled as encrypted when they are not.

use crate::error::Result;

/// Transforms packaged bytes on the way to disk and back.
pub trait Encryptor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`Encryptor::encrypt`] actually changes the bytes.
    fn encrypts(&self) -> bool;

    fn encrypt(&self, plaintext: Vec<u8>) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: Vec<u8>) -> Result<Vec<u8>>;
}

/// Identity transform used when no encryptor is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEncryptor;

impl Encryptor for NoopEncryptor {
    fn name(&self) -> &str {
        "none"
    }

    fn encrypts(&self) -> bool {
        false
    }

    fn encrypt(&self, plaintext: Vec<u8>) -> Result<Vec<u8>> {
        Ok(plaintext)
    }

    fn decrypt(&self, ciphertext: Vec<u8>) -> Result<Vec<u8>> {
        Ok(ciphertext)
    }
}
