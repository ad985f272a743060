//! Authenticated encryption with AES-256-GCM.
//!
//! 96-bit IVs, 128-bit tag appended to the ciphertext. IV uniqueness per key
//! is the caller's responsibility (the secure channel draws a fresh random IV
//! under its sequence mutex for every message).

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

use crate::kdf::SessionKey;
use crate::CryptoError;

/// Size of the AES-GCM IV in bytes.
pub const IV_SIZE: usize = 12;

/// Size of the appended authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` with the given IV.
///
/// # Errors
///
/// Returns `SealFailed` if encryption fails.
pub fn seal(key: &SessionKey, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::SealFailed)?;
    cipher.encrypt(Nonce::from_slice(iv), plaintext).map_err(|_| CryptoError::SealFailed)
}

/// Decrypt and authenticate `ciphertext` under `key` with the given IV.
///
/// # Errors
///
/// Returns `AuthFailed` if the tag does not verify. No plaintext is ever
/// returned on failure.
pub fn open(key: &SessionKey, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::AuthFailed)?;
    cipher.decrypt(Nonce::from_slice(iv), ciphertext).map_err(|_| CryptoError::AuthFailed)
}
