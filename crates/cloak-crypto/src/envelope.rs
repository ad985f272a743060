//! Per-file key envelopes.
//!
//! Large file transfers generate a fresh content key per file; the session
//! key only wraps that key. Each recipient of the file record gets the
//! content key sealed under their own session key, so the bulk ciphertext is
//! uploaded once.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::aead::{open, seal, IV_SIZE};
use crate::kdf::{SessionKey, SESSION_KEY_SIZE};
use crate::CryptoError;

/// A per-file AES-256 content key. Zeroized on drop.
pub struct FileKey(Zeroizing<[u8; SESSION_KEY_SIZE]>);

impl FileKey {
    /// Generate a fresh content key.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
        rng.fill_bytes(bytes.as_mut());
        Self(bytes)
    }

    /// Use the content key for sealing/opening chunks.
    pub fn as_session_key(&self) -> SessionKey {
        SessionKey::from_bytes(*self.0)
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey").field("key", &"<redacted>").finish()
    }
}

/// Wrap a file key under a session key.
///
/// # Errors
///
/// Returns `SealFailed` if encryption fails.
pub fn wrap_file_key(
    session: &SessionKey,
    iv: &[u8; IV_SIZE],
    file_key: &FileKey,
) -> Result<Vec<u8>, CryptoError> {
    seal(session, iv, file_key.0.as_slice())
}

/// Unwrap a file key under a session key.
///
/// # Errors
///
/// Returns `AuthFailed` on tampering, `InvalidKey` if the unwrapped blob is
/// not key-sized.
pub fn unwrap_file_key(
    session: &SessionKey,
    iv: &[u8; IV_SIZE],
    wrapped: &[u8],
) -> Result<FileKey, CryptoError> {
    let raw = Zeroizing::new(open(session, iv, wrapped)?);
    if raw.len() != SESSION_KEY_SIZE {
        return Err(CryptoError::InvalidKey);
    }

    let mut bytes = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
    bytes.copy_from_slice(&raw);
    Ok(FileKey(bytes))
}
