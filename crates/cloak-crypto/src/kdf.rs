//! Session key derivation and key confirmation.
//!
//! The session key is derived once per handshake:
//!
//! ```text
//! K = HKDF-SHA256(ikm = z, salt = n_initiator || n_responder,
//!                 info = "secure-messaging-session-key", len = 32)
//! ```
//!
//! The nonce concatenation order is fixed: initiator first, responder second,
//! on both sides. Confirmation tags are HMAC-SHA256 keyed with the raw shared
//! secret over a payload binding the session id, the party role, and a hash
//! of the secret.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::ecdh::SharedSecret;
use crate::{CryptoError, HANDSHAKE_NONCE_SIZE};

/// Size of the derived AES-256-GCM session key in bytes.
pub const SESSION_KEY_SIZE: usize = 32;

/// Size of a confirmation tag in bytes.
pub const CONFIRMATION_TAG_SIZE: usize = 32;

/// HKDF info string for session key derivation (domain separation).
const SESSION_KEY_INFO: &[u8] = b"secure-messaging-session-key";

/// The derived per-session symmetric key.
///
/// The only key material that outlives the handshake. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; SESSION_KEY_SIZE]>);

impl SessionKey {
    /// Wrap raw key bytes (e.g. re-loaded from a local key store).
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").field("key", &"<redacted>").finish()
    }
}

/// Derive the session key from the shared secret and both handshake nonces.
///
/// # Errors
///
/// Returns `DerivationFailed` if HKDF expansion fails (cannot happen for a
/// 32-byte output, kept for uniform error surfaces).
pub fn derive_session_key(
    shared: &SharedSecret,
    initiator_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
    responder_nonce: &[u8; HANDSHAKE_NONCE_SIZE],
) -> Result<SessionKey, CryptoError> {
    // Salt order is part of the protocol: initiator nonce first.
    let mut salt = [0u8; HANDSHAKE_NONCE_SIZE * 2];
    salt[..HANDSHAKE_NONCE_SIZE].copy_from_slice(initiator_nonce);
    salt[HANDSHAKE_NONCE_SIZE..].copy_from_slice(responder_nonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut key = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
    hk.expand(SESSION_KEY_INFO, key.as_mut_slice())
        .map_err(|_| CryptoError::DerivationFailed)?;

    Ok(SessionKey(key))
}

/// Compute a key confirmation tag for one party.
///
/// `role_label` is `"initiator"` or `"responder"`. The tag is keyed with the
/// raw shared secret and covers `<session_id>|<role>|<base64(sha256(z))>`,
/// so a peer that derived a different secret cannot produce it.
pub fn confirmation_tag(
    shared: &SharedSecret,
    session_id: &str,
    role_label: &str,
) -> [u8; CONFIRMATION_TAG_SIZE] {
    let hash_b64 = BASE64.encode(shared.hash());
    let payload = format!("{session_id}|{role_label}|{hash_b64}");

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(shared.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().into()
}
