//! Local key store.
//!
//! Owned exclusively by one identity, never shared across processes. Holds
//! the long-term private keys and one session-key blob per completed
//! session. The blob carries the partner id alongside the key so later
//! operations can address the peer without a fresh lookup, and the sequence
//! counters so a restarted client resumes with the true next values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cloak_crypto::{SessionKey, SigningKeyPair};

use crate::error::ClientError;

/// Stored per-session key material and counters.
#[derive(Clone)]
pub struct SessionKeyBlob {
    /// The derived session key.
    pub key: SessionKey,
    /// The peer on the other end of the session.
    pub partner_id: String,
    /// Last sequence number accepted by the relay for our direction.
    pub last_sent: u64,
    /// Last inbound sequence number delivered to the application.
    pub last_received: u64,
}

impl std::fmt::Debug for SessionKeyBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyBlob")
            .field("partner_id", &self.partner_id)
            .field("last_sent", &self.last_sent)
            .field("last_received", &self.last_received)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Keyed blob storage for one identity's secrets.
///
/// Implementations are encrypted at rest in production; the core contract
/// only cares about the operations below.
pub trait KeyStore: Send + Sync {
    /// Persist the long-term signing key (PKCS#8 DER).
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` on backend failure.
    fn store_signing_key(&self, user_id: &str, der: &[u8]) -> Result<(), ClientError>;

    /// Load the long-term signing key, if present.
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` if the stored blob does not decode.
    fn load_signing_key(&self, user_id: &str) -> Result<Option<SigningKeyPair>, ClientError>;

    /// Persist the long-term encryption key blob (unused by the handshake,
    /// retained for directory-level fingerprinting).
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` on backend failure.
    fn store_encryption_key(&self, user_id: &str, der: &[u8]) -> Result<(), ClientError>;

    /// Persist a session-key blob under `(user_id, session_id)`.
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` on backend failure.
    fn store_session(
        &self,
        user_id: &str,
        session_id: &str,
        blob: SessionKeyBlob,
    ) -> Result<(), ClientError>;

    /// Load a session-key blob.
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` on backend failure.
    fn load_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionKeyBlob>, ClientError>;

    /// Update the stored counters after relay-accepted traffic.
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` if the blob is missing.
    fn update_sequences(
        &self,
        user_id: &str,
        session_id: &str,
        last_sent: u64,
        last_received: u64,
    ) -> Result<(), ClientError>;

    /// Discard a session's key material (e.g. after a mismatch warning).
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` on backend failure.
    fn delete_session(&self, user_id: &str, session_id: &str) -> Result<(), ClientError>;
}

#[derive(Default)]
struct Inner {
    signing_keys: HashMap<String, Vec<u8>>,
    encryption_keys: HashMap<String, Vec<u8>>,
    sessions: HashMap<(String, String), SessionKeyBlob>,
}

/// In-memory `KeyStore` for tests.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyStore for MemoryKeyStore {
    fn store_signing_key(&self, user_id: &str, der: &[u8]) -> Result<(), ClientError> {
        self.lock().signing_keys.insert(user_id.to_string(), der.to_vec());
        Ok(())
    }

    fn load_signing_key(&self, user_id: &str) -> Result<Option<SigningKeyPair>, ClientError> {
        match self.lock().signing_keys.get(user_id) {
            None => Ok(None),
            Some(der) => SigningKeyPair::from_pkcs8_der(der)
                .map(Some)
                .map_err(|e| ClientError::KeyStore { reason: format!("signing key: {e}") }),
        }
    }

    fn store_encryption_key(&self, user_id: &str, der: &[u8]) -> Result<(), ClientError> {
        self.lock().encryption_keys.insert(user_id.to_string(), der.to_vec());
        Ok(())
    }

    fn store_session(
        &self,
        user_id: &str,
        session_id: &str,
        blob: SessionKeyBlob,
    ) -> Result<(), ClientError> {
        self.lock().sessions.insert((user_id.to_string(), session_id.to_string()), blob);
        Ok(())
    }

    fn load_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionKeyBlob>, ClientError> {
        Ok(self
            .lock()
            .sessions
            .get(&(user_id.to_string(), session_id.to_string()))
            .cloned())
    }

    fn update_sequences(
        &self,
        user_id: &str,
        session_id: &str,
        last_sent: u64,
        last_received: u64,
    ) -> Result<(), ClientError> {
        let mut inner = self.lock();
        let blob = inner
            .sessions
            .get_mut(&(user_id.to_string(), session_id.to_string()))
            .ok_or_else(|| ClientError::KeyStore {
                reason: format!("no session blob for {session_id}"),
            })?;
        blob.last_sent = last_sent;
        blob.last_received = last_received;
        Ok(())
    }

    fn delete_session(&self, user_id: &str, session_id: &str) -> Result<(), ClientError> {
        self.lock().sessions.remove(&(user_id.to_string(), session_id.to_string()));
        Ok(())
    }
}
