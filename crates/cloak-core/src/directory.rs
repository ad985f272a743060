//! Identity directory collaborator.

use cloak_crypto::VerifyingKey;

use crate::error::CoreError;

/// Lookup of long-term verification keys by identity id.
///
/// The directory is an external collaborator: registration and key upload
/// happen elsewhere. The core only reads from it.
pub trait DirectoryLookup: Send + Sync {
    /// Whether the identity is registered at all.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on backend failure.
    fn user_exists(&self, user_id: &str) -> Result<bool, CoreError>;

    /// The identity's registered verification key, if it has one.
    ///
    /// `Ok(None)` means the user exists but never uploaded a signing key.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` for unregistered ids, `Internal` on backend
    /// failure.
    fn verification_key(&self, user_id: &str) -> Result<Option<VerifyingKey>, CoreError>;
}
