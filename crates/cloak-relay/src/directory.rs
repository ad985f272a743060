//! In-memory identity directory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cloak_core::{CoreError, DirectoryLookup};
use cloak_crypto::VerifyingKey;

/// In-memory `DirectoryLookup` for tests and single-node deployments.
///
/// Registration itself is an external concern; this only stores what the
/// validator reads: which users exist and their verification keys.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    users: Arc<RwLock<HashMap<String, Option<VerifyingKey>>>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with a verification key.
    pub fn register(&self, user_id: &str, key: VerifyingKey) {
        self.write().insert(user_id.to_string(), Some(key));
    }

    /// Register a user without a signing key (never uploaded one).
    pub fn register_keyless(&self, user_id: &str) {
        self.write().insert(user_id.to_string(), None);
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Option<VerifyingKey>>> {
        self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Option<VerifyingKey>>> {
        self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DirectoryLookup for MemoryDirectory {
    fn user_exists(&self, user_id: &str) -> Result<bool, CoreError> {
        Ok(self.read().contains_key(user_id))
    }

    fn verification_key(&self, user_id: &str) -> Result<Option<VerifyingKey>, CoreError> {
        match self.read().get(user_id) {
            Some(key) => Ok(key.clone()),
            None => Err(CoreError::UserNotFound { user_id: user_id.to_string() }),
        }
    }
}
