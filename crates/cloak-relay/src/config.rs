//! Validator configuration.

use cloak_core::{FRESHNESS_WINDOW_MS, HANDSHAKE_TTL_MS};
use cloak_proto::MAX_SEALED_SIZE;

/// Tunable limits for the relay validator.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Maximum |now - timestamp| accepted on signed requests, milliseconds.
    pub freshness_window_ms: u64,
    /// Lifetime of a handshake record before completion, milliseconds.
    pub handshake_ttl_ms: u64,
    /// Maximum `ciphertext + iv` size per message, bytes.
    pub max_sealed_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            freshness_window_ms: FRESHNESS_WINDOW_MS,
            handshake_ttl_ms: HANDSHAKE_TTL_MS,
            max_sealed_size: MAX_SEALED_SIZE,
        }
    }
}
