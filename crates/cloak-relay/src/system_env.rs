//! Production Environment implementation using system time and RNG.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cloak_core::Environment;

/// Production environment: system clock, tokio sleeping, OS entropy.
///
/// # Security
///
/// Randomness comes from `getrandom`, the OS entropy pool. Suitable for
/// ephemeral keys, nonces, and IVs.
///
/// # Panics
///
/// `random_bytes` panics if the OS entropy pool is unavailable. Every
/// consumer of these bytes is cryptographic; continuing with degraded
/// output would silently compromise key material.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        // These bytes become ephemeral keys, nonces, and IVs. No fallback:
        // a process that cannot read OS entropy must not keep running.
        getrandom::fill(buffer).unwrap_or_else(|e| {
            tracing::error!("getrandom failed: {}", e);
            panic!("OS entropy unavailable: {e}");
        });
    }
}
