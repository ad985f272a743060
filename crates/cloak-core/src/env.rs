//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples protocol logic from system resources
//! (wall-clock time, randomness, async sleeping). This enables:
//!
//! - Deterministic Testing: the harness supplies a manual clock and seeded
//!   RNG, allowing perfect bug reproduction.
//! - Production Runtime: the relay and client use real system resources
//!   without any code changes to the protocol logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now_ms()` must never go backwards
//! - Determinism: given the same seed, a test implementation's
//!   `random_bytes()` produces the same sequence
//! - Isolation: implementations must not share global state

use std::time::Duration;

use rand::{CryptoRng, RngCore};

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now_ms()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production
/// 3. Minimal panics: methods are infallible except in exceptional
///    circumstances (e.g., OS entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Wall-clock (not monotonic-instant) because the protocol exchanges
    /// absolute timestamps and validates them against a freshness window.
    fn now_ms(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// The only async method in the trait; used solely by driver code such
    /// as the client poll loop, never by protocol logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use OS entropy (`getrandom`).
    /// Test implementations use a seeded RNG and log the seed.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Adapter exposing an [`Environment`]'s randomness as a `rand` RNG.
///
/// RSA-PSS signing and ephemeral key generation take `RngCore + CryptoRng`;
/// this keeps them on the environment's entropy source instead of reaching
/// for a global RNG.
pub struct EnvRng<'a, E: Environment>(pub &'a E);

impl<E: Environment> RngCore for EnvRng<'_, E> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.0.random_bytes(&mut buf);
        u32::from_be_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.0.random_bytes(&mut buf);
        u64::from_be_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.random_bytes(dest);
        Ok(())
    }
}

impl<E: Environment> CryptoRng for EnvRng<'_, E> {}
