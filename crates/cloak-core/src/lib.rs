//! Cloak Core
//!
//! The domain model of the cloak messaging protocol: handshake records and
//! their status machine, the client-side handshake engine, the per-session
//! secure channel, and the collaborator interfaces the core consumes
//! (identity directory, session ledger, transport, environment).
//!
//! ## Architecture
//!
//! ```text
//! cloak-core
//!   ├─ Environment        (clock + CSPRNG + async sleep)
//!   ├─ HandshakeRecord    (ledger entity + status machine)
//!   ├─ HandshakeEngine    (client-side key agreement)
//!   ├─ SecureChannel      (sequence counters + AEAD framing)
//!   └─ traits             (DirectoryLookup, LedgerStore, Transport)
//! ```
//!
//! Protocol logic here is sans-IO: the relay validator and the client
//! drive it against real or in-memory collaborators.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod directory;
pub mod env;
pub mod error;
pub mod handshake;
pub mod ledger;
pub mod record;
pub mod transport;

pub use channel::{SecureChannel, FILE_CHUNK_SIZE, MAX_PLAINTEXT_SIZE};
pub use directory::DirectoryLookup;
pub use env::{EnvRng, Environment};
pub use error::CoreError;
pub use handshake::{EstablishedSession, HandshakeEngine, PendingInitiate};
pub use ledger::{LedgerError, LedgerStore, VersionedRecord};
pub use record::{
    HandshakeRecord, Role, SessionId, SessionStatus, UserId, HANDSHAKE_TTL_MS,
};
pub use transport::{Transport, TransportError};

/// Freshness window for signed timestamps, in milliseconds.
pub const FRESHNESS_WINDOW_MS: u64 = 5 * 60 * 1000;
