//! Cloak client.
//!
//! The user-side half of the protocol: long-term identity keys, handshake
//! driving with bounded polling, the local key store, and sealed messaging
//! with file chunking.
//!
//! ## Architecture
//!
//! ```text
//! cloak-client
//!   ├─ Client            (I/O choreography around the core engine)
//!   ├─ KeyStore          (signing key + session-key blobs)
//!   └─ ClientConfig      (poll interval / deadline)
//! ```
//!
//! All cryptography happens in `cloak-core`/`cloak-crypto`; this crate
//! never sees a raw shared secret.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod key_store;

pub use client::{Client, Delivery, ResumeOutcome};
pub use config::ClientConfig;
pub use error::ClientError;
pub use key_store::{KeyStore, MemoryKeyStore, SessionKeyBlob};
