//! Cloak relay.
//!
//! The untrusted-for-confidentiality server side of the protocol: it stores
//! only ciphertext and handshake metadata, and guards every ledger
//! transition with authentication, freshness, signature, status, and
//! sequence checks. It never holds plaintext, long-term secrets, or derived
//! session keys.
//!
//! ## Architecture
//!
//! ```text
//! cloak-relay
//!   ├─ Validator         (gating logic around the ledger)
//!   ├─ MemoryLedger      (versioned records + message table, CAS updates)
//!   ├─ MemoryDirectory   (identity → verification key)
//!   ├─ AuditSink         (MemoryAudit / TracingAudit)
//!   └─ SystemEnv         (production clock + OS entropy)
//! ```
//!
//! HTTP/TLS binding and bearer-token issuance live outside this crate; the
//! validator receives an already-authenticated [`Caller`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod config;
mod directory;
mod ledger;
mod system_env;
mod validator;

pub use audit::{AuditEntry, AuditSink, MemoryAudit, TracingAudit};
pub use config::ValidatorConfig;
pub use directory::MemoryDirectory;
pub use ledger::MemoryLedger;
pub use system_env::SystemEnv;
pub use validator::{Caller, Validator};
