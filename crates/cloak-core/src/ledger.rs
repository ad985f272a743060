//! Session ledger collaborator.
//!
//! The ledger is a durable key-value store of handshake records plus the
//! append-only message table. Records carry a version number; all updates
//! are compare-and-swap, so two concurrent transitions on the same record
//! produce exactly one winner and one `Conflict`.

use thiserror::Error;

use cloak_proto::StoredMessage;

use crate::record::{HandshakeRecord, SessionId};

/// A record together with its storage version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// The handshake record.
    pub record: HandshakeRecord,
    /// Monotonic per-record version, bumped on every successful update.
    pub version: u64,
}

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A concurrent writer won the race; re-read and re-validate.
    #[error("version conflict: expected {expected}, got {got}")]
    Conflict {
        /// Version the writer observed.
        expected: u64,
        /// Version actually stored.
        got: u64,
    },

    /// Insert of a session id that is already present.
    #[error("record already exists: {session_id}")]
    AlreadyExists {
        /// The duplicated id.
        session_id: SessionId,
    },

    /// Update of a session id that is not present.
    #[error("record not found: {session_id}")]
    NotFound {
        /// The missing id.
        session_id: SessionId,
    },

    /// Backend failure.
    #[error("ledger backend: {reason}")]
    Backend {
        /// Human-readable cause for logs.
        reason: String,
    },
}

/// Durable store of handshake records and sealed messages.
///
/// Implementations must serialize updates per record: `update_record` and
/// `append_message` succeed only when `expected_version` still matches,
/// and `append_message` persists the counter update and the message
/// atomically.
pub trait LedgerStore: Send + Sync {
    /// Insert a fresh record at version 1.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the session id is taken.
    fn insert_record(&self, record: HandshakeRecord) -> Result<(), LedgerError>;

    /// Fetch a record with its current version.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on storage failure.
    fn record(&self, session_id: &str) -> Result<Option<VersionedRecord>, LedgerError>;

    /// Replace a record if its version still matches.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when a concurrent writer got there first,
    /// `NotFound` if the record vanished.
    fn update_record(
        &self,
        expected_version: u64,
        record: HandshakeRecord,
    ) -> Result<(), LedgerError>;

    /// All `Initiated` records addressed to `responder_id` that are still
    /// within their deadline at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on storage failure.
    fn pending_for(&self, responder_id: &str, now_ms: u64)
        -> Result<Vec<VersionedRecord>, LedgerError>;

    /// Atomically persist an updated record (sequence counter advanced) and
    /// append the message.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when a concurrent writer got there first.
    fn append_message(
        &self,
        expected_version: u64,
        record: HandshakeRecord,
        message: StoredMessage,
    ) -> Result<(), LedgerError>;

    /// Chronological list of stored messages between two identities.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on storage failure.
    fn conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<StoredMessage>, LedgerError>;

    /// Records below `Completed` whose deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on storage failure.
    fn stale_records(&self, now_ms: u64) -> Result<Vec<VersionedRecord>, LedgerError>;
}
