//! In-memory session ledger.
//!
//! Versioned records behind one mutex: every update is a compare-and-swap
//! against the version the writer observed, so concurrent transitions on
//! the same record resolve to exactly one winner. Message appends persist
//! the advanced counter and the message in the same critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cloak_core::{HandshakeRecord, LedgerError, LedgerStore, SessionStatus, VersionedRecord};
use cloak_proto::StoredMessage;

#[derive(Default)]
struct Inner {
    records: HashMap<String, VersionedRecord>,
    messages: Vec<StoredMessage>,
}

/// In-memory `LedgerStore` for tests and single-node deployments.
///
/// Clones share state via `Arc`, mirroring a shared database handle.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handshake records stored.
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Number of messages stored.
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LedgerStore for MemoryLedger {
    fn insert_record(&self, record: HandshakeRecord) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.records.contains_key(&record.session_id) {
            return Err(LedgerError::AlreadyExists { session_id: record.session_id });
        }
        inner
            .records
            .insert(record.session_id.clone(), VersionedRecord { record, version: 1 });
        Ok(())
    }

    fn record(&self, session_id: &str) -> Result<Option<VersionedRecord>, LedgerError> {
        Ok(self.lock().records.get(session_id).cloned())
    }

    fn update_record(
        &self,
        expected_version: u64,
        record: HandshakeRecord,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let stored = inner
            .records
            .get_mut(&record.session_id)
            .ok_or_else(|| LedgerError::NotFound { session_id: record.session_id.clone() })?;

        if stored.version != expected_version {
            return Err(LedgerError::Conflict {
                expected: expected_version,
                got: stored.version,
            });
        }

        stored.record = record;
        stored.version += 1;
        Ok(())
    }

    fn pending_for(
        &self,
        responder_id: &str,
        now_ms: u64,
    ) -> Result<Vec<VersionedRecord>, LedgerError> {
        let inner = self.lock();
        let mut pending: Vec<VersionedRecord> = inner
            .records
            .values()
            .filter(|v| {
                v.record.status == SessionStatus::Initiated
                    && v.record.responder_id == responder_id
                    && now_ms <= v.record.expires_at
            })
            .cloned()
            .collect();
        pending.sort_by_key(|v| v.record.created_at);
        Ok(pending)
    }

    fn append_message(
        &self,
        expected_version: u64,
        record: HandshakeRecord,
        message: StoredMessage,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let stored = inner
            .records
            .get_mut(&record.session_id)
            .ok_or_else(|| LedgerError::NotFound { session_id: record.session_id.clone() })?;

        if stored.version != expected_version {
            return Err(LedgerError::Conflict {
                expected: expected_version,
                got: stored.version,
            });
        }

        stored.record = record;
        stored.version += 1;
        inner.messages.push(message);
        Ok(())
    }

    fn conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<StoredMessage>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .messages
            .iter()
            .filter(|m| {
                (m.from == user_a && m.to == user_b) || (m.from == user_b && m.to == user_a)
            })
            .cloned()
            .collect())
    }

    fn stale_records(&self, now_ms: u64) -> Result<Vec<VersionedRecord>, LedgerError> {
        let inner = self.lock();
        Ok(inner.records.values().filter(|v| v.record.is_expired(now_ms)).cloned().collect())
    }
}
