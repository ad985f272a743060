//! Audit sink for validator decisions.
//!
//! Every gating failure (and every successful transition) produces one
//! entry. Entries never contain key material or plaintext; the `details`
//! field carries the stable error code or a short event description.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// What happened, e.g. `key_exchange_respond_rejected`.
    pub event_type: String,
    /// Session involved, when known.
    pub session_id: Option<String>,
    /// Caller involved, when known.
    pub user_id: Option<String>,
    /// Stable error code or short description.
    pub details: String,
    /// Caller address as reported by the transport layer.
    pub ip: String,
    /// Validator clock at the event, epoch milliseconds.
    pub timestamp: u64,
}

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    /// Persist one entry. Must not fail the guarded operation.
    fn record(&self, entry: AuditEntry);
}

/// In-memory audit sink for tests and small deployments.
#[derive(Clone, Default)]
pub struct MemoryAudit {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAudit {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Number of entries recorded.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(entry);
    }
}

/// Audit sink that forwards entries to the `tracing` subscriber.
#[derive(Clone, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            event_type = %entry.event_type,
            session_id = entry.session_id.as_deref().unwrap_or("-"),
            user_id = entry.user_id.as_deref().unwrap_or("-"),
            details = %entry.details,
            ip = %entry.ip,
            "audit"
        );
    }
}
