//! Relay-side validator.
//!
//! The trust boundary around the ledger: every transition is authenticated,
//! freshness-checked, signature-verified, status-gated, and sequence-checked
//! before the record moves. A failed gate leaves the record unchanged (the
//! two exceptions: passing the deadline marks a record `Expired`, and a
//! reported confirmation mismatch marks it `Failed`) and always writes an
//! audit entry.
//!
//! ## Gating order
//!
//! ```text
//! field presence ─▶ freshness ─▶ record fetch ─▶ authorization
//!        ─▶ signature ─▶ expiry ─▶ status gate ─▶ transition (CAS)
//! ```
//!
//! Freshness is checked before any signature work, so stale requests are
//! rejected without touching the directory. The signature is verified
//! before the expiry and status gates: a request that fails verification
//! reports `InvalidSignature` and leaves the record untouched, whatever
//! state the record is in.
//!
//! ## Concurrency
//!
//! The validator keeps no state between requests; all durable state lives
//! in the ledger. Updates are compare-and-swap on the record version: of
//! two concurrent Respond calls exactly one wins, the loser re-reads and
//! surfaces `InvalidStatus`. Confirm and message submission retry once on
//! conflict because the competing writer may have touched the other slot
//! or direction.

use cloak_core::{
    CoreError, DirectoryLookup, Environment, HandshakeRecord, LedgerError, LedgerStore, Role,
    SessionStatus,
};
use cloak_crypto::{CONFIRMATION_TAG_SIZE, EPHEMERAL_PUBLIC_SIZE, HANDSHAKE_NONCE_SIZE, IV_SIZE};
use cloak_proto::{
    canonical, ConfirmRequest, ConfirmResponse, InitiateRequest, InitiateResponse,
    MessageAccepted, MessageSubmission, PendingSession, RespondRequest, RespondResponse,
    SessionView, StatusView, StoredMessage,
};

use crate::audit::{AuditEntry, AuditSink};
use crate::config::ValidatorConfig;

/// The authenticated caller of a validator operation.
///
/// Bearer-token authentication happens in the transport layer; by the time
/// a request reaches the validator the identity is established.
#[derive(Debug, Clone, Copy)]
pub struct Caller<'a> {
    /// Authenticated identity id.
    pub user_id: &'a str,
    /// Remote address, for the audit log.
    pub ip: &'a str,
}

/// Stateless guard for every ledger transition.
pub struct Validator<E, D, L, A>
where
    E: Environment,
    D: DirectoryLookup,
    L: LedgerStore,
    A: AuditSink,
{
    env: E,
    directory: D,
    ledger: L,
    audit: A,
    config: ValidatorConfig,
}

impl<E, D, L, A> Validator<E, D, L, A>
where
    E: Environment,
    D: DirectoryLookup,
    L: LedgerStore,
    A: AuditSink,
{
    /// Build a validator over its collaborators.
    pub fn new(env: E, directory: D, ledger: L, audit: A, config: ValidatorConfig) -> Self {
        Self { env, directory, ledger, audit, config }
    }

    /// Handle `POST /keys/exchange/initiate`.
    ///
    /// # Errors
    ///
    /// `MissingFields`, `InvalidEncoding`, `TimestampExpired`,
    /// `NoSigningKey`, `InvalidSignature`, `UserNotFound`, `Unauthorized`
    /// (self-handshake). No record exists on failure.
    pub fn initiate(
        &self,
        caller: Caller<'_>,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, CoreError> {
        self.initiate_inner(caller, request)
            .map_err(|e| self.rejected("key_exchange_initiate", None, caller, e))
    }

    fn initiate_inner(
        &self,
        caller: Caller<'_>,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, CoreError> {
        if request.responder_id.is_empty() {
            return Err(CoreError::MissingField { field: "responderId" });
        }
        check_point(&request.ephemeral_public, "ephemeralPublic")?;
        check_nonce(&request.nonce, "nonce")?;
        check_present(&request.signature, "signature")?;

        self.check_freshness(request.timestamp)?;

        let key = self
            .directory
            .verification_key(caller.user_id)?
            .ok_or_else(|| CoreError::NoSigningKey { user_id: caller.user_id.to_string() })?;
        let signing_bytes = canonical::init_signing_bytes(
            &request.responder_id,
            &request.ephemeral_public,
            &request.nonce,
            request.timestamp,
        );
        if !key.verify(&signing_bytes, &request.signature) {
            return Err(CoreError::InvalidSignature { user_id: caller.user_id.to_string() });
        }

        if !self.directory.user_exists(&request.responder_id)? {
            return Err(CoreError::UserNotFound { user_id: request.responder_id.clone() });
        }
        if request.responder_id == caller.user_id {
            return Err(CoreError::Unauthorized { caller: caller.user_id.to_string() });
        }

        let now = self.env.now_ms();
        let mut record = HandshakeRecord::new_initiated(
            caller.user_id.to_string(),
            request.responder_id.clone(),
            request.ephemeral_public.clone(),
            request.nonce.clone(),
            request.signature.clone(),
            now,
        );
        record.expires_at = record.created_at + self.config.handshake_ttl_ms;
        let session_id = record.session_id.clone();

        self.ledger.insert_record(record).map_err(ledger_err)?;
        self.accepted("key_exchange_initiate", &session_id, caller);
        Ok(InitiateResponse { session_id })
    }

    /// Handle `POST /keys/exchange/respond`.
    ///
    /// # Errors
    ///
    /// Everything `initiate` surfaces, plus `SessionNotFound`,
    /// `Unauthorized`, `InvalidStatus`, `SessionExpired`. Of two concurrent
    /// calls on one `Initiated` record exactly one wins; the loser sees
    /// `InvalidStatus`.
    pub fn respond(
        &self,
        caller: Caller<'_>,
        request: &RespondRequest,
    ) -> Result<RespondResponse, CoreError> {
        let session_id = request.session_id.clone();
        self.respond_inner(caller, request)
            .map_err(|e| self.rejected("key_exchange_respond", Some(&session_id), caller, e))
    }

    fn respond_inner(
        &self,
        caller: Caller<'_>,
        request: &RespondRequest,
    ) -> Result<RespondResponse, CoreError> {
        if request.session_id.is_empty() {
            return Err(CoreError::MissingField { field: "sessionId" });
        }
        check_point(&request.ephemeral_public, "ephemeralPublic")?;
        check_nonce(&request.nonce, "nonce")?;
        check_present(&request.signature, "signature")?;

        self.check_freshness(request.timestamp)?;

        let versioned = self
            .ledger
            .record(&request.session_id)
            .map_err(ledger_err)?
            .ok_or_else(|| CoreError::SessionNotFound { session_id: request.session_id.clone() })?;
        let mut record = versioned.record;

        if caller.user_id != record.responder_id {
            return Err(CoreError::Unauthorized { caller: caller.user_id.to_string() });
        }

        // Signature before the expiry and status gates: a bad signature
        // must surface as such and leave the record untouched.
        let key = self
            .directory
            .verification_key(caller.user_id)?
            .ok_or_else(|| CoreError::NoSigningKey { user_id: caller.user_id.to_string() })?;
        let signing_bytes = canonical::response_signing_bytes(
            &request.session_id,
            &request.ephemeral_public,
            &request.nonce,
            request.timestamp,
        );
        if !key.verify(&signing_bytes, &request.signature) {
            return Err(CoreError::InvalidSignature { user_id: caller.user_id.to_string() });
        }

        self.check_expiry(&mut record, versioned.version)?;
        if record.status != SessionStatus::Initiated {
            return Err(CoreError::InvalidStatus { status: record.status, operation: "respond" });
        }

        record.responder_ephemeral_pub = request.ephemeral_public.clone();
        record.responder_nonce = request.nonce.clone();
        record.responder_signature = request.signature.clone();
        record.status = SessionStatus::Responded;

        match self.ledger.update_record(versioned.version, record.clone()) {
            Ok(()) => {}
            Err(LedgerError::Conflict { .. }) => {
                // A concurrent transition won; report the status it left.
                let current = self
                    .ledger
                    .record(&request.session_id)
                    .map_err(ledger_err)?
                    .ok_or_else(|| CoreError::SessionNotFound {
                        session_id: request.session_id.clone(),
                    })?;
                return Err(CoreError::InvalidStatus {
                    status: current.record.status,
                    operation: "respond",
                });
            }
            Err(e) => return Err(ledger_err(e)),
        }

        self.accepted("key_exchange_respond", &record.session_id, caller);
        Ok(RespondResponse {
            session_id: record.session_id,
            initiator_public_key: record.initiator_ephemeral_pub,
        })
    }

    /// Handle `POST /keys/exchange/confirm`.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `Unauthorized`, `InvalidStatus` (wrong status or
    /// slot already filled), `SessionExpired`.
    pub fn confirm(
        &self,
        caller: Caller<'_>,
        request: &ConfirmRequest,
    ) -> Result<ConfirmResponse, CoreError> {
        let session_id = request.session_id.clone();
        self.confirm_inner(caller, request)
            .map_err(|e| self.rejected("key_exchange_confirm", Some(&session_id), caller, e))
    }

    fn confirm_inner(
        &self,
        caller: Caller<'_>,
        request: &ConfirmRequest,
    ) -> Result<ConfirmResponse, CoreError> {
        if request.session_id.is_empty() {
            return Err(CoreError::MissingField { field: "sessionId" });
        }
        if request.confirmation.is_empty() {
            return Err(CoreError::MissingField { field: "confirmation" });
        }
        if request.confirmation.len() != CONFIRMATION_TAG_SIZE {
            return Err(CoreError::InvalidEncoding { field: "confirmation" });
        }

        let role = if request.is_initiator { Role::Initiator } else { Role::Responder };

        // The peer's confirmation may land concurrently; it fills the other
        // slot, so one retry after a version conflict is enough.
        for attempt in 0..2 {
            let versioned = self
                .ledger
                .record(&request.session_id)
                .map_err(ledger_err)?
                .ok_or_else(|| CoreError::SessionNotFound {
                    session_id: request.session_id.clone(),
                })?;
            let mut record = versioned.record;

            if caller.user_id != record.party(role) {
                return Err(CoreError::Unauthorized { caller: caller.user_id.to_string() });
            }
            self.check_expiry(&mut record, versioned.version)?;
            record.apply_confirmation(role, request.confirmation.clone(), self.env.now_ms())?;

            match self.ledger.update_record(versioned.version, record.clone()) {
                Ok(()) => {
                    self.accepted("key_exchange_confirm", &record.session_id, caller);
                    return Ok(ConfirmResponse { status: record.status.as_str().to_string() });
                }
                Err(LedgerError::Conflict { .. }) if attempt == 0 => continue,
                Err(LedgerError::Conflict { .. }) => {
                    return Err(CoreError::Internal { reason: "confirm contention".to_string() })
                }
                Err(e) => return Err(ledger_err(e)),
            }
        }
        unreachable!("loop returns on every path")
    }

    /// Record a peer-observed confirmation mismatch: the session is marked
    /// `Failed` and the event is audited as MITM evidence.
    ///
    /// This is the one transition a completed record may still take; only
    /// the endpoints hold the shared secret, so only they can detect a
    /// forged tag.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `Unauthorized`, `InvalidStatus` for records that
    /// are already dead.
    pub fn report_mismatch(&self, caller: Caller<'_>, session_id: &str) -> Result<(), CoreError> {
        self.report_mismatch_inner(caller, session_id)
            .map_err(|e| self.rejected("confirmation_mismatch", Some(session_id), caller, e))
    }

    fn report_mismatch_inner(
        &self,
        caller: Caller<'_>,
        session_id: &str,
    ) -> Result<(), CoreError> {
        if session_id.is_empty() {
            return Err(CoreError::MissingField { field: "sessionId" });
        }

        for attempt in 0..2 {
            let versioned = self
                .ledger
                .record(session_id)
                .map_err(ledger_err)?
                .ok_or_else(|| CoreError::SessionNotFound { session_id: session_id.to_string() })?;
            let mut record = versioned.record;

            if record.role_of(caller.user_id).is_none() {
                return Err(CoreError::Unauthorized { caller: caller.user_id.to_string() });
            }
            if matches!(record.status, SessionStatus::Failed | SessionStatus::Expired) {
                return Err(CoreError::InvalidStatus {
                    status: record.status,
                    operation: "report_mismatch",
                });
            }

            record.status = SessionStatus::Failed;
            match self.ledger.update_record(versioned.version, record) {
                Ok(()) => {
                    self.audit.record(AuditEntry {
                        event_type: "confirmation_mismatch".to_string(),
                        session_id: Some(session_id.to_string()),
                        user_id: Some(caller.user_id.to_string()),
                        details: cloak_proto::ErrorCode::ConfirmationMismatch.to_string(),
                        ip: caller.ip.to_string(),
                        timestamp: self.env.now_ms(),
                    });
                    tracing::warn!(
                        session_id = %session_id,
                        reporter = %caller.user_id,
                        "confirmation mismatch reported, session failed"
                    );
                    return Ok(());
                }
                Err(LedgerError::Conflict { .. }) if attempt == 0 => continue,
                Err(LedgerError::Conflict { .. }) => {
                    return Err(CoreError::Internal { reason: "mismatch contention".to_string() })
                }
                Err(e) => return Err(ledger_err(e)),
            }
        }
        unreachable!("loop returns on every path")
    }

    /// Handle `POST /messages`.
    ///
    /// The sender-direction counter must advance by exactly one; the
    /// counter update and the message row persist atomically.
    ///
    /// # Errors
    ///
    /// `MissingFields`, `InvalidEncoding`, `MessageTooLarge`,
    /// `TimestampExpired`, `SessionNotFound`, `Unauthorized`,
    /// `InvalidStatus`, `ReplayDetected`.
    pub fn submit_message(
        &self,
        caller: Caller<'_>,
        request: &MessageSubmission,
    ) -> Result<MessageAccepted, CoreError> {
        let session_id = request.session_id.clone();
        self.submit_message_inner(caller, request)
            .map_err(|e| self.rejected("message_submit", Some(&session_id), caller, e))
    }

    fn submit_message_inner(
        &self,
        caller: Caller<'_>,
        request: &MessageSubmission,
    ) -> Result<MessageAccepted, CoreError> {
        if request.to.is_empty() {
            return Err(CoreError::MissingField { field: "to" });
        }
        if request.session_id.is_empty() {
            return Err(CoreError::MissingField { field: "sessionId" });
        }
        check_present(&request.ciphertext, "ciphertext")?;
        if request.iv.is_empty() {
            return Err(CoreError::MissingField { field: "iv" });
        }
        if request.iv.len() != IV_SIZE {
            return Err(CoreError::InvalidEncoding { field: "iv" });
        }
        check_nonce(&request.nonce, "nonce")?;

        let sealed_size = request.ciphertext.len() + request.iv.len();
        if sealed_size > self.config.max_sealed_size {
            return Err(CoreError::MessageTooLarge {
                size: sealed_size,
                max: self.config.max_sealed_size,
            });
        }

        self.check_freshness(request.timestamp)?;

        // Concurrent sends from the peer direction bump the version without
        // touching this direction's counter; retry once on conflict.
        for attempt in 0..2 {
            let versioned = self
                .ledger
                .record(&request.session_id)
                .map_err(ledger_err)?
                .ok_or_else(|| CoreError::SessionNotFound {
                    session_id: request.session_id.clone(),
                })?;
            let mut record = versioned.record;

            let role = record
                .role_of(caller.user_id)
                .ok_or_else(|| CoreError::Unauthorized { caller: caller.user_id.to_string() })?;
            if request.to != record.party(role.peer()) {
                return Err(CoreError::Unauthorized { caller: caller.user_id.to_string() });
            }
            if record.status != SessionStatus::Completed {
                return Err(CoreError::InvalidStatus {
                    status: record.status,
                    operation: "message",
                });
            }

            record.accept_sequence(role, request.sequence_number)?;

            let now = self.env.now_ms();
            let message = StoredMessage {
                message_id: self.mint_message_id(),
                from: caller.user_id.to_string(),
                to: request.to.clone(),
                session_id: request.session_id.clone(),
                ciphertext: request.ciphertext.clone(),
                iv: request.iv.clone(),
                message_type: request.message_type,
                sequence_number: request.sequence_number,
                server_timestamp: now,
                file_metadata: request.file_metadata.clone(),
            };
            let message_id = message.message_id.clone();

            match self.ledger.append_message(versioned.version, record, message) {
                Ok(()) => {
                    self.accepted("message_submit", &request.session_id, caller);
                    return Ok(MessageAccepted { message_id, timestamp: now });
                }
                Err(LedgerError::Conflict { .. }) if attempt == 0 => continue,
                Err(LedgerError::Conflict { .. }) => {
                    return Err(CoreError::Internal { reason: "message contention".to_string() })
                }
                Err(e) => return Err(ledger_err(e)),
            }
        }
        unreachable!("loop returns on every path")
    }

    /// Handle `GET /keys/exchange/session/{id}`. Counters stay private.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `Unauthorized` for non-parties.
    pub fn session_view(
        &self,
        caller: Caller<'_>,
        session_id: &str,
    ) -> Result<SessionView, CoreError> {
        self.fetch_for_party(caller, session_id)
            .map(|record| record.to_view())
            .map_err(|e| self.rejected("session_read", Some(session_id), caller, e))
    }

    /// Handle `GET /keys/exchange/status/{id}`.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, `Unauthorized` for non-parties.
    pub fn status_view(
        &self,
        caller: Caller<'_>,
        session_id: &str,
    ) -> Result<StatusView, CoreError> {
        self.fetch_for_party(caller, session_id)
            .map(|record| record.to_status_view())
            .map_err(|e| self.rejected("status_read", Some(session_id), caller, e))
    }

    /// Handle `GET /keys/exchange/pending`: live `Initiated` records
    /// addressed to the caller.
    ///
    /// # Errors
    ///
    /// `Internal` on ledger failure.
    pub fn pending_for(&self, caller: Caller<'_>) -> Result<Vec<PendingSession>, CoreError> {
        let now = self.env.now_ms();
        let pending = self.ledger.pending_for(caller.user_id, now).map_err(ledger_err)?;
        Ok(pending.into_iter().map(|v| v.record.to_pending()).collect())
    }

    /// Handle `GET /messages/conversation/{userId}`: the caller's stored
    /// ciphertext with `peer_id`, chronological.
    ///
    /// # Errors
    ///
    /// `Internal` on ledger failure.
    pub fn conversation(
        &self,
        caller: Caller<'_>,
        peer_id: &str,
    ) -> Result<Vec<StoredMessage>, CoreError> {
        self.ledger.conversation(caller.user_id, peer_id).map_err(ledger_err)
    }

    /// Garbage-collect records stuck below `Completed` past their deadline.
    /// Returns how many records were transitioned to `Expired`.
    ///
    /// # Errors
    ///
    /// `Internal` on ledger failure.
    pub fn expire_stale(&self) -> Result<usize, CoreError> {
        let now = self.env.now_ms();
        let stale = self.ledger.stale_records(now).map_err(ledger_err)?;

        let mut expired = 0;
        for versioned in stale {
            let mut record = versioned.record;
            let session_id = record.session_id.clone();
            record.status = SessionStatus::Expired;

            // A conflict means another writer got there first; skip it.
            if self.ledger.update_record(versioned.version, record).is_ok() {
                expired += 1;
                self.audit.record(AuditEntry {
                    event_type: "session_expired".to_string(),
                    session_id: Some(session_id),
                    user_id: None,
                    details: cloak_proto::ErrorCode::SessionExpired.to_string(),
                    ip: String::new(),
                    timestamp: now,
                });
            }
        }
        Ok(expired)
    }

    fn fetch_for_party(
        &self,
        caller: Caller<'_>,
        session_id: &str,
    ) -> Result<HandshakeRecord, CoreError> {
        let versioned = self
            .ledger
            .record(session_id)
            .map_err(ledger_err)?
            .ok_or_else(|| CoreError::SessionNotFound { session_id: session_id.to_string() })?;

        if versioned.record.role_of(caller.user_id).is_none() {
            return Err(CoreError::Unauthorized { caller: caller.user_id.to_string() });
        }
        Ok(versioned.record)
    }

    fn check_freshness(&self, timestamp: u64) -> Result<(), CoreError> {
        let now = self.env.now_ms();
        if now.abs_diff(timestamp) > self.config.freshness_window_ms {
            return Err(CoreError::TimestampExpired { timestamp, now });
        }
        Ok(())
    }

    /// Reject dead-by-deadline records, transitioning them to `Expired`.
    fn check_expiry(&self, record: &mut HandshakeRecord, version: u64) -> Result<(), CoreError> {
        let now = self.env.now_ms();
        if record.status == SessionStatus::Expired {
            return Err(CoreError::SessionExpired { expires_at: record.expires_at, now });
        }
        if record.is_expired(now) {
            record.status = SessionStatus::Expired;
            // Best effort: a conflict means a concurrent writer already
            // transitioned it.
            let _ = self.ledger.update_record(version, record.clone());
            return Err(CoreError::SessionExpired { expires_at: record.expires_at, now });
        }
        Ok(())
    }

    fn mint_message_id(&self) -> String {
        let mut bytes = [0u8; 16];
        self.env.random_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn rejected(
        &self,
        event: &str,
        session_id: Option<&str>,
        caller: Caller<'_>,
        err: CoreError,
    ) -> CoreError {
        tracing::warn!(
            event = %event,
            session_id = session_id.unwrap_or("-"),
            caller = %caller.user_id,
            code = %err.code(),
            "transition rejected"
        );
        self.audit.record(AuditEntry {
            event_type: format!("{event}_rejected"),
            session_id: session_id.map(str::to_string),
            user_id: Some(caller.user_id.to_string()),
            details: err.code().to_string(),
            ip: caller.ip.to_string(),
            timestamp: self.env.now_ms(),
        });
        err
    }

    fn accepted(&self, event: &str, session_id: &str, caller: Caller<'_>) {
        self.audit.record(AuditEntry {
            event_type: event.to_string(),
            session_id: Some(session_id.to_string()),
            user_id: Some(caller.user_id.to_string()),
            details: "ok".to_string(),
            ip: caller.ip.to_string(),
            timestamp: self.env.now_ms(),
        });
    }
}

fn check_present(bytes: &[u8], field: &'static str) -> Result<(), CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::MissingField { field });
    }
    Ok(())
}

fn check_point(bytes: &[u8], field: &'static str) -> Result<(), CoreError> {
    check_present(bytes, field)?;
    if bytes.len() != EPHEMERAL_PUBLIC_SIZE {
        return Err(CoreError::InvalidEncoding { field });
    }
    Ok(())
}

fn check_nonce(bytes: &[u8], field: &'static str) -> Result<(), CoreError> {
    check_present(bytes, field)?;
    if bytes.len() != HANDSHAKE_NONCE_SIZE {
        return Err(CoreError::InvalidEncoding { field });
    }
    Ok(())
}

fn ledger_err(err: LedgerError) -> CoreError {
    match err {
        LedgerError::NotFound { session_id } => CoreError::SessionNotFound { session_id },
        LedgerError::AlreadyExists { session_id } => {
            CoreError::Internal { reason: format!("duplicate record {session_id}") }
        }
        LedgerError::Conflict { .. } => {
            CoreError::Internal { reason: "record contention".to_string() }
        }
        LedgerError::Backend { reason } => CoreError::Internal { reason },
    }
}
