//! Handshake records and the session status machine.
//!
//! A record tracks one key agreement from initiation to completion. The
//! relay validator is the only writer; every transition is gated by
//! [`SessionStatus::can_transition_to`].
//!
//! # Invariants
//!
//! - Initiator and responder are distinct identities
//! - `Initiated` carries only initiator fields; `Responded` carries both
//!   ephemeral points and nonces; `Confirmed` has exactly one confirmation
//!   set; `Completed` has both
//! - Sequence counters only ever increase, per direction
//! - `expires_at` is immutable once `Completed`
//! - `Failed` and `Expired` are terminal

use serde::{Deserialize, Serialize};

use cloak_proto::{PendingSession, SessionView, StatusView};

use crate::error::CoreError;

/// Opaque stable identity id.
pub type UserId = String;

/// Handshake session id, `<initiator>|<responder>|<created_ms>`.
pub type SessionId = String;

/// Handshake record lifetime before completion, in milliseconds.
pub const HANDSHAKE_TTL_MS: u64 = 5 * 60 * 1000;

/// Which side of the handshake a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The party that created the session.
    Initiator,
    /// The party the session is addressed to.
    Responder,
}

impl Role {
    /// The label bound into confirmation tags.
    pub fn label(self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Responder => "responder",
        }
    }

    /// The other side.
    pub fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

/// Lifecycle status of a handshake record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Initiator fields stored; waiting for the responder.
    Initiated,
    /// Both ephemeral halves present; waiting for confirmations.
    Responded,
    /// Exactly one confirmation stored.
    Confirmed,
    /// Both confirmations stored; the session key is live.
    Completed,
    /// A gating failure or confirmation mismatch ended the handshake.
    Failed,
    /// The record aged out before completing.
    Expired,
}

impl SessionStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "Initiated",
            Self::Responded => "Responded",
            Self::Confirmed => "Confirmed",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Expired => "Expired",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Initiated" => Some(Self::Initiated),
            "Responded" => Some(Self::Responded),
            "Confirmed" => Some(Self::Confirmed),
            "Completed" => Some(Self::Completed),
            "Failed" => Some(Self::Failed),
            "Expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// True for statuses that admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Whether the status machine admits `next` from `self`.
    ///
    /// `Failed` is reachable from any live status; `Expired` only from
    /// statuses below `Completed`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Initiated, Self::Responded) => true,
            (Self::Responded, Self::Confirmed) => true,
            (Self::Confirmed, Self::Completed) => true,
            (Self::Initiated | Self::Responded | Self::Confirmed, Self::Failed | Self::Expired) => {
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state of one key agreement, keyed by session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRecord {
    /// `<initiator>|<responder>|<created_ms>`.
    pub session_id: SessionId,
    /// Initiating identity.
    pub initiator_id: UserId,
    /// Responding identity.
    pub responder_id: UserId,
    /// Initiator's ephemeral P-256 point (65-byte SEC1).
    pub initiator_ephemeral_pub: Vec<u8>,
    /// Responder's ephemeral point; empty until responded.
    pub responder_ephemeral_pub: Vec<u8>,
    /// Initiator's 32-byte nonce.
    pub initiator_nonce: Vec<u8>,
    /// Responder's 32-byte nonce; empty until responded.
    pub responder_nonce: Vec<u8>,
    /// Initiator's RSA-PSS signature over the canonical init payload.
    pub initiator_signature: Vec<u8>,
    /// Responder's signature; empty until responded.
    pub responder_signature: Vec<u8>,
    /// Initiator's confirmation tag, once submitted.
    pub initiator_confirmation: Option<Vec<u8>>,
    /// Responder's confirmation tag, once submitted.
    pub responder_confirmation: Option<Vec<u8>>,
    /// Last accepted sequence number sent by the initiator.
    pub initiator_last_sequence: u64,
    /// Last accepted sequence number sent by the responder.
    pub responder_last_sequence: u64,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
    /// Expiry deadline; immutable once `Completed`.
    pub expires_at: u64,
    /// Completion time, once completed.
    pub completed_at: Option<u64>,
}

impl HandshakeRecord {
    /// Mint the session id for a new record.
    pub fn mint_session_id(initiator_id: &str, responder_id: &str, created_ms: u64) -> SessionId {
        format!("{initiator_id}|{responder_id}|{created_ms}")
    }

    /// Build a fresh record in `Initiated`.
    pub fn new_initiated(
        initiator_id: UserId,
        responder_id: UserId,
        ephemeral_pub: Vec<u8>,
        nonce: Vec<u8>,
        signature: Vec<u8>,
        created_ms: u64,
    ) -> Self {
        let session_id = Self::mint_session_id(&initiator_id, &responder_id, created_ms);
        Self {
            session_id,
            initiator_id,
            responder_id,
            initiator_ephemeral_pub: ephemeral_pub,
            responder_ephemeral_pub: Vec::new(),
            initiator_nonce: nonce,
            responder_nonce: Vec::new(),
            initiator_signature: signature,
            responder_signature: Vec::new(),
            initiator_confirmation: None,
            responder_confirmation: None,
            initiator_last_sequence: 0,
            responder_last_sequence: 0,
            status: SessionStatus::Initiated,
            created_at: created_ms,
            expires_at: created_ms + HANDSHAKE_TTL_MS,
            completed_at: None,
        }
    }

    /// The role `user_id` plays in this record, if any.
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if user_id == self.initiator_id {
            Some(Role::Initiator)
        } else if user_id == self.responder_id {
            Some(Role::Responder)
        } else {
            None
        }
    }

    /// The identity on the given side.
    pub fn party(&self, role: Role) -> &str {
        match role {
            Role::Initiator => &self.initiator_id,
            Role::Responder => &self.responder_id,
        }
    }

    /// True once the record is past its deadline without completing.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.status != SessionStatus::Completed
            && !self.status.is_terminal()
            && now_ms > self.expires_at
    }

    /// The confirmation slot for a role.
    pub fn confirmation(&self, role: Role) -> Option<&[u8]> {
        match role {
            Role::Initiator => self.initiator_confirmation.as_deref(),
            Role::Responder => self.responder_confirmation.as_deref(),
        }
    }

    /// Store a confirmation tag and advance the status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` if the slot is already filled or the status
    /// does not admit confirmations.
    pub fn apply_confirmation(
        &mut self,
        role: Role,
        tag: Vec<u8>,
        now_ms: u64,
    ) -> Result<(), CoreError> {
        if !matches!(self.status, SessionStatus::Responded | SessionStatus::Confirmed) {
            return Err(CoreError::InvalidStatus { status: self.status, operation: "confirm" });
        }
        if self.confirmation(role).is_some() {
            return Err(CoreError::InvalidStatus { status: self.status, operation: "confirm" });
        }

        match role {
            Role::Initiator => self.initiator_confirmation = Some(tag),
            Role::Responder => self.responder_confirmation = Some(tag),
        }

        self.status = if self.initiator_confirmation.is_some()
            && self.responder_confirmation.is_some()
        {
            self.completed_at = Some(now_ms);
            SessionStatus::Completed
        } else {
            SessionStatus::Confirmed
        };
        Ok(())
    }

    /// Last accepted sequence for the sender on the given side.
    pub fn last_sequence(&self, role: Role) -> u64 {
        match role {
            Role::Initiator => self.initiator_last_sequence,
            Role::Responder => self.responder_last_sequence,
        }
    }

    /// Accept the next sequence number for a direction.
    ///
    /// # Errors
    ///
    /// Returns `ReplayDetected` unless `sequence` is exactly the last
    /// accepted value plus one. Counters never move on failure.
    pub fn accept_sequence(&mut self, role: Role, sequence: u64) -> Result<(), CoreError> {
        let counter = match role {
            Role::Initiator => &mut self.initiator_last_sequence,
            Role::Responder => &mut self.responder_last_sequence,
        };
        let expected = *counter + 1;
        if sequence != expected {
            return Err(CoreError::ReplayDetected { expected, got: sequence });
        }
        *counter = sequence;
        Ok(())
    }

    /// Wire view of the record, excluding the sequence counters.
    pub fn to_view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id.clone(),
            initiator_id: self.initiator_id.clone(),
            responder_id: self.responder_id.clone(),
            initiator_ephemeral_pub: self.initiator_ephemeral_pub.clone(),
            responder_ephemeral_pub: self.responder_ephemeral_pub.clone(),
            initiator_nonce: self.initiator_nonce.clone(),
            responder_nonce: self.responder_nonce.clone(),
            initiator_confirmation: self.initiator_confirmation.clone(),
            responder_confirmation: self.responder_confirmation.clone(),
            status: self.status.as_str().to_string(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            completed_at: self.completed_at,
        }
    }

    /// Compact status view.
    pub fn to_status_view(&self) -> StatusView {
        StatusView {
            session_id: self.session_id.clone(),
            status: self.status.as_str().to_string(),
            initiator_confirmed: self.initiator_confirmation.is_some(),
            responder_confirmed: self.responder_confirmation.is_some(),
            expires_at: self.expires_at,
        }
    }

    /// Pending-list entry addressed to the responder.
    pub fn to_pending(&self) -> PendingSession {
        PendingSession {
            session_id: self.session_id.clone(),
            initiator_id: self.initiator_id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}
