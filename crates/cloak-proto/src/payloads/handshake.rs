//! Handshake endpoint payloads.
//!
//! Three messages drive the key agreement: Init, Respond, Confirm. The
//! signature fields cover the canonical payloads from [`crate::canonical`],
//! not these wire bodies.
//!
//! # Security
//!
//! - **Debug Redaction**: bodies carry no secret material (only public
//!   points, nonces, signatures and MAC tags), so derived `Debug` is safe.

use serde::{Deserialize, Serialize};

use crate::b64;

/// `POST /keys/exchange/initiate` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    /// Identity the initiator wants to talk to.
    pub responder_id: String,
    /// Initiator's ephemeral P-256 point, 65-byte uncompressed SEC1.
    #[serde(with = "b64")]
    pub ephemeral_public: Vec<u8>,
    /// Initiator's 32-byte handshake nonce.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Client clock at signing time, epoch milliseconds.
    pub timestamp: u64,
    /// RSA-PSS signature over the canonical init payload.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// `POST /keys/exchange/initiate` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    /// The minted session id: `<initiator>|<responder>|<created_ms>`.
    pub session_id: String,
}

/// `POST /keys/exchange/respond` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    /// Session being answered.
    pub session_id: String,
    /// Responder's ephemeral P-256 point, 65-byte uncompressed SEC1.
    #[serde(with = "b64")]
    pub ephemeral_public: Vec<u8>,
    /// Responder's 32-byte handshake nonce.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Client clock at signing time, epoch milliseconds.
    pub timestamp: u64,
    /// RSA-PSS signature over the canonical response payload.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// `POST /keys/exchange/respond` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondResponse {
    /// Session id, echoed.
    pub session_id: String,
    /// The initiator's ephemeral public point from the record.
    #[serde(with = "b64")]
    pub initiator_public_key: Vec<u8>,
}

/// `POST /keys/exchange/confirm` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    /// Session being confirmed.
    pub session_id: String,
    /// HMAC-SHA-256 confirmation tag for the caller's role.
    #[serde(with = "b64")]
    pub confirmation: Vec<u8>,
    /// Which confirmation slot the caller is filling.
    pub is_initiator: bool,
}

/// `POST /keys/exchange/confirm` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    /// Record status after the confirmation was stored.
    pub status: String,
}

/// `GET /keys/exchange/session/{id}` body: the record minus counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Session id.
    pub session_id: String,
    /// Initiating identity.
    pub initiator_id: String,
    /// Responding identity.
    pub responder_id: String,
    /// Initiator's ephemeral public point.
    #[serde(with = "b64")]
    pub initiator_ephemeral_pub: Vec<u8>,
    /// Responder's ephemeral public point; empty until responded.
    #[serde(with = "b64")]
    pub responder_ephemeral_pub: Vec<u8>,
    /// Initiator's handshake nonce.
    #[serde(with = "b64")]
    pub initiator_nonce: Vec<u8>,
    /// Responder's handshake nonce; empty until responded.
    #[serde(with = "b64")]
    pub responder_nonce: Vec<u8>,
    /// Initiator's confirmation tag, if submitted.
    #[serde(with = "b64::opt", default, skip_serializing_if = "Option::is_none")]
    pub initiator_confirmation: Option<Vec<u8>>,
    /// Responder's confirmation tag, if submitted.
    #[serde(with = "b64::opt", default, skip_serializing_if = "Option::is_none")]
    pub responder_confirmation: Option<Vec<u8>>,
    /// Record status name.
    pub status: String,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
    /// Expiry deadline, epoch milliseconds.
    pub expires_at: u64,
    /// Completion time, if completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

/// `GET /keys/exchange/status/{id}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    /// Session id.
    pub session_id: String,
    /// Record status name.
    pub status: String,
    /// Whether the initiator's confirmation slot is filled.
    pub initiator_confirmed: bool,
    /// Whether the responder's confirmation slot is filled.
    pub responder_confirmed: bool,
    /// Expiry deadline, epoch milliseconds.
    pub expires_at: u64,
}

/// One entry of `GET /keys/exchange/pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSession {
    /// Session id awaiting this caller's response.
    pub session_id: String,
    /// Who initiated it.
    pub initiator_id: String,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
    /// Expiry deadline, epoch milliseconds.
    pub expires_at: u64,
}
