//! Canonical JSON encoding for signed payloads.
//!
//! Every byte string fed into a signature or HMAC uses one canonical form:
//! object keys sorted lexicographically, no insignificant whitespace, UTF-8.
//! Both signer and verifier build the bytes through this module, so the
//! encodings match byte for byte.

use serde::Serialize;

use crate::b64;

/// Type tag inside the initiator's signed payload.
pub const INIT_PAYLOAD_TYPE: &str = "key_exchange_init";

/// Type tag inside the responder's signed payload.
pub const RESPONSE_PAYLOAD_TYPE: &str = "key_exchange_response";

/// Serialize any value to canonical JSON bytes.
///
/// Routing through `serde_json::Value` sorts object keys (its map is a
/// BTreeMap) at every nesting level; compact serialization drops all
/// insignificant whitespace.
///
/// # Errors
///
/// Returns the underlying error if the value cannot be represented as JSON.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitSigningPayload<'a> {
    ephemeral_public: String,
    nonce: String,
    responder_id: &'a str,
    timestamp: u64,
    #[serde(rename = "type")]
    payload_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseSigningPayload<'a> {
    ephemeral_public: String,
    nonce: String,
    session_id: &'a str,
    timestamp: u64,
    #[serde(rename = "type")]
    payload_type: &'a str,
}

/// Bytes the initiator signs. Binds the intended responder, so the message
/// cannot be spliced into a session with a different counterparty.
pub fn init_signing_bytes(
    responder_id: &str,
    ephemeral_public: &[u8],
    nonce: &[u8],
    timestamp: u64,
) -> Vec<u8> {
    let payload = InitSigningPayload {
        ephemeral_public: b64::encode(ephemeral_public),
        nonce: b64::encode(nonce),
        responder_id,
        timestamp,
        payload_type: INIT_PAYLOAD_TYPE,
    };
    to_canonical_json(&payload).expect("strings and integers always serialize")
}

/// Bytes the responder signs. Binds the minted session id.
pub fn response_signing_bytes(
    session_id: &str,
    ephemeral_public: &[u8],
    nonce: &[u8],
    timestamp: u64,
) -> Vec<u8> {
    let payload = ResponseSigningPayload {
        ephemeral_public: b64::encode(ephemeral_public),
        nonce: b64::encode(nonce),
        session_id,
        timestamp,
        payload_type: RESPONSE_PAYLOAD_TYPE,
    };
    to_canonical_json(&payload).expect("strings and integers always serialize")
}
