//! Cloak Wire Protocol
//!
//! Payload types for the handshake and messaging endpoints, the canonical
//! JSON encoding used for every signed or MAC'd byte string, and the stable
//! error codes surfaced to clients.
//!
//! # Wire conventions
//!
//! - JSON bodies with camelCase field names
//! - Byte fields are base64 (standard alphabet, padding required)
//! - Timestamps are integer milliseconds since the Unix epoch
//! - Signed payloads use canonical JSON: sorted keys, no insignificant
//!   whitespace, UTF-8

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod b64;
pub mod canonical;
pub mod error_code;
pub mod payloads;

pub use canonical::{
    init_signing_bytes, response_signing_bytes, to_canonical_json, INIT_PAYLOAD_TYPE,
    RESPONSE_PAYLOAD_TYPE,
};
pub use error_code::ErrorCode;
pub use payloads::handshake::{
    ConfirmRequest, ConfirmResponse, InitiateRequest, InitiateResponse, PendingSession,
    RespondRequest, RespondResponse, SessionView, StatusView,
};
pub use payloads::message::{
    FileMetadata, MessageAccepted, MessageSubmission, MessageType, StoredMessage, WrappedFileKey,
};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Maximum accepted size of `ciphertext + iv` for one message, in bytes.
pub const MAX_SEALED_SIZE: usize = 256 * 1024;

/// Errors from decoding wire bodies.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The body was not valid JSON or was missing required fields.
    #[error("malformed body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A byte field was not valid base64.
    #[error("invalid base64 in field `{field}`")]
    InvalidBase64 {
        /// Name of the offending field.
        field: &'static str,
    },
}

impl ProtoError {
    /// The stable error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MissingFields,
            Self::InvalidBase64 { .. } => ErrorCode::InvalidEncoding,
        }
    }
}

/// Decode a JSON wire body into a typed request.
///
/// # Errors
///
/// Returns `Malformed` for anything that is not a complete, well-typed body.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    Ok(serde_json::from_slice(bytes)?)
}
