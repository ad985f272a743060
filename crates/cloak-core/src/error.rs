//! Core error taxonomy.
//!
//! Every variant maps to exactly one stable wire code so clients and the
//! audit log speak the same vocabulary.

use cloak_crypto::CryptoError;
use cloak_proto::ErrorCode;
use thiserror::Error;

use crate::record::SessionStatus;

/// Errors from core protocol operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A required field is absent or empty.
    #[error("missing or empty field `{field}`")]
    MissingField {
        /// Wire name of the field.
        field: &'static str,
    },

    /// A field failed length or base64 validation.
    #[error("invalid encoding in field `{field}`")]
    InvalidEncoding {
        /// Wire name of the field.
        field: &'static str,
    },

    /// Sealed payload exceeds the size bound.
    #[error("sealed payload too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Offending `ciphertext + iv` size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Request timestamp fell outside the freshness window.
    #[error("timestamp {timestamp} outside freshness window (now {now})")]
    TimestampExpired {
        /// Claimed timestamp, epoch milliseconds.
        timestamp: u64,
        /// Validator clock, epoch milliseconds.
        now: u64,
    },

    /// Sequence number was not exactly the previous accepted plus one.
    #[error("replay detected: expected sequence {expected}, got {got}")]
    ReplayDetected {
        /// The only acceptable sequence number.
        expected: u64,
        /// What the message carried.
        got: u64,
    },

    /// The record passed its expiry before completing.
    #[error("session expired at {expires_at} (now {now})")]
    SessionExpired {
        /// Record deadline, epoch milliseconds.
        expires_at: u64,
        /// Validator clock, epoch milliseconds.
        now: u64,
    },

    /// The caller has no registered verification key.
    #[error("no signing key registered for `{user_id}`")]
    NoSigningKey {
        /// The keyless identity.
        user_id: String,
    },

    /// Signature verification failed; the record is untouched.
    #[error("invalid signature from `{user_id}`")]
    InvalidSignature {
        /// The claimed signer.
        user_id: String,
    },

    /// The caller is not the expected party for the attempted transition.
    #[error("caller `{caller}` not authorized for this transition")]
    Unauthorized {
        /// Who made the call.
        caller: String,
    },

    /// The referenced identity is not registered.
    #[error("user not found: `{user_id}`")]
    UserNotFound {
        /// The unknown identity.
        user_id: String,
    },

    /// No handshake record under the given id.
    #[error("session not found: `{session_id}`")]
    SessionNotFound {
        /// The unknown session.
        session_id: String,
    },

    /// The record status does not admit the attempted operation.
    #[error("invalid status {status} for {operation}")]
    InvalidStatus {
        /// Status found on the record.
        status: SessionStatus,
        /// The attempted operation.
        operation: &'static str,
    },

    /// A peer-computed confirmation tag did not match; MITM evidence.
    #[error("confirmation mismatch for session `{session_id}`")]
    ConfirmationMismatch {
        /// The poisoned session.
        session_id: String,
    },

    /// A cryptographic primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Storage or transport failure; details stay out of the wire.
    #[error("internal error: {reason}")]
    Internal {
        /// Human-readable cause for logs.
        reason: String,
    },
}

impl CoreError {
    /// The stable wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingField { .. } => ErrorCode::MissingFields,
            Self::InvalidEncoding { .. } => ErrorCode::InvalidEncoding,
            Self::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
            Self::TimestampExpired { .. } => ErrorCode::TimestampExpired,
            Self::ReplayDetected { .. } => ErrorCode::ReplayDetected,
            Self::SessionExpired { .. } => ErrorCode::SessionExpired,
            Self::NoSigningKey { .. } => ErrorCode::NoSigningKey,
            Self::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            Self::Unauthorized { .. } => ErrorCode::Unauthorized,
            Self::UserNotFound { .. } => ErrorCode::UserNotFound,
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::InvalidStatus { .. } => ErrorCode::InvalidStatus,
            Self::ConfirmationMismatch { .. } => ErrorCode::ConfirmationMismatch,
            Self::Crypto(CryptoError::SealFailed) => ErrorCode::SealFailed,
            Self::Crypto(CryptoError::AuthFailed) => ErrorCode::AuthFailed,
            Self::Crypto(CryptoError::DerivationFailed) => ErrorCode::DerivationFailed,
            Self::Crypto(CryptoError::InvalidPoint | CryptoError::InvalidKey) => {
                ErrorCode::InvalidEncoding
            }
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }
}
