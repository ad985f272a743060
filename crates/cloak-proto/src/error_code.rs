//! Stable error codes surfaced to clients and written to audit.
//!
//! Codes are part of the wire contract: clients branch on them (a replay is
//! retried with a corrected sequence, a confirmation mismatch tears the
//! session down), so they must stay distinguishable from transport-level
//! failures such as rate limiting.

use serde::{Deserialize, Serialize};

/// Every failure class a validator or client can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A required field is absent or empty.
    MissingFields,
    /// A field failed base64 or length validation.
    InvalidEncoding,
    /// Sealed payload exceeds the 256 KiB bound.
    MessageTooLarge,
    /// Request timestamp outside the freshness window.
    TimestampExpired,
    /// Sequence number was not exactly the previous plus one.
    ReplayDetected,
    /// The handshake record passed its expiry before completing.
    SessionExpired,
    /// The caller has no registered verification key.
    NoSigningKey,
    /// Signature verification failed.
    InvalidSignature,
    /// The caller is not the expected party for this transition.
    Unauthorized,
    /// The referenced user id is not registered.
    UserNotFound,
    /// No handshake record under the given session id.
    SessionNotFound,
    /// The record's status does not admit the attempted transition.
    InvalidStatus,
    /// A peer-computed confirmation tag did not match; treated as MITM
    /// evidence.
    ConfirmationMismatch,
    /// AEAD encryption failed.
    SealFailed,
    /// AEAD tag verification failed on a received message.
    AuthFailed,
    /// Session key derivation failed.
    DerivationFailed,
    /// Storage or transport failure, details withheld from the wire.
    Internal,
}

impl ErrorCode {
    /// The stable wire string for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingFields => "MISSING_FIELDS",
            Self::InvalidEncoding => "INVALID_ENCODING",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::TimestampExpired => "TIMESTAMP_EXPIRED",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::NoSigningKey => "NO_SIGNING_KEY",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::ConfirmationMismatch => "CONFIRMATION_MISMATCH",
            Self::SealFailed => "SEAL_FAILED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::DerivationFailed => "DERIVATION_FAILED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_matches_wire_strings() {
        let json = serde_json::to_string(&ErrorCode::ReplayDetected).unwrap();
        assert_eq!(json, r#""REPLAY_DETECTED""#);

        let back: ErrorCode = serde_json::from_str(r#""TIMESTAMP_EXPIRED""#).unwrap();
        assert_eq!(back, ErrorCode::TimestampExpired);
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(ErrorCode::ConfirmationMismatch.to_string(), "CONFIRMATION_MISMATCH");
    }
}
