//! Client error types.

use cloak_core::{CoreError, TransportError};
use cloak_proto::ErrorCode;
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A core protocol operation failed locally.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The relay rejected a request.
    #[error("relay rejected: {0}")]
    Relay(#[from] TransportError),

    /// The handshake did not complete within the poll deadline.
    #[error("handshake timed out after {elapsed_ms} ms")]
    Timeout {
        /// How long the client waited.
        elapsed_ms: u64,
    },

    /// No session key stored for the session; the handshake must be re-run.
    #[error("no session key stored for `{session_id}`")]
    NoStoredKey {
        /// The keyless session.
        session_id: String,
    },

    /// The local key store failed.
    #[error("key store failure: {reason}")]
    KeyStore {
        /// Human-readable cause.
        reason: String,
    },
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable for the session).
    ///
    /// Fatal errors mean the session or its key material is unusable: the
    /// user should be warned and the handshake re-run. Transient errors can
    /// be recovered by retrying, often after correcting local state.
    pub fn is_fatal(&self) -> bool {
        match self {
            // The MITM signal and anything that poisons the session.
            Self::Core(err) => matches!(
                err.code(),
                ErrorCode::ConfirmationMismatch
                    | ErrorCode::InvalidSignature
                    | ErrorCode::SessionExpired
                    | ErrorCode::InvalidStatus
                    | ErrorCode::DerivationFailed
            ),
            Self::Relay(err) => matches!(
                err.code,
                ErrorCode::ConfirmationMismatch
                    | ErrorCode::InvalidSignature
                    | ErrorCode::NoSigningKey
                    | ErrorCode::SessionExpired
                    | ErrorCode::SessionNotFound
                    | ErrorCode::InvalidStatus
                    | ErrorCode::Unauthorized
                    | ErrorCode::UserNotFound
            ),
            Self::NoStoredKey { .. } => true,

            // Transient: retry with corrected state (sequence, clock) or
            // simply again later.
            Self::Timeout { .. } | Self::KeyStore { .. } => false,
        }
    }

    /// The stable wire code behind this error, when one applies.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Core(err) => Some(err.code()),
            Self::Relay(err) => Some(err.code),
            Self::Timeout { .. } | Self::NoStoredKey { .. } | Self::KeyStore { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_is_fatal() {
        let err = ClientError::Core(CoreError::ConfirmationMismatch {
            session_id: "u1|u2|1".into(),
        });
        assert!(err.is_fatal());
        assert_eq!(err.code(), Some(ErrorCode::ConfirmationMismatch));
    }

    #[test]
    fn replay_is_transient() {
        let err = ClientError::Relay(TransportError::new(ErrorCode::ReplayDetected, "seq 3"));
        assert!(!err.is_fatal(), "client retries with the corrected sequence");
    }

    #[test]
    fn timeout_is_transient() {
        assert!(!ClientError::Timeout { elapsed_ms: 120_000 }.is_fatal());
    }

    #[test]
    fn lost_key_is_fatal() {
        assert!(ClientError::NoStoredKey { session_id: "s".into() }.is_fatal());
    }
}
