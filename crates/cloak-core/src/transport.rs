//! Transport collaborator.
//!
//! Authenticated delivery of JSON bodies to the relay. The transport binds
//! a caller identity (the bearer-token layer lives outside the core); the
//! harness implements it by invoking the validator in-process.

use cloak_proto::{
    ConfirmRequest, ConfirmResponse, ErrorCode, InitiateRequest, InitiateResponse, MessageAccepted,
    MessageSubmission, PendingSession, RespondRequest, RespondResponse, SessionView, StatusView,
    StoredMessage,
};
use thiserror::Error;

/// A failure surfaced by the relay or the transport layer itself.
///
/// Carries the stable code so clients can branch without string matching;
/// rate-limit style failures arrive as `Internal` and stay distinguishable
/// from cryptographic rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransportError {
    /// Stable wire code.
    pub code: ErrorCode,
    /// Human-readable detail for logs.
    pub message: String,
}

impl TransportError {
    /// Build an error from a code and detail message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Authenticated calls against the relay endpoints.
///
/// Every method suspends on network I/O; none touch key material.
pub trait Transport: Send + Sync {
    /// `POST /keys/exchange/initiate`.
    fn initiate(
        &self,
        request: &InitiateRequest,
    ) -> impl std::future::Future<Output = Result<InitiateResponse, TransportError>> + Send;

    /// `POST /keys/exchange/respond`.
    fn respond(
        &self,
        request: &RespondRequest,
    ) -> impl std::future::Future<Output = Result<RespondResponse, TransportError>> + Send;

    /// `POST /keys/exchange/confirm`.
    fn confirm(
        &self,
        request: &ConfirmRequest,
    ) -> impl std::future::Future<Output = Result<ConfirmResponse, TransportError>> + Send;

    /// `GET /keys/exchange/session/{id}`.
    fn session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<SessionView, TransportError>> + Send;

    /// `GET /keys/exchange/status/{id}`.
    fn status(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<StatusView, TransportError>> + Send;

    /// `GET /keys/exchange/pending`.
    fn pending(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PendingSession>, TransportError>> + Send;

    /// Report a confirmation mismatch; moves the record to `Failed`.
    fn report_mismatch(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// `POST /messages`.
    fn submit_message(
        &self,
        message: &MessageSubmission,
    ) -> impl std::future::Future<Output = Result<MessageAccepted, TransportError>> + Send;

    /// `GET /messages/conversation/{userId}`.
    fn conversation(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<StoredMessage>, TransportError>> + Send;
}
