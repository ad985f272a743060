//! Client-side handshake engine.
//!
//! A pure state machine: it signs and derives, the caller moves bytes. Each
//! active handshake lives in an in-memory map keyed by session id and is
//! dropped (zeroizing its key material) on completion, mismatch, or
//! abandonment.
//!
//! # Phases
//!
//! ```text
//! prepare_initiate ──▶ AwaitingResponder ──process_response──▶ AwaitingPeerConfirmation
//!                                                                   │
//! accept (responder) ──────────────────────────────────────────────▶│
//!                                                                   │ verify_peer_confirmation
//!                                                                   ▼
//!                                                              Established ──take_established──▶ key handed off
//! ```
//!
//! The session key leaves the engine only through [`HandshakeEngine::take_established`],
//! after the peer's confirmation tag verified. Storing a key before
//! confirmation is impossible by construction.

use std::collections::HashMap;

use subtle::ConstantTimeEq;

use cloak_crypto::{
    confirmation_tag, derive_session_key, EphemeralKeyPair, SessionKey, SigningKeyPair,
    CONFIRMATION_TAG_SIZE, EPHEMERAL_PUBLIC_SIZE, HANDSHAKE_NONCE_SIZE,
};
use cloak_proto::{canonical, ConfirmRequest, InitiateRequest, RespondRequest, SessionView};

use crate::env::{EnvRng, Environment};
use crate::error::CoreError;
use crate::record::{Role, SessionId, SessionStatus, UserId};

/// Initiator-side state kept between submitting Init and seeing the
/// responder's half. Holds the ephemeral secret, so it never leaves memory.
pub struct PendingInitiate {
    ephemeral: EphemeralKeyPair,
    nonce: [u8; HANDSHAKE_NONCE_SIZE],
    responder_id: UserId,
}

impl std::fmt::Debug for PendingInitiate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingInitiate")
            .field("responder_id", &self.responder_id)
            .field("ephemeral", &"<redacted>")
            .finish()
    }
}

/// A completed handshake, ready to back a secure channel.
pub struct EstablishedSession {
    /// The completed session.
    pub session_id: SessionId,
    /// The other party.
    pub peer_id: UserId,
    /// The derived session key. The only surviving key material.
    pub key: SessionKey,
}

enum Phase {
    /// Initiator waiting for the responder's ephemeral half.
    AwaitingResponder { ephemeral: EphemeralKeyPair, nonce: [u8; HANDSHAKE_NONCE_SIZE] },
    /// Key derived; waiting for the peer's confirmation tag on the record.
    AwaitingPeerConfirmation { key: SessionKey, expected_peer_tag: [u8; CONFIRMATION_TAG_SIZE] },
    /// Peer tag verified; key ready to hand off.
    Established { key: SessionKey },
    /// Transitional placeholder while moving key material between phases.
    Poisoned,
}

impl Phase {
    /// The record status this phase corresponds to, for error reporting.
    fn status_equivalent(&self) -> SessionStatus {
        match self {
            Self::AwaitingResponder { .. } => SessionStatus::Initiated,
            Self::AwaitingPeerConfirmation { .. } => SessionStatus::Responded,
            Self::Established { .. } => SessionStatus::Completed,
            Self::Poisoned => SessionStatus::Failed,
        }
    }
}

struct ActiveHandshake {
    role: Role,
    peer_id: UserId,
    phase: Phase,
}

/// The client-side handshake state machine.
///
/// Holds every in-flight handshake for one identity. Sessions re-hydrate
/// from the ledger plus the local key store after a restart; in-flight
/// attempts whose ephemeral secret died with the process must be restarted
/// (the record expires on its own).
pub struct HandshakeEngine<E: Environment> {
    env: E,
    user_id: UserId,
    active: HashMap<SessionId, ActiveHandshake>,
}

impl<E: Environment> HandshakeEngine<E> {
    /// Create an engine for one identity.
    pub fn new(env: E, user_id: UserId) -> Self {
        Self { env, user_id, active: HashMap::new() }
    }

    /// The identity this engine signs for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Number of in-flight handshakes.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether a handshake is being tracked.
    pub fn contains(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// Whether the handshake is still waiting for the responder's half.
    pub fn awaiting_responder(&self, session_id: &str) -> bool {
        matches!(
            self.active.get(session_id),
            Some(ActiveHandshake { phase: Phase::AwaitingResponder { .. }, .. })
        )
    }

    /// Build a signed Init request for `responder_id`.
    ///
    /// Returns the request and the pending state to register once the relay
    /// mints a session id. A fresh session id is minted for every call;
    /// re-initiating never reuses a record.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for a self-handshake attempt.
    pub fn prepare_initiate(
        &self,
        signer: &SigningKeyPair,
        responder_id: &str,
    ) -> Result<(InitiateRequest, PendingInitiate), CoreError> {
        if responder_id == self.user_id {
            return Err(CoreError::Unauthorized { caller: self.user_id.clone() });
        }
        if responder_id.is_empty() {
            return Err(CoreError::MissingField { field: "responderId" });
        }

        let mut rng = EnvRng(&self.env);
        let ephemeral = EphemeralKeyPair::generate(&mut rng);

        let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
        self.env.random_bytes(&mut nonce);

        let timestamp = self.env.now_ms();
        let public = ephemeral.public_bytes();
        let signing_bytes =
            canonical::init_signing_bytes(responder_id, &public, &nonce, timestamp);
        let signature = signer.sign(&mut EnvRng(&self.env), &signing_bytes);

        let request = InitiateRequest {
            responder_id: responder_id.to_string(),
            ephemeral_public: public.to_vec(),
            nonce: nonce.to_vec(),
            timestamp,
            signature,
        };
        let pending =
            PendingInitiate { ephemeral, nonce, responder_id: responder_id.to_string() };

        Ok((request, pending))
    }

    /// Register an accepted Init under the relay-minted session id.
    pub fn register_initiated(&mut self, session_id: SessionId, pending: PendingInitiate) {
        tracing::debug!(session_id = %session_id, "handshake initiated");
        self.active.insert(
            session_id,
            ActiveHandshake {
                role: Role::Initiator,
                peer_id: pending.responder_id,
                phase: Phase::AwaitingResponder {
                    ephemeral: pending.ephemeral,
                    nonce: pending.nonce,
                },
            },
        );
    }

    /// Consume the responder's half of the record and derive the key.
    ///
    /// Returns the initiator's Confirm request. Call once the record shows
    /// the responder's ephemeral point and nonce.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` for an untracked session
    /// - `InvalidStatus` when called out of phase or on a dead record
    /// - `InvalidEncoding` for malformed responder fields
    pub fn process_response(
        &mut self,
        session_id: &str,
        view: &SessionView,
    ) -> Result<ConfirmRequest, CoreError> {
        let view_status = parse_status(view)?;
        if matches!(view_status, SessionStatus::Failed | SessionStatus::Expired) {
            self.active.remove(session_id);
            return Err(CoreError::InvalidStatus {
                status: view_status,
                operation: "process_response",
            });
        }

        let entry = self
            .active
            .get_mut(session_id)
            .ok_or_else(|| CoreError::SessionNotFound { session_id: session_id.to_string() })?;

        let Phase::AwaitingResponder { .. } = entry.phase else {
            return Err(CoreError::InvalidStatus {
                status: entry.phase.status_equivalent(),
                operation: "process_response",
            });
        };

        let responder_pub = expect_point(&view.responder_ephemeral_pub, "responderEphemeralPub")?;
        let responder_nonce = expect_nonce(&view.responder_nonce, "responderNonce")?;

        let Phase::AwaitingResponder { ephemeral, nonce } =
            std::mem::replace(&mut entry.phase, Phase::Poisoned)
        else {
            unreachable!("phase checked above");
        };

        // The shared secret exists only inside this scope; `derive` and the
        // two tags are everything that survives it.
        let shared = ephemeral.diffie_hellman(responder_pub)?;
        let key = derive_session_key(&shared, &nonce, &responder_nonce)?;
        let own_tag = confirmation_tag(&shared, session_id, Role::Initiator.label());
        let expected_peer_tag = confirmation_tag(&shared, session_id, Role::Responder.label());
        drop(shared);

        entry.phase = Phase::AwaitingPeerConfirmation { key, expected_peer_tag };
        tracing::debug!(session_id = %session_id, "session key derived (initiator)");

        Ok(ConfirmRequest {
            session_id: session_id.to_string(),
            confirmation: own_tag.to_vec(),
            is_initiator: true,
        })
    }

    /// Answer a pending handshake as the responder.
    ///
    /// Derives the key immediately (the initiator's half is on the record)
    /// and returns the signed Respond request together with the responder's
    /// Confirm request. Submit them in that order.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when the record is not addressed to this identity
    /// - `InvalidStatus` unless the record is `Initiated`
    /// - `InvalidEncoding` for malformed initiator fields
    pub fn accept(
        &mut self,
        signer: &SigningKeyPair,
        view: &SessionView,
    ) -> Result<(RespondRequest, ConfirmRequest), CoreError> {
        if view.responder_id != self.user_id {
            return Err(CoreError::Unauthorized { caller: self.user_id.clone() });
        }
        let view_status = parse_status(view)?;
        if view_status != SessionStatus::Initiated {
            return Err(CoreError::InvalidStatus { status: view_status, operation: "accept" });
        }

        let initiator_pub = expect_point(&view.initiator_ephemeral_pub, "initiatorEphemeralPub")?;
        let initiator_nonce = expect_nonce(&view.initiator_nonce, "initiatorNonce")?;

        let mut rng = EnvRng(&self.env);
        let ephemeral = EphemeralKeyPair::generate(&mut rng);
        let public = ephemeral.public_bytes();

        let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
        self.env.random_bytes(&mut nonce);

        let session_id = view.session_id.clone();

        // The shared secret exists only inside this scope.
        let shared = ephemeral.diffie_hellman(initiator_pub)?;
        let key = derive_session_key(&shared, &initiator_nonce, &nonce)?;
        let own_tag = confirmation_tag(&shared, &session_id, Role::Responder.label());
        let expected_peer_tag = confirmation_tag(&shared, &session_id, Role::Initiator.label());
        drop(shared);
        drop(ephemeral);

        let timestamp = self.env.now_ms();
        let signing_bytes =
            canonical::response_signing_bytes(&session_id, &public, &nonce, timestamp);
        let signature = signer.sign(&mut EnvRng(&self.env), &signing_bytes);

        let respond = RespondRequest {
            session_id: session_id.clone(),
            ephemeral_public: public.to_vec(),
            nonce: nonce.to_vec(),
            timestamp,
            signature,
        };
        let confirm = ConfirmRequest {
            session_id: session_id.clone(),
            confirmation: own_tag.to_vec(),
            is_initiator: false,
        };

        self.active.insert(
            session_id.clone(),
            ActiveHandshake {
                role: Role::Responder,
                peer_id: view.initiator_id.clone(),
                phase: Phase::AwaitingPeerConfirmation { key, expected_peer_tag },
            },
        );
        tracing::debug!(session_id = %session_id, "session key derived (responder)");

        Ok((respond, confirm))
    }

    /// Check the record for the peer's confirmation tag.
    ///
    /// Returns `Ok(false)` while the tag has not appeared yet, `Ok(true)`
    /// once it appeared and verified (the phase moves to `Established`).
    ///
    /// # Errors
    ///
    /// Returns `ConfirmationMismatch` and drops all local key material if
    /// the tag does not match; the caller must report the mismatch and warn
    /// the user. Returns `InvalidStatus` for dead records.
    pub fn verify_peer_confirmation(
        &mut self,
        session_id: &str,
        view: &SessionView,
    ) -> Result<bool, CoreError> {
        let view_status = parse_status(view)?;
        if matches!(view_status, SessionStatus::Failed | SessionStatus::Expired) {
            self.active.remove(session_id);
            return Err(CoreError::InvalidStatus {
                status: view_status,
                operation: "verify_peer_confirmation",
            });
        }

        let entry = self
            .active
            .get_mut(session_id)
            .ok_or_else(|| CoreError::SessionNotFound { session_id: session_id.to_string() })?;

        let Phase::AwaitingPeerConfirmation { expected_peer_tag, .. } = &entry.phase else {
            return Err(CoreError::InvalidStatus {
                status: entry.phase.status_equivalent(),
                operation: "verify_peer_confirmation",
            });
        };

        let peer_role = entry.role.peer();
        let peer_tag = match peer_role {
            Role::Initiator => view.initiator_confirmation.as_deref(),
            Role::Responder => view.responder_confirmation.as_deref(),
        };
        let Some(peer_tag) = peer_tag else {
            return Ok(false);
        };

        let matches: bool = expected_peer_tag.ct_eq(peer_tag).into();
        if !matches {
            tracing::warn!(session_id = %session_id, "confirmation mismatch, discarding key");
            self.active.remove(session_id);
            return Err(CoreError::ConfirmationMismatch { session_id: session_id.to_string() });
        }

        let Phase::AwaitingPeerConfirmation { key, .. } =
            std::mem::replace(&mut entry.phase, Phase::Poisoned)
        else {
            unreachable!("phase checked above");
        };
        entry.phase = Phase::Established { key };
        tracing::debug!(session_id = %session_id, "peer confirmation verified");
        Ok(true)
    }

    /// Hand the session key off once the handshake is fully confirmed.
    ///
    /// Removes the handshake from the active map; the ephemeral secret and
    /// shared secret are long gone, only the derived key survives.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatus` unless the peer confirmation verified.
    pub fn take_established(&mut self, session_id: &str) -> Result<EstablishedSession, CoreError> {
        let entry = self
            .active
            .get(session_id)
            .ok_or_else(|| CoreError::SessionNotFound { session_id: session_id.to_string() })?;

        if !matches!(entry.phase, Phase::Established { .. }) {
            return Err(CoreError::InvalidStatus {
                status: entry.phase.status_equivalent(),
                operation: "take_established",
            });
        }

        let entry = self.active.remove(session_id).expect("present above");
        let Phase::Established { key } = entry.phase else {
            unreachable!("phase checked above");
        };

        Ok(EstablishedSession { session_id: session_id.to_string(), peer_id: entry.peer_id, key })
    }

    /// Drop an in-flight handshake locally. The ledger record is left to
    /// expire on its own.
    pub fn abandon(&mut self, session_id: &str) -> bool {
        self.active.remove(session_id).is_some()
    }
}

fn parse_status(view: &SessionView) -> Result<SessionStatus, CoreError> {
    SessionStatus::parse(&view.status)
        .ok_or(CoreError::InvalidEncoding { field: "status" })
}

fn expect_point<'a>(bytes: &'a [u8], field: &'static str) -> Result<&'a [u8], CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::MissingField { field });
    }
    if bytes.len() != EPHEMERAL_PUBLIC_SIZE {
        return Err(CoreError::InvalidEncoding { field });
    }
    Ok(bytes)
}

fn expect_nonce(bytes: &[u8], field: &'static str) -> Result<[u8; HANDSHAKE_NONCE_SIZE], CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::MissingField { field });
    }
    bytes.try_into().map_err(|_| CoreError::InvalidEncoding { field })
}
