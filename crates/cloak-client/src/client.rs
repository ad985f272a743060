//! Client state machine.
//!
//! Drives handshakes end to end against the relay and routes messages
//! through per-session secure channels. Pure protocol logic lives in
//! `cloak-core`; this module owns the I/O choreography: submitting
//! requests, polling for peer progress with backoff, and keeping the local
//! key store in sync with relay-accepted traffic.

use std::collections::HashMap;
use std::sync::Arc;

use cloak_core::{
    CoreError, EnvRng, Environment, HandshakeEngine, SecureChannel, SessionStatus, Transport,
};
use cloak_crypto::SigningKeyPair;
use cloak_proto::{MessageAccepted, MessageType, PendingSession};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::key_store::{KeyStore, SessionKeyBlob};

/// Result of re-hydrating a session after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// A stored key blob was found; the channel is ready.
    Ready,
    /// No local key material survives; the handshake must be re-run.
    /// Carries the record status the relay reported.
    RestartRequired {
        /// Where the ledger record currently stands.
        status: SessionStatus,
    },
}

/// One inbound message, decrypted or not.
///
/// An authentication failure affects only its own message: the outcome
/// carries the error, the sequence counter stays put, and later messages
/// are still attempted.
#[derive(Debug)]
pub struct Delivery {
    /// Relay-assigned message id.
    pub message_id: String,
    /// Session the message travelled under.
    pub session_id: String,
    /// Sender identity.
    pub from: String,
    /// Payload kind.
    pub message_type: MessageType,
    /// The plaintext, or why it was rejected.
    pub outcome: Result<Vec<u8>, ClientError>,
}

/// A messaging client for one identity.
///
/// Generic over the environment, transport, and key store so the harness
/// can run it fully in memory.
pub struct Client<E, T, S>
where
    E: Environment,
    T: Transport,
    S: KeyStore,
{
    env: E,
    transport: T,
    store: S,
    config: ClientConfig,
    user_id: String,
    engine: HandshakeEngine<E>,
    channels: HashMap<String, Arc<SecureChannel>>,
}

impl<E, T, S> Client<E, T, S>
where
    E: Environment,
    T: Transport,
    S: KeyStore,
{
    /// Build a client for one identity.
    pub fn new(env: E, transport: T, store: S, user_id: &str, config: ClientConfig) -> Self {
        let engine = HandshakeEngine::new(env.clone(), user_id.to_string());
        Self {
            env,
            transport,
            store,
            config,
            user_id: user_id.to_string(),
            engine,
            channels: HashMap::new(),
        }
    }

    /// The identity this client acts for.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Load the long-term signing key, generating and persisting one on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns `KeyStore` on storage failure, `Core` on generation failure.
    pub fn ensure_signing_key(&self) -> Result<SigningKeyPair, ClientError> {
        if let Some(pair) = self.store.load_signing_key(&self.user_id)? {
            return Ok(pair);
        }

        let mut rng = EnvRng(&self.env);
        let pair =
            SigningKeyPair::generate(&mut rng).map_err(|e| ClientError::Core(e.into()))?;
        let der = pair.to_pkcs8_der().map_err(|e| ClientError::Core(e.into()))?;
        self.store.store_signing_key(&self.user_id, &der)?;
        tracing::info!(user_id = %self.user_id, "generated long-term signing key");
        Ok(pair)
    }

    /// Start a handshake with `responder_id`. Returns the minted session id;
    /// follow with [`Client::drive_to_completion`].
    ///
    /// # Errors
    ///
    /// Local signing failures as `Core`, relay rejections as `Relay`.
    pub async fn start_handshake(&mut self, responder_id: &str) -> Result<String, ClientError> {
        let signer = self.signing_key()?;
        let (request, pending) = self.engine.prepare_initiate(&signer, responder_id)?;
        let response = self.transport.initiate(&request).await?;
        self.engine.register_initiated(response.session_id.clone(), pending);
        Ok(response.session_id)
    }

    /// Answer a pending handshake as the responder: submit the signed
    /// Respond, then this side's confirmation. Follow with
    /// [`Client::drive_to_completion`] to verify the peer's tag.
    ///
    /// # Errors
    ///
    /// Local failures as `Core`, relay rejections as `Relay`.
    pub async fn accept_handshake(&mut self, session_id: &str) -> Result<(), ClientError> {
        let signer = self.signing_key()?;
        let view = self.transport.session(session_id).await?;
        let (respond, confirm) = self.engine.accept(&signer, &view)?;
        self.transport.respond(&respond).await?;
        self.transport.confirm(&confirm).await?;
        Ok(())
    }

    /// Poll until the handshake completes, the record dies, or the poll
    /// deadline passes.
    ///
    /// On success the session key is stored and a channel installed.
    /// Abandonment on timeout is local only; the ledger record expires on
    /// its own.
    ///
    /// # Errors
    ///
    /// `ConfirmationMismatch` is surfaced after reporting it to the relay
    /// and discarding all local key material: treat it as a
    /// man-in-the-middle warning, not a retryable failure.
    pub async fn drive_to_completion(&mut self, session_id: &str) -> Result<(), ClientError> {
        let started = self.env.now_ms();
        let deadline = started + self.config.poll_deadline.as_millis() as u64;

        loop {
            let view = self.transport.session(session_id).await?;

            if self.engine.awaiting_responder(session_id) {
                if !view.responder_ephemeral_pub.is_empty() {
                    let confirm = self.engine.process_response(session_id, &view)?;
                    self.transport.confirm(&confirm).await?;
                    // Re-read immediately so the peer-confirmation check
                    // sees the freshest record.
                    continue;
                }
            } else {
                match self.engine.verify_peer_confirmation(session_id, &view) {
                    Ok(true) => return self.install_session(session_id),
                    Ok(false) => {}
                    Err(err @ CoreError::ConfirmationMismatch { .. }) => {
                        tracing::error!(
                            session_id = %session_id,
                            "POSSIBLE MAN-IN-THE-MIDDLE: confirmation mismatch, session discarded"
                        );
                        if let Err(report) = self.transport.report_mismatch(session_id).await {
                            tracing::warn!(
                                session_id = %session_id,
                                error = %report,
                                "failed to report mismatch to relay"
                            );
                        }
                        self.store.delete_session(&self.user_id, session_id)?;
                        return Err(err.into());
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let now = self.env.now_ms();
            if now >= deadline {
                self.engine.abandon(session_id);
                return Err(ClientError::Timeout { elapsed_ms: now - started });
            }
            self.env.sleep(self.config.poll_interval).await;
        }
    }

    /// Re-hydrate a session after a restart: rebuild the channel from the
    /// stored key blob, or report that the handshake must be re-run.
    ///
    /// # Errors
    ///
    /// Relay failures as `Relay`, storage failures as `KeyStore`.
    pub async fn resume(&mut self, session_id: &str) -> Result<ResumeOutcome, ClientError> {
        if self.channels.contains_key(session_id) {
            return Ok(ResumeOutcome::Ready);
        }
        if self.store.load_session(&self.user_id, session_id)?.is_some() {
            self.channel(session_id)?;
            return Ok(ResumeOutcome::Ready);
        }

        // No key blob: any in-flight ephemeral secret died with the old
        // process. Report where the record stands so the caller can re-run.
        let status = self.transport.status(session_id).await?;
        let status = SessionStatus::parse(&status.status)
            .ok_or(CoreError::InvalidEncoding { field: "status" })?;
        Ok(ResumeOutcome::RestartRequired { status })
    }

    /// Handshakes awaiting this identity's response.
    ///
    /// # Errors
    ///
    /// Relay failures as `Relay`.
    pub async fn pending_handshakes(&self) -> Result<Vec<PendingSession>, ClientError> {
        Ok(self.transport.pending().await?)
    }

    /// Seal and submit a text message.
    ///
    /// A relay rejection reverts the drawn sequence number, so the next
    /// send retries with the true next value.
    ///
    /// # Errors
    ///
    /// `NoStoredKey` without a completed session, `Relay` on rejection.
    pub async fn send_text(
        &mut self,
        session_id: &str,
        plaintext: &[u8],
    ) -> Result<MessageAccepted, ClientError> {
        let channel = self.channel(session_id)?;
        let submission = channel.seal_text(&self.env, plaintext)?;
        let sequence = submission.sequence_number;

        match self.transport.submit_message(&submission).await {
            Ok(accepted) => {
                self.store.update_sequences(
                    &self.user_id,
                    session_id,
                    channel.last_sent(),
                    channel.last_received(),
                )?;
                Ok(accepted)
            }
            Err(err) => {
                channel.revert_sequence(sequence);
                tracing::warn!(
                    session_id = %session_id,
                    code = %err.code,
                    "send rejected, sequence reverted"
                );
                Err(err.into())
            }
        }
    }

    /// Split a file into sealed chunks and submit them in order.
    ///
    /// On a mid-file rejection the unsent chunks' sequence numbers are
    /// reverted; already-accepted chunks stand.
    ///
    /// # Errors
    ///
    /// `NoStoredKey` without a completed session, `Relay` on rejection.
    pub async fn send_file(
        &mut self,
        session_id: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<Vec<MessageAccepted>, ClientError> {
        let channel = self.channel(session_id)?;
        let submissions = channel.seal_file(&self.env, file_name, contents)?;

        let mut accepted = Vec::with_capacity(submissions.len());
        for (index, submission) in submissions.iter().enumerate() {
            match self.transport.submit_message(submission).await {
                Ok(receipt) => accepted.push(receipt),
                Err(err) => {
                    for unsent in submissions[index..].iter().rev() {
                        channel.revert_sequence(unsent.sequence_number);
                    }
                    self.store.update_sequences(
                        &self.user_id,
                        session_id,
                        channel.last_sent(),
                        channel.last_received(),
                    )?;
                    return Err(err.into());
                }
            }
        }

        self.store.update_sequences(
            &self.user_id,
            session_id,
            channel.last_sent(),
            channel.last_received(),
        )?;
        Ok(accepted)
    }

    /// Fetch the conversation with `peer_id` and decrypt what is new.
    ///
    /// Messages are delivered strictly in sequence order per session. A
    /// failed authentication shows up as an errored [`Delivery`] and does
    /// not advance any counter.
    ///
    /// # Errors
    ///
    /// Relay failures as `Relay`, storage failures as `KeyStore`.
    pub async fn receive(&mut self, peer_id: &str) -> Result<Vec<Delivery>, ClientError> {
        let stored = self.transport.conversation(peer_id).await?;

        let mut deliveries = Vec::new();
        for message in stored {
            if message.to != self.user_id {
                continue; // our own sends, echoed back in the conversation
            }

            let channel = match self.channel(&message.session_id) {
                Ok(channel) => channel,
                Err(err) => {
                    deliveries.push(Delivery {
                        message_id: message.message_id,
                        session_id: message.session_id,
                        from: message.from,
                        message_type: message.message_type,
                        outcome: Err(err),
                    });
                    continue;
                }
            };

            if message.sequence_number <= channel.last_received() {
                continue; // already delivered before a restart
            }

            let outcome = channel.open(&message).map_err(ClientError::from);
            if outcome.is_ok() {
                self.store.update_sequences(
                    &self.user_id,
                    &message.session_id,
                    channel.last_sent(),
                    channel.last_received(),
                )?;
            }
            deliveries.push(Delivery {
                message_id: message.message_id,
                session_id: message.session_id,
                from: message.from,
                message_type: message.message_type,
                outcome,
            });
        }
        Ok(deliveries)
    }

    /// Discard a session entirely: key blob, channel, and any in-flight
    /// handshake state.
    ///
    /// # Errors
    ///
    /// Storage failures as `KeyStore`.
    pub fn discard_session(&mut self, session_id: &str) -> Result<(), ClientError> {
        self.engine.abandon(session_id);
        self.channels.remove(session_id);
        self.store.delete_session(&self.user_id, session_id)
    }

    fn signing_key(&self) -> Result<SigningKeyPair, ClientError> {
        self.store.load_signing_key(&self.user_id)?.ok_or_else(|| {
            ClientError::Core(CoreError::NoSigningKey { user_id: self.user_id.clone() })
        })
    }

    fn install_session(&mut self, session_id: &str) -> Result<(), ClientError> {
        let established = self.engine.take_established(session_id)?;
        self.store.store_session(
            &self.user_id,
            session_id,
            SessionKeyBlob {
                key: established.key.clone(),
                partner_id: established.peer_id.clone(),
                last_sent: 0,
                last_received: 0,
            },
        )?;

        let channel = SecureChannel::new(
            session_id.to_string(),
            self.user_id.clone(),
            established.peer_id,
            established.key,
            0,
            0,
        );
        self.channels.insert(session_id.to_string(), Arc::new(channel));
        tracing::info!(session_id = %session_id, "secure session established");
        Ok(())
    }

    fn channel(&mut self, session_id: &str) -> Result<Arc<SecureChannel>, ClientError> {
        if let Some(channel) = self.channels.get(session_id) {
            return Ok(Arc::clone(channel));
        }

        let blob = self
            .store
            .load_session(&self.user_id, session_id)?
            .ok_or_else(|| ClientError::NoStoredKey { session_id: session_id.to_string() })?;
        let channel = Arc::new(SecureChannel::new(
            session_id.to_string(),
            self.user_id.clone(),
            blob.partner_id,
            blob.key,
            blob.last_sent,
            blob.last_received,
        ));
        self.channels.insert(session_id.to_string(), Arc::clone(&channel));
        Ok(channel)
    }
}
