//! Per-session secure channel.
//!
//! Once a handshake completes, both parties hold the same 32-byte key and
//! route payloads through a `SecureChannel`. The channel owns the
//! per-direction sequence counters: outbound numbers are drawn under a
//! mutex before sealing, inbound messages must arrive gap-free and in
//! order. Authentication failures never advance a counter.

use std::sync::Mutex;

use cloak_crypto::{
    open as aead_open, seal as aead_seal, unwrap_file_key, wrap_file_key, FileKey, SessionKey,
    HANDSHAKE_NONCE_SIZE, IV_SIZE, TAG_SIZE,
};
use cloak_proto::{
    FileMetadata, MessageSubmission, MessageType, StoredMessage, WrappedFileKey, MAX_SEALED_SIZE,
};

use crate::env::{EnvRng, Environment};
use crate::error::CoreError;
use crate::record::{SessionId, UserId};

/// Largest plaintext that seals into the 256 KiB `ciphertext + iv` bound.
pub const MAX_PLAINTEXT_SIZE: usize = MAX_SEALED_SIZE - TAG_SIZE - IV_SIZE;

/// Plaintext chunk size for client-side file splitting.
pub const FILE_CHUNK_SIZE: usize = MAX_PLAINTEXT_SIZE;

#[derive(Debug, Clone, Copy)]
struct Counters {
    /// Last sequence number drawn for an outbound message.
    last_sent: u64,
    /// Last inbound sequence number delivered to the application.
    last_received: u64,
}

/// An established two-party channel under one session key.
pub struct SecureChannel {
    session_id: SessionId,
    local_id: UserId,
    partner_id: UserId,
    key: SessionKey,
    counters: Mutex<Counters>,
}

impl SecureChannel {
    /// Build a channel from a completed handshake or a re-loaded key blob.
    ///
    /// `last_sent` and `last_received` come from the local key store (zero
    /// for a fresh session) so a restarted client resumes with the true
    /// next values.
    pub fn new(
        session_id: SessionId,
        local_id: UserId,
        partner_id: UserId,
        key: SessionKey,
        last_sent: u64,
        last_received: u64,
    ) -> Self {
        Self {
            session_id,
            local_id,
            partner_id,
            key,
            counters: Mutex::new(Counters { last_sent, last_received }),
        }
    }

    /// The session this channel runs under.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The peer identity.
    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    /// Last sequence number drawn for sending.
    pub fn last_sent(&self) -> u64 {
        self.lock().last_sent
    }

    /// Last inbound sequence number delivered.
    pub fn last_received(&self) -> u64 {
        self.lock().last_received
    }

    /// Seal a text payload into a submission for the relay.
    ///
    /// # Errors
    ///
    /// Returns `MessageTooLarge` if the sealed size would exceed the bound,
    /// `SealFailed` if encryption fails. The sequence counter only moves
    /// when a submission is actually produced.
    pub fn seal_text<E: Environment>(
        &self,
        env: &E,
        plaintext: &[u8],
    ) -> Result<MessageSubmission, CoreError> {
        self.seal_with_key(env, &self.key, plaintext, MessageType::Text, None)
    }

    /// Split a file into chunks and seal each one.
    ///
    /// Envelope mode: a fresh content key seals the chunks; the session key
    /// only wraps that content key, once per recipient. Every chunk carries
    /// the wrap so a receiver can start from any stored chunk.
    ///
    /// # Errors
    ///
    /// Returns `SealFailed` if any chunk fails to seal; already-drawn
    /// sequence numbers are reverted.
    pub fn seal_file<E: Environment>(
        &self,
        env: &E,
        file_name: &str,
        contents: &[u8],
    ) -> Result<Vec<MessageSubmission>, CoreError> {
        let file_key = FileKey::generate(&mut EnvRng(env));

        let mut wrap_iv = [0u8; IV_SIZE];
        env.random_bytes(&mut wrap_iv);
        let wrapped = wrap_file_key(&self.key, &wrap_iv, &file_key)?;
        let wrapped_keys = vec![WrappedFileKey {
            recipient_id: self.partner_id.clone(),
            wrapped_key: wrapped,
            iv: wrap_iv.to_vec(),
        }];

        let chunks: Vec<&[u8]> = if contents.is_empty() {
            vec![&[]]
        } else {
            contents.chunks(FILE_CHUNK_SIZE).collect()
        };
        let chunk_count = chunks.len() as u32;
        let content_key = file_key.as_session_key();

        let mut submissions = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let metadata = FileMetadata {
                file_name: file_name.to_string(),
                file_size: contents.len() as u64,
                chunk_index: index as u32,
                chunk_count,
                wrapped_keys: wrapped_keys.clone(),
            };
            match self.seal_with_key(env, &content_key, chunk, MessageType::File, Some(metadata)) {
                Ok(submission) => submissions.push(submission),
                Err(err) => {
                    // Highest draw first, or the reverts no-op.
                    for submission in submissions.iter().rev() {
                        self.revert_sequence(submission.sequence_number);
                    }
                    return Err(err);
                }
            }
        }

        Ok(submissions)
    }

    /// Open a stored message and deliver its plaintext.
    ///
    /// Enforces strict in-order delivery: the message's sequence number
    /// must be exactly the last delivered plus one. The inbound counter
    /// advances only after the tag verified.
    ///
    /// # Errors
    ///
    /// - `ReplayDetected` for any out-of-order or repeated sequence
    /// - `AuthFailed` when the tag does not verify (counter untouched)
    /// - `Unauthorized` / `SessionNotFound` for misrouted messages
    pub fn open(&self, message: &StoredMessage) -> Result<Vec<u8>, CoreError> {
        if message.session_id != self.session_id {
            return Err(CoreError::SessionNotFound { session_id: message.session_id.clone() });
        }
        if message.from != self.partner_id || message.to != self.local_id {
            return Err(CoreError::Unauthorized { caller: message.from.clone() });
        }

        let iv: [u8; IV_SIZE] = message
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidEncoding { field: "iv" })?;

        let mut counters = self.lock();
        let expected = counters.last_received + 1;
        if message.sequence_number != expected {
            return Err(CoreError::ReplayDetected { expected, got: message.sequence_number });
        }

        let plaintext = match (&message.message_type, &message.file_metadata) {
            (MessageType::File, Some(metadata)) => {
                let wrap = metadata
                    .wrapped_keys
                    .iter()
                    .find(|w| w.recipient_id == self.local_id)
                    .ok_or(CoreError::MissingField { field: "wrappedKeys" })?;
                let wrap_iv: [u8; IV_SIZE] = wrap
                    .iv
                    .as_slice()
                    .try_into()
                    .map_err(|_| CoreError::InvalidEncoding { field: "wrappedKeys.iv" })?;
                let file_key = unwrap_file_key(&self.key, &wrap_iv, &wrap.wrapped_key)?;
                aead_open(&file_key.as_session_key(), &iv, &message.ciphertext)?
            }
            _ => aead_open(&self.key, &iv, &message.ciphertext)?,
        };

        counters.last_received = message.sequence_number;
        Ok(plaintext)
    }

    /// Undo a sequence draw after the relay rejected the submission, so the
    /// next send retries with the true next value.
    ///
    /// No-op unless `sequence` is the most recently drawn number.
    pub fn revert_sequence(&self, sequence: u64) {
        let mut counters = self.lock();
        if counters.last_sent == sequence {
            counters.last_sent = sequence - 1;
        }
    }

    fn seal_with_key<E: Environment>(
        &self,
        env: &E,
        key: &SessionKey,
        plaintext: &[u8],
        message_type: MessageType,
        file_metadata: Option<FileMetadata>,
    ) -> Result<MessageSubmission, CoreError> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: plaintext.len() + TAG_SIZE + IV_SIZE,
                max: MAX_SEALED_SIZE,
            });
        }

        // Sequence draw and sealing happen under one lock so concurrent
        // senders cannot interleave numbers.
        let mut counters = self.lock();
        let sequence = counters.last_sent + 1;

        let mut iv = [0u8; IV_SIZE];
        env.random_bytes(&mut iv);
        let ciphertext = aead_seal(key, &iv, plaintext)?;

        let mut canary = [0u8; HANDSHAKE_NONCE_SIZE];
        env.random_bytes(&mut canary);

        counters.last_sent = sequence;
        Ok(MessageSubmission {
            to: self.partner_id.clone(),
            session_id: self.session_id.clone(),
            ciphertext,
            iv: iv.to_vec(),
            message_type,
            sequence_number: sequence,
            nonce: canary.to_vec(),
            timestamp: env.now_ms(),
            file_metadata,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        // A poisoned counter mutex means a panic mid-seal; recover the
        // guard, the counters themselves are always consistent.
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("session_id", &self.session_id)
            .field("partner_id", &self.partner_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    use rand::{rngs::StdRng, RngCore, SeedableRng};

    #[derive(Clone)]
    struct TestEnv {
        now: Arc<AtomicU64>,
        rng: Arc<StdMutex<StdRng>>,
    }

    impl TestEnv {
        fn new(seed: u64) -> Self {
            Self {
                now: Arc::new(AtomicU64::new(1_700_000_000_000)),
                rng: Arc::new(StdMutex::new(StdRng::seed_from_u64(seed))),
            }
        }
    }

    impl Environment for TestEnv {
        fn now_ms(&self) -> u64 {
            self.now.load(Ordering::Relaxed)
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }
    }

    fn channel_pair() -> (SecureChannel, SecureChannel) {
        let key = SessionKey::from_bytes([0x55; 32]);
        let alice = SecureChannel::new(
            "u1|u2|1000".into(),
            "u1".into(),
            "u2".into(),
            key.clone(),
            0,
            0,
        );
        let bob =
            SecureChannel::new("u1|u2|1000".into(), "u2".into(), "u1".into(), key, 0, 0);
        (alice, bob)
    }

    fn store(submission: MessageSubmission, from: &str, id: u64) -> StoredMessage {
        StoredMessage {
            message_id: format!("m{id}"),
            from: from.into(),
            to: submission.to,
            session_id: submission.session_id,
            ciphertext: submission.ciphertext,
            iv: submission.iv,
            message_type: submission.message_type,
            sequence_number: submission.sequence_number,
            server_timestamp: submission.timestamp,
            file_metadata: submission.file_metadata,
        }
    }

    #[test]
    fn text_round_trip() {
        let env = TestEnv::new(31);
        let (alice, bob) = channel_pair();

        let submission = alice.seal_text(&env, b"hello").unwrap();
        assert_eq!(submission.sequence_number, 1);
        assert_eq!(submission.to, "u2");
        assert_eq!(submission.iv.len(), IV_SIZE);
        assert_eq!(submission.nonce.len(), HANDSHAKE_NONCE_SIZE);

        let plaintext = bob.open(&store(submission, "u1", 1)).unwrap();
        assert_eq!(plaintext, b"hello");
        assert_eq!(bob.last_received(), 1);
    }

    #[test]
    fn sequences_count_per_direction() {
        let env = TestEnv::new(32);
        let (alice, bob) = channel_pair();

        let a1 = alice.seal_text(&env, b"one").unwrap();
        let b1 = bob.seal_text(&env, b"two").unwrap();

        assert_eq!(a1.sequence_number, 1);
        assert_eq!(b1.sequence_number, 1);

        bob.open(&store(a1, "u1", 1)).unwrap();
        alice.open(&store(b1, "u2", 2)).unwrap();
    }

    #[test]
    fn out_of_order_delivery_rejected() {
        let env = TestEnv::new(33);
        let (alice, bob) = channel_pair();

        let first = alice.seal_text(&env, b"one").unwrap();
        let second = alice.seal_text(&env, b"two").unwrap();

        let result = bob.open(&store(second, "u1", 2));
        assert!(matches!(result, Err(CoreError::ReplayDetected { expected: 1, got: 2 })));

        // In-order delivery still works afterwards.
        bob.open(&store(first, "u1", 1)).unwrap();
        assert_eq!(bob.last_received(), 1);
    }

    #[test]
    fn replayed_message_rejected() {
        let env = TestEnv::new(34);
        let (alice, bob) = channel_pair();

        let submission = alice.seal_text(&env, b"once").unwrap();
        let stored = store(submission, "u1", 1);

        bob.open(&stored).unwrap();
        let result = bob.open(&stored);
        assert!(matches!(result, Err(CoreError::ReplayDetected { expected: 2, got: 1 })));
    }

    #[test]
    fn tampering_fails_without_advancing_counter() {
        let env = TestEnv::new(35);
        let (alice, bob) = channel_pair();

        let submission = alice.seal_text(&env, b"intact").unwrap();
        let mut stored = store(submission, "u1", 1);
        stored.ciphertext[0] ^= 0x01;

        let result = bob.open(&stored);
        assert!(matches!(result, Err(CoreError::Crypto(_))));
        assert_eq!(bob.last_received(), 0, "counter untouched on auth failure");

        // The honest copy still delivers.
        stored.ciphertext[0] ^= 0x01;
        bob.open(&stored).unwrap();
    }

    #[test]
    fn revert_sequence_allows_clean_retry() {
        let env = TestEnv::new(36);
        let (alice, _) = channel_pair();

        let rejected = alice.seal_text(&env, b"lost").unwrap();
        assert_eq!(rejected.sequence_number, 1);

        alice.revert_sequence(rejected.sequence_number);
        let retry = alice.seal_text(&env, b"retry").unwrap();
        assert_eq!(retry.sequence_number, 1);
    }

    #[test]
    fn revert_ignores_stale_sequences() {
        let env = TestEnv::new(37);
        let (alice, _) = channel_pair();

        let first = alice.seal_text(&env, b"one").unwrap();
        let _second = alice.seal_text(&env, b"two").unwrap();

        // Reverting an older draw must not clobber newer ones.
        alice.revert_sequence(first.sequence_number);
        assert_eq!(alice.last_sent(), 2);
    }

    #[test]
    fn oversized_payload_rejected_without_burning_sequence() {
        let env = TestEnv::new(38);
        let (alice, _) = channel_pair();

        let huge = vec![0u8; MAX_PLAINTEXT_SIZE + 1];
        let result = alice.seal_text(&env, &huge);

        assert!(matches!(result, Err(CoreError::MessageTooLarge { .. })));
        assert_eq!(alice.last_sent(), 0);
    }

    #[test]
    fn max_size_payload_round_trips() {
        let env = TestEnv::new(39);
        let (alice, bob) = channel_pair();

        let payload = vec![0xABu8; MAX_PLAINTEXT_SIZE];
        let submission = alice.seal_text(&env, &payload).unwrap();
        assert!(submission.ciphertext.len() + submission.iv.len() <= MAX_SEALED_SIZE);

        let plaintext = bob.open(&store(submission, "u1", 1)).unwrap();
        assert_eq!(plaintext, payload);
    }

    #[test]
    fn file_chunks_round_trip() {
        let env = TestEnv::new(40);
        let (alice, bob) = channel_pair();

        // Three chunks: two full, one partial.
        let contents: Vec<u8> =
            (0..FILE_CHUNK_SIZE * 2 + 1024).map(|i| (i % 251) as u8).collect();
        let submissions = alice.seal_file(&env, "backup.tar", &contents).unwrap();
        assert_eq!(submissions.len(), 3);

        let mut reassembled = Vec::new();
        for (i, submission) in submissions.into_iter().enumerate() {
            let metadata = submission.file_metadata.clone().unwrap();
            assert_eq!(metadata.chunk_index, i as u32);
            assert_eq!(metadata.chunk_count, 3);
            assert_eq!(metadata.file_size, contents.len() as u64);

            reassembled.extend(bob.open(&store(submission, "u1", i as u64)).unwrap());
        }
        assert_eq!(reassembled, contents);
    }

    #[test]
    fn file_chunks_use_independent_ivs() {
        let env = TestEnv::new(41);
        let (alice, _) = channel_pair();

        let contents = vec![0u8; FILE_CHUNK_SIZE + 1];
        let submissions = alice.seal_file(&env, "pad.bin", &contents).unwrap();

        assert_eq!(submissions.len(), 2);
        assert_ne!(submissions[0].iv, submissions[1].iv);
    }

    #[test]
    fn misrouted_message_rejected() {
        let env = TestEnv::new(42);
        let (alice, bob) = channel_pair();

        let submission = alice.seal_text(&env, b"hi").unwrap();
        let mut stored = store(submission, "u1", 1);
        stored.from = "u3".into();

        let result = bob.open(&stored);
        assert!(matches!(result, Err(CoreError::Unauthorized { .. })));
    }
}
