//! Validator integration tests.
//!
//! Drive the validator against in-memory collaborators with a manual clock,
//! covering every gating rule: field presence, freshness, signatures,
//! authorization, status transitions, expiry, and sequence monotonicity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use rand::{rngs::StdRng, RngCore, SeedableRng};

use cloak_core::{CoreError, Environment, HandshakeEngine, SessionStatus};
use cloak_crypto::SigningKeyPair;
use cloak_proto::{ConfirmRequest, MessageSubmission, MessageType};
use cloak_relay::{Caller, MemoryAudit, MemoryDirectory, MemoryLedger, Validator, ValidatorConfig};

const START_MS: u64 = 1_700_000_000_000;

#[derive(Clone)]
struct TestEnv {
    now: Arc<AtomicU64>,
    rng: Arc<Mutex<StdRng>>,
}

impl TestEnv {
    fn new(seed: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(START_MS)),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
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

// 2048-bit generation is slow in debug builds; share pairs across tests.
fn alice_signer() -> &'static SigningKeyPair {
    static PAIR: OnceLock<SigningKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(101);
        SigningKeyPair::generate(&mut rng).unwrap()
    })
}

fn bob_signer() -> &'static SigningKeyPair {
    static PAIR: OnceLock<SigningKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(102);
        SigningKeyPair::generate(&mut rng).unwrap()
    })
}

struct World {
    env: TestEnv,
    ledger: MemoryLedger,
    audit: MemoryAudit,
    validator: Validator<TestEnv, MemoryDirectory, MemoryLedger, MemoryAudit>,
}

fn world(seed: u64) -> World {
    let env = TestEnv::new(seed);
    let directory = MemoryDirectory::new();
    directory.register("u1", alice_signer().verifying_key());
    directory.register("u2", bob_signer().verifying_key());
    directory.register_keyless("u4");

    let ledger = MemoryLedger::new();
    let audit = MemoryAudit::new();
    let validator = Validator::new(
        env.clone(),
        directory,
        ledger.clone(),
        audit.clone(),
        ValidatorConfig::default(),
    );

    World { env, ledger, audit, validator }
}

fn alice(w: &World) -> HandshakeEngine<TestEnv> {
    HandshakeEngine::new(w.env.clone(), "u1".to_string())
}

fn bob(w: &World) -> HandshakeEngine<TestEnv> {
    HandshakeEngine::new(w.env.clone(), "u2".to_string())
}

const U1: Caller<'static> = Caller { user_id: "u1", ip: "10.0.0.1" };
const U2: Caller<'static> = Caller { user_id: "u2", ip: "10.0.0.2" };
const U3: Caller<'static> = Caller { user_id: "u3", ip: "10.0.0.3" };
const U4: Caller<'static> = Caller { user_id: "u4", ip: "10.0.0.4" };

/// Run Init → Respond → Confirm × 2 through the validator and return the
/// completed session id.
fn complete_handshake(w: &World) -> String {
    let mut a = alice(w);
    let mut b = bob(w);

    let (init, pending) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;
    a.register_initiated(session_id.clone(), pending);

    let view = w.validator.session_view(U2, &session_id).unwrap();
    let (respond, bob_confirm) = b.accept(bob_signer(), &view).unwrap();
    w.validator.respond(U2, &respond).unwrap();
    w.validator.confirm(U2, &bob_confirm).unwrap();

    let view = w.validator.session_view(U1, &session_id).unwrap();
    let alice_confirm = a.process_response(&session_id, &view).unwrap();
    let response = w.validator.confirm(U1, &alice_confirm).unwrap();
    assert_eq!(response.status, "Completed");

    session_id
}

fn text_message(session_id: &str, to: &str, sequence: u64, now: u64) -> MessageSubmission {
    MessageSubmission {
        to: to.to_string(),
        session_id: session_id.to_string(),
        ciphertext: vec![0xC1; 64],
        iv: vec![0x1F; 12],
        message_type: MessageType::Text,
        sequence_number: sequence,
        nonce: vec![0xAB; 32],
        timestamp: now,
        file_metadata: None,
    }
}

#[test]
fn initiate_creates_initiated_record() {
    let w = world(1);
    let a = alice(&w);

    let (init, _pending) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;

    assert_eq!(session_id, format!("u1|u2|{START_MS}"));

    let view = w.validator.session_view(U1, &session_id).unwrap();
    assert_eq!(view.status, "Initiated");
    assert_eq!(view.initiator_id, "u1");
    assert_eq!(view.responder_id, "u2");
    assert!(view.responder_ephemeral_pub.is_empty());
    assert_eq!(view.expires_at, view.created_at + 5 * 60 * 1000);
}

#[test]
fn stale_timestamp_rejected_before_record_creation() {
    let w = world(2);
    let a = alice(&w);

    let (mut init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    init.timestamp = w.env.now_ms() - 10 * 60 * 1000; // 10 minutes old

    let result = w.validator.initiate(U1, &init);
    assert!(matches!(result, Err(CoreError::TimestampExpired { .. })));
    assert_eq!(w.ledger.record_count(), 0, "no record created");

    let rejections: Vec<_> = w
        .audit
        .entries()
        .into_iter()
        .filter(|e| e.event_type == "key_exchange_initiate_rejected")
        .collect();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].details, "TIMESTAMP_EXPIRED");
}

#[test]
fn forged_signature_rejected_without_record() {
    let w = world(3);
    let a = alice(&w);

    let (mut init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    init.signature = b"invalid".to_vec();

    let result = w.validator.initiate(U1, &init);
    assert!(matches!(result, Err(CoreError::InvalidSignature { .. })));
    assert_eq!(w.ledger.record_count(), 0);
}

#[test]
fn tampered_ephemeral_fails_signature_check() {
    let w = world(4);
    let a = alice(&w);

    // An attacker substituting the ephemeral point cannot re-sign.
    let (mut init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    init.ephemeral_public[10] ^= 0xFF;

    let result = w.validator.initiate(U1, &init);
    assert!(matches!(result, Err(CoreError::InvalidSignature { .. })));
    assert_eq!(w.ledger.record_count(), 0);
}

#[test]
fn keyless_caller_rejected() {
    let w = world(5);
    let keyless = HandshakeEngine::new(w.env.clone(), "u4".to_string());

    let (init, _) = keyless.prepare_initiate(alice_signer(), "u2").unwrap();
    let result = w.validator.initiate(U4, &init);
    assert!(matches!(result, Err(CoreError::NoSigningKey { .. })));
}

#[test]
fn unknown_responder_rejected() {
    let w = world(6);
    let a = alice(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "nobody").unwrap();
    let result = w.validator.initiate(U1, &init);
    assert!(matches!(result, Err(CoreError::UserNotFound { .. })));
}

#[test]
fn unauthorized_respond_leaves_record_initiated() {
    let w = world(7);
    let a = alice(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;

    // u3 grabs the view through u2's eyes to build a plausible respond.
    let view = w.validator.session_view(U2, &session_id).unwrap();
    let mut intruder = HandshakeEngine::new(w.env.clone(), "u2".to_string());
    let (respond, _) = intruder.accept(bob_signer(), &view).unwrap();

    let result = w.validator.respond(U3, &respond);
    assert!(matches!(result, Err(CoreError::Unauthorized { .. })));

    let view = w.validator.session_view(U1, &session_id).unwrap();
    assert_eq!(view.status, "Initiated", "record unchanged");
}

#[test]
fn respond_after_deadline_expires_record() {
    let w = world(8);
    let a = alice(&w);
    let mut b = bob(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;
    let view = w.validator.session_view(U2, &session_id).unwrap();

    w.env.advance(6 * 60 * 1000); // six minutes

    // Correctly signed and fresh, but the record is past its deadline.
    let (respond, _) = b.accept(bob_signer(), &view).unwrap();
    let result = w.validator.respond(U2, &respond);
    assert!(matches!(result, Err(CoreError::SessionExpired { .. })));

    let view = w.validator.session_view(U2, &session_id).unwrap();
    assert_eq!(view.status, "Expired");
}

#[test]
fn invalid_signature_outranks_expiry() {
    let w = world(22);
    let a = alice(&w);
    let mut b = bob(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;
    let view = w.validator.session_view(U2, &session_id).unwrap();

    w.env.advance(6 * 60 * 1000); // six minutes

    let (mut respond, _) = b.accept(bob_signer(), &view).unwrap();
    respond.signature = b"invalid".to_vec();

    let result = w.validator.respond(U2, &respond);
    assert!(matches!(result, Err(CoreError::InvalidSignature { .. })));

    // Signature failures never mutate the record, not even to expire it.
    let view = w.validator.session_view(U2, &session_id).unwrap();
    assert_eq!(view.status, "Initiated");
}

#[test]
fn invalid_signature_outranks_status_gate() {
    let w = world(23);
    let a = alice(&w);
    let mut b = bob(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;
    let view = w.validator.session_view(U2, &session_id).unwrap();

    let (respond, _) = b.accept(bob_signer(), &view).unwrap();
    w.validator.respond(U2, &respond).unwrap();

    // A badly signed duplicate reports the signature, not the status.
    let mut second = HandshakeEngine::new(w.env.clone(), "u2".to_string());
    let (mut replayed, _) = second.accept(bob_signer(), &view).unwrap();
    replayed.signature = b"invalid".to_vec();

    let result = w.validator.respond(U2, &replayed);
    assert!(matches!(result, Err(CoreError::InvalidSignature { .. })));

    let view = w.validator.session_view(U2, &session_id).unwrap();
    assert_eq!(view.status, "Responded", "record unchanged");
}

#[test]
fn duplicate_respond_rejected() {
    let w = world(9);
    let a = alice(&w);
    let mut b = bob(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;

    let view = w.validator.session_view(U2, &session_id).unwrap();
    let (respond, _) = b.accept(bob_signer(), &view).unwrap();
    w.validator.respond(U2, &respond).unwrap();

    let mut second = HandshakeEngine::new(w.env.clone(), "u2".to_string());
    let (replayed, _) = second.accept(bob_signer(), &view).unwrap();
    let result = w.validator.respond(U2, &replayed);
    assert!(matches!(
        result,
        Err(CoreError::InvalidStatus { status: SessionStatus::Responded, .. })
    ));
}

#[test]
fn confirm_before_respond_rejected() {
    let w = world(10);
    let a = alice(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;

    let premature = ConfirmRequest {
        session_id: session_id.clone(),
        confirmation: vec![0xAA; 32],
        is_initiator: true,
    };
    let result = w.validator.confirm(U1, &premature);
    assert!(matches!(
        result,
        Err(CoreError::InvalidStatus { status: SessionStatus::Initiated, .. })
    ));
}

#[test]
fn confirm_wrong_slot_owner_rejected() {
    let w = world(11);
    let a = alice(&w);
    let mut b = bob(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;
    let view = w.validator.session_view(U2, &session_id).unwrap();
    let (respond, bob_confirm) = b.accept(bob_signer(), &view).unwrap();
    w.validator.respond(U2, &respond).unwrap();

    // u1 cannot fill the responder slot.
    let result = w.validator.confirm(U1, &bob_confirm);
    assert!(matches!(result, Err(CoreError::Unauthorized { .. })));
}

#[test]
fn full_handshake_completes_and_retains_expiry() {
    let w = world(12);
    let session_id = complete_handshake(&w);

    let view = w.validator.session_view(U1, &session_id).unwrap();
    assert_eq!(view.status, "Completed");
    assert_eq!(view.completed_at, Some(w.env.now_ms()));
    assert_eq!(view.expires_at, view.created_at + 5 * 60 * 1000, "expiry frozen");

    // Completed records survive the GC sweep.
    w.env.advance(60 * 60 * 1000);
    assert_eq!(w.validator.expire_stale().unwrap(), 0);
    let view = w.validator.session_view(U1, &session_id).unwrap();
    assert_eq!(view.status, "Completed");
}

#[test]
fn second_initiate_mints_a_new_session() {
    let w = world(13);
    let a = alice(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let first = w.validator.initiate(U1, &init).unwrap().session_id;

    w.env.advance(1);
    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let second = w.validator.initiate(U1, &init).unwrap().session_id;

    assert_ne!(first, second);
    assert_eq!(w.ledger.record_count(), 2);
}

#[test]
fn pending_lists_sessions_for_responder_only() {
    let w = world(14);
    let a = alice(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;

    let pending = w.validator.pending_for(U2).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].session_id, session_id);
    assert_eq!(pending[0].initiator_id, "u1");

    assert!(w.validator.pending_for(U1).unwrap().is_empty());
    assert!(w.validator.pending_for(U3).unwrap().is_empty());
}

#[test]
fn message_sequence_gates_strictly() {
    let w = world(15);
    let session_id = complete_handshake(&w);
    let now = w.env.now_ms();

    // seq 1 accepted
    w.validator.submit_message(U1, &text_message(&session_id, "u2", 1, now)).unwrap();

    // replaying seq 1 is rejected
    let replay = w.validator.submit_message(U1, &text_message(&session_id, "u2", 1, now));
    assert!(matches!(replay, Err(CoreError::ReplayDetected { expected: 2, got: 1 })));

    // skipping to seq 3 is rejected and does not advance the counter
    let gap = w.validator.submit_message(U1, &text_message(&session_id, "u2", 3, now));
    assert!(matches!(gap, Err(CoreError::ReplayDetected { expected: 2, got: 3 })));

    // the true next value still works
    w.validator.submit_message(U1, &text_message(&session_id, "u2", 2, now)).unwrap();

    // directions are independent
    w.validator.submit_message(U2, &text_message(&session_id, "u1", 1, now)).unwrap();

    assert_eq!(w.validator.conversation(U1, "u2").unwrap().len(), 3);
}

#[test]
fn message_on_incomplete_session_rejected() {
    let w = world(16);
    let a = alice(&w);

    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let session_id = w.validator.initiate(U1, &init).unwrap().session_id;

    let result =
        w.validator.submit_message(U1, &text_message(&session_id, "u2", 1, w.env.now_ms()));
    assert!(matches!(
        result,
        Err(CoreError::InvalidStatus { status: SessionStatus::Initiated, .. })
    ));
}

#[test]
fn message_from_non_party_rejected() {
    let w = world(17);
    let session_id = complete_handshake(&w);

    let result =
        w.validator.submit_message(U3, &text_message(&session_id, "u2", 1, w.env.now_ms()));
    assert!(matches!(result, Err(CoreError::Unauthorized { .. })));
}

#[test]
fn oversized_message_rejected() {
    let w = world(18);
    let session_id = complete_handshake(&w);

    let mut message = text_message(&session_id, "u2", 1, w.env.now_ms());
    message.ciphertext = vec![0; 256 * 1024]; // ciphertext + iv over the bound

    let result = w.validator.submit_message(U1, &message);
    assert!(matches!(result, Err(CoreError::MessageTooLarge { .. })));
}

#[test]
fn mismatch_report_fails_session() {
    let w = world(19);
    let session_id = complete_handshake(&w);

    w.validator.report_mismatch(U1, &session_id).unwrap();

    let view = w.validator.session_view(U1, &session_id).unwrap();
    assert_eq!(view.status, "Failed");

    // Terminal: no more messages, no second report.
    let message = w.validator.submit_message(U1, &text_message(&session_id, "u2", 1, w.env.now_ms()));
    assert!(matches!(message, Err(CoreError::InvalidStatus { .. })));
    let again = w.validator.report_mismatch(U2, &session_id);
    assert!(matches!(again, Err(CoreError::InvalidStatus { .. })));

    let mismatches: Vec<_> = w
        .audit
        .entries()
        .into_iter()
        .filter(|e| e.event_type == "confirmation_mismatch")
        .collect();
    assert_eq!(mismatches.len(), 1);
}

#[test]
fn expire_stale_sweeps_only_dead_records() {
    let w = world(20);
    let a = alice(&w);

    let completed = complete_handshake(&w);

    w.env.advance(1);
    let (init, _) = a.prepare_initiate(alice_signer(), "u2").unwrap();
    let stuck = w.validator.initiate(U1, &init).unwrap().session_id;

    w.env.advance(6 * 60 * 1000);
    assert_eq!(w.validator.expire_stale().unwrap(), 1);

    assert_eq!(w.validator.session_view(U1, &stuck).unwrap().status, "Expired");
    assert_eq!(w.validator.session_view(U1, &completed).unwrap().status, "Completed");
}

#[test]
fn terminal_reads_are_idempotent() {
    let w = world(21);
    let session_id = complete_handshake(&w);

    let first = w.validator.session_view(U1, &session_id).unwrap();
    let second = w.validator.session_view(U1, &session_id).unwrap();
    assert_eq!(first, second);

    let status_a = w.validator.status_view(U2, &session_id).unwrap();
    let status_b = w.validator.status_view(U2, &session_id).unwrap();
    assert_eq!(status_a, status_b);

    let outsider = w.validator.session_view(U3, &session_id);
    assert!(matches!(outsider, Err(CoreError::Unauthorized { .. })));
}
