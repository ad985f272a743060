//! Protocol property tests.
//!
//! Each test pins one quantified invariant of the protocol:
//!
//! - agreement: honest parties derive bytewise-identical keys
//! - authentication: ephemeral substitution without the signing key is
//!   rejected and the ledger stays untouched
//! - freshness: stale timestamps are rejected before signature work
//! - monotonic sequence: accepted messages advance by exactly one
//! - AEAD integrity: any flipped bit kills the message
//! - round trip: seal/open identity up to the size bound
//! - idempotent reads: terminal records read back identically
//! - MITM detection: substituted ephemerals fail confirmation on both
//!   sides

use cloak_client::KeyStore as _;
use cloak_core::{
    CoreError, Environment, HandshakeEngine, LedgerStore, SessionStatus, Transport,
    MAX_PLAINTEXT_SIZE,
};
use cloak_crypto::{open, seal, EphemeralKeyPair, SessionKey, IV_SIZE};
use cloak_harness::{init_tracing, test_signer, TestWorld};
use cloak_proto::ErrorCode;
use cloak_relay::Caller;

const U1: Caller<'static> = Caller { user_id: "u1", ip: "10.0.0.1" };
const U2: Caller<'static> = Caller { user_id: "u2", ip: "10.0.0.2" };

/// Complete a handshake between two fresh clients and return
/// `(alice, bob, their stores, session id)`.
macro_rules! establish {
    ($world:expr) => {{
        let (mut alice, alice_store) = $world.client_for("u1", test_signer(0));
        let (mut bob, bob_store) = $world.client_for("u2", test_signer(1));

        let session_id = alice.start_handshake("u2").await.unwrap();
        bob.accept_handshake(&session_id).await.unwrap();
        alice.drive_to_completion(&session_id).await.unwrap();
        bob.drive_to_completion(&session_id).await.unwrap();

        (alice, bob, alice_store, bob_store, session_id)
    }};
}

#[tokio::test]
async fn honest_parties_agree_on_session_key() {
    init_tracing();
    let world = TestWorld::new(1);
    let (_alice, _bob, alice_store, bob_store, session_id) = establish!(&world);

    let alice_blob = alice_store.load_session("u1", &session_id).unwrap().unwrap();
    let bob_blob = bob_store.load_session("u2", &session_id).unwrap().unwrap();

    assert_eq!(
        alice_blob.key.as_bytes(),
        bob_blob.key.as_bytes(),
        "both parties derive bytewise-identical keys"
    );
    assert_eq!(alice_blob.partner_id, "u2");
    assert_eq!(bob_blob.partner_id, "u1");
}

#[tokio::test]
async fn ephemeral_substitution_rejected_with_ledger_untouched() {
    init_tracing();
    let world = TestWorld::new(2);
    let (mut alice, _) = world.client_for("u1", test_signer(0));
    let (_bob, _) = world.client_for("u2", test_signer(1));

    let session_id = alice.start_handshake("u2").await.unwrap();
    let before = world.ledger.record(&session_id).unwrap().unwrap();

    // The adversary swaps the responder's ephemeral point but cannot
    // produce u2's signature over it.
    let env = world.env.clone();
    let mut engine = HandshakeEngine::new(env.clone(), "u2".to_string());
    let view = world.validator.session_view(U2, &session_id).unwrap();
    let (mut respond, _confirm) = engine.accept(test_signer(1), &view).unwrap();

    let mut rng = cloak_core::EnvRng(&env);
    respond.ephemeral_public = EphemeralKeyPair::generate(&mut rng).public_bytes().to_vec();

    let result = world.validator.respond(U2, &respond);
    assert!(matches!(result, Err(CoreError::InvalidSignature { .. })));

    let after = world.ledger.record(&session_id).unwrap().unwrap();
    assert_eq!(before, after, "rejected transition never mutates the record");
}

#[tokio::test]
async fn stale_timestamp_rejected_before_signature_verification() {
    init_tracing();
    let world = TestWorld::new(3);
    let (_alice, _) = world.client_for("u1", test_signer(0));
    let (_bob, _) = world.client_for("u2", test_signer(1));

    let env = world.env.clone();
    let engine = HandshakeEngine::new(env.clone(), "u1".to_string());
    let (mut init, _) = engine.prepare_initiate(test_signer(0), "u2").unwrap();

    // Ten minutes stale AND garbage-signed: the freshness gate must fire
    // first, proving no signature work happens on stale requests.
    init.timestamp = env.now_ms() - 10 * 60 * 1000;
    init.signature = b"garbage".to_vec();

    let result = world.validator.initiate(U1, &init);
    assert!(matches!(result, Err(CoreError::TimestampExpired { .. })));
    assert_eq!(world.ledger.record_count(), 0);
}

#[tokio::test]
async fn sequence_advances_by_exactly_one() {
    init_tracing();
    let world = TestWorld::new(4);
    let (mut alice, mut bob, _, _, session_id) = establish!(&world);

    for round in 1..=5u64 {
        alice.send_text(&session_id, format!("msg {round}").as_bytes()).await.unwrap();
        let record = world.ledger.record(&session_id).unwrap().unwrap().record;
        assert_eq!(record.initiator_last_sequence, round);
        assert_eq!(record.responder_last_sequence, 0);
    }

    // The other direction counts independently.
    bob.send_text(&session_id, b"reply").await.unwrap();
    let record = world.ledger.record(&session_id).unwrap().unwrap().record;
    assert_eq!(record.initiator_last_sequence, 5);
    assert_eq!(record.responder_last_sequence, 1);

    // Gaps and repeats are rejected without advancing anything.
    let transport = world.transport_for("u1");
    let stored = transport.conversation("u2").await.unwrap();
    let replayable = stored.iter().find(|m| m.from == "u1").unwrap();
    let resubmission = cloak_proto::MessageSubmission {
        to: replayable.to.clone(),
        session_id: replayable.session_id.clone(),
        ciphertext: replayable.ciphertext.clone(),
        iv: replayable.iv.clone(),
        message_type: replayable.message_type,
        sequence_number: replayable.sequence_number,
        nonce: vec![0xEE; 32],
        timestamp: world.env.now_ms(),
        file_metadata: None,
    };
    let err = transport.submit_message(&resubmission).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ReplayDetected);

    let record = world.ledger.record(&session_id).unwrap().unwrap().record;
    assert_eq!(record.initiator_last_sequence, 5, "replay does not advance the counter");
}

#[test]
fn any_flipped_bit_fails_authentication() {
    let key = SessionKey::from_bytes([0x5A; 32]);
    let iv = [7u8; IV_SIZE];
    let sealed = seal(&key, &iv, b"integrity matters").unwrap();

    // Every bit of the ciphertext (payload and tag alike).
    for byte in 0..sealed.len() {
        for bit in 0..8 {
            let mut tampered = sealed.clone();
            tampered[byte] ^= 1 << bit;
            assert!(
                open(&key, &iv, &tampered).is_err(),
                "flip at byte {byte} bit {bit} must fail"
            );
        }
    }

    // Every bit of the IV.
    for byte in 0..IV_SIZE {
        for bit in 0..8 {
            let mut bad_iv = iv;
            bad_iv[byte] ^= 1 << bit;
            assert!(open(&key, &bad_iv, &sealed).is_err());
        }
    }
}

#[test]
fn round_trip_up_to_the_size_bound() {
    let key = SessionKey::from_bytes([0x6B; 32]);
    let iv = [9u8; IV_SIZE];

    for size in [0usize, 1, 1024, 64 * 1024, MAX_PLAINTEXT_SIZE] {
        let plaintext: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let sealed = seal(&key, &iv, &plaintext).unwrap();
        assert!(sealed.len() + IV_SIZE <= 256 * 1024, "sealed size within bound at {size}");
        assert_eq!(open(&key, &iv, &sealed).unwrap(), plaintext, "round trip at {size}");
    }
}

#[tokio::test]
async fn terminal_reads_are_idempotent() {
    init_tracing();
    let world = TestWorld::new(7);
    let (_alice, _bob, _, _, session_id) = establish!(&world);

    let transport = world.transport_for("u1");
    let first = transport.session(&session_id).await.unwrap();
    let second = transport.session(&session_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status, "Completed");

    // Still identical after unrelated activity and time passing.
    world.env.advance(60 * 60 * 1000);
    world.validator.expire_stale().unwrap();
    let third = transport.session(&session_id).await.unwrap();
    assert_eq!(first, third);
}

#[tokio::test]
async fn substituted_ephemerals_fail_confirmation_on_both_sides() {
    init_tracing();
    let world = TestWorld::new(8);
    let (_a, _) = world.client_for("u1", test_signer(0));
    let (_b, _) = world.client_for("u2", test_signer(1));
    let env = world.env.clone();

    let mut alice = HandshakeEngine::new(env.clone(), "u1".to_string());
    let mut bob = HandshakeEngine::new(env.clone(), "u2".to_string());

    let (init, pending) = alice.prepare_initiate(test_signer(0), "u2").unwrap();
    let session_id = world.validator.initiate(U1, &init).unwrap().session_id;
    alice.register_initiated(session_id.clone(), pending);

    let view = world.validator.session_view(U2, &session_id).unwrap();
    let (respond, bob_confirm) = bob.accept(test_signer(1), &view).unwrap();
    world.validator.respond(U2, &respond).unwrap();
    world.validator.confirm(U2, &bob_confirm).unwrap();

    // A compromised relay swaps both ephemeral points for attacker ones,
    // bypassing the validator. Each victim now derives a secret the other
    // never saw.
    let mut rng = cloak_core::EnvRng(&env);
    let attacker_a = EphemeralKeyPair::generate(&mut rng);
    let attacker_b = EphemeralKeyPair::generate(&mut rng);
    let versioned = world.ledger.record(&session_id).unwrap().unwrap();
    let mut tampered = versioned.record.clone();
    tampered.initiator_ephemeral_pub = attacker_a.public_bytes().to_vec();
    tampered.responder_ephemeral_pub = attacker_b.public_bytes().to_vec();
    world.ledger.update_record(versioned.version, tampered).unwrap();

    // Alice derives against the attacker's point and submits her tag.
    let view = world.validator.session_view(U1, &session_id).unwrap();
    let alice_confirm = alice.process_response(&session_id, &view).unwrap();
    world.validator.confirm(U1, &alice_confirm).unwrap();

    // Both victims detect the mismatch.
    let view = world.validator.session_view(U1, &session_id).unwrap();
    let alice_result = alice.verify_peer_confirmation(&session_id, &view);
    assert!(matches!(alice_result, Err(CoreError::ConfirmationMismatch { .. })));

    let bob_result = bob.verify_peer_confirmation(&session_id, &view);
    assert!(matches!(bob_result, Err(CoreError::ConfirmationMismatch { .. })));

    // Either report fails the session for good.
    world.validator.report_mismatch(U1, &session_id).unwrap();
    let record = world.ledger.record(&session_id).unwrap().unwrap().record;
    assert_eq!(record.status, SessionStatus::Failed);

    let mismatch_events: Vec<_> = world
        .audit
        .entries()
        .into_iter()
        .filter(|e| e.event_type == "confirmation_mismatch")
        .collect();
    assert_eq!(mismatch_events.len(), 1);
}
