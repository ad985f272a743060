//! Fuzz target for wire-body decoding
//!
//! The relay decodes attacker-controlled JSON bodies before any
//! authentication happens, so the decoders must never panic.
//!
//! # Strategy
//!
//! - Raw bytes into every request decoder
//! - Arbitrary field values through the canonical signing-byte builders
//!
//! # Invariants
//!
//! - Decoders return `Err` on malformed input, NEVER panic
//! - Canonical signing bytes are deterministic for identical inputs
//! - A decoded body re-encodes and re-decodes to the same value

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use cloak_proto::{
    canonical, decode_body, ConfirmRequest, InitiateRequest, MessageSubmission, RespondRequest,
    SessionView,
};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    /// Raw body bytes thrown at every decoder.
    body: Vec<u8>,
    /// Field values for the signing-byte builders.
    session_id: String,
    responder_id: String,
    ephemeral: Vec<u8>,
    nonce: Vec<u8>,
    timestamp: u64,
}

fuzz_target!(|input: FuzzInput| {
    // Decoders must reject garbage gracefully.
    let _ = decode_body::<InitiateRequest>(&input.body);
    let _ = decode_body::<RespondRequest>(&input.body);
    let _ = decode_body::<ConfirmRequest>(&input.body);
    let _ = decode_body::<MessageSubmission>(&input.body);
    let _ = decode_body::<SessionView>(&input.body);

    // A successfully decoded body must round-trip.
    if let Ok(request) = decode_body::<InitiateRequest>(&input.body) {
        let encoded = serde_json::to_vec(&request).expect("decoded request re-encodes");
        let again = decode_body::<InitiateRequest>(&encoded).expect("re-encoded body decodes");
        assert_eq!(again, request);
    }

    // Signing-byte builders accept any field values and are deterministic.
    let first = canonical::init_signing_bytes(
        &input.responder_id,
        &input.ephemeral,
        &input.nonce,
        input.timestamp,
    );
    let second = canonical::init_signing_bytes(
        &input.responder_id,
        &input.ephemeral,
        &input.nonce,
        input.timestamp,
    );
    assert_eq!(first, second);

    let _ = canonical::response_signing_bytes(
        &input.session_id,
        &input.ephemeral,
        &input.nonce,
        input.timestamp,
    );
});
