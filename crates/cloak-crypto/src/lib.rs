//! Cloak Cryptographic Primitives
//!
//! This crate provides the cryptographic building blocks for the cloak
//! messaging protocol.
//!
//! # Design
//!
//! All functions in this crate are pure - they have no side effects and
//! produce deterministic outputs given the same inputs. Randomness required
//! for key generation and signing must be provided by the caller, enabling:
//!
//! - Deterministic testing with seeded RNG
//! - Sans-IO architecture compatibility
//! - No coupling to application-level abstractions
//!
//! # Security Properties
//!
//! - Forward Secrecy: Each handshake uses a fresh ephemeral P-256 key pair
//! - Authentication: Long-term RSA-PSS keys sign every handshake payload
//! - Confidentiality + Integrity: AES-256-GCM with a 128-bit tag
//! - Key Confirmation: HMAC-SHA-256 tags bound to the raw shared secret

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod ecdh;
pub mod envelope;
pub mod kdf;
pub mod sign;

pub use aead::{open, seal, IV_SIZE, TAG_SIZE};
pub use ecdh::{EphemeralKeyPair, SharedSecret, EPHEMERAL_PUBLIC_SIZE, SHARED_SECRET_SIZE};
pub use envelope::{unwrap_file_key, wrap_file_key, FileKey};
pub use kdf::{
    confirmation_tag, derive_session_key, SessionKey, CONFIRMATION_TAG_SIZE, SESSION_KEY_SIZE,
};
pub use sign::{
    SigningKeyPair, VerifyingKey, FINGERPRINT_SIZE, PSS_SALT_LEN, RSA_MODULUS_BITS,
    SIGNATURE_SIZE,
};

use thiserror::Error;

/// Size of a handshake nonce in bytes.
pub const HANDSHAKE_NONCE_SIZE: usize = 32;

/// Errors from cryptographic operations.
///
/// Variants deliberately carry no key or plaintext material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("seal failed")]
    SealFailed,

    /// AEAD tag verification failed; the ciphertext or IV was tampered with.
    #[error("authentication failed")]
    AuthFailed,

    /// Key derivation produced no output.
    #[error("key derivation failed")]
    DerivationFailed,

    /// A public point was not a valid P-256 encoding.
    #[error("invalid public point")]
    InvalidPoint,

    /// A key could not be decoded or generated.
    #[error("invalid key material")]
    InvalidKey,
}
