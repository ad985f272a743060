//! Ephemeral key agreement over P-256.
//!
//! Each handshake generates a fresh key pair; the secret half never leaves
//! this module and is zeroized on drop. Public halves travel on the wire as
//! 65-byte SEC1 uncompressed points.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Size of an uncompressed SEC1 P-256 public point in bytes.
pub const EPHEMERAL_PUBLIC_SIZE: usize = 65;

/// Size of the raw ECDH shared secret (the X coordinate) in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// An ephemeral P-256 key pair for a single handshake.
///
/// Generated once per key agreement and dropped as soon as the session key
/// is derived. The inner secret zeroizes itself on drop.
pub struct EphemeralKeyPair {
    secret: SecretKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh ephemeral key pair from the provided RNG.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self { secret: SecretKey::random(rng) }
    }

    /// The public half, encoded as a 65-byte uncompressed SEC1 point.
    pub fn public_bytes(&self) -> [u8; EPHEMERAL_PUBLIC_SIZE] {
        let point = self.secret.public_key().to_encoded_point(false);
        let mut out = [0u8; EPHEMERAL_PUBLIC_SIZE];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Compute the raw shared secret against a peer's SEC1-encoded point.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPoint` if `peer_public` is not a valid uncompressed
    /// P-256 point.
    pub fn diffie_hellman(&self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        let peer = PublicKey::from_sec1_bytes(peer_public).map_err(|_| CryptoError::InvalidPoint)?;
        let shared =
            p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut bytes = Zeroizing::new([0u8; SHARED_SECRET_SIZE]);
        bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(SharedSecret(bytes))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair").field("secret", &"<redacted>").finish()
    }
}

/// The raw ECDH shared secret.
///
/// Lives only long enough to derive the session key and the confirmation
/// tags, then must be dropped. Zeroized on drop.
pub struct SharedSecret(Zeroizing<[u8; SHARED_SECRET_SIZE]>);

impl SharedSecret {
    /// Borrow the raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }

    /// SHA-256 of the raw secret, used inside confirmation tags.
    ///
    /// The hash commits to the secret without exposing it to anything that
    /// only needs equality evidence.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_slice());
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret").field("bytes", &"<redacted>").finish()
    }
}
