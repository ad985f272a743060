//! Long-term identity signatures with RSA-PSS.
//!
//! 2048-bit modulus, SHA-256 digest, 32-byte salt (the digest size). Public
//! halves travel and are stored as DER-encoded SubjectPublicKeyInfo; the
//! fingerprint shown to users is the first 16 bytes of the SPKI's SHA-256.

use rand::{CryptoRng, RngCore};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey as PssVerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::CryptoError;

/// RSA modulus size in bits.
pub const RSA_MODULUS_BITS: usize = 2048;

/// PSS salt length in bytes (equals the SHA-256 output size).
pub const PSS_SALT_LEN: usize = 32;

/// Size of a signature in bytes (the modulus size).
pub const SIGNATURE_SIZE: usize = RSA_MODULUS_BITS / 8;

/// Size of a public key fingerprint in bytes.
pub const FINGERPRINT_SIZE: usize = 16;

/// A long-term RSA-PSS signing key pair.
///
/// The private half lives in the client's local key store and never travels.
pub struct SigningKeyPair {
    key: RsaPrivateKey,
}

impl SigningKeyPair {
    /// Generate a new 2048-bit key pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if generation fails.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Result<Self, CryptoError> {
        let key =
            RsaPrivateKey::new(rng, RSA_MODULUS_BITS).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { key })
    }

    /// Sign a message. PSS is randomized, so the RNG is required.
    pub fn sign(&self, rng: &mut (impl RngCore + CryptoRng), message: &[u8]) -> Vec<u8> {
        let signing = SigningKey::<Sha256>::new(self.key.clone());
        signing.sign_with_rng(rng, message).to_vec()
    }

    /// The public half as a verification key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey { key: self.key.to_public_key() }
    }

    /// Export the private half as PKCS#8 DER for the local key store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if encoding fails.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let doc = self.key.to_pkcs8_der().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Re-load a key pair from PKCS#8 DER.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the blob does not decode to an RSA key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs8_der(der).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { key })
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair").field("key", &"<redacted>").finish()
    }
}

/// A long-term RSA-PSS verification key, as held by the identity directory.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey {
    key: RsaPublicKey,
}

impl VerifyingKey {
    /// Parse from DER-encoded SubjectPublicKeyInfo.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for any malformed encoding.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_der(der).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { key })
    }

    /// Export as DER-encoded SubjectPublicKeyInfo.
    pub fn to_spki_der(&self) -> Vec<u8> {
        // Encoding a valid RSA public key cannot fail.
        self.key.to_public_key_der().expect("SPKI encoding of a valid key").as_bytes().to_vec()
    }

    /// Verify a signature. Returns `false` on any malformed input; never
    /// panics and never errors.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        PssVerifyingKey::<Sha256>::new(self.key.clone()).verify(message, &signature).is_ok()
    }

    /// First 16 bytes of the SPKI's SHA-256, for directory-level display.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.to_spki_der());
        let digest = hasher.finalize();

        let mut out = [0u8; FINGERPRINT_SIZE];
        out.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
        out
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("fingerprint", &hex_prefix(&self.fingerprint()))
            .finish()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::OnceLock;

    // 2048-bit generation is slow in debug builds; share one pair.
    fn keypair() -> &'static SigningKeyPair {
        static PAIR: OnceLock<SigningKeyPair> = OnceLock::new();
        PAIR.get_or_init(|| {
            let mut rng = StdRng::seed_from_u64(13);
            SigningKeyPair::generate(&mut rng).unwrap()
        })
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let mut rng = StdRng::seed_from_u64(14);
        let pair = keypair();

        let sig = pair.sign(&mut rng, b"payload");
        assert_eq!(sig.len(), SIGNATURE_SIZE);
        assert!(pair.verifying_key().verify(b"payload", &sig));
    }

    #[test]
    fn tampered_message_rejected() {
        let mut rng = StdRng::seed_from_u64(14);
        let pair = keypair();

        let sig = pair.sign(&mut rng, b"payload");
        assert!(!pair.verifying_key().verify(b"payloae", &sig));
    }

    #[test]
    fn malformed_signature_returns_false() {
        let vk = keypair().verifying_key();

        assert!(!vk.verify(b"payload", b"invalid"));
        assert!(!vk.verify(b"payload", &[]));
        assert!(!vk.verify(b"payload", &[0u8; SIGNATURE_SIZE]));
    }

    #[test]
    fn spki_round_trip_preserves_key() {
        let vk = keypair().verifying_key();
        let der = vk.to_spki_der();

        let reloaded = VerifyingKey::from_spki_der(&der).unwrap();
        assert_eq!(reloaded, vk);
        assert_eq!(reloaded.fingerprint(), vk.fingerprint());
    }

    #[test]
    fn pkcs8_round_trip_preserves_signing() {
        let mut rng = StdRng::seed_from_u64(15);
        let pair = keypair();

        let der = pair.to_pkcs8_der().unwrap();
        let reloaded = SigningKeyPair::from_pkcs8_der(&der).unwrap();

        let sig = reloaded.sign(&mut rng, b"payload");
        assert!(pair.verifying_key().verify(b"payload", &sig));
    }

    #[test]
    fn garbage_spki_rejected() {
        assert!(VerifyingKey::from_spki_der(&[0u8; 16]).is_err());
    }
}
