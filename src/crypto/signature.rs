//! Ed25519 signing identity
//!
//! Lets the relay sign its key-exchange reply so peers can pin the server
//! across reconnects.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use super::error::{CryptoError, CryptoResult};
use super::SignatureProvider;

/// Size of a verifying key in bytes
pub const VERIFYING_KEY_SIZE: usize = 32;

/// Size of a secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 key pair implementing [`SignatureProvider`]
///
/// The secret key is automatically zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct Ed25519Signer {
    #[zeroize(skip)]
    verifying_key: [u8; VERIFYING_KEY_SIZE],
    secret_key: [u8; SECRET_KEY_SIZE],
}

impl Ed25519Signer {
    /// Generate a new random signing identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(&signing_key)
    }

    /// Create from a seed (deterministic generation)
    pub fn from_seed(seed: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self::from_signing_key(&SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        Ed25519Signer {
            verifying_key: signing_key.verifying_key().to_bytes(),
            secret_key: signing_key.to_bytes(),
        }
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Signer({}...)", &hex::encode(self.verifying_key)[..16])
    }
}

impl SignatureProvider for Ed25519Signer {
    fn algorithm(&self) -> &str {
        "Ed25519"
    }

    fn verifying_key(&self) -> Vec<u8> {
        self.verifying_key.to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from_bytes(&self.secret_key);
        signing_key.sign(message).to_bytes().to_vec()
    }

    fn verify(&self, verifying_key: &[u8], message: &[u8], signature: &[u8]) -> CryptoResult<()> {
        verify_detached(verifying_key, message, signature)
    }
}

/// Verify an Ed25519 signature without holding a key pair
pub fn verify_detached(verifying_key: &[u8], message: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let key_bytes: [u8; VERIFYING_KEY_SIZE] =
        verifying_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: VERIFYING_KEY_SIZE,
                actual: verifying_key.len(),
            })?;
    let sig_bytes: [u8; SIGNATURE_SIZE] =
        signature
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: signature.len(),
            })?;

    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
    key.verify(message, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let signer = Ed25519Signer::generate();
        let message = b"server public key";

        let signature = signer.sign(message);
        assert!(signer
            .verify(&signer.verifying_key(), message, &signature)
            .is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let signer = Ed25519Signer::generate();
        let signature = signer.sign(b"original");

        assert_eq!(
            signer.verify(&signer.verifying_key(), b"tampered", &signature),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_third_party_key_fails() {
        let a = Ed25519Signer::generate();
        let b = Ed25519Signer::generate();
        let signature = a.sign(b"msg");

        assert!(a.verify(&b.verifying_key(), b"msg", &signature).is_err());
    }

    #[test]
    fn test_deterministic_generation() {
        let seed = [42u8; 32];
        assert_eq!(
            Ed25519Signer::from_seed(&seed).verifying_key(),
            Ed25519Signer::from_seed(&seed).verifying_key()
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let signer = Ed25519Signer::generate();
        let signature = signer.sign(b"msg");

        assert!(matches!(
            signer.verify(&[0u8; 5], b"msg", &signature),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
        assert!(matches!(
            signer.verify(&signer.verifying_key(), b"msg", &signature[..10]),
            Err(CryptoError::InvalidSignatureLength { .. })
        ));
    }
}
