//! Deterministic KEM provider for tests
//!
//! Offers no confidentiality at all. Public and secret keys are the same
//! bytes; a ciphertext is the recipient's key tag followed by the plaintext
//! XORed with the key. Decapsulation under a different key fails the tag
//! check, which is enough to exercise every relay path without real
//! lattice or curve arithmetic.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::error::{CryptoError, CryptoResult};
use super::keys::{KemKeyPair, KemPublicKey, KemSecretKey};
use super::KemProvider;

const TAG_LEN: usize = 8;
const KEY_LEN: usize = 16;

/// Mock key encapsulation provider
#[derive(Debug, Default)]
pub struct MockKem {
    counter: AtomicU64,
    fail_keygen: AtomicBool,
    fail_decapsulate: AtomicBool,
}

impl MockKem {
    /// Create a mock that succeeds at everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose key generation always fails
    pub fn failing_keygen() -> Self {
        let kem = Self::default();
        kem.fail_keygen.store(true, Ordering::SeqCst);
        kem
    }

    /// Create a mock that generates keys but cannot open any ciphertext
    pub fn failing_decapsulate() -> Self {
        let kem = Self::default();
        kem.fail_decapsulate.store(true, Ordering::SeqCst);
        kem
    }

    /// Deterministic key pair derived from a seed string
    pub fn keypair_from_seed(seed: &str) -> KemKeyPair {
        let mut key = [0u8; KEY_LEN];
        for (i, b) in seed.bytes().enumerate() {
            key[i % KEY_LEN] = key[i % KEY_LEN].wrapping_mul(31).wrapping_add(b);
        }
        // A zero key would make the XOR a no-op
        key[KEY_LEN - 1] |= 0x80;

        KemKeyPair {
            public: KemPublicKey::from_bytes(key.to_vec()),
            secret: KemSecretKey::from_bytes(key.to_vec()),
        }
    }

    fn tag(key: &[u8]) -> [u8; TAG_LEN] {
        let mut tag = [0u8; TAG_LEN];
        for (i, b) in key.iter().enumerate() {
            tag[i % TAG_LEN] ^= b.rotate_left(i as u32 % 8);
        }
        tag
    }

    fn xor(key: &[u8], data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(key.iter().cycle())
            .map(|(d, k)| d ^ k)
            .collect()
    }
}

impl KemProvider for MockKem {
    fn algorithm(&self) -> &str {
        "MOCK-KEM"
    }

    fn standard(&self) -> &str {
        "none"
    }

    fn generate_keypair(&self) -> CryptoResult<KemKeyPair> {
        if self.fail_keygen.load(Ordering::SeqCst) {
            return Err(CryptoError::KeyGenerationFailed(
                "mock provider configured to fail".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Self::keypair_from_seed(&format!("mock-{n}")))
    }

    fn parse_public_key(&self, bytes: &[u8]) -> CryptoResult<KemPublicKey> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        Ok(KemPublicKey::from_bytes(bytes.to_vec()))
    }

    fn encapsulate(&self, public_key: &KemPublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = public_key.as_bytes();
        if key.is_empty() {
            return Err(CryptoError::InvalidPublicKey);
        }
        let mut out = Self::tag(key).to_vec();
        out.extend(Self::xor(key, plaintext));
        Ok(out)
    }

    fn decapsulate(&self, secret_key: &KemSecretKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = secret_key.as_bytes();
        if key.is_empty() {
            return Err(CryptoError::InvalidSecretKey);
        }
        if self.fail_decapsulate.load(Ordering::SeqCst) {
            return Err(CryptoError::DecapsulationFailed);
        }
        if ciphertext.len() < TAG_LEN || ciphertext[..TAG_LEN] != Self::tag(key) {
            return Err(CryptoError::DecapsulationFailed);
        }
        Ok(Self::xor(key, &ciphertext[TAG_LEN..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let kem = MockKem::new();
        let pair = kem.generate_keypair().unwrap();

        let ct = kem.encapsulate(&pair.public, b"hello").unwrap();
        assert_ne!(&ct[TAG_LEN..], b"hello");
        assert_eq!(kem.decapsulate(&pair.secret, &ct).unwrap(), b"hello");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let kem = MockKem::new();
        let alice = MockKem::keypair_from_seed("alice");
        let bob = MockKem::keypair_from_seed("bob");

        let ct = kem.encapsulate(&alice.public, b"for alice").unwrap();
        assert_eq!(
            kem.decapsulate(&bob.secret, &ct),
            Err(CryptoError::DecapsulationFailed)
        );
    }

    #[test]
    fn test_seeded_keys_are_deterministic() {
        let a = MockKem::keypair_from_seed("alice");
        let b = MockKem::keypair_from_seed("alice");
        assert_eq!(a.public, b.public);
        assert_ne!(a.public, MockKem::keypair_from_seed("bob").public);
    }

    #[test]
    fn test_generated_keys_distinct() {
        let kem = MockKem::new();
        let a = kem.generate_keypair().unwrap();
        let b = kem.generate_keypair().unwrap();
        assert_ne!(a.public, b.public);
    }

    #[test]
    fn test_failing_keygen() {
        let kem = MockKem::failing_keygen();
        assert!(matches!(
            kem.generate_keypair(),
            Err(CryptoError::KeyGenerationFailed(_))
        ));
    }

    #[test]
    fn test_failing_decapsulate() {
        let kem = MockKem::failing_decapsulate();
        let pair = kem.generate_keypair().unwrap();
        let ct = kem.encapsulate(&pair.public, b"hello").unwrap();

        assert_eq!(
            kem.decapsulate(&pair.secret, &ct),
            Err(CryptoError::DecapsulationFailed)
        );
    }
}
