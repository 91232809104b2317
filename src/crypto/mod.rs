//! Cryptography capabilities consumed by the relay
//!
//! The relay never calls a concrete algorithm directly. It holds a
//! [`KemProvider`] for key encapsulation and, optionally, a
//! [`SignatureProvider`] for signing its handshake reply. This module ships:
//! - `sealed`: X25519 + ChaCha20-Poly1305 sealed-box KEM (default provider)
//! - `mock`: deterministic KEM for tests
//! - `signature`: Ed25519 signing identity
//! - `cipher` / `hash`: AEAD and BLAKE3 building blocks

pub mod cipher;
pub mod error;
pub mod hash;
pub mod keys;
pub mod mock;
pub mod sealed;
pub mod signature;

pub use error::{CryptoError, CryptoResult};
pub use hash::Hash;
pub use keys::{KemKeyPair, KemPublicKey, KemSecretKey};
pub use mock::MockKem;
pub use sealed::SealedBoxKem;
pub use signature::Ed25519Signer;

/// Key encapsulation capability
///
/// Implementations must be safe to call from many connection tasks at once.
/// Calls are synchronous and may be CPU-bound; the relay runs them on the
/// blocking pool.
pub trait KemProvider: Send + Sync {
    /// Algorithm tag reported in relayed envelopes (`pqc_algorithm`)
    fn algorithm(&self) -> &str;

    /// Standard the algorithm conforms to (`standard`)
    fn standard(&self) -> &str;

    /// Generate a fresh key pair
    fn generate_keypair(&self) -> CryptoResult<KemKeyPair>;

    /// Check that `bytes` is a well-formed public key for this provider
    fn parse_public_key(&self, bytes: &[u8]) -> CryptoResult<KemPublicKey>;

    /// Encrypt `plaintext` so only the holder of the matching secret key can open it
    fn encapsulate(&self, public_key: &KemPublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Open a ciphertext produced by [`encapsulate`](Self::encapsulate)
    fn decapsulate(&self, secret_key: &KemSecretKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// Signing capability
pub trait SignatureProvider: Send + Sync {
    /// Algorithm name
    fn algorithm(&self) -> &str;

    /// Public verifying key
    fn verifying_key(&self) -> Vec<u8>;

    /// Sign a message
    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// Verify `signature` over `message` under an arbitrary verifying key
    fn verify(&self, verifying_key: &[u8], message: &[u8], signature: &[u8]) -> CryptoResult<()>;
}
