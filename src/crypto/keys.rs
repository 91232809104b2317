//! Key material handed out by a [`KemProvider`](super::KemProvider)
//!
//! Keys are opaque byte strings; only the provider that produced them knows
//! their internal structure.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};
use super::hash::Hash;

/// A public key for key encapsulation
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KemPublicKey(Vec<u8>);

impl KemPublicKey {
    /// Wrap raw bytes without validation
    ///
    /// Providers validate through [`KemProvider::parse_public_key`](super::KemProvider::parse_public_key).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        KemPublicKey(bytes.into())
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode for the wire
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Decode from the wire
    pub fn decode_base64(s: &str) -> CryptoResult<Vec<u8>> {
        BASE64
            .decode(s.trim())
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Short fingerprint for logs
    pub fn fingerprint(&self) -> String {
        Hash::fingerprint(&self.0)
    }
}

impl std::fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemPublicKey({})", self.fingerprint())
    }
}

/// A secret key for decapsulation
///
/// Wiped from memory on drop. Never serialized and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KemSecretKey(Vec<u8>);

impl KemSecretKey {
    /// Wrap raw secret bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        KemSecretKey(bytes.into())
    }

    /// Get raw bytes (be careful with this!)
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for KemSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KemSecretKey([REDACTED])")
    }
}

/// A key encapsulation key pair
#[derive(Clone, Debug)]
pub struct KemKeyPair {
    /// Shareable half
    pub public: KemPublicKey,
    /// Secret half
    pub secret: KemSecretKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_debug_is_redacted() {
        let secret = KemSecretKey::from_bytes(vec![0xAB; 32]);
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("ab"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_public_key_base64() {
        let key = KemPublicKey::from_bytes(vec![1, 2, 3, 4]);
        let decoded = KemPublicKey::decode_base64(&key.to_base64()).unwrap();
        assert_eq!(decoded, key.as_bytes());
        assert_eq!(
            KemPublicKey::decode_base64("not base64!"),
            Err(CryptoError::InvalidPublicKey)
        );
    }
}
