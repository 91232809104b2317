//! X25519 sealed-box key encapsulation
//!
//! Each encapsulation generates a fresh ephemeral X25519 key pair, performs
//! ECDH against the recipient's public key and derives a ChaCha20-Poly1305
//! key bound to both public keys.
//!
//! Ciphertext layout: `ephemeral_public(32) || nonce(12) || ciphertext || tag(16)`

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use super::cipher::{Cipher, NONCE_SIZE, TAG_SIZE};
use super::error::{CryptoError, CryptoResult};
use super::hash::Hash;
use super::keys::{KemKeyPair, KemPublicKey, KemSecretKey};
use super::KemProvider;

/// Size of an X25519 key in bytes
pub const X25519_KEY_SIZE: usize = 32;

const KDF_CONTEXT: &str = "tetra-relay 2024 sealed-box v1";

/// Default KEM provider backed by X25519 and ChaCha20-Poly1305
#[derive(Debug, Default, Clone, Copy)]
pub struct SealedBoxKem;

impl SealedBoxKem {
    /// Create the provider
    pub fn new() -> Self {
        SealedBoxKem
    }

    fn public_array(bytes: &[u8]) -> CryptoResult<[u8; X25519_KEY_SIZE]> {
        bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: X25519_KEY_SIZE,
                actual: bytes.len(),
            })
    }

    fn derive_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let mut material = Zeroizing::new([0u8; 96]);
        material[..32].copy_from_slice(shared);
        material[32..64].copy_from_slice(ephemeral);
        material[64..].copy_from_slice(recipient);
        Zeroizing::new(Hash::derive_key(KDF_CONTEXT, &material[..]))
    }
}

impl KemProvider for SealedBoxKem {
    fn algorithm(&self) -> &str {
        "X25519-ChaCha20Poly1305"
    }

    fn standard(&self) -> &str {
        "RFC7748+RFC8439"
    }

    fn generate_keypair(&self) -> CryptoResult<KemKeyPair> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);

        Ok(KemKeyPair {
            public: KemPublicKey::from_bytes(public.to_bytes().to_vec()),
            secret: KemSecretKey::from_bytes(secret.to_bytes().to_vec()),
        })
    }

    fn parse_public_key(&self, bytes: &[u8]) -> CryptoResult<KemPublicKey> {
        let arr = Self::public_array(bytes)?;
        // The all-zero point yields an all-zero shared secret
        if arr == [0u8; X25519_KEY_SIZE] {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(KemPublicKey::from_bytes(arr.to_vec()))
    }

    fn encapsulate(&self, public_key: &KemPublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let recipient = Self::public_array(public_key.as_bytes())?;

        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519Public::from(&ephemeral).to_bytes();
        let shared = ephemeral.diffie_hellman(&X25519Public::from(recipient));

        let key = Self::derive_key(shared.as_bytes(), &ephemeral_public, &recipient);
        let sealed = Cipher::encrypt_with_aad(&key, plaintext, &ephemeral_public)?;

        let mut out = Vec::with_capacity(X25519_KEY_SIZE + sealed.len());
        out.extend_from_slice(&ephemeral_public);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decapsulate(&self, secret_key: &KemSecretKey, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < X25519_KEY_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecapsulationFailed);
        }

        let secret_bytes: [u8; X25519_KEY_SIZE] = secret_key
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        let secret = StaticSecret::from(secret_bytes);
        let recipient = X25519Public::from(&secret).to_bytes();

        let (ephemeral_public, sealed) = ciphertext.split_at(X25519_KEY_SIZE);
        let ephemeral_public = Self::public_array(ephemeral_public)?;
        let shared = secret.diffie_hellman(&X25519Public::from(ephemeral_public));

        let key = Self::derive_key(shared.as_bytes(), &ephemeral_public, &recipient);
        Cipher::decrypt_with_aad(&key, sealed, &ephemeral_public)
    }
}
