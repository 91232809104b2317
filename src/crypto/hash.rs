//! BLAKE3 hashing and key derivation

/// Size of a hash output in bytes
pub const HASH_SIZE: usize = 32;

/// A hash output
pub type HashOutput = [u8; HASH_SIZE];

/// Hashing and key derivation operations
pub struct Hash;

impl Hash {
    /// Compute hash of data
    pub fn hash(data: &[u8]) -> HashOutput {
        blake3::hash(data).into()
    }

    /// Derive a 32-byte key from arbitrary-length input material
    ///
    /// The context must uniquely name the purpose of the derived key.
    pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
        blake3::derive_key(context, material)
    }

    /// Short printable fingerprint of a public key, safe to log
    pub fn fingerprint(data: &[u8]) -> String {
        hex::encode(&Self::hash(data)[..8])
    }
}
