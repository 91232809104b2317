//! Relay error taxonomy

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::registry::PeerId;

/// Why a single recipient did not get its copy of a relayed message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient's connection is gone
    #[error("recipient connection closed")]
    Closed,

    /// The recipient's outbound queue stayed full for the whole delivery timeout
    #[error("recipient queue full, delivery timed out")]
    Timeout,

    /// Encapsulation under the recipient's key failed
    #[error("encapsulation for recipient failed: {0}")]
    Encryption(CryptoError),
}

/// Errors produced while serving connections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The server key pair could not be generated; the relay cannot start
    #[error("server key generation failed: {0}")]
    KeyGeneration(CryptoError),

    /// Malformed or out-of-order frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Message frame from a connection that has not completed key exchange
    #[error("peer {0} has not completed key exchange")]
    NotRegistered(PeerId),

    /// Second key exchange from an already registered connection
    #[error("peer {0} is already registered")]
    AlreadyRegistered(PeerId),

    /// Inbound ciphertext could not be opened with the server key
    #[error("could not decrypt message from peer: {0}")]
    Decryption(CryptoError),

    /// A single recipient could not be reached
    #[error("delivery to {peer} failed: {source}")]
    Delivery {
        /// Recipient
        peer: PeerId,
        /// Cause
        #[source]
        source: DeliveryError,
    },

    /// The connection has already been closed
    #[error("connection closed")]
    Closed,
}

impl RelayError {
    /// Whether this error must abort the relay process
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::KeyGeneration(_))
    }

    /// Short machine-readable code used in error frames
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::KeyGeneration(_) => "key_generation",
            RelayError::Protocol(_) => "protocol_error",
            RelayError::NotRegistered(_) => "not_registered",
            RelayError::AlreadyRegistered(_) => "already_registered",
            RelayError::Decryption(_) => "decryption_failed",
            RelayError::Delivery { .. } => "delivery_failed",
            RelayError::Closed => "closed",
        }
    }

    /// Whether the peer that caused this error is told about it
    ///
    /// Undecryptable messages are dropped silently.
    pub fn notify_peer(&self) -> bool {
        matches!(
            self,
            RelayError::Protocol(_) | RelayError::NotRegistered(_) | RelayError::AlreadyRegistered(_)
        )
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
