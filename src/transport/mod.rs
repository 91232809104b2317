//! WebSocket transport
//!
//! - `server`: accept loop and per-connection tasks of the relay
//! - `websocket`: peer-side client used by the CLI and integration tests
//!
//! Frames are JSON text messages (see [`crate::protocol`]). The transport
//! only moves frames; the handshake and relay logic decide what they mean.

use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::error::RelayError;

pub mod server;
pub mod websocket;

pub use server::RelayServer;
pub use websocket::{ReceivedMessage, RelayClient, ServerHello};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The relay rejected a frame
    #[error("Relay rejected frame ({code}): {message}")]
    Rejected {
        /// Error code from the relay
        code: String,
        /// Detail from the relay
        message: String,
    },

    /// Operation needs a completed key exchange
    #[error("Key exchange has not completed")]
    NoSession,

    /// Local cryptography failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Listener could not be bound
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The relay could not be assembled
    #[error("Startup failed: {0}")]
    Startup(#[from] RelayError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
