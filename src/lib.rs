//! # Tetra-Relay
//!
//! WebSocket relay that re-encrypts every message for each connected peer.
//!
//! ## Features
//!
//! - **Server-side re-encryption**: a message sealed for the server is
//!   opened once and sealed again for every other peer
//! - **Pluggable KEM** behind [`crypto::KemProvider`], so the post-quantum
//!   scheme can be swapped without touching the relay
//! - **Signed key exchange** with an Ed25519 server identity
//! - **Failure isolation**: a slow or broken peer never blocks delivery to
//!   the others
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tetra_relay::{RelayConfig, RelayServer, SealedBoxKem};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::load(None)?;
//! let server = RelayServer::bind(config, Arc::new(SealedBoxKem::new())).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              TRANSPORT LAYER                │
//! │    RelayServer (accept, per-conn tasks)     │
//! │    RelayClient (peer side)                  │
//! └─────────────────────┬───────────────────────┘
//!                       │  JSON text frames
//! ┌─────────────────────▼───────────────────────┐
//! │              PROTOCOL LAYER                 │
//! │  ConnectionHandshake | MessageRelay         │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               STATE LAYER                   │
//! │  ServerIdentity | PeerRegistry              │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │  KemProvider | X25519 | ChaCha20-Poly1305   │
//! │  BLAKE3 | Ed25519                           │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod transport;

// Re-export main types at crate root
pub use config::{ConfigError, RelayConfig};
pub use crypto::{
    CryptoError, CryptoResult, Ed25519Signer, KemKeyPair, KemProvider, KemPublicKey,
    KemSecretKey, MockKem, SealedBoxKem, SignatureProvider,
};
pub use error::{DeliveryError, RelayError, RelayResult};
pub use handshake::{ConnectionHandshake, HandshakeState};
pub use identity::ServerIdentity;
pub use registry::{ConnectionHandle, Peer, PeerId, PeerRegistry};
pub use relay::{MessageRelay, RelayReport, RelayStatus};
pub use transport::{RelayClient, RelayServer, TransportError, TransportResult};
