//! Fan-out of one inbound message to every other registered peer
//!
//! The inbound ciphertext is opened once with the server key, then sealed
//! separately under each recipient's key and queued on that recipient's
//! connection. Recipients are handled concurrently and independently: a
//! failure for one never prevents delivery to the others.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{CryptoError, KemProvider};
use crate::error::{DeliveryError, RelayError, RelayResult};
use crate::identity::ServerIdentity;
use crate::protocol::ServerFrame;
use crate::registry::{Peer, PeerId, PeerRegistry};

/// Outcome of one relay call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Peers in the snapshot other than the sender
    pub recipients: usize,
    /// Copies successfully queued
    pub delivered: usize,
    /// Recipients that were not reached
    pub failures: Vec<(PeerId, DeliveryError)>,
}

/// Point-in-time view of the relay for status logging
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayStatus {
    /// Registered peers
    pub peers: usize,
    /// Server identifier
    pub server_id: String,
    /// Fingerprint of the server public key
    pub key_fingerprint: String,
}

/// The relay core shared by all connections
pub struct MessageRelay {
    identity: Arc<ServerIdentity>,
    registry: Arc<PeerRegistry>,
    provider: Arc<dyn KemProvider>,
    delivery_timeout: Duration,
}

impl MessageRelay {
    /// Assemble the relay from its collaborators
    pub fn new(
        identity: Arc<ServerIdentity>,
        registry: Arc<PeerRegistry>,
        provider: Arc<dyn KemProvider>,
        delivery_timeout: Duration,
    ) -> Self {
        MessageRelay {
            identity,
            registry,
            provider,
            delivery_timeout,
        }
    }

    /// Server identity
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Peer directory
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Cryptography provider
    pub fn provider(&self) -> &dyn KemProvider {
        self.provider.as_ref()
    }

    /// Current peer count and server key
    pub async fn status(&self) -> RelayStatus {
        RelayStatus {
            peers: self.registry.len().await,
            server_id: self.identity.server_id().to_string(),
            key_fingerprint: self.identity.public_key().fingerprint(),
        }
    }

    /// Relay `ciphertext` from `sender` to every other registered peer
    ///
    /// Fails only when the sender is unregistered or the ciphertext does not
    /// open under the server key; per-recipient problems are reported in the
    /// returned [`RelayReport`].
    pub async fn relay(&self, sender: PeerId, ciphertext: &[u8]) -> RelayResult<RelayReport> {
        if !self.registry.contains(sender).await {
            return Err(RelayError::NotRegistered(sender));
        }

        let plaintext = Arc::new(self.open(ciphertext.to_vec()).await?);

        let recipients: Vec<Peer> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|peer| peer.id != sender)
            .collect();

        if recipients.is_empty() {
            debug!(sender = %sender, "No recipients for message");
            return Ok(RelayReport::default());
        }

        let count = recipients.len();
        let results = join_all(
            recipients
                .into_iter()
                .map(|peer| self.deliver(sender, peer, plaintext.clone())),
        )
        .await;

        let mut report = RelayReport {
            recipients: count,
            ..RelayReport::default()
        };
        for (peer, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(source) => {
                    warn!(sender = %sender, "{}", RelayError::Delivery { peer, source: source.clone() });
                    report.failures.push((peer, source));
                }
            }
        }

        debug!(
            sender = %sender,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Message relayed"
        );
        Ok(report)
    }

    /// Decapsulate with the server key on the blocking pool
    async fn open(&self, ciphertext: Vec<u8>) -> RelayResult<Zeroizing<Vec<u8>>> {
        let identity = self.identity.clone();
        let provider = self.provider.clone();

        tokio::task::spawn_blocking(move || {
            provider
                .decapsulate(identity.secret_key(), &ciphertext)
                .map(Zeroizing::new)
        })
        .await
        .map_err(|_| RelayError::Decryption(CryptoError::DecapsulationFailed))?
        .map_err(RelayError::Decryption)
    }

    /// Seal for one recipient and queue on its connection
    async fn deliver(
        &self,
        sender: PeerId,
        peer: Peer,
        plaintext: Arc<Zeroizing<Vec<u8>>>,
    ) -> (PeerId, Result<(), DeliveryError>) {
        let provider = self.provider.clone();
        let public_key = peer.public_key.clone();

        let sealed = tokio::task::spawn_blocking(move || {
            provider.encapsulate(&public_key, plaintext.as_slice())
        })
        .await
        .unwrap_or_else(|e| Err(CryptoError::EncapsulationFailed(e.to_string())));

        let ciphertext = match sealed {
            Ok(ciphertext) => ciphertext,
            Err(e) => return (peer.id, Err(DeliveryError::Encryption(e))),
        };

        let frame = ServerFrame::relayed(
            &sender.to_string(),
            &ciphertext,
            self.provider.algorithm(),
            self.provider.standard(),
        );
        (peer.id, peer.handle.deliver(frame, self.delivery_timeout).await)
    }
}

impl std::fmt::Debug for MessageRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRelay")
            .field("identity", &self.identity)
            .field("algorithm", &self.provider.algorithm())
            .field("delivery_timeout", &self.delivery_timeout)
            .finish()
    }
}
