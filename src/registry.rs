//! Directory of connected, key-exchanged peers
//!
//! The registry is the only mutable state shared between connection tasks.
//! Every read and write goes through one `RwLock`; readers receive copies,
//! never references into the map. Entries live in memory only and vanish
//! when the process exits.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::crypto::KemPublicKey;
use crate::error::{DeliveryError, RelayError, RelayResult};
use crate::protocol::ServerFrame;

/// Server-assigned identity of one connection
///
/// Random, unique for the lifetime of the process, never reused across
/// reconnects.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u128);

impl PeerId {
    /// Assign a fresh identity at accept time
    pub fn generate() -> Self {
        PeerId(rand::random())
    }

    /// Build from a raw value
    pub fn from_raw(raw: u128) -> Self {
        PeerId(raw)
    }

    /// Parse the hex form produced by `Display`
    pub fn parse(s: &str) -> Option<Self> {
        u128::from_str_radix(s, 16).ok().map(PeerId)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({:08x})", (self.0 >> 96) as u32)
    }
}

/// Sending half of a connection's bounded outbound queue
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<ServerFrame>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the connection task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle { tx }, rx)
    }

    /// Queue a frame for the connection
    ///
    /// Waits at most `timeout` for queue space so one slow peer cannot hold
    /// up the rest of a fan-out.
    pub async fn deliver(&self, frame: ServerFrame, timeout: Duration) -> Result<(), DeliveryError> {
        self.tx
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A registered peer
#[derive(Clone, Debug)]
pub struct Peer {
    /// Connection identity
    pub id: PeerId,
    /// Key the peer registered during key exchange
    pub public_key: KemPublicKey,
    /// When key exchange completed
    pub registered_at: SystemTime,
    /// Where relayed frames go
    pub handle: ConnectionHandle,
}

/// Concurrency-safe peer directory
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer
    ///
    /// The first key exchange wins: registering an identity that is already
    /// present fails with [`RelayError::AlreadyRegistered`] and leaves the
    /// stored key untouched.
    pub async fn register(
        &self,
        id: PeerId,
        public_key: KemPublicKey,
        handle: ConnectionHandle,
    ) -> RelayResult<()> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }

        let fingerprint = public_key.fingerprint();
        peers.insert(
            id,
            Peer {
                id,
                public_key,
                registered_at: SystemTime::now(),
                handle,
            },
        );
        let count = peers.len();
        drop(peers);

        info!(peer = %id, key = %fingerprint, peers = count, "Peer registered");
        Ok(())
    }

    /// Remove a peer; a no-op if it is not present
    ///
    /// Returns whether an entry was removed.
    pub async fn unregister(&self, id: PeerId) -> bool {
        let removed = self.peers.write().await.remove(&id).is_some();
        if removed {
            info!(peer = %id, "Peer unregistered");
        } else {
            debug!(peer = %id, "Unregister of unknown peer ignored");
        }
        removed
    }

    /// Point-in-time copy of every registered peer
    pub async fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Whether `id` has completed key exchange
    pub async fn contains(&self, id: PeerId) -> bool {
        self.peers.read().await.contains_key(&id)
    }

    /// Registered public key of `id`
    pub async fn public_key(&self, id: PeerId) -> Option<KemPublicKey> {
        self.peers.read().await.get(&id).map(|p| p.public_key.clone())
    }

    /// Number of registered peers
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peer is registered
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn key(seed: u8) -> KemPublicKey {
        KemPublicKey::from_bytes(vec![seed; 16])
    }

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let registry = PeerRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let id = PeerId::generate();

        registry.register(id, key(1), handle).await.unwrap();

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].public_key, key(1));
        assert!(registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = PeerRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let id = PeerId::generate();

        registry.register(id, key(1), handle.clone()).await.unwrap();
        let err = registry.register(id, key(2), handle).await.unwrap_err();

        assert_eq!(err, RelayError::AlreadyRegistered(id));
        assert_eq!(registry.public_key(id).await, Some(key(1)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = PeerRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let keep = PeerId::generate();
        let gone = PeerId::generate();

        registry.register(keep, key(1), handle.clone()).await.unwrap();
        registry.register(gone, key(2), handle).await.unwrap();

        assert!(registry.unregister(gone).await);
        let once: Vec<PeerId> = registry.snapshot().await.iter().map(|p| p.id).collect();

        assert!(!registry.unregister(gone).await);
        let twice: Vec<PeerId> = registry.snapshot().await.iter().map(|p| p.id).collect();

        assert_eq!(once, twice);
        assert_eq!(once, vec![keep]);
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let registry = PeerRegistry::new();
        assert!(!registry.unregister(PeerId::generate()).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = PeerRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let id = PeerId::generate();
        registry.register(id, key(1), handle).await.unwrap();

        let snapshot = registry.snapshot().await;
        registry.unregister(id).await;

        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration() {
        let registry = Arc::new(PeerRegistry::new());
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();

        for i in 0..64u8 {
            let (handle, rx) = ConnectionHandle::channel(1);
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let id = PeerId::from_raw(i as u128 + 1);
                registry.register(id, key(i), handle).await.map(|_| id)
            }));
        }

        let mut expected = HashSet::new();
        for task in tasks {
            expected.insert(task.await.unwrap().unwrap());
        }

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 64);
        let seen: HashSet<PeerId> = snapshot.iter().map(|p| p.id).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_deliver_to_closed_handle() {
        let (handle, rx) = ConnectionHandle::channel(1);
        drop(rx);

        let result = handle
            .deliver(ServerFrame::error("x", "y"), Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(DeliveryError::Closed));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_deliver_times_out_on_full_queue() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        handle
            .deliver(ServerFrame::error("a", "b"), Duration::from_millis(10))
            .await
            .unwrap();

        let result = handle
            .deliver(ServerFrame::error("c", "d"), Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(DeliveryError::Timeout));
    }

    #[test]
    fn test_peer_id_display_parse() {
        let id = PeerId::generate();
        assert_eq!(PeerId::parse(&id.to_string()), Some(id));
        assert_eq!(PeerId::parse("zz"), None);
    }
}
