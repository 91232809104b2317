//! Per-connection handshake state machine
//!
//! ```text
//! Connected --key_exchange--> KeyExchanged --message--> Active
//!     \______________________________\____________________\___--close--> Closed
//! ```
//!
//! A message before key exchange is rejected with `NotRegistered`. A second
//! key exchange on the same connection is rejected with `AlreadyRegistered`
//! and the original key stays in force.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};
use crate::protocol::{InboundFrame, ServerFrame};
use crate::registry::{ConnectionHandle, PeerId};
use crate::relay::{MessageRelay, RelayReport};

/// Where a connection is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// Accepted, no key yet
    Connected,
    /// Public key registered
    KeyExchanged,
    /// At least one message relayed
    Active,
    /// Disconnected; terminal
    Closed,
}

/// Drives one connection through the handshake and routes its messages
pub struct ConnectionHandshake {
    id: PeerId,
    state: HandshakeState,
    handle: ConnectionHandle,
    relay: Arc<MessageRelay>,
}

impl ConnectionHandshake {
    /// Start a connection in [`HandshakeState::Connected`]
    pub fn new(id: PeerId, handle: ConnectionHandle, relay: Arc<MessageRelay>) -> Self {
        ConnectionHandshake {
            id,
            state: HandshakeState::Connected,
            handle,
            relay,
        }
    }

    /// Identity assigned to this connection
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Parse and handle one text frame
    pub async fn handle_text(&mut self, text: &str) -> RelayResult<Option<ServerFrame>> {
        if self.state == HandshakeState::Closed {
            return Err(RelayError::Closed);
        }
        let frame = InboundFrame::parse(text)?;
        self.handle_frame(frame).await
    }

    /// Handle one decoded frame
    ///
    /// Returns the frame to send straight back to this peer, if any.
    pub async fn handle_frame(&mut self, frame: InboundFrame) -> RelayResult<Option<ServerFrame>> {
        match (self.state, frame) {
            (HandshakeState::Closed, _) => Err(RelayError::Closed),

            (HandshakeState::Connected, InboundFrame::KeyExchange { public_key }) => {
                self.key_exchange(&public_key).await.map(Some)
            }
            (_, InboundFrame::KeyExchange { .. }) => Err(RelayError::AlreadyRegistered(self.id)),

            (HandshakeState::Connected, InboundFrame::Message { .. }) => {
                Err(RelayError::NotRegistered(self.id))
            }
            (_, InboundFrame::Message { ciphertext, .. }) => {
                self.message(&ciphertext).await?;
                Ok(None)
            }
        }
    }

    async fn key_exchange(&mut self, public_key: &[u8]) -> RelayResult<ServerFrame> {
        let key = self
            .relay
            .provider()
            .parse_public_key(public_key)
            .map_err(|e| RelayError::Protocol(format!("invalid public key: {e}")))?;

        self.relay
            .registry()
            .register(self.id, key, self.handle.clone())
            .await?;
        self.state = HandshakeState::KeyExchanged;

        let identity = self.relay.identity();
        let signed = identity.signed_public_key();
        Ok(ServerFrame::key_exchange(
            identity.public_key().as_bytes(),
            identity.server_id(),
            &self.id.to_string(),
            signed
                .as_ref()
                .map(|(sig, key)| (sig.as_slice(), key.as_slice())),
        ))
    }

    async fn message(&mut self, ciphertext: &[u8]) -> RelayResult<RelayReport> {
        let report = self.relay.relay(self.id, ciphertext).await?;
        if self.state == HandshakeState::KeyExchanged {
            debug!(peer = %self.id, "Connection active");
            self.state = HandshakeState::Active;
        }
        Ok(report)
    }

    /// Move to [`HandshakeState::Closed`] and drop the registry entry
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == HandshakeState::Closed {
            return;
        }
        self.relay.registry().unregister(self.id).await;
        info!(peer = %self.id, from = ?self.state, "Connection closed");
        self.state = HandshakeState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signature::verify_detached;
    use crate::crypto::{Ed25519Signer, KemProvider, MockKem};
    use crate::identity::ServerIdentity;
    use crate::protocol::decode_payload;
    use crate::registry::PeerRegistry;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn relay(kem: &Arc<MockKem>) -> Arc<MessageRelay> {
        let identity = ServerIdentity::initialize(kem.as_ref())
            .unwrap()
            .with_signer(Arc::new(Ed25519Signer::generate()));
        Arc::new(MessageRelay::new(
            Arc::new(identity),
            Arc::new(PeerRegistry::new()),
            kem.clone(),
            Duration::from_millis(50),
        ))
    }

    fn connect(relay: &Arc<MessageRelay>) -> (ConnectionHandshake, mpsc::Receiver<ServerFrame>) {
        let (handle, rx) = ConnectionHandle::channel(8);
        (
            ConnectionHandshake::new(PeerId::generate(), handle, relay.clone()),
            rx,
        )
    }

    fn key_exchange(seed: &str) -> InboundFrame {
        InboundFrame::KeyExchange {
            public_key: MockKem::keypair_from_seed(seed).public.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_key_exchange_reply() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut conn, _rx) = connect(&relay);

        let reply = conn.handle_frame(key_exchange("alice")).await.unwrap();
        let ServerFrame::KeyExchange(reply) = reply.unwrap() else {
            panic!("expected key exchange reply");
        };

        assert_eq!(conn.state(), HandshakeState::KeyExchanged);
        assert_eq!(reply.kind, "key_exchange");
        assert_eq!(reply.server_id, relay.identity().server_id());
        assert_eq!(reply.peer_id, conn.id().to_string());
        assert_eq!(
            decode_payload(&reply.public_key).unwrap(),
            relay.identity().public_key().as_bytes()
        );
        assert!(relay.registry().contains(conn.id()).await);

        let signature = decode_payload(reply.signature.as_deref().unwrap()).unwrap();
        let signing_key = decode_payload(reply.signing_key.as_deref().unwrap()).unwrap();
        let server_key = relay.identity().public_key().as_bytes();
        assert!(verify_detached(&signing_key, server_key, &signature).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_key_stays_connected() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut conn, _rx) = connect(&relay);

        let err = conn
            .handle_frame(InboundFrame::KeyExchange {
                public_key: vec![1, 2, 3],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Protocol(_)));
        assert_eq!(conn.state(), HandshakeState::Connected);
        assert!(relay.registry().is_empty().await);

        conn.handle_frame(key_exchange("alice")).await.unwrap();
        assert_eq!(conn.state(), HandshakeState::KeyExchanged);
    }

    #[tokio::test]
    async fn test_message_before_key_exchange_rejected() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut bob, mut bob_rx) = connect(&relay);
        bob.handle_frame(key_exchange("bob")).await.unwrap();

        let (mut carol, _carol_rx) = connect(&relay);
        let ciphertext = kem
            .encapsulate(relay.identity().public_key(), b"hi")
            .unwrap();
        let err = carol
            .handle_frame(InboundFrame::Message {
                sender: Some("carol".into()),
                ciphertext,
            })
            .await
            .unwrap_err();

        assert_eq!(err, RelayError::NotRegistered(carol.id()));
        assert_eq!(carol.state(), HandshakeState::Connected);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_key_exchange_rejected() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut conn, _rx) = connect(&relay);

        conn.handle_frame(key_exchange("alice")).await.unwrap();
        let err = conn.handle_frame(key_exchange("mallory")).await.unwrap_err();

        assert_eq!(err, RelayError::AlreadyRegistered(conn.id()));
        assert_eq!(
            relay.registry().public_key(conn.id()).await,
            Some(MockKem::keypair_from_seed("alice").public)
        );
    }

    #[tokio::test]
    async fn test_first_message_activates() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut alice, _alice_rx) = connect(&relay);
        let (mut bob, mut bob_rx) = connect(&relay);
        alice.handle_text(&InboundFrame::key_exchange_json(
            MockKem::keypair_from_seed("alice").public.as_bytes(),
        ))
        .await
        .unwrap();
        bob.handle_frame(key_exchange("bob")).await.unwrap();

        let ciphertext = kem
            .encapsulate(relay.identity().public_key(), b"hello")
            .unwrap();
        let reply = alice
            .handle_text(&InboundFrame::message_json("alice", &ciphertext))
            .await
            .unwrap();

        assert!(reply.is_none());
        assert_eq!(alice.state(), HandshakeState::Active);
        assert!(matches!(bob_rx.try_recv(), Ok(ServerFrame::Relayed(_))));
    }

    #[tokio::test]
    async fn test_undecryptable_message_keeps_state() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut alice, _rx) = connect(&relay);
        alice.handle_frame(key_exchange("alice")).await.unwrap();

        let err = alice
            .handle_frame(InboundFrame::Message {
                sender: None,
                ciphertext: b"garbage".to_vec(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Decryption(_)));
        assert_eq!(alice.state(), HandshakeState::KeyExchanged);
    }

    #[tokio::test]
    async fn test_close_unregisters_and_is_terminal() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut conn, _rx) = connect(&relay);
        conn.handle_frame(key_exchange("alice")).await.unwrap();

        conn.close().await;
        conn.close().await;

        assert_eq!(conn.state(), HandshakeState::Closed);
        assert!(!relay.registry().contains(conn.id()).await);
        assert_eq!(
            conn.handle_frame(key_exchange("alice")).await.unwrap_err(),
            RelayError::Closed
        );
    }

    #[tokio::test]
    async fn test_close_before_key_exchange() {
        let kem = Arc::new(MockKem::new());
        let relay = relay(&kem);
        let (mut conn, _rx) = connect(&relay);

        conn.close().await;
        assert_eq!(conn.state(), HandshakeState::Closed);
        assert_eq!(conn.handle_text("{}").await.unwrap_err(), RelayError::Closed);
    }
}
