//! WebSocket client for peers of the relay
//!
//! Performs the key exchange, seals outgoing messages for the server key and
//! opens relayed messages with the client's own key.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{TransportError, TransportResult};
use crate::crypto::signature::verify_detached;
use crate::crypto::{KemKeyPair, KemProvider, KemPublicKey};
use crate::protocol::{decode_payload, InboundFrame, KeyExchangeReply, ServerFrame};

/// What the relay told us in its key exchange reply
#[derive(Clone, Debug)]
pub struct ServerHello {
    /// Server KEM public key
    pub public_key: KemPublicKey,
    /// Server identifier
    pub server_id: String,
    /// Identity the server assigned to this connection
    pub peer_id: String,
    /// Ed25519 verifying key, if the reply was signed
    pub signing_key: Option<Vec<u8>>,
    signature: Option<Vec<u8>>,
}

impl ServerHello {
    fn from_reply(reply: KeyExchangeReply, provider: &dyn KemProvider) -> TransportResult<Self> {
        let decode = |field: &str, value: &str| {
            decode_payload(value)
                .map_err(|e| TransportError::InvalidData(format!("{field}: {e}")))
        };

        let key_bytes = decode("public_key", &reply.public_key)?;
        Ok(ServerHello {
            public_key: provider.parse_public_key(&key_bytes)?,
            server_id: reply.server_id,
            peer_id: reply.peer_id,
            signing_key: reply
                .signing_key
                .as_deref()
                .map(|v| decode("signing_key", v))
                .transpose()?,
            signature: reply
                .signature
                .as_deref()
                .map(|v| decode("signature", v))
                .transpose()?,
        })
    }

    /// Check the server's signature over its public key
    ///
    /// With `pinned` set, the signing key must also match it.
    pub fn verify(&self, pinned: Option<&[u8]>) -> TransportResult<()> {
        let (Some(signing_key), Some(signature)) = (&self.signing_key, &self.signature) else {
            return Err(TransportError::InvalidData("server hello is not signed".into()));
        };
        if pinned.is_some_and(|pinned| pinned != signing_key.as_slice()) {
            return Err(TransportError::InvalidData(
                "server signing key does not match pinned key".into(),
            ));
        }
        verify_detached(signing_key, self.public_key.as_bytes(), signature)?;
        Ok(())
    }
}

/// A relayed message opened with our key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Server-assigned identity of the sender
    pub sender: String,
    /// Decrypted content
    pub plaintext: Vec<u8>,
    /// Relay timestamp, ms since the Unix epoch
    pub timestamp: i64,
    /// Algorithm reported by the relay
    pub algorithm: String,
    /// Standard reported by the relay
    pub standard: String,
}

/// WebSocket client connected to a relay
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    provider: Arc<dyn KemProvider>,
    keypair: KemKeyPair,
    server: Option<ServerHello>,
}

impl RelayClient {
    /// Connect with a freshly generated key pair
    pub async fn connect(url: &str, provider: Arc<dyn KemProvider>) -> TransportResult<Self> {
        let keypair = provider.generate_keypair()?;
        Self::connect_with_keys(url, provider, keypair).await
    }

    /// Connect with an existing key pair
    pub async fn connect_with_keys(
        url: &str,
        provider: Arc<dyn KemProvider>,
        keypair: KemKeyPair,
    ) -> TransportResult<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(RelayClient {
            ws,
            provider,
            keypair,
            server: None,
        })
    }

    /// Our public key
    pub fn public_key(&self) -> &KemPublicKey {
        &self.keypair.public
    }

    /// Server details after a completed key exchange
    pub fn server(&self) -> Option<&ServerHello> {
        self.server.as_ref()
    }

    /// Register our public key and learn the server's
    pub async fn key_exchange(&mut self) -> TransportResult<ServerHello> {
        let frame = InboundFrame::key_exchange_json(self.keypair.public.as_bytes());
        self.send_text(frame).await?;

        match self.recv_frame().await? {
            ServerFrame::KeyExchange(reply) => {
                let hello = ServerHello::from_reply(reply, self.provider.as_ref())?;
                self.server = Some(hello.clone());
                Ok(hello)
            }
            ServerFrame::Error(e) => Err(TransportError::Rejected {
                code: e.code,
                message: e.message,
            }),
            ServerFrame::Relayed(_) => Err(TransportError::InvalidData(
                "relayed message before key exchange reply".into(),
            )),
        }
    }

    /// Seal `plaintext` for the server and send it
    pub async fn send(&mut self, plaintext: &[u8]) -> TransportResult<()> {
        let server = self.server.as_ref().ok_or(TransportError::NoSession)?;
        let ciphertext = self.provider.encapsulate(&server.public_key, plaintext)?;
        let sender = server.peer_id.clone();
        self.send_text(InboundFrame::message_json(&sender, &ciphertext))
            .await
    }

    /// Send a raw text frame
    pub async fn send_text(&mut self, text: String) -> TransportResult<()> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Wait for the next relayed message and open it
    ///
    /// Error frames from the relay surface as [`TransportError::Rejected`].
    pub async fn recv(&mut self) -> TransportResult<ReceivedMessage> {
        match self.recv_frame().await? {
            ServerFrame::Relayed(msg) => {
                let ciphertext = decode_payload(&msg.encrypted_content)
                    .map_err(|e| TransportError::InvalidData(e.to_string()))?;
                let plaintext = self.provider.decapsulate(&self.keypair.secret, &ciphertext)?;
                Ok(ReceivedMessage {
                    sender: msg.sender,
                    plaintext,
                    timestamp: msg.timestamp,
                    algorithm: msg.pqc_algorithm,
                    standard: msg.standard,
                })
            }
            ServerFrame::Error(e) => Err(TransportError::Rejected {
                code: e.code,
                message: e.message,
            }),
            ServerFrame::KeyExchange(_) => Err(TransportError::InvalidData(
                "unexpected key exchange reply".into(),
            )),
        }
    }

    /// Receive the next frame from the relay
    pub async fn recv_frame(&mut self) -> TransportResult<ServerFrame> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return ServerFrame::parse(&text)
                        .map_err(|e| TransportError::InvalidData(e.to_string()));
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Disconnected);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                // Pings are answered by the WebSocket layer
                _ => continue,
            }
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> TransportResult<()> {
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Signer, MockKem, SignatureProvider};

    fn hello(signer: Option<&Ed25519Signer>) -> ServerHello {
        let kem = MockKem::new();
        let server_key = MockKem::keypair_from_seed("server").public;
        let signed = signer.map(|s| (s.sign(server_key.as_bytes()), s.verifying_key()));
        let frame = ServerFrame::key_exchange(
            server_key.as_bytes(),
            "relay-test",
            "00ff",
            signed.as_ref().map(|(sig, key)| (sig.as_slice(), key.as_slice())),
        );
        let ServerFrame::KeyExchange(reply) = frame else {
            unreachable!()
        };
        ServerHello::from_reply(reply, &kem).unwrap()
    }

    #[test]
    fn test_signed_hello_verifies() {
        let signer = Ed25519Signer::generate();
        let hello = hello(Some(&signer));

        assert_eq!(hello.server_id, "relay-test");
        assert!(hello.verify(None).is_ok());
        assert!(hello.verify(Some(&signer.verifying_key())).is_ok());
    }

    #[test]
    fn test_pinned_key_mismatch() {
        let signer = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let hello = hello(Some(&signer));

        assert!(matches!(
            hello.verify(Some(&other.verifying_key())),
            Err(TransportError::InvalidData(_))
        ));
    }

    #[test]
    fn test_unsigned_hello() {
        assert!(hello(None).verify(None).is_err());
    }

    #[test]
    fn test_hello_rejects_bad_server_key() {
        let reply = KeyExchangeReply {
            kind: "key_exchange".into(),
            public_key: "AQID".into(),
            server_id: "relay-test".into(),
            peer_id: "00ff".into(),
            signature: None,
            signing_key: None,
        };
        assert!(matches!(
            ServerHello::from_reply(reply, &MockKem::new()),
            Err(TransportError::Crypto(_))
        ));
    }
}
