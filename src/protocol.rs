//! JSON wire frames
//!
//! ```text
//! peer  -> relay  { "type": "key_exchange", "public_key": b64 }
//! relay -> peer   { "type": "key_exchange", "public_key": b64, "server_id": str,
//!                   "peer_id": hex, "signature"?: b64, "signing_key"?: b64 }
//! peer  -> relay  { "sender": str, "encrypted_content": b64 }
//! relay -> peer   { "sender": hex, "encrypted_content": b64, "timestamp": ms,
//!                   "pqc_algorithm": str, "standard": str }
//! relay -> peer   { "type": "error", "code": str, "message": str }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

const KEY_EXCHANGE: &str = "key_exchange";
const MESSAGE: &str = "message";
const ERROR: &str = "error";

/// Frames a peer sends to the relay
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// Register the peer's public key
    KeyExchange {
        /// Decoded public key bytes, not yet validated by the provider
        public_key: Vec<u8>,
    },
    /// Application message sealed for the server key
    Message {
        /// Self-declared sender; informational only
        sender: Option<String>,
        /// Decoded ciphertext
        ciphertext: Vec<u8>,
    },
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: Option<String>,
    public_key: Option<String>,
    sender: Option<String>,
    encrypted_content: Option<String>,
}

impl InboundFrame {
    /// Parse a text frame
    ///
    /// Any shape or encoding problem is a [`RelayError::Protocol`].
    pub fn parse(text: &str) -> RelayResult<Self> {
        let raw: RawInbound = serde_json::from_str(text)
            .map_err(|e| RelayError::Protocol(format!("invalid JSON frame: {e}")))?;

        match raw.kind.as_deref() {
            Some(KEY_EXCHANGE) => {
                let encoded = raw
                    .public_key
                    .ok_or_else(|| RelayError::Protocol("key_exchange without public_key".into()))?;
                let public_key = decode_field("public_key", &encoded)?;
                if public_key.is_empty() {
                    return Err(RelayError::Protocol("empty public_key".into()));
                }
                Ok(InboundFrame::KeyExchange { public_key })
            }
            None | Some(MESSAGE) => {
                let encoded = raw.encrypted_content.ok_or_else(|| {
                    RelayError::Protocol("message frame without encrypted_content".into())
                })?;
                Ok(InboundFrame::Message {
                    sender: raw.sender,
                    ciphertext: decode_field("encrypted_content", &encoded)?,
                })
            }
            Some(other) => Err(RelayError::Protocol(format!("unknown frame type {other:?}"))),
        }
    }

    /// Encode a key exchange frame (client side)
    pub fn key_exchange_json(public_key: &[u8]) -> String {
        serde_json::json!({ "type": KEY_EXCHANGE, "public_key": BASE64.encode(public_key) })
            .to_string()
    }

    /// Encode a message frame (client side)
    pub fn message_json(sender: &str, ciphertext: &[u8]) -> String {
        serde_json::json!({ "sender": sender, "encrypted_content": BASE64.encode(ciphertext) })
            .to_string()
    }
}

fn decode_field(name: &str, value: &str) -> RelayResult<Vec<u8>> {
    BASE64
        .decode(value.trim())
        .map_err(|e| RelayError::Protocol(format!("{name} is not valid base64: {e}")))
}

/// Server reply to a successful key exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeReply {
    /// Always `"key_exchange"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Server KEM public key, base64
    pub public_key: String,
    /// Stable server identifier for this process
    pub server_id: String,
    /// Identity the server assigned to this connection
    pub peer_id: String,
    /// Signature over the raw server public key, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Verifying key for `signature`, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

/// A message re-encrypted for one recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    /// Server-assigned identity of the original sender
    pub sender: String,
    /// Ciphertext sealed for the recipient, base64
    pub encrypted_content: String,
    /// Relay time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Algorithm used to seal `encrypted_content`
    pub pqc_algorithm: String,
    /// Standard of that algorithm
    pub standard: String,
}

/// Rejection notice for a frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Always `"error"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Machine-readable code
    pub code: String,
    /// Human-readable detail
    pub message: String,
}

/// Frames the relay sends to a peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Key exchange reply
    KeyExchange(KeyExchangeReply),
    /// Relayed application message
    Relayed(RelayedMessage),
    /// Rejected frame
    Error(ErrorFrame),
}

impl ServerFrame {
    /// Build a key exchange reply
    pub fn key_exchange(
        public_key: &[u8],
        server_id: &str,
        peer_id: &str,
        signature: Option<(&[u8], &[u8])>,
    ) -> Self {
        let (signature, signing_key) = match signature {
            Some((sig, key)) => (Some(BASE64.encode(sig)), Some(BASE64.encode(key))),
            None => (None, None),
        };
        ServerFrame::KeyExchange(KeyExchangeReply {
            kind: KEY_EXCHANGE.to_string(),
            public_key: BASE64.encode(public_key),
            server_id: server_id.to_string(),
            peer_id: peer_id.to_string(),
            signature,
            signing_key,
        })
    }

    /// Build a relayed message stamped with the current time
    pub fn relayed(sender: &str, ciphertext: &[u8], algorithm: &str, standard: &str) -> Self {
        ServerFrame::Relayed(RelayedMessage {
            sender: sender.to_string(),
            encrypted_content: BASE64.encode(ciphertext),
            timestamp: now_millis(),
            pqc_algorithm: algorithm.to_string(),
            standard: standard.to_string(),
        })
    }

    /// Build an error frame
    pub fn error(code: &str, message: &str) -> Self {
        ServerFrame::Error(ErrorFrame {
            kind: ERROR.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        })
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a frame received from the relay
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Decode a base64 payload field from a server frame
pub fn decode_payload(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(value.trim())
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
