//! Relay server: accept loop and per-connection tasks
//!
//! Every accepted connection gets a reader (this module's receive loop, which
//! also runs the fan-out for that peer's messages) and a separate writer task
//! that owns the socket's sending half. The writer keeps draining the
//! connection's outbound queue while the reader is busy relaying, so two
//! peers sending to each other never wait on one another.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use super::TransportResult;
use crate::config::RelayConfig;
use crate::crypto::{Ed25519Signer, KemProvider};
use crate::error::RelayError;
use crate::handshake::ConnectionHandshake;
use crate::identity::ServerIdentity;
use crate::protocol::ServerFrame;
use crate::registry::{ConnectionHandle, PeerId, PeerRegistry};
use crate::relay::MessageRelay;

/// Capacity of the reader-to-writer queue for direct replies
const REPLY_QUEUE: usize = 16;

/// Upper bound on the WebSocket upgrade
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing connection may take to flush its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-connection limits taken from [`RelayConfig`]
#[derive(Clone, Copy, Debug)]
struct ConnectionLimits {
    outbound_queue: usize,
    max_frame_bytes: usize,
    idle_timeout: Option<Duration>,
}

impl ConnectionLimits {
    /// Oversized frames are refused by the WebSocket layer before buffering
    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_frame_bytes);
        config.max_frame_size = Some(self.max_frame_bytes);
        config
    }
}

/// A bound relay server
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<MessageRelay>,
    limits: ConnectionLimits,
    status_interval: Option<Duration>,
}

impl RelayServer {
    /// Generate and self-test the server identity, then bind the listener
    ///
    /// Fails if the configuration is invalid, the provider cannot generate
    /// working keys, or the address cannot be bound. The relay must not start
    /// in any of those cases.
    pub async fn bind(config: RelayConfig, provider: Arc<dyn KemProvider>) -> TransportResult<Self> {
        config.validate()?;

        let mut identity = ServerIdentity::initialize(provider.as_ref())?;
        if config.sign_handshake {
            identity = identity.with_signer(Arc::new(Ed25519Signer::generate()));
        }
        identity.self_test(provider.as_ref())?;

        let relay = Arc::new(MessageRelay::new(
            Arc::new(identity),
            Arc::new(PeerRegistry::new()),
            provider,
            config.delivery_timeout(),
        ));

        let listener = TcpListener::bind(config.listen_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            algorithm = relay.provider().algorithm(),
            "Relay listening"
        );

        Ok(RelayServer {
            listener,
            relay,
            limits: ConnectionLimits {
                outbound_queue: config.outbound_queue,
                max_frame_bytes: config.max_frame_bytes,
                idle_timeout: config.idle_timeout(),
            },
            status_interval: config.status_interval(),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared relay core
    pub fn relay(&self) -> Arc<MessageRelay> {
        self.relay.clone()
    }

    /// Serve until the process exits
    pub async fn run(self) -> TransportResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then close every connection
    ///
    /// Returns once every connection task has finished and unregistered its
    /// peer.
    pub async fn run_until<F>(self, shutdown: F) -> TransportResult<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        let mut status = self
            .status_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            self.relay.clone(),
                            self.limits,
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        // e.g. fd exhaustion
                        error!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = next_tick(&mut status) => {
                    let snapshot = self.relay.status().await;
                    info!(
                        peers = snapshot.peers,
                        connections = connections.len(),
                        server_id = %snapshot.server_id,
                        key = %snapshot.key_fingerprint,
                        "Relay status"
                    );
                }
            }
        }

        let _ = stop_tx.send(true);
        debug!(remaining = connections.len(), "Waiting for connections to close");
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                error!("Connection task failed: {}", e);
            }
        }
        Ok(())
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    relay: Arc<MessageRelay>,
    limits: ConnectionLimits,
    mut stop: watch::Receiver<bool>,
) {
    let accept = accept_async_with_config(stream, Some(limits.websocket_config()));
    let ws_stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake timed out for {}", addr);
            return;
        }
    };

    let (write, mut read) = ws_stream.split();
    let (handle, outbound) = ConnectionHandle::channel(limits.outbound_queue);
    let (replies, reply_rx) = mpsc::channel(REPLY_QUEUE);
    let id = PeerId::generate();
    let mut writer = tokio::spawn(write_frames(id, write, reply_rx, outbound));
    let mut conn = ConnectionHandshake::new(id, handle, relay);
    let mut last_inbound = Instant::now();

    info!(peer = %id, %addr, "New connection");

    loop {
        let deadline = limits.idle_timeout.map(|timeout| last_inbound + timeout);
        let idle = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            msg = read.next() => {
                last_inbound = Instant::now();
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => match conn.handle_text(&text).await {
                        Ok(reply) => reply,
                        Err(e) => rejection(id, &e),
                    },

                    Some(Ok(Message::Binary(_))) => rejection(
                        id,
                        &RelayError::Protocol("binary frames are not supported".into()),
                    ),

                    Some(Ok(Message::Close(_))) | None => {
                        debug!(peer = %id, "Peer closed connection");
                        break;
                    }

                    Some(Err(WsError::Capacity(e))) => {
                        let e = RelayError::Protocol(format!("frame refused: {e}"));
                        if let Some(frame) = rejection(id, &e) {
                            let _ = replies.send(frame).await;
                        }
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(peer = %id, "WebSocket error: {}", e);
                        break;
                    }

                    // Pings are answered by the WebSocket layer
                    Some(Ok(_)) => None,
                };

                if let Some(frame) = reply {
                    if replies.send(frame).await.is_err() {
                        break;
                    }
                }
            }

            _ = idle => {
                info!(peer = %id, "Closing idle connection");
                break;
            }

            _ = stop.changed() => break,

            _ = replies.closed() => {
                debug!(peer = %id, "Writer stopped");
                break;
            }
        }
    }

    // Unregister before the socket goes away so no new fan-out targets it
    conn.close().await;
    drop(replies);
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Write direct replies and relayed frames to one peer
///
/// Relayed frames are held back until the key exchange reply has been
/// written, so a peer always sees its reply first.
async fn write_frames<S>(
    id: PeerId,
    mut sink: S,
    mut replies: mpsc::Receiver<ServerFrame>,
    mut outbound: mpsc::Receiver<ServerFrame>,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut registered = false;

    loop {
        let frame = tokio::select! {
            biased;
            frame = replies.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            Some(frame) = outbound.recv(), if registered => frame,
        };

        registered |= matches!(frame, ServerFrame::KeyExchange(_));
        if let Err(e) = send_frame(&mut sink, &frame).await {
            debug!(peer = %id, "Write failed: {}", e);
            break;
        }
    }

    outbound.close();
    let _ = sink.send(Message::Close(None)).await;
}

/// Log a rejected frame and build the notice for the peer, if any
fn rejection(id: PeerId, e: &RelayError) -> Option<ServerFrame> {
    match e {
        RelayError::Decryption(_) => {
            warn!(peer = %id, "Dropping message: {}", e);
            None
        }
        _ => {
            warn!(peer = %id, "Frame rejected: {}", e);
            e.notify_peer()
                .then(|| ServerFrame::error(e.code(), &e.to_string()))
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &ServerFrame) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match frame.to_json() {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            error!("Failed to encode frame: {}", e);
            Ok(())
        }
    }
}
