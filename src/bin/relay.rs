//! Tetra Relay Server
//!
//! A WebSocket relay that re-encrypts each message for every other peer.
//! The server provides:
//! - Key exchange with a signed server identity
//! - Per-recipient re-encryption and fan-out
//! - Isolation of slow or failing peers
//!
//! Usage:
//!   tetra-relay [--port 8765] [--host 0.0.0.0] [--config relay.toml]

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tetra_relay::{RelayConfig, RelayServer, SealedBoxKem};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tetra Relay Server
#[derive(Parser)]
#[command(name = "tetra-relay")]
#[command(version, about = "WebSocket relay with per-peer re-encryption")]
struct Args {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not sign the key exchange reply
    #[arg(long)]
    no_sign: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("tetra_relay=info"))
        .context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = RelayConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(host) = args.host {
        config.listen_addr = SocketAddr::new(host, config.listen_addr.port());
    }
    if let Some(port) = args.port {
        config.listen_addr.set_port(port);
    }
    if args.no_sign {
        config.sign_handshake = false;
    }

    let server = RelayServer::bind(config, Arc::new(SealedBoxKem::new()))
        .await
        .context("relay failed to start")?;
    info!(
        "Tetra Relay listening on ws://{}",
        server.local_addr().context("reading bound address")?
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}
