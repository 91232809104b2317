//! Tetra CLI tool
//!
//! A peer for the relay: generates key pairs and chats through a relay
//! from the terminal.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tetra_relay::transport::TransportError;
use tetra_relay::{KemKeyPair, KemProvider, KemPublicKey, KemSecretKey, RelayClient, SealedBoxKem};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Tetra: chat through a re-encrypting relay
#[derive(Parser)]
#[command(name = "tetra-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key pair
    Keygen {
        /// Write the key pair to this file instead of printing the public key only
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing key file
        #[arg(short, long)]
        force: bool,
    },

    /// Connect to a relay and chat; each stdin line is one message
    Chat {
        /// Relay URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8765")]
        url: String,

        /// Key file from `keygen` (a fresh key pair is used otherwise)
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Expected server signing key (hex)
        #[arg(long)]
        pin: Option<String>,
    },
}

/// On-disk key pair
#[derive(Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    public_key: String,
    secret_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let provider = Arc::new(SealedBoxKem::new());

    match cli.command {
        Commands::Keygen { output, force } => cmd_keygen(provider.as_ref(), output.as_deref(), force),
        Commands::Chat { url, key, pin } => cmd_chat(provider, &url, key.as_deref(), pin).await,
    }
}

fn cmd_keygen(provider: &dyn KemProvider, output: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let keypair = provider.generate_keypair()?;

    if let Some(path) = output {
        if path.exists() && !force {
            bail!("{} already exists, use --force to overwrite", path.display());
        }
        let file = KeyFile {
            algorithm: provider.algorithm().to_string(),
            public_key: keypair.public.to_base64(),
            secret_key: BASE64.encode(keypair.secret.as_bytes()),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Key pair saved to {}", path.display());
    }

    println!("Public key ({}):", provider.algorithm());
    println!("{}", keypair.public.to_base64());
    println!("Fingerprint: {}", keypair.public.fingerprint());
    Ok(())
}

fn load_keypair(provider: &dyn KemProvider, path: &Path) -> anyhow::Result<KemKeyPair> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: KeyFile = serde_json::from_str(&content).context("invalid key file")?;
    if file.algorithm != provider.algorithm() {
        bail!(
            "key file is for {}, relay client uses {}",
            file.algorithm,
            provider.algorithm()
        );
    }

    let public = provider.parse_public_key(&KemPublicKey::decode_base64(&file.public_key)?)?;
    let secret = BASE64
        .decode(file.secret_key.trim())
        .context("secret_key is not base64")?;
    let secret = KemSecretKey::from_bytes(secret);
    Ok(KemKeyPair { public, secret })
}

async fn cmd_chat(
    provider: Arc<SealedBoxKem>,
    url: &str,
    key: Option<&Path>,
    pin: Option<String>,
) -> anyhow::Result<()> {
    let pinned = pin
        .map(|p| hex::decode(p.trim()))
        .transpose()
        .context("--pin must be hex")?;

    let mut client = match key {
        Some(path) => {
            let keypair = load_keypair(provider.as_ref(), path)?;
            RelayClient::connect_with_keys(url, provider, keypair).await?
        }
        None => RelayClient::connect(url, provider).await?,
    };

    let hello = client.key_exchange().await?;
    match hello.verify(pinned.as_deref()) {
        Ok(()) => println!("Server signature verified"),
        Err(e) if pinned.is_some() => bail!("server identity check failed: {}", e),
        Err(e) => println!("Warning: {}", e),
    }

    println!("=== Tetra Chat ===");
    println!("Server:      {}", hello.server_id);
    println!("Server key:  {}", hello.public_key.fingerprint());
    if let Some(signing_key) = &hello.signing_key {
        println!("Signing key: {}", hex::encode(signing_key));
    }
    println!("You are:     {}", hello.peer_id);
    println!();
    println!("Type a message and press enter. /quit to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                client.send(line.as_bytes()).await?;
            }

            received = client.recv() => match received {
                Ok(msg) => {
                    let sender = msg.sender.get(..8).unwrap_or(&msg.sender);
                    println!("[{}] {}", sender, String::from_utf8_lossy(&msg.plaintext));
                }
                Err(TransportError::Rejected { code, message }) => {
                    println!("Relay error ({}): {}", code, message);
                }
                Err(TransportError::Disconnected) => {
                    println!("Relay closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    client.close().await?;
    println!("Goodbye!");
    Ok(())
}
