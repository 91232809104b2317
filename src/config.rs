//! Relay configuration
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file, then
//! environment variables. Command-line flags are applied on top by the
//! binary.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a TOML config file
pub const CONFIG_ENV: &str = "TETRA_RELAY_CONFIG";

/// Environment variable overriding the listen address
pub const LISTEN_ADDR_ENV: &str = "TETRA_RELAY_LISTEN_ADDR";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid TOML for this schema
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: SocketAddr,
    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,
    /// How long a fan-out waits for space in one recipient's queue
    pub delivery_timeout_ms: u64,
    /// Close connections silent for this long; 0 disables
    pub idle_timeout_secs: u64,
    /// Largest accepted inbound text frame
    pub max_frame_bytes: usize,
    /// Sign the key exchange reply with an Ed25519 identity
    pub sign_handshake: bool,
    /// Log a status line this often; 0 disables
    pub status_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            outbound_queue: 64,
            delivery_timeout_ms: 2_000,
            idle_timeout_secs: 300,
            max_frame_bytes: 1024 * 1024,
            sign_handshake: true,
            status_interval_secs: 60,
        }
    }
}

impl RelayConfig {
    /// Defaults, then `path` (or `$TETRA_RELAY_CONFIG`), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_ENV).ok();
        let path = path.or(env_path.as_deref().map(Path::new));

        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };

        if let Ok(addr) = std::env::var(LISTEN_ADDR_ENV) {
            config.listen_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("{LISTEN_ADDR_ENV}: {e}")))?;
        }

        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue == 0 {
            return Err(ConfigError::Invalid("outbound_queue must be > 0".to_string()));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "delivery_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be > 0".to_string()));
        }
        Ok(())
    }

    /// Delivery timeout as a `Duration`
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Status logging interval, if enabled
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }

    /// Idle timeout, if enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr.port(), 8765);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(2));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.status_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_status_interval_zero_disables() {
        let config = RelayConfig::from_toml("status_interval_secs = 0").unwrap();
        assert_eq!(config.status_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RelayConfig::from_toml(
            r#"
            listen_addr = "127.0.0.1:9000"
            idle_timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.outbound_queue, 64);
        assert!(config.sign_handshake);
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(matches!(
            RelayConfig::from_toml("listen_addr = 12"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        for config in [
            RelayConfig {
                outbound_queue: 0,
                ..RelayConfig::default()
            },
            RelayConfig {
                delivery_timeout_ms: 0,
                ..RelayConfig::default()
            },
            RelayConfig {
                max_frame_bytes: 0,
                ..RelayConfig::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }
}
