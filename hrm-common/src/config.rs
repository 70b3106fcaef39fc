//! Configuration loading and config file resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every field has a
//! built-in default, so a missing file is not an error: the service starts
//! with defaults and logs a warning.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `HRM_CONFIG` environment variable
//! 3. `~/.config/hrm/config.toml`
//! 4. `/etc/hrm/config.toml`
//! 5. Compiled defaults (fallback)
//!
//! After loading, a few environment variables override file values:
//! `FIREBASE_DATABASE_URL`, `FIREBASE_AUTH_TOKEN` and `HRM_PORT`.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HRM_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// HTTP server port
    pub port: u16,

    /// Address the HTTP server binds to
    pub bind_address: String,

    /// Backing store selection and paths
    pub store: StoreConfig,

    /// Live readings relay tuning
    pub relay: RelayConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: "0.0.0.0".to_string(),
            store: StoreConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

/// Which backing store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process tree; data is lost on restart
    Memory,
    /// Firebase Realtime Database over its REST API
    Firebase,
}

/// Backing store configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database root URL, e.g. `https://project-default-rtdb.firebaseio.com`
    pub database_url: Option<String>,

    /// Database secret or ID token sent as the `auth` query parameter
    pub auth_token: Option<String>,

    /// Collection holding heart-rate readings
    pub readings_path: String,

    /// Node holding the measurement pause/resume state
    pub control_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            auth_token: None,
            readings_path: "heartrate".to_string(),
            control_path: "measurement_control".to_string(),
        }
    }
}

/// Live readings relay configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Readings replayed to a new stream session
    pub replay_count: usize,

    /// Per-subscriber buffer; slow subscribers lose the oldest events
    pub channel_capacity: usize,

    /// Interval between SSE keep-alive comments
    pub keep_alive_secs: u64,

    /// Attempts at fetching the replay before falling back to an empty replay
    pub replay_retries: u32,

    /// Initial delay between replay attempts (doubles each attempt)
    pub replay_backoff_ms: u64,

    /// Upper bound on the change-feed reconnect delay
    pub reconnect_max_backoff_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            replay_count: 10,
            channel_capacity: 256,
            keep_alive_secs: 15,
            replay_retries: 3,
            replay_backoff_ms: 200,
            reconnect_max_backoff_secs: 30,
        }
    }
}

impl RelayConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn replay_backoff(&self) -> Duration {
        Duration::from_millis(self.replay_backoff_ms)
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_backoff_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Read and parse a config file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FIREBASE_DATABASE_URL") {
            if !url.trim().is_empty() {
                self.store.database_url = Some(url.trim().to_string());
            }
        }
        if let Ok(token) = std::env::var("FIREBASE_AUTH_TOKEN") {
            if !token.trim().is_empty() {
                self.store.auth_token = Some(token.trim().to_string());
            }
        }
        if let Ok(port) = std::env::var("HRM_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid HRM_PORT value '{}'", port),
            }
        }
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.relay.replay_count == 0 {
            return Err(Error::Config("relay.replay_count must be positive".to_string()));
        }
        if self.relay.channel_capacity == 0 {
            return Err(Error::Config("relay.channel_capacity must be positive".to_string()));
        }
        if self.relay.keep_alive_secs == 0 {
            return Err(Error::Config("relay.keep_alive_secs must be positive".to_string()));
        }
        if self.store.readings_path.trim_matches('/').is_empty() {
            return Err(Error::Config("store.readings_path must not be empty".to_string()));
        }
        if self.store.backend == StoreBackend::Firebase && self.store.database_url.is_none() {
            return Err(Error::Config(
                "store.database_url (or FIREBASE_DATABASE_URL) is required for the firebase backend"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolves which config file to read
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Explicitly requested path (CLI argument or environment variable)
    fn explicit_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }
        std::env::var(CONFIG_ENV_VAR)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }

    /// First existing file in the platform search locations
    fn default_path() -> Option<PathBuf> {
        let user_config = dirs::config_dir().map(|d| d.join("hrm").join("config.toml"));
        let system_config = PathBuf::from("/etc/hrm/config.toml");

        user_config
            .into_iter()
            .chain(std::iter::once(system_config))
            .find(|path| path.exists())
    }

    /// Load and validate configuration
    pub fn load(&self) -> Result<TomlConfig> {
        let config = self.resolve()?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration following the resolution priority, unvalidated
    ///
    /// An explicitly requested file must exist; otherwise a missing file
    /// falls back to compiled defaults. Environment overrides are applied.
    pub fn resolve(&self) -> Result<TomlConfig> {
        let mut config = match self.explicit_path() {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                info!("Loading configuration from {}", path.display());
                TomlConfig::load_file(&path)?
            }
            None => match Self::default_path() {
                Some(path) => {
                    info!("Loading configuration from {}", path.display());
                    TomlConfig::load_file(&path)?
                }
                None => {
                    warn!("No config file found, using built-in defaults");
                    TomlConfig::default()
                }
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.readings_path, "heartrate");
        assert_eq!(config.relay.replay_count, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            port = 9100

            [relay]
            replay_count = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.relay.replay_count, 5);
        assert_eq!(config.relay.channel_capacity, 256);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_firebase_backend_requires_url() {
        let mut config = TomlConfig::from_toml_str("[store]\nbackend = \"firebase\"").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.store.database_url = Some("https://example.firebaseio.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = TomlConfig::from_toml_str("[relay]\nchannel_capacity = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_keep_alive_rejected() {
        let config = TomlConfig::from_toml_str("[relay]\nkeep_alive_secs = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            TomlConfig::from_toml_str("port = \"not a number\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_relay_durations() {
        let relay = RelayConfig::default();
        assert_eq!(relay.keep_alive_interval(), Duration::from_secs(15));
        assert_eq!(relay.replay_backoff(), Duration::from_millis(200));
        assert_eq!(relay.reconnect_max_backoff(), Duration::from_secs(30));
    }
}
