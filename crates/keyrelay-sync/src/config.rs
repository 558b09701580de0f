//! # Relay Configuration
//!
//! Configuration management for both node roles.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KEYRELAY_ROLE=companion                                            │
//! │     KEYRELAY_BUS_HOST=192.168.1.20                                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/keyrelay/relay.toml (Linux)                              │
//! │     ~/Library/Application Support/com.keyrelay.keyrelay/relay.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     terminal role, localhost:9999, generated client id                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # relay.toml
//! [node]
//! role = "terminal"       # terminal | companion
//! client_id = "keyrelay-desk"
//!
//! [bus]
//! host = "192.168.1.20"
//! port = 9999
//! keep_alive_secs = 60
//!
//! [store]
//! path = "/home/ayse/.local/share/keyrelay/passwords.json"
//!
//! [topics]
//! request_flag = "pc-to-rpi-flag"
//!
//! [sync]
//! pull_timeout_secs = 120  # 0 waits forever
//! ```

use std::path::PathBuf;
use std::time::Duration;

use keyrelay_core::{NodeRole, TopicMap, DEFAULT_BUS_PORT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Node Configuration
// =============================================================================

/// Identity of this process on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which side of the handshake this process plays.
    #[serde(default)]
    pub role: NodeRole,

    /// MQTT client id. Must be unique per broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("keyrelay-{}", &id[..8])
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            role: NodeRole::default(),
            client_id: default_client_id(),
        }
    }
}

// =============================================================================
// Bus Settings
// =============================================================================

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Broker host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT keep-alive interval (seconds).
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// QoS for every publish and subscription (0, 1 or 2).
    #[serde(default)]
    pub qos: u8,

    /// Largest packet accepted in either direction (bytes).
    #[serde(default = "default_max_packet")]
    pub max_packet_bytes: usize,

    /// Capacity of the outgoing request queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Initial backoff duration (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    DEFAULT_BUS_PORT
}
fn default_keep_alive() -> u64 {
    60
}
fn default_max_packet() -> usize {
    1024 * 1024
}
fn default_queue_capacity() -> usize {
    64
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for BusSettings {
    fn default() -> Self {
        BusSettings {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive(),
            qos: 0,
            max_packet_bytes: default_max_packet(),
            queue_capacity: default_queue_capacity(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl BusSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Where the credential document lives on this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("com", "keyrelay", "keyrelay")
        .map(|dirs| dirs.data_dir().join("passwords.json"))
        .unwrap_or_else(|| PathBuf::from("passwords.json"))
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            path: default_store_path(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Handshake timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// How long a download waits for its response (seconds, 0 = forever).
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,

    /// Interval between controller timeout checks (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Interval between card reader polls on the companion (milliseconds).
    #[serde(default = "default_card_poll_interval")]
    pub card_poll_interval_ms: u64,
}

fn default_pull_timeout() -> u64 {
    120
}
fn default_tick_interval() -> u64 {
    1000
}
fn default_card_poll_interval() -> u64 {
    1000
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            pull_timeout_secs: default_pull_timeout(),
            tick_interval_ms: default_tick_interval(),
            card_poll_interval_ms: default_card_poll_interval(),
        }
    }
}

impl SyncSettings {
    /// Pull timeout, or `None` if downloads wait forever.
    pub fn pull_timeout(&self) -> Option<Duration> {
        (self.pull_timeout_secs > 0).then(|| Duration::from_secs(self.pull_timeout_secs))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn card_poll_interval(&self) -> Duration {
        Duration::from_millis(self.card_poll_interval_ms)
    }
}

// =============================================================================
// Main Relay Configuration
// =============================================================================

/// Complete relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub topics: TopicMap,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl RelayConfig {
    /// Creates a new config with defaults and a generated client id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (relay.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading relay config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load relay config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<PathBuf> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Relay config saved");
        Ok(path)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.node.client_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("node.client_id must not be empty".into()));
        }

        if self.bus.host.trim().is_empty() {
            return Err(SyncError::InvalidConfig("bus.host must not be empty".into()));
        }

        if self.bus.port == 0 {
            return Err(SyncError::InvalidConfig("bus.port must not be 0".into()));
        }

        // rumqttc rejects keep-alive intervals under five seconds
        if self.bus.keep_alive_secs < 5 {
            return Err(SyncError::InvalidConfig(format!(
                "bus.keep_alive_secs must be at least 5, got {}",
                self.bus.keep_alive_secs
            )));
        }

        if self.bus.qos > 2 {
            return Err(SyncError::InvalidConfig(format!(
                "bus.qos must be 0, 1 or 2, got {}",
                self.bus.qos
            )));
        }

        if self.bus.queue_capacity == 0 || self.bus.max_packet_bytes == 0 {
            return Err(SyncError::InvalidConfig(
                "bus.queue_capacity and bus.max_packet_bytes must be greater than 0".into(),
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("store.path must not be empty".into()));
        }

        if self.sync.tick_interval_ms == 0 || self.sync.card_poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync intervals must be greater than 0".into(),
            ));
        }

        self.topics.validate()?;

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(role) = std::env::var("KEYRELAY_ROLE") {
            match role.parse() {
                Ok(parsed) => {
                    debug!(role = %role, "Overriding node role from environment");
                    self.node.role = parsed;
                }
                Err(_) => warn!(role = %role, "Unknown node role in environment"),
            }
        }

        if let Ok(id) = std::env::var("KEYRELAY_CLIENT_ID") {
            self.node.client_id = id;
        }

        if let Ok(host) = std::env::var("KEYRELAY_BUS_HOST") {
            debug!(host = %host, "Overriding bus host from environment");
            self.bus.host = host;
        }

        if let Ok(port) = std::env::var("KEYRELAY_BUS_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding bus port from environment");
                self.bus.port = p;
            }
        }

        if let Ok(path) = std::env::var("KEYRELAY_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }

        if let Ok(secs) = std::env::var("KEYRELAY_PULL_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.sync.pull_timeout_secs = s;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "keyrelay", "keyrelay")
            .map(|dirs| dirs.config_dir().join("relay.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn role(&self) -> NodeRole {
        self.node.role
    }

    /// Returns `host:port` of the broker.
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.bus.host, self.bus.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.node.client_id.starts_with("keyrelay-"));
        assert_eq!(config.role(), NodeRole::Terminal);
        assert_eq!(config.bus.port, 9999);
        assert_eq!(config.sync.pull_timeout(), Some(Duration::from_secs(120)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RelayConfig::default();

        config.bus.host = String::new();
        assert!(config.validate().is_err());

        config.bus.host = "broker".to_string();
        config.bus.qos = 3;
        assert!(config.validate().is_err());

        config.bus.qos = 1;
        config.topics.pin = config.topics.presence.clone();
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_zero_pull_timeout_disables_it() {
        let settings = SyncSettings {
            pull_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(settings.pull_timeout(), None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [node]
            role = "companion"
            client_id = "rpi"

            [bus]
            host = "192.168.1.20"

            [topics]
            presence = "card"
            "#,
        )
        .unwrap();

        assert_eq!(config.role(), NodeRole::Companion);
        assert_eq!(config.broker_address(), "192.168.1.20:9999");
        assert_eq!(config.topics.presence, "card");
        assert_eq!(config.topics.pin, "pin");
        assert_eq!(config.sync.tick_interval_ms, 1000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/relay.toml");

        let mut config = RelayConfig::default();
        config.node.client_id = "desk".to_string();
        config.store.path = dir.path().join("passwords.json");
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[node]"));
        assert!(contents.contains("[topics]"));

        let loaded: RelayConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.node.client_id, "desk");
        assert_eq!(loaded.store.path, config.store.path);
    }

    #[test]
    fn test_load_or_default_on_broken_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[bus\nport = ").unwrap();

        assert!(RelayConfig::load(Some(path.clone())).is_err());
        let config = RelayConfig::load_or_default(Some(path));
        assert_eq!(config.bus.port, 9999);
    }
}
