//! Configuration management for the Fleetmux server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/fleetmux/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("listen_addr is not a valid socket address: {0}")]
    InvalidListenAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("connect_timeout_secs must be between 1 and 300, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("auth_timeout_secs must be between 1 and 300, got {0}")]
    InvalidAuthTimeout(u64),

    #[error("max_sessions_per_channel must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("inventory source \"file\" requires a path")]
    MissingInventoryPath,

    #[error("inventory source \"http\" requires a url")]
    MissingInventoryUrl,

    #[error("inventory url must start with http:// or https://, got {0}")]
    InvalidInventoryUrl(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Fleetmux server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General server configuration.
    pub server: ServerConfig,

    /// Remote session configuration.
    pub session: SessionConfig,

    /// Target inventory configuration.
    pub inventory: InventoryConfig,
}

/// General server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the control-connection listener binds to.
    pub listen_addr: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Remote session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for establishing the transport, in seconds.
    pub connect_timeout_secs: u64,

    /// Timeout for the authentication handshake, in seconds.
    pub auth_timeout_secs: u64,

    /// Maximum concurrently open sessions per control connection.
    pub max_sessions_per_channel: usize,

    /// Terminal type requested for the remote PTY.
    pub term: String,
}

/// Where the target inventory comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InventorySource {
    /// TOML inventory file on local disk.
    File,
    /// External inventory service over HTTP.
    Http,
}

/// Target inventory configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InventoryConfig {
    /// Inventory backend to use.
    pub source: InventorySource,

    /// Path to the inventory file (source = "file").
    pub path: Option<PathBuf>,

    /// Base URL of the inventory service (source = "http").
    pub url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7620".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            auth_timeout_secs: 15,
            max_sessions_per_channel: 32,
            term: "xterm-256color".to_string(),
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            source: InventorySource::File,
            path: Some(default_inventory_path()),
            url: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetmux")
        .join("config.toml")
}

/// Returns the default inventory file path.
fn default_inventory_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetmux")
        .join("inventory.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FLEETMUX_LISTEN_ADDR: Override the control listener address
    /// - FLEETMUX_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FLEETMUX_INVENTORY_URL: Override the inventory service URL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("FLEETMUX_LISTEN_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding listen_addr from environment: {}", addr);
                self.server.listen_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("FLEETMUX_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }

        if let Ok(url) = std::env::var("FLEETMUX_INVENTORY_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding inventory url from environment: {}", url);
                self.inventory.source = InventorySource::Http;
                self.inventory.url = Some(url);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(
                self.server.listen_addr.clone(),
            ));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        let connect = self.session.connect_timeout_secs;
        if !(1..=300).contains(&connect) {
            return Err(ConfigError::InvalidConnectTimeout(connect));
        }

        let auth = self.session.auth_timeout_secs;
        if !(1..=300).contains(&auth) {
            return Err(ConfigError::InvalidAuthTimeout(auth));
        }

        let max_sessions = self.session.max_sessions_per_channel;
        if !(1..=1000).contains(&max_sessions) {
            return Err(ConfigError::InvalidMaxSessions(max_sessions));
        }

        match self.inventory.source {
            InventorySource::File => {
                if self.inventory.path.is_none() {
                    return Err(ConfigError::MissingInventoryPath);
                }
            }
            InventorySource::Http => match &self.inventory.url {
                None => return Err(ConfigError::MissingInventoryUrl),
                Some(url) => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        return Err(ConfigError::InvalidInventoryUrl(url.clone()));
                    }
                }
            },
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.listen_addr, "127.0.0.1:7620");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.session.connect_timeout_secs, 15);
        assert_eq!(config.session.auth_timeout_secs, 15);
        assert_eq!(config.session.max_sessions_per_channel, 32);
        assert_eq!(config.session.term, "xterm-256color");
        assert_eq!(config.inventory.source, InventorySource::File);
        assert!(config.inventory.path.is_some());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
log_level = "debug"

[session]
max_sessions_per_channel = 5
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.session.max_sessions_per_channel, 5);
        // Other values should be defaults
        assert_eq!(config.server.listen_addr, "127.0.0.1:7620");
        assert_eq!(config.session.connect_timeout_secs, 15);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
listen_addr = "0.0.0.0:9000"
log_level = "trace"

[session]
connect_timeout_secs = 30
auth_timeout_secs = 20
max_sessions_per_channel = 64
term = "xterm"

[inventory]
source = "http"
url = "https://inventory.internal.example.com"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.session.connect_timeout_secs, 30);
        assert_eq!(config.session.auth_timeout_secs, 20);
        assert_eq!(config.session.max_sessions_per_channel, 64);
        assert_eq!(config.session.term, "xterm");
        assert_eq!(config.inventory.source, InventorySource::Http);
        assert_eq!(
            config.inventory.url.as_deref(),
            Some("https://inventory.internal.example.com")
        );
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
log_level = "debug"
"#;
        let result = Config::from_toml(toml);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[session]
max_sessions_per_channel = "not a number"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let original = Config::default();
        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.server.log_level = "warn".to_string();
        original.session.max_sessions_per_channel = 42;
        original.inventory.source = InventorySource::Http;
        original.inventory.url = Some("http://localhost:8080".to_string());

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.server.log_level = "debug".to_string();
        original.session.connect_timeout_secs = 25;

        original.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir
            .path()
            .join("nested")
            .join("dirs")
            .join("config.toml");

        let config = Config::default();
        config.save(&config_path).unwrap();

        assert!(config_path.exists());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid [ toml").unwrap();

        let result = Config::load(&config_path);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_validate_listen_addr_invalid() {
        let mut config = Config::default();
        config.server.listen_addr = "not-an-address".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr("not-an-address".to_string()))
        );
    }

    #[test]
    fn test_validate_log_level_invalid() {
        let mut config = Config::default();
        config.server.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();

        config.server.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.server.log_level = "Info".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_connect_timeout_bounds() {
        let mut config = Config::default();

        config.session.connect_timeout_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConnectTimeout(0))
        );

        config.session.connect_timeout_secs = 301;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConnectTimeout(301))
        );

        config.session.connect_timeout_secs = 1;
        assert!(config.validate().is_ok());

        config.session.connect_timeout_secs = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_auth_timeout_bounds() {
        let mut config = Config::default();

        config.session.auth_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidAuthTimeout(0)));

        config.session.auth_timeout_secs = 500;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidAuthTimeout(500))
        );
    }

    #[test]
    fn test_validate_max_sessions_bounds() {
        let mut config = Config::default();

        config.session.max_sessions_per_channel = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSessions(0)));

        config.session.max_sessions_per_channel = 1001;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxSessions(1001))
        );

        config.session.max_sessions_per_channel = 1;
        assert!(config.validate().is_ok());

        config.session.max_sessions_per_channel = 1000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_file_inventory_requires_path() {
        let mut config = Config::default();
        config.inventory.source = InventorySource::File;
        config.inventory.path = None;
        assert_eq!(config.validate(), Err(ConfigError::MissingInventoryPath));
    }

    #[test]
    fn test_validate_http_inventory_requires_url() {
        let mut config = Config::default();
        config.inventory.source = InventorySource::Http;
        config.inventory.url = None;
        assert_eq!(config.validate(), Err(ConfigError::MissingInventoryUrl));
    }

    #[test]
    fn test_validate_http_inventory_url_scheme() {
        let mut config = Config::default();
        config.inventory.source = InventorySource::Http;
        config.inventory.url = Some("ftp://inventory".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidInventoryUrl("ftp://inventory".to_string()))
        );

        config.inventory.url = Some("http://inventory:8080".to_string());
        assert!(config.validate().is_ok());

        config.inventory.url = Some("https://inventory".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_listen_addr() {
        std::env::set_var("FLEETMUX_LISTEN_ADDR", "0.0.0.0:7777");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.listen_addr, "0.0.0.0:7777");

        std::env::remove_var("FLEETMUX_LISTEN_ADDR");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var("FLEETMUX_LISTEN_ADDR");
        std::env::set_var("FLEETMUX_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.log_level, "debug");

        std::env::remove_var("FLEETMUX_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_inventory_url_switches_source() {
        std::env::set_var("FLEETMUX_INVENTORY_URL", "https://inv.example.com");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.inventory.source, InventorySource::Http);
        assert_eq!(
            config.inventory.url.as_deref(),
            Some("https://inv.example.com")
        );

        std::env::remove_var("FLEETMUX_INVENTORY_URL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("FLEETMUX_LOG_LEVEL", "");

        let mut config = Config::default();
        let original_level = config.server.log_level.clone();

        config.apply_env_overrides();

        assert_eq!(config.server.log_level, original_level);

        std::env::remove_var("FLEETMUX_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        std::env::remove_var("FLEETMUX_LISTEN_ADDR");
        std::env::remove_var("FLEETMUX_LOG_LEVEL");
        std::env::remove_var("FLEETMUX_INVENTORY_URL");

        let mut config = Config::default();
        let original = config.clone();

        config.apply_env_overrides();

        assert_eq!(config, original);
    }
}
