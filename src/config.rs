//! Runtime configuration
//!
//! Loaded from a YAML file. Every field has a default, so a missing file gives
//! a working in-memory setup with the control socket and bridge disabled.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default location of the config file
pub const CONFIG_FILE: &str = "config/solace.yaml";
/// Environment variable overriding `CONFIG_FILE`
pub const CONFIG_ENV: &str = "SOLACE_CONFIG";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    /// Deadline for every individual store call
    pub request_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            url: "sqlite://data/punishments.db".to_string(),
            max_connections: 5,
            request_timeout_ms: 2_000,
            acquire_timeout_ms: 3_000,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_prefix: "actions".to_string(),
        }
    }
}

/// One entry appended to disconnect screens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppealLink {
    /// Fallback label when `name` is blank
    pub key: String,
    pub name: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub enabled: bool,
    /// Environment variable holding the bot token
    pub token_env: String,
    /// Channel receiving the action log, if any
    pub log_channel_id: Option<u64>,
    pub default_tempban: String,
    pub default_tempmute: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_env: "DISCORD_TOKEN".to_string(),
            log_channel_id: None,
            default_tempban: "1d".to_string(),
            default_tempmute: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a half-composed punishment waits for input
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_seconds: 60 }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    /// YAML message overrides
    pub messages: PathBuf,
    pub appeal_links: Vec<AppealLink>,
    pub socket: SocketConfig,
    pub bridge: BridgeConfig,
    pub sessions: SessionConfig,
    /// Queue depth between the engine and the main loop
    pub effect_queue: usize,
    pub effect_ack_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            messages: PathBuf::from("config/messages.yaml"),
            appeal_links: Vec::new(),
            socket: SocketConfig::default(),
            bridge: BridgeConfig::default(),
            sessions: SessionConfig::default(),
            effect_queue: 256,
            effect_ack_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Path from `SOLACE_CONFIG`, falling back to `CONFIG_FILE`
    #[must_use]
    pub fn path_from_env() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from)
    }

    /// Load from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read, parsed or
    /// validated.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_yaml(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Yaml` for malformed input.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Write the config back out, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if serialization or the write fails.
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let yaml = serde_yaml::to_string(self)?;
        tokio::fs::write(path, yaml).await?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Reject values the rest of the system cannot work with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }
        if self.storage.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "storage.request_timeout_ms must be positive".to_string(),
            ));
        }
        for (field, text) in [
            ("bridge.default_tempban", &self.bridge.default_tempban),
            ("bridge.default_tempmute", &self.bridge.default_tempmute),
        ] {
            crate::clock::parse(text)
                .map_err(|e| ConfigError::Invalid(format!("{field}: {e}")))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn effect_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.effect_ack_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r"
storage:
  backend: memory
  request_timeout_ms: 500
appeal_links:
  - key: discord
    name: Discord
    link: https://discord.gg/example
socket:
  enabled: true
";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.request_timeout(), Duration::from_millis(500));
        assert_eq!(config.storage.max_connections, 5);
        assert!(config.socket.enabled);
        assert_eq!(config.socket.bind, "127.0.0.1:8787");
        assert_eq!(config.appeal_links.len(), 1);
        assert_eq!(config.bridge.default_tempban, "1d");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.storage.max_connections = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.bridge.default_tempmute = "soon".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bridge.default_tempmute"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("solace.yaml");

        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.save(&path).await.unwrap();

        let loaded = Config::load(&path).await.unwrap();
        assert_eq!(loaded, config);

        let missing = Config::load(&dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(missing, Config::default());
    }
}
