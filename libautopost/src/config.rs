//! Configuration management for Autopost

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: String,
}

/// Optional document-store mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_runs_collection")]
    pub runs_collection: String,
    #[serde(default = "default_rotation_collection")]
    pub rotation_collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Throttle between items
    #[serde(default = "default_item_delay", with = "humantime_serde")]
    pub item_delay: Duration,
    /// Polling granularity while a run is paused
    #[serde(default = "default_pause_poll", with = "humantime_serde")]
    pub pause_poll: Duration,
    /// How long `stop_and_wait` waits for the worker to exit
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
    /// First backoff after a transient publish failure; doubles per attempt
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            item_delay: default_item_delay(),
            pause_poll: default_pause_poll(),
            stop_timeout: default_stop_timeout(),
            publish_attempts: default_publish_attempts(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_runs_collection() -> String {
    "automation_runs".to_string()
}

fn default_rotation_collection() -> String {
    "author_rotation".to_string()
}

fn default_item_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_pause_poll() -> Duration {
    Duration::from_millis(500)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_publish_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            store: StoreConfig {
                path: "~/.local/share/autopost/runs.db".to_string(),
            },
            remote: None,
            processor: ProcessorConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("AUTOPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("autopost").join("config.toml"))
}

/// Expand `~` in the configured store path
pub fn resolve_store_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
