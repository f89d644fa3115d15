//! Configuration loading from `~/.relaynet/config.toml` with defaults.
//!
//! Every field has a default, so an empty or missing file yields a usable
//! [`NetworkConfig`]. [`load_config`] never fails: read and parse errors are
//! logged and the defaults are used. [`try_load_config`] surfaces them.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Default number of dial attempts before `Host::open` gives up.
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 5;

/// Default fixed delay between dial attempts.
pub const DEFAULT_DIAL_DELAY_MS: u64 = 1_000;

/// Default upper bound on a single frame (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Which structured encoder handles shapes without their own binary form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteKind {
    /// MessagePack with named struct fields.
    #[default]
    #[serde(alias = "messagepack")]
    Msgpack,
    /// JSON.
    Json,
}

/// Outbound dial behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    /// Total connection attempts, including the first.
    pub max_attempts: u32,
    /// Fixed wait between two attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DIAL_ATTEMPTS,
            retry_delay_ms: DEFAULT_DIAL_DELAY_MS,
        }
    }
}

/// Top-level configuration for a relaynet host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local identity reported by `Host::name`.
    pub name: String,
    /// Address `relaynet listen` binds when no `--bind` is given.
    pub listen_addr: String,
    /// Largest accepted frame body, in bytes.
    pub max_message_size: u32,
    /// Fallback encoder for shapes registered on the suite path.
    pub suite: SuiteKind,
    /// Dial retry settings.
    pub dial: DialConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: format!("relaynet-{}", uuid::Uuid::new_v4().simple()),
            listen_addr: "127.0.0.1:7400".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            suite: SuiteKind::default(),
            dial: DialConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Reject values the networking layer cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.dial.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "dial.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_size".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Default config location: `~/.relaynet/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".relaynet"))
        .unwrap_or_else(|| PathBuf::from(".relaynet"))
        .join("config.toml")
}

/// Load configuration, surfacing every failure.
///
/// A missing file is not an error and yields the defaults.
pub fn try_load_config(path: Option<&Path>) -> ConfigResult<NetworkConfig> {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return Ok(NetworkConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    let config: NetworkConfig =
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.clone(),
            source,
        })?;
    config.validate()?;

    info!(path = %config_path.display(), "Loaded configuration");
    Ok(config)
}

/// Load configuration from a TOML file, with defaults.
///
/// Falls back to [`NetworkConfig::default`] on any error.
pub fn load_config(path: Option<&Path>) -> NetworkConfig {
    match try_load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            NetworkConfig::default()
        }
    }
}
