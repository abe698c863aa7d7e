//! Configuration management for VolWare
//!
//! This module provides:
//! - The configuration file model (serial link, slider behaviour, channel apps)
//! - Validation of values the rest of the system relies on
//! - Loading/saving as TOML, with a factory default on first run

use crate::domain::router::RouterSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Channel index → application names
///
/// The channel count seen by the router is the number of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMapping {
    channels: BTreeMap<usize, Vec<String>>,
}

impl ChannelMapping {
    pub fn new(channels: BTreeMap<usize, Vec<String>>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Application names for a channel, if the channel has an entry
    pub fn apps(&self, channel: usize) -> Option<&[String]> {
        self.channels.get(&channel).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.channels
            .iter()
            .map(|(channel, apps)| (*channel, apps.as_slice()))
    }
}

fn default_heartbeat_payload() -> String {
    "s".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    30
}

/// Complete VolWare configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolwareConfig {
    /// Serial port name (`COM3`, `/dev/ttyACM0`)
    pub com_port: String,

    /// Serial baud rate
    pub baud_rate: u32,

    /// Reverse slider direction
    #[serde(default)]
    pub invert_slider: bool,

    /// Device sends a mute flag per channel after the slider values
    #[serde(default)]
    pub mute_buttons: bool,

    /// Values between the slider block and the mute block
    #[serde(default)]
    pub mute_offset: usize,

    /// Text written to the device on every heartbeat
    #[serde(default = "default_heartbeat_payload")]
    pub heartbeat_payload: String,

    #[serde(default = "default_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_interval_ms")]
    pub reconnect_backoff_ms: u64,

    /// Lifetime of cached process names
    #[serde(default = "default_cache_ttl_secs")]
    pub session_cache_ttl_secs: u64,

    /// Channel index (as a decimal string key) → application names
    pub channel_apps: BTreeMap<String, Vec<String>>,
}

impl Default for VolwareConfig {
    fn default() -> Self {
        Self {
            com_port: String::new(),
            baud_rate: 9600,
            invert_slider: false,
            mute_buttons: false,
            mute_offset: 0,
            heartbeat_payload: default_heartbeat_payload(),
            heartbeat_interval_ms: default_interval_ms(),
            reconnect_backoff_ms: default_interval_ms(),
            session_cache_ttl_secs: default_cache_ttl_secs(),
            channel_apps: BTreeMap::new(),
        }
    }
}

impl VolwareConfig {
    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&contents)?;

        debug!(channels = config.channel_apps.len(), "Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration
    pub fn factory_default() -> Self {
        let com_port = if cfg!(windows) { "COM3" } else { "/dev/ttyACM0" };

        let mut config = Self {
            com_port: com_port.to_string(),
            ..Self::default()
        };

        config
            .channel_apps
            .insert("0".to_string(), vec!["master".to_string()]);
        config.channel_apps.insert(
            "1".to_string(),
            vec!["chrome.exe".to_string(), "firefox.exe".to_string()],
        );
        config
            .channel_apps
            .insert("2".to_string(), vec!["spotify.exe".to_string()]);
        config
            .channel_apps
            .insert("3".to_string(), vec!["discord.exe".to_string()]);

        config
    }

    /// Check every value the runtime depends on
    pub fn validate(&self) -> Result<()> {
        if self.com_port.trim().is_empty() {
            return Err(ConfigError::Invalid("com_port must not be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".to_string()));
        }
        if self.heartbeat_payload.is_empty() {
            return Err(ConfigError::Invalid(
                "heartbeat_payload must not be empty".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.reconnect_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms and reconnect_backoff_ms must be positive".to_string(),
            ));
        }
        self.channel_mapping().map(|_| ())
    }

    /// Channel mapping with numeric indices
    pub fn channel_mapping(&self) -> Result<ChannelMapping> {
        let channels = self
            .channel_apps
            .iter()
            .map(|(key, apps)| {
                key.trim()
                    .parse::<usize>()
                    .map(|index| (index, apps.clone()))
                    .map_err(|_| {
                        ConfigError::Invalid(format!(
                            "channel_apps key '{}' is not a channel index",
                            key
                        ))
                    })
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        if channels.len() != self.channel_apps.len() {
            return Err(ConfigError::Invalid(
                "channel_apps has duplicate channel indices".to_string(),
            ));
        }

        // Channel count is the entry count, so indices must run 0..N
        if let Some((expected, found)) = channels
            .keys()
            .enumerate()
            .find(|(expected, found)| expected != *found)
        {
            return Err(ConfigError::Invalid(format!(
                "channel_apps must cover channels 0..{} without gaps; expected {}, found {}",
                channels.len(),
                expected,
                found
            )));
        }

        Ok(ChannelMapping::new(channels))
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            invert: self.invert_slider,
            mute_buttons: self.mute_buttons,
            mute_offset: self.mute_offset,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_secs)
    }
}

/// Configuration manager for the main VolWare config
///
/// Manages the configuration file at `~/.config/volware/config.toml`
/// (`%APPDATA%\volware\config.toml` on Windows).
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("volware"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, returns factory default.
    /// If the config file is corrupt, logs an error and returns factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> VolwareConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = VolwareConfig::factory_default();

            if let Err(e) = self.save(&config).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        match VolwareConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                VolwareConfig::factory_default()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &VolwareConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }
}
