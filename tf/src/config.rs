//! TourFeed configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manager::ManagerConfig;

/// Main TourFeed configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Realtime backend connection
    pub platform: PlatformConfig,

    /// Retry, circuit breaker, polling and health settings
    pub realtime: ManagerConfig,

    /// Channels `tf watch` subscribes when no table is given on the command line
    pub channels: Vec<ChannelSpec>,
}

impl Config {
    /// Validate configuration before talking to the backend
    ///
    /// Checks that the API key environment variable is set, that every
    /// configured channel names a table and that the retry policy is sound.
    pub fn validate(&self) -> Result<()> {
        self.realtime.retry.validate().context("Invalid retry policy")?;
        if std::env::var(&self.platform.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "Realtime API key not found. Set the {} environment variable.",
                self.platform.api_key_env
            ));
        }
        for spec in &self.channels {
            if spec.table.trim().is_empty() {
                return Err(eyre::eyre!("Channel '{}' has no table", spec.name));
            }
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .tourfeed.yml
        let local_config = PathBuf::from(".tourfeed.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/tourfeed/tourfeed.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tourfeed").join("tourfeed.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.realtime.retry.validate().context("Invalid retry policy")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Realtime backend connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Backend base URL; feeds stream from `{base-url}/realtime/v1/changes`
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// TCP connect timeout in milliseconds
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key_env: "TOURFEED_API_KEY".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl PlatformConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// A channel to watch, as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}
