//! Application configuration management

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::models::{DownloadConfig, PlaybackConfig};
use crate::utils::file_utils::ensure_dir_exists;

/// Prefix of environment overrides, e.g. `VCP_PLAYBACK__POLL_INTERVAL_MS=250`
pub const ENV_PREFIX: &str = "VCP";

const CONFIG_FILE_NAME: &str = "config.json";

/// Main application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub playback: PlaybackConfig,
    pub advanced: AdvancedConfig,
}

/// Advanced configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub log_level: String, // "error", "warn", "info", "debug", "trace"
    /// Needs the `local-logging` feature
    pub enable_file_logging: bool,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_file_logging: false,
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "videocache", "player").with_context(|| "Failed to get project directories")
}

impl AppConfig {
    /// Load configuration from the platform config dir, creating a default if none exists
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save()?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load a JSON configuration file; missing fields take their defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

        tracing::info!("Loaded configuration from: {:?}", path);
        Ok(config)
    }

    /// Defaults, then the optional JSON file, then `VCP_*` environment variables
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&AppConfig::default()).context("Failed to serialize defaults")?,
        );

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(File::from(path).format(FileFormat::Json));
            } else {
                tracing::debug!("Config file {:?} not found, using defaults", path);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform config dir
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            ensure_dir_exists(parent)?;
        }

        let content = self.export()?;

        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Platform cache directory for downloaded media
    pub fn get_cache_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.cache_dir().join("media"))
    }

    /// Configured cache directory, falling back to the platform one
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        match &self.download.cache_directory {
            Some(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
            _ => Self::get_cache_dir(),
        }
    }

    /// Export configuration as JSON string
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "Failed to export configuration")
    }

    /// Parse and validate configuration from a JSON string
    pub fn import(json: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(json).with_context(|| "Failed to parse imported configuration")?;

        config
            .validate()
            .with_context(|| "Imported configuration is invalid")?;

        tracing::info!("Imported and validated configuration from JSON");
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let download = &self.download;
        if download.timeout_seconds == 0 || download.timeout_seconds > 3600 {
            anyhow::bail!("Timeout should be between 1 and 3600 seconds");
        }

        if download.connect_timeout_seconds == 0
            || download.connect_timeout_seconds > download.timeout_seconds
        {
            anyhow::bail!("Connect timeout should be between 1 second and the stall timeout");
        }

        if download.checkpoint_bytes == 0 {
            anyhow::bail!("Checkpoint interval must be greater than 0 bytes");
        }

        if download.user_agent.trim().is_empty() {
            anyhow::bail!("User agent must not be empty");
        }

        let playback = &self.playback;
        if playback.poll_interval_ms < 10 || playback.poll_interval_ms > 60_000 {
            anyhow::bail!("Poll interval should be between 10 ms and 60 s");
        }

        if !playback.seek_step_seconds.is_finite() || playback.seek_step_seconds <= 0.0 {
            anyhow::bail!("Seek step must be a positive number of seconds");
        }

        if !["error", "warn", "info", "debug", "trace"].contains(&self.advanced.log_level.as_str())
        {
            anyhow::bail!("Invalid log level: {}", self.advanced.log_level);
        }

        Ok(())
    }

    /// `tracing` filter directive matching the configured log level
    pub fn log_directive(&self) -> String {
        format!("video_cache_player={}", self.advanced.log_level)
    }
}
