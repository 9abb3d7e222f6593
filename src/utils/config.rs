//! Configuration management for podsession
//!
//! This module handles loading and managing application configuration
//! from config files and environment variables.

use crate::utils::error::{IntoSessionError, Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback session behaviour
    pub session: SessionConfig,

    /// Episode store location
    pub store: StoreConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Playback session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Position poll period while playing
    pub poll_interval_ms: u64,

    /// Minimum spacing between periodic progress writes
    pub persist_interval_ms: u64,

    /// Tail margin within which an episode counts as finished
    pub finished_threshold_ms: u64,

    /// Skip-back step
    pub seek_back_ms: u64,

    /// Skip-forward step
    pub seek_forward_ms: u64,

    /// Start a newly selected episode at its stored position
    pub resume_from_stored_position: bool,

    /// Persist position 0 for finished episodes so they restart next time
    pub rewind_finished: bool,
}

/// Episode store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding episode records
    pub path: Option<PathBuf>,
}

/// General application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            persist_interval_ms: 5000,
            finished_threshold_ms: 500,
            seek_back_ms: 10_000,
            seek_forward_ms: 30_000,
            resume_from_stored_position: true,
            rewind_finished: true,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    /// Configured store path, falling back to the per-user data directory
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            dirs::data_dir().map(|p| p.join("podsession").join("episodes.json"))
        })
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/podsession/config.toml on Linux)
    /// 3. User config file (~/.config/podsession/config.toml on Linux)
    /// 4. Environment variables (PODSESSION_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::read_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::read_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from an explicit file, then apply env overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| SessionError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to the given path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml =
            toml::to_string_pretty(self).map_err(|e| SessionError::Serialization(e.to_string()))?;
        std::fs::write(path, toml)?;

        Ok(())
    }

    // Missing keys keep their defaults through #[serde(default)].
    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).config_err("Failed to read config file")?;
        toml::from_str(&contents).config_err("Failed to parse config file")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_ms = |key: &str, value: String| -> Result<u64> {
            value
                .trim()
                .parse()
                .map_err(|_| SessionError::Config(format!("Invalid {}", key)))
        };

        if let Some(value) = lookup("PODSESSION_POLL_INTERVAL_MS") {
            self.session.poll_interval_ms = parse_ms("PODSESSION_POLL_INTERVAL_MS", value)?;
        }

        if let Some(value) = lookup("PODSESSION_PERSIST_INTERVAL_MS") {
            self.session.persist_interval_ms = parse_ms("PODSESSION_PERSIST_INTERVAL_MS", value)?;
        }

        if let Some(value) = lookup("PODSESSION_FINISHED_THRESHOLD_MS") {
            self.session.finished_threshold_ms =
                parse_ms("PODSESSION_FINISHED_THRESHOLD_MS", value)?;
        }

        if let Some(log_level) = lookup("PODSESSION_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        if let Some(path) = lookup("PODSESSION_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(100..=5000).contains(&self.session.poll_interval_ms) {
            return Err(SessionError::Config(
                "Poll interval must be between 100 and 5000 ms".to_string(),
            ));
        }

        if self.session.persist_interval_ms < self.session.poll_interval_ms {
            return Err(SessionError::Config(
                "Persist interval must not be shorter than the poll interval".to_string(),
            ));
        }

        if self.session.seek_back_ms == 0 || self.session.seek_forward_ms == 0 {
            return Err(SessionError::Config("Seek steps must be non-zero".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(SessionError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/podsession/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("podsession").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/podsession/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("podsession").join("config.toml"))
    }
}
