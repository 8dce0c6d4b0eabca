//! Configuration for scanner triggers.

use crate::error::{Result, TriggerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration naming a transport and how to wait on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Registered port type, case-insensitive (e.g. `serial`, `dummy`)
    pub port_type: String,

    /// Device-specific settings; keys a device does not know are ignored
    #[serde(default = "empty_object")]
    pub port_config: serde_json::Value,

    /// Seconds to wait for the first trigger before giving up
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Key that aborts a wait
    #[serde(default = "default_esc_key")]
    pub esc_key: String,

    /// Reset the experiment clock at the first detected trigger
    #[serde(default)]
    pub reset_clock: bool,

    /// Level at which trigger events are logged
    #[serde(default)]
    pub log_level: LogLevel,

    /// Pause between polling ticks, in microseconds (0 yields instead)
    #[serde(default)]
    pub poll_interval_us: u64,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_timeout_secs() -> f64 {
    999.0
}

fn default_esc_key() -> String {
    "escape".to_string()
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::new("dummy")
    }
}

impl TriggerConfig {
    /// Default settings for the given port type.
    pub fn new(port_type: impl Into<String>) -> Self {
        Self {
            port_type: port_type.into(),
            port_config: empty_object(),
            timeout_secs: default_timeout_secs(),
            esc_key: default_esc_key(),
            reset_clock: false,
            log_level: LogLevel::default(),
            poll_interval_us: 0,
        }
    }

    /// Replace the device-specific settings.
    pub fn with_port_config(mut self, port_config: serde_json::Value) -> Self {
        self.port_config = port_config;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_esc_key(mut self, esc_key: impl Into<String>) -> Self {
        self.esc_key = esc_key.into();
        self
    }

    /// Normalized port type used for registry lookups.
    pub fn port_key(&self) -> String {
        self.port_type.trim().to_lowercase()
    }

    /// Timeout as a duration. Values beyond `Duration::MAX` wait forever.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    /// Interpret `port_config` as the typed settings of one device.
    pub fn device_config<T: DeserializeOwned>(&self) -> Result<T> {
        let value = if self.port_config.is_null() {
            empty_object()
        } else {
            self.port_config.clone()
        };
        serde_json::from_value(value).map_err(|e| {
            TriggerError::InvalidConfig(format!("{} port config: {e}", self.port_key()))
        })
    }

    /// Check the settings shared by every device.
    pub fn validate(&self) -> Result<()> {
        if self.port_key().is_empty() {
            return Err(TriggerError::InvalidConfig("port_type is empty".into()));
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs < 0.0 {
            return Err(TriggerError::InvalidConfig(format!(
                "timeout must be a non-negative number of seconds, got {}",
                self.timeout_secs
            )));
        }
        if self.esc_key.is_empty() {
            return Err(TriggerError::InvalidConfig("esc_key is empty".into()));
        }
        if !self.port_config.is_object() && !self.port_config.is_null() {
            return Err(TriggerError::InvalidConfig(
                "port_config must be an object".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from the default location, falling back to defaults.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> std::result::Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scanner-trigger")
            .join("config.json")
    }

    /// Directory for exported session records.
    pub fn data_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scanner-trigger")
    }
}

/// Level for trigger data lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}
