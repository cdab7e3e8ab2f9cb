//! Application settings

use crate::core::connection::ConnectionConfig;
use crate::core::logger::LogFormat;
use crate::core::transport::{LinkParams, SerialParity, UsbId, KNOWN_BRIDGES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for the settings
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link settings
    pub link: LinkSettings,
    /// Session log settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        super::config_dir()
            .map(|dir| dir.join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the default location, or defaults if absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text; missing keys take defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::default_path()?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.save_to(&path)
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Read/write timeout in milliseconds
    pub io_timeout_ms: u64,
    /// Device list/open timeout in milliseconds
    pub open_timeout_ms: u64,
    /// Largest accepted event frame in bytes
    pub max_frame_len: usize,
    /// Allowed USB-serial chips
    pub allowed_devices: Vec<UsbId>,
    /// Hot-plug poll interval in milliseconds
    pub hotplug_poll_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let params = LinkParams::default();
        Self {
            baud_rate: params.baud_rate,
            data_bits: params.data_bits,
            stop_bits: params.stop_bits,
            parity: params.parity,
            io_timeout_ms: 1000,
            open_timeout_ms: 5000,
            max_frame_len: 64,
            allowed_devices: KNOWN_BRIDGES.to_vec(),
            hotplug_poll_ms: 1000,
        }
    }
}

impl LinkSettings {
    /// Port parameters
    pub fn params(&self) -> LinkParams {
        LinkParams::new(self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
    }

    /// Hot-plug poll interval
    pub fn hotplug_interval(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms)
    }
}

impl From<&LinkSettings> for ConnectionConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            params: settings.params(),
            io_timeout: Duration::from_millis(settings.io_timeout_ms),
            open_timeout: Duration::from_millis(settings.open_timeout_ms),
            max_frame_len: settings.max_frame_len,
            allowed_devices: settings.allowed_devices.clone(),
        }
    }
}

/// Session log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Log directory
    pub directory: Option<PathBuf>,
    /// Clear the buffer after a successful flush
    pub clear_after_flush: bool,
    /// Periodic flush interval in seconds (0 = only on exit)
    pub flush_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Csv,
            directory: super::log_dir(),
            clear_after_flush: true,
            flush_interval_secs: 30,
        }
    }
}
