//! Configuration and settings management for GCodeLink
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port, line speed, retry policy)
//! - Streaming settings (flow control, window size, polling)
//! - Firmware settings (dialect and its overrides)

use crate::error::{SettingsError, SettingsResult};
use gcodelink_communication::{Dialect, DialectKind, DriverConfig, SerialPortOpener};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform config directory
const APP_DIR: &str = "gcodelink";

/// Default config file name
const CONFIG_FILE: &str = "config.toml";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout of the serial port in milliseconds
    pub read_timeout_ms: u64,
    /// Open attempts before giving up
    pub retry_count: u32,
    /// Pause between open attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Soft-reset the firmware as soon as the port opens
    pub reset_on_connect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let port = if cfg!(windows) { "COM3" } else { "/dev/ttyUSB0" };
        Self {
            port: port.to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 10,
            retry_count: 5,
            retry_delay_ms: 1000,
            reset_on_connect: false,
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Pipelined dispatch instead of one command at a time
    pub advanced_flow_control: bool,
    /// Size of the device's input buffer in bytes
    pub send_window_bytes: usize,
    /// Status poll period while waiting for idle, in milliseconds
    pub idle_poll_interval_ms: u64,
    /// Events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            advanced_flow_control: false,
            send_window_bytes: 128,
            idle_poll_interval_ms: 100,
            event_capacity: 1024,
        }
    }
}

/// Firmware dialect selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareSettings {
    /// Dialect preset
    pub dialect: DialectKind,
    /// Override for the status report field separator
    pub status_separator: Option<char>,
    /// Override for the startup banner
    pub banner: Option<String>,
}

impl FirmwareSettings {
    /// Dialect preset with overrides applied
    pub fn to_dialect(&self) -> Dialect {
        let mut dialect = Dialect::for_kind(self.dialect);
        if let Some(separator) = self.status_separator {
            dialect.status_separator = separator;
        }
        if let Some(banner) = &self.banner {
            dialect.banner.clone_from(banner);
        }
        dialect
    }
}

/// Complete driver configuration file
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Streaming settings
    pub streaming: StreamingSettings,
    /// Firmware settings
    pub firmware: FirmwareSettings,
}

/// File formats a config can be stored in
enum Format {
    Json,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("none").to_string(),
            )),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location, e.g. `~/.config/gcodelink/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no platform config directory".to_string())
            })
    }

    /// Load and validate config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let config = Self::read_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without validating it
    ///
    /// For callers that patch the result (e.g. with command-line overrides)
    /// and call [`Config::validate`] afterwards.
    pub fn read_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::from_path(path)?;
        let content = std::fs::read_to_string(path)?;

        let config = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Load the config at `path`, or the defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        let config = Self::read_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the config at `path` without validating it, or the defaults
    /// if the file does not exist
    pub fn read_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::read_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::from_path(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.port.trim().is_empty() {
            return Err(SettingsError::invalid("connection.port", "must not be empty"));
        }

        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }

        if self.connection.read_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.read_timeout_ms",
                "must be > 0",
            ));
        }

        if self.connection.retry_count == 0 {
            return Err(SettingsError::invalid("connection.retry_count", "must be > 0"));
        }

        if self.streaming.send_window_bytes == 0 {
            return Err(SettingsError::invalid(
                "streaming.send_window_bytes",
                "must be > 0",
            ));
        }

        if self.streaming.idle_poll_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "streaming.idle_poll_interval_ms",
                "must be > 0",
            ));
        }

        if matches!(self.firmware.status_separator, Some('\r' | '\n')) {
            return Err(SettingsError::invalid(
                "firmware.status_separator",
                "must not be a line terminator",
            ));
        }

        Ok(())
    }

    /// Driver options described by this config
    pub fn to_driver_config(&self) -> DriverConfig {
        DriverConfig {
            port: self.connection.port.clone(),
            advanced_flow_control: self.streaming.advanced_flow_control,
            send_window_bytes: self.streaming.send_window_bytes,
            connect_retry_count: self.connection.retry_count,
            connect_retry_delay: Duration::from_millis(self.connection.retry_delay_ms),
            dialect: self.firmware.to_dialect(),
            reset_on_connect: self.connection.reset_on_connect,
            idle_poll_interval: Duration::from_millis(self.streaming.idle_poll_interval_ms),
            event_capacity: self.streaming.event_capacity,
        }
    }

    /// Serial port opener for the connection settings
    pub fn port_opener(&self) -> SerialPortOpener {
        SerialPortOpener {
            baud_rate: self.connection.baud_rate,
            read_timeout: Duration::from_millis(self.connection.read_timeout_ms),
        }
    }
}
