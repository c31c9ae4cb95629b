//! GCodeLink Settings Crate
//!
//! Handles driver configuration files: loading, saving, validation and
//! conversion into a [`DriverConfig`](gcodelink_communication::DriverConfig).

pub mod config;
pub mod error;

pub use config::{Config, ConnectionSettings, FirmwareSettings, StreamingSettings};
pub use error::{SettingsError, SettingsResult};
