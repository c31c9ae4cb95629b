//! Driver configuration

use crate::communication::{FlowControlMode, TransportConfig, DEFAULT_SEND_WINDOW};
use crate::firmware::Dialect;
use std::time::Duration;

/// Options recognised by [`GcodeDriver`](super::GcodeDriver)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Serial port name
    pub port: String,
    /// Pipelined dispatch instead of one command at a time
    pub advanced_flow_control: bool,
    /// Size of the device's input buffer in bytes
    pub send_window_bytes: usize,
    /// Open attempts before the connection is declared failed
    pub connect_retry_count: u32,
    /// Pause between open attempts
    pub connect_retry_delay: Duration,
    /// Firmware dialect
    pub dialect: Dialect,
    /// Write the dialect's reset byte as soon as the port opens
    pub reset_on_connect: bool,
    /// Status poll period used by `wait_for_idle`
    pub idle_poll_interval: Duration,
    /// Events buffered per subscriber before the slowest one lags
    pub event_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            advanced_flow_control: false,
            send_window_bytes: DEFAULT_SEND_WINDOW,
            connect_retry_count: 5,
            connect_retry_delay: Duration::from_secs(1),
            dialect: Dialect::default(),
            reset_on_connect: false,
            idle_poll_interval: Duration::from_millis(100),
            event_capacity: 1024,
        }
    }
}

impl DriverConfig {
    /// Default configuration for a port
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Set the dialect
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Enable or disable pipelined dispatch
    pub fn with_advanced_flow_control(mut self, advanced: bool) -> Self {
        self.advanced_flow_control = advanced;
        self
    }

    /// Set the connect retry policy
    pub fn with_retry(mut self, count: u32, delay: Duration) -> Self {
        self.connect_retry_count = count;
        self.connect_retry_delay = delay;
        self
    }

    /// Dispatch policy implied by `advanced_flow_control`
    pub fn flow_control_mode(&self) -> FlowControlMode {
        FlowControlMode::from_advanced(self.advanced_flow_control)
    }

    /// Parameters for the transport thread
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            port: self.port.clone(),
            retry_count: self.connect_retry_count,
            retry_delay: self.connect_retry_delay,
        }
    }
}
