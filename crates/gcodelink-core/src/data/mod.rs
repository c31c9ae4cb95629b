//! Data models for GCodeLink
//!
//! Connection state machine states and the read-only device snapshot
//! published by the engine loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status token used before the device has reported anything.
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Handshake/connection state of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link is open
    #[default]
    Disconnected,
    /// The transport is trying to open the port
    Connecting,
    /// Port open, waiting for the firmware banner
    Connected,
    /// Banner seen, settings query outstanding
    AwaitingSettings,
    /// Handshake complete, normal traffic may proceed
    Ready,
    /// Connect retries were exhausted
    Failed,
}

impl ConnectionState {
    /// Check if this state has an open link
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::AwaitingSettings | ConnectionState::Ready
        )
    }

    /// Check if queued commands may be written in this state
    ///
    /// Dispatch is held until the banner has been seen so nothing is lost
    /// to the reset the firmware performs when the port opens.
    pub fn allows_dispatch(&self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingSettings | ConnectionState::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::AwaitingSettings => write!(f, "AwaitingSettings"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time view of a device, as last published by the engine loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Handshake state
    pub state: ConnectionState,
    /// Last status token from a status report (e.g. `Idle`, `Run`)
    pub status: String,
    /// Firmware settings reported by the settings query
    pub settings: BTreeMap<u32, String>,
    /// Limit switch state, for dialects that report one
    pub limit_switch: Option<bool>,
    /// Commands in the queue, confirmed ones included until flushed
    pub queued: usize,
    /// Commands not yet confirmed
    pub outstanding: usize,
    /// Bytes the device is assumed able to accept right now
    pub send_budget: usize,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            status: STATUS_UNKNOWN.to_string(),
            settings: BTreeMap::new(),
            limit_switch: None,
            queued: 0,
            outstanding: 0,
            send_budget: 0,
        }
    }
}

impl DeviceSnapshot {
    /// Check if the last status report said the device is idle
    pub fn is_idle(&self) -> bool {
        self.status == "Idle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_gating() {
        assert!(!ConnectionState::Disconnected.allows_dispatch());
        assert!(!ConnectionState::Connecting.allows_dispatch());
        assert!(!ConnectionState::Connected.allows_dispatch());
        assert!(ConnectionState::AwaitingSettings.allows_dispatch());
        assert!(ConnectionState::Ready.allows_dispatch());
        assert!(!ConnectionState::Failed.allows_dispatch());
    }

    #[test]
    fn test_snapshot_defaults() {
        let snapshot = DeviceSnapshot::default();
        assert_eq!(snapshot.status, STATUS_UNKNOWN);
        assert!(!snapshot.is_idle());
        assert!(!snapshot.state.is_connected());
    }
}
