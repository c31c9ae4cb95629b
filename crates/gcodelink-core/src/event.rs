//! Event and command-outcome types
//!
//! Provides:
//! - Command identity and reply types shared by the queue and its callers
//! - The ordered outbound event stream published to subscribers (UI, logger)

use crate::data::ConnectionState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number assigned to a command when it enters the queue.
///
/// Only used for diagnostics and ordering assertions; acknowledgements are
/// matched by queue position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a queued command carried by events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Queue sequence number
    pub id: CommandId,
    /// Payload as text, without the line terminator
    pub text: String,
    /// Whether the device answers this command
    pub expects_ack: bool,
}

impl fmt::Display for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.text)
    }
}

/// Terminal outcome of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    /// The device accepted the command (or it needed no acknowledgement)
    Ok,
    /// The device rejected the command with an error code
    Error {
        /// The code as reported, e.g. `9` for `error:9`
        code: String,
    },
    /// The device dropped the command (reset or lost link) before answering
    Aborted,
}

/// Result delivered through a command's completion handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    /// The command this reply belongs to
    pub id: CommandId,
    /// How the command ended
    pub status: ReplyStatus,
}

impl CommandReply {
    /// Check if the device accepted the command
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Device error code, if the device rejected the command
    pub fn error_code(&self) -> Option<&str> {
        match &self.status {
            ReplyStatus::Error { code } => Some(code),
            _ => None,
        }
    }
}

/// Events published by a driver, in the order the engine observed them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Link opened (`true`) or closed (`false`)
    Connected(bool),
    /// Handshake state changed
    StateChanged(ConnectionState),
    /// A command was appended to the queue
    CommandQueued(CommandInfo),
    /// A command became the oldest unconfirmed command
    CommandStarted(CommandInfo),
    /// A command was confirmed
    CommandProcessed(CommandInfo, ReplyStatus),
    /// A raw line arrived from the device
    ResponseReceived(String),
    /// The device status token changed
    StatusChanged(String),
    /// The limit switch changed
    LimitSwitch(bool),
    /// An acknowledgement did not line up with the queue
    ProtocolViolation(String),
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Connected(true) => write!(f, "Connected"),
            DeviceEvent::Connected(false) => write!(f, "Disconnected"),
            DeviceEvent::StateChanged(state) => write!(f, "State: {}", state),
            DeviceEvent::CommandQueued(cmd) => write!(f, "Queued {}", cmd),
            DeviceEvent::CommandStarted(cmd) => write!(f, "Started {}", cmd),
            DeviceEvent::CommandProcessed(cmd, status) => {
                write!(f, "Processed {} ({:?})", cmd, status)
            }
            DeviceEvent::ResponseReceived(line) => write!(f, "Response: {}", line),
            DeviceEvent::StatusChanged(status) => write!(f, "Status: {}", status),
            DeviceEvent::LimitSwitch(on) => write!(f, "Limit switch: {}", on),
            DeviceEvent::ProtocolViolation(reason) => write!(f, "Protocol violation: {}", reason),
        }
    }
}
