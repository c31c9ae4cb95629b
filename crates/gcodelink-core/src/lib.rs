//! # GCodeLink Core
//!
//! Core types shared by the GCodeLink crates.
//! Provides the error taxonomy, the connection state machine states,
//! command outcome types and the outbound device event stream.

pub mod data;
pub mod error;
pub mod event;

pub use data::{ConnectionState, DeviceSnapshot, STATUS_UNKNOWN};

pub use error::{ConnectionError, ControllerError, Error, ProtocolError, Result};

pub use event::{CommandId, CommandInfo, CommandReply, DeviceEvent, ReplyStatus};
