//! Error handling for GCodeLink
//!
//! Provides error types for all layers of the streaming engine:
//! - Connection errors (opening, retrying and losing the serial link)
//! - Protocol errors (ack/command misalignment)
//!
//! Device-reported `error:<code>` replies are not errors of the driver; they
//! complete the command they belong to with `ReplyStatus::Error`.
//! - Controller errors (driver lifecycle and submission problems)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents errors related to the physical serial link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Every connect attempt failed
    #[error("Connection timeout on {port} after {attempts} attempts ({timeout_ms}ms)")]
    ConnectionTimeout {
        /// The port that never opened.
        port: String,
        /// Number of open attempts made.
        attempts: u32,
        /// Total time spent waiting between attempts, in milliseconds.
        timeout_ms: u64,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },
}

/// Protocol error type
///
/// Errors in the line dialect spoken between host and device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An acknowledgement could not be matched to an outstanding command
    #[error("Protocol invariant violated: {reason}")]
    InvariantViolation {
        /// What went wrong.
        reason: String,
    },
}

/// Controller error type
///
/// Represents errors in the driver lifecycle and in command submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The driver was stopped before the operation could complete
    #[error("Driver stopped")]
    Stopped,

    /// A command can never fit in the device's input buffer
    #[error("Buffer overflow: {message}")]
    BufferOverflow {
        /// A message describing the buffer overflow.
        message: String,
    },

    /// Command text is not a single protocol line
    #[error("Invalid command: {reason}")]
    InvalidCommand {
        /// The reason the command was rejected.
        reason: String,
    },
}

/// Main error type for GCodeLink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError::ConnectionTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this error means the driver has shut down
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::Stopped))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
