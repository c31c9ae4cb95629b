//! Commands that can be queued for a device
//!
//! A command only has to produce its wire bytes and say whether the device
//! answers it. Device-specific vocabularies (moves, homing, tool control)
//! implement [`Command`] on top of this crate; [`GenericCommand`] covers free
//! text lines and [`StatusPoll`] the dialect's status query.

use crate::firmware::Dialect;
use gcodelink_core::{ControllerError, Result};
use std::fmt;

/// Line terminator expected by the device.
pub const LINE_TERMINATOR: u8 = b'\r';

/// A byte-encodable unit of work for the device
pub trait Command: Send + fmt::Debug {
    /// The exact bytes to transmit, including the trailing `\r`
    fn payload(&self) -> Vec<u8>;

    /// Whether the device sends an acknowledgement for this command
    fn expects_ack(&self) -> bool {
        true
    }
}

/// A command whose payload has been frozen for queueing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    /// Wire bytes
    pub payload: Vec<u8>,
    /// Whether an acknowledgement is expected
    pub expects_ack: bool,
}

impl PreparedCommand {
    /// Freeze a command's payload
    pub fn from_command(command: &dyn Command) -> Self {
        Self {
            payload: command.payload(),
            expects_ack: command.expects_ack(),
        }
    }

    /// Payload as text, without the terminator
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }
}

/// Remove `;` and `(...)` comments from a G-code line
///
/// An unterminated `(` comment runs to the end of the line.
pub fn strip_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_paren = false;

    for c in line.chars() {
        match c {
            '(' if !in_paren => in_paren = true,
            ')' if in_paren => in_paren = false,
            ';' if !in_paren => break,
            _ if in_paren => {}
            _ => out.push(c),
        }
    }

    out.trim().to_string()
}

/// A free-text G-code line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericCommand {
    text: String,
    expects_ack: bool,
}

impl GenericCommand {
    /// Create a command from one line of G-code
    ///
    /// Comments are stripped and surrounding whitespace trimmed. Text that
    /// spans more than one line is rejected.
    pub fn new(text: impl AsRef<str>) -> Result<Self> {
        let text = text.as_ref();
        if text.contains(['\r', '\n']) {
            return Err(ControllerError::InvalidCommand {
                reason: format!("line break inside command {:?}", text),
            }
            .into());
        }

        Ok(Self {
            text: strip_comments(text),
            expects_ack: true,
        })
    }

    /// Mark the command as fire-and-forget
    pub fn without_ack(mut self) -> Self {
        self.expects_ack = false;
        self
    }

    /// The command text as it will be sent, without the terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Check if nothing is left after comment stripping
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl Command for GenericCommand {
    fn payload(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 1);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.push(LINE_TERMINATOR);
        bytes
    }

    fn expects_ack(&self) -> bool {
        self.expects_ack
    }
}

/// Status query in the form a dialect expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPoll {
    query: String,
    expects_ack: bool,
}

impl StatusPoll {
    /// Build the status poll for a dialect
    pub fn for_dialect(dialect: &Dialect) -> Self {
        Self {
            query: dialect.status_query.clone(),
            expects_ack: dialect.status_query_expects_ack,
        }
    }
}

impl Command for StatusPoll {
    fn payload(&self) -> Vec<u8> {
        let mut bytes = self.query.clone().into_bytes();
        bytes.push(LINE_TERMINATOR);
        bytes
    }

    fn expects_ack(&self) -> bool {
        self.expects_ack
    }
}
