//! # GCodeLink
//!
//! Streams G-code to single-wire serial devices (GRBL plotters and CNC
//! machines, uArm robot arms) and matches the device's replies back to the
//! commands that produced them.
//!
//! ## Architecture
//!
//! GCodeLink is organized as a workspace with multiple crates:
//!
//! 1. **gcodelink-core** - Error taxonomy, connection states, command outcomes, events
//! 2. **gcodelink-communication** - Serial transport, command queue, flow control, handshake engine
//! 3. **gcodelink-settings** - Configuration files
//! 4. **gcodelink** - Logging setup, program streaming and the command-line sender
//!
//! ## Features
//!
//! - **Flow Control**: Simple (one command in flight) or pipelined character counting
//! - **Ordered Acknowledgements**: Replies matched strictly by queue position
//! - **Handshake**: Banner, settings query and a single ready signal per connection
//! - **Dialects**: GRBL and uArm presets, with configurable overrides

mod types;

pub use types::StreamSummary;

pub use gcodelink_core::{
    CommandId, CommandInfo, CommandReply, ConnectionError, ConnectionState, ControllerError,
    DeviceEvent, DeviceSnapshot, Error, ProtocolError, ReplyStatus, Result,
};

pub use gcodelink_communication::{
    list_ports, Command, Dialect, DialectKind, DriverConfig, GcodeDriver, GenericCommand,
    SerialPortInfo, StatusPoll,
};

pub use gcodelink_settings::{Config, SettingsError};

use std::time::Instant;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with(LogFormat::Pretty)
}

/// Initialize logging in the given format
///
/// Logs go to stderr so program output on stdout stays clean.
pub fn init_logging_with(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .with_line_number(true)
                .pretty();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .json();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

/// Submit every line of a program and wait for all replies
///
/// Comments are stripped and lines left empty are skipped. Device errors do
/// not stop the stream; they are collected in the summary with their line
/// numbers. A line the driver refuses outright (too long for the device
/// buffer, or not a single protocol line) is recorded as rejected and the
/// rest of the program still goes out. Only a stopped driver ends the stream
/// early.
pub async fn stream_program<I, S>(driver: &GcodeDriver, lines: I) -> Result<StreamSummary>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let started = Instant::now();
    let mut summary = StreamSummary::default();
    let mut pending = Vec::new();

    for (index, line) in lines.into_iter().enumerate() {
        summary.total_lines += 1;
        let line_number = index + 1;
        let submitted = GenericCommand::new(line.as_ref()).and_then(|command| {
            if command.is_empty() {
                Ok(None)
            } else {
                driver.submit(&command).map(Some)
            }
        });

        match submitted {
            Ok(Some(handle)) => pending.push((line_number, handle)),
            Ok(None) => {}
            Err(e) if e.is_stopped() => return Err(e),
            Err(e) => {
                tracing::warn!("Line {}: rejected: {}", line_number, e);
                summary.rejected.push((line_number, e.to_string()));
            }
        }
    }
    summary.submitted = pending.len();
    tracing::info!(
        "Submitted {} of {} lines",
        summary.submitted,
        summary.total_lines
    );

    for (line_number, handle) in pending {
        let reply = handle.await?;
        match reply.status {
            ReplyStatus::Ok => summary.accepted += 1,
            ReplyStatus::Error { code } => {
                tracing::warn!("Line {}: device error {}", line_number, code);
                summary.errors.push((line_number, code));
            }
            ReplyStatus::Aborted => summary.aborted += 1,
        }
    }

    summary.elapsed = started.elapsed();
    Ok(summary)
}
