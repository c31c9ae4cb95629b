//! Communication layer
//!
//! The byte-level side of a driver: opening the port, framing responses into
//! lines, and the queue/flow-control bookkeeping for outbound commands.
//!
//! The engine never touches a port directly. It asks a [`Connector`] for a
//! [`Link`] and hears back through a [`LinkEventSink`]; the serial
//! implementation runs on its own thread because serial I/O blocks.

pub mod buffered;
pub mod framing;
pub mod serial;
pub mod transport;

pub use buffered::{
    CommandQueue, ConfirmedCommand, DispatchStep, FlowControlMode, QueuedCommand,
    DEFAULT_SEND_WINDOW,
};
pub use framing::LineFramer;
pub use serial::{
    list_ports, PortOpener, PortStreams, SerialPortInfo, SerialPortOpener, DEFAULT_BAUD_RATE,
};
pub use transport::{SerialConnector, Transport, TransportConfig};

use std::io;
use std::time::Duration;

/// Events reported by a link, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The port is open
    Connected,
    /// Every open attempt failed; the link is finished
    ConnectFailed {
        /// Attempts made
        attempts: u32,
        /// Time spent trying
        elapsed: Duration,
    },
    /// The open port failed and was closed; the link is finished
    Disconnected {
        /// The I/O error that closed the port
        reason: String,
    },
    /// A complete, non-empty response line
    LineReceived(String),
}

/// Callback a link uses to report events; may be called from any thread
pub type LinkEventSink = Box<dyn Fn(LinkEvent) + Send + 'static>;

/// Write side of an open (or opening) connection
pub trait Link: Send {
    /// Queue bytes for transmission without blocking
    ///
    /// Failures are reported later as [`LinkEvent::Disconnected`].
    fn write(&mut self, bytes: &[u8]);

    /// Ask the link to shut down; safe to call more than once
    fn stop(&mut self);

    /// Shut down and wait until the device is released
    ///
    /// Blocks for at most one read timeout of the underlying port.
    fn close(&mut self) {
        self.stop();
    }
}

/// Starts links to one device
pub trait Connector: Send {
    /// Start connecting; progress is reported through `sink`
    fn connect(&mut self, sink: LinkEventSink) -> io::Result<Box<dyn Link>>;

    /// Human-readable name of the target, for logs and errors
    fn target(&self) -> &str;
}
