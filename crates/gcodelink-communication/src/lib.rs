//! # GCodeLink Communication
//!
//! Serial streaming engine for GRBL-style line protocols.
//! Opens the port on its own I/O thread, queues commands under
//! character-counting flow control, matches acknowledgements in order and
//! drives the connect/banner/settings handshake.

pub mod command;
pub mod communication;
pub mod driver;
pub mod firmware;

pub use command::{strip_comments, Command, GenericCommand, PreparedCommand, StatusPoll};

pub use communication::{
    list_ports, CommandQueue, Connector, FlowControlMode, Link, LinkEvent, LinkEventSink,
    PortOpener, PortStreams, SerialConnector, SerialPortInfo, SerialPortOpener, Transport,
    TransportConfig,
};

pub use driver::{CommandHandle, DriverConfig, Engine, EngineMessage, GcodeDriver, ReadyState};

pub use firmware::{DeviceSettings, Dialect, DialectKind, Response, ResponseInterpreter};
