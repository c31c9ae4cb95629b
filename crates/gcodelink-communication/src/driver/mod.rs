//! G-code streaming driver
//!
//! Ties the transport, the command queue and the response interpreter
//! together behind a single-writer engine loop:
//! - [`Engine`]: the loop that owns all protocol state
//! - [`Handshake`]: connect, banner, settings, ready
//! - [`GcodeDriver`]: the non-blocking public handle

pub mod config;
pub mod controller;
pub mod engine;
pub mod handshake;

pub use config::DriverConfig;
pub use controller::{CommandHandle, GcodeDriver};
pub use engine::{Engine, EngineMessage};
pub use handshake::{Handshake, ReadyState};
