//! Connection handshake state machine
//!
//! `Disconnected -> Connecting -> Connected -> AwaitingSettings -> Ready`,
//! with `Connecting -> Failed` when every open attempt fails.
//!
//! Each connection epoch has one ready signal. It is resolved at most once:
//! to [`ReadyState::Ready`] when the settings query issued after the banner
//! is confirmed, or to a failure. A later banner re-enters
//! `AwaitingSettings` and returns to `Ready` without touching the signal.

use gcodelink_core::{CommandId, ConnectionError, ConnectionState, ReplyStatus};
use tokio::sync::watch;

/// Value carried by the ready signal
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadyState {
    /// Handshake still in progress
    #[default]
    Pending,
    /// Handshake completed
    Ready,
    /// The link never became ready
    Failed(ConnectionError),
    /// The driver shut down first
    Stopped,
}

impl ReadyState {
    /// Check if the signal has been resolved
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ReadyState::Pending)
    }
}

/// Handshake state owned by the engine loop
#[derive(Debug)]
pub struct Handshake {
    state: ConnectionState,
    settings_command: Option<CommandId>,
    ready: watch::Sender<ReadyState>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Create a handshake in `Disconnected` with a pending ready signal
    pub fn new() -> Self {
        let (ready, _) = watch::channel(ReadyState::Pending);
        Self {
            state: ConnectionState::Disconnected,
            settings_command: None,
            ready,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current value of the ready signal
    pub fn ready_state(&self) -> ReadyState {
        self.ready.borrow().clone()
    }

    /// Receiver for the ready signal
    pub fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.ready.subscribe()
    }

    /// The settings query the handshake is waiting on
    pub fn settings_command(&self) -> Option<CommandId> {
        self.settings_command
    }

    /// Resolve the ready signal unless it already is
    fn resolve(&self, value: ReadyState) -> bool {
        self.ready.send_if_modified(|current| {
            if current.is_resolved() {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Start a connection epoch with a fresh ready signal
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.settings_command = None;
        self.ready.send_replace(ReadyState::Pending);
    }

    /// The port opened; wait for the banner
    pub fn link_opened(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// A banner arrived and `settings_command` was queued
    pub fn banner(&mut self, settings_command: CommandId) {
        self.state = ConnectionState::AwaitingSettings;
        self.settings_command = Some(settings_command);
    }

    /// Record a confirmed command; returns `true` on entering `Ready`
    ///
    /// Only the outstanding settings query matters, and only when the
    /// device actually answered it. An aborted query means a newer banner
    /// has replaced it.
    pub fn command_confirmed(&mut self, id: CommandId, status: &ReplyStatus) -> bool {
        if self.settings_command != Some(id) || *status == ReplyStatus::Aborted {
            return false;
        }

        self.settings_command = None;
        self.state = ConnectionState::Ready;
        self.resolve(ReadyState::Ready);
        true
    }

    /// Every open attempt failed
    pub fn connect_failed(&mut self, error: ConnectionError) {
        self.state = ConnectionState::Failed;
        self.settings_command = None;
        self.resolve(ReadyState::Failed(error));
    }

    /// The open link was lost
    ///
    /// A handshake that had not finished yet fails with the loss.
    pub fn link_lost(&mut self, reason: &str) {
        self.state = ConnectionState::Disconnected;
        self.settings_command = None;
        self.resolve(ReadyState::Failed(ConnectionError::ConnectionLost {
            reason: reason.to_string(),
        }));
    }

    /// The driver is shutting down
    pub fn stopped(&mut self) {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
        self.settings_command = None;
        self.resolve(ReadyState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_resolves_once() {
        let mut handshake = Handshake::new();
        let ready = handshake.subscribe();

        handshake.begin_connect();
        handshake.link_opened();
        handshake.banner(CommandId(0));
        assert_eq!(handshake.state(), ConnectionState::AwaitingSettings);

        assert!(handshake.command_confirmed(CommandId(0), &ReplyStatus::Ok));
        assert_eq!(*ready.borrow(), ReadyState::Ready);

        // Second banner while ready
        handshake.banner(CommandId(5));
        assert_eq!(handshake.state(), ConnectionState::AwaitingSettings);
        handshake.link_lost("unplugged");
        assert_eq!(*ready.borrow(), ReadyState::Ready);
    }

    #[test]
    fn test_aborted_settings_query_is_ignored() {
        let mut handshake = Handshake::new();
        handshake.begin_connect();
        handshake.link_opened();
        handshake.banner(CommandId(3));
        assert!(!handshake.command_confirmed(CommandId(3), &ReplyStatus::Aborted));
        assert!(!handshake.command_confirmed(CommandId(2), &ReplyStatus::Ok));
        assert_eq!(handshake.state(), ConnectionState::AwaitingSettings);
        assert_eq!(handshake.ready_state(), ReadyState::Pending);
    }

    #[test]
    fn test_connect_failed() {
        let mut handshake = Handshake::new();
        handshake.begin_connect();
        handshake.connect_failed(ConnectionError::ConnectionTimeout {
            port: "COM9".to_string(),
            attempts: 5,
            timeout_ms: 4000,
        });
        assert_eq!(handshake.state(), ConnectionState::Failed);
        assert!(matches!(handshake.ready_state(), ReadyState::Failed(_)));

        handshake.stopped();
        assert_eq!(handshake.state(), ConnectionState::Failed);
        assert!(matches!(handshake.ready_state(), ReadyState::Failed(_)));
    }
}
