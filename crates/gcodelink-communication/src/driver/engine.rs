//! Engine loop
//!
//! The single writer for all protocol state. Link events, submissions and
//! control requests arrive as [`EngineMessage`]s on one ordered channel and
//! are handled one at a time, so the queue, the send budget, the settings map
//! and the handshake need no locks. The only shared state is the published
//! [`DeviceSnapshot`], which the engine overwrites after every message.

use super::config::DriverConfig;
use super::handshake::{Handshake, ReadyState};
use crate::command::{PreparedCommand, LINE_TERMINATOR};
use crate::communication::{
    CommandQueue, ConfirmedCommand, Connector, DispatchStep, Link, LinkEvent, LinkEventSink,
};
use crate::firmware::{DeviceSettings, Response, ResponseInterpreter};
use gcodelink_core::{
    CommandInfo, CommandReply, ConnectionError, ConnectionState, DeviceEvent, DeviceSnapshot,
    ProtocolError, ReplyStatus, STATUS_UNKNOWN,
};
use parking_lot::RwLock;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Requests handled by the engine loop
#[derive(Debug)]
pub enum EngineMessage {
    /// Something happened on the link of connection epoch `epoch`
    Link {
        /// Epoch the event belongs to
        epoch: u64,
        /// The event
        event: LinkEvent,
    },
    /// Queue a command
    Submit {
        /// Frozen payload
        command: PreparedCommand,
        /// Resolved once the command is confirmed
        reply: oneshot::Sender<CommandReply>,
    },
    /// Resolve once every queued command has been confirmed
    WaitDrained(oneshot::Sender<()>),
    /// Drop confirmed entries; replies with the number removed
    Flush(oneshot::Sender<usize>),
    /// Forget the last status token
    ResetStatus(oneshot::Sender<()>),
    /// Start a new connection epoch
    Reconnect,
    /// Shut down
    Stop,
}

/// Protocol engine state
pub struct Engine {
    config: DriverConfig,
    queue: CommandQueue,
    interpreter: ResponseInterpreter,
    handshake: Handshake,
    settings: DeviceSettings,
    status: String,
    limit_switch: Option<bool>,
    drain_waiters: Vec<oneshot::Sender<()>>,
    connector: Box<dyn Connector>,
    link: Option<Box<dyn Link>>,
    epoch: u64,
    mailbox: mpsc::WeakUnboundedSender<EngineMessage>,
    events: broadcast::Sender<DeviceEvent>,
    snapshot: Arc<RwLock<DeviceSnapshot>>,
    stopped: bool,
}

impl Engine {
    /// Create an engine
    ///
    /// `mailbox` is the sending side of the channel the engine is fed from;
    /// link events are posted there tagged with their epoch. It is held
    /// weakly so the loop ends once every driver handle is gone.
    pub fn new(
        config: DriverConfig,
        connector: Box<dyn Connector>,
        mailbox: mpsc::WeakUnboundedSender<EngineMessage>,
        events: broadcast::Sender<DeviceEvent>,
        snapshot: Arc<RwLock<DeviceSnapshot>>,
    ) -> Self {
        let queue = CommandQueue::new(config.flow_control_mode(), config.send_window_bytes);
        let interpreter = ResponseInterpreter::new(config.dialect.clone());

        Self {
            config,
            queue,
            interpreter,
            handshake: Handshake::new(),
            settings: DeviceSettings::new(),
            status: STATUS_UNKNOWN.to_string(),
            limit_switch: None,
            drain_waiters: Vec::new(),
            connector,
            link: None,
            epoch: 0,
            mailbox,
            events,
            snapshot,
            stopped: false,
        }
    }

    /// Receiver for the ready signal
    pub fn ready_receiver(&self) -> watch::Receiver<ReadyState> {
        self.handshake.subscribe()
    }

    /// Current connection epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Handshake state
    pub fn state(&self) -> ConnectionState {
        self.handshake.state()
    }

    /// Command queue
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Device settings collected in this epoch
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Last status token
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Check if the engine has shut down
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Run until stopped or until every driver handle is dropped
    pub async fn run(mut self, mut messages: mpsc::UnboundedReceiver<EngineMessage>) {
        if self.start().is_continue() {
            while let Some(message) = messages.recv().await {
                if self.handle(message).is_break() {
                    break;
                }
            }
        }

        self.shutdown();
        tracing::debug!("Engine for {} exited", self.config.port);
    }

    /// Open the first connection
    pub fn start(&mut self) -> ControlFlow<()> {
        self.connect()
    }

    /// Handle one message
    pub fn handle(&mut self, message: EngineMessage) -> ControlFlow<()> {
        let flow = match message {
            EngineMessage::Link { epoch, event } => {
                if epoch == self.epoch {
                    self.on_link_event(event)
                } else {
                    tracing::trace!("Dropping event from stale epoch {}: {:?}", epoch, event);
                    ControlFlow::Continue(())
                }
            }
            EngineMessage::Submit { command, reply } => {
                self.submit(command, Some(reply));
                ControlFlow::Continue(())
            }
            EngineMessage::WaitDrained(waiter) => {
                if self.queue.is_drained() {
                    let _ = waiter.send(());
                } else {
                    self.drain_waiters.push(waiter);
                }
                ControlFlow::Continue(())
            }
            EngineMessage::Flush(reply) => {
                let removed = self.queue.flush();
                tracing::debug!("Flushed {} confirmed commands", removed);
                let _ = reply.send(removed);
                ControlFlow::Continue(())
            }
            EngineMessage::ResetStatus(reply) => {
                self.status = STATUS_UNKNOWN.to_string();
                let _ = reply.send(());
                ControlFlow::Continue(())
            }
            EngineMessage::Reconnect => self.reconnect(),
            EngineMessage::Stop => {
                self.shutdown();
                ControlFlow::Break(())
            }
        };

        self.publish_snapshot();
        flow
    }

    fn emit(&self, event: DeviceEvent) {
        tracing::trace!("Event: {}", event);
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn announce_state(&self, state: ConnectionState) {
        self.emit(DeviceEvent::StateChanged(state));
        tracing::debug!("Connection state: {}", state);
    }

    fn link_sink(&self) -> LinkEventSink {
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        Box::new(move |event| {
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(EngineMessage::Link { epoch, event });
            }
        })
    }

    /// Begin a connection epoch and start the link
    fn connect(&mut self) -> ControlFlow<()> {
        self.epoch += 1;
        self.handshake.begin_connect();
        self.announce_state(ConnectionState::Connecting);
        tracing::info!(
            "Connecting to {} (epoch {})",
            self.connector.target(),
            self.epoch
        );

        let sink = self.link_sink();
        match self.connector.connect(sink) {
            Ok(link) => {
                self.link = Some(link);
                ControlFlow::Continue(())
            }
            Err(e) => {
                tracing::error!("Failed to start link to {}: {}", self.config.port, e);
                self.handshake.connect_failed(ConnectionError::FailedToOpen {
                    port: self.config.port.clone(),
                    reason: e.to_string(),
                });
                self.announce_state(ConnectionState::Failed);
                ControlFlow::Break(())
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) -> ControlFlow<()> {
        match event {
            LinkEvent::Connected => {
                tracing::info!("Connected to {}", self.config.port);
                self.handshake.link_opened();
                self.emit(DeviceEvent::Connected(true));
                self.announce_state(ConnectionState::Connected);

                if self.config.reset_on_connect {
                    if let (Some(byte), Some(link)) =
                        (self.config.dialect.reset_byte, self.link.as_mut())
                    {
                        tracing::debug!("Sending soft reset 0x{:02x}", byte);
                        link.write(&[byte]);
                    }
                }
                ControlFlow::Continue(())
            }
            LinkEvent::ConnectFailed { attempts, elapsed } => {
                let error = ConnectionError::ConnectionTimeout {
                    port: self.config.port.clone(),
                    attempts,
                    timeout_ms: elapsed.as_millis() as u64,
                };
                tracing::error!("{}", error);
                self.link = None;
                self.handshake.connect_failed(error);
                self.announce_state(ConnectionState::Failed);
                ControlFlow::Break(())
            }
            LinkEvent::Disconnected { reason } => {
                tracing::warn!("Lost connection to {}: {}", self.config.port, reason);
                if let Some(mut link) = self.link.take() {
                    link.stop();
                }
                self.abort_in_flight();
                self.handshake.link_lost(&reason);
                self.emit(DeviceEvent::Connected(false));
                self.announce_state(ConnectionState::Disconnected);
                ControlFlow::Continue(())
            }
            LinkEvent::LineReceived(line) => {
                self.on_line(line);
                ControlFlow::Continue(())
            }
        }
    }

    /// Apply every meaning of a received line, then dispatch
    fn on_line(&mut self, line: String) {
        tracing::debug!("<< {}", line);
        let responses = self.interpreter.interpret(&line);
        self.emit(DeviceEvent::ResponseReceived(line));

        for response in responses {
            match response {
                Response::Status(status) => {
                    if status != self.status {
                        self.status = status.clone();
                        self.emit(DeviceEvent::StatusChanged(status));
                    }
                }
                Response::Ok => self.confirm(ReplyStatus::Ok),
                Response::Banner => self.on_banner(),
                Response::Setting { key, value } => self.settings.upsert(key, value),
                Response::Error { code } => {
                    tracing::warn!("Device reported error {}", code);
                    self.confirm(ReplyStatus::Error { code });
                }
                Response::LimitSwitch(on) => {
                    self.limit_switch = Some(on);
                    self.emit(DeviceEvent::LimitSwitch(on));
                }
            }
        }

        self.dispatch();
    }

    /// The firmware (re)started: restart the settings handshake
    fn on_banner(&mut self) {
        tracing::info!(
            "{} banner received in state {}",
            self.config.dialect.kind,
            self.handshake.state()
        );

        // A reset discards whatever the device had buffered
        self.abort_in_flight();
        self.settings.clear();

        let mut payload = self.config.dialect.settings_query.clone().into_bytes();
        payload.push(LINE_TERMINATOR);
        let query = PreparedCommand {
            payload,
            expects_ack: true,
        };

        match self.submit(query, None) {
            Some(info) => {
                self.handshake.banner(info.id);
                self.announce_state(ConnectionState::AwaitingSettings);
            }
            None => self.violation(ProtocolError::InvariantViolation {
                reason: "settings query does not fit the send window".to_string(),
            }),
        }
    }

    /// Append a command and try to send it
    fn submit(
        &mut self,
        command: PreparedCommand,
        reply: Option<oneshot::Sender<CommandReply>>,
    ) -> Option<CommandInfo> {
        let was_drained = self.queue.is_drained();

        match self.queue.push(command, reply) {
            Ok(info) => {
                tracing::debug!("Queued {}", info);
                self.emit(DeviceEvent::CommandQueued(info.clone()));
                if was_drained {
                    self.emit(DeviceEvent::CommandStarted(info.clone()));
                }
                self.dispatch();
                Some(info)
            }
            Err(e) => {
                tracing::warn!("Rejected command: {}", e);
                None
            }
        }
    }

    /// Write every command the flow controller allows
    fn dispatch(&mut self) {
        if !self.handshake.state().allows_dispatch() {
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };

        let steps = self.queue.dispatch(&mut |bytes| link.write(bytes));
        for step in steps {
            match step {
                DispatchStep::Sent(info) => tracing::debug!(">> {}", info),
                DispatchStep::Confirmed(confirmed) => self.on_confirmed(confirmed),
            }
        }

        self.notify_drained();
    }

    /// Confirm the head command with a device answer
    fn confirm(&mut self, status: ReplyStatus) {
        match self.queue.confirm(status) {
            Ok(confirmed) => {
                self.on_confirmed(confirmed);
                self.dispatch();
                self.notify_drained();
            }
            Err(e) => self.violation(e),
        }
    }

    fn on_confirmed(&mut self, confirmed: ConfirmedCommand) {
        let ConfirmedCommand { info, status, next } = confirmed;
        tracing::debug!("Processed {} ({:?})", info, status);

        let became_ready = self.handshake.command_confirmed(info.id, &status);
        self.emit(DeviceEvent::CommandProcessed(info, status));
        if became_ready {
            tracing::info!("{} ready", self.config.port);
            self.announce_state(ConnectionState::Ready);
        }

        if let Some(next) = next {
            self.emit(DeviceEvent::CommandStarted(next));
        }
    }

    /// Resolve commands the device will never answer
    fn abort_in_flight(&mut self) {
        let aborted = self.queue.abort_in_flight();
        if !aborted.is_empty() {
            tracing::warn!("Aborted {} in-flight commands", aborted.len());
        }
        for confirmed in aborted {
            self.on_confirmed(confirmed);
        }
        self.queue.reset_budget();
        self.notify_drained();
    }

    fn violation(&mut self, error: ProtocolError) {
        tracing::error!("{}", error);
        self.emit(DeviceEvent::ProtocolViolation(error.to_string()));
    }

    fn notify_drained(&mut self) {
        if self.queue.is_drained() {
            for waiter in self.drain_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// Drop the current link and start a new epoch
    fn reconnect(&mut self) -> ControlFlow<()> {
        tracing::info!("Reconnecting to {}", self.config.port);
        let was_connected = self.handshake.state().is_connected();

        // Ports open exclusively; the old thread must let go before reopening
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.abort_in_flight();
        self.settings.clear();
        self.status = STATUS_UNKNOWN.to_string();
        self.limit_switch = None;

        if was_connected {
            self.emit(DeviceEvent::Connected(false));
        }
        self.connect()
    }

    /// Stop the link and reject everything still waiting; runs once
    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let was_connected = self.handshake.state().is_connected();
        if let Some(mut link) = self.link.take() {
            link.stop();
        }

        let rejected = self.queue.reject_pending();
        self.drain_waiters.clear();
        self.handshake.stopped();
        tracing::info!(
            "Driver for {} stopped ({} pending commands rejected)",
            self.config.port,
            rejected
        );

        if was_connected {
            let state = self.handshake.state();
            self.emit(DeviceEvent::Connected(false));
            self.announce_state(state);
        }
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let mut snapshot = self.snapshot.write();
        snapshot.state = self.handshake.state();
        snapshot.status.clone_from(&self.status);
        snapshot.settings = self.settings.to_map();
        snapshot.limit_switch = self.limit_switch;
        snapshot.queued = self.queue.len();
        snapshot.outstanding = self.queue.outstanding();
        snapshot.send_budget = self.queue.send_budget();
    }
}
