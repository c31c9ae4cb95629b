//! Public driver handle
//!
//! [`GcodeDriver`] is a cheap front for the engine loop running on a Tokio
//! task. Every method posts a message to the loop and returns without
//! blocking; results come back through one-shot handles.

use super::config::DriverConfig;
use super::engine::{Engine, EngineMessage};
use super::handshake::ReadyState;
use crate::command::{Command, PreparedCommand, StatusPoll};
use crate::communication::{Connector, PortOpener, SerialConnector, SerialPortOpener};
use gcodelink_core::{
    CommandReply, ConnectionState, ControllerError, DeviceEvent, DeviceSnapshot, Error, Result,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Completion handle for one submitted command
///
/// Resolves to the device's reply, or to [`ControllerError::Stopped`] if
/// the driver shut down before the command was confirmed.
#[derive(Debug)]
pub struct CommandHandle {
    reply: oneshot::Receiver<CommandReply>,
}

impl Future for CommandHandle {
    type Output = Result<CommandReply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply)
            .poll(cx)
            .map(|reply| reply.map_err(|_| ControllerError::Stopped.into()))
    }
}

/// Handle to a running G-code streaming engine
pub struct GcodeDriver {
    config: DriverConfig,
    mailbox: mpsc::UnboundedSender<EngineMessage>,
    events: broadcast::Sender<DeviceEvent>,
    ready: watch::Receiver<ReadyState>,
    snapshot: Arc<RwLock<DeviceSnapshot>>,
    task: Option<JoinHandle<()>>,
}

impl GcodeDriver {
    /// Connect to a serial port with the default opener
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: DriverConfig) -> Self {
        Self::start(config, Arc::new(SerialPortOpener::default()))
    }

    /// Connect through a custom port opener
    pub fn start(config: DriverConfig, opener: Arc<dyn PortOpener>) -> Self {
        let connector = SerialConnector::new(config.transport_config(), opener);
        Self::with_connector(config, Box::new(connector))
    }

    /// Start the engine loop over any connector
    pub fn with_connector(config: DriverConfig, connector: Box<dyn Connector>) -> Self {
        let (mailbox, messages) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let snapshot = Arc::new(RwLock::new(DeviceSnapshot::default()));

        let engine = Engine::new(
            config.clone(),
            connector,
            mailbox.downgrade(),
            events.clone(),
            snapshot.clone(),
        );
        let ready = engine.ready_receiver();
        let task = tokio::spawn(engine.run(messages));

        Self {
            config,
            mailbox,
            events,
            ready,
            snapshot,
            task: Some(task),
        }
    }

    /// Driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn post(&self, message: EngineMessage) -> Result<()> {
        self.mailbox
            .send(message)
            .map_err(|_| ControllerError::Stopped.into())
    }

    /// Queue a command
    ///
    /// Never blocks. The returned handle resolves once the device has
    /// answered the command (or, for fire-and-forget commands, once it
    /// has been sent and reached the head of the queue).
    pub fn submit(&self, command: &dyn Command) -> Result<CommandHandle> {
        let command = PreparedCommand::from_command(command);
        if command.payload.len() > self.config.send_window_bytes {
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "{} byte command {:?} exceeds the {} byte send window",
                    command.payload.len(),
                    command.text(),
                    self.config.send_window_bytes
                ),
            }
            .into());
        }

        let (reply, receiver) = oneshot::channel();
        self.post(EngineMessage::Submit { command, reply })?;
        Ok(CommandHandle { reply: receiver })
    }

    /// Wait until every queued command has been confirmed
    pub async fn wait_queue_drained(&self) -> Result<()> {
        let (waiter, drained) = oneshot::channel();
        self.post(EngineMessage::WaitDrained(waiter))?;
        drained.await.map_err(|_| ControllerError::Stopped.into())
    }

    /// Wait for the handshake of the current connection to finish
    ///
    /// Fails with the connection error if the port never opened or the
    /// link was lost before the handshake completed.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.ready.clone();
        let state = match ready.wait_for(ReadyState::is_resolved).await {
            Ok(state) => state.clone(),
            Err(_) => ReadyState::Stopped,
        };

        match state {
            ReadyState::Ready => Ok(()),
            ReadyState::Failed(error) => Err(error.into()),
            ReadyState::Stopped | ReadyState::Pending => Err(ControllerError::Stopped.into()),
        }
    }

    /// Subscribe to the outbound event stream
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Latest published device state
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.read().clone()
    }

    /// Handshake state
    pub fn state(&self) -> ConnectionState {
        self.snapshot.read().state
    }

    /// Last status token reported by the device
    pub fn status(&self) -> String {
        self.snapshot.read().status.clone()
    }

    /// Firmware settings reported in this connection
    pub fn settings(&self) -> BTreeMap<u32, String> {
        self.snapshot.read().settings.clone()
    }

    /// Poll the device status until it reports `Idle`
    pub async fn wait_for_idle(&self) -> Result<()> {
        let (reset, done) = oneshot::channel();
        self.post(EngineMessage::ResetStatus(reset))?;
        done.await.map_err(|_| Error::from(ControllerError::Stopped))?;

        let poll = StatusPoll::for_dialect(&self.config.dialect);
        let mut interval = tokio::time::interval(self.config.idle_poll_interval);
        loop {
            interval.tick().await;
            if self.snapshot.read().is_idle() {
                return Ok(());
            }
            self.submit(&poll)?.await?;
        }
    }

    /// Drop confirmed commands from the queue; returns how many
    pub async fn flush(&self) -> Result<usize> {
        let (reply, removed) = oneshot::channel();
        self.post(EngineMessage::Flush(reply))?;
        removed.await.map_err(|_| ControllerError::Stopped.into())
    }

    /// Close the current link and connect again
    ///
    /// Commands already sent are resolved as aborted; unsent commands stay
    /// queued and go out once the new connection is ready.
    pub fn reconnect(&self) -> Result<()> {
        self.post(EngineMessage::Reconnect)
    }

    /// Stop the engine and the transport
    ///
    /// Every unresolved command handle and drain waiter fails with
    /// [`ControllerError::Stopped`]. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.mailbox.send(EngineMessage::Stop);
    }

    /// Stop and wait for the engine task to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Engine task failed: {}", e);
            }
        }
    }
}

impl Drop for GcodeDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
