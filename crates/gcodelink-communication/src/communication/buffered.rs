//! Command queue with character-counting flow control
//!
//! Implements the GRBL streaming protocol bookkeeping: an append-only queue of
//! submitted commands, a processed tail marking the oldest unconfirmed command,
//! and a send budget tracking how many bytes the device can still buffer.
//!
//! # Features
//! - Simple dispatch (one command in flight) and pipelined dispatch (many in flight)
//! - Strict FIFO acknowledgement matching by queue position
//! - Fire-and-forget commands that confirm themselves once they reach the head
//! - Compaction of confirmed entries

use crate::command::PreparedCommand;
use gcodelink_core::{
    CommandId, CommandInfo, CommandReply, ControllerError, ProtocolError, ReplyStatus,
};
use tokio::sync::oneshot;

/// Default size of the device's input buffer in bytes
pub const DEFAULT_SEND_WINDOW: usize = 128;

/// Dispatch policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControlMode {
    /// At most one unconfirmed command on the wire
    #[default]
    Simple,
    /// As many unconfirmed commands as the send budget allows
    Pipelined,
}

impl FlowControlMode {
    /// Pick the mode from the `advanced_flow_control` option
    pub fn from_advanced(advanced: bool) -> Self {
        if advanced {
            Self::Pipelined
        } else {
            Self::Simple
        }
    }
}

/// A command in the queue with its lifecycle flags
#[derive(Debug)]
pub struct QueuedCommand {
    id: CommandId,
    payload: Vec<u8>,
    expects_ack: bool,
    sent: bool,
    confirmed: bool,
    completion: Option<oneshot::Sender<CommandReply>>,
}

impl QueuedCommand {
    /// Queue sequence number
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Wire bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the device answers this command with `ok`/`error`
    pub fn expects_ack(&self) -> bool {
        self.expects_ack
    }

    /// Whether the bytes have been written
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Whether an acknowledgement has been matched
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Event snapshot of this command
    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            id: self.id,
            text: String::from_utf8_lossy(&self.payload)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
            expects_ack: self.expects_ack,
        }
    }
}

/// Outcome of confirming the head command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedCommand {
    /// The command that was confirmed
    pub info: CommandInfo,
    /// How it ended
    pub status: ReplyStatus,
    /// The command that is now at the head, if any
    pub next: Option<CommandInfo>,
}

/// One action taken by a dispatch pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStep {
    /// Payload written to the device
    Sent(CommandInfo),
    /// A fire-and-forget command confirmed itself
    Confirmed(ConfirmedCommand),
}

/// Ordered command queue plus the flow controller state
#[derive(Debug)]
pub struct CommandQueue {
    entries: Vec<QueuedCommand>,
    processed_tail: usize,
    next_id: u64,
    mode: FlowControlMode,
    window: usize,
    send_budget: usize,
}

impl CommandQueue {
    /// Create an empty queue with a full send budget
    pub fn new(mode: FlowControlMode, window: usize) -> Self {
        Self {
            entries: Vec::new(),
            processed_tail: 0,
            next_id: 0,
            mode,
            window,
            send_budget: window,
        }
    }

    /// Append a command; it becomes visible to the next dispatch pass
    ///
    /// A payload longer than the whole window could never be sent and is
    /// rejected.
    pub fn push(
        &mut self,
        command: PreparedCommand,
        completion: Option<oneshot::Sender<CommandReply>>,
    ) -> Result<CommandInfo, ControllerError> {
        if command.payload.len() > self.window {
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "{} byte command exceeds the {} byte send window",
                    command.payload.len(),
                    self.window
                ),
            });
        }

        let id = CommandId(self.next_id);
        self.next_id += 1;

        let entry = QueuedCommand {
            id,
            payload: command.payload,
            expects_ack: command.expects_ack,
            sent: false,
            confirmed: false,
            completion,
        };
        let info = entry.info();
        self.entries.push(entry);
        Ok(info)
    }

    /// Index of the next command a dispatch pass may write
    fn next_dispatchable(&self) -> Option<usize> {
        for (index, entry) in self.entries.iter().enumerate().skip(self.processed_tail) {
            if entry.sent {
                match self.mode {
                    FlowControlMode::Simple => return None,
                    FlowControlMode::Pipelined => continue,
                }
            }

            if entry.payload.len() > self.send_budget {
                return None;
            }

            return Some(index);
        }

        None
    }

    /// Whether the head was sent and will never be acknowledged
    fn head_self_confirms(&self) -> bool {
        self.entries
            .get(self.processed_tail)
            .is_some_and(|head| head.sent && !head.expects_ack)
    }

    /// Write every eligible command, in queue order
    ///
    /// Fire-and-forget commands are confirmed as soon as they are the head,
    /// which keeps confirmation strictly FIFO in pipelined mode.
    pub fn dispatch(&mut self, write: &mut dyn FnMut(&[u8])) -> Vec<DispatchStep> {
        let mut steps = Vec::new();

        loop {
            while self.head_self_confirms() {
                match self.confirm(ReplyStatus::Ok) {
                    Ok(confirmed) => steps.push(DispatchStep::Confirmed(confirmed)),
                    Err(_) => break,
                }
            }

            let Some(index) = self.next_dispatchable() else {
                break;
            };

            let entry = &mut self.entries[index];
            write(&entry.payload);
            entry.sent = true;
            self.send_budget -= entry.payload.len();
            steps.push(DispatchStep::Sent(entry.info()));
        }

        steps
    }

    /// Confirm the command at the processed tail
    ///
    /// Resolves its completion handle, returns its bytes to the send budget
    /// and advances the tail. Confirming with nothing in flight means the
    /// acknowledgements no longer line up with the queue.
    pub fn confirm(&mut self, status: ReplyStatus) -> Result<ConfirmedCommand, ProtocolError> {
        let Some(head) = self.entries.get_mut(self.processed_tail) else {
            return Err(ProtocolError::InvariantViolation {
                reason: format!("acknowledgement ({:?}) with an empty queue", status),
            });
        };

        if !head.sent {
            return Err(ProtocolError::InvariantViolation {
                reason: format!(
                    "acknowledgement ({:?}) for command {} that was never sent",
                    status, head.id
                ),
            });
        }

        if head.confirmed {
            return Err(ProtocolError::InvariantViolation {
                reason: format!("command {} confirmed twice", head.id),
            });
        }

        head.confirmed = true;
        if let Some(completion) = head.completion.take() {
            // The caller may have dropped its handle
            let _ = completion.send(CommandReply {
                id: head.id,
                status: status.clone(),
            });
        }
        self.send_budget += head.payload.len();
        let info = head.info();

        self.processed_tail += 1;
        let next = self.entries.get(self.processed_tail).map(QueuedCommand::info);

        Ok(ConfirmedCommand { info, status, next })
    }

    /// Resolve every sent-but-unconfirmed command as aborted
    ///
    /// Used when the device can no longer answer them (firmware reset or a
    /// lost link). Sent commands always form a prefix of the outstanding
    /// ones, so this only ever confirms the head.
    pub fn abort_in_flight(&mut self) -> Vec<ConfirmedCommand> {
        let mut aborted = Vec::new();
        while self
            .entries
            .get(self.processed_tail)
            .is_some_and(|head| head.sent)
        {
            match self.confirm(ReplyStatus::Aborted) {
                Ok(confirmed) => aborted.push(confirmed),
                Err(_) => break,
            }
        }
        aborted
    }

    /// Drop the completion handles of all unconfirmed commands
    ///
    /// Their callers observe the driver as stopped.
    pub fn reject_pending(&mut self) -> usize {
        let mut rejected = 0;
        for entry in self.entries.iter_mut().skip(self.processed_tail) {
            if entry.completion.take().is_some() {
                rejected += 1;
            }
        }
        rejected
    }

    /// Restore the full window minus whatever is still on the wire
    pub fn reset_budget(&mut self) {
        self.send_budget = self.window.saturating_sub(self.in_flight_bytes());
    }

    /// Remove confirmed entries from the front of the queue
    pub fn flush(&mut self) -> usize {
        let removed = self.processed_tail;
        self.entries.drain(..self.processed_tail);
        self.processed_tail = 0;
        removed
    }

    /// Check if every queued command has been confirmed
    pub fn is_drained(&self) -> bool {
        self.processed_tail == self.entries.len()
    }

    /// The oldest unconfirmed command
    pub fn head(&self) -> Option<&QueuedCommand> {
        self.entries.get(self.processed_tail)
    }

    /// Command at a queue position
    pub fn get(&self, index: usize) -> Option<&QueuedCommand> {
        self.entries.get(index)
    }

    /// Number of entries, confirmed ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the oldest unconfirmed command
    pub fn processed_tail(&self) -> usize {
        self.processed_tail
    }

    /// Number of unconfirmed commands
    pub fn outstanding(&self) -> usize {
        self.entries.len() - self.processed_tail
    }

    /// Number of commands written but not yet confirmed
    pub fn in_flight(&self) -> usize {
        self.entries[self.processed_tail..]
            .iter()
            .filter(|entry| entry.sent)
            .count()
    }

    /// Bytes written but not yet confirmed
    pub fn in_flight_bytes(&self) -> usize {
        self.entries[self.processed_tail..]
            .iter()
            .filter(|entry| entry.sent)
            .map(|entry| entry.payload.len())
            .sum()
    }

    /// Bytes the device is assumed able to accept
    pub fn send_budget(&self) -> usize {
        self.send_budget
    }

    /// Configured window size
    pub fn window(&self) -> usize {
        self.window
    }

    /// Dispatch policy
    pub fn mode(&self) -> FlowControlMode {
        self.mode
    }
}
