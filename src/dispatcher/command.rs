//! Commands, priorities and the bounded two-class queue.
//!
//! A `Command` is one pending request against the ECU: the operation, the
//! caller's cancellation token, and a single-use result slot. Commands travel
//! through one of two bounded FIFO queues (High, Low); when a queue is full
//! the submitting caller suspends until space frees up. This is deliberate
//! admission control: when the device is unresponsive, memory growth stops at
//! the queue capacities instead of ballooning silently.

use super::error::DispatchError;
use super::events::DeviceSnapshot;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Caller-classified urgency of a command.
///
/// High is for interactive/diagnostic requests, Low for background telemetry
/// and keep-alives. High strictly precedes Low; FIFO within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// One Modbus request against the ECU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read `count` holding registers starting at `address`.
    ReadHolding { address: u16, count: u16 },
    /// Read `count` input registers starting at `address`.
    ReadInput { address: u16, count: u16 },
    /// Read `count` coils starting at `address`.
    ReadCoils { address: u16, count: u16 },
    /// Read `count` discrete inputs starting at `address`.
    ReadDiscrete { address: u16, count: u16 },
    /// Write a single holding register.
    WriteRegister { address: u16, value: u16 },
    /// Write a block of holding registers.
    WriteRegisters { address: u16, values: Vec<u16> },
    /// Write a single coil.
    WriteCoil { address: u16, value: bool },
    /// Keep-alive: read the configured status block into a snapshot.
    Ping,
}

/// Successful outcome of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Register contents from a read.
    Registers(Vec<u16>),
    /// Coil/discrete contents from a read.
    Coils(Vec<bool>),
    /// A write was acknowledged.
    Written,
    /// A ping produced a fresh device snapshot.
    Snapshot(DeviceSnapshot),
}

/// A pending request, owned by the queue until dequeued and by the worker
/// until completion.
#[derive(Debug)]
pub(crate) struct Command {
    pub(crate) operation: Operation,
    pub(crate) cancel: CancellationToken,
    /// Single-fulfillment result slot. `complete` consumes the command, so
    /// the slot cannot be filled twice.
    done: oneshot::Sender<Result<Response, DispatchError>>,
}

impl Command {
    fn new(
        operation: Operation,
        cancel: CancellationToken,
        done: oneshot::Sender<Result<Response, DispatchError>>,
    ) -> Self {
        Self {
            operation,
            cancel,
            done,
        }
    }

    /// Fill the result slot. The receiver may already be gone (the caller
    /// gave up); that is not an error.
    pub(crate) fn complete(self, result: Result<Response, DispatchError>) {
        let _ = self.done.send(result);
    }
}

/// Producer side of the two-class queue. Cheap to clone; shared by callers,
/// the ping loop and every polling job.
#[derive(Debug, Clone)]
pub(crate) struct CommandQueue {
    high: mpsc::Sender<Command>,
    low: mpsc::Sender<Command>,
}

/// Consumer side, owned exclusively by the worker loop.
#[derive(Debug)]
pub(crate) struct CommandReceiver {
    high: mpsc::Receiver<Command>,
    low: mpsc::Receiver<Command>,
}

impl CommandQueue {
    /// Create the bounded queue pair.
    pub(crate) fn bounded(high_capacity: usize, low_capacity: usize) -> (Self, CommandReceiver) {
        let (high_tx, high_rx) = mpsc::channel(high_capacity);
        let (low_tx, low_rx) = mpsc::channel(low_capacity);
        (
            Self {
                high: high_tx,
                low: low_tx,
            },
            CommandReceiver {
                high: high_rx,
                low: low_rx,
            },
        )
    }

    /// Enqueue an operation and await its result.
    ///
    /// Suspends while the target queue is full (backpressure). The token
    /// cancels the wait at any point: while blocked on a full queue, while
    /// queued, or while executing.
    pub(crate) async fn submit(
        &self,
        operation: Operation,
        priority: Priority,
        cancel: CancellationToken,
    ) -> Result<Response, DispatchError> {
        let (done_tx, done_rx) = oneshot::channel();
        let command = Command::new(operation, cancel.clone(), done_tx);
        let sender = match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };

        tokio::select! {
            biased;
            sent = sender.send(command) => {
                if sent.is_err() {
                    return Err(DispatchError::ShuttingDown);
                }
            }
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
        }

        // Prefer a completed result over a cancellation that raced it.
        tokio::select! {
            biased;
            result = done_rx => result.unwrap_or(Err(DispatchError::ShuttingDown)),
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        }
    }
}

impl CommandReceiver {
    /// Take the next command under the strict-priority policy.
    ///
    /// High commands are served while any are queued; otherwise exactly one
    /// Low command is taken. With both queues empty, waits up to `wait` for
    /// either queue to receive an item, then returns `None` so the worker can
    /// re-check its shutdown and port flags.
    pub(crate) async fn next_command(&mut self, wait: Duration) -> Option<Command> {
        if let Ok(command) = self.high.try_recv() {
            return Some(command);
        }
        if let Ok(command) = self.low.try_recv() {
            return Some(command);
        }

        tokio::select! {
            biased;
            command = self.high.recv() => command,
            command = self.low.recv() => command,
            _ = tokio::time::sleep(wait) => None,
        }
    }

    /// Whether every producer handle is gone. Once this is true and both
    /// queues are drained, no command can ever arrive again.
    pub(crate) fn is_closed(&self) -> bool {
        self.high.is_closed() && self.low.is_closed()
    }

    /// Drain both queues, completing every still-queued command as cancelled.
    ///
    /// Used during teardown and when the link is torn down, so no caller is
    /// left waiting on a queue that will never be served again.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        while let Ok(command) = self.high.try_recv() {
            command.complete(Err(DispatchError::Cancelled));
            cancelled += 1;
        }
        while let Ok(command) = self.low.try_recv() {
            command.complete(Err(DispatchError::Cancelled));
            cancelled += 1;
        }
        cancelled
    }
}
