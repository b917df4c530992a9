//! The worker loop: sole executor against the physical link.
//!
//! The link is half-duplex, so exactly one consumer executes commands by
//! construction; no lock guards the wire. Each connected episode runs:
//! connect (retrying on a fixed delay until shutdown), settle, then process
//! commands strictly by priority until a communication-class failure tears
//! the link down. After a teardown the queued commands are cancelled and the
//! loop goes back to connecting.

use super::command::{CommandReceiver, Operation, Response};
use super::connection::ConnectionManager;
use super::error::DispatchError;
use super::events::{DeviceSnapshot, EventBus, LinkEvent};
use super::pause::PauseGate;
use crate::bus::{BusError, RegisterBus};
use crate::config::Config;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why the command-processing loop stopped.
enum LoopExit {
    Shutdown,
    LinkDown,
}

/// Outcome of racing one command against its cancellation signals.
enum ExecOutcome {
    Done(Result<Response, BusError>),
    Cancelled,
    Shutdown,
}

pub(crate) struct Worker {
    connection: ConnectionManager,
    receiver: CommandReceiver,
    config: Arc<Config>,
    events: EventBus,
    gate: PauseGate,
    shutdown: CancellationToken,
    /// Whether this worker currently holds the pause gate closed for a
    /// reconnect episode.
    holding_gate: bool,
}

impl Worker {
    pub(crate) fn new(
        connection: ConnectionManager,
        receiver: CommandReceiver,
        config: Arc<Config>,
        events: EventBus,
        gate: PauseGate,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connection,
            receiver,
            config,
            events,
            gate,
            shutdown,
            holding_gate: false,
        }
    }

    /// Run until shutdown. Owns the link for its entire lifetime.
    pub(crate) async fn run(mut self) {
        info!("worker loop started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.ensure_connected().await.is_err() {
                break;
            }
            if self.settle().await.is_err() {
                break;
            }

            // The port is usable again; let background telemetry resume.
            if self.holding_gate {
                self.gate.resume();
                self.holding_gate = false;
            }
            self.events.publish(LinkEvent::ConnectionOpened);

            match self.process_commands().await {
                LoopExit::Shutdown => break,
                LoopExit::LinkDown => {
                    if self.handle_disconnect().await.is_err() {
                        break;
                    }
                }
            }
        }
        self.teardown();
        info!("worker loop stopped");
    }

    /// Connect, retrying on a fixed delay until it succeeds or shutdown
    /// fires. Connection faults never propagate; only cancellation does.
    async fn ensure_connected(&mut self) -> Result<(), ()> {
        let delay = self.config.dispatcher.reconnect_delay();
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                return Err(());
            }
            match self.connection.open().await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    attempt += 1;
                    warn!(%error, attempt, delay_ms = delay.as_millis() as u64,
                        "connect failed; retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => return Err(()),
                    }
                }
            }
        }
    }

    /// Quiet time immediately after the port opens. Devices commonly need it;
    /// sending too early produces spurious errors on a freshly opened port.
    async fn settle(&mut self) -> Result<(), ()> {
        let delay = self.config.dispatcher.settle_delay();
        if delay.is_zero() {
            return Ok(());
        }
        debug!(delay_ms = delay.as_millis() as u64, "settling after port open");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.shutdown.cancelled() => Err(()),
        }
    }

    /// Serve commands under the strict-priority policy until shutdown or a
    /// communication-class failure.
    async fn process_commands(&mut self) -> LoopExit {
        let shutdown = self.shutdown.clone();
        let wait = self.config.dispatcher.command_wait_timeout();
        let device = self.config.device.clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return LoopExit::Shutdown,
                command = self.receiver.next_command(wait) => command,
            };
            let Some(command) = next else {
                // Idle wait elapsed, or every producer is gone for good.
                if self.receiver.is_closed() {
                    return LoopExit::Shutdown;
                }
                continue;
            };

            // Discard commands whose cancellation fired while queued.
            if command.cancel.is_cancelled() {
                debug!(operation = ?command.operation, "dropping cancelled command");
                command.complete(Err(DispatchError::Cancelled));
                continue;
            }

            // The command is a local value here for the duration of its
            // execution; nothing else can observe or complete it.
            let outcome = {
                let cancel = command.cancel.clone();
                let Some(bus) = self.connection.bus_mut() else {
                    command.complete(Err(DispatchError::Bus(BusError::NotConnected)));
                    return LoopExit::LinkDown;
                };
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => ExecOutcome::Shutdown,
                    _ = cancel.cancelled() => ExecOutcome::Cancelled,
                    result = run_operation(bus.as_mut(), &command.operation, &device) => {
                        ExecOutcome::Done(result)
                    }
                }
            };

            match outcome {
                ExecOutcome::Shutdown => {
                    command.complete(Err(DispatchError::ShuttingDown));
                    return LoopExit::Shutdown;
                }
                ExecOutcome::Cancelled => {
                    // Best-effort: the transaction on the wire may still have
                    // completed, but its result is discarded.
                    debug!(operation = ?command.operation, "command cancelled mid-flight");
                    command.complete(Err(DispatchError::Cancelled));
                }
                ExecOutcome::Done(Ok(response)) => {
                    if self.connection.confirm() {
                        info!("device confirmed");
                        self.events.publish(LinkEvent::ConnectionConfirmed);
                    }
                    command.complete(Ok(response));
                }
                ExecOutcome::Done(Err(error)) if error.is_communication() => {
                    warn!(%error, operation = ?command.operation,
                        "communication failure; tearing link down");
                    command.complete(Err(DispatchError::Bus(error)));
                    return LoopExit::LinkDown;
                }
                ExecOutcome::Done(Err(error)) => {
                    debug!(%error, operation = ?command.operation,
                        "command failed at protocol level");
                    command.complete(Err(DispatchError::Bus(error)));
                }
            }
        }
    }

    /// Tear the episode down and wait out the reconnect delay.
    ///
    /// Queued commands are cancelled *before* the gate is held so a mid-tick
    /// polling job can unwind instead of waiting on a queue nobody serves.
    async fn handle_disconnect(&mut self) -> Result<(), ()> {
        self.connection.close();
        let dropped = self.receiver.cancel_all();
        if dropped > 0 {
            debug!(dropped, "cancelled queued commands on disconnect");
        }
        self.events.publish(LinkEvent::ConnectionLost);
        if !self.holding_gate {
            self.gate.hold();
            self.holding_gate = true;
        }
        self.connection.set_reconnecting(true);

        let delay = self.config.dispatcher.reconnect_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.shutdown.cancelled() => Err(()),
        }
    }

    /// Final cleanup: nothing may be left waiting on the queue.
    fn teardown(&mut self) {
        let dropped = self.receiver.cancel_all();
        if dropped > 0 {
            debug!(dropped, "cancelled queued commands on shutdown");
        }
        if self.holding_gate {
            self.gate.resume();
            self.holding_gate = false;
        }
        self.connection.close();
    }
}

/// Execute one operation against the bus.
async fn run_operation(
    bus: &mut dyn RegisterBus,
    operation: &Operation,
    device: &crate::config::DeviceConfig,
) -> Result<Response, BusError> {
    match operation {
        Operation::ReadHolding { address, count } => {
            bus.read_holding(*address, *count).await.map(Response::Registers)
        }
        Operation::ReadInput { address, count } => {
            bus.read_input(*address, *count).await.map(Response::Registers)
        }
        Operation::ReadCoils { address, count } => {
            bus.read_coils(*address, *count).await.map(Response::Coils)
        }
        Operation::ReadDiscrete { address, count } => {
            bus.read_discrete(*address, *count).await.map(Response::Coils)
        }
        Operation::WriteRegister { address, value } => {
            bus.write_register(*address, *value).await.map(|_| Response::Written)
        }
        Operation::WriteRegisters { address, values } => bus
            .write_registers(*address, values)
            .await
            .map(|_| Response::Written),
        Operation::WriteCoil { address, value } => {
            bus.write_coil(*address, *value).await.map(|_| Response::Written)
        }
        Operation::Ping => bus
            .read_holding(device.status_address, device.status_count)
            .await
            .map(|registers| {
                Response::Snapshot(DeviceSnapshot {
                    base_address: device.status_address,
                    registers,
                    taken_at: Utc::now(),
                })
            }),
    }
}
