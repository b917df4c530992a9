//! The resilient serial protocol dispatcher.
//!
//! Multiplexes all traffic to the ECU over one half-duplex Modbus RTU
//! channel while tolerating cable faults, device resets and an unresponsive
//! device, and while giving interactive requests priority over background
//! telemetry.
//!
//! # Architecture
//!
//! ```text
//! callers ───┐                        ┌──> Connection Manager ──> bus
//! ping loop ─┼──> Command Queue ──> Worker Loop
//! polling ───┘     (High / Low)        └──> events / state watch
//! ```
//!
//! Producers enqueue commands; exactly one worker loop owns the link and
//! executes them strictly by priority. The ping loop injects keep-alives,
//! polling jobs generate recurring reads, and the pause gate lets anyone
//! request exclusive quiet time on the wire.

mod command;
mod connection;
mod error;
mod events;
mod pause;
mod ping;
mod polling;
mod worker;

pub use command::{Operation, Priority, Response};
pub use connection::ConnectionState;
pub use error::{DispatchError, DispatchResult};
pub use events::{DeviceSnapshot, LinkEvent};
pub use pause::PauseGate;
pub use polling::{PollCallback, PollReading, PollingHandle, PollingSpec};

use crate::bus::BusConnector;
use crate::config::Config;
use command::CommandQueue;
use connection::ConnectionManager;
use events::EventBus;
use parking_lot::Mutex;
use polling::{JobInner, JobRegistry};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use worker::Worker;

/// Capacity of the event broadcast channel. Slow subscribers past this
/// observe `Lagged` rather than blocking the dispatcher.
const EVENT_CAPACITY: usize = 64;

/// Public face of the dispatcher.
///
/// Created with [`EcuDispatcher::spawn`]; all methods take `&self`, so the
/// dispatcher can be shared behind an `Arc` across tasks and threads.
pub struct EcuDispatcher {
    config: Arc<Config>,
    queue: CommandQueue,
    gate: PauseGate,
    events: EventBus,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<Option<DeviceSnapshot>>,
    jobs: Arc<JobRegistry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl EcuDispatcher {
    /// Start the dispatcher: spawns the worker loop and the ping loop.
    ///
    /// The connector decides what the dispatcher talks to: the real RTU
    /// transport in production, a mock in tests.
    pub fn spawn(config: Config, connector: Arc<dyn BusConnector>) -> Self {
        let config = Arc::new(config);
        let (queue, receiver) =
            CommandQueue::bounded(config.dispatcher.high_capacity, config.dispatcher.low_capacity);
        let gate = PauseGate::new();
        let events = EventBus::new(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        let worker = Worker::new(
            ConnectionManager::new(connector, state_tx),
            receiver,
            Arc::clone(&config),
            events.clone(),
            gate.clone(),
            shutdown.clone(),
        );
        let ping = ping::PingLoop::new(
            queue.clone(),
            state_rx.clone(),
            snapshot_tx,
            events.clone(),
            shutdown.clone(),
            config.dispatcher.ping_interval(),
        );

        let tasks = vec![tokio::spawn(worker.run()), tokio::spawn(ping.run())];

        Self {
            config,
            queue,
            gate,
            events,
            state: state_rx,
            snapshot: snapshot_rx,
            jobs: Arc::new(Mutex::new(Default::default())),
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// Enqueue a command and await its result.
    ///
    /// Suspends while the target priority queue is full (admission control).
    /// The token cancels the command at any stage: while blocked on a full
    /// queue, while queued (discarded without execution), or while executing
    /// (best-effort; an in-flight transaction may still complete on the wire
    /// but its result is discarded).
    ///
    /// # Errors
    ///
    /// - `DispatchError::Cancelled` if the token fired first
    /// - `DispatchError::ShuttingDown` if the dispatcher is stopping
    /// - `DispatchError::Bus` for transport and device faults; communication
    ///   -class faults also tear the link down for reconnection
    pub async fn execute(
        &self,
        operation: Operation,
        priority: Priority,
        cancel: CancellationToken,
    ) -> DispatchResult<Response> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        self.queue.submit(operation, priority, cancel).await
    }

    /// Register a recurring read job. Fails if the name is already taken.
    ///
    /// The returned handle starts, stops and removes the job; registration
    /// itself does not start it.
    ///
    /// # Errors
    ///
    /// - `DispatchError::DuplicateJob` if a job with this name exists
    /// - `DispatchError::ShuttingDown` if the dispatcher is stopping
    pub fn register_polling_job(&self, spec: PollingSpec) -> DispatchResult<PollingHandle> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&spec.name) {
            return Err(DispatchError::DuplicateJob(spec.name));
        }

        let inner = JobInner::new(
            spec,
            self.queue.clone(),
            self.gate.clone(),
            self.shutdown.clone(),
        );
        jobs.insert(inner.name().to_string(), Arc::clone(&inner));
        debug!(job = %inner.name(), "polling job registered");

        Ok(PollingHandle {
            inner,
            registry: Arc::downgrade(&self.jobs),
        })
    }

    /// Subscribe to connection and ping events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel for connection state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Last snapshot delivered by the ping loop, if the link has produced one
    /// since it last opened.
    pub fn last_snapshot(&self) -> Option<DeviceSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Request exclusive quiet time on the link. Blocks until all active
    /// polls have drained; nestable. See [`PauseGate::pause`].
    pub async fn pause(&self) {
        self.gate.pause().await;
    }

    /// Release one level of pause. See [`PauseGate::resume`].
    pub fn resume(&self) {
        self.gate.resume();
    }

    /// The pause gate itself, for callers that want to scope pauses.
    pub fn pause_gate(&self) -> &PauseGate {
        &self.gate
    }

    /// Stop everything: polling jobs, the ping loop and the worker loop.
    ///
    /// In-flight work gets the configured grace period, after which the
    /// remaining tasks are aborted. Queued commands complete as cancelled.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let jobs: Vec<Arc<JobInner>> = self.jobs.lock().values().cloned().collect();
        for job in jobs {
            job.stop().await;
        }

        let grace = self.config.dispatcher.shutdown_grace();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("task exceeded shutdown grace; aborting");
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for EcuDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcuDispatcher")
            .field("state", &self.state())
            .field("jobs", &self.jobs.lock().len())
            .finish()
    }
}
