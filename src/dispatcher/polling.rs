//! Polling jobs: independently schedulable recurring register reads.
//!
//! Each job owns a periodic loop that consults the pause gate before doing
//! any I/O, reads its configured registers one by one through the normal
//! Low-priority command path, and delivers whatever succeeded to its
//! callback. A failing address is skipped, not fatal; a failing tick is
//! logged, not fatal. Background telemetry keeps its timer running no
//! matter what a single tick does.

use super::command::{CommandQueue, Operation, Priority, Response};
use super::error::DispatchError;
use super::pause::PauseGate;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Values delivered to a polling callback. Contains only the addresses that
/// read successfully this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReading {
    /// Name of the job that produced the reading.
    pub job: String,
    /// (address, value) pairs in configured order.
    pub values: Vec<(u16, u16)>,
    /// When the tick completed.
    pub taken_at: DateTime<Utc>,
}

/// Callback invoked with each delivered reading.
pub type PollCallback = Arc<dyn Fn(PollReading) + Send + Sync>;

/// Registration data for a polling job.
#[derive(Clone)]
pub struct PollingSpec {
    /// Unique job name.
    pub name: String,
    /// Holding registers to read, one transaction each.
    pub addresses: Vec<u16>,
    /// Time between ticks. The first tick fires one interval after start.
    pub interval: Duration,
    /// Receiver of the delivered readings.
    pub callback: PollCallback,
}

impl std::fmt::Debug for PollingSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingSpec")
            .field("name", &self.name)
            .field("addresses", &self.addresses)
            .field("interval", &self.interval)
            .finish()
    }
}

pub(crate) type JobRegistry = Mutex<HashMap<String, Arc<JobInner>>>;

/// Running state of a started job.
struct JobRuntime {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub(crate) struct JobInner {
    spec: PollingSpec,
    queue: CommandQueue,
    gate: PauseGate,
    shutdown: CancellationToken,
    runtime: Mutex<Option<JobRuntime>>,
}

impl JobInner {
    pub(crate) fn new(
        spec: PollingSpec,
        queue: CommandQueue,
        gate: PauseGate,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            spec,
            queue,
            gate,
            shutdown,
            runtime: Mutex::new(None),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.spec.name
    }

    pub(crate) fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Start the periodic loop. Idempotent if already running.
    pub(crate) fn start(self: &Arc<Self>) {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return;
        }
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_loop(Arc::clone(self), cancel.clone()));
        *runtime = Some(JobRuntime { cancel, task });
        debug!(job = %self.spec.name, "polling job started");
    }

    /// Stop the loop and wait for it to fully terminate. Idempotent if
    /// already stopped; after this returns it is safe to dispose anything
    /// the callback depends on.
    pub(crate) async fn stop(&self) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            let _ = runtime.task.await;
            debug!(job = %self.spec.name, "polling job stopped");
        }
    }
}

/// Handle returned by `register_polling_job`.
///
/// Dropping the handle does not stop or remove the job; call `remove` for
/// that.
#[derive(Clone)]
pub struct PollingHandle {
    pub(crate) inner: Arc<JobInner>,
    pub(crate) registry: Weak<JobRegistry>,
}

impl PollingHandle {
    /// Name the job was registered under.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Whether the job's loop is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Start the job. Idempotent if already running.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Stop the job, waiting for the running loop to fully terminate.
    /// Idempotent if already stopped.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// Stop the job and remove it from the dispatcher's registry.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownJob` if the job was already removed.
    pub async fn remove(&self) -> Result<(), DispatchError> {
        self.inner.stop().await;
        let Some(registry) = self.registry.upgrade() else {
            return Err(DispatchError::ShuttingDown);
        };
        let result = match registry.lock().remove(self.inner.name()) {
            Some(_) => Ok(()),
            None => Err(DispatchError::UnknownJob(self.inner.name().to_string())),
        };
        result
    }
}

impl std::fmt::Debug for PollingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingHandle")
            .field("name", &self.inner.name())
            .field("running", &self.inner.is_running())
            .finish()
    }
}

/// The periodic loop of one job.
async fn run_loop(inner: Arc<JobInner>, cancel: CancellationToken) {
    let mut ticker = interval_at(
        Instant::now() + inner.spec.interval,
        inner.spec.interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // Priority operations and reconnects close the gate; wait here so
        // ticks start at a clean boundary.
        if !inner.gate.wait_if_paused(&cancel).await {
            break;
        }

        inner.gate.enter_poll();
        run_tick(&inner, &cancel).await;
        inner.gate.exit_poll();
    }
}

/// Execute one tick: read each address individually, deliver what succeeded.
async fn run_tick(inner: &JobInner, cancel: &CancellationToken) {
    let mut values = Vec::with_capacity(inner.spec.addresses.len());

    for &address in &inner.spec.addresses {
        if cancel.is_cancelled() {
            return;
        }
        let result = inner
            .queue
            .submit(
                Operation::ReadHolding { address, count: 1 },
                Priority::Low,
                cancel.child_token(),
            )
            .await;
        match result {
            Ok(Response::Registers(registers)) => {
                if let Some(value) = registers.first() {
                    values.push((address, *value));
                }
            }
            Ok(other) => {
                warn!(job = %inner.spec.name, response = ?other,
                    "unexpected poll response shape");
            }
            Err(error) => {
                // A single address failure is skipped, not fatal to the tick.
                debug!(job = %inner.spec.name, address, %error,
                    "register read failed; skipping");
            }
        }
    }

    // Partial results still count, as long as something succeeded.
    if !values.is_empty() {
        (inner.spec.callback)(PollReading {
            job: inner.spec.name.clone(),
            values,
            taken_at: Utc::now(),
        });
    }
}
