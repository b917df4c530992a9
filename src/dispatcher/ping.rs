//! Keep-alive ping loop.
//!
//! A silently dead link produces no traffic on its own; the ping loop
//! guarantees a periodic Low-priority exchange so the worker notices. Each
//! successful ping also refreshes the last-known device snapshot. Failures
//! are absorbed without comment: the worker has already logged them and is
//! already reconnecting.

use super::command::{CommandQueue, Operation, Priority, Response};
use super::connection::ConnectionState;
use super::events::{DeviceSnapshot, EventBus, LinkEvent};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub(crate) struct PingLoop {
    queue: CommandQueue,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Sender<Option<DeviceSnapshot>>,
    events: EventBus,
    shutdown: CancellationToken,
    interval: Duration,
}

impl PingLoop {
    pub(crate) fn new(
        queue: CommandQueue,
        state: watch::Receiver<ConnectionState>,
        snapshot: watch::Sender<Option<DeviceSnapshot>>,
        events: EventBus,
        shutdown: CancellationToken,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            state,
            snapshot,
            events,
            shutdown,
            interval,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = self.state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // The cached snapshot is only as good as the link it came
                    // over; drop it the moment the port closes.
                    if !self.state.borrow().port_open {
                        self.snapshot.send_replace(None);
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            if !self.state.borrow().port_open || self.shutdown.is_cancelled() {
                trace!("skipping ping; port closed or stopping");
                continue;
            }

            // No separate deadline: the ping inherits whatever the command
            // path provides.
            let cancel = self.shutdown.child_token();
            match self.queue.submit(Operation::Ping, Priority::Low, cancel).await {
                Ok(Response::Snapshot(snapshot)) => {
                    // Re-check the flags: a ping that was in flight across a
                    // disconnect must not publish stale data.
                    if self.state.borrow().port_open && !self.shutdown.is_cancelled() {
                        trace!(registers = snapshot.registers.len(), "ping ok");
                        self.snapshot.send_replace(Some(snapshot.clone()));
                        self.events.publish(LinkEvent::PingReceived(snapshot));
                    }
                }
                Ok(other) => {
                    debug!(response = ?other, "unexpected ping response shape");
                }
                Err(_) => {
                    // The worker already logged and is already reconnecting.
                }
            }
        }
        debug!("ping loop stopped");
    }
}
