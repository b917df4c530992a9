//! Nestable pause/resume gate with an active-poll counter.
//!
//! Any component can request exclusive quiet time on the link: `pause`
//! closes the gate and waits for polls that are already running to drain
//! (a running poll is allowed to finish, never aborted). Polling jobs check
//! `wait_if_paused` before any I/O and count themselves in and out around
//! each tick. The gate supports nesting: N `pause` calls require N `resume`
//! calls before it reopens.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Interval for the drain wait inside `pause`. Pauses are rare and
/// short-lived; responsiveness stays well under the 50 ms bound.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct GateState {
    /// Pause nesting depth; the gate is open iff this is zero.
    depth: u32,
    /// Number of polls currently inside a tick.
    active_polls: u32,
}

#[derive(Debug, Default)]
struct GateInner {
    state: Mutex<GateState>,
    /// Signalled when the depth returns to zero.
    reopened: Notify,
}

/// Shared pause gate handle.
#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    inner: Arc<GateInner>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the gate is currently open (no pause in effect).
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().depth == 0
    }

    /// Current pause nesting depth.
    pub fn depth(&self) -> u32 {
        self.inner.state.lock().depth
    }

    /// Number of polls currently inside a tick.
    pub fn active_polls(&self) -> u32 {
        self.inner.state.lock().active_polls
    }

    /// Close the gate and wait until every active poll has drained.
    ///
    /// Nestable: each `pause` must be matched by a `resume`. A poll that is
    /// already past the gate finishes its tick normally; this call returns
    /// once none remain inside.
    pub async fn pause(&self) {
        self.hold();
        while self.active_polls() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Close the gate without waiting for active polls to drain.
    ///
    /// Used by the worker during reconnect episodes, which must keep running
    /// while a mid-tick poll unwinds through its cancelled commands.
    pub(crate) fn hold(&self) {
        self.inner.state.lock().depth += 1;
    }

    /// Reopen one nesting level. The gate reopens when the depth returns to
    /// zero; waiters in `wait_if_paused` are woken at that point.
    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.depth > 0, "resume without matching pause");
        state.depth = state.depth.saturating_sub(1);
        let reopened = state.depth == 0;
        drop(state);
        if reopened {
            self.inner.reopened.notify_waiters();
        }
    }

    /// Mark a poll as running. Call after `wait_if_paused` lets the tick
    /// proceed, and match with `exit_poll` when the tick finishes.
    pub fn enter_poll(&self) {
        self.inner.state.lock().active_polls += 1;
    }

    /// Mark a poll as finished.
    pub fn exit_poll(&self) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.active_polls > 0, "exit_poll without matching enter");
        state.active_polls = state.active_polls.saturating_sub(1);
    }

    /// Suspend until the gate is open, or until `cancel` fires.
    ///
    /// Returns `false` when cancelled. Polling jobs call this before every
    /// tick so a pause (or a reconnect episode) suspends all background
    /// telemetry at a clean boundary.
    pub async fn wait_if_paused(&self, cancel: &CancellationToken) -> bool {
        loop {
            // Register for the reopen signal before checking the state, so a
            // resume racing this check cannot be missed.
            let reopened = self.inner.reopened.notified();
            if self.is_open() {
                return true;
            }
            tokio::select! {
                _ = reopened => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }
}
