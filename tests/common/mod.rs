//! Shared test utilities for ecu-link tests.
//!
//! This module provides common test infrastructure including:
//! - A configuration profile with tight timings for fast tests
//! - Dispatcher wiring against the mock bus
//! - Event stream helpers

#![allow(dead_code)]

use ecu_link::bus::MockBusHandle;
use ecu_link::config::Config;
use ecu_link::dispatcher::{EcuDispatcher, LinkEvent};
use std::time::Duration;
use tokio::sync::broadcast;

/// A configuration with timings tightened for tests.
///
/// The ping interval is effectively disabled so individual tests stay
/// deterministic; tests that exercise the ping loop override it.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.dispatcher.read_timeout_ms = 200;
    config.dispatcher.write_timeout_ms = 200;
    config.dispatcher.reconnect_delay_ms = 40;
    config.dispatcher.settle_delay_ms = 20;
    config.dispatcher.ping_interval_ms = 60_000;
    config.dispatcher.command_wait_timeout_ms = 25;
    config.dispatcher.shutdown_grace_ms = 2_000;
    config
}

/// Spawn a dispatcher against a fresh mock bus.
///
/// The returned handle scripts the device: canned registers, connect
/// failures, injected faults.
pub fn spawn_mock_dispatcher(config: Config) -> (EcuDispatcher, MockBusHandle) {
    let handle = MockBusHandle::new();
    let dispatcher = EcuDispatcher::spawn(config, handle.connector());
    (dispatcher, handle)
}

/// Await the next event matching `want`, skipping others, within `timeout`.
///
/// Panics with a description of what was expected if the deadline passes.
pub async fn expect_event(
    events: &mut broadcast::Receiver<LinkEvent>,
    timeout: Duration,
    want: impl Fn(&LinkEvent) -> bool,
) -> LinkEvent {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for expected link event")
            .expect("event stream closed while waiting");
        if want(&event) {
            return event;
        }
    }
}

/// Collect every event already delivered, without waiting.
pub fn drain_events(events: &mut broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Count occurrences of connection-lost among already-delivered events.
pub fn count_lost(events: &[LinkEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, LinkEvent::ConnectionLost))
        .count()
}
