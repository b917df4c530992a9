//! Link events and the device snapshot.
//!
//! Connection and ping notifications are delivered through a broadcast
//! channel rather than a subscriber list, so reconnect churn cannot race
//! subscribe/unsubscribe bookkeeping. Subscribers that fall behind observe
//! `Lagged` and pick up from the current event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Last known state of the ECU, refreshed by the keep-alive ping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// First register of the status block.
    pub base_address: u16,
    /// Raw contents of the status block.
    pub registers: Vec<u16>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// Notifications published by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LinkEvent {
    /// The serial port opened (the device may still be absent).
    ConnectionOpened,
    /// The first command after (re)connect completed successfully.
    ConnectionConfirmed,
    /// A communication-class failure tore the link down.
    ConnectionLost,
    /// A keep-alive ping refreshed the device snapshot.
    PingReceived(DeviceSnapshot),
}

/// Broadcast fan-out for link events.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub(crate) fn publish(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }
}
