//! Connection management.
//!
//! Owns the bus handle for the worker loop and publishes the connection
//! state. Opening a serial port commonly succeeds even when the physical
//! device is absent or still booting, so "port open" and "device responding"
//! are tracked as distinct facts: `device_confirmed` only becomes true after
//! the first command following a (re)connect executes cleanly.

use crate::bus::{BusConnector, BusError, RegisterBus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Observable state of the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    /// The serial port is open and a master is attached.
    pub port_open: bool,
    /// A command has completed successfully since the last (re)connect.
    pub device_confirmed: bool,
    /// The worker is between connect attempts after a failure.
    pub reconnecting: bool,
}

/// Owns the bus and the state channel. Only the worker loop touches this;
/// everyone else observes through the watch receiver.
#[derive(Debug)]
pub(crate) struct ConnectionManager {
    connector: Arc<dyn BusConnector>,
    bus: Option<Box<dyn RegisterBus>>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub(crate) fn new(
        connector: Arc<dyn BusConnector>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            connector,
            bus: None,
            state,
        }
    }

    /// Perform a single connection attempt. No-op if already open.
    ///
    /// Retry policy belongs to the caller (the worker loop); this method
    /// reports each failure and nothing else.
    pub(crate) async fn open(&mut self) -> Result<(), BusError> {
        if self.bus.is_some() {
            return Ok(());
        }

        let bus = self.connector.connect().await?;
        info!(transport = bus.name(), "serial port opened");
        self.bus = Some(bus);
        self.state.send_modify(|s| {
            s.port_open = true;
            s.device_confirmed = false;
            s.reconnecting = false;
        });
        Ok(())
    }

    /// Drop the bus and reset the open/confirmed flags.
    pub(crate) fn close(&mut self) {
        if self.bus.take().is_some() {
            debug!("serial port closed");
        }
        self.state.send_modify(|s| {
            s.port_open = false;
            s.device_confirmed = false;
        });
    }

    /// Record the first successful exchange after a (re)connect.
    ///
    /// Returns true if the device was not yet confirmed.
    pub(crate) fn confirm(&mut self) -> bool {
        let mut newly_confirmed = false;
        self.state.send_if_modified(|s| {
            if s.device_confirmed {
                false
            } else {
                s.device_confirmed = true;
                newly_confirmed = true;
                true
            }
        });
        newly_confirmed
    }

    pub(crate) fn set_reconnecting(&mut self, reconnecting: bool) {
        self.state.send_if_modified(|s| {
            if s.reconnecting == reconnecting {
                false
            } else {
                s.reconnecting = reconnecting;
                true
            }
        });
    }

    pub(crate) fn is_open(&self) -> bool {
        self.bus.is_some()
    }

    pub(crate) fn bus_mut(&mut self) -> Option<&mut Box<dyn RegisterBus>> {
        self.bus.as_mut()
    }
}
