//! Bus abstraction layer for Modbus communication.
//!
//! This module isolates everything that touches the wire:
//!
//! - `traits`: the `RegisterBus` / `BusConnector` seam the dispatcher runs on
//! - `rtu`: the real implementation (tokio-modbus RTU over tokio-serial)
//! - `mock`: a scriptable in-memory device for tests and benches
//! - `error`: transport errors and communication-class detection

mod error;
mod mock;
mod rtu;
mod traits;

pub use error::BusError;
pub use mock::{BusOp, MockBus, MockBusHandle, MockConnector, MockFault};
pub use rtu::{RtuBus, RtuConnector};
pub use traits::{BusConnector, RegisterBus};
