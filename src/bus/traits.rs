//! Core traits for the Modbus bus abstraction.
//!
//! Defines the `RegisterBus` trait that allows both a real RTU master and
//! mock implementations to be used interchangeably, plus the `BusConnector`
//! trait that produces a bus from whatever transport it manages. The worker
//! loop only ever sees these traits; hardware stays behind the seam.

use super::error::BusError;
use async_trait::async_trait;

/// Trait for Modbus data-area operations.
///
/// This trait abstracts over the transactions the dispatcher can execute,
/// allowing a real serial RTU master and mock implementations for testing.
///
/// Note: methods take `&mut self` because the underlying link is half-duplex;
/// a bus instance is owned exclusively by the worker loop and never shared.
#[async_trait]
pub trait RegisterBus: Send + std::fmt::Debug {
    /// Read `count` holding registers starting at `address`.
    async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError>;

    /// Read `count` input registers starting at `address`.
    async fn read_input(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError>;

    /// Read `count` coils starting at `address`.
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, BusError>;

    /// Read `count` discrete inputs starting at `address`.
    async fn read_discrete(&mut self, address: u16, count: u16) -> Result<Vec<bool>, BusError>;

    /// Write a single holding register.
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError>;

    /// Write a block of holding registers starting at `address`.
    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), BusError>;

    /// Write a single coil.
    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusError>;

    /// Get the name/path of the underlying transport.
    fn name(&self) -> &str;
}

/// Trait for opening a bus over whatever transport it manages.
///
/// A connector performs exactly one connection attempt per call; retry policy
/// belongs to the caller. Dropping the returned bus releases the transport.
#[async_trait]
pub trait BusConnector: Send + Sync + std::fmt::Debug {
    /// Attempt to open the transport and attach a bus to it.
    async fn connect(&self) -> Result<Box<dyn RegisterBus>, BusError>;
}
