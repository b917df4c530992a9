//! ECU Link Library
//!
//! This library provides the resilient serial protocol dispatcher of a boiler
//! test-bench controller: it multiplexes all traffic to the boiler's
//! electronic control unit over one half-duplex Modbus RTU channel, tolerates
//! cable faults, device resets and an unresponsive device, and gives
//! interactive diagnostic requests priority over background telemetry.
//!
//! # Modules
//!
//! - `config`: Configuration management with TOML support
//! - `bus`: Bus abstraction layer (RTU transport, mock, transport errors)
//! - `dispatcher`: Command queue, worker loop, ping loop, pause gate and
//!   polling jobs
//!
//! # Example
//!
//! ```rust,no_run
//! use ecu_link::bus::RtuConnector;
//! use ecu_link::config::ConfigLoader;
//! use ecu_link::dispatcher::{EcuDispatcher, Operation, Priority};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?.into_config();
//! let connector = Arc::new(RtuConnector::new(&config));
//! let dispatcher = EcuDispatcher::spawn(config, connector);
//!
//! let response = dispatcher
//!     .execute(
//!         Operation::ReadHolding { address: 0x10, count: 2 },
//!         Priority::High,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod dispatcher;

// Re-export commonly used types for convenience
pub use bus::{BusConnector, BusError, MockBusHandle, RegisterBus, RtuConnector};
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use dispatcher::{
    ConnectionState, DeviceSnapshot, DispatchError, DispatchResult, EcuDispatcher, LinkEvent,
    Operation, PauseGate, PollCallback, PollReading, PollingHandle, PollingSpec, Priority,
    Response,
};
