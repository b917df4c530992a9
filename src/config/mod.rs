//! Configuration module for ecu-link.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `ECU_LINK_CONFIG` environment variable (explicit path)
//! 2. `./ecu-link.toml` (current directory)
//! 3. `~/.config/ecu-link/ecu-link.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\ecu-link\ecu-link.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Selected configuration values can be overridden via environment variables.
//! The pattern is: `ECU_LINK_<SECTION>_<KEY>`
//!
//! Examples:
//! - `ECU_LINK_SERIAL_PORT=/dev/ttyUSB1`
//! - `ECU_LINK_SERIAL_BAUD=19200`
//! - `ECU_LINK_DEVICE_SLAVE_ID=17`
//! - `ECU_LINK_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```rust,ignore
//! use ecu_link::config::ConfigLoader;
//!
//! // Load configuration with automatic resolution
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Serial port: {}", config.serial.port);
//! println!("Slave id: {}", config.device.slave_id);
//!
//! // Or load with defaults only
//! let loader = ConfigLoader::with_defaults();
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, DataBitsCfg, DeviceConfig, DispatcherConfig, LogFormat, LoggingConfig, ParityCfg,
    SerialConfig, StopBitsCfg,
};
