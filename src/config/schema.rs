//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port configuration
    pub serial: SerialConfig,
    /// Target device (ECU) configuration
    pub device: DeviceConfig,
    /// Dispatcher timing and queue configuration
    pub dispatcher: DispatcherConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            device: DeviceConfig::default(),
            dispatcher: DispatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Check the configuration for values the dispatcher cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the offending key.
    pub fn validate(&self) -> super::ConfigResult<()> {
        use super::ConfigError;

        if self.serial.baud == 0 {
            return Err(ConfigError::validation(
                "serial.baud",
                "baud rate must be non-zero",
            ));
        }
        if self.device.slave_id == 0 || self.device.slave_id > 247 {
            return Err(ConfigError::validation(
                "device.slave_id",
                "slave id must be in 1..=247",
            ));
        }
        if self.device.status_count == 0 {
            return Err(ConfigError::validation(
                "device.status_count",
                "status block must contain at least one register",
            ));
        }
        if self.dispatcher.high_capacity == 0 || self.dispatcher.low_capacity == 0 {
            return Err(ConfigError::validation(
                "dispatcher.high_capacity/low_capacity",
                "queue capacities must be non-zero",
            ));
        }
        if self.dispatcher.ping_interval_ms == 0 {
            return Err(ConfigError::validation(
                "dispatcher.ping_interval_ms",
                "ping interval must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub port: String,
    /// Baud rate
    pub baud: u32,
    /// Number of data bits per character
    pub data_bits: DataBitsCfg,
    /// Parity checking mode
    pub parity: ParityCfg,
    /// Number of stop bits
    pub stop_bits: StopBitsCfg,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 9600,
            data_bits: DataBitsCfg::Eight,
            parity: ParityCfg::None,
            stop_bits: StopBitsCfg::One,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBitsCfg {
    Five,
    Six,
    Seven,
    Eight,
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParityCfg {
    None,
    Odd,
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBitsCfg {
    One,
    Two,
}

/// Target device configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Modbus slave id of the ECU (1..=247)
    pub slave_id: u8,
    /// First holding register of the status block read by pings
    pub status_address: u16,
    /// Number of registers in the status block
    pub status_count: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            slave_id: 1,
            status_address: 0,
            status_count: 8,
        }
    }
}

/// Dispatcher timing and queue configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Deadline for a single read transaction in milliseconds
    pub read_timeout_ms: u64,
    /// Deadline for a single write transaction in milliseconds
    pub write_timeout_ms: u64,
    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Quiet time after the port opens before the first frame is sent
    pub settle_delay_ms: u64,
    /// Interval between keep-alive pings in milliseconds
    pub ping_interval_ms: u64,
    /// Capacity of the high-priority command queue
    pub high_capacity: usize,
    /// Capacity of the low-priority command queue
    pub low_capacity: usize,
    /// How long the worker waits for a command before re-checking its flags
    pub command_wait_timeout_ms: u64,
    /// Grace period for in-flight work during shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 500,
            write_timeout_ms: 500,
            reconnect_delay_ms: 2000,
            settle_delay_ms: 500,
            ping_interval_ms: 5000,
            high_capacity: 8,
            low_capacity: 32,
            command_wait_timeout_ms: 250,
            shutdown_grace_ms: 3000,
        }
    }
}

impl DispatcherConfig {
    /// Get the read transaction deadline as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Get the write transaction deadline as Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Get the reconnect delay as Duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Get the post-open settling delay as Duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Get the ping interval as Duration
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Get the command wait timeout as Duration
    pub fn command_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.command_wait_timeout_ms)
    }

    /// Get the shutdown grace period as Duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    Pretty,
    /// Compact format
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}
