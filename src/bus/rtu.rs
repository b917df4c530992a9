//! Modbus RTU bus implementation using tokio-modbus over tokio-serial.
//!
//! Provides the real transport for the dispatcher: a serial port opened with
//! the configured framing, with an RTU master attached for the configured
//! slave id. Every transaction is bounded by the configured read or write
//! timeout, since RTU itself carries no deadline.

use super::error::BusError;
use super::traits::{BusConnector, RegisterBus};
use crate::config::{Config, DataBitsCfg, ParityCfg, StopBitsCfg};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_modbus::client::rtu;
use tokio_modbus::prelude::*;
use tokio_serial::SerialStream;

/// Connector that opens the configured serial port and attaches an RTU master.
#[derive(Debug, Clone)]
pub struct RtuConnector {
    port_name: String,
    baud_rate: u32,
    data_bits: DataBitsCfg,
    parity: ParityCfg,
    stop_bits: StopBitsCfg,
    slave_id: u8,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RtuConnector {
    /// Build a connector from the loaded configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            port_name: config.serial.port.clone(),
            baud_rate: config.serial.baud,
            data_bits: config.serial.data_bits,
            parity: config.serial.parity,
            stop_bits: config.serial.stop_bits,
            slave_id: config.device.slave_id,
            read_timeout: config.dispatcher.read_timeout(),
            write_timeout: config.dispatcher.write_timeout(),
        }
    }
}

#[async_trait]
impl BusConnector for RtuConnector {
    async fn connect(&self) -> Result<Box<dyn RegisterBus>, BusError> {
        let mut builder = tokio_serial::new(&self.port_name, self.baud_rate);
        builder = builder
            .data_bits(convert_data_bits(self.data_bits))
            .parity(convert_parity(self.parity))
            .stop_bits(convert_stop_bits(self.stop_bits));

        let stream = SerialStream::open(&builder).map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => BusError::not_found(&self.port_name),
            tokio_serial::ErrorKind::InvalidInput => BusError::config(e.to_string()),
            _ => BusError::Io(std::io::Error::other(e.to_string())),
        })?;

        let ctx = rtu::attach_slave(stream, Slave(self.slave_id));

        Ok(Box::new(RtuBus {
            ctx,
            name: self.port_name.clone(),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }))
    }
}

/// RTU master bound to an open serial port.
pub struct RtuBus {
    ctx: tokio_modbus::client::Context,
    name: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

/// Run one transaction under the given deadline and flatten its result.
///
/// A free function rather than a method so it can run while `ctx` is mutably
/// borrowed by the pending call.
async fn run_with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, BusError>
where
    F: Future<Output = Result<Result<T, ExceptionCode>, tokio_modbus::Error>>,
{
    match tokio::time::timeout(deadline, call).await {
        Err(_) => Err(BusError::timeout(deadline)),
        Ok(result) => flatten(result),
    }
}

/// Collapse the nested tokio-modbus result into a `BusError`.
fn flatten<T>(
    result: Result<Result<T, ExceptionCode>, tokio_modbus::Error>,
) -> Result<T, BusError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(code)) => Err(BusError::Exception(code)),
        Err(err) => Err(match err {
            tokio_modbus::Error::Transport(io) => BusError::Io(io),
            #[allow(unreachable_patterns)]
            other => BusError::Protocol(other.to_string()),
        }),
    }
}

#[async_trait]
impl RegisterBus for RtuBus {
    async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        let deadline = self.read_timeout;
        let call = self.ctx.read_holding_registers(address, count);
        run_with_deadline(deadline, call).await
    }

    async fn read_input(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        let deadline = self.read_timeout;
        let call = self.ctx.read_input_registers(address, count);
        run_with_deadline(deadline, call).await
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, BusError> {
        let deadline = self.read_timeout;
        let call = self.ctx.read_coils(address, count);
        run_with_deadline(deadline, call).await
    }

    async fn read_discrete(&mut self, address: u16, count: u16) -> Result<Vec<bool>, BusError> {
        let deadline = self.read_timeout;
        let call = self.ctx.read_discrete_inputs(address, count);
        run_with_deadline(deadline, call).await
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        let deadline = self.write_timeout;
        let call = self.ctx.write_single_register(address, value);
        run_with_deadline(deadline, call).await
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), BusError> {
        let deadline = self.write_timeout;
        let call = self.ctx.write_multiple_registers(address, values);
        run_with_deadline(deadline, call).await
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusError> {
        let deadline = self.write_timeout;
        let call = self.ctx.write_single_coil(address, value);
        run_with_deadline(deadline, call).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for RtuBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuBus")
            .field("name", &self.name)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

// Helper conversion functions for tokio-serial types

fn convert_data_bits(bits: DataBitsCfg) -> tokio_serial::DataBits {
    match bits {
        DataBitsCfg::Five => tokio_serial::DataBits::Five,
        DataBitsCfg::Six => tokio_serial::DataBits::Six,
        DataBitsCfg::Seven => tokio_serial::DataBits::Seven,
        DataBitsCfg::Eight => tokio_serial::DataBits::Eight,
    }
}

fn convert_parity(parity: ParityCfg) -> tokio_serial::Parity {
    match parity {
        ParityCfg::None => tokio_serial::Parity::None,
        ParityCfg::Odd => tokio_serial::Parity::Odd,
        ParityCfg::Even => tokio_serial::Parity::Even,
    }
}

fn convert_stop_bits(bits: StopBitsCfg) -> tokio_serial::StopBits {
    match bits {
        StopBitsCfg::One => tokio_serial::StopBits::One,
        StopBitsCfg::Two => tokio_serial::StopBits::Two,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_data_bits_conversion() {
        assert_eq!(
            convert_data_bits(DataBitsCfg::Eight),
            tokio_serial::DataBits::Eight
        );
        assert_eq!(
            convert_data_bits(DataBitsCfg::Seven),
            tokio_serial::DataBits::Seven
        );
    }

    #[test]
    fn test_parity_conversion() {
        assert_eq!(convert_parity(ParityCfg::Even), tokio_serial::Parity::Even);
        assert_eq!(convert_parity(ParityCfg::None), tokio_serial::Parity::None);
    }

    #[test]
    fn test_stop_bits_conversion() {
        assert_eq!(
            convert_stop_bits(StopBitsCfg::Two),
            tokio_serial::StopBits::Two
        );
        assert_eq!(
            convert_stop_bits(StopBitsCfg::One),
            tokio_serial::StopBits::One
        );
    }

    #[tokio::test]
    async fn test_connect_reports_missing_port() {
        let mut config = Config::default();
        config.serial.port = "/dev/nonexistent_rtu_port_12345".to_string();
        let connector = RtuConnector::new(&config);

        let result = connector.connect().await;
        assert!(result.is_err());
        if let Err(e) = result {
            match e {
                BusError::NotFound(name) => assert!(name.contains("nonexistent")),
                // Some platforms report a plain I/O error for a missing node.
                BusError::Io(_) => {}
                other => panic!("Expected NotFound or Io error, got: {other:?}"),
            }
        }
    }
}
