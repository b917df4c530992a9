//! Mock bus implementation for testing.
//!
//! Provides a `MockBus` that simulates an ECU behind a Modbus RTU link
//! without requiring actual hardware. Supports canned register data,
//! scripted connect failures, fault injection and an operation log.

use super::error::BusError;
use super::traits::{BusConnector, RegisterBus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One executed bus operation, recorded for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    ReadHolding(u16, u16),
    ReadInput(u16, u16),
    ReadCoils(u16, u16),
    ReadDiscrete(u16, u16),
    WriteRegister(u16, u16),
    WriteRegisters(u16, usize),
    WriteCoil(u16, bool),
}

/// Faults a test can inject into the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// The transaction times out.
    Timeout,
    /// The transaction fails with a transport-level I/O error.
    Io(std::io::ErrorKind),
    /// The device answers with an exception code.
    Exception,
}

impl MockFault {
    fn into_error(self) -> BusError {
        match self {
            Self::Timeout => BusError::timeout(Duration::from_millis(50)),
            Self::Io(kind) => BusError::Io(std::io::Error::new(kind, "injected fault")),
            Self::Exception => {
                BusError::Exception(tokio_modbus::ExceptionCode::IllegalDataAddress)
            }
        }
    }
}

/// Inner state of the mock, protected by a mutex for interior mutability.
#[derive(Debug, Default)]
struct MockBusState {
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    discrete: HashMap<u16, bool>,
    /// Log of all executed operations, including failed ones.
    op_log: Vec<BusOp>,
    /// Faults to raise on upcoming operations, in order.
    pending_faults: VecDeque<MockFault>,
    /// When set, every operation fails with a broken-pipe I/O error.
    offline: bool,
    /// Number of upcoming connect attempts that must fail.
    fail_connects: u32,
    /// Total connect attempts observed.
    connect_attempts: u32,
    /// Artificial latency applied to every operation.
    response_delay: Duration,
}

/// Shared handle controlling a mock bus from a test.
///
/// The handle, the connector and every bus it produces share one state, so a
/// test keeps scripting the device across reconnects.
///
/// # Example
/// ```
/// use ecu_link::bus::MockBusHandle;
///
/// let handle = MockBusHandle::new();
/// handle.set_holding(0x10, 42);
/// handle.fail_connects(2);
/// let connector = handle.connector();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockBusHandle {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBusHandle {
    /// Create a new mock handle with empty register maps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a connector producing buses backed by this handle's state.
    pub fn connector(&self) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            state: Arc::clone(&self.state),
        })
    }

    /// Set a single holding register.
    pub fn set_holding(&self, address: u16, value: u16) {
        self.state.lock().holding.insert(address, value);
    }

    /// Set a block of holding registers starting at `base`.
    pub fn set_holding_block(&self, base: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.holding.insert(base + offset as u16, *value);
        }
    }

    /// Set a single input register.
    pub fn set_input(&self, address: u16, value: u16) {
        self.state.lock().input.insert(address, value);
    }

    /// Set a single coil.
    pub fn set_coil(&self, address: u16, value: bool) {
        self.state.lock().coils.insert(address, value);
    }

    /// Queue a fault for the next executed operation.
    pub fn fail_next(&self, fault: MockFault) {
        self.state.lock().pending_faults.push_back(fault);
    }

    /// Make every operation fail (simulates a dead link) until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().fail_connects = count;
    }

    /// Total connect attempts observed so far.
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// Apply an artificial latency to every operation.
    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().response_delay = delay;
    }

    /// Get a copy of the operation log.
    pub fn ops(&self) -> Vec<BusOp> {
        self.state.lock().op_log.clone()
    }

    /// Clear the operation log.
    pub fn clear_ops(&self) {
        self.state.lock().op_log.clear();
    }
}

/// Connector returning `MockBus` instances bound to the shared state.
#[derive(Debug)]
pub struct MockConnector {
    state: Arc<Mutex<MockBusState>>,
}

#[async_trait]
impl BusConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn RegisterBus>, BusError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(BusError::not_found("MOCK0"));
        }
        drop(state);

        Ok(Box::new(MockBus {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Mock bus produced by `MockConnector`.
pub struct MockBus {
    state: Arc<Mutex<MockBusState>>,
}

impl MockBus {
    /// Run the common pre-operation bookkeeping: delay, logging, faults.
    async fn begin(&self, op: BusOp) -> Result<(), BusError> {
        let delay = self.state.lock().response_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.op_log.push(op);
        if state.offline {
            return Err(BusError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link is offline",
            )));
        }
        if let Some(fault) = state.pending_faults.pop_front() {
            return Err(fault.into_error());
        }
        Ok(())
    }

    fn read_map<T: Copy>(
        map: &HashMap<u16, T>,
        address: u16,
        count: u16,
    ) -> Result<Vec<T>, BusError> {
        let mut values = Vec::with_capacity(count as usize);
        for offset in 0..count {
            match map.get(&(address + offset)) {
                Some(value) => values.push(*value),
                None => {
                    return Err(BusError::Exception(
                        tokio_modbus::ExceptionCode::IllegalDataAddress,
                    ))
                }
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl RegisterBus for MockBus {
    async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        self.begin(BusOp::ReadHolding(address, count)).await?;
        Self::read_map(&self.state.lock().holding, address, count)
    }

    async fn read_input(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        self.begin(BusOp::ReadInput(address, count)).await?;
        Self::read_map(&self.state.lock().input, address, count)
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, BusError> {
        self.begin(BusOp::ReadCoils(address, count)).await?;
        Self::read_map(&self.state.lock().coils, address, count)
    }

    async fn read_discrete(&mut self, address: u16, count: u16) -> Result<Vec<bool>, BusError> {
        self.begin(BusOp::ReadDiscrete(address, count)).await?;
        Self::read_map(&self.state.lock().discrete, address, count)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        self.begin(BusOp::WriteRegister(address, value)).await?;
        self.state.lock().holding.insert(address, value);
        Ok(())
    }

    async fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), BusError> {
        self.begin(BusOp::WriteRegisters(address, values.len()))
            .await?;
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.holding.insert(address + offset as u16, *value);
        }
        Ok(())
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), BusError> {
        self.begin(BusOp::WriteCoil(address, value)).await?;
        self.state.lock().coils.insert(address, value);
        Ok(())
    }

    fn name(&self) -> &str {
        "MOCK0"
    }
}

impl std::fmt::Debug for MockBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockBus")
            .field("ops", &state.op_log.len())
            .field("offline", &state.offline)
            .finish()
    }
}
