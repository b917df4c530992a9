//! Bus-specific error types.
//!
//! Defines error types for Modbus transactions, separate from dispatcher-level
//! errors to maintain clean separation of concerns. This is also where the
//! communication/protocol split lives: `BusError::is_communication` decides
//! whether a failure means the link is gone (reconnect) or the device merely
//! rejected a request (report to the caller, keep the link).

use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during bus transactions.
#[derive(Debug, Error)]
pub enum BusError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port or master configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transaction did not complete within the configured deadline.
    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    /// The device answered with a Modbus exception code.
    #[error("Device exception: {0:?}")]
    Exception(tokio_modbus::ExceptionCode),

    /// The response was malformed or otherwise violated the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Attempted a transaction while no bus is attached.
    #[error("Bus is not connected")]
    NotConnected,
}

impl BusError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Classify this failure as communication-class or not.
    ///
    /// Communication-class failures mean the physical link can no longer be
    /// trusted: the worker closes the port and reconnects. Everything else is
    /// an application-level fault that is surfaced to the originating caller
    /// without touching the connection.
    pub fn is_communication(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::NotConnected | Self::NotFound(_) => true,
            Self::Io(e) => io_kind_is_communication(e.kind()) || fault_in_chain(e),
            Self::Protocol(message) => message_mentions_port_state(message),
            Self::Exception(_) | Self::Config(_) => false,
        }
    }
}

/// Transport-level I/O kinds that always indicate a dead or dying link.
fn io_kind_is_communication(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::PermissionDenied
            | ErrorKind::NotFound
    )
}

/// Ambiguous state errors are recognized by their message referencing the
/// port/open/closed condition. Drivers wrap disposal races in plain errors
/// whose only usable signal is the text.
fn message_mentions_port_state(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("port")
        && (msg.contains("open")
            || msg.contains("closed")
            || msg.contains("disposed")
            || msg.contains("denied"))
}

/// Walk the full cause chain of an error looking for a transport-level fault.
fn fault_in_chain(root: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(root);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io_kind_is_communication(io.kind()) {
                return true;
            }
        }
        if message_mentions_port_state(&err.to_string()) {
            return true;
        }
        current = err.source();
    }
    false
}
