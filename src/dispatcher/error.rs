//! Dispatcher-level error types.

use crate::bus::BusError;
use thiserror::Error;

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The command was cancelled before or during execution.
    #[error("Command was cancelled")]
    Cancelled,

    /// The dispatcher is shutting down and no longer accepts work.
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    /// A polling job with this name already exists.
    #[error("Polling job '{0}' is already registered")]
    DuplicateJob(String),

    /// No polling job with this name exists.
    #[error("Polling job '{0}' is not registered")]
    UnknownJob(String),

    /// The underlying bus transaction failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl DispatchError {
    /// Whether this failure was classified as communication-class.
    ///
    /// Callers can use this to distinguish "the link went down, the dispatcher
    /// is reconnecting" from "the device rejected my request".
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Bus(e) if e.is_communication())
    }

    /// Whether this is a cancellation, as opposed to a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenient Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
