//! # Bus Errors
//!
//! Every bus operation reports failures through [`BusError`]. Routing and backpressure
//! failures are recoverable by the caller; [`BusError::ShutDown`] means the process-wide
//! cancellation signal has fired and the caller should return.

use std::time::Duration;

/// Errors returned by the bus context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("module already registered with different parameters: {0}")]
    AlreadyRegistered(String),
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    #[error("inbox of {0} is full")]
    QueueFull(String),
    #[error("timeout after {timeout:?} waiting for response to {id}")]
    Timeout { id: String, timeout: Duration },
    #[error("bus is shut down")]
    ShutDown,
}

/// Error type returned by a module's `start`.
pub type ModuleError = Box<dyn std::error::Error + Send + Sync>;
