//! Error taxonomy for trigger devices.
//!
//! Callers usually only need to tell two kinds apart: the wait timed out
//! ([`TriggerError::is_timeout`]) or something else went wrong.

use thiserror::Error;

/// Errors raised while creating, opening or polling a trigger device.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// No trigger arrived within the configured timeout.
    #[error("waiting for trigger timed out after {0:.3}s")]
    Timeout(f64),
    /// The user pressed the abort key.
    #[error("experiment aborted by the user")]
    Aborted,
    /// The configuration names no port and no device was supplied.
    #[error("port not found: {0}")]
    PortNotFound(String),
    /// The device could not be opened, or was used before `open`.
    #[error("port not open: {0}")]
    PortNotOpen(String),
    /// No factory is registered under this port type.
    #[error("unknown port type: {0}")]
    UnknownPortType(String),
    #[error("invalid trigger configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Failure reported by the underlying device.
    #[error("device error: {0}")]
    Device(String),
}

impl TriggerError {
    /// Whether this is the timeout kind. Every other variant is a general failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TriggerError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, TriggerError>;
