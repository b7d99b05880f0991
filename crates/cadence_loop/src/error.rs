//! Error types for cadence_loop

use crate::system::SystemId;
use thiserror::Error;

/// Errors returned by scheduler administrative operations
#[derive(Error, Debug)]
pub enum LoopError {
    /// The given id names no currently scheduled system
    #[error("unknown system id: {0:?}")]
    UnknownSystem(SystemId),
}

/// Result type for cadence_loop operations
pub type Result<T> = std::result::Result<T, LoopError>;
