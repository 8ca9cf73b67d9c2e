//! Error types for Simulation
//!
//! This module defines the error types used by the simulation host:
//! configuration loading, run control, and failures passed up from the
//! synchronization primitives.

//-----------------------------------------------------------------------------
// Error Types
//-----------------------------------------------------------------------------

use queuesim_core::SyncError;
use thiserror::Error;

/// Main error type for the simulation crate.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Represents an error during simulation setup or configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Represents an error related to an invalid operation or state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Represents a file I/O error.
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Represents a configuration file that could not be parsed.
    #[error("Serialization/Deserialization error: {0}")]
    Serialization(#[from] toml::de::Error),

    /// An error raised by a synchronization primitive.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result type alias for simulation operations.
pub type SimulationResult<T> = Result<T, SimulationError>;
