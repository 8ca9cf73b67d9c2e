// Synchronization errors
//
// This module defines the error type returned by the synchronization
// primitives. Every failure is also reported to the tracing sink by the
// primitive that raised it; none of them is fatal to the simulation.

use thiserror::Error;

/// Error type for synchronization primitive operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No current process, or the caller belongs to another simulation
    #[error("Invalid process calling {primitive}.{operation}: {reason}")]
    InvalidProcess {
        primitive: String,
        operation: &'static str,
        reason: String,
    },

    /// A quantity of zero units was passed
    #[error("Invalid quantity for {primitive}.{operation}: {quantity}")]
    InvalidQuantity {
        primitive: String,
        operation: &'static str,
        quantity: u64,
    },

    /// The requested quantity can never be satisfied by this primitive
    #[error("{primitive}.{operation} requested {requested} units, capacity is {capacity}")]
    ExceedsCapacity {
        primitive: String,
        operation: &'static str,
        requested: u64,
        capacity: u64,
    },

    /// The admission queue was full
    #[error("Queue of {primitive} is full, {operation} refused")]
    Refused {
        primitive: String,
        operation: &'static str,
    },

    /// The operation is not permitted in the primitive's current state
    #[error("Illegal state in {primitive}.{operation}: {reason}")]
    IllegalState {
        primitive: String,
        operation: &'static str,
        reason: String,
    },

    /// The wait ended because another process cancelled it
    #[error("Wait in {primitive} was cancelled")]
    Cancelled { primitive: String },
}

impl SyncError {
    /// True if the failure was a refused admission
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }

    /// True if the wait was ended by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type for synchronization primitive operations
pub type SyncResult<T> = Result<T, SyncError>;
