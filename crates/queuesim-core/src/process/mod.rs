// Process model
//
// This module provides the process identifiers and the scheduler interface
// the synchronization primitives are written against, plus the suspension
// helpers process bodies use to yield control.

pub mod process_id;
pub mod scheduler;

pub use process_id::ProcessId;
pub use scheduler::{hold, passivate, reactivate, Passivate, Scheduler, SharedScheduler};
