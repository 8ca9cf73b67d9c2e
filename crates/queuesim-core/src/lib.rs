//! Queuesim Core
//!
//! Synchronization primitives for process-interaction discrete-event
//! simulation. Processes are `async` bodies hosted by a [`Scheduler`]; they
//! contend for and cooperate through the primitives in [`concurrency`]:
//!
//! - **Bin**: unbounded producer/consumer buffer
//! - **Stock**: bounded producer/consumer buffer
//! - **Res**: resource pool with deadlock detection
//! - **CondQueue**: wait until a condition holds
//! - **WaitQueue**: master/slave rendezvous
//!
//! Every primitive keeps its waiting processes in a [`queue::TrackedQueue`]
//! ordered by priority and queue discipline, with length and waiting-time
//! statistics.

pub mod concurrency;
pub mod context;
pub mod error;
pub mod process;
pub mod queue;
pub mod randomness;
pub mod time;

pub use concurrency::{Bin, CondQueue, DeadlockKind, DeadlockReport, Res, ResourceUnit, Stock, WaitQueue};
pub use context::SimContext;
pub use error::{SyncError, SyncResult};
pub use process::{hold, passivate, ProcessId, Scheduler, SharedScheduler};
pub use queue::{QueueConfig, QueueDiscipline, QueueSnapshot};
pub use time::SimTime;
