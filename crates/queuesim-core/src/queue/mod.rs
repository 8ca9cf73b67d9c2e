// Queue discipline and statistics base
//
// Every synchronization primitive parks its waiting processes in one or more
// `TrackedQueue`s: a priority-ordered process list with a capacity limit and
// the usual length and waiting-time statistics.

pub mod list;
pub mod stats;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;
use crate::process::ProcessId;
use crate::time::SimTime;

pub use list::{ProcessQueue, QueueEntry};
pub use stats::{QueueSnapshot, QueueStats};

/// Placement rule among processes of equal queueing priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDiscipline {
    /// First in, first out
    #[default]
    #[serde(alias = "FIFO")]
    Fifo,
    /// Last in, first out
    #[serde(alias = "LIFO")]
    Lifo,
    /// Uniformly random position
    #[serde(alias = "RANDOM")]
    Random,
}

impl fmt::Display for QueueDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "FIFO"),
            Self::Lifo => write!(f, "LIFO"),
            Self::Random => write!(f, "RANDOM"),
        }
    }
}

/// Construction parameters of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub discipline: QueueDiscipline,
    /// Maximum number of waiting processes; 0 means unbounded
    pub capacity: usize,
}

impl QueueConfig {
    pub fn new(discipline: QueueDiscipline, capacity: usize) -> Self {
        Self {
            discipline,
            capacity,
        }
    }

    pub fn fifo() -> Self {
        Self::new(QueueDiscipline::Fifo, 0)
    }

    pub fn lifo() -> Self {
        Self::new(QueueDiscipline::Lifo, 0)
    }

    pub fn random() -> Self {
        Self::new(QueueDiscipline::Random, 0)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Capacity with 0 mapped to unbounded
    pub fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            usize::MAX
        } else {
            self.capacity
        }
    }
}

/// Why a process could not be enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The queue is at capacity; counted as a refusal
    Full,
    /// The process already waits in this queue
    AlreadyQueued,
}

impl Rejection {
    /// Error reported to the process that called `primitive.operation`
    pub fn into_error(self, primitive: &str, operation: &'static str) -> SyncError {
        match self {
            Self::Full => SyncError::Refused {
                primitive: primitive.to_string(),
                operation,
            },
            Self::AlreadyQueued => SyncError::IllegalState {
                primitive: primitive.to_string(),
                operation,
                reason: "process is already queued".to_string(),
            },
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue full"),
            Self::AlreadyQueued => write!(f, "already queued"),
        }
    }
}

/// Process queue with a capacity limit and statistics
#[derive(Debug, Clone)]
pub struct TrackedQueue {
    queue: ProcessQueue,
    stats: QueueStats,
    capacity: usize,
}

impl TrackedQueue {
    pub fn new(config: &QueueConfig, seed: u64, now: SimTime) -> Self {
        Self {
            queue: ProcessQueue::new(config.discipline, seed),
            stats: QueueStats::new(now),
            capacity: config.effective_capacity(),
        }
    }

    /// Enqueue a process. A full queue refuses it and counts the refusal;
    /// a process that is already queued is turned away uncounted.
    pub fn enqueue(&mut self, process: ProcessId, priority: i32, now: SimTime) -> Result<(), Rejection> {
        if self.queue.contains(process) {
            return Err(Rejection::AlreadyQueued);
        }
        if self.queue.len() >= self.capacity {
            self.stats.record_refusal();
            return Err(Rejection::Full);
        }
        self.queue.insert(process, priority, now);
        self.stats.record_entry(now);
        Ok(())
    }

    /// Remove a process and record its waiting time
    pub fn dequeue(&mut self, process: ProcessId, now: SimTime) -> bool {
        match self.queue.remove(process) {
            Some(entry) => {
                self.stats.record_exit(entry.entered_at, now);
                true
            }
            None => {
                debug!(process = %process, "process is not queued, dequeue ignored");
                false
            }
        }
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.queue.discipline()
    }

    pub fn first(&self) -> Option<ProcessId> {
        self.queue.first()
    }

    pub fn succ(&self, process: ProcessId) -> Option<ProcessId> {
        self.queue.succ(process)
    }

    pub fn contains(&self, process: ProcessId) -> bool {
        self.queue.contains(process)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn processes(&self) -> Vec<ProcessId> {
        self.queue.processes()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn refused(&self) -> u64 {
        self.stats.refused()
    }

    pub fn reset(&mut self, now: SimTime) {
        self.stats.reset(now);
    }

    pub fn snapshot(&self, name: &str, now: SimTime) -> QueueSnapshot {
        self.stats.snapshot(name, self.discipline(), now)
    }
}
