// Process queue ordering
//
// Ordered list of waiting processes. Entries are sorted by queueing priority
// (highest first); the discipline only decides where a newcomer lands among
// entries of its own priority.

use tracing::warn;

use crate::process::ProcessId;
use crate::queue::QueueDiscipline;
use crate::randomness::SeededRng;
use crate::time::SimTime;

/// A process waiting in a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub process: ProcessId,
    /// Queueing priority captured when the process entered
    pub priority: i32,
    pub entered_at: SimTime,
}

/// Priority-ordered list of waiting processes
#[derive(Debug, Clone)]
pub struct ProcessQueue {
    discipline: QueueDiscipline,
    entries: Vec<QueueEntry>,
    rng: Option<SeededRng>,
}

impl ProcessQueue {
    /// Create an empty queue. `seed` drives placement for RANDOM queues and
    /// is ignored otherwise.
    pub fn new(discipline: QueueDiscipline, seed: u64) -> Self {
        let rng = match discipline {
            QueueDiscipline::Random => Some(SeededRng::new(seed)),
            _ => None,
        };
        Self {
            discipline,
            entries: Vec::new(),
            rng,
        }
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.discipline
    }

    /// Insert a process. Returns false, leaving the queue unchanged, if the
    /// process is already queued here.
    pub fn insert(&mut self, process: ProcessId, priority: i32, now: SimTime) -> bool {
        if self.contains(process) {
            warn!(process = %process, "process is already enqueued, insert ignored");
            return false;
        }
        let index = self.insertion_index(priority);
        self.entries.insert(
            index,
            QueueEntry {
                process,
                priority,
                entered_at: now,
            },
        );
        true
    }

    fn insertion_index(&mut self, priority: i32) -> usize {
        // Equal-priority band is entries[band_start..band_end]
        let band_start = self
            .entries
            .iter()
            .position(|e| e.priority <= priority)
            .unwrap_or(self.entries.len());
        let band_end = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());

        match self.discipline {
            QueueDiscipline::Fifo => band_end,
            QueueDiscipline::Lifo => band_start,
            QueueDiscipline::Random => match self.rng.as_mut() {
                Some(rng) => rng.gen_range(band_start..=band_end),
                None => band_end,
            },
        }
    }

    /// Remove a process, returning its entry if it was queued
    pub fn remove(&mut self, process: ProcessId) -> Option<QueueEntry> {
        let index = self.position(process)?;
        Some(self.entries.remove(index))
    }

    pub fn first(&self) -> Option<ProcessId> {
        self.entries.first().map(|e| e.process)
    }

    pub fn last(&self) -> Option<ProcessId> {
        self.entries.last().map(|e| e.process)
    }

    /// The process queued directly behind `process`
    pub fn succ(&self, process: ProcessId) -> Option<ProcessId> {
        let index = self.position(process)?;
        self.entries.get(index + 1).map(|e| e.process)
    }

    /// The process queued directly ahead of `process`
    pub fn pred(&self, process: ProcessId) -> Option<ProcessId> {
        let index = self.position(process)?;
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|e| e.process)
    }

    pub fn contains(&self, process: ProcessId) -> bool {
        self.position(process).is_some()
    }

    pub fn position(&self, process: ProcessId) -> Option<usize> {
        self.entries.iter().position(|e| e.process == process)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Queued processes in service order
    pub fn processes(&self) -> Vec<ProcessId> {
        self.entries.iter().map(|e| e.process).collect()
    }
}
