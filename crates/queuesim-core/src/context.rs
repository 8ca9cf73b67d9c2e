// Simulation context
//
// Handles shared by every primitive of one simulation: the scheduler, the
// resource database used for deadlock detection, the registry of processes
// waiting as rendezvous slaves, and the seed source for RANDOM queues.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::warn;

use crate::concurrency::resource_db::{ResourceDb, SharedResourceDb};
use crate::error::{SyncError, SyncResult};
use crate::process::{self, ProcessId, Scheduler, SharedScheduler};
use crate::randomness::SeededRng;
use crate::time::SimTime;

/// Shared handles passed to every primitive
#[derive(Clone)]
pub struct SimContext {
    scheduler: SharedScheduler,
    resources: SharedResourceDb,
    slaves: Rc<RefCell<BTreeSet<ProcessId>>>,
    seeds: Rc<RefCell<SeededRng>>,
    deadlock_check: bool,
}

impl SimContext {
    pub fn new(scheduler: SharedScheduler, seed: u64) -> Self {
        Self {
            scheduler,
            resources: Rc::new(RefCell::new(ResourceDb::new())),
            slaves: Rc::new(RefCell::new(BTreeSet::new())),
            seeds: Rc::new(RefCell::new(SeededRng::new(seed))),
            deadlock_check: true,
        }
    }

    /// Whether pools created from this context start with deadlock checking on
    pub fn with_deadlock_check(mut self, enabled: bool) -> Self {
        self.deadlock_check = enabled;
        self
    }

    pub fn deadlock_check(&self) -> bool {
        self.deadlock_check
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn shared_scheduler(&self) -> SharedScheduler {
        Rc::clone(&self.scheduler)
    }

    pub fn resource_db(&self) -> &SharedResourceDb {
        &self.resources
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.present_time()
    }

    pub fn current(&self) -> Option<ProcessId> {
        self.scheduler.current()
    }

    /// Seed for a new RANDOM queue
    pub fn next_seed(&self) -> u64 {
        self.seeds.borrow_mut().next_seed()
    }

    /// Suspend the calling process for `span`
    pub async fn hold(&self, span: Duration) {
        process::hold(self.scheduler(), span).await
    }

    /// Processes currently waiting as a slave in any rendezvous queue
    pub(crate) fn slave_registry(&self) -> &RefCell<BTreeSet<ProcessId>> {
        &self.slaves
    }

    /// The process calling `primitive.operation`, checked to belong to this
    /// simulation
    pub fn caller(&self, primitive: &str, operation: &'static str) -> SyncResult<ProcessId> {
        let Some(process) = self.scheduler.current() else {
            warn!(primitive, operation, "called outside of a simulated process");
            return Err(SyncError::InvalidProcess {
                primitive: primitive.to_string(),
                operation,
                reason: "no current process".to_string(),
            });
        };
        if !self.scheduler.contains(process) {
            warn!(primitive, operation, process = %process, "process belongs to another simulation");
            return Err(SyncError::InvalidProcess {
                primitive: primitive.to_string(),
                operation,
                reason: format!("{process} is not part of this simulation"),
            });
        }
        Ok(process)
    }
}

impl fmt::Debug for SimContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimContext")
            .field("now", &self.now())
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
