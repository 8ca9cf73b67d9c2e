// Unbounded producer/consumer buffer
//
// Producers store units without ever blocking. Consumers retrieve units and
// wait in a queue while not enough are available.

use std::cell::RefCell;

use tracing::{debug, warn};

use crate::concurrency::level::UnitLevel;
use crate::concurrency::{wait_for_turn, Turn};
use crate::context::SimContext;
use crate::error::{SyncError, SyncResult};
use crate::process::{reactivate, ProcessId};
use crate::queue::{QueueConfig, QueueDiscipline, QueueSnapshot, TrackedQueue};

#[derive(Debug)]
struct BinState {
    consumers_queue: TrackedQueue,
    pass_by: bool,
    level: UnitLevel,
    producers: u64,
    consumers: u64,
}

/// Unbounded buffer of anonymous units
#[derive(Debug)]
pub struct Bin {
    name: String,
    ctx: SimContext,
    state: RefCell<BinState>,
}

impl Bin {
    /// Create a bin holding `initial` units; `queue` configures the consumer queue
    pub fn new(ctx: &SimContext, name: impl Into<String>, queue: QueueConfig, initial: u64) -> Self {
        let now = ctx.now();
        let state = BinState {
            consumers_queue: TrackedQueue::new(&queue, ctx.next_seed(), now),
            pass_by: false,
            level: UnitLevel::new(initial, now),
            producers: 0,
            consumers: 0,
        };
        Self {
            name: name.into(),
            ctx: ctx.clone(),
            state: RefCell::new(state),
        }
    }

    /// Add `n` units and wake the first waiting consumer
    pub fn store(&self, n: u64) -> SyncResult<()> {
        let me = self.ctx.caller(&self.name, "store")?;
        if n == 0 {
            warn!(primitive = %self.name, process = %me, "attempt to store zero units, ignored");
            return Err(self.invalid_quantity("store", n));
        }

        let first = {
            let mut state = self.state.borrow_mut();
            if !state.level.add(n, self.ctx.now()) {
                warn!(primitive = %self.name, process = %me, units = n, "store would overflow the unit count");
                return Err(SyncError::ExceedsCapacity {
                    primitive: self.name.clone(),
                    operation: "store",
                    requested: n,
                    capacity: u64::MAX,
                });
            }
            state.producers += 1;
            state.consumers_queue.first()
        };
        if let Some(first) = first {
            reactivate(self.ctx.scheduler(), first);
        }
        Ok(())
    }

    /// Take `n` units, waiting in the consumer queue until they are available
    pub async fn retrieve(&self, n: u64) -> SyncResult<()> {
        let me = self.ctx.caller(&self.name, "retrieve")?;
        if n == 0 {
            warn!(primitive = %self.name, process = %me, "attempt to retrieve zero units, ignored");
            return Err(self.invalid_quantity("retrieve", n));
        }

        let scheduler = self.ctx.scheduler();
        let pass_by = {
            let mut state = self.state.borrow_mut();
            let priority = scheduler.queueing_priority(me);
            if let Err(rejected) = state.consumers_queue.enqueue(me, priority, self.ctx.now()) {
                debug!(primitive = %self.name, process = %me, %rejected, "retrieve not queued");
                return Err(rejected.into_error(&self.name, "retrieve"));
            }
            state.pass_by
        };

        wait_for_turn(scheduler, me, pass_by, || self.turn(me), || self.avail() >= n, || {}).await;

        let first = {
            let mut state = self.state.borrow_mut();
            let now = self.ctx.now();
            state.consumers_queue.dequeue(me, now);
            state.level.remove(n, now);
            state.consumers += 1;
            state.consumers_queue.first()
        };
        scheduler.set_blocked(me, false);
        if let Some(first) = first {
            reactivate(scheduler, first);
        }
        Ok(())
    }

    fn turn(&self, me: ProcessId) -> Turn {
        let state = self.state.borrow();
        Turn {
            first: state.consumers_queue.first(),
            succ: state.consumers_queue.succ(me),
        }
    }

    fn invalid_quantity(&self, operation: &'static str, quantity: u64) -> SyncError {
        SyncError::InvalidQuantity {
            primitive: self.name.clone(),
            operation,
            quantity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn avail(&self) -> u64 {
        self.state.borrow().level.avail()
    }

    pub fn initial(&self) -> u64 {
        self.state.borrow().level.initial()
    }

    pub fn maximum(&self) -> u64 {
        self.state.borrow().level.maximum()
    }

    /// Number of completed store operations since the last reset
    pub fn producers(&self) -> u64 {
        self.state.borrow().producers
    }

    /// Number of completed retrieve operations since the last reset
    pub fn consumers(&self) -> u64 {
        self.state.borrow().consumers
    }

    pub fn refused(&self) -> u64 {
        self.state.borrow().consumers_queue.refused()
    }

    pub fn waiting(&self) -> Vec<ProcessId> {
        self.state.borrow().consumers_queue.processes()
    }

    pub fn pass_by(&self) -> bool {
        self.state.borrow().pass_by
    }

    pub fn set_pass_by(&self, pass_by: bool) {
        self.state.borrow_mut().pass_by = pass_by;
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.state.borrow().consumers_queue.discipline()
    }

    /// Time-weighted average of available units since the last reset
    pub fn average_avail(&self) -> Option<f64> {
        self.state.borrow().level.average(self.ctx.now())
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.state.borrow().consumers_queue.snapshot(&self.name, self.ctx.now())
    }

    pub fn reset(&self) {
        let now = self.ctx.now();
        let mut state = self.state.borrow_mut();
        state.consumers_queue.reset(now);
        state.level.reset(now);
        state.producers = 0;
        state.consumers = 0;
    }
}
