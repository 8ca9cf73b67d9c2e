// Bounded producer/consumer buffer
//
// Producers wait while storing would exceed the capacity; consumers wait
// while too few units are available. Each side has its own queue and its own
// pass-by flag.

use std::cell::RefCell;

use tracing::{debug, warn};

use crate::concurrency::level::UnitLevel;
use crate::concurrency::{wait_for_turn, Turn};
use crate::context::SimContext;
use crate::error::{SyncError, SyncResult};
use crate::process::{reactivate, ProcessId};
use crate::queue::{QueueConfig, QueueDiscipline, QueueSnapshot, TrackedQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Producer,
    Consumer,
}

#[derive(Debug)]
struct StockState {
    producer_queue: TrackedQueue,
    consumer_queue: TrackedQueue,
    producer_pass_by: bool,
    consumer_pass_by: bool,
    capacity: u64,
    level: UnitLevel,
    producers: u64,
    consumers: u64,
}

impl StockState {
    fn queue(&self, side: Side) -> &TrackedQueue {
        match side {
            Side::Producer => &self.producer_queue,
            Side::Consumer => &self.consumer_queue,
        }
    }

    fn queue_mut(&mut self, side: Side) -> &mut TrackedQueue {
        match side {
            Side::Producer => &mut self.producer_queue,
            Side::Consumer => &mut self.consumer_queue,
        }
    }

    fn pass_by(&self, side: Side) -> bool {
        match side {
            Side::Producer => self.producer_pass_by,
            Side::Consumer => self.consumer_pass_by,
        }
    }
}

/// Bounded buffer of anonymous units
#[derive(Debug)]
pub struct Stock {
    name: String,
    ctx: SimContext,
    state: RefCell<StockState>,
}

impl Stock {
    /// Create a stock holding `initial` units.
    ///
    /// A `capacity` of 0 means unbounded. An initial stock above the capacity
    /// raises the capacity to match.
    pub fn new(
        ctx: &SimContext,
        name: impl Into<String>,
        producer_queue: QueueConfig,
        consumer_queue: QueueConfig,
        initial: u64,
        capacity: u64,
    ) -> Self {
        let name = name.into();
        let mut capacity = if capacity == 0 { u64::MAX } else { capacity };
        if initial > capacity {
            warn!(primitive = %name, initial, capacity, "initial units exceed capacity, capacity raised");
            capacity = initial;
        }

        let now = ctx.now();
        let state = StockState {
            producer_queue: TrackedQueue::new(&producer_queue, ctx.next_seed(), now),
            consumer_queue: TrackedQueue::new(&consumer_queue, ctx.next_seed(), now),
            producer_pass_by: false,
            consumer_pass_by: false,
            capacity,
            level: UnitLevel::new(initial, now),
            producers: 0,
            consumers: 0,
        };
        Self {
            name,
            ctx: ctx.clone(),
            state: RefCell::new(state),
        }
    }

    /// Add `n` units, waiting in the producer queue while there is no room
    pub async fn store(&self, n: u64) -> SyncResult<()> {
        let me = self.admit(Side::Producer, "store", n)?;
        let capacity = self.capacity();

        let pass_by = self.state.borrow().producer_pass_by;
        wait_for_turn(
            self.ctx.scheduler(),
            me,
            pass_by,
            || self.turn(Side::Producer, me),
            || self.avail().checked_add(n).is_some_and(|total| total <= capacity),
            || {},
        )
        .await;

        self.complete(Side::Producer, me, n);
        Ok(())
    }

    /// Take `n` units, waiting in the consumer queue while too few are available
    pub async fn retrieve(&self, n: u64) -> SyncResult<()> {
        let me = self.admit(Side::Consumer, "retrieve", n)?;

        let pass_by = self.state.borrow().consumer_pass_by;
        wait_for_turn(
            self.ctx.scheduler(),
            me,
            pass_by,
            || self.turn(Side::Consumer, me),
            || self.avail() >= n,
            || {},
        )
        .await;

        self.complete(Side::Consumer, me, n);
        Ok(())
    }

    /// Validate a request and enqueue the caller on `side`
    fn admit(&self, side: Side, operation: &'static str, n: u64) -> SyncResult<ProcessId> {
        let me = self.ctx.caller(&self.name, operation)?;
        if n == 0 {
            warn!(primitive = %self.name, process = %me, operation, "attempt to move zero units, ignored");
            return Err(SyncError::InvalidQuantity {
                primitive: self.name.clone(),
                operation,
                quantity: n,
            });
        }

        let mut state = self.state.borrow_mut();
        if n > state.capacity {
            warn!(
                primitive = %self.name,
                process = %me,
                operation,
                requested = n,
                capacity = state.capacity,
                "request exceeds capacity, ignored"
            );
            return Err(SyncError::ExceedsCapacity {
                primitive: self.name.clone(),
                operation,
                requested: n,
                capacity: state.capacity,
            });
        }

        let priority = self.ctx.scheduler().queueing_priority(me);
        if let Err(rejected) = state.queue_mut(side).enqueue(me, priority, self.ctx.now()) {
            debug!(primitive = %self.name, process = %me, operation, %rejected, "request not queued");
            return Err(rejected.into_error(&self.name, operation));
        }
        Ok(me)
    }

    fn complete(&self, side: Side, me: ProcessId, n: u64) {
        let (first_producer, first_consumer) = {
            let mut state = self.state.borrow_mut();
            let now = self.ctx.now();
            state.queue_mut(side).dequeue(me, now);
            match side {
                Side::Producer => {
                    state.level.add(n, now);
                    state.producers += 1;
                }
                Side::Consumer => {
                    state.level.remove(n, now);
                    state.consumers += 1;
                }
            }
            (state.producer_queue.first(), state.consumer_queue.first())
        };

        let scheduler = self.ctx.scheduler();
        scheduler.set_blocked(me, false);
        // The level changed: both sides may be able to proceed now
        for first in [first_producer, first_consumer].into_iter().flatten() {
            reactivate(scheduler, first);
        }
    }

    fn turn(&self, side: Side, me: ProcessId) -> Turn {
        let state = self.state.borrow();
        let queue = state.queue(side);
        Turn {
            first: queue.first(),
            succ: queue.succ(me),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn avail(&self) -> u64 {
        self.state.borrow().level.avail()
    }

    /// Capacity; `u64::MAX` when unbounded
    pub fn capacity(&self) -> u64 {
        self.state.borrow().capacity
    }

    pub fn initial(&self) -> u64 {
        self.state.borrow().level.initial()
    }

    pub fn maximum(&self) -> u64 {
        self.state.borrow().level.maximum()
    }

    pub fn minimum(&self) -> u64 {
        self.state.borrow().level.minimum()
    }

    pub fn producers(&self) -> u64 {
        self.state.borrow().producers
    }

    pub fn consumers(&self) -> u64 {
        self.state.borrow().consumers
    }

    pub fn producer_refused(&self) -> u64 {
        self.state.borrow().producer_queue.refused()
    }

    pub fn consumer_refused(&self) -> u64 {
        self.state.borrow().consumer_queue.refused()
    }

    pub fn producer_pass_by(&self) -> bool {
        self.state.borrow().pass_by(Side::Producer)
    }

    pub fn set_producer_pass_by(&self, pass_by: bool) {
        self.state.borrow_mut().producer_pass_by = pass_by;
    }

    pub fn consumer_pass_by(&self) -> bool {
        self.state.borrow().pass_by(Side::Consumer)
    }

    pub fn set_consumer_pass_by(&self, pass_by: bool) {
        self.state.borrow_mut().consumer_pass_by = pass_by;
    }

    pub fn producer_discipline(&self) -> QueueDiscipline {
        self.state.borrow().producer_queue.discipline()
    }

    pub fn consumer_discipline(&self) -> QueueDiscipline {
        self.state.borrow().consumer_queue.discipline()
    }

    pub fn waiting_producers(&self) -> Vec<ProcessId> {
        self.state.borrow().producer_queue.processes()
    }

    pub fn waiting_consumers(&self) -> Vec<ProcessId> {
        self.state.borrow().consumer_queue.processes()
    }

    pub fn average_avail(&self) -> Option<f64> {
        self.state.borrow().level.average(self.ctx.now())
    }

    pub fn producer_snapshot(&self) -> QueueSnapshot {
        let name = format!("{}.producers", self.name);
        self.state.borrow().producer_queue.snapshot(&name, self.ctx.now())
    }

    pub fn consumer_snapshot(&self) -> QueueSnapshot {
        let name = format!("{}.consumers", self.name);
        self.state.borrow().consumer_queue.snapshot(&name, self.ctx.now())
    }

    pub fn reset(&self) {
        let now = self.ctx.now();
        let mut state = self.state.borrow_mut();
        state.producer_queue.reset(now);
        state.consumer_queue.reset(now);
        state.level.reset(now);
        state.producers = 0;
        state.consumers = 0;
    }
}
