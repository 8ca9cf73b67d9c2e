// Resource pool
//
// A fixed number of distinguishable resource units that processes acquire
// with `provide` and return with `take_back`. Blocked requests are entered
// into the simulation's resource database and checked for deadlock.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::{debug, warn};

use crate::concurrency::level::UnitLevel;
use crate::concurrency::resource_db::{PoolId, PoolProbe};
use crate::concurrency::{wait_for_turn, Turn};
use crate::context::SimContext;
use crate::error::{SyncError, SyncResult};
use crate::process::{reactivate, ProcessId};
use crate::queue::{QueueConfig, QueueDiscipline, QueueSnapshot, TrackedQueue};

/// One unit of a resource pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceUnit {
    pub pool: PoolId,
    pub serial: u64,
}

impl fmt::Display for ResourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/unit#{}", self.pool, self.serial)
    }
}

#[derive(Debug)]
struct ResState {
    queue: TrackedQueue,
    pass_by: bool,
    limit: u64,
    level: UnitLevel,
    free: VecDeque<ResourceUnit>,
    holdings: Vec<(ProcessId, Vec<ResourceUnit>)>,
    users: u64,
    next_serial: u64,
    deadlock_check: bool,
    used: bool,
}

impl ResState {
    fn held(&self, process: ProcessId) -> Option<&Vec<ResourceUnit>> {
        self.holdings.iter().find(|(p, _)| *p == process).map(|(_, units)| units)
    }

    fn held_count(&self, process: ProcessId) -> u64 {
        self.held(process).map_or(0, |units| units.len() as u64)
    }

    fn new_unit(&mut self, pool: PoolId) -> ResourceUnit {
        self.next_serial += 1;
        ResourceUnit {
            pool,
            serial: self.next_serial,
        }
    }
}

/// Pool state reachable from the resource database
#[derive(Debug)]
struct ResCore {
    state: RefCell<ResState>,
    deadlock_detected: Cell<bool>,
}

impl PoolProbe for ResCore {
    fn avail(&self) -> u64 {
        self.state.borrow().level.avail()
    }

    fn pass_by(&self) -> bool {
        self.state.borrow().pass_by
    }

    fn waiting(&self) -> Vec<ProcessId> {
        self.state.borrow().queue.processes()
    }

    fn set_deadlock_detected(&self, detected: bool) {
        self.deadlock_detected.set(detected);
    }
}

/// Pool of reusable, distinguishable resource units
#[derive(Debug)]
pub struct Res {
    name: String,
    ctx: SimContext,
    pool: PoolId,
    core: Rc<ResCore>,
}

impl Res {
    /// Create a pool of `capacity` units. A capacity of 0 is raised to 1.
    pub fn new(ctx: &SimContext, name: impl Into<String>, queue: QueueConfig, capacity: u64) -> Self {
        let name = name.into();
        let capacity = if capacity == 0 {
            warn!(primitive = %name, "resource pool needs at least one unit, capacity set to 1");
            1
        } else {
            capacity
        };

        let now = ctx.now();
        let core = Rc::new(ResCore {
            state: RefCell::new(ResState {
                queue: TrackedQueue::new(&queue, ctx.next_seed(), now),
                pass_by: false,
                limit: capacity,
                level: UnitLevel::new(capacity, now),
                free: VecDeque::new(),
                holdings: Vec::new(),
                users: 0,
                next_serial: 0,
                deadlock_check: ctx.deadlock_check(),
                used: false,
            }),
            deadlock_detected: Cell::new(false),
        });

        let probe: Rc<dyn PoolProbe> = core.clone();
        let probe: Weak<dyn PoolProbe> = Rc::downgrade(&probe);
        let pool = ctx.resource_db().borrow_mut().register_pool(name.clone(), probe);
        {
            let mut state = core.state.borrow_mut();
            for _ in 0..capacity {
                let unit = state.new_unit(pool);
                state.free.push_back(unit);
            }
        }

        Self {
            name,
            ctx: ctx.clone(),
            pool,
            core,
        }
    }

    /// Acquire `n` units, waiting in the queue until they are free
    pub async fn provide(&self, n: u64) -> SyncResult<Vec<ResourceUnit>> {
        let me = self.ctx.caller(&self.name, "provide")?;
        if n == 0 {
            warn!(primitive = %self.name, process = %me, "attempt to provide zero units, ignored");
            return Err(SyncError::InvalidQuantity {
                primitive: self.name.clone(),
                operation: "provide",
                quantity: n,
            });
        }

        let scheduler = self.ctx.scheduler();
        let (pass_by, check) = {
            let mut state = self.core.state.borrow_mut();
            let requested = n + state.held_count(me);
            if requested > state.limit {
                warn!(
                    primitive = %self.name,
                    process = %me,
                    requested,
                    limit = state.limit,
                    "request exceeds the pool limit, process would block forever"
                );
                return Err(SyncError::ExceedsCapacity {
                    primitive: self.name.clone(),
                    operation: "provide",
                    requested,
                    capacity: state.limit,
                });
            }
            let priority = scheduler.queueing_priority(me);
            if let Err(rejected) = state.queue.enqueue(me, priority, self.ctx.now()) {
                debug!(primitive = %self.name, process = %me, %rejected, "provide not queued");
                return Err(rejected.into_error(&self.name, "provide"));
            }
            state.used = true;
            (state.pass_by, state.deadlock_check)
        };

        let mut registered = false;
        wait_for_turn(scheduler, me, pass_by, || self.turn(me), || self.avail() >= n, || {
            if check {
                registered = self.register_blocked_request(me, n);
            }
        })
        .await;

        if registered {
            self.ctx.resource_db().borrow_mut().delete_request(me, self.pool);
        }

        let (units, first, check) = {
            let mut state = self.core.state.borrow_mut();
            let now = self.ctx.now();
            state.queue.dequeue(me, now);
            let take = n.min(state.free.len() as u64) as usize;
            let units: Vec<ResourceUnit> = state.free.drain(..take).collect();
            match state.holdings.iter_mut().find(|(p, _)| *p == me) {
                Some((_, held)) => held.extend_from_slice(&units),
                None => state.holdings.push((me, units.clone())),
            }
            state.level.remove(n, now);
            (units, state.queue.first(), state.deadlock_check)
        };

        scheduler.set_blocked(me, false);
        if let Some(first) = first {
            reactivate(scheduler, first);
        }
        if check {
            self.ctx
                .resource_db()
                .borrow_mut()
                .note_allocation(self.pool, me, units.len() as u64);
        }
        Ok(units)
    }

    /// Enter the blocked request into the resource database and look for a
    /// cycle rooted at `me`
    fn register_blocked_request(&self, me: ProcessId, n: u64) -> bool {
        let mut db = self.ctx.resource_db().borrow_mut();
        let registered = db.note_request(me, self.pool, n);
        let report = db.check_for_deadlock(me, self.ctx.now());
        self.core.deadlock_detected.set(report.is_some());
        registered
    }

    /// Return specific units held by the calling process
    pub fn take_back(&self, units: &[ResourceUnit]) -> SyncResult<()> {
        let me = self.ctx.caller(&self.name, "take_back")?;
        if units.is_empty() {
            warn!(primitive = %self.name, process = %me, "attempt to take back zero units, ignored");
            return Err(SyncError::InvalidQuantity {
                primitive: self.name.clone(),
                operation: "take_back",
                quantity: 0,
            });
        }

        let returned = {
            let mut state = self.core.state.borrow_mut();
            let Some(index) = state.holdings.iter().position(|(p, _)| *p == me) else {
                return Err(self.not_held(me, "process holds no units of this pool"));
            };
            let held = &state.holdings[index].1;
            let mut remaining = held.clone();
            for unit in units {
                match remaining.iter().position(|u| u == unit) {
                    Some(pos) => {
                        remaining.remove(pos);
                    }
                    None => {
                        return Err(self.not_held(me, &format!("{unit} is not held by {me}")));
                    }
                }
            }
            state.holdings[index].1 = remaining;
            units.to_vec()
        };
        self.release(me, returned);
        Ok(())
    }

    /// Return the first `n` units held by the calling process
    pub fn take_back_n(&self, n: u64) -> SyncResult<()> {
        let me = self.ctx.caller(&self.name, "take_back")?;
        if n == 0 {
            warn!(primitive = %self.name, process = %me, "attempt to take back zero units, ignored");
            return Err(SyncError::InvalidQuantity {
                primitive: self.name.clone(),
                operation: "take_back",
                quantity: n,
            });
        }

        let returned = {
            let mut state = self.core.state.borrow_mut();
            let held = state.held_count(me);
            if n > held {
                return Err(self.not_held(me, &format!("taking back {n} units, only {held} held")));
            }
            let Some((_, units)) = state.holdings.iter_mut().find(|(p, _)| *p == me) else {
                return Err(self.not_held(me, "process holds no units of this pool"));
            };
            units.drain(..n as usize).collect::<Vec<_>>()
        };
        self.release(me, returned);
        Ok(())
    }

    fn not_held(&self, me: ProcessId, reason: &str) -> SyncError {
        warn!(primitive = %self.name, process = %me, reason, "take back rejected");
        SyncError::IllegalState {
            primitive: self.name.clone(),
            operation: "take_back",
            reason: reason.to_string(),
        }
    }

    fn release(&self, me: ProcessId, units: Vec<ResourceUnit>) {
        let n = units.len() as u64;
        let (first, check) = {
            let mut state = self.core.state.borrow_mut();
            state.holdings.retain(|(_, held)| !held.is_empty());
            state.free.extend(units);
            state.level.add(n, self.ctx.now());
            state.users += 1;
            (state.queue.first(), state.deadlock_check)
        };

        if check {
            self.ctx.resource_db().borrow_mut().delete_allocation(self.pool, me, n);
        }
        if let Some(first) = first {
            reactivate(self.ctx.scheduler(), first);
        }
    }

    /// Change the number of units. Only allowed while the pool is unused
    /// since construction or the last reset.
    pub fn change_limit(&self, m: u64) -> SyncResult<()> {
        if m == 0 {
            warn!(primitive = %self.name, "pool limit must be positive, change ignored");
            return Err(SyncError::InvalidQuantity {
                primitive: self.name.clone(),
                operation: "change_limit",
                quantity: m,
            });
        }

        let mut state = self.core.state.borrow_mut();
        let unused = state.limit == state.level.minimum()
            && state.users == 0
            && state.level.avail() == state.limit;
        if !unused {
            warn!(primitive = %self.name, limit = m, "pool already in use, limit unchanged");
            return Err(SyncError::IllegalState {
                primitive: self.name.clone(),
                operation: "change_limit",
                reason: "pool has already been used".to_string(),
            });
        }

        let current = state.free.len() as u64;
        if m > current {
            for _ in current..m {
                let unit = state.new_unit(self.pool);
                state.free.push_back(unit);
            }
        } else {
            state.free.truncate(m as usize);
        }
        state.limit = m;
        state.level.set(m, self.ctx.now());
        Ok(())
    }

    fn turn(&self, me: ProcessId) -> Turn {
        let state = self.core.state.borrow();
        Turn {
            first: state.queue.first(),
            succ: state.queue.succ(me),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    pub fn avail(&self) -> u64 {
        self.core.state.borrow().level.avail()
    }

    pub fn limit(&self) -> u64 {
        self.core.state.borrow().limit
    }

    /// Lowest number of free units since construction or the last reset
    pub fn minimum(&self) -> u64 {
        self.core.state.borrow().level.minimum()
    }

    /// Number of completed take-backs since the last reset
    pub fn users(&self) -> u64 {
        self.core.state.borrow().users
    }

    pub fn refused(&self) -> u64 {
        self.core.state.borrow().queue.refused()
    }

    pub fn held_by(&self, process: ProcessId) -> Vec<ResourceUnit> {
        self.core.state.borrow().held(process).cloned().unwrap_or_default()
    }

    pub fn waiting(&self) -> Vec<ProcessId> {
        self.core.state.borrow().queue.processes()
    }

    pub fn pass_by(&self) -> bool {
        self.core.state.borrow().pass_by
    }

    pub fn set_pass_by(&self, pass_by: bool) {
        self.core.state.borrow_mut().pass_by = pass_by;
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.core.state.borrow().queue.discipline()
    }

    pub fn deadlock_check(&self) -> bool {
        self.core.state.borrow().deadlock_check
    }

    /// Switch deadlock detection for this pool on or off. Turning it off
    /// removes the pool's entries from the resource database.
    pub fn set_deadlock_check(&self, enabled: bool) {
        {
            let mut state = self.core.state.borrow_mut();
            if state.deadlock_check == enabled {
                return;
            }
            if state.used {
                warn!(
                    primitive = %self.name,
                    enabled,
                    "deadlock check switched on a pool already in use, resource database may be incomplete"
                );
            }
            state.deadlock_check = enabled;
        }
        if !enabled {
            self.ctx.resource_db().borrow_mut().clear_pool(self.pool);
        }
    }

    pub fn is_deadlock_detected(&self) -> bool {
        self.core.deadlock_detected.get()
    }

    pub fn set_deadlock_detected(&self, detected: bool) {
        self.core.deadlock_detected.set(detected);
    }

    /// Time-weighted average of free units since the last reset
    pub fn average_avail(&self) -> Option<f64> {
        self.core.state.borrow().level.average(self.ctx.now())
    }

    /// Average share of the pool in use since the last reset
    pub fn average_usage(&self) -> Option<f64> {
        let limit = self.limit() as f64;
        self.average_avail().map(|avail| 1.0 - avail / limit)
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.core.state.borrow().queue.snapshot(&self.name, self.ctx.now())
    }

    pub fn reset(&self) {
        let now = self.ctx.now();
        let mut state = self.core.state.borrow_mut();
        state.queue.reset(now);
        state.level.reset(now);
        state.users = 0;
    }
}

impl Drop for Res {
    fn drop(&mut self) {
        if let Ok(mut db) = self.ctx.resource_db().try_borrow_mut() {
            db.deregister_pool(self.pool);
        }
    }
}
