// Master/slave rendezvous queue
//
// Slaves wait here to be picked up by a master. A master takes the first
// (or the first matching) slave, runs a cooperation with it while the slave
// stays suspended, and lets the slave continue right after itself once the
// cooperation is over.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::SimContext;
use crate::error::{SyncError, SyncResult};
use crate::process::{passivate, reactivate, ProcessId};
use crate::queue::{QueueConfig, QueueSnapshot, TrackedQueue};

#[derive(Debug)]
struct WaitQueueState {
    masters: TrackedQueue,
    slaves: TrackedQueue,
    /// Masters asked to leave by `cancel_coop`
    masters_to_remove: BTreeSet<ProcessId>,
    /// Slaves taken by a master whose cooperation has not finished yet
    in_cooperation: BTreeSet<ProcessId>,
    /// Slaves removed by `cancel_coop` that have not woken up yet
    cancelled_slaves: BTreeSet<ProcessId>,
    masters_removed: u64,
    slaves_removed: u64,
    cooperations: u64,
    total_coop_time: Duration,
}

/// Rendezvous point for master and slave processes
#[derive(Debug)]
pub struct WaitQueue {
    name: String,
    ctx: SimContext,
    state: RefCell<WaitQueueState>,
}

impl WaitQueue {
    pub fn new(ctx: &SimContext, name: impl Into<String>, masters: QueueConfig, slaves: QueueConfig) -> Self {
        let now = ctx.now();
        let state = WaitQueueState {
            masters: TrackedQueue::new(&masters, ctx.next_seed(), now),
            slaves: TrackedQueue::new(&slaves, ctx.next_seed(), now),
            masters_to_remove: BTreeSet::new(),
            in_cooperation: BTreeSet::new(),
            cancelled_slaves: BTreeSet::new(),
            masters_removed: 0,
            slaves_removed: 0,
            cooperations: 0,
            total_coop_time: Duration::ZERO,
        };
        Self {
            name: name.into(),
            ctx: ctx.clone(),
            state: RefCell::new(state),
        }
    }

    /// Wait as a slave until a master has cooperated with the calling process
    pub async fn wait_on_coop(&self) -> SyncResult<()> {
        let me = self.ctx.caller(&self.name, "wait_on_coop")?;
        if self.ctx.slave_registry().borrow().contains(&me) {
            warn!(primitive = %self.name, process = %me, "process already waits as a slave, ignored");
            return Err(SyncError::IllegalState {
                primitive: self.name.clone(),
                operation: "wait_on_coop",
                reason: format!("{me} is already waiting for a master"),
            });
        }

        let scheduler = self.ctx.scheduler();
        let first_master = {
            let mut state = self.state.borrow_mut();
            let priority = scheduler.queueing_priority(me);
            if let Err(rejected) = state.slaves.enqueue(me, priority, self.ctx.now()) {
                debug!(primitive = %self.name, process = %me, %rejected, "slave not queued");
                return Err(rejected.into_error(&self.name, "wait_on_coop"));
            }
            state.masters.first()
        };
        self.ctx.slave_registry().borrow_mut().insert(me);
        if let Some(master) = first_master {
            reactivate(scheduler, master);
        }

        loop {
            scheduler.set_blocked(me, true);
            passivate().await;
            let mut state = self.state.borrow_mut();
            if state.cancelled_slaves.remove(&me) {
                return Err(SyncError::Cancelled {
                    primitive: self.name.clone(),
                });
            }
            if !state.slaves.contains(me) && !state.in_cooperation.contains(&me) {
                break;
            }
        }
        scheduler.set_blocked(me, false);
        Ok(())
    }

    /// Cooperate as a master with the first waiting slave.
    ///
    /// Waits until a slave is available and the caller is the first master.
    /// `cooperation` runs with `(master, slave)` and may hold; the slave is
    /// resumed right after the master once it returns.
    pub async fn cooperate<F, Fut>(&self, cooperation: F) -> SyncResult<()>
    where
        F: FnOnce(ProcessId, ProcessId) -> Fut,
        Fut: Future<Output = ()>,
    {
        self.cooperate_with(None, cooperation).await
    }

    /// Cooperate with the first waiting slave for which `condition` holds.
    ///
    /// Masters behind the first may be served before it when only they have
    /// a matching slave.
    pub async fn cooperate_if<C, F, Fut>(&self, condition: C, cooperation: F) -> SyncResult<()>
    where
        C: Fn(ProcessId) -> bool,
        F: FnOnce(ProcessId, ProcessId) -> Fut,
        Fut: Future<Output = ()>,
    {
        self.cooperate_with(Some(&condition), cooperation).await
    }

    async fn cooperate_with<F, Fut>(
        &self,
        condition: Option<&dyn Fn(ProcessId) -> bool>,
        cooperation: F,
    ) -> SyncResult<()>
    where
        F: FnOnce(ProcessId, ProcessId) -> Fut,
        Fut: Future<Output = ()>,
    {
        let me = self.ctx.caller(&self.name, "cooperate")?;
        let scheduler = self.ctx.scheduler();
        {
            let mut state = self.state.borrow_mut();
            let priority = scheduler.queueing_priority(me);
            if let Err(rejected) = state.masters.enqueue(me, priority, self.ctx.now()) {
                debug!(primitive = %self.name, process = %me, %rejected, "master not queued");
                return Err(rejected.into_error(&self.name, "cooperate"));
            }
        }

        let mut entering = true;
        let slave = loop {
            let slave = self.matching_slave(condition);
            let (first, succ, slaves_waiting) = {
                let state = self.state.borrow();
                (state.masters.first(), state.masters.succ(me), !state.slaves.is_empty())
            };
            let my_turn = condition.is_some() || first == Some(me);
            if let (Some(slave), true) = (slave, my_turn) {
                break slave;
            }

            if slaves_waiting {
                // On arrival hand the slaves to the first master, afterwards
                // pass the wake-up down the line
                let next = if entering && first != Some(me) { first } else { succ };
                if let Some(next) = next {
                    reactivate(scheduler, next);
                }
            }
            entering = false;

            scheduler.set_blocked(me, true);
            passivate().await;

            let mut state = self.state.borrow_mut();
            if state.masters_to_remove.remove(&me) {
                if scheduler.is_scheduled(me) {
                    scheduler.cancel(me);
                }
                state.masters.dequeue(me, self.ctx.now());
                state.masters_removed += 1;
                drop(state);
                scheduler.set_blocked(me, false);
                return Err(SyncError::Cancelled {
                    primitive: self.name.clone(),
                });
            }
        };

        let next_master = {
            let mut state = self.state.borrow_mut();
            let now = self.ctx.now();
            let next = if state.slaves.len() > 1 { state.masters.succ(me) } else { None };
            state.masters.dequeue(me, now);
            state.slaves.dequeue(slave, now);
            state.in_cooperation.insert(slave);
            next
        };
        self.ctx.slave_registry().borrow_mut().remove(&slave);
        scheduler.set_blocked(me, false);
        if let Some(next) = next_master {
            reactivate(scheduler, next);
        }

        let started = self.ctx.now();
        cooperation(me, slave).await;
        let elapsed = self.ctx.now().duration_since(started);

        {
            let mut state = self.state.borrow_mut();
            state.in_cooperation.remove(&slave);
            state.cooperations += 1;
            state.total_coop_time += elapsed;
        }
        if scheduler.is_scheduled(slave) {
            scheduler.cancel(slave);
        }
        scheduler.activate_after(slave, me);
        Ok(())
    }

    fn matching_slave(&self, condition: Option<&dyn Fn(ProcessId) -> bool>) -> Option<ProcessId> {
        let slaves = self.state.borrow().slaves.processes();
        match condition {
            None => slaves.first().copied(),
            Some(condition) => slaves.into_iter().find(|&p| condition(p)),
        }
    }

    /// Take `process` out of the rendezvous. Returns true if it was waiting
    /// here as a master or a slave.
    pub fn cancel_coop(&self, process: ProcessId) -> bool {
        let scheduler = self.ctx.scheduler();
        let mut state = self.state.borrow_mut();

        if state.masters.contains(process) {
            state.masters_to_remove.insert(process);
            drop(state);
            if scheduler.is_scheduled(process) {
                scheduler.cancel(process);
            }
            scheduler.activate(process, Duration::ZERO);
            return true;
        }

        if state.slaves.dequeue(process, self.ctx.now()) {
            state.slaves_removed += 1;
            state.cancelled_slaves.insert(process);
            drop(state);
            self.ctx.slave_registry().borrow_mut().remove(&process);
            if scheduler.is_scheduled(process) {
                scheduler.cancel(process);
            }
            scheduler.set_blocked(process, false);
            scheduler.activate(process, Duration::ZERO);
            return true;
        }

        false
    }

    /// First waiting slave for which `condition` holds
    pub fn avail_slave<C>(&self, condition: C) -> Option<ProcessId>
    where
        C: Fn(ProcessId) -> bool,
    {
        self.matching_slave(Some(&condition))
    }

    /// First waiting master for which `condition` holds
    pub fn avail_master<C>(&self, condition: C) -> Option<ProcessId>
    where
        C: Fn(ProcessId) -> bool,
    {
        let masters = self.state.borrow().masters.processes();
        masters.into_iter().find(|&p| condition(p))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn waiting_masters(&self) -> Vec<ProcessId> {
        self.state.borrow().masters.processes()
    }

    pub fn waiting_slaves(&self) -> Vec<ProcessId> {
        self.state.borrow().slaves.processes()
    }

    pub fn cooperations_completed(&self) -> u64 {
        self.state.borrow().cooperations
    }

    /// Mean duration of the completed cooperations since the last reset
    pub fn average_coop_time(&self) -> Option<Duration> {
        let state = self.state.borrow();
        if state.cooperations == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            state.total_coop_time.as_secs_f64() / state.cooperations as f64,
        ))
    }

    pub fn master_refused(&self) -> u64 {
        self.state.borrow().masters.refused()
    }

    pub fn slave_refused(&self) -> u64 {
        self.state.borrow().slaves.refused()
    }

    pub fn masters_removed(&self) -> u64 {
        self.state.borrow().masters_removed
    }

    pub fn slaves_removed(&self) -> u64 {
        self.state.borrow().slaves_removed
    }

    pub fn master_snapshot(&self) -> QueueSnapshot {
        let name = format!("{}.masters", self.name);
        self.state.borrow().masters.snapshot(&name, self.ctx.now())
    }

    pub fn slave_snapshot(&self) -> QueueSnapshot {
        let name = format!("{}.slaves", self.name);
        self.state.borrow().slaves.snapshot(&name, self.ctx.now())
    }

    pub fn reset(&self) {
        let now = self.ctx.now();
        let mut state = self.state.borrow_mut();
        state.masters.reset(now);
        state.slaves.reset(now);
        state.masters_removed = 0;
        state.slaves_removed = 0;
        state.cooperations = 0;
        state.total_coop_time = Duration::ZERO;
    }
}
