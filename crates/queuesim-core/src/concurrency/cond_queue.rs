// Condition queue
//
// Processes wait here until a predicate over the model state holds. Only the
// first waiter is woken by `signal`; with `check_all` every waiter gets to
// re-test its predicate.

use std::cell::RefCell;

use tracing::{debug, warn};

use crate::context::SimContext;
use crate::error::{SyncError, SyncResult};
use crate::process::{passivate, reactivate, ProcessId};
use crate::queue::{QueueConfig, QueueDiscipline, QueueSnapshot, TrackedQueue};

#[derive(Debug)]
struct CondState {
    queue: TrackedQueue,
    check_all: bool,
}

/// Queue of processes waiting for a condition
#[derive(Debug)]
pub struct CondQueue {
    name: String,
    ctx: SimContext,
    state: RefCell<CondState>,
}

impl CondQueue {
    pub fn new(ctx: &SimContext, name: impl Into<String>, queue: QueueConfig) -> Self {
        let state = CondState {
            queue: TrackedQueue::new(&queue, ctx.next_seed(), ctx.now()),
            check_all: false,
        };
        Self {
            name: name.into(),
            ctx: ctx.clone(),
            state: RefCell::new(state),
        }
    }

    /// Wait until `condition` holds for the calling process.
    ///
    /// The condition is re-tested every time the process is woken. Returns
    /// `Err(SyncError::Cancelled)` if the wait was ended by `wait_cancel`.
    pub async fn wait_until<C>(&self, condition: C) -> SyncResult<()>
    where
        C: Fn(ProcessId) -> bool,
    {
        let me = self.ctx.caller(&self.name, "wait_until")?;
        let scheduler = self.ctx.scheduler();
        {
            let mut state = self.state.borrow_mut();
            let priority = scheduler.queueing_priority(me);
            if let Err(rejected) = state.queue.enqueue(me, priority, self.ctx.now()) {
                debug!(primitive = %self.name, process = %me, %rejected, "wait not queued");
                return Err(rejected.into_error(&self.name, "wait_until"));
            }
        }

        if !condition(me) {
            loop {
                scheduler.set_blocked(me, true);
                passivate().await;
                if !scheduler.is_blocked(me) {
                    // wait_cancel already removed us from the queue
                    return Err(SyncError::Cancelled {
                        primitive: self.name.clone(),
                    });
                }
                let proceed = condition(me);
                let (check_all, succ) = {
                    let state = self.state.borrow();
                    (state.check_all, state.queue.succ(me))
                };
                if proceed || check_all {
                    if let Some(next) = succ {
                        reactivate(scheduler, next);
                    }
                }
                if proceed {
                    break;
                }
            }
        }

        self.state.borrow_mut().queue.dequeue(me, self.ctx.now());
        scheduler.set_blocked(me, false);
        Ok(())
    }

    /// Wake the first waiting process so it re-tests its condition
    pub fn signal(&self) {
        let first = self.state.borrow().queue.first();
        if let Some(first) = first {
            reactivate(self.ctx.scheduler(), first);
        }
    }

    /// End the wait of `process` without its condition being met
    pub fn wait_cancel(&self, process: ProcessId) -> SyncResult<()> {
        let removed = self.state.borrow_mut().queue.dequeue(process, self.ctx.now());
        if !removed {
            warn!(primitive = %self.name, process = %process, "process is not waiting here, cancel ignored");
            return Err(SyncError::IllegalState {
                primitive: self.name.clone(),
                operation: "wait_cancel",
                reason: format!("{process} is not waiting"),
            });
        }

        let scheduler = self.ctx.scheduler();
        if scheduler.is_scheduled(process) {
            scheduler.cancel(process);
        }
        scheduler.set_blocked(process, false);
        scheduler.activate(process, std::time::Duration::ZERO);
        Ok(())
    }

    pub fn first(&self) -> Option<ProcessId> {
        self.state.borrow().queue.first()
    }

    /// First waiting process for which `condition` holds
    pub fn first_matching<C>(&self, condition: C) -> Option<ProcessId>
    where
        C: Fn(ProcessId) -> bool,
    {
        let candidates = self.state.borrow().queue.processes();
        candidates.into_iter().find(|&p| condition(p))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.state.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().queue.is_empty()
    }

    pub fn waiting(&self) -> Vec<ProcessId> {
        self.state.borrow().queue.processes()
    }

    pub fn check_all(&self) -> bool {
        self.state.borrow().check_all
    }

    pub fn set_check_all(&self, check_all: bool) {
        self.state.borrow_mut().check_all = check_all;
    }

    pub fn refused(&self) -> u64 {
        self.state.borrow().queue.refused()
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.state.borrow().queue.discipline()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.state.borrow().queue.snapshot(&self.name, self.ctx.now())
    }

    pub fn reset(&self) {
        self.state.borrow_mut().queue.reset(self.ctx.now());
    }
}
