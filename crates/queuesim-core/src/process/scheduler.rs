// Scheduler interface
//
// The synchronization primitives never own a clock or an event list. They
// talk to whatever hosts the processes through this trait: who is running,
// what time it is, and how to suspend, wake and cancel processes.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::process::ProcessId;
use crate::time::SimTime;

/// Host of simulated processes.
///
/// All methods take `&self`; implementations use interior mutability and
/// are single-threaded. A process is *scheduled* while it has a pending
/// activation in the event list and *passive* otherwise.
pub trait Scheduler {
    /// The process currently executing, if any
    fn current(&self) -> Option<ProcessId>;

    /// Present simulated time
    fn present_time(&self) -> SimTime;

    /// True if the process belongs to this host
    fn contains(&self, process: ProcessId) -> bool;

    /// Human-readable name of a process, for diagnostics
    fn process_name(&self, process: ProcessId) -> Option<String>;

    /// True if the process has a pending activation
    fn is_scheduled(&self, process: ProcessId) -> bool;

    /// Remove a pending activation; no effect on a passive process
    fn cancel(&self, process: ProcessId);

    /// Schedule `process` after `delay`, behind every activation already
    /// pending at that instant
    fn activate(&self, process: ProcessId, delay: Duration);

    /// Schedule `process` at the present time, immediately after `reference`.
    /// If `reference` is the running process, `process` runs before any other
    /// activation pending at the present time.
    fn activate_after(&self, process: ProcessId, reference: ProcessId);

    fn set_blocked(&self, process: ProcessId, blocked: bool);

    fn is_blocked(&self, process: ProcessId) -> bool;

    /// Queueing priority; higher values are served first
    fn queueing_priority(&self, process: ProcessId) -> i32;
}

/// Scheduler handle shared by every primitive of one simulation
pub type SharedScheduler = Rc<dyn Scheduler>;

/// Future that suspends the calling process exactly once.
///
/// The host resumes the process by polling it again after one of its
/// activations comes due.
#[derive(Debug, Default)]
#[must_use = "a process is only suspended when the future is awaited"]
pub struct Passivate {
    yielded: bool,
}

impl Future for Passivate {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}

/// Suspend the calling process until something activates it
pub fn passivate() -> Passivate {
    Passivate::default()
}

/// Suspend the calling process for `span` of simulated time
pub async fn hold(scheduler: &dyn Scheduler, span: Duration) {
    match scheduler.current() {
        Some(me) => {
            scheduler.activate(me, span);
            passivate().await;
        }
        None => tracing::warn!("hold called outside of a process"),
    }
}

/// Wake `process` so that it runs right after the current process.
///
/// A pending activation of `process` is cancelled first. The blocked flag is
/// left as it is: a woken waiter that finds itself still blocked knows it was
/// woken to re-check its condition, not cancelled.
pub fn reactivate(scheduler: &dyn Scheduler, process: ProcessId) {
    let Some(me) = scheduler.current() else {
        tracing::warn!(process = %process, "reactivate called outside of a process");
        return;
    };
    if process == me {
        return;
    }
    if scheduler.is_scheduled(process) {
        scheduler.cancel(process);
    }
    scheduler.activate_after(process, me);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn test_passivate_yields_once() {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = passivate();

        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut fut).poll(&mut cx).is_ready());
    }
}
