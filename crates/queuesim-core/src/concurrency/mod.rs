// Synchronization primitives
//
// This module provides the process synchronization primitives: buffers
// (`Bin`, `Stock`), a resource pool with deadlock detection (`Res`), a
// condition queue (`CondQueue`) and a master/slave rendezvous queue
// (`WaitQueue`).

pub mod bin;
pub mod cond_queue;
pub(crate) mod level;
pub mod res;
pub mod resource_db;
pub mod stock;
pub mod wait_queue;

pub use bin::Bin;
pub use cond_queue::CondQueue;
pub use res::{Res, ResourceUnit};
pub use resource_db::{DeadlockKind, DeadlockReport, PoolId, PoolProbe, ResourceDb, SharedResourceDb};
pub use stock::Stock;
pub use wait_queue::WaitQueue;

use crate::process::{passivate, reactivate, ProcessId, Scheduler};

/// Where a waiting process stands in its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Turn {
    pub first: Option<ProcessId>,
    pub succ: Option<ProcessId>,
}

/// Suspend `me` until its request fits and, without pass-by, until it is
/// first in line.
///
/// With pass-by, every resumption forwards the wake-up to the successor
/// before re-checking, so requests further back that fit get their chance
/// while a large request at the front keeps waiting. `on_block` runs once,
/// just before the first suspension. Returns true if the process had to wait.
pub(crate) async fn wait_for_turn<L, F, B>(
    scheduler: &dyn Scheduler,
    me: ProcessId,
    pass_by: bool,
    turn: L,
    fits: F,
    on_block: B,
) -> bool
where
    L: Fn() -> Turn,
    F: Fn() -> bool,
    B: FnOnce(),
{
    let first = turn().first;
    if fits() && (pass_by || first == Some(me)) {
        return false;
    }
    on_block();

    if pass_by {
        if let Some(first) = first.filter(|&f| f != me) {
            reactivate(scheduler, first);
        }
        loop {
            scheduler.set_blocked(me, true);
            passivate().await;
            if let Some(next) = turn().succ {
                reactivate(scheduler, next);
            }
            if fits() {
                break;
            }
        }
    } else {
        loop {
            scheduler.set_blocked(me, true);
            passivate().await;
            if fits() && turn().first == Some(me) {
                break;
            }
        }
    }
    true
}
