//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use queuesim_core::{ProcessId, SimContext, SimTime};

/// Event log shared between test processes
pub type Log<T> = Rc<RefCell<Vec<T>>>;

pub fn new_log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn at(n: u64) -> SimTime {
    SimTime::from_secs(n)
}

/// The process running the calling code
pub fn me(ctx: &SimContext) -> ProcessId {
    ctx.current().expect("called inside a process")
}
