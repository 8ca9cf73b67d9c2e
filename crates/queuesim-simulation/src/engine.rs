//! Simulation Engine
//!
//! A single-threaded cooperative kernel hosting simulated processes. Each
//! process is a future; the kernel keeps a time-ordered event list of pending
//! activations, advances the clock to the next one, and polls that process
//! until it suspends again.

//-----------------------------------------------------------------------------
// Imports
//-----------------------------------------------------------------------------

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::rc::Rc;
use std::task::Context;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use queuesim_core::randomness::SeededRng;
use queuesim_core::{ProcessId, QueueConfig, Scheduler, SimContext, SimTime};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::clock::SimulatedClock;
use crate::config::SimulationConfig;
use crate::error::{SimulationError, SimulationResult};

//-----------------------------------------------------------------------------
// Process Specification
//-----------------------------------------------------------------------------

/// Name, priority and start delay of a process to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub priority: i32,
    pub delay: Duration,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            delay: Duration::ZERO,
        }
    }

    /// Queueing priority; higher values are served first
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Start the process `delay` after spawning it
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl From<&str> for ProcessSpec {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ProcessSpec {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

//-----------------------------------------------------------------------------
// Kernel
//-----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventNote {
    time: SimTime,
    process: ProcessId,
}

struct ProcessSlot {
    name: String,
    priority: i32,
    blocked: bool,
    terminated: bool,
    /// `None` while the process is being polled or after it terminated
    body: Option<LocalBoxFuture<'static, ()>>,
}

#[derive(Default)]
struct KernelState {
    current: Option<ProcessId>,
    events: VecDeque<EventNote>,
    processes: BTreeMap<ProcessId, ProcessSlot>,
    steps: u64,
}

impl KernelState {
    fn position(&self, process: ProcessId) -> Option<usize> {
        self.events.iter().position(|note| note.process == process)
    }

    /// Insert behind every note due at or before `note.time`
    fn schedule(&mut self, note: EventNote) {
        let index = self
            .events
            .iter()
            .position(|pending| pending.time > note.time)
            .unwrap_or(self.events.len());
        self.events.insert(index, note);
    }

    /// True if `process` may be given a new activation
    fn can_activate(&self, process: ProcessId, operation: &'static str) -> bool {
        let Some(slot) = self.processes.get(&process) else {
            warn!(process = %process, operation, "process is not part of this simulation");
            return false;
        };
        if slot.terminated {
            warn!(process = %slot.name, operation, "process has terminated, activation ignored");
            return false;
        }
        if self.position(process).is_some() {
            warn!(process = %slot.name, operation, "process is already scheduled, activation ignored");
            return false;
        }
        true
    }
}

/// Event list and process table behind a [`Simulation`]
struct Kernel {
    clock: SimulatedClock,
    state: RefCell<KernelState>,
}

impl Kernel {
    /// Pop the next due activation, advance the clock to it, and hand out the
    /// body of the process to poll
    fn next_ready(&self) -> Option<(ProcessId, LocalBoxFuture<'static, ()>)> {
        let mut state = self.state.borrow_mut();
        while let Some(note) = state.events.pop_front() {
            self.clock.advance_to(note.time);
            let Some(body) = state
                .processes
                .get_mut(&note.process)
                .filter(|slot| !slot.terminated)
                .and_then(|slot| slot.body.take())
            else {
                continue;
            };
            state.current = Some(note.process);
            return Some((note.process, body));
        }
        None
    }

    fn finish_turn(&self, process: ProcessId, body: LocalBoxFuture<'static, ()>, finished: bool) {
        let mut state = self.state.borrow_mut();
        state.current = None;
        state.steps += 1;
        if finished {
            state.events.retain(|note| note.process != process);
        }
        if let Some(slot) = state.processes.get_mut(&process) {
            if finished {
                slot.terminated = true;
                slot.blocked = false;
                trace!(process = %slot.name, time = %self.clock.now(), "process terminated");
            } else {
                slot.body = Some(body);
            }
        }
    }
}

impl Scheduler for Kernel {
    fn current(&self) -> Option<ProcessId> {
        self.state.borrow().current
    }

    fn present_time(&self) -> SimTime {
        self.clock.now()
    }

    fn contains(&self, process: ProcessId) -> bool {
        self.state.borrow().processes.contains_key(&process)
    }

    fn process_name(&self, process: ProcessId) -> Option<String> {
        self.state.borrow().processes.get(&process).map(|slot| slot.name.clone())
    }

    fn is_scheduled(&self, process: ProcessId) -> bool {
        self.state.borrow().position(process).is_some()
    }

    fn cancel(&self, process: ProcessId) {
        self.state.borrow_mut().events.retain(|note| note.process != process);
    }

    fn activate(&self, process: ProcessId, delay: Duration) {
        let mut state = self.state.borrow_mut();
        if !state.can_activate(process, "activate") {
            return;
        }
        let time = self.clock.now().add_duration(delay);
        state.schedule(EventNote { time, process });
    }

    fn activate_after(&self, process: ProcessId, reference: ProcessId) {
        let mut state = self.state.borrow_mut();
        if !state.can_activate(process, "activate_after") {
            return;
        }
        let now = self.clock.now();
        if let Some(index) = state.position(reference) {
            let time = state.events[index].time;
            state.events.insert(index + 1, EventNote { time, process });
        } else if state.current == Some(reference) {
            state.events.push_front(EventNote { time: now, process });
        } else {
            warn!(
                process = %process,
                reference = %reference,
                "reference process is neither scheduled nor running, activating at present time"
            );
            state.schedule(EventNote { time: now, process });
        }
    }

    fn set_blocked(&self, process: ProcessId, blocked: bool) {
        if let Some(slot) = self.state.borrow_mut().processes.get_mut(&process) {
            slot.blocked = blocked;
        }
    }

    fn is_blocked(&self, process: ProcessId) -> bool {
        self.state
            .borrow()
            .processes
            .get(&process)
            .is_some_and(|slot| slot.blocked)
    }

    fn queueing_priority(&self, process: ProcessId) -> i32 {
        self.state
            .borrow()
            .processes
            .get(&process)
            .map_or(0, |slot| slot.priority)
    }
}

//-----------------------------------------------------------------------------
// Simulation
//-----------------------------------------------------------------------------

/// Outcome of a call to [`Simulation::run`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Process resumptions performed by this run
    pub steps: u64,
    pub end_time: SimTime,
    /// Activations still pending when the run stopped
    pub pending_events: usize,
    /// Processes that have not terminated
    pub live_processes: usize,
}

/// Cooperative host for simulated processes.
///
/// Cloning yields another handle to the same simulation, so process bodies
/// can spawn further processes.
#[derive(Clone)]
pub struct Simulation {
    kernel: Rc<Kernel>,
    ctx: SimContext,
    config: SimulationConfig,
    seed: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let seed = config
            .seed
            .unwrap_or_else(|| SeededRng::from_entropy().get_seed());
        let kernel = Rc::new(Kernel {
            clock: SimulatedClock::new(SimTime::ZERO),
            state: RefCell::new(KernelState::default()),
        });
        let scheduler: Rc<dyn Scheduler> = kernel.clone();
        let ctx = SimContext::new(scheduler, seed).with_deadlock_check(config.deadlock_check);
        debug!(seed, "simulation created");
        Self {
            kernel,
            ctx,
            config,
            seed,
        }
    }

    /// Simulation with default configuration and a fixed seed
    pub fn with_seed(seed: u64) -> Self {
        Self::new(SimulationConfig::default().with_seed(seed))
    }

    /// Context to build synchronization primitives with
    pub fn context(&self) -> SimContext {
        self.ctx.clone()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn default_queue(&self) -> QueueConfig {
        self.config.default_queue
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn clock(&self) -> SimulatedClock {
        self.kernel.clock.clone()
    }

    pub fn now(&self) -> SimTime {
        self.kernel.clock.now()
    }

    /// Register a process and schedule its first activation
    pub fn spawn<F>(&self, spec: impl Into<ProcessSpec>, body: F) -> ProcessId
    where
        F: Future<Output = ()> + 'static,
    {
        let spec = spec.into();
        let process = ProcessId::new();
        let mut state = self.kernel.state.borrow_mut();
        state.processes.insert(
            process,
            ProcessSlot {
                name: spec.name.clone(),
                priority: spec.priority,
                blocked: false,
                terminated: false,
                body: Some(body.boxed_local()),
            },
        );
        let time = self.kernel.clock.now().add_duration(spec.delay);
        state.schedule(EventNote { time, process });
        trace!(process = %spec.name, id = %process, time = %time, "process spawned");
        process
    }

    /// Resume the next due process. Returns false if no activation is pending.
    pub fn step(&self) -> bool {
        let Some((process, mut body)) = self.kernel.next_ready() else {
            return false;
        };
        let mut cx = Context::from_waker(noop_waker_ref());
        let finished = body.as_mut().poll(&mut cx).is_ready();
        self.kernel.finish_turn(process, body, finished);
        true
    }

    /// Run until no activation is pending, or until the configured stop time
    /// or step limit is reached
    pub fn run(&self) -> SimulationResult<RunSummary> {
        self.run_bounded(self.config.stop_at(), self.config.max_steps)
    }

    /// Run every activation due at or before `stop`, then move the clock to `stop`
    pub fn run_until(&self, stop: SimTime) -> SimulationResult<RunSummary> {
        self.run_bounded(Some(stop), self.config.max_steps)
    }

    fn run_bounded(&self, stop: Option<SimTime>, max_steps: Option<u64>) -> SimulationResult<RunSummary> {
        if let Some(process) = self.kernel.state.borrow().current {
            return Err(SimulationError::InvalidOperation(format!(
                "run called from inside {process}"
            )));
        }

        let mut steps = 0u64;
        loop {
            if max_steps.is_some_and(|limit| steps >= limit) {
                warn!(steps, "step limit reached, run stopped");
                break;
            }
            let next_time = self.kernel.state.borrow().events.front().map(|note| note.time);
            match (next_time, stop) {
                (None, _) => break,
                (Some(time), Some(stop)) if time > stop => break,
                _ => {}
            }
            if !self.step() {
                break;
            }
            steps += 1;
        }

        if let Some(stop) = stop {
            if stop > self.now() && max_steps.map_or(true, |limit| steps < limit) {
                self.kernel.clock.advance_to(stop);
            }
        }

        let summary = self.summary(steps);
        info!(
            steps = summary.steps,
            end_time = %summary.end_time,
            pending = summary.pending_events,
            live = summary.live_processes,
            "simulation run finished"
        );
        Ok(summary)
    }

    fn summary(&self, steps: u64) -> RunSummary {
        let state = self.kernel.state.borrow();
        RunSummary {
            steps,
            end_time: self.kernel.clock.now(),
            pending_events: state.events.len(),
            live_processes: state.processes.values().filter(|slot| !slot.terminated).count(),
        }
    }

    pub fn is_terminated(&self, process: ProcessId) -> bool {
        self.kernel
            .state
            .borrow()
            .processes
            .get(&process)
            .is_some_and(|slot| slot.terminated)
    }

    pub fn is_scheduled(&self, process: ProcessId) -> bool {
        self.kernel.is_scheduled(process)
    }

    pub fn is_blocked(&self, process: ProcessId) -> bool {
        self.kernel.is_blocked(process)
    }

    pub fn process_name(&self, process: ProcessId) -> Option<String> {
        self.kernel.process_name(process)
    }

    pub fn set_priority(&self, process: ProcessId, priority: i32) {
        if let Some(slot) = self.kernel.state.borrow_mut().processes.get_mut(&process) {
            slot.priority = priority;
        }
    }

    /// Total process resumptions since the simulation was created
    pub fn total_steps(&self) -> u64 {
        self.kernel.state.borrow().steps
    }
}
