// Resource database and deadlock detection
//
// Keeps the wait-for graph of all resource pools of one simulation: which
// process waits for how many units of which pool, and which processes hold
// units of each pool. A blocked request triggers a depth-first search for a
// cycle through this graph, rooted at the requesting process.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::warn;

use crate::process::ProcessId;
use crate::time::SimTime;

/// Resource database shared by every pool of one simulation
pub type SharedResourceDb = Rc<RefCell<ResourceDb>>;

/// Identifier of a resource pool registered in the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PoolId(u64);

impl PoolId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// View of a pool's live state, read while classifying a deadlock
pub trait PoolProbe {
    /// Units currently on the free list
    fn avail(&self) -> u64;

    fn pass_by(&self) -> bool;

    /// Processes waiting for the pool, in service order
    fn waiting(&self) -> Vec<ProcessId>;

    fn set_deadlock_detected(&self, detected: bool);
}

/// Outstanding request of a blocked process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceRequest {
    pub pool: PoolId,
    pub units: u64,
}

/// Units of one pool held by one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub process: ProcessId,
    pub units: u64,
}

/// How hopeless a detected deadlock is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeadlockKind {
    /// Every process reachable from the requester is on the cycle
    Total,
    /// Releasing everything that could still proceed leaves processes stuck
    Pending,
    /// Processes outside the cycle can still free enough units to break it
    Transient,
}

impl fmt::Display for DeadlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total => write!(f, "total"),
            Self::Pending => write!(f, "pending"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Outcome of a successful cycle search
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockReport {
    pub kind: DeadlockKind,
    pub requester: ProcessId,
    /// Processes on the search path when the cycle closed
    pub processes: Vec<ProcessId>,
    /// Pools on the search path when the cycle closed
    pub pools: Vec<PoolId>,
    pub detected_at: SimTime,
}

struct PoolEntry {
    name: String,
    probe: Weak<dyn PoolProbe>,
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("name", &self.name)
            .field("alive", &(self.probe.strong_count() > 0))
            .finish()
    }
}

/// Wait-for graph of all pools of one simulation
#[derive(Debug, Default)]
pub struct ResourceDb {
    requests: BTreeMap<ProcessId, ResourceRequest>,
    assignments: BTreeMap<PoolId, Vec<Allocation>>,
    pools: BTreeMap<PoolId, PoolEntry>,
    next_pool: u64,
    last_report: Option<DeadlockReport>,
}

impl ResourceDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool; the database only keeps a weak reference to its probe
    pub fn register_pool(&mut self, name: impl Into<String>, probe: Weak<dyn PoolProbe>) -> PoolId {
        self.next_pool += 1;
        let id = PoolId(self.next_pool);
        self.pools.insert(
            id,
            PoolEntry {
                name: name.into(),
                probe,
            },
        );
        id
    }

    /// Forget a pool together with all requests for it and allocations of it
    pub fn deregister_pool(&mut self, pool: PoolId) {
        self.clear_pool(pool);
        self.pools.remove(&pool);
    }

    /// Remove all requests for and allocations of `pool`
    pub fn clear_pool(&mut self, pool: PoolId) {
        self.requests.retain(|_, request| request.pool != pool);
        self.assignments.remove(&pool);
    }

    pub fn pool_name(&self, pool: PoolId) -> Option<&str> {
        self.pools.get(&pool).map(|entry| entry.name.as_str())
    }

    /// Record that `process` waits for `units` of `pool`. A process has at
    /// most one outstanding request; a second one is ignored.
    pub fn note_request(&mut self, process: ProcessId, pool: PoolId, units: u64) -> bool {
        if let Some(existing) = self.requests.get(&process) {
            warn!(
                process = %process,
                pool = %existing.pool,
                "process already has an outstanding resource request, new request ignored"
            );
            return false;
        }
        self.requests.insert(process, ResourceRequest { pool, units });
        true
    }

    /// Drop the outstanding request of `process` for `pool`
    pub fn delete_request(&mut self, process: ProcessId, pool: PoolId) -> bool {
        match self.requests.get(&process) {
            Some(request) if request.pool == pool => {
                self.requests.remove(&process);
                true
            }
            _ => false,
        }
    }

    /// Record that `process` now holds `units` more units of `pool`
    pub fn note_allocation(&mut self, pool: PoolId, process: ProcessId, units: u64) {
        let allocations = self.assignments.entry(pool).or_default();
        match allocations.iter_mut().find(|a| a.process == process) {
            Some(allocation) => allocation.units += units,
            None => allocations.push(Allocation { process, units }),
        }
    }

    /// Record that `process` gave back `units` units of `pool`
    pub fn delete_allocation(&mut self, pool: PoolId, process: ProcessId, units: u64) -> bool {
        let Some(allocations) = self.assignments.get_mut(&pool) else {
            return false;
        };
        let Some(index) = allocations.iter().position(|a| a.process == process) else {
            return false;
        };
        let allocation = &mut allocations[index];
        allocation.units = allocation.units.saturating_sub(units);
        if allocation.units == 0 {
            allocations.remove(index);
        }
        if allocations.is_empty() {
            self.assignments.remove(&pool);
        }
        true
    }

    pub fn request_of(&self, process: ProcessId) -> Option<ResourceRequest> {
        self.requests.get(&process).copied()
    }

    pub fn allocations(&self, pool: PoolId) -> &[Allocation] {
        self.assignments.get(&pool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Units held by `process`, per pool
    pub fn held_by(&self, process: ProcessId) -> Vec<(PoolId, u64)> {
        self.assignments
            .iter()
            .filter_map(|(pool, allocations)| {
                allocations
                    .iter()
                    .find(|a| a.process == process)
                    .map(|a| (*pool, a.units))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.assignments.is_empty()
    }

    /// Report of the most recent deadlock found
    pub fn last_report(&self) -> Option<&DeadlockReport> {
        self.last_report.as_ref()
    }

    /// Search the wait-for graph for a cycle reachable from `requester`.
    ///
    /// Every pool on a detected cycle is flagged through its probe. Detection
    /// only: nothing is released or cancelled.
    pub fn check_for_deadlock(&mut self, requester: ProcessId, now: SimTime) -> Option<DeadlockReport> {
        let mut search = CycleSearch::new(self);
        search.visit_process(requester);
        if !search.cycle_found {
            return None;
        }

        let kind = if search.deadlocked_procs.len() == search.visited_procs.len() {
            DeadlockKind::Total
        } else if self.is_pending(&search.visited_procs) {
            DeadlockKind::Pending
        } else {
            DeadlockKind::Transient
        };

        let report = DeadlockReport {
            kind,
            requester,
            processes: search.deadlocked_procs,
            pools: search.deadlocked_pools,
            detected_at: now,
        };
        for pool in &report.pools {
            if let Some(probe) = self.pools.get(pool).and_then(|entry| entry.probe.upgrade()) {
                probe.set_deadlock_detected(true);
            }
        }
        warn!(
            process = %requester,
            kind = %report.kind,
            processes = report.processes.len(),
            pools = report.pools.len(),
            "resource deadlock detected"
        );
        self.last_report = Some(report.clone());
        Some(report)
    }

    /// Optimistically release the holdings of every process that could still
    /// get what it asked for; the deadlock is pending if anyone is left over.
    fn is_pending(&self, processes: &BTreeSet<ProcessId>) -> bool {
        let probes: BTreeMap<PoolId, Rc<dyn PoolProbe>> = self
            .pools
            .iter()
            .filter_map(|(id, entry)| entry.probe.upgrade().map(|probe| (*id, probe)))
            .collect();
        let mut capacity: BTreeMap<PoolId, u64> =
            probes.iter().map(|(id, probe)| (*id, probe.avail())).collect();
        let mut remaining: Vec<ProcessId> = processes.iter().copied().collect();

        loop {
            let released = remaining.iter().position(|&process| match self.requests.get(&process) {
                None => true,
                Some(request) => {
                    let need = self.effective_need(process, request, probes.get(&request.pool));
                    capacity.get(&request.pool).copied().unwrap_or(0) >= need
                }
            });
            let Some(index) = released else {
                break;
            };
            let process = remaining.remove(index);
            for (pool, units) in self.held_by(process) {
                *capacity.entry(pool).or_insert(0) += units;
            }
            if remaining.is_empty() {
                break;
            }
        }
        !remaining.is_empty()
    }

    /// Units a waiting process needs free before it can be served. Without
    /// pass-by it also has to wait for every larger request queued ahead of it.
    fn effective_need(
        &self,
        process: ProcessId,
        request: &ResourceRequest,
        probe: Option<&Rc<dyn PoolProbe>>,
    ) -> u64 {
        let Some(probe) = probe.filter(|probe| !probe.pass_by()) else {
            return request.units;
        };
        probe
            .waiting()
            .into_iter()
            .take_while(|&waiting| waiting != process)
            .filter_map(|waiting| self.requests.get(&waiting))
            .filter(|ahead| ahead.pool == request.pool)
            .map(|ahead| ahead.units)
            .fold(request.units, u64::max)
    }
}

/// Depth-first search over the bipartite process/pool graph
struct CycleSearch<'a> {
    db: &'a ResourceDb,
    visited_procs: BTreeSet<ProcessId>,
    done_procs: BTreeSet<ProcessId>,
    visited_pools: BTreeSet<PoolId>,
    done_pools: BTreeSet<PoolId>,
    deadlocked_procs: Vec<ProcessId>,
    deadlocked_pools: Vec<PoolId>,
    cycle_found: bool,
}

impl<'a> CycleSearch<'a> {
    fn new(db: &'a ResourceDb) -> Self {
        Self {
            db,
            visited_procs: BTreeSet::new(),
            done_procs: BTreeSet::new(),
            visited_pools: BTreeSet::new(),
            done_pools: BTreeSet::new(),
            deadlocked_procs: Vec::new(),
            deadlocked_pools: Vec::new(),
            cycle_found: false,
        }
    }

    fn visit_process(&mut self, process: ProcessId) {
        self.visited_procs.insert(process);
        if !self.cycle_found {
            self.deadlocked_procs.push(process);
        }

        if let Some(request) = self.db.requests.get(&process) {
            let pool = request.pool;
            if !self.visited_pools.contains(&pool) {
                self.visit_pool(pool);
            } else if !self.done_pools.contains(&pool) {
                self.cycle_found = true;
            }
        }

        self.done_procs.insert(process);
        if !self.cycle_found {
            self.deadlocked_procs.retain(|&p| p != process);
        }
    }

    fn visit_pool(&mut self, pool: PoolId) {
        self.visited_pools.insert(pool);
        if !self.cycle_found {
            self.deadlocked_pools.push(pool);
        }

        let holders: Vec<ProcessId> = self.db.allocations(pool).iter().map(|a| a.process).collect();
        for holder in holders {
            if !self.visited_procs.contains(&holder) {
                self.visit_process(holder);
            } else if !self.done_procs.contains(&holder) {
                self.cycle_found = true;
            }
        }

        self.done_pools.insert(pool);
        if !self.cycle_found {
            self.deadlocked_pools.retain(|&p| p != pool);
        }
    }
}

impl fmt::Display for ResourceDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool_label = |pool: &PoolId| match self.pool_name(*pool) {
            Some(name) => format!("{name} ({pool})"),
            None => pool.to_string(),
        };

        writeln!(f, "Resource requests:")?;
        if self.requests.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (process, request) in &self.requests {
            writeln!(f, "  {process} waits for {} unit(s) of {}", request.units, pool_label(&request.pool))?;
        }

        writeln!(f, "Resource assignments:")?;
        if self.assignments.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (pool, allocations) in &self.assignments {
            let holders: Vec<String> = allocations
                .iter()
                .map(|a| format!("{} x{}", a.process, a.units))
                .collect();
            writeln!(f, "  {}: {}", pool_label(pool), holders.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    struct FakePool {
        avail: Cell<u64>,
        pass_by: bool,
        waiting: RefCell<Vec<ProcessId>>,
        flagged: Cell<bool>,
    }

    impl FakePool {
        fn new(avail: u64) -> Rc<Self> {
            Rc::new(Self {
                avail: Cell::new(avail),
                pass_by: false,
                waiting: RefCell::new(Vec::new()),
                flagged: Cell::new(false),
            })
        }
    }

    impl PoolProbe for FakePool {
        fn avail(&self) -> u64 {
            self.avail.get()
        }

        fn pass_by(&self) -> bool {
            self.pass_by
        }

        fn waiting(&self) -> Vec<ProcessId> {
            self.waiting.borrow().clone()
        }

        fn set_deadlock_detected(&self, detected: bool) {
            self.flagged.set(detected);
        }
    }

    fn register(db: &mut ResourceDb, name: &str, pool: &Rc<FakePool>) -> PoolId {
        let probe: Rc<dyn PoolProbe> = pool.clone();
        db.register_pool(name, Rc::downgrade(&probe))
    }

    #[test]
    fn test_no_cycle_without_back_edge() {
        let mut db = ResourceDb::new();
        let r1 = FakePool::new(0);
        let id1 = register(&mut db, "R1", &r1);
        let (a, b) = (ProcessId::new(), ProcessId::new());

        db.note_allocation(id1, b, 1);
        db.note_request(a, id1, 1);

        assert!(db.check_for_deadlock(a, SimTime::ZERO).is_none());
        assert!(!r1.flagged.get());
    }

    #[test]
    fn test_two_pool_cycle_is_total_deadlock() {
        let mut db = ResourceDb::new();
        let (r1, r2) = (FakePool::new(0), FakePool::new(0));
        let id1 = register(&mut db, "R1", &r1);
        let id2 = register(&mut db, "R2", &r2);
        let (a, b) = (ProcessId::new(), ProcessId::new());

        db.note_allocation(id1, a, 1);
        db.note_allocation(id2, b, 1);
        db.note_request(a, id2, 1);
        assert!(db.check_for_deadlock(a, SimTime::ZERO).is_none());

        db.note_request(b, id1, 1);
        let report = db.check_for_deadlock(b, SimTime::from_secs(2)).expect("deadlock");

        assert_eq!(report.kind, DeadlockKind::Total);
        assert_eq!(report.requester, b);
        assert_eq!(report.pools, vec![id1, id2]);
        assert_eq!(report.processes, vec![b, a]);
        assert!(r1.flagged.get() && r2.flagged.get());
        assert_eq!(db.last_report(), Some(&report));
    }

    #[test]
    fn test_cycle_with_free_bystander_is_transient() {
        let mut db = ResourceDb::new();
        let (r1, r2) = (FakePool::new(0), FakePool::new(0));
        let id1 = register(&mut db, "R1", &r1);
        let id2 = register(&mut db, "R2", &r2);
        let (a, b, c) = (ProcessId::new(), ProcessId::new(), ProcessId::new());

        // A holds R1 and waits for R2, which B and the running C hold.
        // B waits for R1.
        db.note_allocation(id1, a, 1);
        db.note_allocation(id2, b, 1);
        db.note_allocation(id2, c, 1);
        db.note_request(a, id2, 1);
        db.note_request(b, id1, 1);

        let report = db.check_for_deadlock(b, SimTime::ZERO).expect("cycle");
        assert_eq!(report.kind, DeadlockKind::Transient);
    }

    #[test]
    fn test_cycle_with_blocked_bystander_is_pending() {
        let mut db = ResourceDb::new();
        let (r1, r2, r3) = (FakePool::new(0), FakePool::new(0), FakePool::new(0));
        let id1 = register(&mut db, "R1", &r1);
        let id2 = register(&mut db, "R2", &r2);
        let id3 = register(&mut db, "R3", &r3);
        let (a, b, c, d) = (ProcessId::new(), ProcessId::new(), ProcessId::new(), ProcessId::new());

        db.note_allocation(id1, a, 1);
        db.note_allocation(id2, b, 1);
        db.note_allocation(id2, c, 1);
        db.note_allocation(id3, d, 1);
        db.note_request(a, id2, 2);
        db.note_request(c, id3, 1);
        db.note_request(d, id3, 5);
        db.note_request(b, id1, 1);

        // C waits on R3 which only D holds; D asks for more than R3 will ever free
        let report = db.check_for_deadlock(b, SimTime::ZERO).expect("cycle");
        assert_eq!(report.kind, DeadlockKind::Pending);
    }

    #[test]
    fn test_request_and_allocation_bookkeeping() {
        let mut db = ResourceDb::new();
        let r1 = FakePool::new(3);
        let id1 = register(&mut db, "R1", &r1);
        let p = ProcessId::new();

        assert!(db.note_request(p, id1, 2));
        assert!(!db.note_request(p, id1, 1));
        assert_eq!(db.request_of(p), Some(ResourceRequest { pool: id1, units: 2 }));
        assert!(db.delete_request(p, id1));
        assert!(!db.delete_request(p, id1));

        db.note_allocation(id1, p, 2);
        db.note_allocation(id1, p, 1);
        assert_eq!(db.held_by(p), vec![(id1, 3)]);
        assert!(db.delete_allocation(id1, p, 3));
        assert!(db.allocations(id1).is_empty());
        assert!(db.is_empty());
    }

    #[test]
    fn test_textual_dump() {
        let mut db = ResourceDb::new();
        let r1 = FakePool::new(0);
        let id1 = register(&mut db, "R1", &r1);
        let p = ProcessId::new();
        db.note_allocation(id1, p, 2);

        let dump = db.to_string();
        assert!(dump.contains("Resource requests:\n  (none)"));
        assert!(dump.contains(&format!("R1 ({id1}): {p} x2")));
    }
}
