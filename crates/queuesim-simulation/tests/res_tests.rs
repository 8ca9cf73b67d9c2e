//! Resource pool integration tests
//!
//! Acquisition and hand-over of units, limit changes, usage statistics and
//! deadlock detection through the shared resource database.

mod common;

use std::rc::Rc;

use anyhow::Result;
use common::{at, me, new_log, secs};
use queuesim_core::{DeadlockKind, QueueConfig, Res, SyncError};
use queuesim_simulation::{ProcessSpec, Simulation, SimulationConfig};

#[test]
fn test_res_hands_units_to_waiting_process() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "machines", QueueConfig::fifo(), 3));
    let granted = new_log();

    let (r, c) = (pool.clone(), ctx.clone());
    let first = sim.spawn("P1", async move {
        let units = r.provide(2).await.expect("provide");
        assert_eq!(units.len(), 2);
        assert_eq!(r.avail(), 1);
        c.hold(secs(2)).await;
        r.take_back_n(2).expect("take back");
    });

    let (r, c, log) = (pool.clone(), ctx.clone(), granted.clone());
    let second = sim.spawn(ProcessSpec::new("P2").delay(secs(1)), async move {
        let units = r.provide(2).await.expect("provide");
        log.borrow_mut().push((c.now(), units));
    });

    sim.run()?;

    let granted = granted.borrow();
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].0, at(2));
    assert_eq!(pool.held_by(second), granted[0].1);
    assert!(pool.held_by(first).is_empty());
    assert_eq!(pool.avail(), 1);
    assert_eq!(pool.users(), 1);
    assert_eq!(pool.minimum(), 1);

    let db = ctx.resource_db().borrow();
    assert_eq!(db.held_by(second), vec![(pool.pool_id(), 2)]);
    assert!(db.held_by(first).is_empty());
    assert!(db.request_of(second).is_none());
    Ok(())
}

#[test]
fn test_res_detects_two_pool_deadlock() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let r1 = Rc::new(Res::new(&ctx, "R1", QueueConfig::fifo(), 1));
    let r2 = Rc::new(Res::new(&ctx, "R2", QueueConfig::fifo(), 1));

    let (first, second, c) = (r1.clone(), r2.clone(), ctx.clone());
    let a = sim.spawn("A", async move {
        first.provide(1).await.expect("provide R1");
        c.hold(secs(1)).await;
        let _ = second.provide(1).await;
    });
    let (first, second, c) = (r2.clone(), r1.clone(), ctx.clone());
    let b = sim.spawn("B", async move {
        first.provide(1).await.expect("provide R2");
        c.hold(secs(2)).await;
        let _ = second.provide(1).await;
    });

    sim.run()?;

    assert!(r1.is_deadlock_detected());
    assert!(r2.is_deadlock_detected());
    assert!(!sim.is_terminated(a));
    assert!(!sim.is_terminated(b));

    let db = ctx.resource_db().borrow();
    let report = db.last_report().expect("deadlock report");
    assert_eq!(report.kind, DeadlockKind::Total);
    assert_eq!(report.requester, b);
    assert_eq!(report.detected_at, at(2));
    assert!(report.processes.contains(&a) && report.processes.contains(&b));
    assert!(report.pools.contains(&r1.pool_id()) && report.pools.contains(&r2.pool_id()));
    assert_eq!(db.request_of(a).map(|request| request.pool), Some(r2.pool_id()));
    assert_eq!(db.request_of(b).map(|request| request.pool), Some(r1.pool_id()));
    Ok(())
}

#[test]
fn test_res_pass_by_serves_small_request_first() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "pool", QueueConfig::fifo(), 3));
    pool.set_pass_by(true);
    let grants = new_log();

    let (r, c) = (pool.clone(), ctx.clone());
    sim.spawn("holder", async move {
        let units = r.provide(2).await.expect("provide");
        c.hold(secs(2)).await;
        r.take_back(&units).expect("take back");
    });

    let (r, c, log) = (pool.clone(), ctx.clone(), grants.clone());
    let big = sim.spawn(ProcessSpec::new("big").delay(secs(1)), async move {
        r.provide(3).await.expect("provide");
        log.borrow_mut().push(("big", c.now()));
    });
    let (r, c, log) = (pool.clone(), ctx.clone(), grants.clone());
    let small = sim.spawn(ProcessSpec::new("small").delay(secs(1)), async move {
        let units = r.provide(1).await.expect("provide");
        log.borrow_mut().push(("small", c.now()));
        c.hold(secs(5)).await;
        r.take_back(&units).expect("take back");
    });

    sim.run()?;

    assert_eq!(*grants.borrow(), vec![("small", at(1)), ("big", at(6))]);
    assert!(sim.is_terminated(big));
    assert!(sim.is_terminated(small));
    assert_eq!(pool.held_by(big).len(), 3);
    assert!(pool.waiting().is_empty());
    assert!(!pool.is_deadlock_detected());
    Ok(())
}

#[test]
fn test_res_pass_by_keeps_deadlock_detection() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let r1 = Rc::new(Res::new(&ctx, "R1", QueueConfig::fifo(), 1));
    let r2 = Rc::new(Res::new(&ctx, "R2", QueueConfig::fifo(), 1));
    r1.set_pass_by(true);
    r2.set_pass_by(true);

    let (first, second, c) = (r1.clone(), r2.clone(), ctx.clone());
    let a = sim.spawn("A", async move {
        first.provide(1).await.expect("provide R1");
        c.hold(secs(1)).await;
        let _ = second.provide(1).await;
    });
    let (first, second, c) = (r2.clone(), r1.clone(), ctx.clone());
    let b = sim.spawn("B", async move {
        first.provide(1).await.expect("provide R2");
        c.hold(secs(2)).await;
        let _ = second.provide(1).await;
    });

    sim.run()?;

    assert!(r1.is_deadlock_detected());
    assert!(r2.is_deadlock_detected());
    assert!(!sim.is_terminated(a));
    assert!(!sim.is_terminated(b));

    let db = ctx.resource_db().borrow();
    let report = db.last_report().expect("deadlock report");
    assert_eq!(report.kind, DeadlockKind::Total);
    assert_eq!(report.requester, b);
    Ok(())
}

#[test]
fn test_res_single_blocked_request_is_not_a_deadlock() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "pool", QueueConfig::fifo(), 1));

    let (r, c) = (pool.clone(), ctx.clone());
    sim.spawn("holder", async move {
        r.provide(1).await.expect("provide");
        c.hold(secs(5)).await;
        r.take_back_n(1).expect("take back");
    });
    let r = pool.clone();
    let waiter = sim.spawn(ProcessSpec::new("waiter").delay(secs(1)), async move {
        r.provide(1).await.expect("provide");
    });

    sim.run_until(at(2))?;
    assert!(!pool.is_deadlock_detected());
    assert_eq!(pool.waiting(), vec![waiter]);
    assert!(ctx.resource_db().borrow().request_of(waiter).is_some());

    sim.run()?;
    assert!(sim.is_terminated(waiter));
    assert!(ctx.resource_db().borrow().last_report().is_none());
    Ok(())
}

#[test]
fn test_res_without_deadlock_check_keeps_database_empty() -> Result<()> {
    let config = SimulationConfig {
        deadlock_check: false,
        ..SimulationConfig::default().with_seed(1)
    };
    let sim = Simulation::new(config);
    let ctx = sim.context();
    let r1 = Rc::new(Res::new(&ctx, "R1", QueueConfig::fifo(), 1));
    let r2 = Rc::new(Res::new(&ctx, "R2", QueueConfig::fifo(), 1));
    assert!(!r1.deadlock_check());

    for (name, first, second, pause) in [("A", &r1, &r2, 1), ("B", &r2, &r1, 2)] {
        let (first, second, c) = (first.clone(), second.clone(), ctx.clone());
        sim.spawn(name, async move {
            first.provide(1).await.expect("provide");
            c.hold(secs(pause)).await;
            let _ = second.provide(1).await;
        });
    }

    sim.run()?;
    assert!(!r1.is_deadlock_detected());
    assert!(!r2.is_deadlock_detected());
    assert!(ctx.resource_db().borrow().is_empty());
    Ok(())
}

#[test]
fn test_res_switching_check_off_clears_pool_entries() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "pool", QueueConfig::fifo(), 2));

    let r = pool.clone();
    sim.spawn("holder", async move {
        r.provide(1).await.expect("provide");
    });
    sim.run()?;
    assert!(!ctx.resource_db().borrow().is_empty());

    pool.set_deadlock_check(false);
    assert!(!pool.deadlock_check());
    assert!(ctx.resource_db().borrow().is_empty());
    Ok(())
}

#[test]
fn test_res_change_limit_only_while_unused() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "pool", QueueConfig::fifo(), 2));

    pool.change_limit(4)?;
    assert_eq!(pool.limit(), 4);
    assert_eq!(pool.avail(), 4);
    assert!(matches!(
        pool.change_limit(0),
        Err(SyncError::InvalidQuantity { quantity: 0, .. })
    ));

    let r = pool.clone();
    sim.spawn("user", async move {
        let units = r.provide(3).await.expect("provide");
        r.take_back(&units).expect("take back");
    });
    sim.run()?;

    assert_eq!(pool.users(), 1);
    assert!(matches!(pool.change_limit(3), Err(SyncError::IllegalState { .. })));
    assert_eq!(pool.limit(), 4);

    pool.reset();
    pool.change_limit(1)?;
    assert_eq!(pool.limit(), 1);
    assert_eq!(pool.avail(), 1);
    Ok(())
}

#[test]
fn test_res_rejects_invalid_take_back_and_oversized_requests() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "pool", QueueConfig::fifo(), 2));
    let other = Rc::new(Res::new(&ctx, "other", QueueConfig::fifo(), 1));
    let errors = new_log();

    let (r, o, log) = (pool.clone(), other.clone(), errors.clone());
    sim.spawn("user", async move {
        let mut found = Vec::new();
        found.push(r.take_back_n(1).unwrap_err());
        let units = r.provide(1).await.expect("provide");
        found.push(r.provide(2).await.unwrap_err());
        found.push(r.take_back_n(2).unwrap_err());
        found.push(r.take_back_n(0).unwrap_err());
        let foreign = o.provide(1).await.expect("provide other");
        found.push(r.take_back(&foreign).unwrap_err());
        found.push(r.provide(0).await.unwrap_err());
        r.take_back(&units).expect("take back");
        log.borrow_mut().extend(found);
    });

    sim.run()?;
    let errors = errors.borrow();
    assert!(matches!(errors[0], SyncError::IllegalState { .. }));
    assert!(matches!(errors[1], SyncError::ExceedsCapacity { requested: 3, capacity: 2, .. }));
    assert!(matches!(errors[2], SyncError::IllegalState { .. }));
    assert!(matches!(errors[3], SyncError::InvalidQuantity { .. }));
    assert!(matches!(errors[4], SyncError::IllegalState { .. }));
    assert!(matches!(errors[5], SyncError::InvalidQuantity { .. }));
    assert_eq!(pool.avail(), 2);
    assert_eq!(pool.users(), 1);
    Ok(())
}

#[test]
fn test_res_zero_capacity_becomes_one() {
    let sim = Simulation::with_seed(1);
    let pool = Res::new(&sim.context(), "pool", QueueConfig::fifo(), 0);
    assert_eq!(pool.limit(), 1);
    assert_eq!(pool.avail(), 1);
}

#[test]
fn test_res_average_usage() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "pool", QueueConfig::fifo(), 2));

    let (r, c) = (pool.clone(), ctx.clone());
    sim.spawn("user", async move {
        let units = r.provide(2).await.expect("provide");
        c.hold(secs(4)).await;
        r.take_back(&units).expect("take back");
    });
    sim.run_until(at(8))?;

    let usage = pool.average_usage().expect("time has passed");
    assert!((usage - 0.5).abs() < 1e-9);
    assert!((pool.average_avail().expect("time has passed") - 1.0).abs() < 1e-9);
    assert_eq!(pool.minimum(), 0);
    Ok(())
}

#[test]
fn test_res_units_are_tracked_per_holder() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let pool = Rc::new(Res::new(&ctx, "pool", QueueConfig::fifo(), 3));
    let holders = new_log();

    for name in ["x", "y"] {
        let (r, c, log) = (pool.clone(), ctx.clone(), holders.clone());
        sim.spawn(name, async move {
            let units = r.provide(1).await.expect("provide");
            log.borrow_mut().push((me(&c), units));
        });
    }

    sim.run()?;
    let holders = holders.borrow();
    assert_eq!(holders.len(), 2);
    assert_ne!(holders[0].1, holders[1].1);
    for (process, units) in holders.iter() {
        assert_eq!(&pool.held_by(*process), units);
        assert!(units.iter().all(|unit| unit.pool == pool.pool_id()));
    }
    assert_eq!(pool.avail(), 1);
    Ok(())
}
