//! Master/slave rendezvous integration tests

mod common;

use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use common::{at, new_log, secs};
use queuesim_core::{QueueConfig, SyncError, WaitQueue};
use queuesim_simulation::{ProcessSpec, Simulation};

fn rendezvous(sim: &Simulation) -> Rc<WaitQueue> {
    Rc::new(WaitQueue::new(&sim.context(), "dock", QueueConfig::fifo(), QueueConfig::fifo()))
}

#[test]
fn test_master_cooperates_with_waiting_slave() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let queue = rendezvous(&sim);
    let events = new_log();

    let (q, c, log) = (queue.clone(), ctx.clone(), events.clone());
    let slave = sim.spawn("S", async move {
        q.wait_on_coop().await.expect("wait on coop");
        log.borrow_mut().push(("slave resumed", c.now()));
    });

    let (q, c, log) = (queue.clone(), ctx.clone(), events.clone());
    let master = sim.spawn(ProcessSpec::new("M").delay(secs(1)), async move {
        let (inner_c, inner_log) = (c.clone(), log.clone());
        q.cooperate(move |_, _| async move {
            inner_log.borrow_mut().push(("cooperation", inner_c.now()));
            inner_c.hold(secs(2)).await;
        })
        .await
        .expect("cooperate");
        log.borrow_mut().push(("master done", c.now()));
    });

    sim.run()?;

    assert_eq!(
        *events.borrow(),
        vec![("cooperation", at(1)), ("master done", at(3)), ("slave resumed", at(3))]
    );
    assert!(sim.is_terminated(master));
    assert!(sim.is_terminated(slave));
    assert_eq!(queue.cooperations_completed(), 1);
    assert_eq!(queue.average_coop_time(), Some(Duration::from_secs(2)));
    assert!(queue.waiting_slaves().is_empty());
    assert!(queue.waiting_masters().is_empty());
    Ok(())
}

#[test]
fn test_master_waits_for_late_slave() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let queue = rendezvous(&sim);
    let pairs = new_log();

    let (q, c, log) = (queue.clone(), ctx.clone(), pairs.clone());
    let master = sim.spawn("M", async move {
        q.cooperate(move |m, s| async move {
            log.borrow_mut().push((m, s, c.now()));
        })
        .await
        .expect("cooperate");
    });

    sim.run_until(at(1))?;
    assert_eq!(queue.waiting_masters(), vec![master]);
    assert_eq!(queue.avail_master(|p| p == master), Some(master));

    let q = queue.clone();
    let slave = sim.spawn(ProcessSpec::new("S").delay(secs(1)), async move {
        q.wait_on_coop().await.expect("wait on coop");
    });

    sim.run()?;
    assert_eq!(*pairs.borrow(), vec![(master, slave, at(2))]);
    assert!(sim.is_terminated(slave));
    assert_eq!(queue.average_coop_time(), Some(Duration::ZERO));
    assert_eq!(queue.master_snapshot().max_wait_secs, 2.0);
    Ok(())
}

#[test]
fn test_masters_are_served_in_queue_order() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let ctx = sim.context();
    let queue = rendezvous(&sim);
    let pairs = new_log();

    let mut masters = Vec::new();
    for name in ["M1", "M2"] {
        let (q, log) = (queue.clone(), pairs.clone());
        masters.push(sim.spawn(name, async move {
            q.cooperate(move |m, s| async move {
                log.borrow_mut().push((m, s));
            })
            .await
            .expect("cooperate");
        }));
    }

    let mut slaves = Vec::new();
    for (name, start) in [("S1", 1), ("S2", 2)] {
        let q = queue.clone();
        slaves.push(sim.spawn(ProcessSpec::new(name).delay(secs(start)), async move {
            q.wait_on_coop().await.expect("wait on coop");
        }));
    }

    sim.run()?;
    assert_eq!(*pairs.borrow(), vec![(masters[0], slaves[0]), (masters[1], slaves[1])]);
    assert_eq!(queue.cooperations_completed(), 2);
    assert_eq!(ctx.now(), at(2));
    Ok(())
}

#[test]
fn test_conditional_cooperation_picks_matching_slave() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let queue = rendezvous(&sim);
    let pairs = new_log();

    let mut slaves = Vec::new();
    for name in ["S1", "S2"] {
        let q = queue.clone();
        slaves.push(sim.spawn(name, async move {
            q.wait_on_coop().await.expect("wait on coop");
        }));
    }
    let wanted = slaves[1];
    assert_eq!(queue.avail_slave(|p| p == wanted), None);

    let (q, log) = (queue.clone(), pairs.clone());
    sim.spawn(ProcessSpec::new("M").delay(secs(1)), async move {
        q.cooperate_if(
            |p| p == wanted,
            move |_, s| async move {
                log.borrow_mut().push(s);
            },
        )
        .await
        .expect("cooperate");
    });

    sim.run()?;
    assert_eq!(*pairs.borrow(), vec![wanted]);
    assert!(sim.is_terminated(wanted));
    assert!(!sim.is_terminated(slaves[0]));
    assert_eq!(queue.waiting_slaves(), vec![slaves[0]]);
    assert_eq!(queue.avail_slave(|_| true), Some(slaves[0]));
    Ok(())
}

#[test]
fn test_cancel_coop_removes_slave_and_master() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let queue = rendezvous(&sim);
    let outcomes = new_log();

    let (q, log) = (queue.clone(), outcomes.clone());
    let slave = sim.spawn("S", async move {
        let result = q.wait_on_coop().await;
        log.borrow_mut().push(("slave", result));
    });

    let q = queue.clone();
    sim.spawn(ProcessSpec::new("slave-canceller").delay(secs(1)), async move {
        assert!(q.cancel_coop(slave));
        assert!(!q.cancel_coop(slave));
    });

    let (q, log) = (queue.clone(), outcomes.clone());
    let master = sim.spawn(ProcessSpec::new("M").delay(secs(2)), async move {
        let result = q.cooperate(|_, _| async {}).await;
        log.borrow_mut().push(("master", result));
    });

    let q = queue.clone();
    sim.spawn(ProcessSpec::new("master-canceller").delay(secs(3)), async move {
        assert!(q.cancel_coop(master));
    });

    sim.run()?;

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, "slave");
    assert!(outcomes[0].1.as_ref().is_err_and(SyncError::is_cancelled));
    assert_eq!(outcomes[1].0, "master");
    assert!(outcomes[1].1.as_ref().is_err_and(SyncError::is_cancelled));
    assert_eq!(queue.slaves_removed(), 1);
    assert_eq!(queue.masters_removed(), 1);
    assert_eq!(queue.cooperations_completed(), 0);
    assert!(queue.waiting_masters().is_empty());
    assert!(queue.waiting_slaves().is_empty());
    assert!(sim.is_terminated(master));
    Ok(())
}

#[test]
fn test_full_slave_queue_refuses() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let queue = Rc::new(WaitQueue::new(
        &sim.context(),
        "dock",
        QueueConfig::fifo(),
        QueueConfig::fifo().with_capacity(1),
    ));
    let errors = new_log();

    for (name, start) in [("S1", 0), ("S2", 1)] {
        let (q, log) = (queue.clone(), errors.clone());
        sim.spawn(ProcessSpec::new(name).delay(secs(start)), async move {
            if let Err(err) = q.wait_on_coop().await {
                log.borrow_mut().push(err);
            }
        });
    }

    sim.run()?;
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].is_refused());
    assert_eq!(queue.slave_refused(), 1);
    assert_eq!(queue.master_refused(), 0);
    assert_eq!(queue.waiting_slaves().len(), 1);
    assert_eq!(queue.slave_snapshot().name, "dock.slaves");

    queue.reset();
    assert_eq!(queue.slave_refused(), 0);
    Ok(())
}

#[test]
fn test_double_slave_registration_is_rejected() -> Result<()> {
    let sim = Simulation::with_seed(1);
    let first = rendezvous(&sim);
    let second = Rc::new(WaitQueue::new(&sim.context(), "quay", QueueConfig::fifo(), QueueConfig::fifo()));
    let errors = new_log();

    let (q1, q2, log) = (first.clone(), second.clone(), errors.clone());
    sim.spawn("S", async move {
        futures::join!(
            async {
                let _ = q1.wait_on_coop().await;
            },
            async {
                if let Err(err) = q2.wait_on_coop().await {
                    log.borrow_mut().push(err);
                }
            }
        );
    });

    sim.run()?;
    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        SyncError::IllegalState { operation: "wait_on_coop", .. }
    ));
    assert_eq!(first.waiting_slaves().len(), 1);
    assert!(second.waiting_slaves().is_empty());
    assert_eq!(second.slave_refused(), 0);
    Ok(())
}
