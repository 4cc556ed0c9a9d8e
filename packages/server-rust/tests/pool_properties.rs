//! Pool behavior under concurrency: exclusivity, conservation and the
//! acquisition timeout boundary.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use ironbean_container::pool::PoolError;
use ironbean_container::{BeanException, ComponentDeployment, ContainerError};
use ironbean_core::Value;
use proptest::prelude::*;

use common::{call, config, container, id};

struct Worker {
    busy: AtomicBool,
}

#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    overlaps: AtomicUsize,
}

fn worker_deployment(probe: &Arc<Probe>) -> ComponentDeployment {
    let probe = Arc::clone(probe);
    ComponentDeployment::builder("Worker", "WorkerBean")
        .bean(|_| {
            Ok(Worker {
                busy: AtomicBool::new(false),
            })
        })
        .method("work", 0, move |w: &mut Worker, _| {
            if w.busy.swap(true, Ordering::SeqCst) {
                probe.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
            probe.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            probe.active.fetch_sub(1, Ordering::SeqCst);
            w.busy.store(false, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .method("ok", 0, |_: &mut Worker, _| Ok(Value::Null))
        .method("app", 0, |_: &mut Worker, _| Err(BeanException::new("Rejected", "no")))
        .method("sys", 0, |_: &mut Worker, _| Err(BeanException::new("NullPointer", "boom")))
        .application_exception("Rejected", false)
        .build()
        .unwrap()
}

#[test]
fn instances_are_never_shared_between_concurrent_calls() {
    let max_size = 3;
    let (container, _) = container(config(max_size, Duration::from_secs(5)));
    let probe = Arc::new(Probe::default());
    container.deploy(worker_deployment(&probe)).unwrap();
    container.start(&id("Worker")).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..25 {
                    container.invoke(call("Worker", "work", vec![])).unwrap();
                }
            });
        }
    });

    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
    assert!(probe.peak.load(Ordering::SeqCst) <= max_size);
    let stats = container.stats(&id("Worker")).unwrap();
    assert_eq!(stats.borrowed, 0);
    assert!(stats.created <= max_size as u64);
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Ok,
    App,
    Sys,
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![Just(Outcome::Ok), Just(Outcome::App), Just(Outcome::Sys)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pool_conserves_instances(
        plans in prop::collection::vec(prop::collection::vec(outcome(), 1..20), 1..4),
        max_size in 1usize..4,
        strict in any::<bool>(),
    ) {
        let mut config = config(max_size, Duration::from_secs(5));
        config.pool.strict_pooling = strict;
        let (container, _) = container(config);
        let probe = Arc::new(Probe::default());
        container.deploy(worker_deployment(&probe)).unwrap();
        container.start(&id("Worker")).unwrap();

        std::thread::scope(|scope| {
            for plan in &plans {
                let container = &container;
                scope.spawn(move || {
                    for step in plan {
                        let method = match step {
                            Outcome::Ok => "ok",
                            Outcome::App => "app",
                            Outcome::Sys => "sys",
                        };
                        let _ = container.invoke(call("Worker", method, vec![]));
                    }
                });
            }
        });

        let steps = plans.iter().flatten();
        let system = steps.clone().filter(|s| matches!(s, Outcome::Sys)).count() as u64;
        let returned = steps.filter(|s| !matches!(s, Outcome::Sys)).count() as u64;

        let stats = container.stats(&id("Worker")).unwrap();
        prop_assert_eq!(stats.borrowed, 0);
        prop_assert_eq!(stats.discarded, system);
        prop_assert_eq!(stats.pooled, returned);
        prop_assert_eq!(stats.created, stats.idle as u64 + stats.destroyed);
        prop_assert!(stats.idle <= max_size);
    }
}

#[test]
fn acquisition_times_out_at_the_boundary() {
    let (container, _) = container(config(1, Duration::from_millis(100)));
    let entered = Arc::new(Barrier::new(2));
    let gate = Arc::clone(&entered);
    let deployment = ComponentDeployment::builder("Slow", "SlowBean")
        .bean(|_| Ok(()))
        .method("hold", 0, move |_: &mut (), _| {
            gate.wait();
            std::thread::sleep(Duration::from_millis(400));
            Ok(Value::Null)
        })
        .method("quick", 0, |_: &mut (), _| Ok(Value::from("done")))
        .build()
        .unwrap();
    container.deploy(deployment).unwrap();
    container.start(&id("Slow")).unwrap();

    std::thread::scope(|scope| {
        let holder = scope.spawn(|| container.invoke(call("Slow", "hold", vec![])));
        entered.wait();

        let started = Instant::now();
        let err = container.invoke(call("Slow", "quick", vec![])).unwrap_err();
        let waited = started.elapsed();
        assert!(err.is_retryable());
        assert!(matches!(err, ContainerError::Pool(PoolError::Timeout { .. })));
        assert!(waited >= Duration::from_millis(100), "gave up after {waited:?}");
        assert!(waited < Duration::from_millis(400), "waited {waited:?}");

        holder.join().unwrap().unwrap();
    });

    let response = container.invoke(call("Slow", "quick", vec![])).unwrap();
    assert_eq!(response.into_value(), Some(Value::from("done")));
    assert_eq!(container.stats(&id("Slow")).unwrap().created, 1);
}
