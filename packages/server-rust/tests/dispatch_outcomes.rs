//! Call outcomes end to end: finalization, discard on system exceptions,
//! and a full call through an interceptor and a transaction.

mod common;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ironbean_container::{
    BeanException, ComponentDeployment, ContainerError, InterceptorData, LocalTransactionManager,
    StatelessContainer, ThreadContext, TransactionManager,
};
use ironbean_core::{TransactionAttribute, Value};
use parking_lot::Mutex;

use common::{call, config, container, id};

struct Account {
    id: u64,
}

#[derive(Default)]
struct Counters {
    pre_destroy: AtomicUsize,
    released: AtomicUsize,
}

fn account(counters: &Arc<Counters>) -> ComponentDeployment {
    let on_release = Arc::clone(counters);
    let on_destroy = Arc::clone(counters);
    let guard = InterceptorData::new("Guard").around_invoke(|_: &(), ctx| {
        if ctx.method_name() == Some("interceptor_panics") {
            panic!("guard tripped");
        }
        ctx.proceed()
    });
    ComponentDeployment::builder("Account", "AccountBean")
        .bean(move |cc| {
            let counters = Arc::clone(&on_release);
            cc.on_release(move || {
                counters.released.fetch_add(1, Ordering::SeqCst);
            });
            Ok(Account { id: cc.id() })
        })
        .method("id", 0, |a: &mut Account, _| {
            Ok(Value::Int(i64::try_from(a.id).unwrap_or(-1)))
        })
        .method("system", 0, |_: &mut Account, _| {
            Err(BeanException::new("IllegalState", "ledger corrupt"))
        })
        .method("application", 0, |_: &mut Account, _| {
            Err(BeanException::new("InsufficientFunds", "balance 0"))
        })
        .method("rollback", 0, |_: &mut Account, _| {
            Err(BeanException::new("Overdrawn", "balance -1"))
        })
        .method("interceptor_panics", 0, |_: &mut Account, _| Ok(Value::Null))
        .pre_destroy(move |_: &mut Account| {
            on_destroy.pre_destroy.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .interceptor(guard, |_| Ok(()))
        .application_exception("InsufficientFunds", false)
        .application_exception("Overdrawn", true)
        .build()
        .unwrap()
}

fn started(counters: &Arc<Counters>) -> (StatelessContainer, Arc<LocalTransactionManager>) {
    let (container, tm) = container(config(2, Duration::from_secs(1)));
    container.deploy(account(counters)).unwrap();
    container.start(&id("Account")).unwrap();
    (container, tm)
}

#[test]
fn system_failure_finalizes_exactly_once() {
    let counters = Arc::new(Counters::default());
    let (container, tm) = started(&counters);

    let err = container.invoke(call("Account", "system", vec![])).unwrap_err();
    assert!(matches!(err, ContainerError::System { .. }));
    assert!(ThreadContext::current().is_none());

    let stats = container.stats(&id("Account")).unwrap();
    assert_eq!((stats.borrowed, stats.idle, stats.discarded, stats.destroyed), (0, 0, 1, 1));
    assert_eq!(counters.pre_destroy.load(Ordering::SeqCst), 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    assert_eq!(tm.rolled_back(), 1);
    assert!(tm.current().is_none());
}

#[test]
fn application_failure_returns_instance_once() {
    let counters = Arc::new(Counters::default());
    let (container, tm) = started(&counters);

    let err = container.invoke(call("Account", "application", vec![])).unwrap_err();
    assert!(matches!(err, ContainerError::Application { rollback: false, .. }));
    assert!(err.is_application());
    let stats = container.stats(&id("Account")).unwrap();
    assert_eq!((stats.borrowed, stats.idle, stats.pooled, stats.discarded), (0, 1, 1, 0));
    assert_eq!(counters.pre_destroy.load(Ordering::SeqCst), 0);
    assert_eq!(tm.committed(), 1);

    let err = container.invoke(call("Account", "rollback", vec![])).unwrap_err();
    assert!(matches!(err, ContainerError::Application { rollback: true, .. }));
    let stats = container.stats(&id("Account")).unwrap();
    assert_eq!((stats.idle, stats.pooled, stats.discarded), (1, 2, 0));
    assert_eq!(tm.rolled_back(), 1);
}

#[test]
fn interceptor_panic_discards_instance() {
    let counters = Arc::new(Counters::default());
    let (container, _) = started(&counters);

    let err = container.invoke(call("Account", "interceptor_panics", vec![])).unwrap_err();
    match err {
        ContainerError::System { cause, .. } => assert_eq!(cause.message(), "guard tripped"),
        other => panic!("expected a system error, got {other:?}"),
    }
    let stats = container.stats(&id("Account")).unwrap();
    assert_eq!((stats.borrowed, stats.discarded), (0, 1));
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}

#[test]
fn alternating_failures_never_reuse_discarded_instances() {
    let counters = Arc::new(Counters::default());
    let (container, _) = started(&counters);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let served_by = container
            .invoke(call("Account", "id", vec![]))
            .unwrap()
            .into_value()
            .and_then(|v| v.as_i64())
            .unwrap();
        ids.push(served_by);
        container.invoke(call("Account", "system", vec![])).unwrap_err();
    }

    let mut distinct = ids.clone();
    distinct.dedup();
    assert_eq!(distinct.len(), 5, "instance reused after discard: {ids:?}");
    let stats = container.stats(&id("Account")).unwrap();
    assert_eq!((stats.created, stats.discarded, stats.idle), (5, 5, 0));
    assert_eq!(counters.pre_destroy.load(Ordering::SeqCst), 5);
}

#[test]
fn panicking_bean_factory_fails_the_call_without_leaking_capacity() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&attempts);
    let deployment = ComponentDeployment::builder("Ledger", "LedgerBean")
        .bean(move |cc| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("ledger store offline");
            }
            Ok(Account { id: cc.id() })
        })
        .method("id", 0, |a: &mut Account, _| {
            Ok(Value::Int(i64::try_from(a.id).unwrap_or(-1)))
        })
        .build()
        .unwrap();
    let (container, _) = container(config(1, Duration::from_millis(100)));
    container.deploy(deployment).unwrap();
    container.start(&id("Ledger")).unwrap();

    let err = container.invoke(call("Ledger", "id", vec![])).unwrap_err();
    assert!(matches!(err, ContainerError::Instantiation { .. }), "{err}");
    assert!(!err.is_retryable());
    assert!(ThreadContext::current().is_none());

    container.invoke(call("Ledger", "id", vec![])).unwrap();
    let stats = container.stats(&id("Ledger")).unwrap();
    assert_eq!((stats.borrowed, stats.idle, stats.created), (0, 1, 1));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn shutdown_destroys_idle_instances() {
    let counters = Arc::new(Counters::default());
    let (container, _) = started(&counters);
    container.invoke(call("Account", "id", vec![])).unwrap();
    container.shutdown();
    assert_eq!(counters.pre_destroy.load(Ordering::SeqCst), 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}

struct Processor;

struct Logger {
    log: Arc<Mutex<Vec<String>>>,
}

#[test]
fn logging_interceptor_wraps_required_transaction_call() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let instances = Arc::new(AtomicU64::new(0));
    let bean_log = Arc::clone(&log);
    let interceptor_log = Arc::clone(&log);
    let created = Arc::clone(&instances);

    let logging = InterceptorData::new("Logging").around_invoke(|l: &Logger, ctx| {
        l.log.lock().push(format!("before {}", ctx.method_name().unwrap_or_default()));
        ctx.proceed()
    });
    let deployment = ComponentDeployment::builder("Processor", "ProcessorBean")
        .bean(move |_| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Processor)
        })
        .method("process", 1, move |_: &mut Processor, args| {
            bean_log.lock().push("process".to_string());
            let text = args[0].as_str().unwrap_or_default();
            Ok(Value::from(format!("{text}-processed")))
        })
        .transaction_attribute("process", TransactionAttribute::Required)
        .interceptor(logging, move |_| {
            Ok(Logger {
                log: Arc::clone(&interceptor_log),
            })
        })
        .build()
        .unwrap();

    let (container, tm) = container(config(1, Duration::from_secs(1)));
    container.deploy(deployment).unwrap();
    container.start(&id("Processor")).unwrap();

    for round in 1..=2 {
        let response = container
            .invoke(call("Processor", "process", vec![Value::from("x")]))
            .unwrap();
        assert_eq!(response.into_value(), Some(Value::from("x-processed")));
        assert_eq!(tm.committed(), round);
    }

    assert_eq!(
        *log.lock(),
        ["before process", "process", "before process", "process"]
    );
    assert_eq!(instances.load(Ordering::SeqCst), 1);
    assert_eq!(container.stats(&id("Processor")).unwrap().created, 1);
}
