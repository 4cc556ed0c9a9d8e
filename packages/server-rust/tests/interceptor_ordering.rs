//! Chain order follows declaration order, whatever order interceptor
//! classes sort or hash in.

mod common;

use std::sync::Arc;
use std::time::Duration;

use ironbean_container::pool::CreationalContext;
use ironbean_container::{ComponentDeployment, InterceptorData};
use ironbean_core::Value;
use parking_lot::Mutex;
use proptest::prelude::*;

use common::{call, config, container, id};

type Log = Arc<Mutex<Vec<String>>>;

struct Tagger {
    tag: String,
    log: Log,
}

struct Target;

fn tagger(name: &str) -> InterceptorData {
    InterceptorData::new(name).around_invoke(|t: &Tagger, ctx| {
        t.log.lock().push(t.tag.clone());
        ctx.proceed()
    })
}

fn factory(
    name: &str,
    log: &Log,
) -> impl Fn(&mut CreationalContext) -> anyhow::Result<Tagger> + Send + Sync + 'static {
    let (tag, log) = (name.to_string(), Arc::clone(log));
    move |_| {
        Ok(Tagger {
            tag: tag.clone(),
            log: Arc::clone(&log),
        })
    }
}

fn names() -> impl Strategy<Value = Vec<String>> {
    Just((0..6).map(|i| format!("Interceptor{i}")).collect::<Vec<_>>()).prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chain_runs_in_declaration_order(class_level in names(), method_level in 0usize..3) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let target_log = Arc::clone(&log);

        let mut builder = ComponentDeployment::builder("Ordered", "OrderedBean")
            .bean(|_| Ok(Target))
            .method("run", 0, move |_: &mut Target, _| {
                target_log.lock().push("target".to_string());
                Ok(Value::Null)
            });
        for name in &class_level {
            builder = builder.interceptor(tagger(name), factory(name, &log));
        }
        let method_names: Vec<String> = (0..method_level).rev().map(|i| format!("M{i}")).collect();
        for name in &method_names {
            builder = builder.method_interceptor("run", tagger(name), factory(name, &log));
        }

        let (container, _) = container(config(1, Duration::from_secs(1)));
        container.deploy(builder.build().unwrap()).unwrap();
        container.start(&id("Ordered")).unwrap();

        for _ in 0..2 {
            log.lock().clear();
            container.invoke(call("Ordered", "run", vec![])).unwrap();
            let expected: Vec<String> = class_level
                .iter()
                .chain(method_names.iter())
                .cloned()
                .chain(std::iter::once("target".to_string()))
                .collect();
            prop_assert_eq!(&*log.lock(), &expected);
        }
    }
}

#[test]
fn excluded_class_interceptors_are_skipped() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let deployment = ComponentDeployment::builder("Ordered", "OrderedBean")
        .bean(|_| Ok(Target))
        .method("run", 0, |_: &mut Target, _| Ok(Value::Null))
        .method("quiet", 0, |_: &mut Target, _| Ok(Value::Null))
        .interceptor(tagger("Audit"), factory("Audit", &log))
        .method_interceptor("quiet", tagger("Local"), factory("Local", &log))
        .exclude_class_interceptors("quiet")
        .build()
        .unwrap();
    let (container, _) = container(config(1, Duration::from_secs(1)));
    container.deploy(deployment).unwrap();
    container.start(&id("Ordered")).unwrap();

    container.invoke(call("Ordered", "quiet", vec![])).unwrap();
    assert_eq!(*log.lock(), ["Local"]);
    log.lock().clear();
    container.invoke(call("Ordered", "run", vec![])).unwrap();
    assert_eq!(*log.lock(), ["Audit"]);
}
