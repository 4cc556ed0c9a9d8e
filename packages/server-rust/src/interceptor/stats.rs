//! Built-in per-method invocation statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use ironbean_core::Value;
use serde::Serialize;

use crate::container::BeanException;
use crate::deployment::DeploymentId;
use crate::interceptor::{InterceptorData, InvocationContext};

// ---------------------------------------------------------------------------
// InvocationStats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MethodCounters {
    invocations: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

/// Point-in-time statistics of one business method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MethodStats {
    pub invocations: u64,
    pub failures: u64,
    pub total_micros: u64,
    pub max_micros: u64,
}

impl MethodStats {
    #[must_use]
    pub fn mean_micros(&self) -> u64 {
        self.total_micros.checked_div(self.invocations).unwrap_or(0)
    }
}

/// Counters shared by every statistics interceptor of a container.
#[derive(Debug, Default)]
pub struct InvocationStats {
    methods: DashMap<(DeploymentId, String), MethodCounters>,
}

impl InvocationStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, deployment: &DeploymentId, method: &str, micros: u64, failed: bool) {
        let entry = self
            .methods
            .entry((deployment.clone(), method.to_string()))
            .or_default();
        entry.invocations.fetch_add(1, Ordering::Relaxed);
        if failed {
            entry.failures.fetch_add(1, Ordering::Relaxed);
        }
        entry.total_micros.fetch_add(micros, Ordering::Relaxed);
        entry.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Statistics of every method of `deployment` that has been called.
    #[must_use]
    pub fn snapshot(&self, deployment: &DeploymentId) -> BTreeMap<String, MethodStats> {
        self.methods
            .iter()
            .filter(|entry| &entry.key().0 == deployment)
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().1.clone(),
                    MethodStats {
                        invocations: c.invocations.load(Ordering::Relaxed),
                        failures: c.failures.load(Ordering::Relaxed),
                        total_micros: c.total_micros.load(Ordering::Relaxed),
                        max_micros: c.max_micros.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    /// Drops the counters of an undeployed component.
    pub fn remove(&self, deployment: &DeploymentId) {
        self.methods.retain(|(id, _), _| id != deployment);
    }
}

// ---------------------------------------------------------------------------
// StatsInterceptor
// ---------------------------------------------------------------------------

/// System interceptor that times every business and timeout call.
#[derive(Debug)]
pub struct StatsInterceptor {
    deployment: DeploymentId,
    stats: Arc<InvocationStats>,
}

impl StatsInterceptor {
    pub const CLASS: &'static str = "ironbean.StatsInterceptor";

    #[must_use]
    pub fn new(deployment: DeploymentId, stats: Arc<InvocationStats>) -> Self {
        Self { deployment, stats }
    }

    /// Interceptor metadata registering [`Self::intercept`] for business and
    /// timeout calls.
    #[must_use]
    pub fn data() -> InterceptorData {
        InterceptorData::new(Self::CLASS)
            .around_invoke(|s: &StatsInterceptor, ctx| s.intercept(ctx))
            .around_timeout(|s: &StatsInterceptor, ctx| s.intercept(ctx))
    }

    /// Proceeds and records the elapsed time and outcome.
    ///
    /// # Errors
    ///
    /// Propagates whatever the rest of the chain raises.
    pub fn intercept(&self, ctx: &mut InvocationContext<'_>) -> Result<Value, BeanException> {
        let start = Instant::now();
        let result = ctx.proceed();
        let elapsed = start.elapsed();
        let method = ctx.method_name().unwrap_or("<none>").to_string();
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

        self.stats
            .record(&self.deployment, &method, micros, result.is_err());

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            "ironbean_invocations_total",
            "deployment" => self.deployment.to_string(),
            "method" => method.clone(),
            "outcome" => outcome,
        )
        .increment(1);
        metrics::histogram!(
            "ironbean_invocation_duration_seconds",
            "deployment" => self.deployment.to_string(),
            "method" => method,
        )
        .record(elapsed.as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ironbean_core::OperationKind;

    use super::*;
    use crate::deployment::BeanMethod;
    use crate::interceptor::{InterceptorInstance, InterceptorInstances, InterceptorStack};

    struct Bean;

    #[test]
    fn records_success_and_failure() {
        let stats = Arc::new(InvocationStats::new());
        let id = DeploymentId::from("Calc");
        let data = vec![Arc::new(StatsInterceptor::data())];
        let instances: InterceptorInstances = HashMap::from([(
            StatsInterceptor::CLASS.to_string(),
            InterceptorInstance::direct(StatsInterceptor::new(id.clone(), Arc::clone(&stats))),
        )]);
        let div = BeanMethod::typed("div", 2, |_: &mut Bean, args| {
            let (a, b) = (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0));
            a.checked_div(b)
                .map(Value::Int)
                .ok_or_else(|| BeanException::new("ArithmeticException", "divide by zero"))
        });

        for (a, b) in [(6, 3), (1, 0), (8, 2)] {
            let mut bean = Bean;
            let stack = InterceptorStack::new(&mut bean, Some(&div), OperationKind::Business, &data, &instances)
                .unwrap();
            let _ = stack.invoke(None, vec![Value::Int(a), Value::Int(b)]);
        }

        let snapshot = stats.snapshot(&id);
        let div_stats = snapshot["div"];
        assert_eq!(div_stats.invocations, 3);
        assert_eq!(div_stats.failures, 1);
        assert!(div_stats.max_micros >= div_stats.mean_micros());
    }

    #[test]
    fn remove_drops_only_that_deployment() {
        let stats = InvocationStats::new();
        let a = DeploymentId::from("A");
        let b = DeploymentId::from("B");
        stats.record(&a, "m", 10, false);
        stats.record(&b, "m", 10, false);
        stats.remove(&a);
        assert!(stats.snapshot(&a).is_empty());
        assert_eq!(stats.snapshot(&b)["m"].invocations, 1);
    }

    #[test]
    fn mean_of_empty_stats_is_zero() {
        assert_eq!(MethodStats::default().mean_micros(), 0);
    }
}
