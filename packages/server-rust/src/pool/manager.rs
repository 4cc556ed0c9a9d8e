//! Per-deployment instance pools and the instance lifecycle.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ironbean_core::OperationKind;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ContainerConfig, PoolConfig};
use crate::container::classify::exception_from_panic;
use crate::container::ContainerError;
use crate::deployment::{ComponentDeployment, DeploymentId};
use crate::interceptor::{InterceptorInstances, InterceptorStack};
use crate::pool::{CallbackExecutor, CreationalContext, Pool, PooledInstance};
use crate::thread_context::{CallContext, ThreadContext};

// ---------------------------------------------------------------------------
// PoolStats
// ---------------------------------------------------------------------------

/// Point-in-time view of one deployment's pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub borrowed: usize,
    pub created: u64,
    /// Instances handed back by completed calls, including ones the pool
    /// destroyed instead of keeping idle.
    pub pooled: u64,
    pub discarded: u64,
    pub destroyed: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    pooled: AtomicU64,
    discarded: AtomicU64,
    destroyed: AtomicU64,
}

/// Pool and counters of one deployment.
pub(crate) struct DeploymentPool {
    deployment: Arc<ComponentDeployment>,
    config: PoolConfig,
    pool: Pool<PooledInstance>,
    counters: PoolCounters,
}

impl DeploymentPool {
    fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.pool.idle_count(),
            borrowed: self.pool.borrowed_count(),
            created: self.counters.created.load(Ordering::Relaxed),
            pooled: self.counters.pooled.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// InstanceManager
// ---------------------------------------------------------------------------

/// Owns the instance pools of every deployment and builds, reuses and
/// destroys pooled instances.
pub struct InstanceManager {
    pools: DashMap<DeploymentId, Arc<DeploymentPool>>,
    config: ContainerConfig,
    executor: Arc<CallbackExecutor>,
    next_instance_id: AtomicU64,
}

impl InstanceManager {
    #[must_use]
    pub fn new(config: ContainerConfig, executor: Arc<CallbackExecutor>) -> Self {
        Self {
            pools: DashMap::new(),
            config,
            executor,
            next_instance_id: AtomicU64::new(0),
        }
    }

    /// Creates the deployment's pool and pre-warms `min_size` instances.
    /// Pre-warm failures are logged and leave the pool short.
    ///
    /// # Errors
    ///
    /// `ContainerError::DuplicateDeployment` if a pool already exists for the id.
    pub fn deploy(&self, deployment: Arc<ComponentDeployment>) -> Result<(), ContainerError> {
        let id = deployment.id().clone();
        let config = deployment
            .pool_config()
            .cloned()
            .unwrap_or_else(|| self.config.pool.clone());
        let entry = Arc::new(DeploymentPool {
            pool: Pool::new(config.max_size, config.min_size, config.strict_pooling),
            config,
            deployment,
            counters: PoolCounters::default(),
        });

        match self.pools.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ContainerError::DuplicateDeployment { id });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&entry));
            }
        }

        for _ in 0..entry.pool.min() {
            let call = CallContext::internal(Arc::clone(&entry.deployment), OperationKind::Injection);
            match self.create_instance(&call, &entry) {
                Ok(instance) => {
                    if let Some(rejected) = entry.pool.offer(instance) {
                        destroy_instance(&entry, rejected);
                    }
                }
                Err(e) => {
                    warn!(deployment = %id, error = %e, "failed to pre-warm instance");
                    break;
                }
            }
        }
        info!(
            deployment = %id,
            min = entry.pool.min(),
            max = entry.pool.max(),
            strict = entry.config.strict_pooling,
            "instance pool created"
        );
        Ok(())
    }

    /// Hands out an instance for exclusive use by `call`.
    ///
    /// Waits up to the access timeout for a permit, then reuses the most
    /// recently returned idle instance or builds a new one.
    ///
    /// # Errors
    ///
    /// `Pool(Timeout)` when no permit frees up in time, `Pool(Closed)` after
    /// undeploy, `Instantiation` when construction or post-construct fails
    /// (the permit is released), `UnknownDeployment` without a pool.
    pub fn get_instance(&self, call: &CallContext) -> Result<PooledInstance, ContainerError> {
        let entry = self.pool_for(call.deployment_id())?;
        let instance = match entry.pool.acquire(self.config.access_timeout)? {
            Some(instance) => {
                debug!(deployment = %call.deployment_id(), instance = instance.id(), "reusing pooled instance");
                instance
            }
            None => match self.create_instance(call, &entry) {
                Ok(instance) => instance,
                Err(e) => {
                    entry.pool.discard();
                    return Err(e);
                }
            },
        };
        call.set_creational_context(Some(instance.id()));
        Ok(instance)
    }

    /// Returns an instance after a successful or application-failed call.
    /// Never blocks; an instance the pool cannot keep is destroyed.
    pub fn pool_instance(&self, call: &CallContext, instance: PooledInstance) {
        let Some(entry) = self.owning_pool(call) else {
            destroy_detached(call.deployment(), instance);
            return;
        };
        let id = instance.id();
        entry.counters.pooled.fetch_add(1, Ordering::Relaxed);
        match entry.pool.release(instance) {
            None => {
                debug!(deployment = %call.deployment_id(), instance = id, "instance returned to pool");
            }
            Some(rejected) => {
                debug!(deployment = %call.deployment_id(), instance = id, "pool cannot keep instance, destroying");
                destroy_instance(&entry, rejected);
            }
        }
    }

    /// Destroys an instance that must not be reused and releases its permit.
    pub fn discard_instance(&self, call: &CallContext, instance: PooledInstance) {
        let Some(entry) = self.owning_pool(call) else {
            warn!(deployment = %call.deployment_id(), instance = instance.id(), "discarding instance of undeployed pool");
            destroy_detached(call.deployment(), instance);
            return;
        };
        warn!(deployment = %call.deployment_id(), instance = instance.id(), "discarding instance");
        entry.counters.discarded.fetch_add(1, Ordering::Relaxed);
        destroy_instance(&entry, instance);
        entry.pool.discard();
    }

    /// Closes the deployment's pool, destroys idle instances on the callback
    /// executor and waits up to the close timeout for borrowed instances.
    /// Instances returned after close are destroyed by their caller.
    ///
    /// # Errors
    ///
    /// `UnknownDeployment` if the deployment has no pool.
    pub fn undeploy(&self, id: &DeploymentId) -> Result<(), ContainerError> {
        let entry = self.pool_for(id)?;
        let idle = entry.pool.close();
        let idle_count = idle.len();
        for instance in idle {
            let entry = Arc::clone(&entry);
            self.executor.execute(move || destroy_instance(&entry, instance));
        }
        if !entry.pool.wait_for_borrowed(self.config.close_timeout) {
            warn!(
                deployment = %id,
                borrowed = entry.pool.borrowed_count(),
                timeout = ?self.config.close_timeout,
                "borrowed instances not returned before close timeout"
            );
        }
        self.pools.remove(id);
        info!(deployment = %id, destroyed_idle = idle_count, "instance pool closed");
        Ok(())
    }

    /// Evicts instances idle for longer than their pool's idle timeout,
    /// keeping at least `min_size` per pool. Returns how many were evicted.
    pub fn sweep_idle(&self) -> usize {
        let entries: Vec<Arc<DeploymentPool>> =
            self.pools.iter().map(|e| Arc::clone(e.value())).collect();
        let mut evicted_total = 0;
        for entry in entries {
            if entry.config.idle_timeout.is_zero() {
                continue;
            }
            let evicted = entry.pool.evict_idle(entry.config.idle_timeout);
            if evicted.is_empty() {
                continue;
            }
            debug!(deployment = %entry.deployment.id(), count = evicted.len(), "evicting idle instances");
            evicted_total += evicted.len();
            for instance in evicted {
                let entry = Arc::clone(&entry);
                self.executor.execute(move || destroy_instance(&entry, instance));
            }
        }
        evicted_total
    }

    #[must_use]
    pub fn stats(&self, id: &DeploymentId) -> Option<PoolStats> {
        self.pools.get(id).map(|entry| entry.stats())
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<CallbackExecutor> {
        &self.executor
    }

    /// The pool the call's instance was borrowed from, unless it has been
    /// undeployed (and possibly replaced) since.
    fn owning_pool(&self, call: &CallContext) -> Option<Arc<DeploymentPool>> {
        self.pools
            .get(call.deployment_id())
            .map(|entry| Arc::clone(&entry))
            .filter(|entry| Arc::ptr_eq(&entry.deployment, call.deployment()))
    }

    fn pool_for(&self, id: &DeploymentId) -> Result<Arc<DeploymentPool>, ContainerError> {
        self.pools
            .get(id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| ContainerError::UnknownDeployment { id: id.clone() })
    }

    /// Builds the bean and its interceptors (`Injection`), then runs the
    /// post-construct chain (`PostConstruct`). The call's operation is
    /// restored afterwards.
    fn create_instance(
        &self,
        call: &CallContext,
        entry: &DeploymentPool,
    ) -> Result<PooledInstance, ContainerError> {
        let previous = call.set_current_operation(OperationKind::Injection);
        let result = self.construct(call, &entry.deployment);
        call.set_current_operation(previous);
        let instance = result?;
        entry.counters.created.fetch_add(1, Ordering::Relaxed);
        debug!(deployment = %entry.deployment.id(), instance = instance.id(), "created instance");
        Ok(instance)
    }

    fn construct(
        &self,
        call: &CallContext,
        deployment: &ComponentDeployment,
    ) -> Result<PooledInstance, ContainerError> {
        let instantiation = |source: anyhow::Error| ContainerError::Instantiation {
            bean_class: deployment.bean_class().to_string(),
            source,
        };

        let id = self.next_instance_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut cc = CreationalContext::new(id);
        let bean = match guard_factory(|| (deployment.bean_factory())(&mut cc)) {
            Ok(bean) => bean,
            Err(e) => {
                cc.release();
                return Err(instantiation(e));
            }
        };

        let mut interceptors = InterceptorInstances::new();
        for (class, factory) in deployment.interceptor_factories() {
            match guard_factory(|| factory(&mut cc)) {
                Ok(instance) => {
                    interceptors.insert(class.clone(), instance);
                }
                Err(e) => {
                    cc.release();
                    return Err(instantiation(e.context(format!("interceptor {class}"))));
                }
            }
        }

        let mut instance = PooledInstance::new(bean, interceptors, cc);
        call.set_current_operation(OperationKind::PostConstruct);
        if let Err(e) = run_lifecycle(Some(call), deployment, &mut instance, OperationKind::PostConstruct) {
            instance.into_creational_context().release();
            return Err(instantiation(anyhow::Error::new(e).context("post-construct failed")));
        }
        Ok(instance)
    }
}

impl std::fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("pools", &self.pools.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Runs a bean or interceptor factory, turning a panic into an error.
fn guard_factory<T>(factory: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    catch_unwind(AssertUnwindSafe(factory)).unwrap_or_else(|payload| {
        Err(anyhow::Error::new(exception_from_panic(payload.as_ref())).context("factory panicked"))
    })
}

// ---------------------------------------------------------------------------
// Lifecycle chains
// ---------------------------------------------------------------------------

/// Runs the lifecycle interceptor chain for `operation` with the bean's
/// callback as target. Panics become system exceptions.
fn run_lifecycle(
    call: Option<&CallContext>,
    deployment: &ComponentDeployment,
    instance: &mut PooledInstance,
    operation: OperationKind,
) -> Result<(), ContainerError> {
    let target = match operation {
        OperationKind::PostConstruct => deployment.post_construct(),
        OperationKind::PreDestroy => deployment.pre_destroy(),
        _ => None,
    };
    let (bean, interceptors) = instance.parts_mut();
    let stack = InterceptorStack::new(
        bean,
        target,
        operation,
        deployment.lifecycle_interceptors(),
        interceptors,
    )?;
    if stack.is_empty() && target.is_none() {
        return Ok(());
    }
    match catch_unwind(AssertUnwindSafe(|| stack.invoke(call, Vec::new()))) {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(cause)) => Err(ContainerError::System {
            cause,
            caller_transaction_rolled_back: false,
        }),
        Err(payload) => Err(ContainerError::System {
            cause: exception_from_panic(payload.as_ref()),
            caller_transaction_rolled_back: false,
        }),
    }
}

/// Runs pre-destroy callbacks and releases the creational context.
/// Failures are logged and swallowed.
fn destroy_instance(entry: &DeploymentPool, instance: PooledInstance) {
    destroy_detached(&entry.deployment, instance);
    entry.counters.destroyed.fetch_add(1, Ordering::Relaxed);
}

fn destroy_detached(deployment: &Arc<ComponentDeployment>, mut instance: PooledInstance) {
    let id = instance.id();
    let call = Rc::new(CallContext::internal(Arc::clone(deployment), OperationKind::PreDestroy));
    call.set_creational_context(Some(id));
    {
        let _entered = ThreadContext::enter(Rc::clone(&call));
        if let Err(e) = run_lifecycle(Some(&*call), deployment, &mut instance, OperationKind::PreDestroy) {
            error!(deployment = %deployment.id(), instance = id, error = %e, "pre-destroy failed");
        }
    }
    let cc = instance.into_creational_context();
    if catch_unwind(AssertUnwindSafe(|| cc.release())).is_err() {
        error!(deployment = %deployment.id(), instance = id, "creational context cleanup panicked");
    }
    debug!(deployment = %deployment.id(), instance = id, "destroyed instance");
}
