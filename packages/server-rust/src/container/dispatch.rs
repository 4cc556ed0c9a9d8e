//! The stateless container: deployment management and per-call dispatch.
//!
//! Every call runs synchronously on the caller's thread:
//!
//! ```text
//! ENTERED -> AUTHORIZED -> INSTANCE_ACQUIRED -> INVOKING -> COMPLETED | FAILED -> FINALIZED
//! ```
//!
//! Finalization (returning or discarding the instance) happens exactly once,
//! in the drop of an [`InstanceLease`], on every exit path including unwinds.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use ironbean_core::{ExceptionType, InterfaceType, Method, MethodKind, OperationKind, Value};
use parking_lot::Mutex;
use tracing::{debug, info, info_span, warn};

use crate::config::ContainerConfig;
use crate::container::classify::{classify_exception, exception_from_panic};
use crate::container::lifecycle::{ContainerState, LifecycleController};
use crate::container::registry::{DeploymentRegistry, DeploymentState};
use crate::container::{
    CallArgs, ContainerError, InvocationRequest, InvocationResponse, ProxyInfo,
};
use crate::deployment::{ComponentDeployment, DeploymentId, InterceptorFactory};
use crate::interceptor::{
    InterceptorInstance, InterceptorStack, InvocationStats, MethodStats, StatsInterceptor,
};
use crate::pool::{CallbackExecutor, InstanceManager, PoolStats, PoolSweeper, PooledInstance};
use crate::thread_context::{CallContext, ThreadContext};
use crate::traits::{SecurityService, TransactionManager};
use crate::tx::TransactionPolicy;

// ---------------------------------------------------------------------------
// StatelessContainer
// ---------------------------------------------------------------------------

/// Hosts stateless component deployments and dispatches calls to pooled
/// instances through their interceptor chains.
pub struct StatelessContainer {
    container_id: String,
    config: ContainerConfig,
    registry: DeploymentRegistry,
    instances: Arc<InstanceManager>,
    sweeper: Mutex<Option<PoolSweeper>>,
    lifecycle: LifecycleController,
    security: Arc<dyn SecurityService>,
    tx_manager: Arc<dyn TransactionManager>,
    stats: Arc<InvocationStats>,
}

impl StatelessContainer {
    /// Creates a container ready to accept deployments and calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the callback and
    /// sweeper threads cannot be spawned.
    pub fn new(
        container_id: impl Into<String>,
        config: ContainerConfig,
        security: Arc<dyn SecurityService>,
        tx_manager: Arc<dyn TransactionManager>,
    ) -> anyhow::Result<Self> {
        let container_id = container_id.into();
        config.validate().context("invalid container configuration")?;

        let executor = Arc::new(CallbackExecutor::new(config.callback_threads)?);
        let instances = Arc::new(InstanceManager::new(config.clone(), executor));
        let sweeper = if config.pool.sweep_interval.is_zero() {
            None
        } else {
            Some(PoolSweeper::start(
                Arc::downgrade(&instances),
                config.pool.sweep_interval,
            )?)
        };

        let lifecycle = LifecycleController::new();
        lifecycle.set_ready();
        info!(
            container = %container_id,
            access_timeout = ?config.access_timeout,
            callback_threads = config.callback_threads,
            stats = config.stats_enabled,
            "container ready"
        );

        Ok(Self {
            container_id,
            config,
            registry: DeploymentRegistry::new(),
            instances,
            sweeper: Mutex::new(sweeper),
            lifecycle,
            security,
            tx_manager,
            stats: Arc::new(InvocationStats::new()),
        })
    }

    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ContainerState {
        self.lifecycle.state()
    }

    // -- deployment management -----------------------------------------------

    /// Registers `deployment` and creates its instance pool. The deployment
    /// accepts calls once [`start`](Self::start)ed.
    ///
    /// With statistics enabled, a [`StatsInterceptor`] is installed ahead of
    /// every other interceptor.
    ///
    /// # Errors
    ///
    /// `DuplicateDeployment` if the id is taken, `ShuttingDown` while draining.
    pub fn deploy(&self, deployment: ComponentDeployment) -> Result<(), ContainerError> {
        if self.lifecycle.state() != ContainerState::Ready {
            return Err(ContainerError::ShuttingDown);
        }
        let deployment = if self.config.stats_enabled {
            let id = deployment.id().clone();
            let stats = Arc::clone(&self.stats);
            let factory: InterceptorFactory = Arc::new(move |_| {
                Ok(InterceptorInstance::direct(StatsInterceptor::new(
                    id.clone(),
                    Arc::clone(&stats),
                )))
            });
            deployment.with_first_system_interceptor(StatsInterceptor::data(), factory)
        } else {
            deployment
        };

        let deployment = Arc::new(deployment);
        let id = deployment.id().clone();
        self.registry.register(Arc::clone(&deployment))?;
        if let Err(e) = self.instances.deploy(deployment) {
            self.registry.remove(&id);
            return Err(e);
        }
        info!(container = %self.container_id, deployment = %id, "deployed");
        Ok(())
    }

    /// Opens the deployment for calls.
    ///
    /// # Errors
    ///
    /// `UnknownDeployment` if nothing is registered under `id`.
    pub fn start(&self, id: &DeploymentId) -> Result<(), ContainerError> {
        self.component_state(id, DeploymentState::Started)?;
        info!(deployment = %id, "started");
        Ok(())
    }

    /// Rejects further calls to the deployment. Its pool stays intact.
    ///
    /// # Errors
    ///
    /// `UnknownDeployment` if nothing is registered under `id`.
    pub fn stop(&self, id: &DeploymentId) -> Result<(), ContainerError> {
        self.component_state(id, DeploymentState::Stopped)?;
        info!(deployment = %id, "stopped");
        Ok(())
    }

    /// Stops the deployment, destroys its pooled instances and forgets it.
    ///
    /// # Errors
    ///
    /// `UnknownDeployment` if nothing is registered under `id`.
    pub fn undeploy(&self, id: &DeploymentId) -> Result<(), ContainerError> {
        let component = self
            .registry
            .remove(id)
            .ok_or_else(|| ContainerError::UnknownDeployment { id: id.clone() })?;
        component.set_state(DeploymentState::Stopped);
        self.instances.undeploy(id)?;
        self.stats.remove(id);
        info!(container = %self.container_id, deployment = %id, "undeployed");
        Ok(())
    }

    #[must_use]
    pub fn deployment(&self, id: &DeploymentId) -> Option<Arc<ComponentDeployment>> {
        self.registry
            .get(id)
            .map(|component| Arc::clone(component.deployment()))
    }

    /// Registered deployments in deployment order.
    #[must_use]
    pub fn deployments(&self) -> Vec<Arc<ComponentDeployment>> {
        self.registry
            .ids()
            .iter()
            .filter_map(|id| self.deployment(id))
            .collect()
    }

    #[must_use]
    pub fn deployment_state(&self, id: &DeploymentId) -> Option<DeploymentState> {
        self.registry.get(id).map(|component| component.state())
    }

    /// Pool statistics of a deployment.
    #[must_use]
    pub fn stats(&self, id: &DeploymentId) -> Option<PoolStats> {
        self.instances.stats(id)
    }

    /// Per-method statistics gathered by the statistics interceptor. Empty
    /// when statistics are disabled.
    #[must_use]
    pub fn invocation_stats(&self, id: &DeploymentId) -> BTreeMap<String, MethodStats> {
        self.stats.snapshot(id)
    }

    /// Evicts idle instances now instead of waiting for the sweeper.
    pub fn sweep_idle(&self) -> usize {
        self.instances.sweep_idle()
    }

    /// Drains in-flight calls (up to the close timeout), undeploys every
    /// deployment in reverse deployment order and stops the background
    /// threads. Calls arriving meanwhile fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        info!(container = %self.container_id, "shutting down");
        self.lifecycle.begin_drain();
        if !self.lifecycle.wait_for_drain(self.config.close_timeout) {
            warn!(
                container = %self.container_id,
                in_flight = self.lifecycle.in_flight_count(),
                "in-flight calls did not drain before close timeout"
            );
        }
        for id in self.registry.ids().iter().rev() {
            if let Err(e) = self.undeploy(id) {
                warn!(deployment = %id, error = %e, "undeploy during shutdown failed");
            }
        }
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        self.instances.executor().shutdown();
        info!(container = %self.container_id, "container stopped");
    }

    fn component_state(&self, id: &DeploymentId, state: DeploymentState) -> Result<(), ContainerError> {
        let component = self
            .registry
            .get(id)
            .ok_or_else(|| ContainerError::UnknownDeployment { id: id.clone() })?;
        component.set_state(state);
        Ok(())
    }

    // -- dispatch ------------------------------------------------------------

    /// Runs one call through authorization, instance acquisition, the
    /// transaction policy and the interceptor chain.
    ///
    /// # Errors
    ///
    /// See [`ContainerError`]: routing failures (`UnknownDeployment`,
    /// `NotStarted`, `DeploymentStopped`, `ShuttingDown`), `AccessDenied`,
    /// pool failures, transaction precondition failures, and the
    /// classified `System` or `Application` outcome of the business method.
    pub fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse, ContainerError> {
        let span = info_span!(
            "invoke",
            deployment = %request.deployment_id,
            method = %request.method,
            call_id = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let _span = span.enter();

        let start = Instant::now();
        let result = self.dispatch(request);
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome);
        metrics::counter!("ironbean_calls_total", "outcome" => outcome).increment(1);
        debug!(duration_ms, outcome, "invocation complete");
        result
    }

    fn dispatch(&self, request: InvocationRequest) -> Result<InvocationResponse, ContainerError> {
        let _in_flight = self
            .lifecycle
            .try_enter()
            .ok_or(ContainerError::ShuttingDown)?;

        let id = request.deployment_id;
        let component = self
            .registry
            .get(&id)
            .ok_or_else(|| ContainerError::UnknownDeployment { id: id.clone() })?;
        match component.state() {
            DeploymentState::Started => {}
            DeploymentState::Deployed => return Err(ContainerError::NotStarted { id }),
            DeploymentState::Stopped => return Err(ContainerError::DeploymentStopped { id }),
        }
        let deployment = Arc::clone(component.deployment());

        let method = request.method;
        let args = request.args;
        let interface_type = request.interface_type.unwrap_or_else(|| {
            default_interface_type(&deployment, &request.call_interface, &method, &args)
        });

        // ENTERED
        let call = Rc::new(CallContext::new(
            Arc::clone(&deployment),
            request.primary_key.clone(),
            request.caller,
        ));
        tracing::Span::current().record("call_id", tracing::field::display(call.call_id()));
        let _entered = ThreadContext::enter(Rc::clone(&call));
        call.set_invoked_interface(request.call_interface);
        call.set_method(method.clone());

        // AUTHORIZED
        if interface_type != InterfaceType::Timeout
            && !self
                .security
                .is_caller_authorized(&deployment, &method, interface_type, call.principal())
        {
            return Err(ContainerError::AccessDenied {
                principal: call.principal().map(|p| p.id.clone()),
                method,
            });
        }

        match method.kind {
            MethodKind::Home if method.is_home_create() => {
                return Ok(InvocationResponse::Proxy(ProxyInfo {
                    deployment_id: deployment.id().clone(),
                    interface_type: created_interface_type(interface_type),
                    primary_key: request.primary_key,
                }));
            }
            MethodKind::Home | MethodKind::Component => return Ok(InvocationResponse::Empty),
            MethodKind::Business => {}
        }

        let target = deployment
            .business_method(&method.name)
            .ok_or_else(|| ContainerError::NoSuchMethod {
                bean_class: deployment.bean_class().to_string(),
                method: method.name.clone(),
            })?;
        let (parameters, message, provider) = match args {
            CallArgs::Values(values) => {
                if values.len() != target.arity() {
                    return Err(ContainerError::InvalidArguments {
                        reason: format!(
                            "{} expects {} arguments, got {}",
                            method,
                            target.arity(),
                            values.len()
                        ),
                    });
                }
                (values, None, None)
            }
            CallArgs::ServiceEndpoint { message, provider } => {
                (vec![Value::Null; target.arity()], Some(message), Some(provider))
            }
        };
        let operation = if message.is_some() {
            OperationKind::BusinessWs
        } else if interface_type == InterfaceType::Timeout {
            OperationKind::Timeout
        } else {
            OperationKind::Business
        };
        call.set_current_operation(operation);

        // INSTANCE_ACQUIRED
        let mut lease = InstanceLease {
            manager: &self.instances,
            call: &call,
            instance: None,
        };
        let instance = lease.instance.insert(self.instances.get_instance(&call)?);
        let (bean, interceptors) = instance.parts_mut();
        let mut stack = InterceptorStack::new(
            bean,
            Some(target),
            operation,
            deployment.method_interceptors(&method.name),
            interceptors,
        )?;
        if let Some(provider) = &provider {
            stack.prepend(&provider.data, &provider.instance);
        }

        let mut policy = TransactionPolicy::create(
            deployment.transaction_attribute(&method.name),
            self.tx_manager.as_ref(),
            &method.name,
        )?;

        // INVOKING
        let invoked = catch_unwind(AssertUnwindSafe(|| match message {
            Some(message) => stack.invoke_with_message(Some(&*call), message, parameters),
            None => stack.invoke(Some(&*call), parameters),
        }))
        .unwrap_or_else(|payload| Err(exception_from_panic(payload.as_ref())));

        // COMPLETED | FAILED
        let result = match invoked {
            Ok(value) => Ok(InvocationResponse::Value(value)),
            Err(exception) => Err(match classify_exception(&deployment, &exception) {
                ExceptionType::System => policy.handle_system_exception(&call, exception),
                ExceptionType::Application => policy.handle_application_exception(exception, false),
                ExceptionType::ApplicationRollback => {
                    policy.handle_application_exception(exception, true)
                }
            }),
        };
        policy.after_invoke(&call)?;
        result
        // FINALIZED: `lease` drops here, before the thread context is restored.
    }
}

impl std::fmt::Debug for StatelessContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessContainer")
            .field("container_id", &self.container_id)
            .field("state", &self.lifecycle.state())
            .field("deployments", &self.registry.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// InstanceLease
// ---------------------------------------------------------------------------

/// Holds a borrowed instance for the rest of a call and hands it back on
/// drop: discarded when the call flagged it (or the thread is unwinding),
/// pooled otherwise.
struct InstanceLease<'a> {
    manager: &'a InstanceManager,
    call: &'a CallContext,
    instance: Option<PooledInstance>,
}

impl Drop for InstanceLease<'_> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            if self.call.is_discard_instance() || std::thread::panicking() {
                self.manager.discard_instance(self.call, instance);
            } else {
                self.manager.pool_instance(self.call, instance);
            }
        }
        self.call.set_creational_context(None);
    }
}

/// Interface type for requests that do not state one: the deployment's
/// declaration for the invoked interface, else a default by method kind.
fn default_interface_type(
    deployment: &ComponentDeployment,
    call_interface: &str,
    method: &Method,
    args: &CallArgs,
) -> InterfaceType {
    if matches!(args, CallArgs::ServiceEndpoint { .. }) {
        return InterfaceType::ServiceEndpoint;
    }
    if let Some(declared) = deployment.interface_type(call_interface) {
        return declared;
    }
    match method.kind {
        MethodKind::Home => InterfaceType::Home,
        MethodKind::Component => InterfaceType::Remote,
        MethodKind::Business => InterfaceType::BusinessLocal,
    }
}

/// Interface type of the proxy a home `create*` call hands out.
fn created_interface_type(home: InterfaceType) -> InterfaceType {
    match home {
        InterfaceType::Home => InterfaceType::Remote,
        InterfaceType::LocalHome => InterfaceType::Local,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
