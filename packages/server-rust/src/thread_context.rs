//! Per-call context and the ambient per-thread call context.
//!
//! A [`CallContext`] is created when a call enters the container and is
//! passed explicitly through pool, chain and policy code. The same context is
//! also published as the thread's ambient context for the duration of the
//! call, so nested frameworks can reach it through [`ThreadContext::current`].
//! Both the ambient slot and the published invocation snapshot are restored
//! by RAII guards on every exit path, including unwinding.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use ironbean_core::{Method, OperationKind, Principal, RequestContext, Value};
use uuid::Uuid;

use crate::deployment::{ComponentDeployment, DeploymentId};
use crate::interceptor::MessageContext;

/// Marker that keeps call state on the thread that created it.
type NotSend = PhantomData<Rc<()>>;

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// State of one invocation. Never crosses threads and never outlives the call.
pub struct CallContext {
    call_id: Uuid,
    deployment: Arc<ComponentDeployment>,
    primary_key: Option<Value>,
    caller: RequestContext,
    operation: Cell<OperationKind>,
    method: RefCell<Option<Method>>,
    invoked_interface: RefCell<Option<String>>,
    discard: Cell<bool>,
    creational_context: Cell<Option<u64>>,
    invocation: RefCell<Option<InvocationSnapshot>>,
    _not_send: NotSend,
}

impl CallContext {
    #[must_use]
    pub fn new(
        deployment: Arc<ComponentDeployment>,
        primary_key: Option<Value>,
        caller: RequestContext,
    ) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            deployment,
            primary_key,
            caller,
            operation: Cell::new(OperationKind::Business),
            method: RefCell::new(None),
            invoked_interface: RefCell::new(None),
            discard: Cell::new(false),
            creational_context: Cell::new(None),
            invocation: RefCell::new(None),
            _not_send: PhantomData,
        }
    }

    /// Context for container-internal work (pre-warming, destruction) that
    /// has no external caller.
    #[must_use]
    pub fn internal(deployment: Arc<ComponentDeployment>, operation: OperationKind) -> Self {
        let ctx = Self::new(deployment, None, RequestContext::anonymous());
        ctx.operation.set(operation);
        ctx
    }

    #[must_use]
    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    #[must_use]
    pub fn deployment(&self) -> &Arc<ComponentDeployment> {
        &self.deployment
    }

    #[must_use]
    pub fn deployment_id(&self) -> &DeploymentId {
        self.deployment.id()
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&Value> {
        self.primary_key.as_ref()
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.caller.principal.as_ref()
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.caller.trace_id.as_deref()
    }

    #[must_use]
    pub fn current_operation(&self) -> OperationKind {
        self.operation.get()
    }

    /// Sets the current operation and returns the previous one.
    pub fn set_current_operation(&self, operation: OperationKind) -> OperationKind {
        self.operation.replace(operation)
    }

    #[must_use]
    pub fn method(&self) -> Option<Method> {
        self.method.borrow().clone()
    }

    pub fn set_method(&self, method: Method) {
        *self.method.borrow_mut() = Some(method);
    }

    #[must_use]
    pub fn invoked_interface(&self) -> Option<String> {
        self.invoked_interface.borrow().clone()
    }

    pub fn set_invoked_interface(&self, interface: impl Into<String>) {
        *self.invoked_interface.borrow_mut() = Some(interface.into());
    }

    /// Whether the instance serving this call must be discarded instead of pooled.
    #[must_use]
    pub fn is_discard_instance(&self) -> bool {
        self.discard.get()
    }

    pub fn set_discard_instance(&self, discard: bool) {
        self.discard.set(discard);
    }

    /// Id of the creational context of the instance currently serving the call.
    #[must_use]
    pub fn creational_context(&self) -> Option<u64> {
        self.creational_context.get()
    }

    pub(crate) fn set_creational_context(&self, id: Option<u64>) {
        self.creational_context.set(id);
    }

    /// Snapshot of the interceptor chain currently running on this call, if any.
    #[must_use]
    pub fn invocation(&self) -> Option<InvocationSnapshot> {
        self.invocation.borrow().clone()
    }

    /// Publishes `snapshot` until the returned guard is dropped; the previous
    /// snapshot (if a chain was already running) is restored afterwards.
    pub(crate) fn publish_invocation(&self, snapshot: InvocationSnapshot) -> PublishedInvocation<'_> {
        let previous = self.invocation.replace(Some(snapshot));
        PublishedInvocation {
            ctx: self,
            previous,
        }
    }

    pub(crate) fn update_invocation_parameters(&self, parameters: &[Value]) {
        if let Some(snapshot) = self.invocation.borrow_mut().as_mut() {
            snapshot.parameters = parameters.to_vec();
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("call_id", &self.call_id)
            .field("deployment", self.deployment.id())
            .field("operation", &self.operation.get())
            .field("discard", &self.discard.get())
            .finish_non_exhaustive()
    }
}

/// What nested code can see of a running interceptor chain.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationSnapshot {
    pub operation: OperationKind,
    /// Name of the target bean method, `None` for lifecycle chains without a callback.
    pub target: Option<String>,
    pub parameters: Vec<Value>,
    pub message: Option<MessageContext>,
}

/// Restores the previously published invocation snapshot on drop.
pub(crate) struct PublishedInvocation<'a> {
    ctx: &'a CallContext,
    previous: Option<InvocationSnapshot>,
}

impl Drop for PublishedInvocation<'_> {
    fn drop(&mut self) {
        *self.ctx.invocation.borrow_mut() = self.previous.take();
    }
}

// ---------------------------------------------------------------------------
// ThreadContext
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT: RefCell<Option<Rc<CallContext>>> = const { RefCell::new(None) };
}

/// Access to the ambient call context of the current thread.
pub struct ThreadContext;

impl ThreadContext {
    /// Makes `ctx` the current thread's call context until the guard drops.
    /// The context that was current before (for nested calls) is restored.
    #[must_use = "the context is cleared when the guard is dropped"]
    pub fn enter(ctx: Rc<CallContext>) -> ThreadContextGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(ctx));
        ThreadContextGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// The call context of the invocation running on this thread, if any.
    #[must_use]
    pub fn current() -> Option<Rc<CallContext>> {
        CURRENT.with(|current| current.borrow().clone())
    }
}

/// Restores the previous ambient call context on drop.
pub struct ThreadContextGuard {
    previous: Option<Rc<CallContext>>,
    _not_send: NotSend,
}

impl Drop for ThreadContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // Ignore access errors during thread teardown.
        let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
    }
}
