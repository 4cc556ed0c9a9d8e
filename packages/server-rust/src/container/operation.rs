//! Invocation request/response types and the container error taxonomy.

use ironbean_core::{InterfaceType, Method, RequestContext, Value};

use crate::deployment::DeploymentId;
use crate::interceptor::{InterceptorData, InterceptorInstance, MessageContext};
use crate::pool::PoolError;
use crate::tx::TransactionError;

/// A single synchronous call into the container, as produced by a proxy stub.
#[derive(Debug)]
pub struct InvocationRequest {
    pub deployment_id: DeploymentId,
    /// How the call arrived. `None` lets the container derive it from
    /// `call_interface`.
    pub interface_type: Option<InterfaceType>,
    /// Name of the interface the caller invoked through.
    pub call_interface: String,
    pub method: Method,
    pub args: CallArgs,
    pub primary_key: Option<Value>,
    pub caller: RequestContext,
}

impl InvocationRequest {
    /// A business call with plain arguments, interface type derived from the deployment.
    #[must_use]
    pub fn business(deployment_id: impl Into<DeploymentId>, method: Method, args: Vec<Value>) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            interface_type: None,
            call_interface: method.interface.clone(),
            method,
            args: CallArgs::Values(args),
            primary_key: None,
            caller: RequestContext::anonymous(),
        }
    }

    #[must_use]
    pub fn with_interface_type(mut self, interface_type: InterfaceType) -> Self {
        self.interface_type = Some(interface_type);
        self
    }

    #[must_use]
    pub fn with_caller(mut self, caller: RequestContext) -> Self {
        self.caller = caller;
        self
    }

    #[must_use]
    pub fn with_primary_key(mut self, primary_key: Value) -> Self {
        self.primary_key = Some(primary_key);
        self
    }
}

/// Arguments of a call.
#[derive(Debug)]
pub enum CallArgs {
    /// Ordinary positional parameters.
    Values(Vec<Value>),
    /// Inbound service-endpoint call. The provider interceptor runs first in
    /// the chain and fills in the business parameters from the message.
    ServiceEndpoint {
        message: MessageContext,
        provider: ServiceProvider,
    },
}

/// Interceptor supplied by the service-endpoint layer for one call.
pub struct ServiceProvider {
    pub data: InterceptorData,
    pub instance: InterceptorInstance,
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("class", &self.data.class())
            .finish_non_exhaustive()
    }
}

/// Lightweight descriptor returned by component-factory `create*` calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyInfo {
    pub deployment_id: DeploymentId,
    pub interface_type: InterfaceType,
    pub primary_key: Option<Value>,
}

/// Successful outcome of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResponse {
    /// Return value of a business method.
    Value(Value),
    /// Answer to a home `create*` call.
    Proxy(ProxyInfo),
    /// Home or component-object method handled without touching the pool.
    Empty,
}

impl InvocationResponse {
    /// Returns the business return value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            InvocationResponse::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Failure raised by business methods and interceptors.
///
/// `kind` names the exception type; the deployment's application-exception
/// registry decides whether a kind is an application exception (and whether
/// it forces rollback). Unregistered kinds are system exceptions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BeanException {
    kind: String,
    message: String,
}

impl BeanException {
    /// Kind assigned to panics caught while a chain runs.
    pub const PANIC: &'static str = "Panic";
    /// Kind raised when an interceptor or bean handler gets an instance of the wrong type.
    pub const TYPE_MISMATCH: &'static str = "ClassCastException";
    pub const ILLEGAL_ARGUMENT: &'static str = "IllegalArgumentException";
    pub const ILLEGAL_STATE: &'static str = "IllegalStateException";

    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced to callers of the container.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("deployment does not exist in this container: {id}")]
    UnknownDeployment { id: DeploymentId },
    #[error("deployment {id} is already registered")]
    DuplicateDeployment { id: DeploymentId },
    #[error("deployment {id} has not been started")]
    NotStarted { id: DeploymentId },
    #[error("deployment {id} is stopped")]
    DeploymentStopped { id: DeploymentId },
    #[error("container is shutting down")]
    ShuttingDown,
    #[error("invalid deployment {id}: {reason}")]
    Deployment { id: DeploymentId, reason: String },
    #[error("unauthorized access by principal denied: {method}")]
    AccessDenied {
        method: Method,
        principal: Option<String>,
    },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("cannot instantiate {bean_class}: {source}")]
    Instantiation {
        bean_class: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no interceptor of type {class}")]
    MissingInterceptor { class: String },
    #[error("no business method {method} on {bean_class}")]
    NoSuchMethod { bean_class: String, method: String },
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },
    #[error("transaction required for {method}")]
    TransactionRequired { method: String },
    #[error("transaction not allowed for {method}")]
    TransactionNotAllowed { method: String },
    #[error("transaction failure: {0}")]
    Transaction(#[from] TransactionError),
    #[error("system exception: {cause}")]
    System {
        cause: BeanException,
        /// The caller's own transaction was marked for rollback.
        caller_transaction_rolled_back: bool,
    },
    #[error("application exception: {exception}")]
    Application {
        exception: BeanException,
        /// The exception forced the transaction to roll back.
        rollback: bool,
    },
}

impl ContainerError {
    /// Only pool acquisition timeouts may be retried by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContainerError::Pool(PoolError::Timeout { .. }))
    }

    /// Application exceptions are the only failures that leave the business
    /// contract intact.
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self, ContainerError::Application { .. })
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ContainerError::UnknownDeployment { .. } => "unknown_deployment",
            ContainerError::DuplicateDeployment { .. } => "duplicate_deployment",
            ContainerError::NotStarted { .. } => "not_started",
            ContainerError::DeploymentStopped { .. } => "stopped",
            ContainerError::ShuttingDown => "shutting_down",
            ContainerError::Deployment { .. } => "deployment",
            ContainerError::AccessDenied { .. } => "access_denied",
            ContainerError::Pool(PoolError::Timeout { .. }) => "pool_timeout",
            ContainerError::Pool(PoolError::Closed) => "pool_closed",
            ContainerError::Instantiation { .. } => "instantiation",
            ContainerError::MissingInterceptor { .. } => "missing_interceptor",
            ContainerError::NoSuchMethod { .. } => "no_such_method",
            ContainerError::InvalidArguments { .. } => "invalid_arguments",
            ContainerError::TransactionRequired { .. } => "transaction_required",
            ContainerError::TransactionNotAllowed { .. } => "transaction_not_allowed",
            ContainerError::Transaction(_) => "transaction",
            ContainerError::System { .. } => "system",
            ContainerError::Application { .. } => "application",
        }
    }
}
