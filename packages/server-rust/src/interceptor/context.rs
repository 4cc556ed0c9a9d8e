//! The invocation context handed to interceptor methods.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use ironbean_core::{OperationKind, Value};
use serde::{Deserialize, Serialize};

use crate::container::BeanException;
use crate::deployment::BeanMethod;
use crate::interceptor::InterceptorMethod;
use crate::thread_context::CallContext;

// ---------------------------------------------------------------------------
// MessageContext
// ---------------------------------------------------------------------------

/// Properties of an inbound service message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub properties: BTreeMap<String, Value>,
}

impl ServiceMessage {
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Message context exposed to interceptors on service-endpoint calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageContext {
    /// Document-style web-service message.
    Ws(ServiceMessage),
    /// RPC-style message.
    Rpc(ServiceMessage),
}

impl MessageContext {
    #[must_use]
    pub fn message(&self) -> &ServiceMessage {
        match self {
            MessageContext::Ws(m) | MessageContext::Rpc(m) => m,
        }
    }

    pub fn message_mut(&mut self) -> &mut ServiceMessage {
        match self {
            MessageContext::Ws(m) | MessageContext::Rpc(m) => m,
        }
    }
}

// ---------------------------------------------------------------------------
// InvocationContext
// ---------------------------------------------------------------------------

/// One resolved step of a chain: the interceptor method and the instance it runs on.
#[derive(Clone, Copy)]
pub(crate) struct ChainLink<'a> {
    pub(crate) class: &'a str,
    pub(crate) instance: &'a (dyn Any + Send),
    pub(crate) method: &'a InterceptorMethod,
}

/// State of a running interceptor chain.
///
/// Each interceptor calls [`proceed`](Self::proceed) to hand control to the
/// next one; after the last interceptor the target bean method runs. An
/// interceptor may skip `proceed` (short-circuit), call it more than once
/// (retry), or map its error.
pub struct InvocationContext<'a> {
    bean: &'a mut (dyn Any + Send),
    target: Option<&'a BeanMethod>,
    operation: OperationKind,
    chain: Vec<ChainLink<'a>>,
    position: usize,
    parameters: Vec<Value>,
    context_data: HashMap<String, Value>,
    message: Option<MessageContext>,
    call: Option<&'a CallContext>,
}

impl<'a> InvocationContext<'a> {
    pub(crate) fn new(
        bean: &'a mut (dyn Any + Send),
        target: Option<&'a BeanMethod>,
        operation: OperationKind,
        chain: Vec<ChainLink<'a>>,
        parameters: Vec<Value>,
        message: Option<MessageContext>,
        call: Option<&'a CallContext>,
    ) -> Self {
        Self {
            bean,
            target,
            operation,
            chain,
            position: 0,
            parameters,
            context_data: HashMap::new(),
            message,
            call,
        }
    }

    /// Runs the rest of the chain and then the target method.
    ///
    /// # Errors
    ///
    /// Returns the exception raised by the next interceptor or by the target.
    pub fn proceed(&mut self) -> Result<Value, BeanException> {
        if let Some(link) = self.chain.get(self.position).copied() {
            tracing::trace!(
                interceptor = link.class,
                method = link.method.name(),
                operation = %self.operation,
                "proceed"
            );
            self.position += 1;
            let result = (link.method.handler())(link.instance, self);
            self.position -= 1;
            return result;
        }
        match self.target {
            Some(target) => target.invoke(&mut *self.bean, &self.parameters),
            None => Ok(Value::Null),
        }
    }

    #[must_use]
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Name of the target method, if the chain has one.
    #[must_use]
    pub fn method_name(&self) -> Option<&str> {
        self.target.map(BeanMethod::name)
    }

    #[must_use]
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// Replaces the parameters passed to the target method.
    ///
    /// # Errors
    ///
    /// Lifecycle chains have no parameters (`IllegalStateException`); the new
    /// parameters must match the target's arity (`IllegalArgumentException`).
    pub fn set_parameters(&mut self, parameters: Vec<Value>) -> Result<(), BeanException> {
        if self.operation.is_lifecycle() {
            return Err(BeanException::new(
                BeanException::ILLEGAL_STATE,
                format!("{} callbacks have no parameters", self.operation),
            ));
        }
        if let Some(target) = self.target {
            if parameters.len() != target.arity() {
                return Err(BeanException::new(
                    BeanException::ILLEGAL_ARGUMENT,
                    format!(
                        "{} expects {} parameters, got {}",
                        target.name(),
                        target.arity(),
                        parameters.len()
                    ),
                ));
            }
        }
        if let Some(call) = self.call {
            call.update_invocation_parameters(&parameters);
        }
        self.parameters = parameters;
        Ok(())
    }

    /// Data shared by the interceptors of this invocation.
    #[must_use]
    pub fn context_data(&self) -> &HashMap<String, Value> {
        &self.context_data
    }

    pub fn context_data_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.context_data
    }

    /// The inbound message on service-endpoint calls.
    #[must_use]
    pub fn message_context(&self) -> Option<&MessageContext> {
        self.message.as_ref()
    }

    pub fn message_context_mut(&mut self) -> Option<&mut MessageContext> {
        self.message.as_mut()
    }

    /// The call this chain runs for. `None` when a chain is run outside the container.
    #[must_use]
    pub fn call_context(&self) -> Option<&CallContext> {
        self.call
    }
}

impl std::fmt::Debug for InvocationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("operation", &self.operation)
            .field("method", &self.method_name())
            .field("position", &self.position)
            .field("chain_len", &self.chain.len())
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
