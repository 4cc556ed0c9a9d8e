//! Chain construction for one invocation.

use std::any::Any;
use std::sync::Arc;

use ironbean_core::{OperationKind, Value};

use crate::container::{BeanException, ContainerError};
use crate::deployment::BeanMethod;
use crate::interceptor::context::ChainLink;
use crate::interceptor::{
    InterceptorData, InterceptorInstance, InterceptorInstances, InvocationContext, MessageContext,
};
use crate::thread_context::{CallContext, InvocationSnapshot};

/// The ordered interceptor methods and target of one invocation.
///
/// Built per call from the deployment's resolved interceptor metadata and
/// the interceptor instances of the pooled bean instance serving the call.
pub struct InterceptorStack<'a> {
    bean: &'a mut (dyn Any + Send),
    target: Option<&'a BeanMethod>,
    operation: OperationKind,
    chain: Vec<ChainLink<'a>>,
}

impl<'a> InterceptorStack<'a> {
    /// Resolves the chain for `operation`, keeping declaration order.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::MissingInterceptor` when an interceptor named
    /// in `interceptors` has no instance in `instances`.
    pub fn new(
        bean: &'a mut (dyn Any + Send),
        target: Option<&'a BeanMethod>,
        operation: OperationKind,
        interceptors: &'a [Arc<InterceptorData>],
        instances: &'a InterceptorInstances,
    ) -> Result<Self, ContainerError> {
        let mut chain = Vec::with_capacity(interceptors.len());
        for data in interceptors {
            let instance =
                instances
                    .get(data.class())
                    .ok_or_else(|| ContainerError::MissingInterceptor {
                        class: data.class().to_string(),
                    })?;
            push_links(&mut chain, data, instance, operation);
        }
        Ok(Self {
            bean,
            target,
            operation,
            chain,
        })
    }

    /// Places `data`'s methods for this operation ahead of the resolved chain.
    pub fn prepend(&mut self, data: &'a InterceptorData, instance: &'a InterceptorInstance) {
        let mut head = Vec::new();
        push_links(&mut head, data, instance, self.operation);
        self.chain.splice(0..0, head);
    }

    /// Number of interceptor methods that will run before the target.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Runs the chain with `parameters`.
    ///
    /// While the chain runs, a snapshot of it is published on `call`.
    ///
    /// # Errors
    ///
    /// Returns the first exception that escapes the outermost interceptor.
    pub fn invoke(self, call: Option<&CallContext>, parameters: Vec<Value>) -> Result<Value, BeanException> {
        self.run(call, None, parameters)
    }

    /// Runs the chain for a service-endpoint call, exposing `message` to
    /// every interceptor.
    ///
    /// # Errors
    ///
    /// Returns the first exception that escapes the outermost interceptor.
    pub fn invoke_with_message(
        self,
        call: Option<&CallContext>,
        message: MessageContext,
        parameters: Vec<Value>,
    ) -> Result<Value, BeanException> {
        self.run(call, Some(message), parameters)
    }

    fn run(
        self,
        call: Option<&CallContext>,
        message: Option<MessageContext>,
        parameters: Vec<Value>,
    ) -> Result<Value, BeanException> {
        let _published = call.map(|call| {
            call.publish_invocation(InvocationSnapshot {
                operation: self.operation,
                target: self.target.map(|t| t.name().to_string()),
                parameters: parameters.clone(),
                message: message.clone(),
            })
        });
        let mut ctx = InvocationContext::new(
            self.bean,
            self.target,
            self.operation,
            self.chain,
            parameters,
            message,
            call,
        );
        ctx.proceed()
    }
}

impl std::fmt::Debug for InterceptorStack<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let links: Vec<String> = self
            .chain
            .iter()
            .map(|link| format!("{}::{}", link.class, link.method.name()))
            .collect();
        f.debug_struct("InterceptorStack")
            .field("operation", &self.operation)
            .field("target", &self.target.map(BeanMethod::name))
            .field("chain", &links)
            .finish_non_exhaustive()
    }
}

fn push_links<'a>(
    chain: &mut Vec<ChainLink<'a>>,
    data: &'a InterceptorData,
    instance: &'a InterceptorInstance,
    operation: OperationKind,
) {
    for method in data.methods(operation) {
        chain.push(ChainLink {
            class: data.class(),
            instance: instance.resolve_for(method.declaring_class()),
            method,
        });
    }
}
