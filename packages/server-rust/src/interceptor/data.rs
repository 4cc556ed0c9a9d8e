//! Interceptor metadata and interceptor instances.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ironbean_core::{OperationKind, Value};

use crate::container::BeanException;
use crate::deployment::method::type_mismatch;
use crate::interceptor::InvocationContext;

/// Handler behind one interceptor method. Receives the interceptor instance
/// that declares it and the running invocation.
pub type InterceptorHandler = Arc<
    dyn Fn(&(dyn Any + Send), &mut InvocationContext<'_>) -> Result<Value, BeanException>
        + Send
        + Sync,
>;

/// Interceptor instances of one pooled bean instance, keyed by interceptor class.
pub type InterceptorInstances = HashMap<String, InterceptorInstance>;

// ---------------------------------------------------------------------------
// InterceptorMethod
// ---------------------------------------------------------------------------

/// One around-invoke, around-timeout or lifecycle method of an interceptor.
#[derive(Clone)]
pub struct InterceptorMethod {
    name: Arc<str>,
    declaring_class: Arc<str>,
    handler: InterceptorHandler,
}

impl InterceptorMethod {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class that declares the method. Selects the real instance behind a
    /// proxied interceptor.
    #[must_use]
    pub fn declaring_class(&self) -> &str {
        &self.declaring_class
    }

    pub(crate) fn handler(&self) -> &InterceptorHandler {
        &self.handler
    }
}

impl fmt::Debug for InterceptorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_class, self.name)
    }
}

// ---------------------------------------------------------------------------
// InterceptorData
// ---------------------------------------------------------------------------

/// Metadata for one interceptor class: which methods run for which operation.
///
/// Methods registered for the same operation run in registration order.
#[derive(Clone)]
pub struct InterceptorData {
    class: String,
    methods: BTreeMap<OperationKind, Vec<InterceptorMethod>>,
}

impl InterceptorData {
    #[must_use]
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            methods: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Registers an around-invoke method for business calls.
    #[must_use]
    pub fn around_invoke<T, F>(self, handler: F) -> Self
    where
        T: Any + Send,
        F: Fn(&T, &mut InvocationContext<'_>) -> Result<Value, BeanException> + Send + Sync + 'static,
    {
        let class = self.class.clone();
        self.method(OperationKind::Business, &class, "aroundInvoke", handler)
    }

    /// Registers an around-timeout method for timer callbacks.
    #[must_use]
    pub fn around_timeout<T, F>(self, handler: F) -> Self
    where
        T: Any + Send,
        F: Fn(&T, &mut InvocationContext<'_>) -> Result<Value, BeanException> + Send + Sync + 'static,
    {
        let class = self.class.clone();
        self.method(OperationKind::Timeout, &class, "aroundTimeout", handler)
    }

    #[must_use]
    pub fn post_construct<T, F>(self, handler: F) -> Self
    where
        T: Any + Send,
        F: Fn(&T, &mut InvocationContext<'_>) -> Result<Value, BeanException> + Send + Sync + 'static,
    {
        let class = self.class.clone();
        self.method(OperationKind::PostConstruct, &class, "postConstruct", handler)
    }

    #[must_use]
    pub fn pre_destroy<T, F>(self, handler: F) -> Self
    where
        T: Any + Send,
        F: Fn(&T, &mut InvocationContext<'_>) -> Result<Value, BeanException> + Send + Sync + 'static,
    {
        let class = self.class.clone();
        self.method(OperationKind::PreDestroy, &class, "preDestroy", handler)
    }

    /// Registers `handler` for `operation`, declared by `declaring_class`
    /// (the interceptor class itself or one of its ancestors).
    #[must_use]
    pub fn method<T, F>(
        mut self,
        operation: OperationKind,
        declaring_class: &str,
        name: &str,
        handler: F,
    ) -> Self
    where
        T: Any + Send,
        F: Fn(&T, &mut InvocationContext<'_>) -> Result<Value, BeanException> + Send + Sync + 'static,
    {
        let erased: InterceptorHandler = Arc::new(
            move |instance: &(dyn Any + Send), ctx: &mut InvocationContext<'_>| {
                let instance = instance
                    .downcast_ref::<T>()
                    .ok_or_else(type_mismatch::<T>)?;
                handler(instance, ctx)
            },
        );
        self.methods
            .entry(operation)
            .or_default()
            .push(InterceptorMethod {
                name: Arc::from(name),
                declaring_class: Arc::from(declaring_class),
                handler: erased,
            });
        self
    }

    /// Methods that run for `operation`. Service-endpoint calls fall back to
    /// the business methods when none were registered for them.
    #[must_use]
    pub fn methods(&self, operation: OperationKind) -> &[InterceptorMethod] {
        match self.methods.get(&operation) {
            Some(methods) => methods,
            None => operation
                .fallback()
                .and_then(|fallback| self.methods.get(&fallback))
                .map_or(&[], Vec::as_slice),
        }
    }
}

impl fmt::Debug for InterceptorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorData")
            .field("class", &self.class)
            .field("methods", &self.methods)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// InterceptorInstance
// ---------------------------------------------------------------------------

/// A live interceptor object attached to one pooled bean instance.
pub enum InterceptorInstance {
    Direct(Box<dyn Any + Send>),
    /// A proxy wrapping a real interceptor. Methods declared by `real_class`
    /// are invoked on `real`; everything else goes to `proxy`.
    Proxied {
        proxy: Box<dyn Any + Send>,
        real: Box<dyn Any + Send>,
        real_class: String,
    },
}

impl InterceptorInstance {
    #[must_use]
    pub fn direct<T: Any + Send>(instance: T) -> Self {
        InterceptorInstance::Direct(Box::new(instance))
    }

    #[must_use]
    pub fn proxied<P, R>(proxy: P, real: R, real_class: impl Into<String>) -> Self
    where
        P: Any + Send,
        R: Any + Send,
    {
        InterceptorInstance::Proxied {
            proxy: Box::new(proxy),
            real: Box::new(real),
            real_class: real_class.into(),
        }
    }

    /// The object a method declared by `declaring_class` runs against.
    #[must_use]
    pub fn resolve_for(&self, declaring_class: &str) -> &(dyn Any + Send) {
        match self {
            InterceptorInstance::Direct(instance) => instance.as_ref(),
            InterceptorInstance::Proxied {
                proxy,
                real,
                real_class,
            } => {
                if real_class == declaring_class {
                    real.as_ref()
                } else {
                    proxy.as_ref()
                }
            }
        }
    }

    /// Returns the direct instance (or the real one behind a proxy) as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            InterceptorInstance::Direct(instance) => instance.downcast_ref(),
            InterceptorInstance::Proxied { real, .. } => real.downcast_ref(),
        }
    }
}

impl fmt::Debug for InterceptorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorInstance::Direct(instance) => f
                .debug_tuple("Direct")
                .field(&instance.as_ref().type_id())
                .finish(),
            InterceptorInstance::Proxied { real_class, .. } => f
                .debug_struct("Proxied")
                .field("real_class", real_class)
                .finish_non_exhaustive(),
        }
    }
}
