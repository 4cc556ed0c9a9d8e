//! Pooled bean instances and their creational contexts.

use std::any::Any;
use std::fmt;
use std::time::Instant;

use crate::deployment::BeanObject;
use crate::interceptor::InterceptorInstances;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Per-instance construction scope. Cleanup actions registered while the
/// bean and its interceptors are built run, newest first, when the instance
/// is destroyed.
pub struct CreationalContext {
    id: u64,
    cleanups: Vec<Cleanup>,
}

impl CreationalContext {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cleanups: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registers an action to run when the instance is destroyed.
    pub fn on_release(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Runs every registered cleanup in reverse registration order.
    pub fn release(self) {
        for cleanup in self.cleanups.into_iter().rev() {
            cleanup();
        }
    }
}

impl fmt::Debug for CreationalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreationalContext")
            .field("id", &self.id)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

/// A bean object together with its interceptor instances.
///
/// Moves by value between the pool and the thread serving a call, so at most
/// one call can ever hold it.
pub struct PooledInstance {
    id: u64,
    bean: BeanObject,
    interceptors: InterceptorInstances,
    creational_context: CreationalContext,
    created_at: Instant,
}

impl PooledInstance {
    pub(crate) fn new(
        bean: BeanObject,
        interceptors: InterceptorInstances,
        creational_context: CreationalContext,
    ) -> Self {
        Self {
            id: creational_context.id(),
            bean,
            interceptors,
            creational_context,
            created_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn bean(&self) -> &(dyn Any + Send) {
        self.bean.as_ref()
    }

    #[must_use]
    pub fn interceptors(&self) -> &InterceptorInstances {
        &self.interceptors
    }

    /// Splits the instance into the mutable bean and the shared interceptor
    /// instances, as an interceptor chain needs them.
    pub fn parts_mut(&mut self) -> (&mut (dyn Any + Send), &InterceptorInstances) {
        (self.bean.as_mut(), &self.interceptors)
    }

    pub(crate) fn into_creational_context(self) -> CreationalContext {
        self.creational_context
    }
}

impl fmt::Debug for PooledInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledInstance")
            .field("id", &self.id)
            .field("interceptors", &self.interceptors.keys().collect::<Vec<_>>())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
