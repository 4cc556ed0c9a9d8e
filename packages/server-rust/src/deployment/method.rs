//! Business method handles.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use ironbean_core::Value;

use crate::container::BeanException;

/// A type-erased bean object owned by a pooled instance.
pub type BeanObject = Box<dyn Any + Send>;

type BeanHandler =
    Arc<dyn Fn(&mut (dyn Any + Send), &[Value]) -> Result<Value, BeanException> + Send + Sync>;

/// Callable handle for one bean method, resolved at deployment time.
#[derive(Clone)]
pub struct BeanMethod {
    name: Arc<str>,
    arity: usize,
    handler: BeanHandler,
}

impl BeanMethod {
    /// Wraps a typed handler. Invoking it on a bean of another type raises
    /// a `ClassCastException` bean exception.
    pub(crate) fn typed<B, F>(name: &str, arity: usize, handler: F) -> Self
    where
        B: Any + Send,
        F: Fn(&mut B, &[Value]) -> Result<Value, BeanException> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            arity,
            handler: Arc::new(move |bean: &mut (dyn Any + Send), args: &[Value]| {
                let bean = bean
                    .downcast_mut::<B>()
                    .ok_or_else(|| type_mismatch::<B>())?;
                handler(bean, args)
            }),
        }
    }

    /// Wraps a parameterless lifecycle callback.
    pub(crate) fn lifecycle<B, F>(name: &str, callback: F) -> Self
    where
        B: Any + Send,
        F: Fn(&mut B) -> Result<(), BeanException> + Send + Sync + 'static,
    {
        Self::typed(name, 0, move |bean: &mut B, _| {
            callback(bean)?;
            Ok(Value::Null)
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parameters the method accepts.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Calls the method on `bean`.
    ///
    /// # Errors
    ///
    /// Returns whatever the method raises, or an `IllegalArgumentException`
    /// when the argument count does not match the arity.
    pub fn invoke(&self, bean: &mut (dyn Any + Send), args: &[Value]) -> Result<Value, BeanException> {
        if args.len() != self.arity {
            return Err(BeanException::new(
                BeanException::ILLEGAL_ARGUMENT,
                format!(
                    "{} expects {} parameters, got {}",
                    self.name,
                    self.arity,
                    args.len()
                ),
            ));
        }
        (self.handler)(bean, args)
    }
}

impl fmt::Debug for BeanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanMethod")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

pub(crate) fn type_mismatch<T>() -> BeanException {
    BeanException::new(
        BeanException::TYPE_MISMATCH,
        format!("instance is not a {}", type_name::<T>()),
    )
}
