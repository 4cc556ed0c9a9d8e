//! Failure classification: maps what escapes a chain onto the deployment's
//! exception categories.

use std::any::Any;

use ironbean_core::ExceptionType;

use crate::container::BeanException;
use crate::deployment::ComponentDeployment;

/// Classifies `exception` against the deployment's application-exception
/// registry.
///
/// Caught panics are always system exceptions, whatever the registry says.
#[must_use]
pub fn classify_exception(deployment: &ComponentDeployment, exception: &BeanException) -> ExceptionType {
    if exception.kind() == BeanException::PANIC {
        return ExceptionType::System;
    }
    deployment.exception_type(exception.kind())
}

/// Converts a caught panic payload into a system exception of kind
/// [`BeanException::PANIC`].
#[must_use]
pub fn exception_from_panic(payload: &(dyn Any + Send)) -> BeanException {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    BeanException::new(BeanException::PANIC, message)
}
