//! Interceptor metadata, per-call chains and the built-in statistics interceptor.

pub mod context;
pub mod data;
pub mod stack;
pub mod stats;

pub use context::{InvocationContext, MessageContext, ServiceMessage};
pub use data::{
    InterceptorData, InterceptorHandler, InterceptorInstance, InterceptorInstances,
    InterceptorMethod,
};
pub use stack::InterceptorStack;
pub use stats::{InvocationStats, MethodStats, StatsInterceptor};
