//! Container facade: deployment registry, lifecycle and per-call dispatch.

pub mod classify;
pub mod dispatch;
pub mod lifecycle;
pub mod operation;
pub mod registry;

pub use classify::{classify_exception, exception_from_panic};
pub use dispatch::StatelessContainer;
pub use lifecycle::{ContainerState, InFlightGuard, LifecycleController};
pub use operation::{
    BeanException, CallArgs, ContainerError, InvocationRequest, InvocationResponse, ProxyInfo,
    ServiceProvider,
};
pub use registry::{DeployedComponent, DeploymentRegistry, DeploymentState};
