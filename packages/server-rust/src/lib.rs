//! `IronBean` container: stateless component pooling, interceptor chains,
//! transaction policy and synchronous call dispatch.

pub mod config;
pub mod container;
pub mod deployment;
pub mod interceptor;
pub mod pool;
pub mod security;
pub mod thread_context;
pub mod traits;
pub mod tx;

pub use config::{ConfigError, ContainerConfig, PoolConfig};
pub use container::{
    BeanException, CallArgs, ContainerError, ContainerState, DeploymentState, InvocationRequest,
    InvocationResponse, ProxyInfo, ServiceProvider, StatelessContainer,
};
pub use deployment::{ComponentDeployment, DeploymentBuilder, DeploymentId, MethodPermission};
pub use interceptor::{InterceptorData, InterceptorInstance, InvocationContext, MessageContext};
pub use security::RoleBasedSecurityService;
pub use thread_context::{CallContext, ThreadContext};
pub use traits::{PermitAll, SecurityService, TransactionManager};
pub use tx::{LocalTransactionManager, TransactionError, TransactionId};
