//! Instance pooling: the bounded pool primitive, pooled instances, the
//! per-deployment instance manager and its background helpers.

pub mod bounded;
pub mod executor;
pub mod instance;
pub mod manager;
pub mod sweeper;

pub use bounded::{Pool, PoolError};
pub use executor::CallbackExecutor;
pub use instance::{CreationalContext, PooledInstance};
pub use manager::{InstanceManager, PoolStats};
pub use sweeper::PoolSweeper;
