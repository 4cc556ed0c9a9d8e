//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ironbean_container::{
    ContainerConfig, DeploymentId, InvocationRequest, LocalTransactionManager, PermitAll,
    StatelessContainer, TransactionManager,
};
use ironbean_core::{Method, Value};

/// Small, fast configuration: no sweeper, one callback thread.
pub fn config(max_size: usize, access_timeout: Duration) -> ContainerConfig {
    let mut config = ContainerConfig::default();
    config.access_timeout = access_timeout;
    config.close_timeout = Duration::from_millis(500);
    config.callback_threads = 1;
    config.pool.max_size = max_size;
    config.pool.sweep_interval = Duration::ZERO;
    config
}

pub fn container(config: ContainerConfig) -> (StatelessContainer, Arc<LocalTransactionManager>) {
    let tm = Arc::new(LocalTransactionManager::new());
    let container = StatelessContainer::new(
        "it",
        config,
        Arc::new(PermitAll),
        Arc::clone(&tm) as Arc<dyn TransactionManager>,
    )
    .expect("container starts");
    (container, tm)
}

pub fn call(deployment: &str, method: &str, args: Vec<Value>) -> InvocationRequest {
    InvocationRequest::business(deployment, Method::business(format!("{deployment}Local"), method), args)
}

pub fn id(deployment: &str) -> DeploymentId {
    DeploymentId::from(deployment)
}
