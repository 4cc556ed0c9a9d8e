//! Background thread that periodically evicts idle pooled instances.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::pool::InstanceManager;

/// Commands accepted by the sweeper thread.
#[derive(Debug)]
enum SweepTask {
    /// Sweep now instead of waiting for the next tick.
    RunNow,
    Stop,
}

/// Calls [`InstanceManager::sweep_idle`] every `interval` until stopped or
/// until the manager is dropped.
pub struct PoolSweeper {
    tx: Option<mpsc::Sender<SweepTask>>,
    handle: Option<JoinHandle<()>>,
}

impl PoolSweeper {
    /// Starts the sweeper thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(manager: Weak<InstanceManager>, interval: Duration) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("ironbean-pool-sweeper".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Ok(SweepTask::RunNow) | Err(RecvTimeoutError::Timeout) => {
                        let Some(manager) = manager.upgrade() else {
                            return;
                        };
                        let evicted = manager.sweep_idle();
                        if evicted > 0 {
                            debug!(evicted, "idle sweep complete");
                        }
                    }
                    Ok(SweepTask::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Requests an immediate sweep.
    pub fn trigger(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(SweepTask::RunNow);
        }
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SweepTask::Stop);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("pool sweeper exited with a panic");
            }
        }
    }
}

impl Drop for PoolSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use ironbean_core::RequestContext;

    use super::*;
    use crate::config::ContainerConfig;
    use crate::deployment::ComponentDeployment;
    use crate::pool::CallbackExecutor;
    use crate::thread_context::CallContext;

    struct Bean;

    #[test]
    fn periodic_sweep_evicts_expired_instances() {
        let mut config = ContainerConfig::default();
        config.pool.idle_timeout = Duration::from_millis(1);
        let manager = Arc::new(InstanceManager::new(
            config,
            Arc::new(CallbackExecutor::new(1).unwrap()),
        ));
        let deployment = Arc::new(
            ComponentDeployment::builder("Idle", "IdleBean")
                .bean(|_| Ok(Bean))
                .build()
                .unwrap(),
        );
        manager.deploy(Arc::clone(&deployment)).unwrap();
        let call = CallContext::new(Arc::clone(&deployment), None, RequestContext::anonymous());
        let instance = manager.get_instance(&call).unwrap();
        manager.pool_instance(&call, instance);

        let mut sweeper = PoolSweeper::start(Arc::downgrade(&manager), Duration::from_millis(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.stats(deployment.id()).unwrap().idle > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        sweeper.stop();
        assert_eq!(manager.stats(deployment.id()).unwrap().idle, 0);
    }

    #[test]
    fn exits_when_manager_is_dropped() {
        let manager = Arc::new(InstanceManager::new(
            ContainerConfig::default(),
            Arc::new(CallbackExecutor::new(1).unwrap()),
        ));
        let mut sweeper = PoolSweeper::start(Arc::downgrade(&manager), Duration::from_secs(60)).unwrap();
        drop(manager);
        sweeper.trigger();
        sweeper.stop();
        assert!(sweeper.handle.is_none());
    }
}
