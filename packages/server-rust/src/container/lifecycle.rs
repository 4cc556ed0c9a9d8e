//! Container lifecycle state with in-flight call tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions and an atomic counter with
//! RAII guards for accurate in-flight call tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

/// Container state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ContainerState {
    /// Constructed; calls are not accepted yet.
    Starting,
    /// Accepting calls.
    Ready,
    /// Shutting down; new calls are rejected, in-flight calls finish.
    Draining,
    /// All in-flight calls completed.
    Stopped,
}

/// Tracks the container state and the number of calls in progress.
#[derive(Debug)]
pub struct LifecycleController {
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<ContainerState>,
}

impl LifecycleController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(ContainerState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(ContainerState::Ready));
    }

    /// Moves to `Draining`; subsequent [`try_enter`](Self::try_enter) calls fail.
    pub fn begin_drain(&self) {
        self.state.store(Arc::new(ContainerState::Draining));
    }

    #[must_use]
    pub fn state(&self) -> ContainerState {
        **self.state.load()
    }

    /// Registers a new in-flight call. Returns `None` unless the container is `Ready`.
    ///
    /// The counter is raised before the state is checked, so a drain that
    /// starts concurrently either rejects the call or waits for it.
    #[must_use]
    pub fn try_enter(&self) -> Option<InFlightGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        };
        (self.state() == ContainerState::Ready).then_some(guard)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits for all in-flight calls to complete, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` if the calls drained. Returns
    /// `false` if the timeout expired (state remains `Draining`).
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                self.state.store(Arc::new(ContainerState::Stopped));
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            // Poll at 10ms intervals to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped, including
/// during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_starting_ready_draining_stopped() {
        let controller = LifecycleController::new();
        assert_eq!(controller.state(), ContainerState::Starting);
        controller.set_ready();
        assert_eq!(controller.state(), ContainerState::Ready);
        controller.begin_drain();
        assert_eq!(controller.state(), ContainerState::Draining);
        assert!(controller.wait_for_drain(Duration::from_millis(100)));
        assert_eq!(controller.state(), ContainerState::Stopped);
    }

    #[test]
    fn enter_requires_ready() {
        let controller = LifecycleController::new();
        assert!(controller.try_enter().is_none());
        assert_eq!(controller.in_flight_count(), 0);

        controller.set_ready();
        let guard = controller.try_enter().unwrap();
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard);
        assert_eq!(controller.in_flight_count(), 0);

        controller.begin_drain();
        assert!(controller.try_enter().is_none());
    }

    #[test]
    fn drain_waits_for_active_calls() {
        let controller = Arc::new(LifecycleController::new());
        controller.set_ready();
        let guard = controller.try_enter().unwrap();
        controller.begin_drain();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(guard);
        });
        assert!(controller.wait_for_drain(Duration::from_secs(2)));
        releaser.join().unwrap();
    }

    #[test]
    fn drain_times_out() {
        let controller = LifecycleController::new();
        controller.set_ready();
        let _guard = controller.try_enter().unwrap();
        controller.begin_drain();
        assert!(!controller.wait_for_drain(Duration::from_millis(30)));
        assert_eq!(controller.state(), ContainerState::Draining);
    }
}
