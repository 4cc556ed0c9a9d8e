//! Bounded pool of reusable objects with blocking acquisition.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Pool acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no instance available after waiting {waited:?}")]
    Timeout { waited: Duration },
    #[error("pool is closed")]
    Closed,
}

struct PoolState<T> {
    /// Idle objects, oldest at the front. Reuse takes from the back.
    idle: VecDeque<(T, Instant)>,
    /// Permits currently held by callers.
    borrowed: usize,
    closed: bool,
}

/// A pool of up to `max` objects.
///
/// In strict mode at most `max` permits are outstanding and acquisition
/// blocks until one is returned. In non-strict mode permits are unbounded
/// and only the idle set is capped at `max`. All bookkeeping happens under a
/// single mutex, so borrow, return and discard are linearizable.
pub struct Pool<T> {
    state: Mutex<PoolState<T>>,
    available: Condvar,
    returned: Condvar,
    max: usize,
    min: usize,
    strict: bool,
}

impl<T> Pool<T> {
    #[must_use]
    pub fn new(max: usize, min: usize, strict: bool) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(max),
                borrowed: 0,
                closed: false,
            }),
            available: Condvar::new(),
            returned: Condvar::new(),
            max,
            min: min.min(max),
            strict,
        }
    }

    /// Takes a permit, waiting at most `timeout` in strict mode.
    ///
    /// Returns the most recently used idle object, or `None` when the caller
    /// holds a permit but must build a new object.
    ///
    /// # Errors
    ///
    /// `PoolError::Timeout` when no permit frees up in time,
    /// `PoolError::Closed` once the pool has been closed.
    pub fn acquire(&self, timeout: Duration) -> Result<Option<T>, PoolError> {
        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some((object, _)) = state.idle.pop_back() {
                state.borrowed += 1;
                return Ok(Some(object));
            }
            if !self.strict || state.borrowed < self.max {
                state.borrowed += 1;
                return Ok(None);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    return Err(PoolError::Timeout {
                        waited: start.elapsed(),
                    });
                }
                Some(deadline) => {
                    self.available.wait_until(&mut state, deadline);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Returns a borrowed object and its permit.
    ///
    /// Gives the object back when it cannot be kept (pool closed or idle set
    /// full); the caller must destroy it. Never blocks on capacity.
    pub fn release(&self, object: T) -> Option<T> {
        let mut state = self.state.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
        let rejected = if state.closed || state.idle.len() >= self.max {
            Some(object)
        } else {
            state.idle.push_back((object, Instant::now()));
            None
        };
        drop(state);
        self.available.notify_all();
        self.returned.notify_all();
        rejected
    }

    /// Gives up a permit whose object was destroyed or never built.
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
        drop(state);
        self.available.notify_all();
        self.returned.notify_all();
    }

    /// Adds a freshly built object straight to the idle set without a permit.
    /// Gives it back when the pool is closed or full.
    pub fn offer(&self, object: T) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed || state.idle.len() + state.borrowed >= self.max {
            return Some(object);
        }
        state.idle.push_back((object, Instant::now()));
        drop(state);
        self.available.notify_one();
        None
    }

    /// Closes the pool and hands back every idle object. Waiting and future
    /// acquirers fail with `PoolError::Closed`.
    pub fn close(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.closed = true;
        let idle = state.idle.drain(..).map(|(object, _)| object).collect();
        drop(state);
        self.available.notify_all();
        idle
    }

    /// Waits until every borrowed object has come back. Returns `false` on timeout.
    pub fn wait_for_borrowed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.borrowed > 0 {
            match deadline {
                Some(deadline) => {
                    if self.returned.wait_until(&mut state, deadline).timed_out() {
                        return state.borrowed == 0;
                    }
                }
                None => self.returned.wait(&mut state),
            }
        }
        true
    }

    /// Removes objects idle for longer than `idle_timeout`, oldest first,
    /// keeping at least `min` in the pool.
    pub fn evict_idle(&self, idle_timeout: Duration) -> Vec<T> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut evicted = Vec::new();
        while state.idle.len() + state.borrowed > self.min {
            match state.idle.front() {
                Some((_, since)) if now.duration_since(*since) > idle_timeout => {
                    if let Some((object, _)) = state.idle.pop_front() {
                        evicted.push(object);
                    }
                }
                _ => break,
            }
        }
        evicted
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    #[must_use]
    pub fn borrowed_count(&self) -> usize {
        self.state.lock().borrowed
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    #[must_use]
    pub fn min(&self) -> usize {
        self.min
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn strict_pool_times_out_at_capacity() {
        let pool: Pool<u32> = Pool::new(1, 0, true);
        assert_eq!(pool.acquire(Duration::from_millis(10)), Ok(None));
        let start = Instant::now();
        let err = pool.acquire(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, PoolError::Timeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn zero_timeout_fails_immediately_when_full() {
        let pool: Pool<u32> = Pool::new(1, 0, true);
        pool.acquire(Duration::ZERO).unwrap();
        assert!(matches!(
            pool.acquire(Duration::ZERO),
            Err(PoolError::Timeout { .. })
        ));
    }

    #[test]
    fn release_wakes_waiter_with_same_object() {
        let pool: Arc<Pool<u32>> = Arc::new(Pool::new(1, 0, true));
        assert_eq!(pool.acquire(Duration::from_secs(1)), Ok(None));

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(pool.release(7).is_none());
        assert_eq!(waiter.join().unwrap(), Ok(Some(7)));
        assert_eq!(pool.borrowed_count(), 1);
    }

    #[test]
    fn reuse_is_most_recent_first() {
        let pool: Pool<u32> = Pool::new(3, 0, true);
        for _ in 0..2 {
            pool.acquire(Duration::ZERO).unwrap();
        }
        pool.release(1);
        pool.release(2);
        assert_eq!(pool.acquire(Duration::ZERO), Ok(Some(2)));
    }

    #[test]
    fn non_strict_pool_never_blocks_but_caps_idle() {
        let pool: Pool<u32> = Pool::new(1, 0, false);
        assert_eq!(pool.acquire(Duration::ZERO), Ok(None));
        assert_eq!(pool.acquire(Duration::ZERO), Ok(None));
        assert_eq!(pool.borrowed_count(), 2);
        assert!(pool.release(1).is_none());
        assert_eq!(pool.release(2), Some(2));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn close_fails_waiters_and_rejects_returns() {
        let pool: Arc<Pool<u32>> = Arc::new(Pool::new(1, 0, true));
        pool.acquire(Duration::ZERO).unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(pool.close().is_empty());
        assert_eq!(waiter.join().unwrap(), Err(PoolError::Closed));
        assert_eq!(pool.release(3), Some(3));
        assert!(pool.wait_for_borrowed(Duration::ZERO));
    }

    #[test]
    fn wait_for_borrowed_times_out() {
        let pool: Pool<u32> = Pool::new(2, 0, true);
        pool.acquire(Duration::ZERO).unwrap();
        assert!(!pool.wait_for_borrowed(Duration::from_millis(20)));
        pool.discard();
        assert!(pool.wait_for_borrowed(Duration::ZERO));
    }

    #[test]
    fn evict_keeps_min_and_newest() {
        let pool: Pool<u32> = Pool::new(4, 1, true);
        for i in 0..3 {
            assert!(pool.offer(i).is_none());
        }
        thread::sleep(Duration::from_millis(5));
        let evicted = pool.evict_idle(Duration::ZERO);
        assert_eq!(evicted, vec![0, 1]);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn offer_respects_capacity() {
        let pool: Pool<u32> = Pool::new(1, 0, true);
        assert!(pool.offer(1).is_none());
        assert_eq!(pool.offer(2), Some(2));
    }
}
