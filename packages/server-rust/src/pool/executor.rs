//! Fixed pool of worker threads for destruction callbacks.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

type Job = Box<dyn FnOnce() + Send>;

struct ExecutorInner {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    idle_cond: Condvar,
    shutdown: AtomicBool,
    active: AtomicUsize,
}

/// Runs pre-destroy work for evicted and undeployed instances off the
/// calling thread.
///
/// Workers are named `ironbean-callback-0`, `ironbean-callback-1`, ...
pub struct CallbackExecutor {
    inner: Arc<ExecutorInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CallbackExecutor {
    /// Starts `threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(threads: usize) -> anyhow::Result<Self> {
        let inner = Arc::new(ExecutorInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            idle_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        });

        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("ironbean-callback-{i}"))
                .spawn(move || worker_loop(&inner))?;
            workers.push(handle);
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Queues `job`. After shutdown the job runs on the calling thread so
    /// that cleanup is never lost.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            run_job(Box::new(job));
            return;
        }
        self.inner.queue.lock().push_back(Box::new(job));
        self.inner.work_ready.notify_one();
    }

    /// Waits until the queue is empty and no job is running. Returns `false`
    /// on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active.load(Ordering::Acquire) > 0 {
            match deadline {
                Some(deadline) => {
                    if self.inner.idle_cond.wait_until(&mut queue, deadline).timed_out() {
                        return queue.is_empty() && self.inner.active.load(Ordering::Acquire) == 0;
                    }
                }
                None => self.inner.idle_cond.wait(&mut queue),
            }
        }
        true
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Signals workers to finish the queue and exit, then joins them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("callback worker exited with a panic");
            }
        }
    }
}

impl Drop for CallbackExecutor {
    fn drop(&mut self) {
        if !self.inner.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

/// Decrements the active count and wakes idle waiters, even if a job panics.
struct ActiveJobGuard<'a> {
    inner: &'a ExecutorInner,
}

impl Drop for ActiveJobGuard<'_> {
    fn drop(&mut self) {
        let previous = self.inner.active.fetch_sub(1, Ordering::Release);
        if previous == 1 {
            let queue = self.inner.queue.lock();
            if queue.is_empty() {
                self.inner.idle_cond.notify_all();
            }
        }
    }
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("callback job panicked");
    }
}

fn worker_loop(inner: &ExecutorInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.active.fetch_add(1, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };
        let _guard = ActiveJobGuard { inner };
        run_job(job);
    }
}
