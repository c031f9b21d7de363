use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),

    #[error("Worker pool is closed")]
    Closed,
}

/// Fixed-size background pool shared by every container a manager builds.
///
/// Once [`WorkerPool::shutdown`] is called the pool rejects new work, waits for
/// in-flight jobs (bounded by a timeout) and then releases its threads.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    pool: RwLock<Option<Arc<ThreadPool>>>,
    closed: AtomicBool,
    in_flight: Mutex<usize>,
    idle: Condvar,
    size: usize,
}

/// Decrements the in-flight count when a job finishes, panicking or not.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut count = self
            .0
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("trellis-worker-{}", i))
            .panic_handler(|_| tracing::error!("Worker task panicked"))
            .build()?;

        tracing::debug!("Started worker pool with {} threads", num_threads);

        Ok(Self {
            inner: Arc::new(Inner {
                pool: RwLock::new(Some(Arc::new(pool))),
                closed: AtomicBool::new(false),
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
                size: num_threads,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Jobs accepted but not yet finished.
    pub fn in_flight(&self) -> usize {
        *self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a job on the pool without waiting for it.
    pub fn spawn<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let pool = self
            .inner
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Closed)?;

        *self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        let tracker = InFlight(Arc::clone(&self.inner));

        pool.spawn(move || {
            let _tracker = tracker;
            f();
        });
        Ok(())
    }

    /// Reject new work, wait up to `timeout` for in-flight jobs, then release
    /// the threads. Returns `false` if jobs were still running at the deadline.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut count = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            count = self
                .inner
                .idle
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let drained = *count == 0;
        drop(count);

        if !drained {
            tracing::warn!("Worker pool shut down with jobs still running");
        }

        // rayon threads exit once the last handle to the pool is gone
        self.inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        tracing::debug!("Worker pool shut down");
        drained
    }
}
