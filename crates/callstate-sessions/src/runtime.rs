//! Fixed worker pool fed by bounded inboxes.
//!
//! Items are routed to workers by a caller-supplied route key, so items that
//! share a key are handled in submission order. Each worker owns a bounded
//! inbox; overflow follows the pool's [`OverflowPolicy`] and is counted, never
//! blocking the producer.
//!
//! # Lifecycle
//!
//! 1. `WorkerPool::start(config, handler)` spawns the workers.
//! 2. `submit()` routes items to a worker inbox.
//! 3. `shutdown()` (or drop) lets workers drain their inboxes and joins them.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use callstate_types::OverflowPolicy;
use tracing::error;

use crate::bounded_queue::{BoundedQueue, PushResult};
use crate::error::{SessionError, SessionResult};

/// How long an idle worker parks before re-checking its inbox.
const IDLE_PARK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Thread name prefix.
    pub name: String,
    pub workers: usize,
    /// Total capacity, split evenly across worker inboxes.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

/// Routes items to workers by route key.
#[derive(Debug, Clone, Copy)]
pub struct PoolRouter {
    workers: usize,
}

impl PoolRouter {
    pub fn new(workers: usize) -> SessionResult<Self> {
        if workers == 0 {
            return Err(SessionError::InvalidArgument(
                "worker count must be positive".to_string(),
            ));
        }
        Ok(Self { workers })
    }

    pub fn route(&self, route_key: u64) -> usize {
        (route_key % self.workers as u64) as usize
    }
}

#[derive(Debug, Default)]
struct PoolShared {
    stopping: AtomicBool,
    pending: AtomicUsize,
    dropped: AtomicU64,
}

pub struct WorkerPool<T: Send + 'static> {
    router: PoolRouter,
    inboxes: Vec<Arc<BoundedQueue<T>>>,
    threads: Vec<Thread>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawns `config.workers` threads running `handler` on each item.
    ///
    /// Fails with `InvalidArgument` when `config.workers` is 0.
    pub fn start<F>(config: &PoolConfig, handler: F) -> SessionResult<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let router = PoolRouter::new(config.workers)?;
        let per_worker = config.queue_capacity.div_ceil(config.workers).max(1);
        let handler = Arc::new(handler);

        let mut pool = Self {
            router,
            inboxes: Vec::with_capacity(config.workers),
            threads: Vec::with_capacity(config.workers),
            handles: Vec::with_capacity(config.workers),
            shared: Arc::new(PoolShared::default()),
        };

        for worker_id in 0..config.workers {
            let inbox = Arc::new(BoundedQueue::new(per_worker, config.overflow));
            let worker_inbox = Arc::clone(&inbox);
            let shared = Arc::clone(&pool.shared);
            let handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("{}-{worker_id}", config.name))
                .spawn(move || Self::worker_loop(&worker_inbox, &shared, handler.as_ref()))
                .map_err(|e| SessionError::Internal(format!("failed to spawn worker: {e}")))?;

            pool.inboxes.push(inbox);
            pool.threads.push(handle.thread().clone());
            pool.handles.push(handle);
        }

        Ok(pool)
    }

    fn worker_loop<F: Fn(T)>(inbox: &BoundedQueue<T>, shared: &PoolShared, handler: &F) {
        loop {
            if let Some(item) = inbox.try_pop() {
                if catch_unwind(AssertUnwindSafe(|| handler(item))).is_err() {
                    error!("worker handler panicked");
                }
                shared.pending.fetch_sub(1, Ordering::AcqRel);
                continue;
            }
            if shared.stopping.load(Ordering::Acquire) {
                break;
            }
            thread::park_timeout(IDLE_PARK);
        }
    }

    /// Queues `item` on the worker selected by `route_key`.
    ///
    /// Returns the item lost to overflow, if any.
    pub fn submit(&self, route_key: u64, item: T) -> PushResult<T> {
        let worker = self.router.route(route_key);
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let result = self.inboxes[worker].push(item);
        if !matches!(result, PushResult::Ok) {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.threads[worker].unpark();
        result
    }

    /// Items queued or being handled.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Items lost to overflow since start.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Waits until every queued item has been handled. Returns `false` on
    /// timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn worker_count(&self) -> usize {
        self.inboxes.len()
    }

    /// Stops the workers after they drain their inboxes. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.stopping.store(true, Ordering::Release);
        for thread in &self.threads {
            thread.unpark();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
