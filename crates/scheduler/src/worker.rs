//! Render worker pool
//!
//! Workers pull requests from the [`RequestScheduler`], run them through an
//! executor callback and mark them complete. The number of requests allowed
//! to run at once can be changed while the pool is running.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::{CancellationToken, RenderRequest, RequestScheduler};

/// Callback that executes one dispatched request
///
/// The callback owns the request and receives its cancellation token. It
/// runs on a worker thread and may block.
pub type RequestExecutor = Arc<dyn Fn(RenderRequest, CancellationToken) + Send + Sync>;

/// Configuration for the render worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Maximum time a worker will wait before looking for work again.
    /// Default: 10ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// State shared by the pool and its worker threads
struct Shared {
    scheduler: Arc<RequestScheduler>,
    executor: RequestExecutor,
    shutdown: AtomicBool,
    paused: AtomicBool,
    max_active: AtomicUsize,
    active: AtomicUsize,
    poll_interval: Duration,
}

impl Shared {
    /// Claim an execution slot if the concurrency limit allows it
    fn try_acquire(&self) -> Option<SlotGuard<'_>> {
        let limit = self.max_active.load(Ordering::Acquire);
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < limit).then_some(active + 1)
            })
            .ok()
            .map(|_| SlotGuard { active: &self.active })
    }
}

/// Releases an execution slot when dropped, even if the executor panics
struct SlotGuard<'a> {
    active: &'a AtomicUsize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pool of render worker threads
///
/// # Example
///
/// ```
/// use pdf_editor_scheduler::{CancellationToken, RenderRequest, RequestScheduler, WorkerPool, WorkerPoolConfig};
/// use std::sync::Arc;
///
/// let scheduler = Arc::new(RequestScheduler::new());
/// let executor = Arc::new(|request: RenderRequest, token: CancellationToken| {
///     if token.is_cancelled() {
///         return;
///     }
///     println!("rendering page {} at {} dpi", request.page, request.dpi());
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2));
/// scheduler.submit(RenderRequest::new(scheduler.allocate_id(), 0, 1.0));
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create and start a new worker pool.
    pub fn new(
        scheduler: Arc<RequestScheduler>,
        executor: RequestExecutor,
        config: WorkerPoolConfig,
    ) -> Self {
        let num_workers = config.num_workers.max(1);
        let shared = Arc::new(Shared {
            scheduler,
            executor,
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            max_active: AtomicUsize::new(num_workers),
            active: AtomicUsize::new(0),
            poll_interval: config.poll_interval,
        });

        let mut pool = Self {
            workers: Vec::with_capacity(num_workers),
            shared,
        };
        pool.grow(num_workers);
        pool
    }

    /// Spawn additional worker threads
    pub fn grow(&mut self, additional: usize) {
        for _ in 0..additional {
            let id = self.workers.len();
            if let Some(worker) = Worker::spawn(id, Arc::clone(&self.shared)) {
                self.workers.push(worker);
            }
        }
    }

    /// Change how many requests may run at once
    ///
    /// Spawns threads when the new limit exceeds the current pool size.
    /// Lowering the limit takes effect as running requests finish.
    pub fn set_max_concurrency(&mut self, limit: usize) {
        let limit = limit.max(1);
        self.shared.max_active.store(limit, Ordering::Release);
        if limit > self.workers.len() {
            self.grow(limit - self.workers.len());
        }
        debug!(limit, workers = self.workers.len(), "worker concurrency changed");
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_active.load(Ordering::Acquire)
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of requests executing right now
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Stop dispatching new requests; running ones finish normally
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Signal all workers to stop and wait for them to exit.
    pub fn shutdown(self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for worker in self.workers {
            worker.join();
        }
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(id: usize, shared: Arc<Shared>) -> Option<Self> {
        match thread::Builder::new()
            .name(format!("pdf-render-worker-{}", id))
            .spawn(move || Self::run(&shared))
        {
            Ok(thread) => Some(Self {
                id,
                thread: Some(thread),
            }),
            Err(err) => {
                error!(id, error = %err, "failed to spawn render worker");
                None
            }
        }
    }

    fn run(shared: &Shared) {
        while !shared.shutdown.load(Ordering::Acquire) {
            if shared.paused.load(Ordering::Acquire) {
                thread::sleep(shared.poll_interval);
                continue;
            }

            let Some(slot) = shared.try_acquire() else {
                thread::sleep(shared.poll_interval);
                continue;
            };

            match shared.scheduler.next_request() {
                Some((request, token)) => {
                    let id = request.id;
                    if !token.is_cancelled() {
                        (shared.executor)(request, token);
                    }
                    shared.scheduler.complete(id);
                }
                None => {
                    drop(slot);
                    thread::sleep(shared.poll_interval);
                }
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(id = self.id, "render worker panicked");
            }
        }
    }
}

/// Get the number of logical CPU cores.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
