//! PDF Editor Scheduler Library
//!
//! Render request scheduling with a priority queue, cooperative
//! cancellation and a worker pool.
//!
//! Requests are ordered by priority (Critical down to Background) and
//! serviced FIFO within each priority level.

use std::sync::{Mutex, MutexGuard};

mod cancel;
mod priority;
mod scheduler;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::{PriorityQueue, RenderPriority, RenderRequest, RequestId};
pub use scheduler::{RequestScheduler, SchedulerStats};
pub use worker::{RequestExecutor, WorkerPool, WorkerPoolConfig};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
