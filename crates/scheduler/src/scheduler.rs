//! Request scheduler
//!
//! Owns the priority queue and the cancellation registry and tracks the
//! lifecycle of every request: queued, dispatched, completed or cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::lock;
use crate::priority::{PriorityQueue, RenderRequest, RequestId};

/// Request scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total requests submitted
    pub submitted: u64,

    /// Total requests that finished on a worker
    pub completed: u64,

    /// Total requests removed from the queue before dispatch
    pub cancelled: u64,

    /// Current queue size
    pub queue_size: usize,

    /// Requests currently running on a worker
    pub in_flight: usize,
}

/// Priority scheduler for render requests
///
/// # Example
///
/// ```
/// use pdf_editor_scheduler::{RenderPriority, RenderRequest, RequestScheduler};
///
/// let scheduler = RequestScheduler::new();
///
/// let low = scheduler.allocate_id();
/// scheduler.submit(RenderRequest::new(low, 4, 1.0).with_priority(RenderPriority::Background));
/// let urgent = scheduler.allocate_id();
/// scheduler.submit(RenderRequest::new(urgent, 0, 1.0).with_priority(RenderPriority::Critical));
///
/// let (request, token) = scheduler.next_request().unwrap();
/// assert_eq!(request.id, urgent);
/// assert!(!token.is_cancelled());
/// scheduler.complete(request.id);
/// ```
pub struct RequestScheduler {
    queue: PriorityQueue,
    cancellation: CancellationRegistry,
    stats: Mutex<SchedulerStats>,
    next_id: AtomicU64,
}

impl RequestScheduler {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            cancellation: CancellationRegistry::new(),
            stats: Mutex::new(SchedulerStats::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the next request id
    pub fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a request and return its cancellation token
    pub fn submit(&self, request: RenderRequest) -> CancellationToken {
        let token = self.cancellation.register(request.id);
        debug!(id = %request.id, page = request.page, priority = ?request.priority, "queued render request");
        self.queue.push(request);
        lock(&self.stats).submitted += 1;
        token
    }

    /// Dispatch the highest priority request
    ///
    /// The request stays registered until [`RequestScheduler::complete`] is
    /// called, so it can still be cancelled while it runs.
    pub fn next_request(&self) -> Option<(RenderRequest, CancellationToken)> {
        let request = self.queue.pop()?;
        let token = self
            .cancellation
            .get(request.id)
            .unwrap_or_else(CancellationToken::cancelled);
        Some((request, token))
    }

    /// Mark a dispatched request as finished
    pub fn complete(&self, id: RequestId) {
        if self.cancellation.unregister(id) {
            lock(&self.stats).completed += 1;
        }
    }

    /// Cancel a request
    ///
    /// A queued request is removed outright. A dispatched request has its
    /// token cancelled so its result is dropped on arrival. Returns false
    /// for unknown or already completed ids.
    pub fn cancel(&self, id: RequestId) -> bool {
        let found = self.cancellation.cancel(id);
        let removed = self.queue.drain_where(|request| request.id == id);
        if !removed.is_empty() {
            self.cancellation.unregister(id);
            lock(&self.stats).cancelled += 1;
            return true;
        }
        found
    }

    /// Cancel every request matching a predicate, queued or dispatched
    pub fn cancel_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RenderRequest) -> bool,
    {
        let removed = self.queue.drain_where(predicate);
        for request in &removed {
            if let Some(token) = self.cancellation.get(request.id) {
                token.cancel();
            }
            self.cancellation.unregister(request.id);
        }
        if !removed.is_empty() {
            lock(&self.stats).cancelled += removed.len() as u64;
        }
        removed.len()
    }

    /// Cancel everything: drop the queue and flag every running request
    pub fn cancel_all(&self) -> usize {
        let flagged = self.cancellation.cancel_all();
        let removed = self.queue.drain_where(|_| true);
        for request in &removed {
            self.cancellation.unregister(request.id);
        }
        if !removed.is_empty() {
            lock(&self.stats).cancelled += removed.len() as u64;
        }
        debug!(queued = removed.len(), flagged, "cancelled all render requests");
        flagged
    }

    /// Whether a registered request has been cancelled
    pub fn is_cancelled(&self, id: RequestId) -> bool {
        self.cancellation
            .get(id)
            .map_or(false, |token| token.is_cancelled())
    }

    /// Number of queued requests
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of dispatched requests that have not completed
    pub fn in_flight(&self) -> usize {
        self.cancellation.len().saturating_sub(self.queue.len())
    }

    /// Snapshot of queued requests in arbitrary order
    pub fn pending_requests(&self) -> Vec<RenderRequest> {
        self.queue.requests()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = lock(&self.stats).clone();
        stats.queue_size = self.queue.len();
        stats.in_flight = self.in_flight();
        stats
    }

    pub fn reset_stats(&self) {
        *lock(&self.stats) = SchedulerStats::default();
    }
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RenderPriority;

    fn submit(scheduler: &RequestScheduler, page: u32, priority: RenderPriority) -> (RequestId, CancellationToken) {
        let id = scheduler.allocate_id();
        let token = scheduler.submit(RenderRequest::new(id, page, 1.0).with_priority(priority));
        (id, token)
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let scheduler = RequestScheduler::new();
        let a = scheduler.allocate_id();
        let b = scheduler.allocate_id();
        assert!(b > a);
    }

    #[test]
    fn test_services_priority_order() {
        let scheduler = RequestScheduler::new();
        let (bg, _) = submit(&scheduler, 1, RenderPriority::Background);
        let (crit, _) = submit(&scheduler, 2, RenderPriority::Critical);
        let (normal, _) = submit(&scheduler, 3, RenderPriority::Normal);

        let order: Vec<RequestId> = std::iter::from_fn(|| scheduler.next_request())
            .map(|(request, _)| request.id)
            .collect();
        assert_eq!(order, vec![crit, normal, bg]);
    }

    #[test]
    fn test_cancel_queued_request_removes_it() {
        let scheduler = RequestScheduler::new();
        let (id, token) = submit(&scheduler, 1, RenderPriority::Normal);

        assert!(scheduler.cancel(id));
        assert!(token.is_cancelled());
        assert_eq!(scheduler.queue_len(), 0);
        assert!(scheduler.next_request().is_none());
        assert_eq!(scheduler.stats().cancelled, 1);
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn test_cancel_dispatched_request_flags_token() {
        let scheduler = RequestScheduler::new();
        let (id, _) = submit(&scheduler, 1, RenderPriority::Normal);
        let (request, token) = scheduler.next_request().unwrap();
        assert_eq!(scheduler.in_flight(), 1);

        assert!(scheduler.cancel(id));
        assert!(token.is_cancelled());
        assert!(scheduler.is_cancelled(id));

        scheduler.complete(request.id);
        let stats = scheduler.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn test_cancel_all_covers_queued_and_running() {
        let scheduler = RequestScheduler::new();
        for page in 0..5 {
            submit(&scheduler, page, RenderPriority::Normal);
        }
        let (_, running) = scheduler.next_request().unwrap();

        assert_eq!(scheduler.cancel_all(), 5);
        assert!(running.is_cancelled());
        assert_eq!(scheduler.queue_len(), 0);
        assert_eq!(scheduler.stats().cancelled, 4);
    }

    #[test]
    fn test_cancel_where() {
        let scheduler = RequestScheduler::new();
        let tokens: Vec<_> = (0..6)
            .map(|page| submit(&scheduler, page, RenderPriority::Low).1)
            .collect();

        assert_eq!(scheduler.cancel_where(|r| r.page >= 3), 3);
        assert!(tokens[4].is_cancelled());
        assert!(!tokens[0].is_cancelled());
        assert_eq!(scheduler.pending_requests().len(), 3);
    }

    #[test]
    fn test_stats() {
        let scheduler = RequestScheduler::new();
        submit(&scheduler, 0, RenderPriority::Normal);
        submit(&scheduler, 1, RenderPriority::Normal);
        let stats = scheduler.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.queue_size, 2);

        scheduler.reset_stats();
        assert_eq!(scheduler.stats().submitted, 0);
    }
}
