//! Render requests and their priority queue
//!
//! Requests are dequeued highest priority first and FIFO within a priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use pdf_editor_render::RenderQuality;

use crate::lock;

/// Render request priority
///
/// Higher variants are serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RenderPriority {
    /// Speculative prerendering
    Background = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    /// The page the user is looking at right now
    Critical = 4,
}

/// Unique, monotonically increasing request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of render work
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub id: RequestId,
    pub page: u32,
    pub scale: f64,
    /// Rotation in degrees
    pub rotation: u16,
    pub quality: RenderQuality,
    pub priority: RenderPriority,
    /// Requested output size in pixels, when the caller needs a fixed size
    pub target_size: Option<(u32, u32)>,
    pub enqueued_at: Instant,
    /// Document generation the request was issued for
    pub generation: u64,

    /// Insertion order (used for FIFO within same priority)
    insertion_order: u64,
}

impl RenderRequest {
    pub fn new(id: RequestId, page: u32, scale: f64) -> Self {
        Self {
            id,
            page,
            scale,
            rotation: 0,
            quality: RenderQuality::Normal,
            priority: RenderPriority::Normal,
            target_size: None,
            enqueued_at: Instant::now(),
            generation: 0,
            insertion_order: 0,
        }
    }

    pub fn with_rotation(mut self, rotation: u16) -> Self {
        self.rotation = rotation % 360;
        self
    }

    pub fn with_quality(mut self, quality: RenderQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_priority(mut self, priority: RenderPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target_size(mut self, target_size: Option<(u32, u32)>) -> Self {
        self.target_size = target_size;
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// DPI handed to the renderer
    pub fn dpi(&self) -> f64 {
        self.quality.dpi(self.scale)
    }
}

impl PartialEq for RenderRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RenderRequest {}

impl PartialOrd for RenderRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RenderRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Thread-safe priority queue of render requests
pub struct PriorityQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    heap: BinaryHeap<RenderRequest>,
    insertion_counter: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                insertion_counter: 0,
            }),
        }
    }

    /// Push a request, stamping its insertion order and enqueue time
    pub fn push(&self, mut request: RenderRequest) {
        let mut state = lock(&self.state);
        request.insertion_order = state.insertion_counter;
        request.enqueued_at = Instant::now();
        state.insertion_counter += 1;
        state.heap.push(request);
    }

    pub fn pop(&self) -> Option<RenderRequest> {
        lock(&self.state).heap.pop()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).heap.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).heap.is_empty()
    }

    /// Remove and return every request matching a predicate
    pub fn drain_where<F>(&self, predicate: F) -> Vec<RenderRequest>
    where
        F: Fn(&RenderRequest) -> bool,
    {
        let mut state = lock(&self.state);
        let (removed, remaining): (Vec<_>, Vec<_>) =
            state.heap.drain().partition(|request| predicate(request));
        state.heap = remaining.into_iter().collect();
        removed
    }

    /// Snapshot of queued requests in arbitrary order
    pub fn requests(&self) -> Vec<RenderRequest> {
        lock(&self.state).heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64, priority: RenderPriority) -> RenderRequest {
        RenderRequest::new(RequestId(id), id as u32, 1.0).with_priority(priority)
    }

    #[test]
    fn test_priority_ordering() {
        assert!(RenderPriority::Critical > RenderPriority::High);
        assert!(RenderPriority::High > RenderPriority::Normal);
        assert!(RenderPriority::Normal > RenderPriority::Low);
        assert!(RenderPriority::Low > RenderPriority::Background);
    }

    #[test]
    fn test_priority_queue_basic() {
        let queue = PriorityQueue::new();
        assert!(queue.is_empty());

        queue.push(request(1, RenderPriority::Normal));
        assert_eq!(queue.len(), 1);

        let popped = queue.pop().unwrap();
        assert_eq!(popped.id, RequestId(1));
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_priority_first_then_fifo() {
        let queue = PriorityQueue::new();
        queue.push(request(1, RenderPriority::Background));
        queue.push(request(2, RenderPriority::Critical));
        queue.push(request(3, RenderPriority::Normal));
        queue.push(request(4, RenderPriority::Normal));
        queue.push(request(5, RenderPriority::Critical));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|r| r.id.0).collect();
        assert_eq!(order, vec![2, 5, 3, 4, 1]);
    }

    #[test]
    fn test_drain_where() {
        let queue = PriorityQueue::new();
        for id in 1..=6 {
            queue.push(request(id, RenderPriority::Normal));
        }
        let removed = queue.drain_where(|r| r.id.0 % 2 == 0);
        assert_eq!(removed.len(), 3);
        assert_eq!(queue.len(), 3);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|r| r.id.0).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[test]
    fn test_rotation_is_normalized() {
        let r = RenderRequest::new(RequestId(1), 0, 1.0).with_rotation(450);
        assert_eq!(r.rotation, 90);
        assert_eq!(r.dpi(), 72.0);
    }
}
