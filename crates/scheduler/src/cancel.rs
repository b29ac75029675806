//! Cooperative cancellation for render requests
//!
//! A request that is still queued is cancelled by removing it. A request
//! that is already running keeps running; its token is flipped so that the
//! result is discarded when it arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::lock;
use crate::priority::RequestId;

/// Cancellation flag shared between the scheduler and a worker
///
/// # Example
///
/// ```
/// use pdf_editor_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A token that is cancelled from the start
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokens of every request that has been submitted and not yet completed
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Register a request and return its token
    pub fn register(&self, id: RequestId) -> CancellationToken {
        let token = CancellationToken::new();
        lock(&self.tokens).insert(id, token.clone());
        token
    }

    /// Cancel a request by id; returns false if it is not registered
    pub fn cancel(&self, id: RequestId) -> bool {
        match lock(&self.tokens).get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel several requests; returns how many were registered
    pub fn cancel_many(&self, ids: &[RequestId]) -> usize {
        let tokens = lock(&self.tokens);
        let mut cancelled = 0;
        for token in ids.iter().filter_map(|id| tokens.get(id)) {
            token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Cancel every registered request
    pub fn cancel_all(&self) -> usize {
        let tokens = lock(&self.tokens);
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    pub fn unregister(&self, id: RequestId) -> bool {
        lock(&self.tokens).remove(&id).is_some()
    }

    pub fn get(&self, id: RequestId) -> Option<CancellationToken> {
        lock(&self.tokens).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.tokens).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tokens).is_empty()
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
