//! Cache notifications
//!
//! Events are collected while the store lock is held and delivered to
//! listeners only after it is released, so a listener always observes the
//! committed state and may call back into the store.

use std::sync::Arc;
use std::time::Duration;

use crate::key::{CacheKey, ContentType};

/// Something observable happened in the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit { key: CacheKey, latency: Duration },
    Miss { key: CacheKey },
    Evicted { key: CacheKey, content_type: ContentType },
    Compressed { key: CacheKey, saved_bytes: usize },
    Corrupted { key: CacheKey },
}

/// Callback invoked for each cache event
pub type CacheListener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;
