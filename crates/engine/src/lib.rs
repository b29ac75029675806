//! PDF Editor Render Engine
//!
//! Ties the page cache, the request scheduler and the prefetch model into a
//! single rendering service.
//!
//! - [`RenderPipeline`] answers requests from the cache or schedules them on
//!   a worker pool, and funnels every result through one completion thread.
//! - [`PrerenderScheduler`] watches page views and queues background renders
//!   for pages the reader is likely to open next.
//! - A pressure thread samples memory use and compresses, collects or
//!   evicts as pressure rises.
//! - [`RenderEngine`] owns all of the above and exposes their settings.
//!
//! Consumers observe the engine through [`EngineEvent`]s, either with a
//! callback or a channel from [`RenderEngine::subscribe`].

use std::sync::{Mutex, MutexGuard};

mod config;
mod engine;
mod error;
mod events;
mod monitor;
mod pipeline;
mod prerender;

pub use config::EngineConfig;
pub use engine::RenderEngine;
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EngineListener, EventBus};
pub use monitor::PressureDriver;
pub use pipeline::{page_key, RenderPipeline, RenderResult, RenderStats};
pub use prerender::PrerenderScheduler;

pub use pdf_editor_cache::{
    CacheConfig, CacheEvent, CacheKey, CacheStats, Clock, CompressionLevel, CompressionSettings, ConfigError,
    MaintenanceReport, ManualClock, MemoryPressure, Payload, PressureTransition, PriorityWeights,
};
pub use pdf_editor_prefetch::{NavigationPrediction, PrerenderStrategy, ReadingPattern, UserSession};
pub use pdf_editor_render::{PageRenderer, RasterImage, RenderError, RenderQuality};
pub use pdf_editor_scheduler::{RenderPriority, RequestId};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
