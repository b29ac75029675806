//! Render engine facade
//!
//! Owns the cache store, the render pipeline, the prerender scheduler and
//! the background threads that keep memory in check.

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use pdf_editor_cache::{
    CacheStats, CacheStore, Clock, CompressionSettings, MaintenanceReport, MemoryPressure, PressureTransition,
    PriorityWeights,
};
use pdf_editor_prefetch::{NavigationPrediction, PrerenderStrategy, ReadingPattern, UserSession};
use pdf_editor_render::{PageRenderer, RasterImage, RenderQuality};
use pdf_editor_scheduler::{RenderPriority, RequestId};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::events::{EngineEvent, EngineListener, EventBus};
use crate::lock;
use crate::monitor::{BackgroundTask, PressureDriver};
use crate::pipeline::{RenderPipeline, RenderStats};
use crate::prerender::PrerenderScheduler;

/// Adaptive page cache with predictive prerendering
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use pdf_editor_engine::{EngineConfig, EngineEvent, PageRenderer, RenderEngine, RenderPriority};
///
/// fn open(renderer: Arc<dyn PageRenderer>) -> pdf_editor_engine::EngineResult<()> {
///     let engine = RenderEngine::new(EngineConfig::default());
///     let events = engine.subscribe();
///     engine.set_document(renderer);
///
///     let quality = engine.default_quality();
///     let id = engine.request_render(0, 1.0, 0, quality, RenderPriority::Critical)?;
///     while let Ok(event) = events.recv_timeout(Duration::from_secs(5)) {
///         if let EngineEvent::RenderCompleted(result) = event {
///             if result.id == id {
///                 break;
///             }
///         }
///     }
///     engine.record_page_view(0, Duration::from_secs(12), 1.0);
///     engine.shutdown();
///     Ok(())
/// }
/// ```
pub struct RenderEngine {
    config: Mutex<EngineConfig>,
    store: Arc<CacheStore>,
    events: Arc<EventBus>,
    pipeline: Arc<RenderPipeline>,
    prerender: Arc<PrerenderScheduler>,
    pressure: Arc<PressureDriver>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl RenderEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let store = Arc::new(CacheStore::new(config.cache.clone()));
        Self::assemble(config, store)
    }

    /// Engine whose cache ages entries by an injected clock
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let config = config.normalized();
        let store = Arc::new(CacheStore::with_clock(config.cache.clone(), clock));
        Self::assemble(config, store)
    }

    fn assemble(config: EngineConfig, store: Arc<CacheStore>) -> Self {
        let events = Arc::new(EventBus::new());
        let pipeline = Arc::new(RenderPipeline::new(Arc::clone(&store), Arc::clone(&events), &config));
        store.add_listener(pipeline.cache_listener());

        let prerender = Arc::new(PrerenderScheduler::new(config.prerender_strategy, config.prerender_enabled));
        let pressure = Arc::new(PressureDriver::new(
            Arc::clone(&store),
            Arc::clone(&pipeline),
            Arc::clone(&prerender),
            &config,
        ));

        let mut tasks = Vec::new();
        let driver = Arc::clone(&pressure);
        tasks.extend(BackgroundTask::spawn(
            "pdf-memory-pressure",
            config.pressure_interval,
            move || {
                driver.check_pressure();
            },
        ));
        let maintained = Arc::clone(&store);
        tasks.extend(BackgroundTask::spawn(
            "pdf-cache-maintenance",
            config.cache.cleanup_interval,
            move || {
                maintained.maintenance();
            },
        ));

        info!(
            workers = config.max_concurrent_renders,
            max_memory = config.cache.max_memory_bytes,
            strategy = %config.prerender_strategy,
            "render engine started"
        );

        Self {
            config: Mutex::new(config),
            store,
            events,
            pipeline,
            prerender,
            pressure,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<RenderPipeline> {
        &self.pipeline
    }

    /// Snapshot of the current settings, including runtime changes
    pub fn config(&self) -> EngineConfig {
        let mut config = lock(&self.config).clone();
        config.cache = self.store.config();
        config
    }

    // Document

    /// Switch to a new document
    ///
    /// Outstanding requests are cancelled and the cache is cleared before
    /// this returns; nothing rendered for the previous document is delivered
    /// afterwards.
    pub fn set_document(&self, renderer: Arc<dyn PageRenderer>) -> u64 {
        self.swap_document(Some(renderer))
    }

    pub fn close_document(&self) {
        self.swap_document(None);
    }

    fn swap_document(&self, renderer: Option<Arc<dyn PageRenderer>>) -> u64 {
        self.prerender.reset();
        let generation = self.pipeline.set_document(renderer);
        // The cache is empty now; measure from scratch
        self.pressure.reset();
        self.pressure.check_pressure();
        generation
    }

    pub fn has_document(&self) -> bool {
        self.pipeline.has_document()
    }

    pub fn page_count(&self) -> u32 {
        self.pipeline.page_count()
    }

    // Rendering

    /// Request a page image; the result arrives as an [`EngineEvent`]
    pub fn request_render(
        &self,
        page: u32,
        scale: f64,
        rotation: u16,
        quality: RenderQuality,
        priority: RenderPriority,
    ) -> EngineResult<RequestId> {
        self.pipeline.request_render(page, scale, rotation, quality, priority, None)
    }

    /// Request a page image fitted to a target size in pixels
    pub fn request_render_sized(
        &self,
        page: u32,
        scale: f64,
        rotation: u16,
        quality: RenderQuality,
        priority: RenderPriority,
        target_size: (u32, u32),
    ) -> EngineResult<RequestId> {
        self.pipeline
            .request_render(page, scale, rotation, quality, priority, Some(target_size))
    }

    pub fn cached_page(&self, page: u32, scale: f64, rotation: u16) -> Option<RasterImage> {
        self.pipeline.cached_page(page, scale, rotation)
    }

    pub fn has_page_in_cache(&self, page: u32, scale: f64, rotation: u16) -> bool {
        self.pipeline.has_page_in_cache(page, scale, rotation)
    }

    pub fn preload_pages(&self, pages: &[u32], scale: f64) -> Vec<RequestId> {
        self.pipeline.preload_pages(pages, scale)
    }

    pub fn render_immediate(
        &self,
        page: u32,
        scale: f64,
        rotation: u16,
        quality: RenderQuality,
    ) -> EngineResult<RasterImage> {
        self.pipeline.render_immediate(page, scale, rotation, quality)
    }

    pub fn page_text(&self, page: u32) -> EngineResult<String> {
        self.pipeline.page_text(page)
    }

    pub fn cancel_request(&self, id: RequestId) -> bool {
        self.pipeline.cancel_request(id)
    }

    pub fn cancel_all_requests(&self) -> usize {
        self.pipeline.cancel_all_requests()
    }

    pub fn pause_rendering(&self) {
        self.pipeline.pause();
    }

    pub fn resume_rendering(&self) {
        self.pipeline.resume();
    }

    pub fn is_rendering_paused(&self) -> bool {
        self.pipeline.is_paused()
    }

    pub fn queue_len(&self) -> usize {
        self.pipeline.queue_len()
    }

    pub fn is_rendering_active(&self) -> bool {
        self.pipeline.is_rendering_active()
    }

    /// Block until every event caused so far has been published
    pub fn flush_events(&self) {
        self.pipeline.flush();
    }

    // Statistics

    pub fn stats(&self) -> RenderStats {
        self.pipeline.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn reset_stats(&self) {
        self.pipeline.reset_stats();
        self.store.reset_stats();
    }

    // Prerendering

    /// Record that the user viewed a page and prerender around it
    pub fn record_page_view(&self, page: u32, dwell: Duration, zoom: f64) -> Vec<RequestId> {
        self.prerender.on_page_view(&self.pipeline, page, dwell, zoom)
    }

    /// Record a page the user reached from a search hit
    pub fn record_search_navigation(&self, page: u32, dwell: Duration, zoom: f64) -> Vec<RequestId> {
        self.prerender.on_search_navigation(&self.pipeline, page, dwell, zoom)
    }

    pub fn prerender_strategy(&self) -> PrerenderStrategy {
        self.prerender.strategy()
    }

    pub fn set_prerender_strategy(&self, strategy: PrerenderStrategy) {
        self.prerender.set_strategy(strategy);
        lock(&self.config).prerender_strategy = strategy;
    }

    pub fn set_prerender_enabled(&self, enabled: bool) {
        self.prerender.set_enabled(enabled);
        lock(&self.config).prerender_enabled = enabled;
        if !enabled {
            let dropped = self.pipeline.cancel_background();
            debug!(dropped, "prerendering disabled");
        }
    }

    pub fn is_prerender_enabled(&self) -> bool {
        self.prerender.is_enabled()
    }

    pub fn pause_prerendering(&self) {
        self.prerender.pause();
    }

    pub fn resume_prerendering(&self) {
        self.prerender.resume();
    }

    pub fn is_prerender_paused(&self) -> bool {
        self.prerender.is_paused()
    }

    pub fn prediction_accuracy(&self) -> f64 {
        self.prerender.accuracy()
    }

    pub fn last_predictions(&self) -> Vec<NavigationPrediction> {
        self.prerender.last_predictions()
    }

    pub fn current_pattern(&self) -> ReadingPattern {
        self.prerender.current_pattern()
    }

    pub fn start_session(&self) {
        self.prerender.start_session();
    }

    pub fn end_session(&self) -> Option<UserSession> {
        self.prerender.end_session()
    }

    /// Write archived reading sessions to a JSON file
    pub fn export_session_history(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        self.prerender.export_history(path.as_ref())
    }

    // Cache settings

    pub fn set_max_memory(&self, bytes: usize) {
        self.store.set_max_memory(bytes);
    }

    pub fn set_max_items(&self, max_items: usize) {
        self.store.set_max_items(max_items);
    }

    pub fn set_item_max_age(&self, age: Duration) {
        self.store.set_item_max_age(age);
    }

    pub fn set_priority_weights(&self, weights: PriorityWeights) {
        self.store.set_priority_weights(weights);
    }

    pub fn set_compression(&self, settings: CompressionSettings) {
        self.store.set_compression(settings);
    }

    // Engine settings

    pub fn set_max_concurrent_renders(&self, renders: usize) {
        let renders = renders.max(1);
        self.pipeline.set_max_concurrent_renders(renders);
        lock(&self.config).max_concurrent_renders = renders;
    }

    pub fn max_concurrent_renders(&self) -> usize {
        self.pipeline.max_concurrent_renders()
    }

    /// Byte budget for pressure monitoring; `None` follows the cache limit
    pub fn set_memory_limit(&self, bytes: Option<usize>) {
        self.pressure.set_memory_limit(bytes);
        lock(&self.config).memory_limit = bytes.map(|bytes| bytes.max(1));
    }

    pub fn memory_limit(&self) -> usize {
        self.pressure.memory_limit()
    }

    pub fn default_quality(&self) -> RenderQuality {
        self.pipeline.default_quality()
    }

    pub fn set_default_quality(&self, quality: RenderQuality) {
        self.pipeline.set_default_quality(quality);
        lock(&self.config).default_quality = quality;
    }

    // Memory

    pub fn memory_usage(&self) -> usize {
        self.store.memory_used()
    }

    pub fn pressure_level(&self) -> MemoryPressure {
        self.pressure.level()
    }

    /// Sample memory pressure now instead of waiting for the monitor thread
    pub fn check_pressure(&self) -> Option<PressureTransition> {
        self.pressure.check_pressure()
    }

    /// Run the cache sweeps now instead of waiting for the maintenance thread
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.store.maintenance()
    }

    pub fn clear_cache(&self) {
        self.store.clear();
    }

    // Persistence

    /// Write the cache contents to a JSON file; returns the entry count
    pub fn export_cache(&self, path: impl AsRef<Path>) -> EngineResult<usize> {
        Ok(self.store.export_to_file(path)?)
    }

    /// Load entries written by [`export_cache`](Self::export_cache)
    pub fn import_cache(&self, path: impl AsRef<Path>) -> EngineResult<usize> {
        Ok(self.store.import_from_file(path)?)
    }

    /// Export to the configured [`export_path`](EngineConfig::export_path)
    pub fn save_cache(&self) -> EngineResult<usize> {
        let path = lock(&self.config).export_path.clone();
        self.export_cache(path)
    }

    /// Import from the configured [`export_path`](EngineConfig::export_path)
    pub fn load_cache(&self) -> EngineResult<usize> {
        let path = lock(&self.config).export_path.clone();
        self.import_cache(path)
    }

    // Events

    /// Receive every event published from now on
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Register a callback; it runs on the completion thread
    pub fn add_listener(&self, listener: EngineListener) {
        self.events.add_listener(listener);
    }

    /// Stop the background threads and the render workers
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn shutdown(&self) {
        let tasks: Vec<BackgroundTask> = lock(&self.tasks).drain(..).collect();
        let stopped = !tasks.is_empty();
        for task in tasks {
            task.shutdown();
        }
        self.pipeline.shutdown();
        if stopped {
            info!("render engine stopped");
        }
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("has_document", &self.has_document())
            .field("memory_used", &self.store.memory_used())
            .field("queue_len", &self.queue_len())
            .field("prerender", &self.prerender)
            .finish()
    }
}
