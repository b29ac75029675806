//! Render request pipeline
//!
//! Requests are answered from the cache when possible. Misses are queued on
//! the [`RequestScheduler`] and executed by a [`WorkerPool`]. Workers never
//! touch the cache or notify anyone: they hand their output to a single
//! completion thread, which inserts into the cache, updates statistics and
//! publishes events in one serialized path.
//!
//! Every request is stamped with the document generation it was issued
//! for. A result is checked against the current generation both before and
//! after it is cached, so a late result for a replaced document is dropped
//! instead of leaking into the new document's cache. The document lock is
//! never held while the cache runs its listeners.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use pdf_editor_cache::{CacheEvent, CacheKey, CacheListener, CachePriority, CacheStore, ContentType, Payload};
use pdf_editor_render::{PageRenderer, RasterImage, RenderError, RenderQuality};
use pdf_editor_scheduler::{
    CancellationToken, RenderPriority, RenderRequest, RequestExecutor, RequestId, RequestScheduler,
    WorkerPool, WorkerPoolConfig,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::lock;

/// Outcome of one render request
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub id: RequestId,
    pub page: u32,
    pub key: CacheKey,
    pub priority: RenderPriority,
    pub payload: Option<Payload>,
    pub success: bool,
    pub error: Option<RenderError>,
    /// Time spent in the renderer; zero for cache hits
    pub elapsed: Duration,
    pub from_cache: bool,
}

impl RenderResult {
    pub fn image(&self) -> Option<&RasterImage> {
        self.payload.as_ref().and_then(Payload::as_image)
    }
}

/// Aggregate pipeline counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub completed: u64,
    pub failed: u64,
    /// Results dropped because they were cancelled or belonged to a
    /// replaced document
    pub discarded: u64,
    /// Mean renderer time over completed renders
    pub average_render_time: Duration,
}

impl RenderStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    fn record_render_time(&mut self, elapsed: Duration) {
        self.completed += 1;
        let completed = u128::from(self.completed);
        let total = self.average_render_time.as_nanos() * (completed - 1) + elapsed.as_nanos();
        let average = u64::try_from(total / completed).unwrap_or(u64::MAX);
        self.average_render_time = Duration::from_nanos(average);
    }
}

/// Cache key of a rendered page
///
/// Quality and target size change the produced pixels, so both are part of
/// the key.
pub fn page_key(
    page: u32,
    scale: f64,
    rotation: u16,
    quality: RenderQuality,
    target_size: Option<(u32, u32)>,
) -> CacheKey {
    let extra = match target_size {
        Some((width, height)) => format!("{}:{}x{}", quality.tag(), width, height),
        None => quality.tag().to_string(),
    };
    CacheKey::rendered_page(page, scale, rotation % 360, Some(&extra))
}

/// Rendered pages keep their request priority, except that nothing the
/// pipeline caches is pinned against eviction
fn cache_priority(priority: RenderPriority) -> CachePriority {
    match priority {
        RenderPriority::Background => CachePriority::Background,
        RenderPriority::Low => CachePriority::Low,
        RenderPriority::Normal => CachePriority::Normal,
        RenderPriority::High | RenderPriority::Critical => CachePriority::High,
    }
}

/// Work handed to the completion thread
enum Completion {
    Rendered {
        request: RenderRequest,
        token: CancellationToken,
        key: CacheKey,
        outcome: pdf_editor_render::RenderResult<RasterImage>,
        elapsed: Duration,
    },
    Hit {
        id: RequestId,
        page: u32,
        key: CacheKey,
        priority: RenderPriority,
        payload: Payload,
        generation: u64,
    },
    Event(EngineEvent),
    Flush(Sender<()>),
    Shutdown,
}

struct DocumentSlot {
    renderer: Option<Arc<dyn PageRenderer>>,
    generation: u64,
}

/// State shared by the pipeline, its workers and its completion thread
struct Shared {
    store: Arc<CacheStore>,
    scheduler: Arc<RequestScheduler>,
    document: Mutex<DocumentSlot>,
    stats: Mutex<RenderStats>,
    events: Arc<EventBus>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        lock(&self.document).generation == generation
    }

    /// Cache an artifact produced for `generation`
    ///
    /// Returns false when the document was replaced before or during the
    /// insert; the entry is then removed again.
    fn cache_for_generation(
        &self,
        generation: u64,
        key: &CacheKey,
        payload: Payload,
        content_type: ContentType,
        priority: CachePriority,
        page: u32,
    ) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        if !self.store.insert(key.clone(), payload, content_type, priority, Some(page)) {
            warn!(key = %key, "artifact could not be cached");
        }
        if !self.is_current(generation) {
            self.store.remove(key);
            return false;
        }
        true
    }

    /// Renderer for a request, unless its document has been replaced
    fn renderer_for(&self, generation: u64) -> Option<Arc<dyn PageRenderer>> {
        let document = lock(&self.document);
        if document.generation != generation {
            return None;
        }
        document.renderer.clone()
    }

    fn handle(&self, completion: Completion) {
        match completion {
            Completion::Rendered {
                request,
                token,
                key,
                outcome,
                elapsed,
            } => self.finish_render(request, token, key, outcome, elapsed),
            Completion::Hit {
                id,
                page,
                key,
                priority,
                payload,
                generation,
            } => {
                if !self.is_current(generation) {
                    lock(&self.stats).discarded += 1;
                    return;
                }
                let result = RenderResult {
                    id,
                    page,
                    key,
                    priority,
                    payload: Some(payload),
                    success: true,
                    error: None,
                    elapsed: Duration::ZERO,
                    from_cache: true,
                };
                self.events.publish(EngineEvent::RenderCompleted(result));
            }
            Completion::Event(event) => self.events.publish(event),
            Completion::Flush(_) | Completion::Shutdown => {}
        }
    }

    fn finish_render(
        &self,
        request: RenderRequest,
        token: CancellationToken,
        key: CacheKey,
        outcome: pdf_editor_render::RenderResult<RasterImage>,
        elapsed: Duration,
    ) {
        if !self.is_current(request.generation) || token.is_cancelled() {
            debug!(id = %request.id, page = request.page, "dropping cancelled render result");
            lock(&self.stats).discarded += 1;
            return;
        }

        let result = match outcome {
            Ok(image) => {
                let payload = Payload::Image(image);
                let current = self.cache_for_generation(
                    request.generation,
                    &key,
                    payload.clone(),
                    ContentType::RenderedPage,
                    cache_priority(request.priority),
                    request.page,
                );
                if !current {
                    debug!(id = %request.id, page = request.page, "document replaced while caching result");
                    lock(&self.stats).discarded += 1;
                    return;
                }
                RenderResult {
                    id: request.id,
                    page: request.page,
                    key,
                    priority: request.priority,
                    payload: Some(payload),
                    success: true,
                    error: None,
                    elapsed,
                    from_cache: false,
                }
            }
            Err(err) => {
                warn!(id = %request.id, page = request.page, error = %err, "render failed");
                RenderResult {
                    id: request.id,
                    page: request.page,
                    key,
                    priority: request.priority,
                    payload: None,
                    success: false,
                    error: Some(err),
                    elapsed,
                    from_cache: false,
                }
            }
        };

        let snapshot = {
            let mut stats = lock(&self.stats);
            if result.success {
                stats.record_render_time(elapsed);
            } else {
                stats.failed += 1;
            }
            stats.clone()
        };

        match &result.error {
            Some(err) => self.events.publish(EngineEvent::RenderFailed {
                id: result.id,
                error: err.clone(),
            }),
            None => self.events.publish(EngineEvent::RenderCompleted(result)),
        }
        self.events.publish(EngineEvent::StatisticsUpdated(snapshot));
    }
}

/// Cache-first render service backed by a worker pool
pub struct RenderPipeline {
    shared: Arc<Shared>,
    sender: Mutex<Sender<Completion>>,
    workers: Mutex<Option<WorkerPool>>,
    completion_thread: Mutex<Option<JoinHandle<()>>>,
    completion_thread_id: Option<ThreadId>,
    default_quality: Mutex<RenderQuality>,
}

impl RenderPipeline {
    /// Start the worker pool and the completion thread
    pub fn new(store: Arc<CacheStore>, events: Arc<EventBus>, config: &EngineConfig) -> Self {
        let shared = Arc::new(Shared {
            store,
            scheduler: Arc::new(RequestScheduler::new()),
            document: Mutex::new(DocumentSlot {
                renderer: None,
                generation: 0,
            }),
            stats: Mutex::new(RenderStats::default()),
            events,
        });

        let (sender, receiver) = mpsc::channel();
        let completion_thread = spawn_completion_thread(Arc::clone(&shared), receiver);
        let completion_thread_id = completion_thread.as_ref().map(|handle| handle.thread().id());

        let executor = render_executor(Arc::clone(&shared), sender.clone());
        let pool_config = WorkerPoolConfig::new(config.max_concurrent_renders)
            .with_poll_interval(config.worker_poll_interval);
        let workers = WorkerPool::new(Arc::clone(&shared.scheduler), executor, pool_config);

        Self {
            shared,
            sender: Mutex::new(sender),
            workers: Mutex::new(Some(workers)),
            completion_thread: Mutex::new(completion_thread),
            completion_thread_id,
            default_quality: Mutex::new(config.default_quality),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.shared.store
    }

    /// Listener that forwards cache events through the completion thread
    pub(crate) fn cache_listener(&self) -> CacheListener {
        let sender = Mutex::new(lock(&self.sender).clone());
        Arc::new(move |event: &CacheEvent| {
            // Ignored once the pipeline has shut down
            let _ = lock(&sender).send(Completion::Event(EngineEvent::Cache(event.clone())));
        })
    }

    /// Publish an event on the completion thread, after anything sent before it
    pub(crate) fn notify(&self, event: EngineEvent) {
        if lock(&self.sender).send(Completion::Event(event)).is_err() {
            debug!("completion thread gone, event dropped");
        }
    }

    /// Replace the document being rendered
    ///
    /// Cancels every outstanding request and clears the cache. When this
    /// returns no result for the previous document will be delivered or
    /// cached by the completion thread.
    pub fn set_document(&self, renderer: Option<Arc<dyn PageRenderer>>) -> u64 {
        let page_count = renderer.as_ref().map(|renderer| renderer.page_count());
        let (generation, cancelled) = {
            let mut document = lock(&self.shared.document);
            document.generation += 1;
            document.renderer = renderer;
            (document.generation, self.shared.scheduler.cancel_all())
        };

        self.shared.store.clear();
        info!(generation, ?page_count, cancelled, "document replaced");

        *lock(&self.shared.stats) = RenderStats::default();
        self.flush();
        generation
    }

    pub fn has_document(&self) -> bool {
        lock(&self.shared.document).renderer.is_some()
    }

    /// Page count of the current document, 0 without one
    pub fn page_count(&self) -> u32 {
        lock(&self.shared.document)
            .renderer
            .as_ref()
            .map_or(0, |renderer| renderer.page_count())
    }

    /// Request a page image
    ///
    /// A cached page is delivered through the completion thread without
    /// touching the worker pool. Otherwise the request is queued and its id
    /// can be used to cancel it.
    pub fn request_render(
        &self,
        page: u32,
        scale: f64,
        rotation: u16,
        quality: RenderQuality,
        priority: RenderPriority,
        target_size: Option<(u32, u32)>,
    ) -> EngineResult<RequestId> {
        let (_, generation) = self.checked_renderer(page)?;
        let key = page_key(page, scale, rotation, quality, target_size);
        let id = self.shared.scheduler.allocate_id();
        lock(&self.shared.stats).total_requests += 1;

        if let Some(payload) = self.shared.store.get(&key) {
            lock(&self.shared.stats).cache_hits += 1;
            debug!(id = %id, key = %key, "render request served from cache");
            let hit = Completion::Hit {
                id,
                page,
                key,
                priority,
                payload,
                generation,
            };
            if lock(&self.sender).send(hit).is_err() {
                warn!(id = %id, "completion thread gone, cached result not delivered");
            }
            return Ok(id);
        }

        lock(&self.shared.stats).cache_misses += 1;
        let request = RenderRequest::new(id, page, scale)
            .with_rotation(rotation)
            .with_quality(quality)
            .with_priority(priority)
            .with_target_size(target_size)
            .with_generation(generation);
        self.shared.scheduler.submit(request);
        Ok(id)
    }

    /// Queue a render without looking at the cache
    ///
    /// For speculative work whose caller already checked the cache with
    /// [`has_page_in_cache`](Self::has_page_in_cache); no hit or miss is
    /// counted.
    pub(crate) fn enqueue(
        &self,
        page: u32,
        scale: f64,
        rotation: u16,
        quality: RenderQuality,
        priority: RenderPriority,
    ) -> EngineResult<RequestId> {
        let (_, generation) = self.checked_renderer(page)?;
        let id = self.shared.scheduler.allocate_id();
        let request = RenderRequest::new(id, page, scale)
            .with_rotation(rotation)
            .with_quality(quality)
            .with_priority(priority)
            .with_generation(generation);
        self.shared.scheduler.submit(request);
        Ok(id)
    }

    /// Cached image of a page at the default quality
    pub fn cached_page(&self, page: u32, scale: f64, rotation: u16) -> Option<RasterImage> {
        let key = page_key(page, scale, rotation, self.default_quality(), None);
        match self.shared.store.get(&key)? {
            Payload::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Whether a page is cached at the default quality; no cache telemetry
    pub fn has_page_in_cache(&self, page: u32, scale: f64, rotation: u16) -> bool {
        let key = page_key(page, scale, rotation, self.default_quality(), None);
        self.shared.store.contains(&key)
    }

    /// Whether a matching request is waiting in the queue
    pub fn is_queued(&self, page: u32, scale: f64, rotation: u16, quality: RenderQuality) -> bool {
        let key = page_key(page, scale, rotation, quality, None);
        self.shared.scheduler.pending_requests().iter().any(|request| {
            request.target_size.is_none()
                && page_key(request.page, request.scale, request.rotation, request.quality, None) == key
        })
    }

    /// Queue background renders for a set of pages at the default quality
    pub fn preload_pages(&self, pages: &[u32], scale: f64) -> Vec<RequestId> {
        let quality = self.default_quality();
        pages
            .iter()
            .filter_map(|&page| {
                self.request_render(page, scale, 0, quality, RenderPriority::Background, None)
                    .map_err(|err| debug!(page, error = %err, "skipping preload"))
                    .ok()
            })
            .collect()
    }

    /// Render a page on the calling thread, bypassing the queue
    pub fn render_immediate(
        &self,
        page: u32,
        scale: f64,
        rotation: u16,
        quality: RenderQuality,
    ) -> EngineResult<RasterImage> {
        let key = page_key(page, scale, rotation, quality, None);
        let (renderer, generation) = self.checked_renderer(page)?;
        if let Some(Payload::Image(image)) = self.shared.store.get(&key) {
            return Ok(image);
        }

        let dpi = quality.dpi(scale);
        let image = renderer.render_page(page, dpi, dpi, rotation % 360)?;

        self.shared.cache_for_generation(
            generation,
            &key,
            Payload::Image(image.clone()),
            ContentType::RenderedPage,
            CachePriority::Normal,
            page,
        );
        Ok(image)
    }

    /// Extracted text of a page, cached after the first call
    pub fn page_text(&self, page: u32) -> EngineResult<String> {
        let key = CacheKey::text(page);
        let (renderer, generation) = self.checked_renderer(page)?;
        if let Some(Payload::Text(text)) = self.shared.store.get(&key) {
            return Ok(text);
        }

        let text = renderer.extract_text(page)?;

        self.shared.cache_for_generation(
            generation,
            &key,
            Payload::Text(text.clone()),
            ContentType::TextContent,
            CachePriority::Normal,
            page,
        );
        Ok(text)
    }

    fn checked_renderer(&self, page: u32) -> EngineResult<(Arc<dyn PageRenderer>, u64)> {
        let document = lock(&self.shared.document);
        let renderer = document.renderer.clone().ok_or(EngineError::NoDocument)?;
        let page_count = renderer.page_count();
        if page >= page_count {
            return Err(EngineError::PageOutOfRange { page, page_count });
        }
        Ok((renderer, document.generation))
    }

    /// Cancel a request; a running render finishes but its result is dropped
    pub fn cancel_request(&self, id: RequestId) -> bool {
        self.shared.scheduler.cancel(id)
    }

    pub fn cancel_all_requests(&self) -> usize {
        self.shared.scheduler.cancel_all()
    }

    /// Drop queued background requests
    pub fn cancel_background(&self) -> usize {
        self.shared
            .scheduler
            .cancel_where(|request| request.priority == RenderPriority::Background)
    }

    /// Stop dispatching queued requests
    pub fn pause(&self) {
        if let Some(workers) = lock(&self.workers).as_ref() {
            workers.pause();
            debug!("rendering paused");
        }
    }

    pub fn resume(&self) {
        if let Some(workers) = lock(&self.workers).as_ref() {
            workers.resume();
            debug!("rendering resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.workers).as_ref().map_or(true, WorkerPool::is_paused)
    }

    pub fn set_max_concurrent_renders(&self, renders: usize) {
        if let Some(workers) = lock(&self.workers).as_mut() {
            workers.set_max_concurrency(renders);
        }
    }

    pub fn max_concurrent_renders(&self) -> usize {
        lock(&self.workers).as_ref().map_or(0, WorkerPool::max_concurrency)
    }

    pub fn default_quality(&self) -> RenderQuality {
        *lock(&self.default_quality)
    }

    pub fn set_default_quality(&self, quality: RenderQuality) {
        *lock(&self.default_quality) = quality;
    }

    pub fn stats(&self) -> RenderStats {
        lock(&self.shared.stats).clone()
    }

    pub fn reset_stats(&self) {
        *lock(&self.shared.stats) = RenderStats::default();
        self.shared.scheduler.reset_stats();
    }

    pub fn queue_len(&self) -> usize {
        self.shared.scheduler.queue_len()
    }

    /// Whether any request is queued or running
    pub fn is_rendering_active(&self) -> bool {
        self.shared.scheduler.has_pending() || self.shared.scheduler.in_flight() > 0
    }

    pub fn scheduler(&self) -> &Arc<RequestScheduler> {
        &self.shared.scheduler
    }

    /// Wait until everything sent to the completion thread so far has been
    /// handled
    ///
    /// Returns immediately when called from the completion thread itself.
    pub fn flush(&self) {
        if Some(thread::current().id()) == self.completion_thread_id {
            return;
        }
        let (done, wait) = mpsc::channel();
        if lock(&self.sender).send(Completion::Flush(done)).is_ok() {
            // Disconnected means the thread exited, which is as good as done
            let _ = wait.recv();
        }
    }

    /// Stop the workers and the completion thread
    ///
    /// Running renders finish first. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(workers) = lock(&self.workers).take() {
            workers.shutdown();
        }
        let handle = lock(&self.completion_thread).take();
        if let Some(handle) = handle {
            let _ = lock(&self.sender).send(Completion::Shutdown);
            if Some(thread::current().id()) != self.completion_thread_id && handle.join().is_err() {
                warn!("render completion thread panicked");
            }
        }
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_completion_thread(shared: Arc<Shared>, receiver: Receiver<Completion>) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("pdf-render-completion".to_string())
        .spawn(move || {
            for completion in receiver {
                match completion {
                    Completion::Shutdown => break,
                    Completion::Flush(done) => {
                        let _ = done.send(());
                    }
                    other => shared.handle(other),
                }
            }
            debug!("render completion thread stopped");
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!(error = %err, "failed to spawn render completion thread");
            None
        }
    }
}

fn render_executor(shared: Arc<Shared>, sender: Sender<Completion>) -> RequestExecutor {
    let sender = Mutex::new(sender);
    Arc::new(move |request: RenderRequest, token: CancellationToken| {
        let Some(renderer) = shared.renderer_for(request.generation) else {
            lock(&shared.stats).discarded += 1;
            return;
        };

        let key = page_key(
            request.page,
            request.scale,
            request.rotation,
            request.quality,
            request.target_size,
        );
        let dpi = request.dpi();
        let started = Instant::now();
        let outcome = renderer.render_page(request.page, dpi, dpi, request.rotation);
        let elapsed = started.elapsed();

        let completion = Completion::Rendered {
            request,
            token,
            key,
            outcome,
            elapsed,
        };
        if lock(&sender).send(completion).is_err() {
            debug!("completion thread gone, render result dropped");
        }
    })
}
