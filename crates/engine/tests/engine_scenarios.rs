use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pdf_editor_engine::{
    CacheConfig, CacheKey, CompressionLevel, CompressionSettings, EngineConfig, EngineEvent, MemoryPressure,
    PageRenderer, Payload, RasterImage, RenderEngine, RenderPriority, RenderQuality, RequestId,
};
use pdf_editor_render::RenderResult as RendererResult;
use rand::{Rng, SeedableRng};

const WAIT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Renders solid pages and remembers the order pages were rendered in
struct RecordingRenderer {
    pages: u32,
    shade: u8,
    rendered: Mutex<Vec<u32>>,
}

impl RecordingRenderer {
    fn new(pages: u32, shade: u8) -> Arc<Self> {
        Arc::new(Self {
            pages,
            shade,
            rendered: Mutex::new(Vec::new()),
        })
    }

    fn rendered(&self) -> Vec<u32> {
        self.rendered.lock().unwrap().clone()
    }
}

impl PageRenderer for RecordingRenderer {
    fn page_count(&self) -> u32 {
        self.pages
    }

    fn render_page(&self, page: u32, dpi_x: f64, dpi_y: f64, _rotation: u16) -> RendererResult<RasterImage> {
        self.rendered.lock().unwrap().push(page);
        let width = (dpi_x / 72.0 * 8.0) as u32;
        let height = (dpi_y / 72.0 * 8.0) as u32;
        Ok(RasterImage::filled(width.max(1), height.max(1), [self.shade, 0, 0, 255]))
    }

    fn extract_text(&self, page: u32) -> RendererResult<String> {
        Ok(format!("page {page}"))
    }
}

/// Blocks every render until the gate is opened
struct GatedRenderer {
    pages: u32,
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedRenderer {
    fn new(pages: u32) -> Arc<Self> {
        Arc::new(Self {
            pages,
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
        })
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl PageRenderer for GatedRenderer {
    fn page_count(&self) -> u32 {
        self.pages
    }

    fn render_page(&self, _page: u32, _dpi_x: f64, _dpi_y: f64, _rotation: u16) -> RendererResult<RasterImage> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        Ok(RasterImage::filled(2, 2, [0, 0, 255, 255]))
    }

    fn extract_text(&self, _page: u32) -> RendererResult<String> {
        Ok(String::new())
    }
}

fn quiet_config() -> EngineConfig {
    EngineConfig::default()
        .with_pressure_interval(Duration::from_secs(3600))
        .with_cache(CacheConfig::default().with_cleanup_interval(Duration::from_secs(3600)))
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Wait for the completion of a specific request
fn completion_of(events: &Receiver<EngineEvent>, id: RequestId) -> pdf_editor_engine::RenderResult {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(EngineEvent::RenderCompleted(result)) if result.id == id => return result,
            Ok(_) => continue,
            Err(err) => panic!("no completion for {id}: {err}"),
        }
    }
}

fn drain(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    events.try_iter().collect()
}

#[test]
fn cold_start_miss_then_hit() {
    init_tracing();
    let engine = RenderEngine::new(quiet_config());
    let renderer = RecordingRenderer::new(10, 200);
    engine.set_document(renderer.clone());
    let events = engine.subscribe();

    let first = engine
        .request_render(3, 1.0, 0, RenderQuality::Normal, RenderPriority::High)
        .unwrap();
    let rendered = completion_of(&events, first);
    assert!(!rendered.from_cache);
    assert!(engine.has_page_in_cache(3, 1.0, 0));

    let second = engine
        .request_render(3, 1.0, 0, RenderQuality::Normal, RenderPriority::High)
        .unwrap();
    let cached = completion_of(&events, second);
    assert!(cached.from_cache);
    assert_eq!(cached.elapsed, Duration::ZERO);
    assert_eq!(cached.image(), rendered.image());
    assert_eq!(renderer.rendered(), vec![3]);

    let stats = engine.stats();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 1);
    engine.shutdown();
}

#[test]
fn item_limit_evicts_one_older_page() {
    init_tracing();
    let cache = CacheConfig::default().with_max_items(2);
    let engine = RenderEngine::new(quiet_config().with_cache(cache));
    engine.set_document(RecordingRenderer::new(10, 10));
    let events = engine.subscribe();

    for page in 0..3 {
        let id = engine
            .request_render(page, 1.0, 0, RenderQuality::Normal, RenderPriority::Normal)
            .unwrap();
        completion_of(&events, id);
    }

    assert!(engine.has_page_in_cache(2, 1.0, 0));
    let older = [0, 1].iter().filter(|&&page| engine.has_page_in_cache(page, 1.0, 0)).count();
    assert_eq!(older, 1);
    assert_eq!(engine.cache_stats().item_count, 2);
    assert_eq!(engine.cache_stats().evictions, 1);
    engine.shutdown();
}

#[test]
fn document_swap_never_delivers_stale_results() {
    init_tracing();
    let engine = RenderEngine::new(quiet_config().with_max_concurrent_renders(1));
    let old = GatedRenderer::new(20);
    engine.set_document(old.clone());
    let events = engine.subscribe();

    let stale: Vec<RequestId> = (0..5)
        .map(|page| {
            engine
                .request_render(page, 1.0, 0, RenderQuality::Normal, RenderPriority::Normal)
                .unwrap()
        })
        .collect();
    assert!(wait_until(|| old.entered.load(Ordering::SeqCst) == 1));

    let replacement = RecordingRenderer::new(20, 90);
    engine.set_document(replacement.clone());
    assert_eq!(engine.queue_len(), 0);

    // The render that was already running finishes now and must be dropped
    old.release();
    assert!(wait_until(|| engine.stats().discarded == 1));
    engine.flush_events();

    for event in drain(&events) {
        match event {
            EngineEvent::RenderCompleted(result) => assert!(!stale.contains(&result.id)),
            EngineEvent::RenderFailed { id, .. } => assert!(!stale.contains(&id)),
            _ => {}
        }
    }
    assert_eq!(engine.cache_stats().item_count, 0);

    let fresh = engine
        .request_render(0, 1.0, 0, RenderQuality::Normal, RenderPriority::Normal)
        .unwrap();
    let result = completion_of(&events, fresh);
    assert_eq!(result.image().map(|image| image.pixels[0]), Some(90));
    assert_eq!(replacement.rendered(), vec![0]);
    engine.shutdown();
}

#[test]
fn queued_requests_run_by_priority() {
    init_tracing();
    let engine = RenderEngine::new(quiet_config().with_max_concurrent_renders(1));
    let renderer = RecordingRenderer::new(10, 1);
    engine.set_document(renderer.clone());
    let events = engine.subscribe();

    engine.pause_rendering();
    // Let a worker that was mid-poll notice the pause
    thread::sleep(Duration::from_millis(50));
    let background = engine
        .request_render(0, 1.0, 0, RenderQuality::Normal, RenderPriority::Background)
        .unwrap();
    engine
        .request_render(1, 1.0, 0, RenderQuality::Normal, RenderPriority::Critical)
        .unwrap();
    engine
        .request_render(2, 1.0, 0, RenderQuality::Normal, RenderPriority::Normal)
        .unwrap();
    engine.resume_rendering();

    completion_of(&events, background);
    assert_eq!(renderer.rendered(), vec![1, 2, 0]);
    engine.shutdown();
}

#[test]
fn pressure_transitions_fire_once_per_level_change() {
    init_tracing();
    let cache = CacheConfig::default().with_compression(CompressionSettings {
        enabled: false,
        ..CompressionSettings::default()
    });
    let engine = RenderEngine::new(quiet_config().with_cache(cache).with_memory_limit(Some(1000)));
    let events = engine.subscribe();
    let store = engine.store();

    let mut changes = Vec::new();
    for (page, bytes) in [(1, 400), (2, 200), (3, 0), (4, 300)] {
        if bytes > 0 {
            let key = CacheKey::new(pdf_editor_cache::ContentType::Metadata, page);
            assert!(store.insert(
                key,
                Payload::Bytes(vec![7; bytes]),
                pdf_editor_cache::ContentType::Metadata,
                pdf_editor_cache::CachePriority::Normal,
                None,
            ));
        }
        changes.extend(engine.check_pressure());
    }

    let levels: Vec<_> = changes.iter().map(|transition| (transition.from, transition.to)).collect();
    assert_eq!(
        levels,
        vec![
            (MemoryPressure::None, MemoryPressure::Low),
            (MemoryPressure::Low, MemoryPressure::High)
        ]
    );
    assert_eq!(engine.pressure_level(), MemoryPressure::High);

    engine.flush_events();
    let published = drain(&events);
    let pressure_events = published
        .iter()
        .filter(|event| matches!(event, EngineEvent::PressureChanged { .. }))
        .count();
    let exceeded: Vec<_> = published
        .iter()
        .filter_map(|event| match event {
            EngineEvent::MemoryThresholdExceeded { current, limit } => Some((*current, *limit)),
            _ => None,
        })
        .collect();
    assert_eq!(pressure_events, 2);
    assert_eq!(exceeded, vec![(900, 1000)]);
    engine.shutdown();
}

#[test]
fn prerender_follows_sequential_reading() {
    init_tracing();
    let engine = RenderEngine::new(quiet_config().with_max_concurrent_renders(2));
    let renderer = RecordingRenderer::new(100, 5);
    engine.set_document(renderer.clone());
    let events = engine.subscribe();

    let mut queued = Vec::new();
    for page in 10..14 {
        queued.extend(engine.record_page_view(page, Duration::from_secs(8), 1.0));
    }
    assert!(!queued.is_empty());
    assert!(wait_until(|| !engine.is_rendering_active()));
    engine.flush_events();
    assert!(engine.has_page_in_cache(14, 1.0, 0));
    assert!(engine.prediction_accuracy() > 0.9);

    let predictions = drain(&events)
        .into_iter()
        .filter(|event| matches!(event, EngineEvent::PredictionUpdated(_)))
        .count();
    assert_eq!(predictions, 4);
    engine.shutdown();
}

#[test]
fn cached_pages_survive_compression() {
    init_tracing();
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    for level in [CompressionLevel::Fast, CompressionLevel::Balanced, CompressionLevel::Maximum] {
        let cache = CacheConfig::default().with_compression(CompressionSettings {
            enabled: true,
            level,
            threshold_bytes: 0,
        });
        let engine = RenderEngine::new(quiet_config().with_cache(cache));
        let store = engine.store();

        let noise: Vec<u8> = (0..4096).map(|_| rng.gen()).collect();
        let flat = RasterImage::filled(64, 64, [12, 34, 56, 255]);
        let content = pdf_editor_cache::ContentType::RenderedPage;
        let priority = pdf_editor_cache::CachePriority::Normal;

        store.insert(CacheKey::search("noise"), Payload::Bytes(noise.clone()), content, priority, None);
        store.insert(CacheKey::rendered_page(0, 1.0, 0, None), Payload::Image(flat.clone()), content, priority, Some(0));

        assert!(engine.cache_stats().compressed_items >= 1);
        assert_eq!(store.get(&CacheKey::search("noise")), Some(Payload::Bytes(noise)));
        assert_eq!(store.get(&CacheKey::rendered_page(0, 1.0, 0, None)), Some(Payload::Image(flat)));
        engine.shutdown();
    }
}

#[test]
fn text_and_exports_round_trip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let engine = RenderEngine::new(quiet_config());
    engine.set_document(RecordingRenderer::new(4, 3));
    engine.start_session();
    assert_eq!(engine.page_text(2).unwrap(), "page 2");
    engine.render_immediate(1, 1.5, 90, RenderQuality::High).unwrap();
    engine.record_page_view(1, Duration::from_secs(2), 1.5);

    let cache_file = dir.path().join("cache.json");
    assert!(engine.export_cache(&cache_file).unwrap() >= 2);
    assert!(engine.end_session().is_some());
    engine.export_session_history(dir.path().join("history/sessions.json")).unwrap();

    let restored = RenderEngine::new(quiet_config());
    let imported = restored.import_cache(&cache_file).unwrap();
    assert!(imported >= 2);
    assert!(restored.store().contains(&CacheKey::text(2)));
    assert!(dir.path().join("history/sessions.json").exists());
    engine.shutdown();
    restored.shutdown();
}

#[test]
fn critical_entries_block_rather_than_evict() {
    init_tracing();
    let engine = RenderEngine::new(quiet_config().with_cache(CacheConfig::default().with_max_items(1)));
    let store = engine.store();
    let content = pdf_editor_cache::ContentType::TextContent;

    let pinned = CacheKey::text(0);
    assert!(store.insert(
        pinned.clone(),
        Payload::Text("cover".to_string()),
        content,
        pdf_editor_cache::CachePriority::Critical,
        Some(0),
    ));
    assert!(!store.insert(
        CacheKey::text(1),
        Payload::Text("body".to_string()),
        content,
        pdf_editor_cache::CachePriority::Normal,
        Some(1),
    ));
    assert_eq!(store.evict(5), 0);
    assert!(store.contains(&pinned));

    let hits_and_misses = [store.get(&pinned).is_some(), store.get(&CacheKey::text(1)).is_some()];
    assert_eq!(hits_and_misses, [true, false]);
    let stats = engine.cache_stats();
    assert_eq!(stats.hits + stats.misses, 2);
    assert_eq!(stats.hit_rate(), 0.5);
    engine.shutdown();
}
