//! Memory pressure driver and periodic background tasks
//!
//! The driver samples the store's memory use against the engine's memory
//! limit and answers each level change with the matching cache operation.
//! It never touches cache internals; everything goes through the store's
//! locked API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use pdf_editor_cache::pressure::respond;
use pdf_editor_cache::{CacheStore, MemoryPressure, PressureMonitor, PressureResponder, PressureTransition};

use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::lock;
use crate::pipeline::RenderPipeline;
use crate::prerender::PrerenderScheduler;

/// Longest single sleep of a background task, bounds shutdown latency
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Translates pressure transitions into cache and prerender actions
pub struct PressureDriver {
    store: Arc<CacheStore>,
    pipeline: Arc<RenderPipeline>,
    prerender: Arc<PrerenderScheduler>,
    monitor: Mutex<PressureMonitor>,
    memory_limit: Mutex<Option<usize>>,
    idle_threshold: Duration,
    emergency_target: f64,
    /// Set while prerendering is suspended by the emergency response
    suspended_prerender: AtomicBool,
}

impl PressureDriver {
    pub fn new(
        store: Arc<CacheStore>,
        pipeline: Arc<RenderPipeline>,
        prerender: Arc<PrerenderScheduler>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            prerender,
            monitor: Mutex::new(PressureMonitor::new()),
            memory_limit: Mutex::new(config.memory_limit),
            idle_threshold: config.idle_threshold,
            emergency_target: config.emergency_target,
            suspended_prerender: AtomicBool::new(false),
        }
    }

    /// Byte budget the pressure ratio is computed against
    ///
    /// Falls back to the cache's own memory limit when none was configured.
    pub fn memory_limit(&self) -> usize {
        lock(&self.memory_limit).unwrap_or_else(|| self.store.max_memory()).max(1)
    }

    pub fn set_memory_limit(&self, limit: Option<usize>) {
        *lock(&self.memory_limit) = limit.map(|bytes| bytes.max(1));
    }

    pub fn level(&self) -> MemoryPressure {
        lock(&self.monitor).level()
    }

    /// Take one sample and respond if the level changed
    pub fn check_pressure(&self) -> Option<PressureTransition> {
        let current = self.store.memory_used();
        let limit = self.memory_limit();
        let transition = lock(&self.monitor).sample(current, limit)?;
        respond(&transition, self);
        Some(transition)
    }

    /// Forget the current level, e.g. after the cache was cleared
    pub fn reset(&self) {
        lock(&self.monitor).reset();
        self.lift_prerender_suspension();
    }

    fn lift_prerender_suspension(&self) {
        if self.suspended_prerender.swap(false, Ordering::AcqRel) {
            self.prerender.resume();
        }
    }
}

impl PressureResponder for PressureDriver {
    fn level_changed(&self, transition: &PressureTransition) {
        info!(
            from = ?transition.from,
            to = ?transition.to,
            current = transition.current,
            limit = transition.limit,
            "memory pressure changed"
        );
        self.pipeline.notify(EngineEvent::PressureChanged {
            from: transition.from,
            to: transition.to,
        });
        if transition.to >= MemoryPressure::High {
            self.pipeline.notify(EngineEvent::MemoryThresholdExceeded {
                current: transition.current,
                limit: transition.limit,
            });
        }
        if transition.to < MemoryPressure::Critical {
            self.lift_prerender_suspension();
        }
    }

    fn compress(&self) {
        let compressed = self.store.compress_eligible();
        debug!(compressed, "pressure compression pass");
    }

    fn collect_and_compact(&self) {
        let collected = self.store.collect_idle(self.idle_threshold);
        self.store.compact();
        debug!(collected, "pressure collection pass");
    }

    fn emergency(&self, transition: &PressureTransition) {
        warn!(current = transition.current, limit = transition.limit, "critical memory pressure");
        self.store.compress_eligible();

        let target = (transition.limit as f64 * self.emergency_target) as usize;
        let evicted = self.store.evict_to_target(target);

        if !self.prerender.is_paused() {
            self.prerender.pause();
            self.suspended_prerender.store(true, Ordering::Release);
        }
        let dropped = self.pipeline.cancel_background();
        debug!(evicted, dropped, target, "emergency response finished");
    }
}

impl std::fmt::Debug for PressureDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureDriver")
            .field("level", &self.level())
            .field("memory_limit", &self.memory_limit())
            .finish()
    }
}

/// A named thread running a callback on a fixed interval
pub(crate) struct BackgroundTask {
    name: String,
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl BackgroundTask {
    /// Start the thread; the first tick happens one interval after start
    ///
    /// Returns `None` if the thread could not be spawned.
    pub(crate) fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || loop {
            if !sleep_unless_stopped(&stop, interval) {
                break;
            }
            tick();
        });

        match spawned {
            Ok(thread) => Some(Self {
                name: name.to_string(),
                thread: Some(thread),
                shutdown,
            }),
            Err(err) => {
                warn!(name, error = %err, "failed to spawn background task");
                None
            }
        }
    }

    pub(crate) fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(name = %self.name, "background task panicked");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `duration` in short slices; false once shutdown was requested
fn sleep_unless_stopped(shutdown: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use pdf_editor_cache::{CacheConfig, CacheKey, CachePriority, CompressionSettings, ContentType, Payload};
    use pdf_editor_prefetch::PrerenderStrategy;
    use std::sync::atomic::AtomicUsize;

    fn driver(limit: usize) -> (PressureDriver, Arc<CacheStore>, Arc<PrerenderScheduler>) {
        let cache = CacheConfig::default().with_compression(CompressionSettings {
            enabled: false,
            ..CompressionSettings::default()
        });
        let config = EngineConfig::default()
            .with_cache(cache.clone())
            .with_max_concurrent_renders(1)
            .with_memory_limit(Some(limit));
        let store = Arc::new(CacheStore::new(cache));
        let pipeline = Arc::new(RenderPipeline::new(Arc::clone(&store), Arc::new(EventBus::new()), &config));
        let prerender = Arc::new(PrerenderScheduler::new(PrerenderStrategy::Balanced, true));
        let driver = PressureDriver::new(Arc::clone(&store), pipeline, Arc::clone(&prerender), &config);
        (driver, store, prerender)
    }

    fn fill(store: &CacheStore, page: u32, bytes: usize) {
        let key = CacheKey::new(ContentType::Metadata, page);
        let payload = Payload::Bytes(vec![0; bytes]);
        assert!(store.insert(key, payload, ContentType::Metadata, CachePriority::Normal, Some(page)));
    }

    #[test]
    fn test_transitions_are_edge_triggered() {
        let (driver, store, _) = driver(1000);
        assert!(driver.check_pressure().is_none());

        fill(&store, 1, 600);
        let first = driver.check_pressure().map(|t| t.to);
        assert_eq!(first, Some(MemoryPressure::Low));
        assert!(driver.check_pressure().is_none());
        assert_eq!(driver.level(), MemoryPressure::Low);
    }

    #[test]
    fn test_emergency_evicts_and_suspends_prerender() {
        let (driver, store, prerender) = driver(1000);
        fill(&store, 1, 500);
        fill(&store, 2, 480);

        let transition = driver.check_pressure();
        assert_eq!(transition.map(|t| t.to), Some(MemoryPressure::Critical));
        assert!(store.memory_used() <= 700);
        assert!(prerender.is_paused());

        // Dropping back below Critical lifts the suspension
        let relief = driver.check_pressure();
        assert!(relief.is_some_and(|t| t.to < MemoryPressure::Critical));
        assert!(!prerender.is_paused());
    }

    #[test]
    fn test_manual_pause_survives_pressure_relief() {
        let (driver, store, prerender) = driver(1000);
        prerender.pause();
        fill(&store, 1, 980);
        driver.check_pressure();
        store.clear();
        driver.check_pressure();
        assert!(prerender.is_paused());
    }

    #[test]
    fn test_limit_defaults_to_cache_limit() {
        let (driver, store, _) = driver(1000);
        driver.set_memory_limit(None);
        assert_eq!(driver.memory_limit(), store.max_memory());
    }

    #[test]
    fn test_background_task_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = BackgroundTask::spawn("test-ticker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let Some(task) = task else {
            panic!("task did not start");
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        task.shutdown();
        let after = ticks.load(Ordering::SeqCst);
        assert!(after >= 3);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }
}
