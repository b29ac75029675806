//! Predictive prerendering
//!
//! Each page view updates the behavior model and plans a round of
//! background renders for pages the reader is likely to open next. Only
//! pages that are neither cached nor already queued are requested, and
//! always at [`RenderPriority::Background`] so foreground requests win.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use pdf_editor_prefetch::{
    now_ms, BehaviorTracker, NavigationPrediction, PrerenderPlanner, PrerenderStrategy, ReadingPattern,
    UserSession,
};
use pdf_editor_scheduler::{RenderPriority, RequestId};

use crate::error::EngineResult;
use crate::events::EngineEvent;
use crate::lock;
use crate::pipeline::RenderPipeline;

struct PrerenderState {
    tracker: BehaviorTracker,
    planner: PrerenderPlanner,
}

/// Turns navigation predictions into background render requests
pub struct PrerenderScheduler {
    state: Mutex<PrerenderState>,
    enabled: AtomicBool,
    paused: AtomicBool,
}

impl PrerenderScheduler {
    pub fn new(strategy: PrerenderStrategy, enabled: bool) -> Self {
        Self {
            state: Mutex::new(PrerenderState {
                tracker: BehaviorTracker::new(),
                planner: PrerenderPlanner::new(strategy),
            }),
            enabled: AtomicBool::new(enabled),
            paused: AtomicBool::new(false),
        }
    }

    /// Record a page view and prerender around it
    ///
    /// The zoom level doubles as the render scale of the prerendered pages.
    /// Returns the ids of the requests that were queued.
    pub fn on_page_view(&self, pipeline: &RenderPipeline, page: u32, dwell: Duration, zoom: f64) -> Vec<RequestId> {
        self.observe(pipeline, page, zoom, |tracker| tracker.record_page_view(page, dwell, zoom))
    }

    /// Record a page reached by following a search hit
    pub fn on_search_navigation(
        &self,
        pipeline: &RenderPipeline,
        page: u32,
        dwell: Duration,
        zoom: f64,
    ) -> Vec<RequestId> {
        self.observe(pipeline, page, zoom, |tracker| {
            tracker.record_search_navigation(page, dwell, zoom)
        })
    }

    fn observe<F>(&self, pipeline: &RenderPipeline, page: u32, zoom: f64, record: F) -> Vec<RequestId>
    where
        F: FnOnce(&mut BehaviorTracker) -> Option<ReadingPattern>,
    {
        let active = self.is_active();
        let page_count = pipeline.page_count();

        let (changed, predictions) = {
            let mut state = lock(&self.state);
            let PrerenderState { tracker, planner } = &mut *state;

            let changed = record(tracker);
            if let Some(pattern) = changed {
                planner.on_pattern_changed(pattern);
            }
            planner.adjust_for_reading_speed(tracker.average_recent_dwell());

            let predictions = if active && page_count > 0 {
                Some(planner.plan(page, tracker, page_count, now_ms()))
            } else {
                None
            };
            (changed, predictions)
        };

        if let Some(pattern) = changed {
            info!(%pattern, "reading pattern detected");
            pipeline.notify(EngineEvent::PatternDetected(pattern));
        }

        let Some(predictions) = predictions else {
            return Vec::new();
        };
        pipeline.notify(EngineEvent::PredictionUpdated(predictions.clone()));
        self.schedule(pipeline, &predictions, zoom)
    }

    fn schedule(&self, pipeline: &RenderPipeline, predictions: &[NavigationPrediction], scale: f64) -> Vec<RequestId> {
        let quality = pipeline.default_quality();
        let mut queued = Vec::new();
        for prediction in predictions {
            if pipeline.has_page_in_cache(prediction.page, scale, 0)
                || pipeline.is_queued(prediction.page, scale, 0, quality)
            {
                continue;
            }
            match pipeline.enqueue(prediction.page, scale, 0, quality, RenderPriority::Background) {
                Ok(id) => queued.push(id),
                Err(err) => debug!(page = prediction.page, error = %err, "prerender skipped"),
            }
        }
        if !queued.is_empty() {
            debug!(count = queued.len(), "queued prerender requests");
        }
        queued
    }

    pub fn strategy(&self) -> PrerenderStrategy {
        lock(&self.state).planner.strategy()
    }

    pub fn set_strategy(&self, strategy: PrerenderStrategy) {
        let mut state = lock(&self.state);
        state.planner.set_strategy(strategy);
        let pattern = state.tracker.current_pattern();
        state.planner.on_pattern_changed(pattern);
    }

    /// Number of pages the adaptive strategy currently predicts
    pub fn depth(&self) -> usize {
        lock(&self.state).planner.depth()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Suspend prerendering; page views are still recorded
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("prerendering paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("prerendering resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        self.is_enabled() && !self.is_paused()
    }

    pub fn current_pattern(&self) -> ReadingPattern {
        lock(&self.state).tracker.current_pattern()
    }

    pub fn last_predictions(&self) -> Vec<NavigationPrediction> {
        lock(&self.state).planner.last_predictions().to_vec()
    }

    /// Fraction of prerender rounds that contained the page visited next
    pub fn accuracy(&self) -> f64 {
        lock(&self.state).planner.accuracy()
    }

    pub fn start_session(&self) {
        lock(&self.state).tracker.start_session();
    }

    pub fn end_session(&self) -> Option<UserSession> {
        lock(&self.state).tracker.end_session()
    }

    pub fn export_history(&self, path: &Path) -> EngineResult<()> {
        lock(&self.state).tracker.export_history(path)?;
        Ok(())
    }

    /// Forget per-document navigation state
    ///
    /// Archived sessions survive so the model keeps what it learned about
    /// the reader.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        if state.tracker.end_session().is_some() {
            debug!("archived reading session on document change");
        }
        state.tracker.reset();
        state.planner.reset();
    }
}

impl std::fmt::Debug for PrerenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrerenderScheduler")
            .field("enabled", &self.is_enabled())
            .field("paused", &self.is_paused())
            .finish()
    }
}
