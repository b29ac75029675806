//! Engine notifications
//!
//! Every event is published from the pipeline's completion thread after the
//! state change it describes has been committed.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use pdf_editor_cache::{CacheEvent, MemoryPressure};
use pdf_editor_prefetch::{NavigationPrediction, ReadingPattern};
use pdf_editor_render::RenderError;
use pdf_editor_scheduler::RequestId;

use crate::lock;
use crate::pipeline::{RenderResult, RenderStats};

/// Something observable happened in the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Hit, miss, eviction, compression or corruption in the page cache
    Cache(CacheEvent),
    /// Memory use crossed into the High or Critical band
    MemoryThresholdExceeded { current: usize, limit: usize },
    PressureChanged { from: MemoryPressure, to: MemoryPressure },
    RenderCompleted(RenderResult),
    RenderFailed { id: RequestId, error: RenderError },
    PredictionUpdated(Vec<NavigationPrediction>),
    PatternDetected(ReadingPattern),
    StatisticsUpdated(RenderStats),
}

/// Callback invoked for each engine event
pub type EngineListener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Fans events out to callbacks and channel subscribers
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<EngineListener>>,
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: EngineListener) {
        lock(&self.listeners).push(listener);
    }

    /// Open a channel that receives every event published from now on
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (sender, receiver) = mpsc::channel();
        lock(&self.subscribers).push(sender);
        receiver
    }

    pub fn publish(&self, event: EngineEvent) {
        let listeners = lock(&self.listeners).clone();
        for listener in &listeners {
            listener(&event);
        }

        lock(&self.subscribers).retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Number of callbacks and live channels
    pub fn len(&self) -> usize {
        lock(&self.listeners).len() + lock(&self.subscribers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &lock(&self.listeners).len())
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}
