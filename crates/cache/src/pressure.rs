//! Memory pressure classification
//!
//! The monitor is sampled on an interval and only reports level changes, so
//! a sustained level triggers its response once instead of on every sample.

use serde::{Deserialize, Serialize};

/// Memory pressure level derived from the usage ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemoryPressure {
    /// Below 50% of the limit
    None,
    /// 50% to 70%
    Low,
    /// 70% to 85%
    Medium,
    /// 85% to 95%
    High,
    /// 95% and above
    Critical,
}

impl MemoryPressure {
    /// Classify a usage ratio
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::None
        } else if utilization < 0.7 {
            MemoryPressure::Low
        } else if utilization < 0.85 {
            MemoryPressure::Medium
        } else if utilization < 0.95 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Classify byte usage against a limit; a zero limit reads as no pressure
    pub fn from_usage(current: usize, limit: usize) -> Self {
        Self::from_utilization(utilization(current, limit))
    }
}

impl Default for MemoryPressure {
    fn default() -> Self {
        MemoryPressure::None
    }
}

/// Usage ratio guarded against a zero limit
pub fn utilization(current: usize, limit: usize) -> f64 {
    if limit == 0 {
        0.0
    } else {
        current as f64 / limit as f64
    }
}

/// A change of pressure level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureTransition {
    pub from: MemoryPressure,
    pub to: MemoryPressure,
    pub current: usize,
    pub limit: usize,
}

/// Edge-triggered pressure state machine
#[derive(Debug, Default)]
pub struct PressureMonitor {
    level: MemoryPressure,
    samples: u64,
}

impl PressureMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level
    pub fn level(&self) -> MemoryPressure {
        self.level
    }

    /// Number of samples taken so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Record a sample; returns a transition only when the level changed
    pub fn sample(&mut self, current: usize, limit: usize) -> Option<PressureTransition> {
        self.samples += 1;
        let next = MemoryPressure::from_usage(current, limit);
        if next == self.level {
            return None;
        }

        let transition = PressureTransition {
            from: self.level,
            to: next,
            current,
            limit,
        };
        self.level = next;
        Some(transition)
    }

    /// Forget the current level
    pub fn reset(&mut self) {
        self.level = MemoryPressure::None;
    }
}

/// Receives the escalating responses to pressure transitions
pub trait PressureResponder {
    /// Called for every transition before the level action
    fn level_changed(&self, _transition: &PressureTransition) {}

    /// Medium: compress entries that are still uncompressed
    fn compress(&self) {}

    /// High: drop idle entries and compact the table
    fn collect_and_compact(&self) {}

    /// Critical: compress everything, evict to a safe margin, stop prerendering
    fn emergency(&self, _transition: &PressureTransition) {}
}

/// Run the response that belongs to the level a transition entered
pub fn respond(transition: &PressureTransition, responder: &dyn PressureResponder) {
    responder.level_changed(transition);
    match transition.to {
        MemoryPressure::None | MemoryPressure::Low => {}
        MemoryPressure::Medium => responder.compress(),
        MemoryPressure::High => responder.collect_and_compact(),
        MemoryPressure::Critical => responder.emergency(transition),
    }
}
