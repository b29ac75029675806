//! Prerender planning
//!
//! The planner decides which pages to render ahead of time. Fixed strategies
//! use a static window around the current page; the adaptive strategy asks
//! the [`PredictionModel`] and tunes its depth to reading speed and pattern.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::behavior::BehaviorTracker;
use crate::model::{NavigationPrediction, PredictionModel};
use crate::pattern::ReadingPattern;

/// Prediction depth of the adaptive strategy before any tuning
pub const DEFAULT_DEPTH: usize = 5;
pub const MIN_DEPTH: usize = 2;
pub const MAX_DEPTH: usize = 8;

/// Above this mean dwell the reader is slow and more pages are prepared
const SLOW_READER_DWELL: Duration = Duration::from_secs(30);
/// Below this mean dwell the reader is fast and fewer pages are prepared
const FAST_READER_DWELL: Duration = Duration::from_secs(5);

/// How far ahead to prerender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrerenderStrategy {
    /// Next two pages
    Conservative,
    /// Next four pages and the previous one
    #[default]
    Balanced,
    /// Next seven pages and the previous three
    Aggressive,
    /// Pages chosen by the prediction model
    Adaptive,
}

impl PrerenderStrategy {
    pub const ALL: [PrerenderStrategy; 4] = [
        PrerenderStrategy::Conservative,
        PrerenderStrategy::Balanced,
        PrerenderStrategy::Aggressive,
        PrerenderStrategy::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrerenderStrategy::Conservative => "conservative",
            PrerenderStrategy::Balanced => "balanced",
            PrerenderStrategy::Aggressive => "aggressive",
            PrerenderStrategy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for PrerenderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrerenderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrerenderStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown prerender strategy: {s}"))
    }
}

/// Adaptive depth for a reading pattern
fn depth_for_pattern(pattern: ReadingPattern) -> usize {
    match pattern {
        ReadingPattern::Sequential => 5,
        ReadingPattern::Skipping => 3,
        ReadingPattern::Searching => 2,
        ReadingPattern::Random => 4,
        ReadingPattern::Reviewing => 6,
    }
}

/// Chooses pages to prerender and tracks how often it guessed right
#[derive(Debug)]
pub struct PrerenderPlanner {
    strategy: PrerenderStrategy,
    depth: usize,
    model: PredictionModel,
    last_predictions: Vec<NavigationPrediction>,
    rounds_evaluated: u64,
    rounds_hit: u64,
}

impl PrerenderPlanner {
    pub fn new(strategy: PrerenderStrategy) -> Self {
        Self {
            strategy,
            depth: DEFAULT_DEPTH,
            model: PredictionModel::new(),
            last_predictions: Vec::new(),
            rounds_evaluated: 0,
            rounds_hit: 0,
        }
    }

    pub fn strategy(&self) -> PrerenderStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: PrerenderStrategy) {
        if strategy != self.strategy {
            debug!("Prerender strategy: {} -> {}", self.strategy, strategy);
            self.strategy = strategy;
        }
    }

    /// Number of pages the adaptive strategy predicts
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth.clamp(MIN_DEPTH, MAX_DEPTH);
    }

    /// React to a pattern change; only the adaptive strategy resizes
    pub fn on_pattern_changed(&mut self, pattern: ReadingPattern) {
        if self.strategy == PrerenderStrategy::Adaptive {
            self.depth = depth_for_pattern(pattern);
            debug!("Prerender depth {} for {} reading", self.depth, pattern);
        }
    }

    /// Widen the window for slow readers and narrow it for fast ones
    pub fn adjust_for_reading_speed(&mut self, average_dwell: Option<Duration>) {
        let Some(dwell) = average_dwell else {
            return;
        };
        if dwell > SLOW_READER_DWELL {
            self.depth = (self.depth + 1).min(MAX_DEPTH);
        } else if dwell < FAST_READER_DWELL {
            self.depth = self.depth.saturating_sub(1).max(MIN_DEPTH);
        }
    }

    /// Plan the next prerender round for the page the user is on
    ///
    /// The previous round is scored against `current` first, so calling this
    /// on every page view keeps the accuracy figure current. Pages at or past
    /// `page_count` are never returned.
    pub fn plan(
        &mut self,
        current: u32,
        tracker: &BehaviorTracker,
        page_count: u32,
        now_ms: u64,
    ) -> Vec<NavigationPrediction> {
        self.score_previous_round(current);

        let mut predictions = match self.strategy {
            PrerenderStrategy::Conservative => fixed_window(current, &[(2, 0.8, 0.3)], &[], now_ms),
            PrerenderStrategy::Balanced => {
                fixed_window(current, &[(4, 0.7, 0.15)], &[(1, 0.3, 0.0)], now_ms)
            }
            PrerenderStrategy::Aggressive => {
                fixed_window(current, &[(7, 0.6, 0.08)], &[(3, 0.4, 0.1)], now_ms)
            }
            PrerenderStrategy::Adaptive => self.model.predict(
                current,
                tracker.session(),
                tracker.current_pattern(),
                self.depth,
                now_ms,
            ),
        };
        predictions.retain(|prediction| prediction.page < page_count);

        self.last_predictions = predictions.clone();
        predictions
    }

    fn score_previous_round(&mut self, current: u32) {
        if self.last_predictions.is_empty() {
            return;
        }
        self.rounds_evaluated += 1;
        if self.last_predictions.iter().any(|p| p.page == current) {
            self.rounds_hit += 1;
        }
    }

    pub fn last_predictions(&self) -> &[NavigationPrediction] {
        &self.last_predictions
    }

    /// Fraction of scored rounds whose predictions contained the page
    /// visited next
    pub fn accuracy(&self) -> f64 {
        if self.rounds_evaluated == 0 {
            0.0
        } else {
            self.rounds_hit as f64 / self.rounds_evaluated as f64
        }
    }

    /// Forget predictions and accuracy, keeping strategy and weights
    pub fn reset(&mut self) {
        self.last_predictions.clear();
        self.rounds_evaluated = 0;
        self.rounds_hit = 0;
        self.depth = DEFAULT_DEPTH;
    }
}

impl Default for PrerenderPlanner {
    fn default() -> Self {
        Self::new(PrerenderStrategy::default())
    }
}

/// Static window of `(pages, first probability, step)` runs
fn fixed_window(
    current: u32,
    forward: &[(u32, f64, f64)],
    backward: &[(u32, f64, f64)],
    now_ms: u64,
) -> Vec<NavigationPrediction> {
    let mut predictions = Vec::new();
    for &(pages, first, step) in forward {
        for offset in 1..=pages {
            if let Some(page) = current.checked_add(offset) {
                let probability = first - f64::from(offset - 1) * step;
                predictions.push(NavigationPrediction::new(page, probability, now_ms));
            }
        }
    }
    for &(pages, first, step) in backward {
        for offset in 1..=pages {
            if let Some(page) = current.checked_sub(offset) {
                let probability = first - f64::from(offset - 1) * step;
                predictions.push(NavigationPrediction::new(page, probability, now_ms));
            }
        }
    }
    predictions
}
