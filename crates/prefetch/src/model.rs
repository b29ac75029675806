//! Next-page prediction
//!
//! Candidate pages are scored on four features, each in `[0, 1]`:
//! proximity to the current page, visit frequency, recency of the last visit
//! and accumulated dwell time. The blend of the features depends on the
//! reading pattern.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::behavior::UserSession;
use crate::pattern::ReadingPattern;

const FORWARD_BIAS: f64 = 1.2;
const MS_PER_HOUR: f64 = 3_600_000.0;
const NEED_HORIZON_MS: f64 = 5000.0;

/// Relative weight of each prediction feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub proximity: f64,
    pub frequency: f64,
    pub recency: f64,
    pub duration: f64,
}

impl FeatureWeights {
    pub const fn new(proximity: f64, frequency: f64, recency: f64, duration: f64) -> Self {
        Self {
            proximity,
            frequency,
            recency,
            duration,
        }
    }

    /// Preset blend for a reading pattern
    pub fn for_pattern(pattern: ReadingPattern) -> Self {
        match pattern {
            ReadingPattern::Sequential => Self::new(0.6, 0.2, 0.15, 0.05),
            ReadingPattern::Skipping => Self::new(0.2, 0.4, 0.3, 0.1),
            ReadingPattern::Searching => Self::new(0.1, 0.5, 0.3, 0.1),
            ReadingPattern::Random => Self::new(0.15, 0.35, 0.35, 0.15),
            ReadingPattern::Reviewing => Self::new(0.25, 0.3, 0.25, 0.2),
        }
    }

    /// Scale the weights so they sum to one
    ///
    /// Negative weights are treated as zero; an all-zero set falls back to
    /// the general-purpose blend.
    pub fn normalized(self) -> Self {
        let clamp = |w: f64| if w.is_finite() { w.max(0.0) } else { 0.0 };
        let weights = Self::new(
            clamp(self.proximity),
            clamp(self.frequency),
            clamp(self.recency),
            clamp(self.duration),
        );
        let sum = weights.proximity + weights.frequency + weights.recency + weights.duration;
        if sum <= f64::EPSILON {
            return Self::default();
        }
        Self::new(
            weights.proximity / sum,
            weights.frequency / sum,
            weights.recency / sum,
            weights.duration / sum,
        )
    }
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self::new(0.4, 0.3, 0.2, 0.1)
    }
}

/// A page the user is likely to open soon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationPrediction {
    pub page: u32,
    /// Likelihood in `[0, 1]`
    pub probability: f64,
    /// `probability` on a 0-10 scale, rounded down
    pub priority: u8,
    /// When the page is expected to be needed, in wall-clock ms
    pub estimated_need_ms: u64,
}

impl NavigationPrediction {
    pub fn new(page: u32, probability: f64, now_ms: u64) -> Self {
        let probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let lead_ms = if probability > 0.0 {
            (NEED_HORIZON_MS / probability) as u64
        } else {
            u64::MAX
        };

        Self {
            page,
            probability,
            priority: (probability * 10.0).floor().clamp(0.0, 10.0) as u8,
            estimated_need_ms: now_ms.saturating_add(lead_ms),
        }
    }
}

/// Scores candidate pages with per-pattern feature weights
#[derive(Debug, Clone)]
pub struct PredictionModel {
    weights: HashMap<ReadingPattern, FeatureWeights>,
}

impl PredictionModel {
    pub fn new() -> Self {
        let weights = ReadingPattern::ALL
            .into_iter()
            .map(|pattern| (pattern, FeatureWeights::for_pattern(pattern)))
            .collect();
        Self { weights }
    }

    pub fn weights(&self, pattern: ReadingPattern) -> FeatureWeights {
        self.weights
            .get(&pattern)
            .copied()
            .unwrap_or_else(|| FeatureWeights::for_pattern(pattern))
    }

    /// Replace the weights used for one pattern
    pub fn set_weights(&mut self, pattern: ReadingPattern, weights: FeatureWeights) {
        self.weights.insert(pattern, weights.normalized());
    }

    /// Restore the preset weights for every pattern
    pub fn reset_weights(&mut self) {
        *self = Self::new();
    }

    /// Rank the pages most likely to be opened after `current`
    ///
    /// Candidates are the `count + 2` pages on either side of `current` plus
    /// every page visited in the session. At most `count` predictions are
    /// returned, most likely first, with ties going to the closer page.
    pub fn predict(
        &self,
        current: u32,
        session: &UserSession,
        pattern: ReadingPattern,
        count: usize,
        now_ms: u64,
    ) -> Vec<NavigationPrediction> {
        if count == 0 {
            return Vec::new();
        }

        let reach = u32::try_from(count + 2).unwrap_or(u32::MAX);
        let mut candidates = BTreeSet::new();
        for offset in 1..=reach {
            if let Some(page) = current.checked_add(offset) {
                candidates.insert(page);
            }
            if let Some(page) = current.checked_sub(offset) {
                candidates.insert(page);
            }
        }
        candidates.extend(session.visit_frequency.keys().copied());
        candidates.remove(&current);

        let max_visits = candidates
            .iter()
            .map(|&page| session.visits(page))
            .max()
            .unwrap_or(0)
            .max(1);
        let max_dwell = candidates
            .iter()
            .map(|&page| session.dwell_total(page))
            .max()
            .unwrap_or(0)
            .max(1);

        let weights = self.weights(pattern);
        let mut predictions: Vec<NavigationPrediction> = candidates
            .into_iter()
            .map(|page| {
                let probability = weights.proximity * proximity_score(current, page)
                    + weights.frequency * (f64::from(session.visits(page)) / f64::from(max_visits))
                    + weights.recency * recency_score(session.last_access_ms(page), now_ms)
                    + weights.duration
                        * (session.dwell_total(page) as f64 / max_dwell as f64);
                NavigationPrediction::new(page, probability, now_ms)
            })
            .collect();

        predictions.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.page.abs_diff(current).cmp(&b.page.abs_diff(current)))
                .then_with(|| a.page.cmp(&b.page))
        });
        predictions.truncate(count);
        predictions
    }
}

impl Default for PredictionModel {
    fn default() -> Self {
        Self::new()
    }
}

fn proximity_score(current: u32, page: u32) -> f64 {
    let distance = page.abs_diff(current);
    if distance == 0 {
        return 0.0;
    }
    let score = 1.0 / (1.0 + f64::from(distance));
    let score = if page > current { score * FORWARD_BIAS } else { score };
    score.min(1.0)
}

fn recency_score(last_access_ms: Option<u64>, now_ms: u64) -> f64 {
    match last_access_ms {
        Some(at) => {
            let hours = now_ms.saturating_sub(at) as f64 / MS_PER_HOUR;
            1.0 / (1.0 + hours)
        }
        None => 0.0,
    }
}
