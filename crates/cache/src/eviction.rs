//! Retention scoring and victim selection

use serde::{Deserialize, Serialize};

use crate::entry::{CacheEntry, CachePriority};
use crate::key::CacheKey;

/// Score added per recorded access
pub const ACCESS_WEIGHT: f64 = 10.0;

/// Base retention weight per priority tier
///
/// Critical has no weight: Critical entries never enter candidacy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub background: f64,
    pub low: f64,
    pub normal: f64,
    pub high: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            background: 0.0,
            low: 0.1,
            normal: 1.0,
            high: 10.0,
        }
    }
}

impl PriorityWeights {
    pub fn weight(&self, priority: CachePriority) -> f64 {
        match priority {
            CachePriority::Background => self.background,
            CachePriority::Low => self.low,
            CachePriority::Normal => self.normal,
            CachePriority::High | CachePriority::Critical => self.high,
        }
    }
}

/// Retention score of an entry at `now_ms`; higher is kept longer
pub(crate) fn retention_score(entry: &CacheEntry, weights: &PriorityWeights, now_ms: u64) -> f64 {
    let age_secs = now_ms.saturating_sub(entry.created_at_ms) as f64 / 1000.0;
    let idle_secs = now_ms.saturating_sub(entry.last_accessed_ms) as f64 / 1000.0;
    weights.weight(entry.priority) - age_secs + entry.access_count as f64 * ACCESS_WEIGHT
        - idle_secs
}

/// Pick up to `count` non-Critical victims, lowest score first
///
/// Equal scores evict the earliest inserted entry first.
pub(crate) fn select_victims<'a, I>(
    entries: I,
    weights: &PriorityWeights,
    now_ms: u64,
    count: usize,
) -> Vec<CacheKey>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    let mut candidates: Vec<(f64, u64, &CacheKey)> = entries
        .into_iter()
        .filter(|entry| entry.priority != CachePriority::Critical)
        .map(|entry| {
            (
                retention_score(entry, weights, now_ms),
                entry.sequence,
                &entry.key,
            )
        })
        .collect();

    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    candidates
        .into_iter()
        .take(count)
        .map(|(_, _, key)| key.clone())
        .collect()
}
