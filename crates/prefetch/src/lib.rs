//! PDF Editor Prefetch Library
//!
//! Navigation tracking and prediction for speculative page prerendering.
//!
//! The [`BehaviorTracker`] records page views and classifies how the user is
//! moving through the document. The [`PrerenderPlanner`] turns that picture
//! into a ranked list of pages worth rendering before they are asked for.

mod behavior;
mod error;
mod model;
mod pattern;
mod planner;

pub use behavior::{now_ms, BehaviorTracker, PageAccess, UserSession, HISTORY_LIMIT, WINDOW_SIZE};
pub use error::{PrefetchError, PrefetchResult};
pub use model::{FeatureWeights, NavigationPrediction, PredictionModel};
pub use pattern::{detect_pattern, ReadingPattern, MIN_PATTERN_WINDOW};
pub use planner::{PrerenderPlanner, PrerenderStrategy, DEFAULT_DEPTH, MAX_DEPTH, MIN_DEPTH};
