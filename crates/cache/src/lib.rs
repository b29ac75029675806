//! PDF Editor Cache Library
//!
//! Bounded in-memory cache for rendered artifacts with score-based eviction,
//! transparent compression and memory pressure classification.

pub mod clock;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod events;
pub mod eviction;
pub mod key;
mod persist;
pub mod pressure;
pub mod store;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use compression::CompressionLevel;
pub use config::{CacheConfig, CompressionSettings, ConfigError, MIN_CLEANUP_INTERVAL};
pub use entry::{CachePriority, EntryInfo, Payload, PayloadKind};
pub use error::{CacheError, CacheResult};
pub use events::{CacheEvent, CacheListener};
pub use eviction::PriorityWeights;
pub use key::{CacheKey, ContentType};
pub use pressure::{MemoryPressure, PressureMonitor, PressureResponder, PressureTransition};
pub use store::{CacheStats, CacheStore, MaintenanceReport};
