//! Engine configuration
//!
//! Wraps the [`CacheConfig`] with the knobs of the pipeline, the prerender
//! scheduler and the pressure thread. The maintenance thread runs on the
//! cache's own `cleanup_interval`. Loaded the same way as the cache
//! settings: built in code, read from TOML, or taken from `PDF_EDITOR_*`
//! environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pdf_editor_cache::{CacheConfig, ConfigError};
use pdf_editor_prefetch::PrerenderStrategy;
use pdf_editor_render::RenderQuality;

const MB: usize = 1024 * 1024;

/// Configuration for a [`RenderEngine`](crate::RenderEngine)
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    /// Renders allowed to run at once
    pub max_concurrent_renders: usize,
    /// How long an idle worker waits before polling the queue again
    pub worker_poll_interval: Duration,
    /// How often memory pressure is sampled
    pub pressure_interval: Duration,
    /// Limit the pressure monitor measures against; the cache limit if unset
    pub memory_limit: Option<usize>,
    pub prerender_strategy: PrerenderStrategy,
    pub prerender_enabled: bool,
    pub default_quality: RenderQuality,
    /// Entries idle longer than this are dropped under high pressure
    pub idle_threshold: Duration,
    /// Usage ratio the emergency response evicts down to
    pub emergency_target: f64,
    /// Where [`save_cache`](crate::RenderEngine::save_cache) writes
    pub export_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            max_concurrent_renders: 4,
            worker_poll_interval: Duration::from_millis(10),
            pressure_interval: Duration::from_secs(5),
            memory_limit: None,
            prerender_strategy: PrerenderStrategy::default(),
            prerender_enabled: true,
            default_quality: RenderQuality::Normal,
            idle_threshold: Duration::from_secs(5 * 60),
            emergency_target: 0.7,
            export_path: CacheConfig::default_export_path(),
        }
    }
}

/// On-disk representation; missing keys keep their defaults
#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_concurrent_renders: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pressure_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_limit_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prerender_strategy: Option<PrerenderStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prerender_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_quality: Option<RenderQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idle_threshold_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emergency_target: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    export_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<toml::Table>,
}

impl EngineConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self.normalized()
    }

    pub fn with_max_concurrent_renders(mut self, renders: usize) -> Self {
        self.max_concurrent_renders = renders;
        self.normalized()
    }

    pub fn with_worker_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval = interval;
        self
    }

    pub fn with_pressure_interval(mut self, interval: Duration) -> Self {
        self.pressure_interval = interval;
        self.normalized()
    }

    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes;
        self.normalized()
    }

    pub fn with_prerender_strategy(mut self, strategy: PrerenderStrategy) -> Self {
        self.prerender_strategy = strategy;
        self
    }

    pub fn with_prerender_enabled(mut self, enabled: bool) -> Self {
        self.prerender_enabled = enabled;
        self
    }

    pub fn with_default_quality(mut self, quality: RenderQuality) -> Self {
        self.default_quality = quality;
        self
    }

    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = path.into();
        self
    }

    /// Clamp every value into its working range
    pub fn normalized(mut self) -> Self {
        self.cache = self.cache.normalized();
        self.max_concurrent_renders = self.max_concurrent_renders.max(1);
        if self.pressure_interval.is_zero() {
            self.pressure_interval = Duration::from_millis(100);
        }
        self.memory_limit = self.memory_limit.map(|bytes| bytes.max(1));
        if !self.emergency_target.is_finite() || !(0.0..=1.0).contains(&self.emergency_target) {
            self.emergency_target = 0.7;
        }
        self
    }

    /// Limit the pressure monitor measures against
    pub fn effective_memory_limit(&self) -> usize {
        self.memory_limit.unwrap_or(self.cache.max_memory_bytes)
    }

    /// Loads configuration from environment variables.
    ///
    /// Cache settings come from [`CacheConfig::from_env`]. Engine variables:
    /// - `PDF_EDITOR_RENDER_THREADS`: concurrent renders (default: 4)
    /// - `PDF_EDITOR_MEMORY_LIMIT_MB`: pressure monitor limit in MB
    /// - `PDF_EDITOR_PRERENDER`: `true` or `false`
    /// - `PDF_EDITOR_PRERENDER_STRATEGY`: `conservative`, `balanced`,
    ///   `aggressive` or `adaptive`
    /// - `PDF_EDITOR_RENDER_QUALITY`: `draft`, `normal`, `high` or `print`
    ///
    /// # Errors
    /// Returns an error if any variable holds an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            cache: CacheConfig::from_env()?,
            ..Self::default()
        };

        if let Some(threads) = env_parse::<usize>("PDF_EDITOR_RENDER_THREADS")? {
            config.max_concurrent_renders = threads;
        }
        if let Some(mb) = env_parse::<usize>("PDF_EDITOR_MEMORY_LIMIT_MB")? {
            config.memory_limit = Some(mb.saturating_mul(MB));
        }
        if let Some(enabled) = env_parse::<bool>("PDF_EDITOR_PRERENDER")? {
            config.prerender_enabled = enabled;
        }
        if let Some(strategy) = env_parse::<PrerenderStrategy>("PDF_EDITOR_PRERENDER_STRATEGY")? {
            config.prerender_strategy = strategy;
        }
        if let Some(quality) = env_parse::<RenderQuality>("PDF_EDITOR_RENDER_QUALITY")? {
            config.default_quality = quality;
        }

        Ok(config.normalized())
    }

    /// Loads configuration from a TOML file.
    ///
    /// ```toml
    /// max_concurrent_renders = 4
    /// prerender_strategy = "adaptive"
    /// default_quality = "high"
    ///
    /// [cache]
    /// max_memory_mb = 512
    /// compression_level = "fast"
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: EngineConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();

        if let Some(cache) = file.cache {
            config.cache = CacheConfig::from_toml(&toml::to_string(&cache)?)?;
        }
        if let Some(renders) = file.max_concurrent_renders {
            config.max_concurrent_renders = renders;
        }
        if let Some(ms) = file.worker_poll_interval_ms {
            config.worker_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = file.pressure_interval_secs {
            config.pressure_interval = Duration::from_secs(secs);
        }
        if let Some(mb) = file.memory_limit_mb {
            config.memory_limit = Some(mb.saturating_mul(MB));
        }
        if let Some(strategy) = file.prerender_strategy {
            config.prerender_strategy = strategy;
        }
        if let Some(enabled) = file.prerender_enabled {
            config.prerender_enabled = enabled;
        }
        if let Some(quality) = file.default_quality {
            config.default_quality = quality;
        }
        if let Some(secs) = file.idle_threshold_secs {
            config.idle_threshold = Duration::from_secs(secs);
        }
        if let Some(target) = file.emergency_target {
            config.emergency_target = target;
        }
        if let Some(path) = file.export_path {
            config.export_path = path;
        }

        Ok(config.normalized())
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let cache: toml::Table = toml::from_str(&self.cache.to_toml()?)?;
        let file = EngineConfigFile {
            max_concurrent_renders: Some(self.max_concurrent_renders),
            worker_poll_interval_ms: Some(self.worker_poll_interval.as_millis() as u64),
            pressure_interval_secs: Some(self.pressure_interval.as_secs()),
            memory_limit_mb: self.memory_limit.map(|bytes| bytes / MB),
            prerender_strategy: Some(self.prerender_strategy),
            prerender_enabled: Some(self.prerender_enabled),
            default_quality: Some(self.default_quality),
            idle_threshold_secs: Some(self.idle_threshold.as_secs()),
            emergency_target: Some(self.emergency_target),
            export_path: Some(self.export_path.clone()),
            cache: Some(cache),
        };
        Ok(toml::to_string_pretty(&file)?)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}
