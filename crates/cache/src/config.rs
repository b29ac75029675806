//! Cache configuration
//!
//! Settings can be built programmatically, read from a TOML file or taken
//! from `PDF_EDITOR_CACHE_*` environment variables. Every value is
//! normalized before it reaches the store so ratio computations never see a
//! zero limit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compression::{CompressionLevel, DEFAULT_COMPRESSION_THRESHOLD};
use crate::eviction::PriorityWeights;

/// Smallest accepted memory limit (1 MiB)
pub const MIN_MEMORY_BYTES: usize = 1024 * 1024;

/// Shortest accepted maintenance interval
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(100);

const MB: usize = 1024 * 1024;

/// Compression knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub level: CompressionLevel,
    /// Entries above this size are always compression candidates
    pub threshold_bytes: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: CompressionLevel::Balanced,
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl CompressionSettings {
    /// Compression is active only when enabled with a real level
    pub fn is_active(&self) -> bool {
        self.enabled && self.level != CompressionLevel::None
    }
}

/// Configuration for the cache store
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Memory limit in bytes
    pub max_memory_bytes: usize,
    /// Maximum number of entries
    pub max_items: usize,
    /// Entries older than this are swept; zero disables the sweep
    pub item_max_age: Duration,
    /// Low and Background entries older than this are swept opportunistically
    pub stale_low_priority_age: Duration,
    /// How often the engine runs expiry sweeps and limit enforcement
    pub cleanup_interval: Duration,
    pub compression: CompressionSettings,
    pub priority_weights: PriorityWeights,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 256 * MB,
            max_items: 1000,
            item_max_age: Duration::from_secs(30 * 60),
            stale_low_priority_age: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(60),
            compression: CompressionSettings::default(),
            priority_weights: PriorityWeights::default(),
        }
    }
}

/// On-disk representation; missing keys keep their defaults
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_memory_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_max_age_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stale_low_priority_age_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleanup_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_level: Option<CompressionLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_threshold_kb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority_weights: Option<PriorityWeights>,
}

impl CacheConfig {
    /// Creates a configuration with the given memory limit (MB) and item cap
    pub fn new(max_memory_mb: usize, max_items: usize) -> Self {
        Self {
            max_memory_bytes: max_memory_mb * MB,
            max_items,
            ..Default::default()
        }
        .normalized()
    }

    /// Sets the memory limit in megabytes.
    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.max_memory_bytes = mb.saturating_mul(MB);
        self.normalized()
    }

    /// Sets the memory limit in bytes.
    pub fn with_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self.normalized()
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self.normalized()
    }

    pub fn with_item_max_age(mut self, age: Duration) -> Self {
        self.item_max_age = age;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self.normalized()
    }

    pub fn with_compression(mut self, settings: CompressionSettings) -> Self {
        self.compression = settings;
        self
    }

    pub fn with_priority_weights(mut self, weights: PriorityWeights) -> Self {
        self.priority_weights = weights;
        self
    }

    /// Clamp limits to safe minimums
    pub fn normalized(mut self) -> Self {
        self.max_memory_bytes = self.max_memory_bytes.max(MIN_MEMORY_BYTES);
        self.max_items = self.max_items.max(1);
        self.cleanup_interval = self.cleanup_interval.max(MIN_CLEANUP_INTERVAL);
        self
    }

    /// Default location for cache exports.
    ///
    /// - macOS: ~/Library/Caches/pdf-editor/render-cache.json
    /// - Linux: ~/.cache/pdf-editor/render-cache.json
    /// - Windows: %LOCALAPPDATA%\pdf-editor\render-cache.json
    pub fn default_export_path() -> PathBuf {
        match dirs::cache_dir() {
            Some(dir) => dir.join("pdf-editor").join("render-cache.json"),
            None => PathBuf::from("cache/render-cache.json"),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PDF_EDITOR_CACHE_MEMORY_MB`: memory limit in MB (default: 256)
    /// - `PDF_EDITOR_CACHE_MAX_ITEMS`: item cap (default: 1000)
    /// - `PDF_EDITOR_CACHE_MAX_AGE_SECS`: item max age, 0 disables (default: 1800)
    /// - `PDF_EDITOR_CACHE_COMPRESSION`: `true` or `false`
    /// - `PDF_EDITOR_CACHE_COMPRESSION_LEVEL`: `none`, `fast`, `balanced`, `maximum`
    ///
    /// # Errors
    /// Returns an error if any variable holds an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(mb) = env_parse::<usize>("PDF_EDITOR_CACHE_MEMORY_MB")? {
            config.max_memory_bytes = mb.saturating_mul(MB);
        }
        if let Some(items) = env_parse::<usize>("PDF_EDITOR_CACHE_MAX_ITEMS")? {
            config.max_items = items;
        }
        if let Some(secs) = env_parse::<u64>("PDF_EDITOR_CACHE_MAX_AGE_SECS")? {
            config.item_max_age = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_parse::<bool>("PDF_EDITOR_CACHE_COMPRESSION")? {
            config.compression.enabled = enabled;
        }
        if let Some(level) = env_parse::<CompressionLevel>("PDF_EDITOR_CACHE_COMPRESSION_LEVEL")? {
            config.compression.level = level;
        }

        Ok(config.normalized())
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// max_memory_mb = 256
    /// max_items = 1000
    /// item_max_age_secs = 1800
    /// cleanup_interval_secs = 60
    /// compression_enabled = true
    /// compression_level = "balanced"
    ///
    /// [priority_weights]
    /// low = 0.1
    /// normal = 1.0
    /// high = 10.0
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: CacheConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();

        if let Some(mb) = file.max_memory_mb {
            config.max_memory_bytes = mb.saturating_mul(MB);
        }
        if let Some(items) = file.max_items {
            config.max_items = items;
        }
        if let Some(secs) = file.item_max_age_secs {
            config.item_max_age = Duration::from_secs(secs);
        }
        if let Some(secs) = file.stale_low_priority_age_secs {
            config.stale_low_priority_age = Duration::from_secs(secs);
        }
        if let Some(secs) = file.cleanup_interval_secs {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = file.compression_enabled {
            config.compression.enabled = enabled;
        }
        if let Some(level) = file.compression_level {
            config.compression.level = level;
        }
        if let Some(kb) = file.compression_threshold_kb {
            config.compression.threshold_bytes = kb.saturating_mul(1024);
        }
        if let Some(weights) = file.priority_weights {
            config.priority_weights = weights;
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
        let file = CacheConfigFile {
            max_memory_mb: Some(self.max_memory_bytes / MB),
            max_items: Some(self.max_items),
            item_max_age_secs: Some(self.item_max_age.as_secs()),
            stale_low_priority_age_secs: Some(self.stale_low_priority_age.as_secs()),
            cleanup_interval_secs: Some(self.cleanup_interval.as_secs()),
            compression_enabled: Some(self.compression.enabled),
            compression_level: Some(self.compression.level),
            compression_threshold_kb: Some(self.compression.threshold_bytes / 1024),
            priority_weights: Some(self.priority_weights),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Returns the memory limit in megabytes.
    pub fn max_memory_mb(&self) -> usize {
        self.max_memory_bytes / MB
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

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
