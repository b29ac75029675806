//! Error types for the cache crate

use std::io;

/// Errors surfaced by cache operations that can genuinely fail
///
/// Misses and failed inserts are not errors; they are reported as `None`
/// and `false` by the store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Stored compressed bytes could not be decoded
    #[error("corrupt cache entry '{key}': {reason}")]
    Corrupted { key: String, reason: String },

    /// Compression or decompression stream failure
    #[error("compression error: {0}")]
    Compression(#[source] io::Error),

    /// I/O failure while exporting or importing
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Export file was written by an incompatible version
    #[error("unsupported export version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
