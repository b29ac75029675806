use thiserror::Error;

/// Errors from exporting navigation history
#[derive(Debug, Error)]
pub enum PrefetchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize session history: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PrefetchResult<T> = Result<T, PrefetchError>;
