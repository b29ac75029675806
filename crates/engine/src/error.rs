use thiserror::Error;

use pdf_editor_cache::{CacheError, ConfigError};
use pdf_editor_prefetch::PrefetchError;
use pdf_editor_render::RenderError;

/// Errors returned by engine operations
///
/// Cache misses, refused inserts and failed background renders are not
/// errors; they surface as `None`, `false` and failed [`RenderResult`]s.
///
/// [`RenderResult`]: crate::RenderResult
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no document loaded")]
    NoDocument,

    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Prefetch(#[from] PrefetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type EngineResult<T> = Result<T, EngineError>;
