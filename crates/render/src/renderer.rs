//! Page renderer abstraction
//!
//! The renderer is the only blocking, potentially slow collaborator of the
//! render pipeline. Implementations must be callable from worker threads.

/// Errors reported by a page renderer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    /// Page index outside the document
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// The page content could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The backend failed for another reason
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for renderer calls
pub type RenderResult<T> = Result<T, RenderError>;

/// Produces page pixels and text for the render pipeline
///
/// # Example
///
/// ```
/// use pdf_editor_render::{PageRenderer, RasterImage, RenderError, RenderResult};
///
/// struct BlankRenderer;
///
/// impl PageRenderer for BlankRenderer {
///     fn page_count(&self) -> u32 {
///         3
///     }
///
///     fn render_page(&self, page: u32, dpi_x: f64, dpi_y: f64, _rotation: u16) -> RenderResult<RasterImage> {
///         if page >= self.page_count() {
///             return Err(RenderError::PageOutOfRange { page, page_count: 3 });
///         }
///         let width = (8.5 * dpi_x) as u32;
///         let height = (11.0 * dpi_y) as u32;
///         Ok(RasterImage::filled(width, height, [255, 255, 255, 255]))
///     }
///
///     fn extract_text(&self, _page: u32) -> RenderResult<String> {
///         Ok(String::new())
///     }
/// }
///
/// let renderer = BlankRenderer;
/// assert!(renderer.render_page(0, 72.0, 72.0, 0).is_ok());
/// assert!(renderer.render_page(5, 72.0, 72.0, 0).is_err());
/// ```
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the current document
    fn page_count(&self) -> u32;

    /// Rasterize a page at the given resolution and rotation (degrees)
    fn render_page(
        &self,
        page: u32,
        dpi_x: f64,
        dpi_y: f64,
        rotation: u16,
    ) -> RenderResult<crate::RasterImage>;

    /// Extract the selectable text of a page
    fn extract_text(&self, page: u32) -> RenderResult<String>;
}
