//! PDF Editor Render Library
//!
//! Boundary between the rendering cache and the page rasterizer. The cache
//! and the render pipeline only see the [`PageRenderer`] trait; the concrete
//! backend lives in the host application.

pub mod quality;
pub mod raster;
pub mod renderer;

pub use quality::{RenderQuality, BASE_DPI};
pub use raster::RasterImage;
pub use renderer::{PageRenderer, RenderError, RenderResult};
