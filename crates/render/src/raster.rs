//! Raster images produced by page rendering
//!
//! A raster is a packed pixel buffer plus its dimensions. The cache accounts
//! its memory as `width * height * bytes_per_pixel`.

use serde::{Deserialize, Serialize};

/// Bytes per pixel for RGBA output
pub const RGBA_BYTES_PER_PIXEL: u8 = 4;

/// Rendered pixel data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterImage {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bytes per pixel (4 for RGBA)
    pub bytes_per_pixel: u8,

    /// Row-major pixel data
    pub pixels: Vec<u8>,
}

impl RasterImage {
    /// Create a new raster from RGBA pixel data
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel: RGBA_BYTES_PER_PIXEL,
            pixels,
        }
    }

    /// Create a raster filled with a single RGBA color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixel_count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            pixels.extend_from_slice(&rgba);
        }
        Self::new(width, height, pixels)
    }

    /// Memory footprint in bytes as seen by the cache
    pub fn memory_size(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }

    /// Whether the raster holds no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Serialize into a flat byte form: width, height (LE u32), bpp, pixels
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(9 + self.pixels.len());
        bytes.extend_from_slice(&self.width.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.push(self.bytes_per_pixel);
        bytes.extend_from_slice(&self.pixels);
        bytes
    }

    /// Inverse of [`RasterImage::to_bytes`]
    ///
    /// Returns `None` when the header is truncated or the pixel data length
    /// does not match the declared dimensions.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 9 {
            return None;
        }
        let width = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let height = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let bytes_per_pixel = bytes[8];
        let pixels = bytes[9..].to_vec();

        let expected = width as usize * height as usize * bytes_per_pixel as usize;
        if pixels.len() != expected {
            return None;
        }

        Some(Self {
            width,
            height,
            bytes_per_pixel,
            pixels,
        })
    }
}
