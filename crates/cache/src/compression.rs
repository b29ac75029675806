//! Entry compression
//!
//! Payloads are flattened to bytes and zlib-compressed with `flate2`. A
//! compressed form is only kept when it is meaningfully smaller than the
//! original.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::key::ContentType;

/// Entries larger than this are always compression candidates (100 KB)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 100 * 1024;

/// Compressed output must be below this fraction of the input to be kept
pub const MIN_SAVINGS_RATIO: f64 = 0.9;

/// Compression level trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    None,
    Fast,
    Balanced,
    Maximum,
}

impl CompressionLevel {
    fn flate2(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Fast => Compression::new(1),
            CompressionLevel::Balanced => Compression::new(6),
            CompressionLevel::Maximum => Compression::new(9),
        }
    }
}

impl std::str::FromStr for CompressionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionLevel::None),
            "fast" => Ok(CompressionLevel::Fast),
            "balanced" => Ok(CompressionLevel::Balanced),
            "maximum" => Ok(CompressionLevel::Maximum),
            other => Err(format!("unknown compression level '{}'", other)),
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::Balanced
    }
}

/// Whether an entry of this size and type should be compressed
pub fn should_compress(size_bytes: usize, content_type: ContentType, threshold: usize) -> bool {
    size_bytes > threshold
        || matches!(
            content_type,
            ContentType::RenderedPage | ContentType::TextContent
        )
}

/// Whether a compressed size saves enough to be committed
pub fn worth_committing(original_len: usize, compressed_len: usize) -> bool {
    (compressed_len as f64) < original_len as f64 * MIN_SAVINGS_RATIO
}

/// Compress bytes at the given level
pub fn compress(data: &[u8], level: CompressionLevel) -> CacheResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level.flate2());
    encoder.write_all(data).map_err(CacheError::Compression)?;
    encoder.finish().map_err(CacheError::Compression)
}

/// Decompress bytes produced by [`compress`]
pub fn decompress(data: &[u8]) -> CacheResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CacheError::Compression)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn compressible(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 16) as u8).collect()
    }

    #[test]
    fn test_round_trip_every_level() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut mixed = compressible(64 * 1024);
        for byte in mixed.iter_mut().step_by(7) {
            *byte = rng.gen();
        }

        for level in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Balanced,
            CompressionLevel::Maximum,
        ] {
            let packed = compress(&mixed, level).unwrap();
            assert_eq!(decompress(&packed).unwrap(), mixed, "level {:?}", level);
        }
    }

    #[test]
    fn test_higher_levels_do_not_grow_output() {
        let data = compressible(256 * 1024);
        let fast = compress(&data, CompressionLevel::Fast).unwrap().len();
        let balanced = compress(&data, CompressionLevel::Balanced).unwrap().len();
        let maximum = compress(&data, CompressionLevel::Maximum).unwrap().len();
        assert!(balanced <= fast);
        assert!(maximum <= balanced);
    }

    #[test]
    fn test_random_data_is_not_worth_committing() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let noise: Vec<u8> = (0..32 * 1024).map(|_| rng.gen()).collect();
        let packed = compress(&noise, CompressionLevel::Maximum).unwrap();
        assert!(!worth_committing(noise.len(), packed.len()));

        let data = compressible(32 * 1024);
        let packed = compress(&data, CompressionLevel::Fast).unwrap();
        assert!(worth_committing(data.len(), packed.len()));
    }

    #[test]
    fn test_should_compress_rules() {
        assert!(should_compress(10, ContentType::RenderedPage, DEFAULT_COMPRESSION_THRESHOLD));
        assert!(should_compress(10, ContentType::TextContent, DEFAULT_COMPRESSION_THRESHOLD));
        assert!(!should_compress(10, ContentType::Thumbnail, DEFAULT_COMPRESSION_THRESHOLD));
        assert!(should_compress(
            DEFAULT_COMPRESSION_THRESHOLD + 1,
            ContentType::Thumbnail,
            DEFAULT_COMPRESSION_THRESHOLD
        ));
    }

    #[test]
    fn test_corrupt_input_fails() {
        assert!(decompress(b"definitely not zlib").is_err());
    }
}
