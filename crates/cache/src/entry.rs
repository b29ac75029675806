//! Cache entries and payloads

use pdf_editor_render::RasterImage;
use serde::{Deserialize, Serialize};

use crate::compression::CompressionLevel;
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, ContentType};

/// Retention priority of a cache entry
///
/// Ordered `Background < Low < Normal < High < Critical`. Critical entries
/// are never evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CachePriority {
    Background,
    Low,
    Normal,
    High,
    Critical,
}

impl Default for CachePriority {
    fn default() -> Self {
        CachePriority::Normal
    }
}

/// Discriminant of a [`Payload`], kept alongside compressed bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    Image,
    Text,
    Bytes,
}

/// Artifact data handed to and returned from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Rendered pixels
    Image(RasterImage),
    /// Extracted text
    Text(String),
    /// Any other serialized artifact (outline, search results, ...)
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Image(_) => PayloadKind::Image,
            Payload::Text(_) => PayloadKind::Text,
            Payload::Bytes(_) => PayloadKind::Bytes,
        }
    }

    /// Accounted size: pixels `w*h*bpp`, text two bytes per UTF-16 unit,
    /// blobs their length
    pub fn memory_size(&self) -> usize {
        match self {
            Payload::Image(image) => image.memory_size(),
            Payload::Text(text) => text.encode_utf16().count() * 2,
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    /// Flatten to bytes for compression or export
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Image(image) => image.to_bytes(),
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Bytes(bytes) => bytes.clone(),
        }
    }

    /// Rebuild a payload from its flattened bytes
    pub fn from_bytes(kind: PayloadKind, bytes: Vec<u8>, key: &CacheKey) -> CacheResult<Self> {
        let corrupted = |reason: &str| CacheError::Corrupted {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match kind {
            PayloadKind::Image => RasterImage::from_bytes(&bytes)
                .map(Payload::Image)
                .ok_or_else(|| corrupted("invalid raster layout")),
            PayloadKind::Text => String::from_utf8(bytes)
                .map(Payload::Text)
                .map_err(|_| corrupted("invalid UTF-8")),
            PayloadKind::Bytes => Ok(Payload::Bytes(bytes)),
        }
    }

    pub fn as_image(&self) -> Option<&RasterImage> {
        match self {
            Payload::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Current representation of an entry's data
#[derive(Debug, Clone)]
pub(crate) enum StoredData {
    Raw(Payload),
    Compressed {
        bytes: Vec<u8>,
        kind: PayloadKind,
        level: CompressionLevel,
    },
}

/// One cached artifact, owned by the store
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub key: CacheKey,
    pub data: StoredData,
    pub content_type: ContentType,
    pub priority: CachePriority,
    pub page: Option<u32>,
    /// Size of the current (possibly compressed) representation
    pub size_bytes: usize,
    pub created_at_ms: u64,
    pub last_accessed_ms: u64,
    pub access_count: u64,
    /// Insertion order, used to break eviction ties
    pub sequence: u64,
}

impl CacheEntry {
    pub fn is_compressed(&self) -> bool {
        matches!(self.data, StoredData::Compressed { .. })
    }

    pub fn compression_level(&self) -> CompressionLevel {
        match self.data {
            StoredData::Raw(_) => CompressionLevel::None,
            StoredData::Compressed { level, .. } => level,
        }
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            content_type: self.content_type,
            priority: self.priority,
            page: self.page,
            size_bytes: self.size_bytes,
            access_count: self.access_count,
            is_compressed: self.is_compressed(),
            compression_level: self.compression_level(),
        }
    }
}

/// Read-only snapshot of an entry's bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub content_type: ContentType,
    pub priority: CachePriority,
    pub page: Option<u32>,
    pub size_bytes: usize,
    pub access_count: u64,
    pub is_compressed: bool,
    pub compression_level: CompressionLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(CachePriority::Background < CachePriority::Low);
        assert!(CachePriority::Low < CachePriority::Normal);
        assert!(CachePriority::Normal < CachePriority::High);
        assert!(CachePriority::High < CachePriority::Critical);
    }

    #[test]
    fn test_memory_size_per_kind() {
        let image = Payload::Image(RasterImage::filled(3, 2, [0; 4]));
        assert_eq!(image.memory_size(), 24);
        assert_eq!(Payload::Text("héllo".into()).memory_size(), 10);
        assert_eq!(Payload::Bytes(vec![0; 17]).memory_size(), 17);
    }

    #[test]
    fn test_bytes_round_trip_per_kind() {
        let key = CacheKey::text(1);
        for payload in [
            Payload::Image(RasterImage::filled(4, 4, [1, 2, 3, 4])),
            Payload::Text("page text".into()),
            Payload::Bytes(vec![9, 8, 7]),
        ] {
            let rebuilt = Payload::from_bytes(payload.kind(), payload.to_bytes(), &key).unwrap();
            assert_eq!(rebuilt, payload);
        }
    }

    #[test]
    fn test_invalid_text_is_corruption() {
        let key = CacheKey::text(1);
        let err = Payload::from_bytes(PayloadKind::Text, vec![0xff, 0xfe], &key).unwrap_err();
        assert!(matches!(err, CacheError::Corrupted { .. }));
    }
}
