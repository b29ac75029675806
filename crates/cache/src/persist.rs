//! Bulk export and import of the entry table
//!
//! The file is a versioned JSON envelope. Payload bytes are stored in their
//! current representation (raw or compressed) as base64.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::compression::CompressionLevel;
use crate::entry::{CachePriority, PayloadKind};
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, ContentType};

pub(crate) const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CacheExport {
    pub version: u32,
    pub entries: Vec<ExportedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExportedEntry {
    pub key: CacheKey,
    pub content_type: ContentType,
    pub priority: CachePriority,
    pub page: Option<u32>,
    pub kind: PayloadKind,
    /// `None` when `data` holds the raw byte form
    pub compression: CompressionLevel,
    pub data: String,
}

impl ExportedEntry {
    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn decode(&self) -> CacheResult<Vec<u8>> {
        STANDARD.decode(&self.data).map_err(|e| CacheError::Corrupted {
            key: self.key.to_string(),
            reason: e.to_string(),
        })
    }
}

pub(crate) fn write(path: &Path, entries: Vec<ExportedEntry>) -> CacheResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let export = CacheExport {
        version: EXPORT_VERSION,
        entries,
    };
    fs::write(path, serde_json::to_vec(&export)?)?;
    Ok(())
}

pub(crate) fn read(path: &Path) -> CacheResult<Vec<ExportedEntry>> {
    let bytes = fs::read(path)?;
    let export: CacheExport = serde_json::from_slice(&bytes)?;
    if export.version != EXPORT_VERSION {
        return Err(CacheError::UnsupportedVersion {
            found: export.version,
            expected: EXPORT_VERSION,
        });
    }
    Ok(export.entries)
}
