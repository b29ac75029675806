//! Cache keys
//!
//! Keys are strings of the form `type:page[:scale][:rotation][:extra]`.
//! Two keys are equal exactly when every dimension that changes the
//! produced artifact is equal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of artifact held by a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentType {
    RenderedPage,
    Thumbnail,
    TextContent,
    Outline,
    Metadata,
    SearchResults,
    Annotations,
}

impl ContentType {
    /// All content types, in declaration order
    pub const ALL: [ContentType; 7] = [
        ContentType::RenderedPage,
        ContentType::Thumbnail,
        ContentType::TextContent,
        ContentType::Outline,
        ContentType::Metadata,
        ContentType::SearchResults,
        ContentType::Annotations,
    ];

    /// Short tag used as the first key segment
    pub fn tag(self) -> &'static str {
        match self {
            ContentType::RenderedPage => "page",
            ContentType::Thumbnail => "thumb",
            ContentType::TextContent => "text",
            ContentType::Outline => "outline",
            ContentType::Metadata => "meta",
            ContentType::SearchResults => "search",
            ContentType::Annotations => "annot",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Canonical cache key
///
/// # Example
///
/// ```
/// use pdf_editor_cache::{CacheKey, ContentType};
///
/// let key = CacheKey::new(ContentType::RenderedPage, 3)
///     .with_scale(1.5)
///     .with_rotation(90);
/// assert_eq!(key.as_str(), "page:3:1.5:90");
/// assert_eq!(key, CacheKey::rendered_page(3, 1.5, 90, None));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start a key for a content type and page
    pub fn new(content_type: ContentType, page: u32) -> Self {
        Self(format!("{}:{}", content_type.tag(), page))
    }

    /// Append the scale segment
    ///
    /// Uses shortest round-trip formatting, so 1.0 and 1.0000001 never
    /// collide while equal values always format the same way.
    pub fn with_scale(mut self, scale: f64) -> Self {
        // Adding zero folds -0.0 into 0.0
        self.0.push(':');
        self.0.push_str(&format!("{}", scale + 0.0));
        self
    }

    /// Append the rotation segment (degrees)
    pub fn with_rotation(mut self, rotation: u16) -> Self {
        self.0.push(':');
        self.0.push_str(&rotation.to_string());
        self
    }

    /// Append a free-form segment for any other output-affecting parameter
    pub fn with_extra(mut self, extra: &str) -> Self {
        self.0.push(':');
        self.0.push_str(extra);
        self
    }

    /// Key for a rendered page image
    pub fn rendered_page(page: u32, scale: f64, rotation: u16, extra: Option<&str>) -> Self {
        let key = Self::new(ContentType::RenderedPage, page)
            .with_scale(scale)
            .with_rotation(rotation);
        match extra {
            Some(extra) => key.with_extra(extra),
            None => key,
        }
    }

    /// Key for a thumbnail of the given pixel size
    pub fn thumbnail(page: u32, width: u32, height: u32) -> Self {
        Self::new(ContentType::Thumbnail, page).with_extra(&format!("{}x{}", width, height))
    }

    /// Key for extracted page text
    pub fn text(page: u32) -> Self {
        Self::new(ContentType::TextContent, page)
    }

    /// Key for document-wide search results
    pub fn search(query: &str) -> Self {
        Self::new(ContentType::SearchResults, 0).with_extra(query)
    }

    /// Key for the document outline
    pub fn outline() -> Self {
        Self::new(ContentType::Outline, 0)
    }

    /// Key for document metadata
    pub fn metadata() -> Self {
        Self::new(ContentType::Metadata, 0)
    }

    /// Key for the annotations of a page
    pub fn annotations(page: u32) -> Self {
        Self::new(ContentType::Annotations, page)
    }

    /// Wrap an already formatted key
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Page number encoded in the second segment, if any
    pub fn page(&self) -> Option<u32> {
        self.0.split(':').nth(1)?.parse().ok()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}
