//! Cache key definitions
//!
//! Every stored entry lives under a composite `{category}:{name}` key so the
//! three stores (media bytes, ETags, metadata) can be purged together by name
//! or by event group token.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Media,
    Etag,
    Metadata,
}

impl CacheCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Media => "media",
            CacheCategory::Etag => "etag",
            CacheCategory::Metadata => "metadata",
        }
    }
}

/// Composite cache key: `{category}:{name}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub category: CacheCategory,
    pub name: String,
}

impl CacheKey {
    pub fn new(category: CacheCategory, name: &str) -> Self {
        Self {
            category,
            name: name.to_string(),
        }
    }

    pub fn media(name: &str) -> Self {
        Self::new(CacheCategory::Media, name)
    }

    pub fn etag(name: &str) -> Self {
        Self::new(CacheCategory::Etag, name)
    }

    pub fn metadata(name: &str) -> Self {
        Self::new(CacheCategory::Metadata, name)
    }

    /// Convert to storage key string
    pub fn to_storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category.as_str(), self.name)
    }
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "m4v", "mkv", "avi", "ogv"];

/// Kind of media payload, used to pick a TTL and response cache policy.
///
/// Thumbnails are generated once per source image and never replaced in
/// place, so they get the long-lived TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Thumbnail,
}

impl MediaKind {
    /// Classify a media name such as `event-42/thumb_cover.jpg`
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("thumb") {
            return MediaKind::Thumbnail;
        }

        let extension = lower.rsplit_once('.').map(|(_, ext)| ext);
        match extension {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_format() {
        assert_eq!(CacheKey::media("event-1/a.png").to_storage_key(), "media:event-1/a.png");
        assert_eq!(CacheKey::etag("a.png").to_string(), "etag:a.png");
        assert_eq!(CacheKey::metadata("a.png").to_string(), "metadata:a.png");
    }

    #[test]
    fn test_media_kind_from_name() {
        assert_eq!(MediaKind::from_name("event-7/thumb_cover.jpg"), MediaKind::Thumbnail);
        assert_eq!(MediaKind::from_name("thumbnails/x.webp"), MediaKind::Thumbnail);
        assert_eq!(MediaKind::from_name("event-7/highlights.MP4"), MediaKind::Video);
        assert_eq!(MediaKind::from_name("event-7/poster.png"), MediaKind::Image);
        assert_eq!(MediaKind::from_name("no-extension"), MediaKind::Image);
    }
}
