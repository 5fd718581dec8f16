//! HTTP cache policy for media responses
//!
//! Stateless: each content category maps to a fixed set of response
//! directives, written into whatever header sink the caller provides.
//!
//! | Category  | Cache-Control                                      | Vary            | CDN copy |
//! |-----------|----------------------------------------------------|-----------------|----------|
//! | Image     | `public, max-age=604800, stale-while-revalidate=86400` | Accept      | yes      |
//! | Video     | `public, max-age=86400, stale-while-revalidate=3600`   | Range       | yes      |
//! | Thumbnail | `public, max-age=31536000, immutable`              | Accept          | no       |
//! | Metadata  | `public, max-age=300, stale-while-revalidate=60`   | Accept-Encoding | no       |

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use super::keys::MediaKind;

/// Anything a response header can be written to.
pub trait HeaderSink {
    fn set_header(&mut self, name: &str, value: &str);
}

impl HeaderSink for HeaderMap {
    fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.insert(name, value);
            }
            _ => warn!(header = name, value = value, "Skipping invalid response header"),
        }
    }
}

impl HeaderSink for Vec<(String, String)> {
    fn set_header(&mut self, name: &str, value: &str) {
        self.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.push((name.to_string(), value.to_string()));
    }
}

/// Response content category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Image,
    Video,
    Thumbnail,
    /// JSON listings of media (galleries, stats)
    Metadata,
}

impl From<MediaKind> for ContentCategory {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => ContentCategory::Image,
            MediaKind::Video => ContentCategory::Video,
            MediaKind::Thumbnail => ContentCategory::Thumbnail,
        }
    }
}

/// The set of cache headers for one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirectives {
    pub cache_control: &'static str,
    pub vary: &'static str,
    pub etag: Option<String>,
    /// Duplicated for CDNs that honour their own header over Cache-Control
    pub cdn_cache_control: Option<&'static str>,
}

impl CacheDirectives {
    /// Directives for a content category
    pub fn for_category(category: ContentCategory, etag: Option<&str>) -> Self {
        let (cache_control, vary, cdn) = match category {
            ContentCategory::Image => (
                "public, max-age=604800, stale-while-revalidate=86400",
                "Accept",
                true,
            ),
            ContentCategory::Video => (
                "public, max-age=86400, stale-while-revalidate=3600",
                "Range",
                true,
            ),
            ContentCategory::Thumbnail => ("public, max-age=31536000, immutable", "Accept", false),
            ContentCategory::Metadata => (
                "public, max-age=300, stale-while-revalidate=60",
                "Accept-Encoding",
                false,
            ),
        };

        Self {
            cache_control,
            vary,
            etag: etag.map(str::to_string),
            cdn_cache_control: cdn.then_some(cache_control),
        }
    }

    /// Write the directives into a header sink
    pub fn apply<S: HeaderSink + ?Sized>(&self, sink: &mut S) {
        sink.set_header("Cache-Control", self.cache_control);
        sink.set_header("Vary", self.vary);
        if let Some(etag) = &self.etag {
            sink.set_header("ETag", etag);
        }
        if let Some(cdn) = self.cdn_cache_control {
            sink.set_header("CDN-Cache-Control", cdn);
            sink.set_header("Surrogate-Control", cdn);
        }
    }
}

pub fn set_image_cache_headers<S: HeaderSink + ?Sized>(sink: &mut S, etag: Option<&str>) {
    CacheDirectives::for_category(ContentCategory::Image, etag).apply(sink);
}

pub fn set_video_cache_headers<S: HeaderSink + ?Sized>(sink: &mut S, etag: Option<&str>) {
    CacheDirectives::for_category(ContentCategory::Video, etag).apply(sink);
}

pub fn set_thumbnail_cache_headers<S: HeaderSink + ?Sized>(sink: &mut S, etag: Option<&str>) {
    CacheDirectives::for_category(ContentCategory::Thumbnail, etag).apply(sink);
}

pub fn set_metadata_cache_headers<S: HeaderSink + ?Sized>(sink: &mut S, etag: Option<&str>) {
    CacheDirectives::for_category(ContentCategory::Metadata, etag).apply(sink);
}

/// Strip the weak prefix; comparison for `If-None-Match` is weak.
fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Whether the client's cached copy is still valid (304 short-circuit).
///
/// `if_none_match` is the raw header value, possibly a comma-separated list
/// or `*`.
pub fn is_client_cache_valid(if_none_match: Option<&str>, current_etag: Option<&str>) -> bool {
    let (Some(header), Some(current)) = (if_none_match, current_etag) else {
        return false;
    };

    if header.trim() == "*" {
        return true;
    }

    let current = opaque_tag(current);
    header
        .split(',')
        .map(opaque_tag)
        .any(|candidate| !candidate.is_empty() && candidate == current)
}
