//! Media caching
//!
//! - [`MediaCache`]: byte-budgeted LRU store for media payloads, with ETag and
//!   metadata companions
//! - [`policy`]: response cache headers and conditional-request checks
//! - [`MediaSource`]: where bytes come from on a miss; [`CacheWarmer`] loads
//!   them ahead of demand through the batch dispatcher

pub mod keys;
pub mod media;
pub mod policy;
pub mod source;

pub use keys::{CacheCategory, CacheKey, MediaKind};
pub use media::{
    compute_etag, format_bytes, spawn_maintenance_task, CacheEntryInfo, CacheError, CacheStats,
    MediaCache, MediaCacheConfig,
};
pub use policy::{is_client_cache_valid, CacheDirectives, ContentCategory, HeaderSink};
pub use source::{CacheWarmer, HttpMediaSource, MediaSource};
