//! Media sources consulted on a cache miss, and cache warm-up.

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use super::media::{CacheError, MediaCache};
use crate::jobs::ItemOperation;

/// Producer of media bytes (origin store, thumbnail generator, ...).
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, name: &str) -> anyhow::Result<Bytes>;
}

/// Fetches `{base_url}/{name}` over HTTP.
pub struct HttpMediaSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMediaSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// URL a media name is fetched from
    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.trim_start_matches('/'))
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn fetch(&self, name: &str) -> anyhow::Result<Bytes> {
        let url = self.url_for(name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        if !response.status().is_success() {
            bail!("HTTP {} from {}", response.status(), url);
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("Body read from {url} failed"))?;
        debug!(url = %url, size = body.len(), "Fetched media from origin");
        Ok(body)
    }
}

/// Batch operation that loads one media name into the cache.
///
/// Names already cached are skipped; a payload the cache refuses counts as
/// a failure so warm-up jobs report it.
pub struct CacheWarmer<S: ?Sized> {
    cache: Arc<MediaCache>,
    source: Arc<S>,
}

impl<S: MediaSource + ?Sized> CacheWarmer<S> {
    pub fn new(cache: Arc<MediaCache>, source: Arc<S>) -> Self {
        Self { cache, source }
    }
}

#[async_trait]
impl<S: MediaSource + ?Sized> ItemOperation<String, ()> for CacheWarmer<S> {
    async fn execute(&self, name: &String, _payload: &()) -> anyhow::Result<()> {
        if self.cache.has(name) {
            return Ok(());
        }

        let payload = self.source.fetch(name).await?;
        let size = payload.len();
        if !self.cache.put(name, payload, None) {
            warn!(name = %name, size = size, "Warm-up payload rejected by cache");
            return Err(CacheError::Rejected(format!("{name}: {size} bytes")).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MediaCacheConfig;

    struct StaticSource;

    #[async_trait]
    impl MediaSource for StaticSource {
        async fn fetch(&self, name: &str) -> anyhow::Result<Bytes> {
            match name {
                "missing.png" => bail!("origin returned 404"),
                "empty.png" => Ok(Bytes::new()),
                _ => Ok(Bytes::from(format!("bytes-of-{name}"))),
            }
        }
    }

    #[test]
    fn test_url_for() {
        let source = HttpMediaSource::new("http://media.local/uploads/");
        assert_eq!(
            source.url_for("/event-1/a.png"),
            "http://media.local/uploads/event-1/a.png"
        );
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_on_miss() {
        let cache = MediaCache::with_defaults();

        let first = cache.get_or_fetch("a.png", &StaticSource).await.unwrap();
        assert_eq!(&first[..], b"bytes-of-a.png");
        assert!(cache.has("a.png"));

        let second = cache.get_or_fetch("a.png", &StaticSource).await.unwrap();
        assert_eq!(first, second);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_reports_source_failure() {
        let cache = MediaCache::with_defaults();
        let err = cache
            .get_or_fetch("missing.png", &StaticSource)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::FetchFailed { .. }));
        assert!(!cache.has("missing.png"));
    }

    #[tokio::test]
    async fn test_warmer() {
        let cache = Arc::new(MediaCache::new(MediaCacheConfig::default()));
        let warmer = CacheWarmer::new(Arc::clone(&cache), Arc::new(StaticSource));

        warmer.execute(&"a.png".to_string(), &()).await.unwrap();
        assert!(cache.has("a.png"));

        assert!(warmer.execute(&"missing.png".to_string(), &()).await.is_err());
        let err = warmer.execute(&"empty.png".to_string(), &()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<CacheError>(), Some(CacheError::Rejected(_))));
    }
}
