//! Bounded Media Cache - byte-budgeted LRU cache for event media
//!
//! Three stores share one lock:
//!
//! - **Media**: payload bytes, byte budget + item cap, per-kind TTL
//!   (images/videos 1h, thumbnails 24h by default)
//! - **ETags**: content fingerprints, independent TTL
//! - **Metadata**: caller-supplied JSON merged with `size`/`cachedAt`
//!
//! ## Eviction
//!
//! An access-sequence index (`BTreeMap<seq, key>`) orders media entries by
//! last access. When an insert would exceed the byte budget the oldest
//! entries are dropped until the overage plus 10% of the budget is freed, so
//! a cache running at capacity does not evict on every insert.
//!
//! ## Ownership
//!
//! Payloads are stored and returned as [`Bytes`]: a shared, immutable view.
//! `get` hands out a reference-counted handle to the same buffer the cache
//! holds, never a copy, and nobody can mutate it through that handle.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::keys::{CacheKey, MediaKind};
use super::source::MediaSource;

// ============================================================================
// Errors
// ============================================================================

/// Error types for the fetch-through path
///
/// Plain lookups never fail; a miss is `None`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Media not in cache and no source produced it
    #[error("Media not found: {0}")]
    NotFound(String),

    /// Origin fetch failed
    #[error("Fetch failed for {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    /// Fetched payload was empty or over the per-item ceiling
    #[error("Payload rejected by cache: {0}")]
    Rejected(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the media cache
#[derive(Debug, Clone)]
pub struct MediaCacheConfig {
    /// Byte budget across all media entries (default: 100 MB)
    pub max_bytes: u64,
    /// Largest single payload accepted (default: 50 MB)
    pub max_item_bytes: u64,
    /// Maximum number of media entries (default: 1000)
    pub max_items: usize,
    /// TTL for images and videos (default: 1 hour)
    pub media_ttl: Duration,
    /// TTL for thumbnails (default: 24 hours)
    pub thumbnail_ttl: Duration,
    /// TTL for ETags (default: 24 hours)
    pub etag_ttl: Duration,
    /// TTL for metadata (default: 30 minutes)
    pub metadata_ttl: Duration,
    /// Interval between expiry sweeps and health checks (default: 5 minutes)
    pub health_check_interval: Duration,
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,                        // 100 MB
            max_item_bytes: 50 * 1024 * 1024,                    // 50 MB
            max_items: 1000,
            media_ttl: Duration::from_secs(60 * 60),             // 1 hour
            thumbnail_ttl: Duration::from_secs(24 * 60 * 60),    // 24 hours
            etag_ttl: Duration::from_secs(24 * 60 * 60),         // 24 hours
            metadata_ttl: Duration::from_secs(30 * 60),          // 30 minutes
            health_check_interval: Duration::from_secs(5 * 60),  // 5 minutes
        }
    }
}

impl MediaCacheConfig {
    /// TTL for a media entry of the given kind
    pub fn ttl_for(&self, kind: MediaKind) -> Duration {
        match kind {
            MediaKind::Thumbnail => self.thumbnail_ttl,
            MediaKind::Image | MediaKind::Video => self.media_ttl,
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

struct MediaEntry {
    payload: Bytes,
    size_bytes: u64,
    kind: MediaKind,
    inserted_at: Instant,
    expires_at: Instant,
    last_access_at: Instant,
    access_count: u64,
    /// Position in the LRU index
    access_seq: u64,
}

struct CompanionEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CompanionEntry<T> {
    fn live(&self, now: Instant) -> Option<&T> {
        (now < self.expires_at).then_some(&self.value)
    }
}

/// Read-only view of a media entry's bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub key: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    pub access_count: u64,
    pub age: Duration,
    pub ttl_remaining: Duration,
    pub idle: Duration,
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bytes_served: u64,
    pub bytes_cached: u64,
    pub evictions: u64,
    pub corruptions: u64,
    /// Hit rate as a percentage (0 before the first lookup)
    pub hit_rate: f64,
    pub item_count: usize,
    pub etag_count: usize,
    pub metadata_count: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
    pub current_size: String,
    pub max_size: String,
    /// Percentage of the byte budget in use
    pub utilization: f64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bytes_served: AtomicU64,
    bytes_cached: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
}

impl CacheCounters {
    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.bytes_served,
            &self.bytes_cached,
            &self.evictions,
            &self.corruptions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Format a byte count in human units (`12.50 MB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Strong ETag over payload and name: quoted, 32 hex chars
pub fn compute_etag(name: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    format!("\"{}\"", hex::encode(&digest[..16]))
}

// ============================================================================
// Cache State
// ============================================================================

#[derive(Default)]
struct CacheState {
    media: HashMap<String, MediaEntry>,
    etags: HashMap<String, CompanionEntry<String>>,
    metadata: HashMap<String, CompanionEntry<Map<String, Value>>>,
    /// access_seq -> media key, oldest first
    lru: BTreeMap<u64, String>,
    seq: u64,
    total_bytes: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Remove a media entry and its LRU slot together.
    fn remove_media(&mut self, key: &str) -> Option<MediaEntry> {
        let entry = self.media.remove(key)?;
        self.lru.remove(&entry.access_seq);
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Remove and return the least-recently-used media entry.
    fn pop_lru(&mut self) -> Option<(String, MediaEntry)> {
        while let Some((_, key)) = self.lru.pop_first() {
            if let Some(entry) = self.media.remove(&key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
                return Some((key, entry));
            }
        }
        None
    }

    /// Record a hit: move the entry to the most-recent end of the index.
    fn touch(&mut self, key: &str, now: Instant) -> Option<Bytes> {
        let seq = self.next_seq();
        let entry = self.media.get_mut(key)?;
        let previous = std::mem::replace(&mut entry.access_seq, seq);
        entry.last_access_at = now;
        entry.access_count += 1;
        let payload = entry.payload.clone();

        self.lru.remove(&previous);
        self.lru.insert(seq, key.to_string());
        Some(payload)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .media
            .iter()
            .filter(|(_, e)| now >= e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_media(key);
        }

        let before = self.etags.len() + self.metadata.len();
        self.etags.retain(|_, e| now < e.expires_at);
        self.metadata.retain(|_, e| now < e.expires_at);
        let companions = before - (self.etags.len() + self.metadata.len());

        expired.len() + companions
    }
}

// ============================================================================
// Media Cache
// ============================================================================

/// Byte-budgeted LRU cache for media payloads with ETag and metadata stores.
///
/// All mutation happens under one mutex so the LRU index, the byte counter
/// and the stores never disagree.
pub struct MediaCache {
    state: Mutex<CacheState>,
    counters: CacheCounters,
    config: MediaCacheConfig,
}

impl MediaCache {
    /// Create a new media cache with configuration
    pub fn new(config: MediaCacheConfig) -> Self {
        // A payload larger than the whole budget could never be evicted back
        // under it
        let config = if config.max_item_bytes > config.max_bytes {
            warn!(
                max = %format_bytes(config.max_bytes),
                max_item = %format_bytes(config.max_item_bytes),
                "Per-item ceiling exceeds byte budget, clamping"
            );
            MediaCacheConfig {
                max_item_bytes: config.max_bytes,
                ..config
            }
        } else {
            config
        };

        info!(
            max = %format_bytes(config.max_bytes),
            max_item = %format_bytes(config.max_item_bytes),
            max_items = config.max_items,
            "MediaCache initialized"
        );

        Self {
            state: Mutex::new(CacheState::default()),
            counters: CacheCounters::default(),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(MediaCacheConfig::default())
    }

    /// Get configuration
    pub fn config(&self) -> &MediaCacheConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Media Operations
    // ========================================================================

    /// Store a payload, classifying its kind from the name.
    ///
    /// Returns `false` without side effects if the payload is empty or over
    /// the per-item ceiling.
    pub fn put(&self, name: &str, payload: Bytes, meta: Option<Map<String, Value>>) -> bool {
        self.put_with_kind(name, payload, MediaKind::from_name(name), meta)
    }

    /// Store a payload with an explicit kind (selects the TTL).
    pub fn put_with_kind(
        &self,
        name: &str,
        payload: Bytes,
        kind: MediaKind,
        meta: Option<Map<String, Value>>,
    ) -> bool {
        let size = payload.len() as u64;
        if size == 0 {
            warn!(name = name, "Refusing to cache empty payload");
            return false;
        }
        if size > self.config.max_item_bytes {
            warn!(
                name = name,
                size = %format_bytes(size),
                max_item = %format_bytes(self.config.max_item_bytes),
                "Payload exceeds per-item ceiling, not cached"
            );
            return false;
        }

        let now = Instant::now();
        let key = CacheKey::media(name).to_storage_key();
        let etag = compute_etag(name, &payload);

        let mut state = self.state();

        // Replacing an entry is not an eviction
        state.remove_media(&key);
        let evicted = self.make_room(&mut state, size, now);

        let access_seq = state.next_seq();
        state.lru.insert(access_seq, key.clone());
        state.media.insert(
            key,
            MediaEntry {
                payload,
                size_bytes: size,
                kind,
                inserted_at: now,
                expires_at: now + self.config.ttl_for(kind),
                last_access_at: now,
                access_count: 0,
                access_seq,
            },
        );
        state.total_bytes += size;
        self.counters.bytes_cached.fetch_add(size, Ordering::Relaxed);

        state.etags.insert(
            CacheKey::etag(name).to_storage_key(),
            CompanionEntry {
                value: etag,
                expires_at: now + self.config.etag_ttl,
            },
        );

        if let Some(mut meta) = meta {
            meta.insert("size".to_string(), Value::from(size));
            meta.insert(
                "cachedAt".to_string(),
                Value::from(chrono::Utc::now().to_rfc3339()),
            );
            state.metadata.insert(
                CacheKey::metadata(name).to_storage_key(),
                CompanionEntry {
                    value: meta,
                    expires_at: now + self.config.metadata_ttl,
                },
            );
        }

        debug!(
            name = name,
            size = size,
            kind = ?kind,
            evicted = evicted,
            total = state.total_bytes,
            "Media cached"
        );
        true
    }

    /// Evict least-recently-used entries so `incoming` bytes and one more
    /// item fit. Expired entries go first and are not counted as evictions.
    fn make_room(&self, state: &mut CacheState, incoming: u64, now: Instant) -> usize {
        let mut evicted = 0;

        let over_budget = state.total_bytes + incoming > self.config.max_bytes;
        if over_budget || state.media.len() >= self.config.max_items {
            let purged = state.purge_expired(now);
            if purged > 0 {
                debug!(purged = purged, "Purged expired entries before eviction");
            }
        }

        let projected = state.total_bytes + incoming;
        if projected > self.config.max_bytes {
            let target = (projected - self.config.max_bytes) + self.config.max_bytes / 10;
            let mut freed = 0u64;
            while freed < target {
                let Some((key, entry)) = state.pop_lru() else {
                    break;
                };
                freed += entry.size_bytes;
                evicted += 1;
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, size = entry.size_bytes, "Evicted media entry");
            }
            debug!(freed = freed, target = target, "Evicted media to make space");
        }

        while state.media.len() >= self.config.max_items {
            let Some((key, _)) = state.pop_lru() else {
                break;
            };
            evicted += 1;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted media entry (item limit)");
        }

        evicted
    }

    /// Get a payload by name. Expired entries count as misses.
    pub fn get(&self, name: &str) -> Option<Bytes> {
        let key = CacheKey::media(name).to_storage_key();
        let now = Instant::now();
        let mut state = self.state();

        let fresh = state.media.get(&key).map(|e| now < e.expires_at);
        match fresh {
            Some(true) => {
                let payload = state.touch(&key, now)?;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_served
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                debug!(name = name, size = payload.len(), "Media cache hit");
                Some(payload)
            }
            Some(false) => {
                state.remove_media(&key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(name = name, "Media cache miss (expired)");
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(name = name, "Media cache miss");
                None
            }
        }
    }

    /// Check if a live entry exists. Does not touch statistics or LRU order.
    pub fn has(&self, name: &str) -> bool {
        let key = CacheKey::media(name).to_storage_key();
        let now = Instant::now();
        self.state()
            .media
            .get(&key)
            .map(|e| now < e.expires_at)
            .unwrap_or(false)
    }

    /// ETag recorded for `name`, independent of the media entry's TTL.
    pub fn get_etag(&self, name: &str) -> Option<String> {
        let key = CacheKey::etag(name).to_storage_key();
        let now = Instant::now();
        self.state().etags.get(&key)?.live(now).cloned()
    }

    /// Metadata recorded for `name`, independent of the media entry's TTL.
    pub fn get_metadata(&self, name: &str) -> Option<Map<String, Value>> {
        let key = CacheKey::metadata(name).to_storage_key();
        let now = Instant::now();
        self.state().metadata.get(&key)?.live(now).cloned()
    }

    /// Bookkeeping for a live media entry
    pub fn entry_info(&self, name: &str) -> Option<CacheEntryInfo> {
        let key = CacheKey::media(name).to_storage_key();
        let now = Instant::now();
        let state = self.state();
        let entry = state.media.get(&key).filter(|e| now < e.expires_at)?;
        Some(CacheEntryInfo {
            key,
            kind: entry.kind,
            size_bytes: entry.size_bytes,
            access_count: entry.access_count,
            age: now.duration_since(entry.inserted_at),
            ttl_remaining: entry.expires_at.duration_since(now),
            idle: now.duration_since(entry.last_access_at),
        })
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Remove media, ETag and metadata for `name`. Idempotent.
    pub fn invalidate(&self, name: &str) {
        let mut state = self.state();
        let removed_media = state.remove_media(&CacheKey::media(name).to_storage_key());
        state.etags.remove(&CacheKey::etag(name).to_storage_key());
        state.metadata.remove(&CacheKey::metadata(name).to_storage_key());

        if removed_media.is_some() {
            debug!(name = name, "Media invalidated");
        }
    }

    /// Remove every entry (all three stores) whose key contains `group_id`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_by_event_group(&self, group_id: &str) -> usize {
        if group_id.is_empty() {
            return 0;
        }

        let mut state = self.state();

        let media_keys: Vec<String> = state
            .media
            .keys()
            .filter(|k| k.contains(group_id))
            .cloned()
            .collect();
        for key in &media_keys {
            state.remove_media(key);
        }

        let before = state.etags.len() + state.metadata.len();
        state.etags.retain(|k, _| !k.contains(group_id));
        state.metadata.retain(|k, _| !k.contains(group_id));
        let removed = media_keys.len() + before - (state.etags.len() + state.metadata.len());

        info!(group = group_id, removed = removed, "Event group media invalidated");
        removed
    }

    /// Drop every entry and zero the byte accounting.
    ///
    /// Statistics counters survive a clear so long-run hit rates stay
    /// visible; use [`MediaCache::reset_stats`] to zero them.
    pub fn clear(&self) {
        *self.state() = CacheState::default();
        info!("MediaCache cleared");
    }

    /// Zero all statistics counters.
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Physically remove expired entries from all stores.
    pub fn purge_expired(&self) -> usize {
        let purged = self.state().purge_expired(Instant::now());
        if purged > 0 {
            debug!(purged = purged, "Purged expired cache entries");
        }
        purged
    }

    /// Remove media entries whose payload no longer matches its recorded
    /// shape (empty, or length differs from the size accounted at insert).
    pub fn health_check(&self) -> usize {
        let mut state = self.state();
        let corrupted: Vec<String> = state
            .media
            .iter()
            .filter(|(_, e)| e.payload.is_empty() || e.payload.len() as u64 != e.size_bytes)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &corrupted {
            state.remove_media(key);
            self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "Removed corrupted cache entry");
        }

        corrupted.len()
    }

    /// Get from cache, or fetch from `source` and cache the result.
    pub async fn get_or_fetch<S>(&self, name: &str, source: &S) -> Result<Bytes, CacheError>
    where
        S: MediaSource + ?Sized,
    {
        if let Some(payload) = self.get(name) {
            return Ok(payload);
        }

        let payload = source
            .fetch(name)
            .await
            .map_err(|e| CacheError::FetchFailed {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })?;

        if !self.put(name, payload.clone(), None) {
            warn!(name = name, size = payload.len(), "Fetched media not cacheable");
        }
        Ok(payload)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Get a statistics snapshot
    pub fn stats(&self) -> CacheStats {
        let (item_count, etag_count, metadata_count, total_bytes) = {
            let state = self.state();
            (
                state.media.len(),
                state.etags.len(),
                state.metadata.len(),
                state.total_bytes,
            )
        };

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (hits as f64 / lookups as f64) * 100.0
        };

        CacheStats {
            hits,
            misses,
            bytes_served: self.counters.bytes_served.load(Ordering::Relaxed),
            bytes_cached: self.counters.bytes_cached.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            corruptions: self.counters.corruptions.load(Ordering::Relaxed),
            hit_rate,
            item_count,
            etag_count,
            metadata_count,
            total_bytes,
            max_bytes: self.config.max_bytes,
            current_size: format_bytes(total_bytes),
            max_size: format_bytes(self.config.max_bytes),
            utilization: (total_bytes as f64 / self.config.max_bytes as f64) * 100.0,
        }
    }

    #[cfg(test)]
    fn corrupt_for_test(&self, name: &str) {
        let key = CacheKey::media(name).to_storage_key();
        if let Some(entry) = self.state().media.get_mut(&key) {
            entry.payload = Bytes::new();
        }
    }
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// Background Maintenance Task
// ============================================================================

/// Spawn a task that purges expired entries and runs the health check every
/// `interval` until `shutdown` is cancelled.
pub fn spawn_maintenance_task(
    cache: Arc<MediaCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs(),
        "Media cache maintenance task started"
    );

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Media cache maintenance task stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let expired = cache.purge_expired();
            let corrupted = cache.health_check();
            let stats = cache.stats();
            debug!(
                expired = expired,
                corrupted = corrupted,
                items = stats.item_count,
                utilization = stats.utilization,
                "Media cache maintenance completed"
            );
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
