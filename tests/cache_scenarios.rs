//! Media cache and cache-policy integration tests

use bytes::Bytes;
use eventhub::cache::{is_client_cache_valid, MediaCache, MediaCacheConfig};
use std::time::Duration;

const MB: u64 = 1024 * 1024;

fn cache_with_budget(max_mb: u64, max_item_mb: u64) -> MediaCache {
    MediaCache::new(MediaCacheConfig {
        max_bytes: max_mb * MB,
        max_item_bytes: max_item_mb * MB,
        ..MediaCacheConfig::default()
    })
}

fn payload(mb: u64, fill: u8) -> Bytes {
    Bytes::from(vec![fill; (mb * MB) as usize])
}

/// A 10MB payload under a 50MB ceiling and a 100MB budget is stored intact.
#[test]
fn test_single_item_round_trip() {
    let cache = cache_with_budget(100, 50);
    let data = payload(10, 7);

    assert!(cache.put("event-1/hero.png", data.clone(), None));
    assert_eq!(cache.get("event-1/hero.png"), Some(data));
    assert_eq!(cache.stats().item_count, 1);
}

/// Five 30MB items into 100MB: the 4th insert evicts the least recently
/// accessed of the first three.
#[test]
fn test_budget_eviction_prefers_least_recently_accessed() {
    let cache = cache_with_budget(100, 50);

    for i in 0..3 {
        assert!(cache.put(&format!("item-{i}.png"), payload(30, i as u8), None));
    }
    // Touch the oldest so its neighbour becomes the LRU victim
    assert!(cache.get("item-0.png").is_some());

    assert!(cache.put("item-3.png", payload(30, 3), None));
    assert!(cache.has("item-0.png"));
    assert!(!cache.has("item-1.png"));
    assert!(cache.stats().total_bytes <= 100 * MB);

    assert!(cache.put("item-4.png", payload(30, 4), None));

    let stats = cache.stats();
    assert!(stats.total_bytes <= 100 * MB);
    assert!(stats.evictions >= 1);
    assert!(cache.has("item-4.png"));
}

#[test]
fn test_capacity_holds_after_every_put() {
    let cache = cache_with_budget(10, 4);
    for i in 0..40u64 {
        let size = ((i % 4) + 1) as usize * 256 * 1024;
        cache.put(&format!("m{i}.jpg"), Bytes::from(vec![1u8; size]), None);
        assert!(cache.stats().total_bytes <= 10 * MB, "over budget after put {i}");
    }
}

#[test]
fn test_hit_miss_accounting() {
    let cache = MediaCache::with_defaults();
    cache.put("a.png", Bytes::from_static(b"a"), None);
    cache.put("b.png", Bytes::from_static(b"b"), None);

    for _ in 0..3 {
        cache.get("a.png");
    }
    cache.get("b.png");
    cache.get("missing-1.png");
    cache.get("missing-2.png");

    let stats = cache.stats();
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.misses, 2);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_boundary() {
    let cache = MediaCache::new(MediaCacheConfig {
        media_ttl: Duration::from_secs(60),
        ..MediaCacheConfig::default()
    });
    cache.put("clip.png", Bytes::from_static(b"frame"), None);

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(cache.has("clip.png"));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!cache.has("clip.png"));
    assert!(cache.get("clip.png").is_none());
}

#[test]
fn test_invalidate_twice_is_harmless() {
    let cache = MediaCache::with_defaults();
    cache.put("x.png", Bytes::from_static(b"x"), None);

    cache.invalidate("x.png");
    let after_once = cache.stats();
    cache.invalidate("x.png");
    let after_twice = cache.stats();

    assert_eq!(after_once.item_count, after_twice.item_count);
    assert_eq!(after_once.total_bytes, after_twice.total_bytes);
    assert!(cache.get_etag("x.png").is_none());
}

/// The ETag handed out right after a put validates a conditional request.
#[test]
fn test_conditional_request_with_fresh_etag() {
    let cache = MediaCache::with_defaults();
    cache.put("event-3/poster.jpg", Bytes::from_static(b"jpeg"), None);

    let etag = cache.get_etag("event-3/poster.jpg").expect("etag stored on put");
    assert!(is_client_cache_valid(Some(&etag), Some(&etag)));
    assert!(!is_client_cache_valid(Some("\"stale\""), Some(&etag)));
}
