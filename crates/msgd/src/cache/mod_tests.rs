// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;

fn cache() -> Cache<String> {
    Cache::new(4, CancellationToken::new())
}

#[tokio::test]
async fn set_then_get_returns_fresh() {
    let cache = cache();
    cache.set("k1", "v1".to_string(), Duration::from_secs(60), Duration::from_secs(30), HashSet::new());
    let (value, status) = cache.get("k1", true);
    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!(status, CacheEntryStatus::Fresh);
}

#[tokio::test]
async fn miss_returns_none_and_counts() {
    let cache = cache();
    let (value, _) = cache.get("absent", true);
    assert!(value.is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn stale_entry_is_still_returned() {
    let cache = cache();
    cache.set("k1", "v1".to_string(), Duration::from_secs(60), Duration::from_secs(0), HashSet::new());
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (value, status) = cache.get("k1", false);
    assert_eq!(value.as_deref(), Some("v1"));
    assert_eq!(status, CacheEntryStatus::Stale);
}

#[tokio::test]
async fn eviction_happens_at_capacity() {
    let cache = cache();
    for i in 0..5 {
        cache.set(format!("k{i}"), format!("v{i}"), Duration::from_secs(60), Duration::from_secs(30), HashSet::new());
    }
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.stats().evictions, 1);
    // The first-inserted key should have been evicted.
    assert!(cache.get("k0", false).0.is_none());
}

#[tokio::test]
async fn invalidate_removes_a_key() {
    let cache = cache();
    cache.set("k1", "v1".to_string(), Duration::from_secs(60), Duration::from_secs(30), HashSet::new());
    assert!(cache.invalidate("k1"));
    assert!(cache.get("k1", false).0.is_none());
}

#[tokio::test]
async fn invalidate_by_tag_removes_all_matching_entries() {
    let cache = cache();
    let mut tags_a = HashSet::new();
    tags_a.insert("session:dev".to_string());
    cache.set("a1", "va1".to_string(), Duration::from_secs(60), Duration::from_secs(30), tags_a.clone());
    cache.set("a2", "va2".to_string(), Duration::from_secs(60), Duration::from_secs(30), tags_a);
    cache.set("b1", "vb1".to_string(), Duration::from_secs(60), Duration::from_secs(30), HashSet::new());

    let removed = cache.invalidate_by_tag("session:dev");
    assert_eq!(removed, 2);
    assert!(cache.get("b1", false).0.is_some());
}

#[tokio::test]
async fn warmup_populates_absent_keys_via_loader() {
    let cache = cache();
    let loader: Loader<String> = Arc::new(|key: String| Box::pin(async move { Some(format!("loaded:{key}")) }));
    cache
        .warmup(vec!["agent_content:dev:2".to_string()], "agent_content", loader, Duration::from_secs(30), Duration::from_secs(15))
        .await;
    let (value, status) = cache.get("agent_content:dev:2", false);
    assert_eq!(value.as_deref(), Some("loaded:agent_content:dev:2"));
    assert_eq!(status, CacheEntryStatus::Fresh);
}

#[tokio::test]
async fn sweep_expired_removes_only_expired_entries() {
    let cache = cache();
    cache.set("fresh", "v".to_string(), Duration::from_secs(60), Duration::from_secs(30), HashSet::new());
    cache.set("gone", "v".to_string(), Duration::from_millis(0), Duration::from_millis(0), HashSet::new());
    tokio::time::sleep(Duration::from_millis(5)).await;
    let removed = cache.sweep_expired();
    assert_eq!(removed, 1);
    assert_eq!(cache.len(), 1);
}
