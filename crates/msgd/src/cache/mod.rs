// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache Layer (spec §4.C): a generic TTL+stale-window store keyed by
//! string, with LRU eviction, background sweeping, and a refresh worker
//! that consults a per-prefix loader registry (spec §9 DESIGN NOTES).

pub mod agent_content;
pub mod command;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::{CacheEntry, CacheEntryStatus};

/// A loader invoked by the refresh worker for a stale key. Keyed by prefix
/// (the portion of the key before the first `:`); a stale key whose prefix
/// has no registered loader is dropped with a debug log line, not an error.
pub type Loader<V> = Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<V>> + Send>> + Send + Sync>;

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub refreshes: u64,
    pub expirations: u64,
}

struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    refreshes: AtomicU64,
    expirations: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }
}

struct Shared<V> {
    entries: Mutex<indexmap::IndexMap<String, CacheEntry<V>>>,
    loaders: Mutex<HashMap<String, Loader<V>>>,
    capacity: usize,
    counters: Counters,
    refresh_tx: mpsc::UnboundedSender<String>,
}

/// Generic TTL+stale cache. Cheap to clone: internally an `Arc`.
pub struct Cache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    /// Build a cache with the given capacity. Spawns a refresh worker task
    /// bound to `shutdown`; callers should also spawn [`Cache::run_sweeper`]
    /// to reclaim expired entries on a schedule.
    pub fn new(capacity: usize, shutdown: CancellationToken) -> Self {
        let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<String>();
        let shared = Arc::new(Shared {
            entries: Mutex::new(indexmap::IndexMap::new()),
            loaders: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            counters: Counters::default(),
            refresh_tx,
        });

        let worker_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    key = refresh_rx.recv() => {
                        let Some(key) = key else { break };
                        let prefix = key.split(':').next().unwrap_or("").to_string();
                        let loader = worker_shared.loaders.lock().unwrap_or_else(|e| e.into_inner()).get(&prefix).cloned();
                        match loader {
                            Some(loader) => {
                                if let Some(value) = loader(key.clone()).await {
                                    let mut entries = worker_shared.entries.lock().unwrap_or_else(|e| e.into_inner());
                                    if let Some(entry) = entries.get_mut(&key) {
                                        entry.value = value;
                                        entry.created_at = chrono::Utc::now();
                                        worker_shared.counters.refreshes.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                            }
                            None => debug!(key = %key, "no refresh loader registered for prefix; dropping"),
                        }
                    }
                }
            }
        });

        Self { shared }
    }

    /// Register a loader invoked by the refresh worker for stale keys under
    /// `prefix`, and immediately populate `keys` that are currently absent.
    pub async fn warmup(&self, keys: Vec<String>, prefix: impl Into<String>, loader: Loader<V>, ttl: Duration, stale_after: Duration) {
        let prefix = prefix.into();
        self.shared.loaders.lock().unwrap_or_else(|e| e.into_inner()).insert(prefix, Arc::clone(&loader));
        for key in keys {
            let already_present = self.shared.entries.lock().unwrap_or_else(|e| e.into_inner()).contains_key(&key);
            if !already_present {
                if let Some(value) = loader(key.clone()).await {
                    self.set(key, value, ttl, stale_after, Default::default());
                }
            }
        }
    }

    /// Fetch `key`. A stale hit enqueues a background refresh when
    /// `refresh_if_stale` is set and a loader is registered for its prefix.
    pub fn get(&self, key: &str, refresh_if_stale: bool) -> (Option<V>, CacheEntryStatus) {
        let mut entries = self.shared.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get_mut(key) else {
            self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);
            return (None, CacheEntryStatus::Expired);
        };
        let status = entry.status();
        if matches!(status, CacheEntryStatus::Expired) {
            self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);
            entries.shift_remove(key);
            self.shared.counters.expirations.fetch_add(1, Ordering::Relaxed);
            return (None, CacheEntryStatus::Expired);
        }

        entry.touch();
        let value = entry.value.clone();
        let last = entries.len().saturating_sub(1);
        if let Some(index) = entries.get_index_of(key) {
            entries.move_index(index, last);
        }
        self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);

        if matches!(status, CacheEntryStatus::Stale) && refresh_if_stale {
            let _ = self.shared.refresh_tx.send(key.to_string());
        }

        (Some(value), status)
    }

    /// Insert or replace `key`, evicting the least-recently-used entry if
    /// the cache is at capacity.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration, stale_after: Duration, tags: std::collections::HashSet<String>) {
        let key = key.into();
        let mut entries = self.shared.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.shared.capacity && !entries.contains_key(&key) {
            if let Some((evicted_key, _)) = entries.shift_remove_index(0) {
                debug!(key = %evicted_key, "evicted least-recently-used cache entry");
                self.shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.insert(key.clone(), CacheEntry::new(key, value, ttl, stale_after, tags));
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.shared.entries.lock().unwrap_or_else(|e| e.into_inner()).shift_remove(key).is_some()
    }

    /// Remove every entry carrying `tag`, returning the count removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut entries = self.shared.entries.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<String> = entries.iter().filter(|(_, e)| e.tags.contains(tag)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            entries.shift_remove(key);
        }
        doomed.len()
    }

    /// Remove every expired entry. Intended to be driven by a periodic
    /// sweeper task.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.shared.entries.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<String> =
            entries.iter().filter(|(_, e)| matches!(e.status(), CacheEntryStatus::Expired)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            entries.shift_remove(key);
        }
        self.shared.counters.expirations.fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len()
    }

    /// Drive the periodic sweep until `shutdown` fires.
    pub async fn run_sweeper(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_expired();
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.shared.counters.hits.load(Ordering::Relaxed),
            misses: self.shared.counters.misses.load(Ordering::Relaxed),
            evictions: self.shared.counters.evictions.load(Ordering::Relaxed),
            refreshes: self.shared.counters.refreshes.load(Ordering::Relaxed),
            expirations: self.shared.counters.expirations.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
