// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::terminal::SessionMeta;

fn new_cache() -> TMuxCommandCache {
    TMuxCommandCache::new(16, Duration::from_secs(60), CancellationToken::new())
}

#[test]
fn windows_key_is_prefixed_by_session() {
    assert_eq!(TMuxCommandCache::windows_key("dev"), "tmux:windows:dev");
}

#[tokio::test]
async fn sessions_round_trip() {
    let cache = new_cache();
    cache.set_sessions(vec![SessionMeta { name: "dev".into() }]);
    let (sessions, status) = cache.get_sessions();
    assert_eq!(sessions.unwrap().len(), 1);
    assert_eq!(status, CacheEntryStatus::Fresh);
}

#[tokio::test]
async fn windows_are_keyed_per_session() {
    let cache = new_cache();
    cache.set_windows("dev", vec![WindowMeta { index: 0, name: "pm".into() }]);
    let (windows, _) = cache.get_windows("dev");
    assert_eq!(windows.unwrap().len(), 1);
    assert!(cache.get_windows("prod").0.is_none());
}

#[tokio::test]
async fn invalidate_windows_removes_only_that_session() {
    let cache = new_cache();
    cache.set_windows("dev", vec![WindowMeta { index: 0, name: "pm".into() }]);
    assert!(cache.invalidate_windows("dev"));
    assert!(cache.get_windows("dev").0.is_none());
}
