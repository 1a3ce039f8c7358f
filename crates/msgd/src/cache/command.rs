// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `TMuxCommandCache` (spec §4.C): keys `tmux:sessions`,
//! `tmux:windows:<session>`, TTL 60s.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::model::CacheEntryStatus;
use crate::terminal::{SessionMeta, WindowMeta};

use super::Cache;

const SESSIONS_KEY: &str = "tmux:sessions";

#[derive(Clone)]
pub struct TMuxCommandCache {
    sessions: Cache<Vec<SessionMeta>>,
    windows: Cache<Vec<WindowMeta>>,
    ttl: Duration,
}

impl TMuxCommandCache {
    pub fn new(capacity: usize, ttl: Duration, shutdown: CancellationToken) -> Self {
        Self { sessions: Cache::new(capacity, shutdown.clone()), windows: Cache::new(capacity, shutdown), ttl }
    }

    pub fn windows_key(session: &str) -> String {
        format!("tmux:windows:{session}")
    }

    pub fn get_sessions(&self) -> (Option<Vec<SessionMeta>>, CacheEntryStatus) {
        self.sessions.get(SESSIONS_KEY, true)
    }

    pub fn set_sessions(&self, sessions: Vec<SessionMeta>) {
        let stale_after = self.ttl / 2;
        self.sessions.set(SESSIONS_KEY, sessions, self.ttl, stale_after, Default::default());
    }

    pub fn get_windows(&self, session: &str) -> (Option<Vec<WindowMeta>>, CacheEntryStatus) {
        self.windows.get(&Self::windows_key(session), true)
    }

    pub fn set_windows(&self, session: &str, windows: Vec<WindowMeta>) {
        let stale_after = self.ttl / 2;
        self.windows.set(Self::windows_key(session), windows, self.ttl, stale_after, Default::default());
    }

    pub fn invalidate_windows(&self, session: &str) -> bool {
        self.windows.invalidate(&Self::windows_key(session))
    }

    /// Drive the periodic expired-entry sweep for both the sessions and
    /// windows caches until `shutdown` fires.
    pub async fn run_sweeper(&self, interval: Duration, shutdown: CancellationToken) {
        tokio::join!(
            self.sessions.run_sweeper(interval, shutdown.clone()),
            self.windows.run_sweeper(interval, shutdown),
        );
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
