// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `AgentContentCache` (spec §4.C): keys `agent_content:<session>:<window>`,
//! default TTL 30s (60s once the agent is determined idle), tagged by
//! `session:<name>` for bulk invalidation on session teardown.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::model::{CacheEntryStatus, Target};

use super::Cache;

#[derive(Clone)]
pub struct AgentContentCache {
    cache: Cache<String>,
    ttl: Duration,
    idle_ttl: Duration,
}

impl AgentContentCache {
    pub fn new(capacity: usize, ttl: Duration, idle_ttl: Duration, shutdown: CancellationToken) -> Self {
        Self { cache: Cache::new(capacity, shutdown), ttl, idle_ttl }
    }

    pub fn key(target: &Target) -> String {
        format!("agent_content:{}:{}", target.session(), target.window())
    }

    fn tags(target: &Target) -> HashSet<String> {
        let mut tags = HashSet::new();
        tags.insert(format!("session:{}", target.session()));
        tags
    }

    /// Fetch cached pane content for `target`. A stale hit enqueues a
    /// background refresh if a loader is registered.
    pub fn get(&self, target: &Target) -> (Option<String>, CacheEntryStatus) {
        self.cache.get(&Self::key(target), true)
    }

    /// Populate content for `target`. `idle` extends the TTL to
    /// `idle_ttl` (spec §4.G step 1: "Cache TTL extends to 60s when the
    /// agent is determined idle").
    pub fn set(&self, target: &Target, content: impl Into<String>, idle: bool) {
        let ttl = if idle { self.idle_ttl } else { self.ttl };
        let stale_after = ttl / 2;
        self.cache.set(Self::key(target), content.into(), ttl, stale_after, Self::tags(target));
    }

    /// Invalidate every cached pane for `session` (e.g. on teardown).
    pub fn invalidate_session(&self, session: &str) -> usize {
        self.cache.invalidate_by_tag(&format!("session:{session}"))
    }

    pub fn stats(&self) -> super::CacheStats {
        self.cache.stats()
    }

    pub async fn run_sweeper(&self, interval: Duration, shutdown: CancellationToken) {
        self.cache.run_sweeper(interval, shutdown).await;
    }
}

#[cfg(test)]
#[path = "agent_content_tests.rs"]
mod tests;
