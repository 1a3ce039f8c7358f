// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery Coordinator (spec §4.H): deduplicates recoveries, enforces the
//! PM grace window, tracks history, and notifies PMs via the Priority
//! Router.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::MsgdError;
use crate::model::{Category, Content, MessageType, Priority, RecoveryRecord, Source, Target};
use crate::router::{PriorityRouter, PublishTransport};
use crate::schema::EnvelopeBuilder;
use crate::terminal::{Terminal, WindowMeta};

/// Default PM grace window after a completed recovery (spec §4.H, §8),
/// overridable via [`Config::pm_grace_s`](crate::config::Config::pm_grace_s).
pub const DEFAULT_GRACE_WINDOW_SECONDS: i64 = 180;
/// Recovery history is trimmed to this many entries per target once it
/// exceeds 100 (spec §3, §4.H).
const HISTORY_TRIM_TO: usize = 50;
const HISTORY_MAX: usize = 100;

#[derive(Default)]
struct TargetHistory {
    active: Option<RecoveryRecord>,
    history: Vec<RecoveryRecord>,
}

/// Tracks active/historical recoveries and coordinates PM notification.
pub struct RecoveryCoordinator<T: PublishTransport, A: Terminal> {
    router: PriorityRouter<T>,
    terminal: A,
    records: Mutex<HashMap<String, TargetHistory>>,
    pm_window_convention: u32,
    grace_window_seconds: i64,
}

fn derive_priority(recovery_type: &str, issue: &str) -> Priority {
    let issue_lower = issue.to_lowercase();
    if recovery_type == "pm" {
        return Priority::Critical;
    }
    if recovery_type == "team" {
        return Priority::High;
    }
    if issue_lower.contains("crash") || issue_lower.contains("failure") {
        Priority::Critical
    } else if issue_lower.contains("not responding") {
        Priority::High
    } else {
        Priority::Normal
    }
}

impl<T: PublishTransport, A: Terminal> RecoveryCoordinator<T, A> {
    pub fn new(router: PriorityRouter<T>, terminal: A, pm_window_convention: u32) -> Self {
        Self::with_grace_window(router, terminal, pm_window_convention, DEFAULT_GRACE_WINDOW_SECONDS)
    }

    pub fn with_grace_window(router: PriorityRouter<T>, terminal: A, pm_window_convention: u32, grace_window_seconds: i64) -> Self {
        Self { router, terminal, records: Mutex::new(HashMap::new()), pm_window_convention, grace_window_seconds }
    }

    /// The shared router, for callers (the Monitoring Engine) that need to
    /// route non-recovery envelopes through the same telemetry stream.
    pub fn router(&self) -> &PriorityRouter<T> {
        &self.router
    }

    pub fn pm_window_convention(&self) -> u32 {
        self.pm_window_convention
    }

    /// Resolve the owning PM for `session`: the lowest-indexed window whose
    /// name contains "pm" or "project-manager", falling back to the
    /// configured `pm_window_convention` if none match (spec §4.H step 1).
    pub async fn resolve_pm(&self, session: &str) -> Result<Target, MsgdError> {
        let windows = self.terminal.list_windows(session).await.unwrap_or_default();
        let mut candidates: Vec<&WindowMeta> =
            windows.iter().filter(|w| w.name.to_lowercase().contains("pm") || w.name.to_lowercase().contains("project-manager")).collect();
        candidates.sort_by_key(|w| w.index);
        let window = candidates.first().map(|w| w.index).unwrap_or(self.pm_window_convention);
        Target::new(session, window)
    }

    /// Request a recovery for `target`. Duplicate requests while one is
    /// already active for this key are silently ignored.
    pub async fn notify_recovery_needed(&self, session: &str, target: &Target, recovery_type: &str, issue: &str) -> Result<(), MsgdError> {
        let key = RecoveryRecord::key_for(session, target);
        {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            if records.get(&key).and_then(|h| h.active.as_ref()).is_some() {
                return Ok(());
            }
        }

        let priority = derive_priority(recovery_type, issue);
        let pm = self.resolve_pm(session).await?;
        let envelope = EnvelopeBuilder::new(
            Source::daemon("recovery-coordinator"),
            MessageType::Notification,
            Category::Recovery,
            priority,
            Content::new(format!("recovery needed: {target}"), issue.to_string()),
        )
        .build()?;

        self.router.route(&pm, envelope).await?;

        let record = RecoveryRecord {
            key: key.clone(),
            started_at: Utc::now(),
            issue: issue.to_string(),
            recovery_type: recovery_type.to_string(),
            priority,
            notified_pm: true,
            completed_at: None,
            succeeded: None,
        };
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let entry = records.entry(key).or_default();
        entry.active = Some(record);
        Ok(())
    }

    /// Close the active recovery for `(session, target)` and emit a
    /// follow-up envelope (normal on success, high on failure).
    pub async fn notify_recovery_complete(&self, session: &str, target: &Target, succeeded: bool) -> Result<(), MsgdError> {
        let key = RecoveryRecord::key_for(session, target);
        let closed = {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let entry = records.entry(key.clone()).or_default();
            let Some(mut record) = entry.active.take() else { return Ok(()) };
            record.completed_at = Some(Utc::now());
            record.succeeded = Some(succeeded);
            entry.history.push(record.clone());
            if entry.history.len() > HISTORY_MAX {
                let excess = entry.history.len() - HISTORY_TRIM_TO;
                entry.history.drain(0..excess);
            }
            record
        };

        let priority = if succeeded { Priority::Normal } else { Priority::High };
        let body = if succeeded { format!("recovery of {target} succeeded") } else { format!("recovery of {target} failed") };
        let pm = self.resolve_pm(session).await?;
        let envelope = EnvelopeBuilder::new(
            Source::daemon("recovery-coordinator"),
            MessageType::Notification,
            Category::Recovery,
            priority,
            Content::new(format!("recovery complete: {target}"), body),
        )
        .build()?;
        self.router.route(&pm, envelope).await?;
        info!(target = %target, succeeded, "recovery closed");
        let _ = closed;
        Ok(())
    }

    /// Fan out a high-priority message to every affected agent concurrently
    /// (spec §4.H: team-wide recovery notices are not delivered serially).
    pub async fn notify_team_recovery(&self, targets: &[Target], issue: &str) -> Result<(), MsgdError> {
        let deliveries = targets.iter().map(|target| async move {
            let envelope = EnvelopeBuilder::new(
                Source::daemon("recovery-coordinator"),
                MessageType::Notification,
                Category::Escalation,
                Priority::High,
                Content::new("team recovery", issue.to_string()),
            )
            .build()?;
            self.router.route(target, envelope).await
        });
        futures_util::future::join_all(deliveries).await.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    /// True when the last completed recovery for `pm_target` finished less
    /// than `grace_window_seconds` ago (spec §4.H, §8).
    pub fn in_grace(&self, session: &str, pm_target: &Target) -> bool {
        let key = RecoveryRecord::key_for(session, pm_target);
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let Some(history) = records.get(&key) else { return false };
        let Some(last_completed_at) = last_completion(history) else { return false };
        (Utc::now() - last_completed_at).num_seconds() < self.grace_window_seconds
    }
}

fn last_completion(history: &TargetHistory) -> Option<DateTime<Utc>> {
    history.history.last().and_then(|r| r.completed_at)
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
