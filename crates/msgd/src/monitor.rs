// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitoring Engine (spec §4.G): a periodic cycle that discovers agents via
//! the command cache, classifies each one's pane content, and raises
//! health/status/escalation notifications through the Priority Router.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::agent_content::AgentContentCache;
use crate::cache::command::TMuxCommandCache;
use crate::error::{ErrorCode, MsgdError};
use crate::model::{AgentState, Category, Content, MessageType, Priority, Source, Target};
use crate::pool::ConnectionPool;
use crate::recovery::RecoveryCoordinator;
use crate::router::PublishTransport;
use crate::schema::EnvelopeBuilder;
use crate::terminal::{Terminal, TerminalError, WindowMeta};

/// A target is discarded from tracking once it has been missing from this
/// many consecutive discovery passes (spec §3 `AgentState.missing_passes`).
const MAX_MISSING_PASSES: u32 = 2;

fn transport_err(e: TerminalError) -> MsgdError {
    match e {
        TerminalError::Timeout => MsgdError::new(ErrorCode::TransportTimeout, e.to_string()),
        _ => MsgdError::new(ErrorCode::Delivery, e.to_string()),
    }
}

/// How many pane lines are captured on a cache miss (spec §4.G step 1).
const CAPTURE_LINES: usize = 50;
/// Idle past this duration is `high` priority.
const IDLE_HIGH_THRESHOLD_SECONDS: i64 = 1800;
/// Idle past this duration (but not `high`) is `normal`; below it, `low`.
const IDLE_NORMAL_THRESHOLD_SECONDS: i64 = 900;
/// Fraction of a session's agents idle before a team-idle escalation fires.
const TEAM_IDLE_RATIO: f64 = 0.5;
/// Bare-prompt fresh-agent detection caps at this many lines (spec §4.G step 5).
const FRESH_PROMPT_MAX_LINES: usize = 20;
/// The supplemented bare-Human-prompt variant uses a tighter cap
/// (`original_source/.../idle_monitor_pubsub.py`).
const FRESH_HUMAN_PROMPT_MAX_LINES: usize = 10;
/// Crash signatures, scanned in order; the first match wins (spec §4.G step 4).
const CRASH_SIGNATURES: &[&str] = &["Segmentation fault", "ERROR", "FATAL", "Traceback", "panic:", "core dumped"];
/// Textual markers recognized as an interactive interface being present
/// (spec §4.G step 3(a)); their total absence means "no_claude_interface".
const INTERFACE_MARKERS: &[&str] = &["Human:", "Assistant:", "❯", "$ "];
/// Idle markers recognized in content, in priority order (spec §4.G step 3(c)).
const IDLE_TEXT_MARKERS: &[(&str, IdleKind)] = &[
    ("Thinking", IdleKind::Thinking),
    ("Please wait", IdleKind::Waiting),
    ("Loading", IdleKind::Loading),
    ("Press any key to continue", IdleKind::Paused),
];

/// Why an agent is classified idle (spec §4.G step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleKind {
    NoClaudeInterface,
    WaitingForInput,
    Thinking,
    Waiting,
    Loading,
    Paused,
}

impl IdleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoClaudeInterface => "no_claude_interface",
            Self::WaitingForInput => "waiting_for_input",
            Self::Thinking => "thinking",
            Self::Waiting => "waiting",
            Self::Loading => "loading",
            Self::Paused => "paused",
        }
    }
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

fn last_non_empty_line(content: &str) -> Option<&str> {
    content.lines().rev().find(|line| !line.trim().is_empty()).map(str::trim)
}

fn is_blank_prompt(line: &str) -> bool {
    matches!(line, "Human:" | "Assistant:" | "")
}

/// Classify why `content` looks idle, per the (a)/(b)/(c) rules in spec §4.G
/// step 3. Returns `None` when none of the conditions hold.
fn classify_idle(content: &str) -> Option<IdleKind> {
    if !INTERFACE_MARKERS.iter().any(|marker| content.contains(marker)) {
        return Some(IdleKind::NoClaudeInterface);
    }
    if last_non_empty_line(content).map(is_blank_prompt).unwrap_or(true) {
        return Some(IdleKind::WaitingForInput);
    }
    for (marker, kind) in IDLE_TEXT_MARKERS {
        if content.contains(marker) {
            return Some(*kind);
        }
    }
    None
}

/// Scan for the six crash signatures (spec §4.G step 4); the first match,
/// in declaration order, is returned.
fn detect_crash(content: &str) -> Option<&'static str> {
    CRASH_SIGNATURES.iter().find(|sig| content.contains(*sig)).copied()
}

/// A welcome greeting, or a short transcript ending at a bare prompt (spec
/// §4.G step 5, supplemented by the tighter bare-Human-prompt variant).
fn detect_fresh(content: &str) -> bool {
    if content.contains("Welcome to Claude") {
        return true;
    }
    let line_count = content.lines().count();
    let Some(last) = last_non_empty_line(content) else { return false };
    if last == "Human:" && line_count < FRESH_HUMAN_PROMPT_MAX_LINES {
        return true;
    }
    is_blank_prompt(last) && line_count < FRESH_PROMPT_MAX_LINES
}

fn idle_priority(idle_seconds: i64) -> Priority {
    if idle_seconds > IDLE_HIGH_THRESHOLD_SECONDS {
        Priority::High
    } else if idle_seconds > IDLE_NORMAL_THRESHOLD_SECONDS {
        Priority::Normal
    } else {
        Priority::Low
    }
}

/// A roster entry discovered for a session: everything past window 0 is
/// treated as a monitored agent (spec §4.G discovery phase).
struct SessionRoster {
    session: String,
    pm_target: Target,
    agents: Vec<Target>,
}

/// Periodic discovery + per-agent classification + notification engine
/// (spec §4.G).
pub struct MonitoringEngine<T: PublishTransport, A: Terminal> {
    pool: ConnectionPool<A>,
    content_cache: AgentContentCache,
    command_cache: TMuxCommandCache,
    recovery: Arc<RecoveryCoordinator<T, A>>,
    states: StdMutex<HashMap<Target, AgentState>>,
    pm_window_convention: u32,
    interval: Duration,
    idle_threshold: Duration,
    adapter_timeout: Duration,
    shutdown: CancellationToken,
}

impl<T: PublishTransport, A: Terminal + 'static> MonitoringEngine<T, A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: ConnectionPool<A>,
        content_cache: AgentContentCache,
        command_cache: TMuxCommandCache,
        recovery: Arc<RecoveryCoordinator<T, A>>,
        pm_window_convention: u32,
        interval: Duration,
        idle_threshold: Duration,
        adapter_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            content_cache,
            command_cache,
            recovery,
            states: StdMutex::new(HashMap::new()),
            pm_window_convention,
            interval,
            idle_threshold,
            adapter_timeout,
            shutdown,
        }
    }

    /// Run cycles until shutdown; a cycle is never aborted mid-phase, only
    /// at its next boundary (spec §4.G cancellation semantics).
    pub async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "monitoring cycle failed; continuing on next tick");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn run_cycle(&self) -> Result<(), MsgdError> {
        let rosters = self.discover().await?;
        for roster in &rosters {
            if self.shutdown.is_cancelled() {
                break;
            }
            // PM health phase: the PM's own window is itself monitored for
            // idle/crash/fresh just like any other agent, run ahead of the
            // per-agent loop so a PM notification is eligible for the same
            // cycle's grace-window check (spec §4.H, §8 scenario 4;
            // `original_source/.../async_polling_strategy.py`'s
            // `_check_pm_health_async` runs this as its own parallel phase).
            if let Err(e) = self.check_agent(&roster.session, &roster.pm_target).await {
                warn!(target = %roster.pm_target, error = %e, "pm health check failed; continuing");
            }
            for target in &roster.agents {
                if let Err(e) = self.check_agent(&roster.session, target).await {
                    warn!(target = %target, error = %e, "agent check failed; continuing");
                }
            }
            self.check_team_idle(roster).await?;
            self.emit_team_summary(roster).await?;
        }
        self.reconcile_missing(rosters.iter().flat_map(|r| std::iter::once(&r.pm_target).chain(r.agents.iter())));
        Ok(())
    }

    /// Age out state for targets absent from this discovery pass; a target
    /// missing for [`MAX_MISSING_PASSES`] consecutive passes is discarded
    /// entirely (spec §3 `AgentState.missing_passes`).
    fn reconcile_missing<'a>(&self, present: impl Iterator<Item = &'a Target>) {
        let present: std::collections::HashSet<&Target> = present.collect();
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.retain(|target, state| {
            if present.contains(target) {
                state.missing_passes = 0;
                true
            } else {
                state.missing_passes += 1;
                state.missing_passes < MAX_MISSING_PASSES
            }
        });
    }

    /// Discovery phase: prefer the command cache, fall back to a live
    /// listing and repopulate it (spec §4.G discovery phase).
    async fn discover(&self) -> Result<Vec<SessionRoster>, MsgdError> {
        let sessions = match self.command_cache.get_sessions() {
            (Some(sessions), _) => sessions,
            (None, _) => {
                let lease = self.pool.acquire(self.adapter_timeout).await?;
                let sessions = lease.list_sessions().await.map_err(transport_err)?;
                drop(lease);
                self.command_cache.set_sessions(sessions.clone());
                sessions
            }
        };

        let mut rosters = Vec::with_capacity(sessions.len());
        for session in sessions {
            let windows = match self.command_cache.get_windows(&session.name) {
                (Some(windows), _) => windows,
                (None, _) => {
                    let lease = self.pool.acquire(self.adapter_timeout).await?;
                    let windows = lease.list_windows(&session.name).await.map_err(transport_err)?;
                    drop(lease);
                    self.command_cache.set_windows(&session.name, windows.clone());
                    windows
                }
            };
            rosters.push(self.build_roster(session.name, windows)?);
        }
        Ok(rosters)
    }

    fn build_roster(&self, session: String, windows: Vec<WindowMeta>) -> Result<SessionRoster, MsgdError> {
        let pm_target = Target::new(session.as_str(), self.pm_window_convention)?;
        let agents = windows
            .iter()
            .filter(|w| w.index > 0)
            .map(|w| Target::new(session.as_str(), w.index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SessionRoster { session, pm_target, agents })
    }

    /// True when `target` is itself the resolved PM address and a recovery
    /// for that PM completed within the grace window (spec §4.H, §8
    /// scenario 4).
    fn suppressed_by_grace(&self, session: &str, target: &Target) -> bool {
        let pm = target.pm_target(self.pm_window_convention);
        if *target != pm {
            return false;
        }
        self.recovery.in_grace(session, &pm)
    }

    /// Run the per-agent check phases 1-5 and fire any resulting
    /// notifications (spec §4.G).
    async fn check_agent(&self, session: &str, target: &Target) -> Result<(), MsgdError> {
        let content = self.fetch_content(target).await?;
        let hash = content_hash(&content);

        let shape_idle = classify_idle(&content);
        let became_active;
        let idle_since;
        let is_idle = shape_idle.is_some();
        {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let state = states.entry(target.clone()).or_default();
            let previously_idle = state.is_idle;
            became_active = previously_idle && !is_idle;

            if is_idle {
                // Set once on the active->idle transition; left untouched on
                // every subsequent idle cycle regardless of content-hash
                // changes (a redrawn spinner or shifting scrollback must not
                // reset the streak) — cleared only on the idle->active
                // transition below.
                if !previously_idle {
                    state.idle_since = Some(Utc::now());
                }
            } else {
                state.idle_since = None;
            }
            if became_active {
                state.last_notified_idle_at = None;
                info!(target = %target, "agent became active again");
            }
            state.is_idle = is_idle;
            state.last_seen_content_hash = Some(hash);
            state.last_activity_at = Some(Utc::now());
            idle_since = state.idle_since;
        }

        self.content_cache.set(target, content.clone(), is_idle);

        if let Some(signature) = detect_crash(&content) {
            self.handle_crash(session, target, signature).await?;
        } else {
            self.states.lock().unwrap_or_else(|e| e.into_inner()).entry(target.clone()).or_default().crash_signature = None;
        }

        if let (Some(kind), Some(since)) = (shape_idle, idle_since) {
            self.handle_idle(session, target, kind, since).await?;
        }

        self.handle_fresh(target, &content).await?;

        Ok(())
    }

    async fn fetch_content(&self, target: &Target) -> Result<String, MsgdError> {
        if let (Some(content), _) = self.content_cache.get(target) {
            return Ok(content);
        }
        let lease = self.pool.acquire(self.adapter_timeout).await?;
        let content = lease.capture(target, CAPTURE_LINES).await.map_err(transport_err)?;
        drop(lease);
        self.content_cache.set(target, content.clone(), false);
        Ok(content)
    }

    async fn handle_crash(&self, session: &str, target: &Target, signature: &str) -> Result<(), MsgdError> {
        let already_notified = {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states.get(target).and_then(|s| s.crash_signature.as_deref()) == Some(signature)
        };
        if already_notified {
            return Ok(());
        }
        self.states.lock().unwrap_or_else(|e| e.into_inner()).entry(target.clone()).or_default().crash_signature = Some(signature.to_string());

        if self.suppressed_by_grace(session, target) {
            debug!(target = %target, "crash notification suppressed by PM grace window");
            return Ok(());
        }

        let mut content = Content::new(format!("agent crash detected: {target}"), format!("crash signature: {signature}"));
        content.context.insert("issue_type".to_string(), serde_json::json!("crashed"));
        content.context.insert("crash_signature".to_string(), serde_json::json!(signature));
        let envelope = EnvelopeBuilder::new(Source::daemon("monitor"), MessageType::Notification, Category::Health, Priority::Critical, content).build()?;
        let pm = target.pm_target(self.pm_window_convention);
        self.recovery.router().route(&pm, envelope).await?;
        self.recovery.notify_recovery_needed(session, target, "agent", &format!("crash signature: {signature}")).await?;
        Ok(())
    }

    async fn handle_idle(&self, session: &str, target: &Target, kind: IdleKind, idle_since: chrono::DateTime<Utc>) -> Result<(), MsgdError> {
        let idle_seconds = (Utc::now() - idle_since).num_seconds();
        if idle_seconds < self.idle_threshold.as_secs() as i64 {
            return Ok(());
        }
        let already_notified = self.states.lock().unwrap_or_else(|e| e.into_inner()).get(target).map(|s| s.last_notified_idle_at.is_some()).unwrap_or(false);
        if already_notified {
            return Ok(());
        }
        if self.suppressed_by_grace(session, target) {
            debug!(target = %target, "idle notification suppressed by PM grace window");
            return Ok(());
        }

        let priority = idle_priority(idle_seconds);
        let mut content = Content::new(format!("agent idle: {target}"), format!("idle for {idle_seconds}s"));
        content.context.insert("idle_type".to_string(), serde_json::json!(kind.as_str()));
        let envelope = EnvelopeBuilder::new(Source::daemon("monitor"), MessageType::Notification, Category::Health, priority, content).build()?;
        let pm = target.pm_target(self.pm_window_convention);
        self.recovery.router().route(&pm, envelope).await?;

        self.states.lock().unwrap_or_else(|e| e.into_inner()).entry(target.clone()).or_default().last_notified_idle_at = Some(Utc::now());
        Ok(())
    }

    async fn handle_fresh(&self, target: &Target, content: &str) -> Result<(), MsgdError> {
        let fresh_now = detect_fresh(content);
        let was_fresh = {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let state = states.entry(target.clone()).or_default();
            let was_fresh = state.is_fresh;
            state.is_fresh = fresh_now;
            was_fresh
        };
        if fresh_now && !was_fresh {
            let content = Content::new(format!("fresh agent observed: {target}"), "agent session appears newly started".to_string());
            let envelope = EnvelopeBuilder::new(Source::daemon("monitor"), MessageType::Notification, Category::Status, Priority::Normal, content).build()?;
            let pm = target.pm_target(self.pm_window_convention);
            self.recovery.router().route(&pm, envelope).await?;
        }
        Ok(())
    }

    /// Team-idle escalation: fires when at least half of a session's agents
    /// are currently idle (spec §4.G notification rules).
    async fn check_team_idle(&self, roster: &SessionRoster) -> Result<(), MsgdError> {
        if roster.agents.is_empty() {
            return Ok(());
        }
        let idle_count = {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            roster.agents.iter().filter(|t| states.get(*t).map(|s| s.is_idle).unwrap_or(false)).count()
        };
        let ratio = idle_count as f64 / roster.agents.len() as f64;
        if ratio < TEAM_IDLE_RATIO {
            return Ok(());
        }
        let content = Content::new(
            format!("team idle: {}", roster.session),
            format!("{idle_count}/{} agents idle", roster.agents.len()),
        );
        let envelope = EnvelopeBuilder::new(Source::daemon("monitor"), MessageType::Escalation, Category::Escalation, Priority::High, content).build()?;
        self.recovery.router().route(&roster.pm_target, envelope).await?;
        Ok(())
    }

    /// Periodic team summary: counts of active/idle/crashed agents, batched
    /// at low priority (spec §4.G notification rules).
    async fn emit_team_summary(&self, roster: &SessionRoster) -> Result<(), MsgdError> {
        if roster.agents.is_empty() {
            return Ok(());
        }
        let (idle, crashed) = {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let idle = roster.agents.iter().filter(|t| states.get(*t).map(|s| s.is_idle).unwrap_or(false)).count();
            let crashed = roster.agents.iter().filter(|t| states.get(*t).map(|s| s.crash_signature.is_some()).unwrap_or(false)).count();
            (idle, crashed)
        };
        let active = roster.agents.len() - idle;
        let content = Content::new(
            format!("team summary: {}", roster.session),
            format!("active={active} idle={idle} crashed={crashed}"),
        );
        let envelope = EnvelopeBuilder::new(Source::daemon("monitor"), MessageType::Notification, Category::Status, Priority::Low, content).build()?;
        self.recovery.router().route(&roster.pm_target, envelope).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
