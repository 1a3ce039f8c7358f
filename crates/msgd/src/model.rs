// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! The canonical data model shared by every component: targets, priorities,
//! categories, and the [`MessageEnvelope`] wire/storage unit (spec §3).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MsgdError;

/// A `"<session>:<window>"` address. `session` matches `[A-Za-z0-9_-]+`;
/// `window` is a non-negative integer. Target uniqueness is system-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    session: String,
    window: u32,
}

impl Target {
    /// Construct a target from its parts, validating the session grammar.
    pub fn new(session: impl Into<String>, window: u32) -> Result<Self, MsgdError> {
        let session = session.into();
        if session.is_empty() {
            return Err(MsgdError::validation("target session must not be empty"));
        }
        if !session.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(MsgdError::validation(format!(
                "target session '{session}' must match [A-Za-z0-9_-]+"
            )));
        }
        Ok(Self { session, window })
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// The PM target for this target's session, per the configured
    /// `pm_window_convention` (spec §9 open question — a single fixed value,
    /// consulted identically by the Monitor and the Recovery Coordinator).
    pub fn pm_target(&self, pm_window: u32) -> Self {
        Self { session: self.session.clone(), window: pm_window }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.window)
    }
}

impl std::str::FromStr for Target {
    type Err = MsgdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (session, window) = s
            .split_once(':')
            .ok_or_else(|| MsgdError::validation(format!("target '{s}' missing ':'")))?;
        if window.is_empty() {
            return Err(MsgdError::validation(format!("target '{s}' missing window")));
        }
        let window: u32 = window
            .parse()
            .map_err(|_| MsgdError::validation(format!("target '{s}' window must be a non-negative integer")))?;
        Self::new(session, window)
    }
}

impl Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered message priority. `Ord` follows declaration order:
/// `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// The glyph prefixed to a delivered body (spec §4.E step 1).
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Critical => "🚨",
            Self::High => "⚠️",
            Self::Normal => "📨",
            Self::Low => "💬",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = MsgdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(MsgdError::validation(format!("unknown priority '{other}'"))),
        }
    }
}

/// Message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Health,
    Recovery,
    Status,
    Task,
    Escalation,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Recovery => "recovery",
            Self::Status => "status",
            Self::Task => "task",
            Self::Escalation => "escalation",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Notification,
    Request,
    Response,
    Report,
    Escalation,
    Batch,
}

/// Source identity attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: String,
}

impl Source {
    pub fn new(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self { kind: kind.into(), identifier: identifier.into() }
    }

    pub fn daemon(identifier: impl Into<String>) -> Self {
        Self::new("daemon", identifier)
    }
}

/// An actionable suggestion attached to message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub label: String,
}

/// The body of a message: subject/body text, free-form context, and actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Present only on `type=batch` envelopes: the ordered sub-envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageEnvelope>>,
}

impl Content {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            context: HashMap::new(),
            actions: Vec::new(),
            messages: None,
        }
    }
}

/// The `message` object inside an envelope: type/category/priority/content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub category: Category,
    pub priority: Priority,
    pub content: Content,
}

/// Delivery/tracking metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub tags: Vec<String>,
    pub ttl_seconds: i64,
    pub requires_ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self { tags: Vec::new(), ttl_seconds: 3600, requires_ack: false, correlation_id: None }
    }
}

/// The canonical wire and storage unit (spec §3).
///
/// Immutable after construction — see [`crate::schema::EnvelopeBuilder`] for
/// the only supported construction path, which enforces the invariants
/// below.
///
/// Invariants: `priority == Critical` implies `metadata.requires_ack`; a
/// `type == Batch` envelope's `content.messages` is always `Some`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub message: MessageBody,
    pub metadata: Metadata,
}

impl MessageEnvelope {
    pub fn priority(&self) -> Priority {
        self.message.priority
    }

    pub fn category(&self) -> Category {
        self.message.category
    }

    pub fn is_batch(&self) -> bool {
        matches!(self.message.kind, MessageType::Batch)
    }

    /// Expand a batch envelope into its sub-envelopes; non-batch envelopes
    /// expand to themselves. Used by the filtering helper (spec §4.I).
    pub fn expand(&self) -> Vec<&MessageEnvelope> {
        match &self.message.content.messages {
            Some(sub) if self.is_batch() => sub.iter().collect(),
            _ => vec![self],
        }
    }
}

/// An envelope queued for delivery to a specific target.
#[derive(Debug, Clone)]
pub struct QueuedDelivery {
    pub envelope: MessageEnvelope,
    pub target: Target,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedDelivery {
    pub fn new(envelope: MessageEnvelope, target: Target) -> Self {
        Self { envelope, target, enqueued_at: Utc::now() }
    }
}

/// Derived freshness of a [`CacheEntry`] relative to `stale_after`/`ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntryStatus {
    Fresh,
    Stale,
    Expired,
}

/// A single cache slot (spec §3): `status` is always derived from
/// `created_at`/`stale_after`/`ttl`, never stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub ttl: Duration,
    pub stale_after: Duration,
    pub tags: std::collections::HashSet<String>,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, ttl: Duration, stale_after: Duration, tags: std::collections::HashSet<String>) -> Self {
        let now = Utc::now();
        Self { key: key.into(), value, created_at: now, last_accessed: now, access_count: 0, ttl, stale_after, tags }
    }

    pub fn status(&self) -> CacheEntryStatus {
        let age = Utc::now().signed_duration_since(self.created_at);
        let age = age.to_std().unwrap_or_default();
        if age <= self.stale_after {
            CacheEntryStatus::Fresh
        } else if age <= self.ttl {
            CacheEntryStatus::Stale
        } else {
            CacheEntryStatus::Expired
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }
}

/// An active or historical recovery attempt for a target (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRecord {
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub issue: String,
    pub recovery_type: String,
    pub priority: Priority,
    pub notified_pm: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub succeeded: Option<bool>,
}

impl RecoveryRecord {
    pub fn key_for(session: &str, target: &Target) -> String {
        format!("{session}:{target}")
    }

    pub fn is_active(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// The per-agent state tracked by the Monitoring Engine (spec §3).
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub last_seen_content_hash: Option<u64>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub is_idle: bool,
    pub idle_since: Option<DateTime<Utc>>,
    pub is_fresh: bool,
    pub last_notified_idle_at: Option<DateTime<Utc>>,
    pub crash_signature: Option<String>,
    /// Number of consecutive discovery passes this target was missing from;
    /// the engine discards the state once this reaches 2 (spec §3).
    pub missing_passes: u32,
}

/// A per-target envelope log persisted to a single file, capped at 1000
/// entries (spec §3, §4.D).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredLog {
    pub envelopes: Vec<MessageEnvelope>,
}

impl StoredLog {
    pub const CAPACITY: usize = 1000;

    pub fn push_capped(&mut self, envelope: MessageEnvelope) {
        self.envelopes.push(envelope);
        if self.envelopes.len() > Self::CAPACITY {
            let excess = self.envelopes.len() - Self::CAPACITY;
            self.envelopes.drain(0..excess);
        }
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
