// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! The canonical envelope builder and the filtering helper that expands
//! batches before applying a predicate (spec §4.I).

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::error::MsgdError;
use crate::model::{Category, Content, MessageBody, MessageEnvelope, MessageType, Metadata, Priority, Source};

/// Builds a [`MessageEnvelope`], enforcing the two system-wide invariants:
///
/// - `priority == Critical` implies `metadata.requires_ack == true`.
/// - `type == Batch` implies `content.messages.is_some()` and non-empty.
///
/// This is the only supported construction path for an envelope; every
/// producer (daemon command handlers, router retries, monitor reports,
/// recovery notices) goes through it.
pub struct EnvelopeBuilder {
    source: Source,
    kind: MessageType,
    category: Category,
    priority: Priority,
    content: Content,
    metadata: Metadata,
}

impl EnvelopeBuilder {
    pub fn new(source: Source, kind: MessageType, category: Category, priority: Priority, content: Content) -> Self {
        Self { source, kind, category, priority, content, metadata: Metadata::default() }
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.metadata.ttl_seconds = ttl_seconds;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.metadata.tags = tags;
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn build(mut self) -> Result<MessageEnvelope, MsgdError> {
        if self.priority == Priority::Critical {
            self.metadata.requires_ack = true;
        }
        if matches!(self.kind, MessageType::Batch) {
            let has_sub_messages = self.content.messages.as_ref().is_some_and(|m| !m.is_empty());
            if !has_sub_messages {
                return Err(MsgdError::validation(
                    "a batch envelope's content.messages must be a non-empty ordered sequence",
                ));
            }
        } else if self.content.messages.is_some() {
            return Err(MsgdError::validation("only a batch envelope may carry content.messages"));
        }
        if self.content.subject.is_empty() && self.content.body.is_empty() {
            return Err(MsgdError::validation("content must have a subject or a body"));
        }

        Ok(MessageEnvelope {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: self.source,
            message: MessageBody { kind: self.kind, category: self.category, priority: self.priority, content: self.content },
            metadata: self.metadata,
        })
    }
}

/// Build a `type=batch` envelope wrapping the given sub-envelopes in order.
pub fn build_batch(source: Source, category: Category, priority: Priority, subject: impl Into<String>, messages: Vec<MessageEnvelope>) -> Result<MessageEnvelope, MsgdError> {
    let mut content = Content::new(subject, format!("{} batched messages", messages.len()));
    content.messages = Some(messages);
    EnvelopeBuilder::new(source, MessageType::Batch, category, priority, content).build()
}

/// Expand every envelope in `envelopes` (flattening batches) and return only
/// the sub-envelopes matching `predicate`, preserving order.
pub fn filter_expanded<'a, F>(envelopes: &'a [MessageEnvelope], predicate: F) -> Vec<&'a MessageEnvelope>
where
    F: Fn(&MessageEnvelope) -> bool,
{
    envelopes.iter().flat_map(|e| e.expand()).filter(|e| predicate(e)).collect()
}

/// The structured filtering criteria offered by the schema (spec §4.I): any
/// of a set of priorities, any of a set of categories, an exact source-type
/// match, presence of any tag in a set, and `requires_ack == true`. Every
/// populated field is ANDed together; within a field, membership is an OR.
/// An entirely empty criterion matches every envelope (the "filter by the
/// empty criterion returns the input sequence" law in spec §8).
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    priorities: Option<HashSet<Priority>>,
    categories: Option<HashSet<Category>>,
    source_type: Option<String>,
    tags: Option<HashSet<String>>,
    requires_ack: Option<bool>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priorities(mut self, priorities: impl IntoIterator<Item = Priority>) -> Self {
        self.priorities = Some(priorities.into_iter().collect());
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.categories = Some(categories.into_iter().collect());
        self
    }

    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = Some(tags.into_iter().collect());
        self
    }

    pub fn requires_ack(mut self, requires_ack: bool) -> Self {
        self.requires_ack = Some(requires_ack);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.priorities.is_none() && self.categories.is_none() && self.source_type.is_none() && self.tags.is_none() && self.requires_ack.is_none()
    }

    /// Whether `envelope` satisfies every populated criterion.
    pub fn matches(&self, envelope: &MessageEnvelope) -> bool {
        if let Some(priorities) = &self.priorities {
            if !priorities.contains(&envelope.priority()) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&envelope.category()) {
                return false;
            }
        }
        if let Some(source_type) = &self.source_type {
            if envelope.source.kind != *source_type {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !envelope.metadata.tags.iter().any(|t| tags.contains(t)) {
                return false;
            }
        }
        if let Some(requires_ack) = self.requires_ack {
            if envelope.metadata.requires_ack != requires_ack {
                return false;
            }
        }
        true
    }

    /// Expand batches and apply this criterion, preserving order.
    pub fn filter<'a>(&self, envelopes: &'a [MessageEnvelope]) -> Vec<&'a MessageEnvelope> {
        filter_expanded(envelopes, |e| self.matches(e))
    }

    /// Intersect two criteria: an envelope must satisfy both. Commutative for
    /// non-contradictory criteria — `a.and(b)` and `b.and(a)` match the same
    /// envelopes (spec §8 "filter composition is commutative"), since every
    /// field is combined symmetrically (set intersection, or equal scalars).
    /// Combining two criteria that pin `source_type`/`requires_ack` to
    /// different scalars is a caller error this type does not reject; the
    /// later operand's value wins, matching how the generic predicate form
    /// in [`filter_expanded`] would short-circuit on the first mismatch.
    pub fn and(self, other: MessageFilter) -> MessageFilter {
        MessageFilter {
            priorities: merge_sets(self.priorities, other.priorities),
            categories: merge_sets(self.categories, other.categories),
            source_type: other.source_type.or(self.source_type),
            tags: merge_sets(self.tags, other.tags),
            requires_ack: other.requires_ack.or(self.requires_ack),
        }
    }
}

fn merge_sets<V: Eq + std::hash::Hash + Clone>(a: Option<HashSet<V>>, b: Option<HashSet<V>>) -> Option<HashSet<V>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect()),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
