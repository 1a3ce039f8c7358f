// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use super::*;
use crate::model::Priority;

fn content() -> Content {
    Content::new("subject", "body")
}

#[test]
fn critical_priority_forces_requires_ack() {
    let env = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Health, Priority::Critical, content())
        .build()
        .unwrap();
    assert!(env.metadata.requires_ack);
}

#[test]
fn non_critical_priority_leaves_requires_ack_as_set() {
    let env = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Health, Priority::Normal, content())
        .build()
        .unwrap();
    assert!(!env.metadata.requires_ack);
}

#[test]
fn batch_without_sub_messages_is_rejected() {
    let err = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Batch, Category::Status, Priority::Low, content())
        .build()
        .unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::Validation);
}

#[test]
fn non_batch_with_sub_messages_is_rejected() {
    let mut c = content();
    let sub = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Status, Priority::Low, content())
        .build()
        .unwrap();
    c.messages = Some(vec![sub]);
    let err = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Status, Priority::Low, c)
        .build()
        .unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::Validation);
}

#[test]
fn empty_content_is_rejected() {
    let empty = Content::new("", "");
    let err = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Status, Priority::Low, empty)
        .build()
        .unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::Validation);
}

#[test]
fn build_batch_wraps_sub_envelopes_in_order() {
    let a = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Status, Priority::Low, Content::new("a", "a-body"))
        .build()
        .unwrap();
    let b = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Status, Priority::Low, Content::new("b", "b-body"))
        .build()
        .unwrap();
    let batch = build_batch(Source::daemon("msgd"), Category::Status, Priority::Low, "digest", vec![a.clone(), b.clone()]).unwrap();
    assert!(batch.is_batch());
    let expanded = batch.expand();
    assert_eq!(expanded.len(), 2);
    assert_eq!(expanded[0].id, a.id);
    assert_eq!(expanded[1].id, b.id);
}

#[test]
fn filter_expanded_flattens_batches_before_filtering() {
    let low = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Status, Priority::Low, Content::new("lo", "lo"))
        .build()
        .unwrap();
    let high = EnvelopeBuilder::new(Source::daemon("msgd"), MessageType::Notification, Category::Status, Priority::High, Content::new("hi", "hi"))
        .build()
        .unwrap();
    let batch = build_batch(Source::daemon("msgd"), Category::Status, Priority::Low, "digest", vec![low.clone(), high.clone()]).unwrap();
    let matches = filter_expanded(std::slice::from_ref(&batch), |e| e.priority() >= Priority::High);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, high.id);
}

fn sample_envelopes() -> Vec<MessageEnvelope> {
    let critical = EnvelopeBuilder::new(Source::daemon("monitor"), MessageType::Notification, Category::Health, Priority::Critical, Content::new("crash", "crash"))
        .build()
        .unwrap();
    let mut recovery = EnvelopeBuilder::new(Source::new("daemon", "recovery-coordinator"), MessageType::Notification, Category::Recovery, Priority::High, Content::new("recover", "recover"));
    recovery = recovery.tags(vec!["team-a".to_string()]);
    let recovery = recovery.build().unwrap();
    let status = EnvelopeBuilder::new(Source::daemon("monitor"), MessageType::Notification, Category::Status, Priority::Low, Content::new("status", "status"))
        .build()
        .unwrap();
    vec![critical, recovery, status]
}

#[test]
fn empty_criterion_returns_the_input_sequence() {
    let envelopes = sample_envelopes();
    let filter = MessageFilter::new();
    assert!(filter.is_empty());
    let matched = filter.filter(&envelopes);
    let ids: Vec<&str> = matched.iter().map(|e| e.id.as_str()).collect();
    let expected: Vec<&str> = envelopes.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, expected);
}

#[test]
fn filter_criteria_and_is_commutative() {
    let envelopes = sample_envelopes();
    let by_priority = MessageFilter::new().with_priorities([Priority::Critical, Priority::High]);
    let by_category = MessageFilter::new().with_categories([Category::Health, Category::Recovery]);

    let a_then_b = by_priority.clone().and(by_category.clone());
    let b_then_a = by_category.and(by_priority);

    let left: Vec<&str> = a_then_b.filter(&envelopes).iter().map(|e| e.id.as_str()).collect();
    let right: Vec<&str> = b_then_a.filter(&envelopes).iter().map(|e| e.id.as_str()).collect();
    assert_eq!(left, right);
    assert_eq!(left.len(), 1);
}

#[test]
fn filter_by_requires_ack_and_tags() {
    let envelopes = sample_envelopes();
    let ack_only = MessageFilter::new().requires_ack(true).filter(&envelopes);
    assert_eq!(ack_only.len(), 1);
    assert_eq!(ack_only[0].category(), Category::Health);

    let tagged = MessageFilter::new().with_tags(["team-a".to_string()]).filter(&envelopes);
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].category(), Category::Recovery);

    let source = MessageFilter::new().with_source_type("daemon").filter(&envelopes);
    assert_eq!(source.len(), envelopes.len());
}
