// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority Router (spec §4.F): a client-side wrapper around the daemon
//! that picks a delivery mode per priority, batches low-priority traffic,
//! and falls back to an in-process CLI-equivalent path on socket failure.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::MsgdError;
use crate::model::{Category, MessageEnvelope, Priority, Source, Target};
use crate::schema::build_batch;

/// Low-priority batches flush once this many messages accumulate for a target.
pub const BATCH_FLUSH_THRESHOLD: usize = 10;
/// Window of recent calls retained for telemetry.
const TELEMETRY_WINDOW: usize = 100;
/// Every delivery of the window must be under this to "meet target" (spec §4.F, §8).
const PERFORMANCE_TARGET_MS: u64 = 100;

/// How a publish was ultimately delivered, for per-call telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    Socket,
    Cli,
}

/// Acknowledgement returned by a transport for a single publish attempt.
#[derive(Debug, Clone)]
pub struct PublishAck {
    pub message_id: String,
    pub queue_size: usize,
}

/// The two paths a router can take to deliver an envelope: straight to the
/// daemon's socket, or an in-process equivalent of the CLI publish command
/// used when the socket is unreachable (spec §4.F, §9).
#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn publish_socket(&self, target: &Target, envelope: &MessageEnvelope) -> Result<PublishAck, MsgdError>;
    async fn publish_cli(&self, target: &Target, envelope: &MessageEnvelope) -> Result<PublishAck, MsgdError>;
}

struct CallRecord {
    method: DeliveryMethod,
    elapsed_ms: u64,
}

/// Router-side telemetry summary (spec §4.F).
#[derive(Debug, Clone)]
pub struct RouterStats {
    pub hit_rate: f64,
    pub min_ms: u64,
    pub avg_ms: f64,
    pub p95_ms: u64,
    pub max_ms: u64,
    pub meeting_target: bool,
    pub cli_fallback_count: u64,
}

fn retry_budget_ms(priority: Priority) -> Option<u64> {
    match priority {
        Priority::Critical => Some(50),
        Priority::High => Some(75),
        _ => None,
    }
}

fn timeout_for(priority: Priority) -> Duration {
    let ms = match priority {
        Priority::Critical => 50,
        Priority::High => 75,
        Priority::Normal => 100,
        Priority::Low => 500,
    };
    Duration::from_millis(ms)
}

/// Client-side priority router (spec §4.F).
pub struct PriorityRouter<T: PublishTransport> {
    transport: T,
    batches: Mutex<HashMap<Target, Vec<MessageEnvelope>>>,
    telemetry: Mutex<VecDeque<CallRecord>>,
    cli_fallback_count: Mutex<u64>,
}

impl<T: PublishTransport> PriorityRouter<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            batches: Mutex::new(HashMap::new()),
            telemetry: Mutex::new(VecDeque::new()),
            cli_fallback_count: Mutex::new(0),
        }
    }

    /// Route `envelope` to `target` per its priority's policy.
    pub async fn route(&self, target: &Target, envelope: MessageEnvelope) -> Result<PublishAck, MsgdError> {
        match envelope.priority() {
            Priority::Low => self.enqueue_for_batch(target, envelope).await,
            priority => self.deliver_direct(target, envelope, priority).await,
        }
    }

    async fn deliver_direct(&self, target: &Target, envelope: MessageEnvelope, priority: Priority) -> Result<PublishAck, MsgdError> {
        let timeout = timeout_for(priority);
        let (ack, elapsed_ms) = self.attempt(target, &envelope, timeout).await?;

        if let Some(budget) = retry_budget_ms(priority) {
            if elapsed_ms < budget {
                // First attempt was fast enough to afford exactly one retry
                // (spec §4.F: "retry once, if first attempt < budget").
                if let Ok((retried, retried_ms)) = self.attempt(target, &envelope, timeout).await {
                    self.record(DeliveryMethod::Socket, retried_ms);
                    return Ok(retried);
                }
            }
        }

        self.record(DeliveryMethod::Socket, elapsed_ms);
        Ok(ack)
    }

    async fn attempt(&self, target: &Target, envelope: &MessageEnvelope, timeout: Duration) -> Result<(PublishAck, u64), MsgdError> {
        let start = std::time::Instant::now();
        match tokio::time::timeout(timeout, self.transport.publish_socket(target, envelope)).await {
            Ok(Ok(ack)) => Ok((ack, start.elapsed().as_millis() as u64)),
            Ok(Err(_)) | Err(_) => {
                warn!(target = %target, "daemon socket unreachable; falling back to CLI path");
                let ack = self.transport.publish_cli(target, envelope).await?;
                let elapsed_ms = start.elapsed().as_millis() as u64;
                *self.cli_fallback_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
                self.record(DeliveryMethod::Cli, elapsed_ms);
                Ok((ack, elapsed_ms))
            }
        }
    }

    async fn enqueue_for_batch(&self, target: &Target, envelope: MessageEnvelope) -> Result<PublishAck, MsgdError> {
        let should_flush = {
            let mut batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
            let pending = batches.entry(target.clone()).or_default();
            pending.push(envelope);
            pending.len() >= BATCH_FLUSH_THRESHOLD
        };
        if should_flush {
            if let Some(ack) = self.flush_target(target).await? {
                return Ok(ack);
            }
        }
        Ok(PublishAck { message_id: String::new(), queue_size: self.batches.lock().unwrap_or_else(|e| e.into_inner()).len() })
    }

    /// Flush every target's pending low-priority batch explicitly.
    pub async fn flush_all(&self) -> Result<Vec<PublishAck>, MsgdError> {
        let targets: Vec<Target> = self.batches.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        let mut acks = Vec::new();
        for target in targets {
            if let Some(ack) = self.flush_target(&target).await? {
                acks.push(ack);
            }
        }
        Ok(acks)
    }

    async fn flush_target(&self, target: &Target) -> Result<Option<PublishAck>, MsgdError> {
        let pending = {
            let mut batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
            batches.remove(target)
        };
        let Some(pending) = pending else { return Ok(None) };
        if pending.is_empty() {
            return Ok(None);
        }
        let batch = build_batch(Source::daemon("router"), Category::Status, Priority::Low, "batched low-priority messages", pending)?;
        let (ack, elapsed_ms) = self.attempt(target, &batch, timeout_for(Priority::Low)).await?;
        self.record(DeliveryMethod::Socket, elapsed_ms);
        Ok(Some(ack))
    }

    fn record(&self, method: DeliveryMethod, elapsed_ms: u64) {
        let mut telemetry = self.telemetry.lock().unwrap_or_else(|e| e.into_inner());
        telemetry.push_back(CallRecord { method, elapsed_ms });
        while telemetry.len() > TELEMETRY_WINDOW {
            telemetry.pop_front();
        }
    }

    pub fn stats(&self) -> RouterStats {
        let telemetry = self.telemetry.lock().unwrap_or_else(|e| e.into_inner());
        if telemetry.is_empty() {
            return RouterStats {
                hit_rate: 0.0,
                min_ms: 0,
                avg_ms: 0.0,
                p95_ms: 0,
                max_ms: 0,
                meeting_target: true,
                cli_fallback_count: 0,
            };
        }
        let mut durations: Vec<u64> = telemetry.iter().map(|r| r.elapsed_ms).collect();
        durations.sort_unstable();
        let min_ms = durations[0];
        let max_ms = durations[durations.len() - 1];
        let sum: u64 = durations.iter().sum();
        let avg_ms = sum as f64 / durations.len() as f64;
        let p95_index = ((durations.len() as f64) * 0.95).ceil() as usize;
        let p95_ms = durations[p95_index.saturating_sub(1).min(durations.len() - 1)];
        let meeting_target = durations.iter().all(|d| *d < PERFORMANCE_TARGET_MS);
        let socket_hits = telemetry.iter().filter(|r| matches!(r.method, DeliveryMethod::Socket)).count();
        let hit_rate = socket_hits as f64 / telemetry.len() as f64;

        RouterStats {
            hit_rate,
            min_ms,
            avg_ms,
            p95_ms,
            max_ms,
            meeting_target,
            cli_fallback_count: *self.cli_fallback_count.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
