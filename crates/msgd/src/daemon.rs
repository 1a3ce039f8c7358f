// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message Daemon (spec §4.E): a Unix-socket server that accepts `publish`/
//! `read`/`status`/`stats` commands, queues deliveries in FIFO order, and
//! drives the 7-step delivery interlock against the terminal multiplexer.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ErrorCode, MsgdError};
use crate::model::{Category, Content, MessageEnvelope, MessageType, Priority, QueuedDelivery, Source, Target};
use crate::pool::ConnectionPool;
use crate::router::{PublishAck, PublishTransport};
use crate::schema::EnvelopeBuilder;
use crate::store::MessageStore;
use crate::terminal::{Key, Terminal, TerminalError};

/// Messages over a single connection are capped at this size (spec §6).
pub const MAX_REQUEST_BYTES: usize = 8 * 1024;
/// Rolling window of delivery durations kept for `status` (spec §4.E).
const DURATIONS_WINDOW: usize = 1000;
/// Window consulted by the `stats` command (spec §4.E).
const STATS_WINDOW: usize = 100;
/// Deliveries slower than this are logged as a warning and count against
/// `meeting_target` (spec §4.E, §8).
const PERFORMANCE_TARGET_MS: u64 = 100;

fn transport_err(e: TerminalError) -> MsgdError {
    match e {
        TerminalError::Timeout => MsgdError::new(ErrorCode::TransportTimeout, e.to_string()),
        other => MsgdError::new(ErrorCode::Delivery, other.to_string()),
    }
}

struct Telemetry {
    started_at: DateTime<Utc>,
    processed: AtomicU64,
    durations: AsyncMutex<VecDeque<u64>>,
}

/// Long-lived message daemon (spec §4.E). Owns the queue, the terminal
/// pool, and the message store exclusively.
pub struct Daemon<A: Terminal> {
    socket_path: PathBuf,
    store: MessageStore,
    pool: ConnectionPool<A>,
    queue: AsyncMutex<VecDeque<QueuedDelivery>>,
    telemetry: Telemetry,
    adapter_timeout: Duration,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
}

impl<A: Terminal + 'static> Daemon<A> {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        store: MessageStore,
        pool: ConnectionPool<A>,
        adapter_timeout: Duration,
        shutdown_grace: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            store,
            pool,
            queue: AsyncMutex::new(VecDeque::new()),
            telemetry: Telemetry { started_at: Utc::now(), processed: AtomicU64::new(0), durations: AsyncMutex::new(VecDeque::new()) },
            adapter_timeout,
            shutdown_grace,
            shutdown,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Enqueue `envelope` for `target`, returning immediately (spec §4.E:
    /// "returns immediately after enqueue").
    pub async fn enqueue(&self, target: Target, envelope: MessageEnvelope) -> Result<PublishAck, MsgdError> {
        let message_id = envelope.id.clone();
        let mut queue = self.queue.lock().await;
        queue.push_back(QueuedDelivery::new(envelope, target));
        Ok(PublishAck { message_id, queue_size: queue.len() })
    }

    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Capture the last `lines` lines of `target`'s pane, for the `read`
    /// command (spec §4.E).
    pub async fn read_content(&self, target: &Target, lines: usize) -> Result<String, MsgdError> {
        let lease = self.pool.acquire(self.adapter_timeout).await?;
        lease.capture(target, lines).await.map_err(transport_err)
    }

    /// Deliver `envelope` immediately, bypassing the queue — the in-process
    /// equivalent of the router's CLI fallback (spec §4.F, §9 ADDED note).
    pub async fn deliver_now(&self, target: &Target, envelope: &MessageEnvelope) -> Result<PublishAck, MsgdError> {
        self.deliver_once(target, envelope).await?;
        self.persist(target.clone(), envelope.clone());
        Ok(PublishAck { message_id: envelope.id.clone(), queue_size: self.queue_size().await })
    }

    /// Run the single-flight delivery loop: dequeue FIFO, deliver, persist
    /// asynchronously. Sleeps 1ms when the queue is empty rather than
    /// busy-waiting (spec §4.E, §5). On shutdown, drains the queue for a
    /// bounded grace period before aborting remaining deliveries.
    pub async fn run_delivery_loop(self: Arc<Self>) {
        let mut drain_deadline: Option<Instant> = None;
        loop {
            if self.shutdown.is_cancelled() && drain_deadline.is_none() {
                drain_deadline = Some(Instant::now() + self.shutdown_grace);
            }
            if let Some(deadline) = drain_deadline {
                if Instant::now() >= deadline {
                    let remaining = self.queue.lock().await.len();
                    if remaining > 0 {
                        warn!(remaining, "shutdown grace elapsed; aborting remaining queued deliveries");
                    }
                    break;
                }
            }

            let next = self.queue.lock().await.pop_front();
            match next {
                Some(item) => self.deliver(item).await,
                None => {
                    if drain_deadline.is_some() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }
    }

    async fn deliver(&self, item: QueuedDelivery) {
        let start = Instant::now();
        let result = self.deliver_once(&item.target, &item.envelope).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        self.telemetry.processed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(elapsed_ms).await;
        if elapsed_ms > PERFORMANCE_TARGET_MS {
            warn!(target = %item.target, elapsed_ms, "slow delivery exceeded 100ms target");
        }

        match result {
            Ok(()) => self.persist(item.target, item.envelope),
            Err(e) => warn!(target = %item.target, error = %e, "delivery failed; envelope considered lost"),
        }
    }

    /// The 7-step delivery interlock (spec §4.E): CtrlU, 50ms, send, 200ms,
    /// Enter. The CtrlC clear observed in the source is intentionally never
    /// reintroduced — it cancels in-flight agent responses under burst load.
    async fn deliver_once(&self, target: &Target, envelope: &MessageEnvelope) -> Result<(), MsgdError> {
        let mut lease = self.pool.acquire(self.adapter_timeout).await?;
        let body = format!("{} {}", envelope.priority().glyph(), envelope.message.content.body);

        let outcome = async {
            lease.press_key(target, Key::CtrlU).await.map_err(transport_err)?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            lease.send(target, &body).await.map_err(transport_err)?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            lease.press_key(target, Key::Enter).await.map_err(transport_err)
        }
        .await;

        if outcome.is_err() {
            lease.discard();
        }
        outcome
    }

    /// Persist the delivered envelope asynchronously; failures never block
    /// delivery or the caller's response (spec §4.E, §7).
    fn persist(&self, target: Target, envelope: MessageEnvelope) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append(&target, envelope).await {
                warn!(target = %target, error = %e, "failed to persist delivered envelope");
            }
        });
    }

    async fn record_duration(&self, elapsed_ms: u64) {
        let mut durations = self.telemetry.durations.lock().await;
        durations.push_back(elapsed_ms);
        while durations.len() > DURATIONS_WINDOW {
            durations.pop_front();
        }
    }

    /// `status` command response (spec §4.E).
    pub async fn status_snapshot(&self) -> Value {
        let durations = self.telemetry.durations.lock().await;
        let avg_ms = if durations.is_empty() { 0.0 } else { durations.iter().sum::<u64>() as f64 / durations.len() as f64 };
        let uptime_seconds = (Utc::now() - self.telemetry.started_at).num_milliseconds() as f64 / 1000.0;
        json!({
            "status": "running",
            "uptime_seconds": uptime_seconds,
            "messages_processed": self.telemetry.processed.load(Ordering::Relaxed),
            "queue_size": self.queue.lock().await.len(),
            "avg_delivery_time_ms": avg_ms,
            "current_performance": if avg_ms < PERFORMANCE_TARGET_MS as f64 { "OK" } else { "DEGRADED" },
        })
    }

    /// `stats` command response: min/avg/p95/max over the last 100
    /// deliveries (spec §4.E, §8).
    pub async fn stats_snapshot(&self) -> Value {
        let durations = self.telemetry.durations.lock().await;
        let window: Vec<u64> = durations.iter().rev().take(STATS_WINDOW).copied().collect();
        if window.is_empty() {
            return json!({
                "min_ms": 0, "avg_ms": 0.0, "p95_ms": 0, "max_ms": 0,
                "target_ms": PERFORMANCE_TARGET_MS, "meeting_target": true,
            });
        }
        let mut sorted = window.clone();
        sorted.sort_unstable();
        let min_ms = sorted[0];
        let max_ms = sorted[sorted.len() - 1];
        let avg_ms = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        let p95_index = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let p95_ms = sorted[p95_index.saturating_sub(1).min(sorted.len() - 1)];
        let meeting_target = sorted.iter().all(|d| *d < PERFORMANCE_TARGET_MS);
        json!({
            "min_ms": min_ms, "avg_ms": avg_ms, "p95_ms": p95_ms, "max_ms": max_ms,
            "target_ms": PERFORMANCE_TARGET_MS, "meeting_target": meeting_target,
        })
    }

    /// Bind the Unix socket (removing any stale file first) and accept
    /// connections until shutdown, one command-and-response per connection
    /// handled on its own task (spec §4.E, §5, §6).
    pub async fn run_socket_listener(self: Arc<Self>) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "daemon listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move { this.handle_connection(stream).await; });
                        }
                        Err(e) => warn!(error = %e, "unix socket accept failed"),
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    async fn handle_connection(&self, mut stream: UnixStream) {
        let mut buf = Vec::with_capacity(4096);
        let (mut reader, mut writer) = stream.split();
        if let Err(e) = reader.take(MAX_REQUEST_BYTES as u64).read_to_end(&mut buf).await {
            warn!(error = %e, "failed to read command");
            return;
        }
        let response = match serde_json::from_slice::<Value>(&buf) {
            Ok(request) => self.handle_command(request).await,
            Err(e) => json!({"status": "error", "message": format!("malformed request: {e}")}),
        };
        if let Ok(body) = serde_json::to_vec(&response) {
            let _ = writer.write_all(&body).await;
        }
    }

    async fn handle_command(&self, request: Value) -> Value {
        let command = request.get("command").and_then(Value::as_str).unwrap_or("");
        match command {
            "publish" => self.handle_publish(request).await,
            "read" => self.handle_read(request).await,
            "status" => self.status_snapshot().await,
            "stats" => self.stats_snapshot().await,
            other => json!({"status": "error", "message": format!("Unknown command: {other}")}),
        }
    }

    async fn handle_publish(&self, request: Value) -> Value {
        #[derive(Deserialize)]
        struct PublishRequest {
            target: String,
            content: String,
            #[serde(default)]
            subject: Option<String>,
            #[serde(default)]
            priority: Option<String>,
            #[serde(default)]
            tags: Vec<String>,
            #[serde(default)]
            sender: Option<String>,
        }

        let parsed: PublishRequest = match serde_json::from_value(request) {
            Ok(p) => p,
            Err(e) => return json!({"status": "error", "message": format!("invalid publish request: {e}")}),
        };

        let target: Target = match parsed.target.parse() {
            Ok(t) => t,
            Err(e) => return json!({"status": "error", "message": format!("{e}")}),
        };
        let priority = match parsed.priority.as_deref() {
            Some(p) => match p.parse::<Priority>() {
                Ok(p) => p,
                Err(e) => return json!({"status": "error", "message": format!("{e}")}),
            },
            None => Priority::Normal,
        };

        let subject = parsed.subject.unwrap_or_default();
        let content = Content::new(subject, parsed.content);
        let source = Source::daemon(parsed.sender.unwrap_or_else(|| "publish".to_string()));
        let envelope = match EnvelopeBuilder::new(source, MessageType::Notification, Category::Task, priority, content).tags(parsed.tags).build() {
            Ok(e) => e,
            Err(e) => return json!({"status": "error", "message": format!("{e}")}),
        };

        match self.enqueue(target, envelope).await {
            Ok(ack) => json!({"status": "queued", "message_id": ack.message_id, "queue_size": ack.queue_size}),
            Err(e) => json!({"status": "error", "message": format!("{e}")}),
        }
    }

    async fn handle_read(&self, request: Value) -> Value {
        #[derive(Deserialize)]
        struct ReadRequest {
            target: String,
            #[serde(default = "default_lines")]
            lines: usize,
        }
        fn default_lines() -> usize {
            50
        }

        let parsed: ReadRequest = match serde_json::from_value(request) {
            Ok(p) => p,
            Err(e) => return json!({"status": "error", "message": format!("invalid read request: {e}")}),
        };
        let target: Target = match parsed.target.parse() {
            Ok(t) => t,
            Err(e) => return json!({"status": "error", "message": format!("{e}")}),
        };

        match self.read_content(&target, parsed.lines).await {
            Ok(content) => json!({"status": "success", "content": content, "timestamp": Utc::now()}),
            Err(e) => json!({"status": "error", "message": format!("{e}")}),
        }
    }
}

/// `PublishTransport` for in-process producers (the Monitoring Engine, the
/// Recovery Coordinator) sharing this process with the daemon: the "socket"
/// path enqueues directly and the "cli" fallback delivers immediately,
/// bypassing the queue (spec §4.F, §9 ADDED note).
#[async_trait]
impl<A: Terminal + 'static> PublishTransport for Arc<Daemon<A>> {
    async fn publish_socket(&self, target: &Target, envelope: &MessageEnvelope) -> Result<PublishAck, MsgdError> {
        self.enqueue(target.clone(), envelope.clone()).await
    }

    async fn publish_cli(&self, target: &Target, envelope: &MessageEnvelope) -> Result<PublishAck, MsgdError> {
        self.deliver_now(target, envelope).await
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
