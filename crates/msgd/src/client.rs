// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process client for the daemon's Unix socket (spec §4.E, §6): the
//! one-shot path used by the CLI's `publish`/`read`/`status`/`stats`
//! subcommands, independent of the in-process [`crate::router::PublishTransport`]
//! wiring used by the router when it shares a process with the daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::{ErrorCode, MsgdError};
use crate::model::{Priority, Target};

/// A single request/response round trip is capped at this many bytes
/// (mirrors the daemon's own request cap, spec §6).
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// A thin client over a running daemon's Unix socket. Each call opens a
/// fresh connection, writes one JSON request, and reads the JSON response
/// until the daemon closes its end (spec §4.E: "one request per connection").
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { socket_path: socket_path.into(), timeout }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Publish `content` to `target`. Mirrors the daemon's `publish` command
    /// shape (spec §4.E).
    pub async fn publish(
        &self,
        target: &Target,
        subject: &str,
        content: &str,
        priority: Priority,
        tags: Vec<String>,
    ) -> Result<Value, MsgdError> {
        self.call(json!({
            "command": "publish",
            "target": target.to_string(),
            "subject": subject,
            "content": content,
            "priority": priority.as_str(),
            "tags": tags,
        }))
        .await
    }

    /// Capture `lines` lines of `target`'s pane content via the daemon.
    pub async fn read(&self, target: &Target, lines: usize) -> Result<Value, MsgdError> {
        self.call(json!({"command": "read", "target": target.to_string(), "lines": lines})).await
    }

    pub async fn status(&self) -> Result<Value, MsgdError> {
        self.call(json!({"command": "status"})).await
    }

    pub async fn stats(&self) -> Result<Value, MsgdError> {
        self.call(json!({"command": "stats"})).await
    }

    async fn call(&self, request: Value) -> Result<Value, MsgdError> {
        let connect = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| MsgdError::new(ErrorCode::DaemonUnreachable, "timed out connecting to daemon socket"))?
            .map_err(|e| MsgdError::new(ErrorCode::DaemonUnreachable, format!("failed to connect to daemon socket: {e}")))?;
        let mut stream = connect;

        let body = serde_json::to_vec(&request)
            .map_err(|e| MsgdError::new(ErrorCode::Validation, format!("failed to encode request: {e}")))?;
        tokio::time::timeout(self.timeout, stream.write_all(&body))
            .await
            .map_err(|_| MsgdError::new(ErrorCode::DaemonUnreachable, "timed out writing to daemon socket"))?
            .map_err(|e| MsgdError::new(ErrorCode::DaemonUnreachable, format!("failed to write request: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| MsgdError::new(ErrorCode::DaemonUnreachable, format!("failed to shut down write half: {e}")))?;

        let mut buf = Vec::with_capacity(4096);
        let read_result = tokio::time::timeout(self.timeout, stream.take(MAX_RESPONSE_BYTES as u64).read_to_end(&mut buf)).await;
        match read_result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(MsgdError::new(ErrorCode::DaemonUnreachable, format!("failed to read response: {e}"))),
            Err(_) => return Err(MsgdError::new(ErrorCode::DaemonUnreachable, "timed out reading daemon response")),
        }

        serde_json::from_slice(&buf).map_err(|e| MsgdError::new(ErrorCode::DaemonUnreachable, format!("malformed response: {e}")))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
