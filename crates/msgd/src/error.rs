// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol-level error taxonomy shared across the daemon's socket commands,
/// the router's retry policy, and the monitoring engine's failure handling.
///
/// Only [`ValidationError`](ErrorCode::Validation)-shaped failures are ever
/// surfaced to a caller over the wire; everything else is a local-recovery
/// condition the owning component absorbs (see spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed target, unknown priority, empty body. Never queued.
    Validation,
    /// The connection pool had no adapter available within the timeout.
    PoolExhausted,
    /// A terminal operation exceeded its per-call deadline.
    TransportTimeout,
    /// A delivery attempt raised; the envelope is considered lost.
    Delivery,
    /// A store write failed; never blocks delivery or the caller's response.
    Persistence,
    /// A store file existed but could not be parsed; treated as empty.
    CorruptStore,
    /// The daemon's Unix socket could not be reached at all.
    DaemonUnreachable,
}

impl ErrorCode {
    /// Whether this error class should ever be surfaced to a socket caller.
    ///
    /// All other classes are absorbed by the owning component and only
    /// logged (§7 policy: "local recovery for cache/pool/store errors;
    /// surface only protocol-level errors to callers").
    pub fn surfaces_to_caller(&self) -> bool {
        matches!(self, Self::Validation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::TransportTimeout => "TRANSPORT_TIMEOUT",
            Self::Delivery => "DELIVERY_ERROR",
            Self::Persistence => "PERSISTENCE_ERROR",
            Self::CorruptStore => "CORRUPT_STORE",
            Self::DaemonUnreachable => "DAEMON_UNREACHABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error carrying both its [`ErrorCode`] class and a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgdError {
    pub code: ErrorCode,
    pub detail: String,
}

impl MsgdError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self { code, detail: detail.into() }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, detail)
    }
}

impl fmt::Display for MsgdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for MsgdError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
