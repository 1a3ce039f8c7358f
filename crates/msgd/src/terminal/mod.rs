// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal Capability (spec §4.A): the narrow adapter the rest of the
//! system uses to talk to the terminal-multiplexer runtime, never to it
//! directly.

pub mod fake;
pub mod tmux;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::Target;

/// Default per-call budget for a terminal adapter operation (spec §4.A).
pub const DEFAULT_CALL_BUDGET: Duration = Duration::from_secs(2);

/// A key the adapter can send as a discrete keypress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    CtrlU,
}

/// Session metadata returned by [`Terminal::list_sessions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub name: String,
}

/// Window metadata returned by [`Terminal::list_windows`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMeta {
    pub index: u32,
    pub name: String,
}

/// Terminal adapter failures, distinguishing an unknown target from an
/// underlying transport failure (spec §4.A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    TargetNotFound(Target),
    Transport(String),
    Timeout,
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetNotFound(target) => write!(f, "target not found: {target}"),
            Self::Transport(detail) => write!(f, "transport failure: {detail}"),
            Self::Timeout => write!(f, "terminal operation exceeded its call budget"),
        }
    }
}

impl std::error::Error for TerminalError {}

/// Minimal adapter exposing `capture`/`send`/`press_key`/`list_sessions`/
/// `list_windows` over the multiplexer runtime (spec §4.A).
///
/// Every method may block on external I/O up to a configurable per-call
/// budget; implementors are expected to enforce that budget internally
/// (e.g. via `tokio::time::timeout`) and return [`TerminalError::Timeout`]
/// rather than hanging the caller.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Capture the last `lines` lines of the target's pane content.
    async fn capture(&self, target: &Target, lines: usize) -> Result<String, TerminalError>;

    /// Send literal text to the target's input line.
    async fn send(&self, target: &Target, text: &str) -> Result<(), TerminalError>;

    /// Press a discrete key on the target.
    async fn press_key(&self, target: &Target, key: Key) -> Result<(), TerminalError>;

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, TerminalError>;

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowMeta>, TerminalError>;
}

/// A shared adapter is itself a valid adapter. Lets a single stateless
/// adapter instance (e.g. [`tmux::TmuxTerminal`], which only shells out) be
/// handed to the pool, the monitoring engine, and the recovery coordinator
/// as one cheaply-cloned `Arc`, rather than constructing independent
/// instances for each.
#[async_trait]
impl<T: Terminal + ?Sized> Terminal for std::sync::Arc<T> {
    async fn capture(&self, target: &Target, lines: usize) -> Result<String, TerminalError> {
        (**self).capture(target, lines).await
    }

    async fn send(&self, target: &Target, text: &str) -> Result<(), TerminalError> {
        (**self).send(target, text).await
    }

    async fn press_key(&self, target: &Target, key: Key) -> Result<(), TerminalError> {
        (**self).press_key(target, key).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, TerminalError> {
        (**self).list_sessions().await
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowMeta>, TerminalError> {
        (**self).list_windows(session).await
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
