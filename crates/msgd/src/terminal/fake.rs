// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! An in-memory [`Terminal`] double for tests: sessions/windows/content are
//! seeded directly rather than shelled out to a real multiplexer.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::Target;

use super::{Key, SessionMeta, Terminal, TerminalError, WindowMeta};

#[derive(Debug, Default)]
struct State {
    /// session name -> window index -> window name
    windows: HashMap<String, Vec<WindowMeta>>,
    /// target -> pane content, newest lines last
    content: HashMap<Target, Vec<String>>,
    /// target -> most recently sent text (for assertions)
    sent: HashMap<Target, Vec<String>>,
    /// target -> keys pressed, in order (for assertions)
    keys: HashMap<Target, Vec<Key>>,
}

/// Test double for [`Terminal`]. Cheap to clone via `Arc` at the call site;
/// `FakeTerminal` itself owns its state behind a `Mutex`.
#[derive(Debug, Default)]
pub struct FakeTerminal {
    state: Mutex<State>,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with the given windows (index 0 conventionally the PM).
    pub fn add_session(&self, session: impl Into<String>, windows: Vec<WindowMeta>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.windows.insert(session.into(), windows);
    }

    /// Seed the pane content an agent's window will report on capture.
    pub fn set_content(&self, target: &Target, lines: Vec<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.content.insert(target.clone(), lines);
    }

    pub fn sent_to(&self, target: &Target) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sent.get(target).cloned().unwrap_or_default()
    }

    pub fn keys_pressed(&self, target: &Target) -> Vec<Key> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.keys.get(target).cloned().unwrap_or_default()
    }

    fn window_exists(state: &State, target: &Target) -> bool {
        state
            .windows
            .get(target.session())
            .map(|ws| ws.iter().any(|w| w.index == target.window()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Terminal for FakeTerminal {
    async fn capture(&self, target: &Target, lines: usize) -> Result<String, TerminalError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !Self::window_exists(&state, target) {
            return Err(TerminalError::TargetNotFound(target.clone()));
        }
        let content = state.content.get(target).cloned().unwrap_or_default();
        let tail: Vec<&String> = content.iter().rev().take(lines).collect();
        Ok(tail.into_iter().rev().cloned().collect::<Vec<_>>().join("\n"))
    }

    async fn send(&self, target: &Target, text: &str) -> Result<(), TerminalError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !Self::window_exists(&state, target) {
            return Err(TerminalError::TargetNotFound(target.clone()));
        }
        state.sent.entry(target.clone()).or_default().push(text.to_string());
        Ok(())
    }

    async fn press_key(&self, target: &Target, key: Key) -> Result<(), TerminalError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !Self::window_exists(&state, target) {
            return Err(TerminalError::TargetNotFound(target.clone()));
        }
        state.keys.entry(target.clone()).or_default().push(key);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, TerminalError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.windows.keys().map(|name| SessionMeta { name: name.clone() }).collect())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowMeta>, TerminalError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .windows
            .get(session)
            .cloned()
            .ok_or_else(|| TerminalError::Transport(format!("unknown session '{session}'")))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
