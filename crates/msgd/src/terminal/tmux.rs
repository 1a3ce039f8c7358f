// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The production [`Terminal`] adapter: shells out to the `tmux` binary,
//! following the subprocess-wrapping pattern of the original's
//! `TMUXManager`. Every call is wrapped in a timeout so a hung `tmux`
//! invocation cannot stall the daemon.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::model::Target;

use super::{Key, SessionMeta, Terminal, TerminalError, WindowMeta, DEFAULT_CALL_BUDGET};

/// Adapter that drives a real `tmux` server via `tmux`'s CLI.
pub struct TmuxTerminal {
    tmux_bin: String,
    call_budget: Duration,
}

impl Default for TmuxTerminal {
    fn default() -> Self {
        Self { tmux_bin: "tmux".to_string(), call_budget: DEFAULT_CALL_BUDGET }
    }
}

impl TmuxTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_budget(mut self, budget: Duration) -> Self {
        self.call_budget = budget;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String, TerminalError> {
        let mut command = Command::new(&self.tmux_bin);
        command.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(self.call_budget, command.output())
            .await
            .map_err(|_| TerminalError::Timeout)?
            .map_err(|e| TerminalError::Transport(e.to_string()))?;
        if !output.status.success() {
            return Err(TerminalError::Transport(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn pane_id(target: &Target) -> String {
        format!("{}:{}", target.session(), target.window())
    }

    fn classify_target_error(detail: &str, target: &Target) -> TerminalError {
        if detail.contains("can't find") || detail.contains("session not found") || detail.contains("no such") {
            TerminalError::TargetNotFound(target.clone())
        } else {
            TerminalError::Transport(detail.to_string())
        }
    }
}

#[async_trait]
impl Terminal for TmuxTerminal {
    async fn capture(&self, target: &Target, lines: usize) -> Result<String, TerminalError> {
        let pane = Self::pane_id(target);
        let start = format!("-{lines}");
        self.run(&["capture-pane", "-p", "-t", &pane, "-S", &start])
            .await
            .map_err(|e| match e {
                TerminalError::Transport(detail) => Self::classify_target_error(&detail, target),
                other => other,
            })
    }

    async fn send(&self, target: &Target, text: &str) -> Result<(), TerminalError> {
        let pane = Self::pane_id(target);
        self.run(&["send-keys", "-t", &pane, "-l", text])
            .await
            .map(|_| ())
            .map_err(|e| match e {
                TerminalError::Transport(detail) => Self::classify_target_error(&detail, target),
                other => other,
            })
    }

    async fn press_key(&self, target: &Target, key: Key) -> Result<(), TerminalError> {
        let pane = Self::pane_id(target);
        let key_name = match key {
            Key::Enter => "Enter",
            Key::CtrlU => "C-u",
        };
        self.run(&["send-keys", "-t", &pane, key_name])
            .await
            .map(|_| ())
            .map_err(|e| match e {
                TerminalError::Transport(detail) => Self::classify_target_error(&detail, target),
                other => other,
            })
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, TerminalError> {
        let out = self.run(&["list-sessions", "-F", "#{session_name}"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(|name| SessionMeta { name: name.to_string() }).collect())
    }

    async fn list_windows(&self, session: &str) -> Result<Vec<WindowMeta>, TerminalError> {
        let out = self
            .run(&["list-windows", "-t", session, "-F", "#{window_index} #{window_name}"])
            .await?;
        let mut windows = Vec::new();
        for line in out.lines().filter(|l| !l.is_empty()) {
            if let Some((index, name)) = line.split_once(' ') {
                if let Ok(index) = index.parse::<u32>() {
                    windows.push(WindowMeta { index, name: name.to_string() });
                }
            }
        }
        Ok(windows)
    }
}

#[cfg(test)]
#[path = "tmux_tests.rs"]
mod tests;
