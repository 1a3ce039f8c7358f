// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-process lifecycle management for the daemon's own PID file (spec
//! §6 process artefacts; SPEC_FULL §4.E "supervisor/process artifacts").
//!
//! This is deliberately *not* the daemon's own shutdown handling (that lives
//! in [`crate::run`] and reacts to SIGINT/SIGTERM from inside the process).
//! This module is the other half: a caller that wants to `start`/`stop`/
//! `restart`/`status` a daemon it did not itself spawn in this call, driven
//! only by the PID file spec §6 says the supervisor writes.

use std::path::Path;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{ErrorCode, MsgdError};

/// How long to wait for a graceful exit after SIGTERM before escalating to
/// SIGKILL (spec §9: "read-and-signal on stop (graceful SIGTERM, wait up to
/// 5s polling every 500ms, then SIGKILL)").
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const GRACEFUL_STOP_POLL: Duration = Duration::from_millis(500);

/// Whether a process with the given PID is alive, by probing with signal 0.
///
/// Grounded on the teacher's `crates/cli/src/driver/process.rs::is_process_alive`.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    signal::kill(Pid::from_raw(pid_i32), None).is_ok()
}

/// Read a PID file and return the PID if it names a still-living process.
///
/// A stale PID file (process no longer alive) is treated the same as no
/// PID file at all, mirroring spec §9's "detect 'already running' by
/// checking both the PID file and whether that PID is alive."
pub fn read_live_pid(pid_path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(pid_path).ok()?;
    let pid: u32 = contents.trim().parse().ok()?;
    is_process_alive(pid).then_some(pid)
}

/// Outcome of a `status` query against a daemon's PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorStatus {
    Running { pid: u32 },
    NotRunning,
}

/// Report whether the daemon named by `pid_path` is currently running.
pub fn status(pid_path: &Path) -> SupervisorStatus {
    match read_live_pid(pid_path) {
        Some(pid) => SupervisorStatus::Running { pid },
        None => SupervisorStatus::NotRunning,
    }
}

/// Stop a running daemon: send SIGTERM, poll for exit every
/// [`GRACEFUL_STOP_POLL`] up to [`GRACEFUL_STOP_TIMEOUT`], then escalate to
/// SIGKILL if it is still alive. Removes the PID file on success.
///
/// Returns `Ok(())` if the daemon was not running at all (stopping a
/// stopped daemon is not an error — idempotent, matching the teacher's own
/// best-effort shutdown style in `crates/cli/src/pty/spawn.rs`).
pub async fn stop(pid_path: &Path) -> Result<(), MsgdError> {
    let Some(pid) = read_live_pid(pid_path) else {
        let _ = std::fs::remove_file(pid_path);
        return Ok(());
    };

    let nix_pid = Pid::from_raw(i32::try_from(pid).map_err(|_| {
        MsgdError::new(ErrorCode::Validation, format!("pid {pid} out of range"))
    })?);

    signal::kill(nix_pid, Signal::SIGTERM)
        .map_err(|e| MsgdError::new(ErrorCode::TransportTimeout, format!("SIGTERM failed: {e}")))?;

    let deadline = tokio::time::Instant::now() + GRACEFUL_STOP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if !is_process_alive(pid) {
            let _ = std::fs::remove_file(pid_path);
            return Ok(());
        }
        tokio::time::sleep(GRACEFUL_STOP_POLL).await;
    }

    tracing::warn!(pid, "daemon did not exit within grace period, sending SIGKILL");
    let _ = signal::kill(nix_pid, Signal::SIGKILL);
    let _ = std::fs::remove_file(pid_path);
    Ok(())
}

/// Restart: `stop` (idempotent if not running) followed by the caller
/// re-launching the daemon process. This module never spawns the daemon
/// itself — that binary-launch concern is out of scope for the core (spec
/// §1: the CLI front-end is an external collaborator) — so `restart` is
/// exposed here only as `stop` plus the PID-file-removed precondition the
/// caller's own re-exec checks before starting a new process.
pub async fn prepare_restart(pid_path: &Path) -> Result<(), MsgdError> {
    stop(pid_path).await
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
