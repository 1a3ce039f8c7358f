// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `msgd` binary as a subprocess and exercises it over its
//! Unix socket using the crate's own [`msgd::client::DaemonClient`].

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use msgd::client::DaemonClient;

/// Resolve the path to the compiled `msgd` binary.
pub fn msgd_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("msgd")
}

/// A running `msgd` process that is killed on drop, with its own isolated
/// socket, store directory, pid file, and log file under a temp dir.
pub struct MsgdProcess {
    child: Child,
    socket_path: PathBuf,
    store_dir: PathBuf,
    _dir: tempfile::TempDir,
}

/// Builder for configuring the `msgd` process before spawning it.
pub struct MsgdBuilder {
    extra_args: Vec<String>,
}

impl Default for MsgdBuilder {
    fn default() -> Self {
        Self { extra_args: Vec::new() }
    }
}

impl MsgdBuilder {
    /// Append a raw CLI flag and value pair (e.g. `"--idle-threshold-s", "5"`).
    pub fn arg(mut self, flag: &str, value: &str) -> Self {
        self.extra_args.push(flag.to_string());
        self.extra_args.push(value.to_string());
        self
    }

    /// Spawn `msgd` with the configured flags, on a fresh isolated temp dir.
    pub fn spawn(self) -> anyhow::Result<MsgdProcess> {
        let binary = msgd_binary();
        anyhow::ensure!(binary.exists(), "msgd binary not found at {}", binary.display());

        let dir = tempfile::tempdir()?;
        let socket_path = dir.path().join("msgd.sock");
        let store_dir = dir.path().join("store");
        let pid_file = dir.path().join("msgd.pid");
        let log_file = dir.path().join("msgd.log");

        let mut args: Vec<String> = vec![
            "--socket".into(),
            socket_path.to_string_lossy().into_owned(),
            "--store-dir".into(),
            store_dir.to_string_lossy().into_owned(),
            "--pid-file".into(),
            pid_file.to_string_lossy().into_owned(),
            "--log-file".into(),
            log_file.to_string_lossy().into_owned(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        args.extend(self.extra_args);

        let child = Command::new(&binary).args(&args).stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;

        Ok(MsgdProcess { child, socket_path, store_dir, _dir: dir })
    }
}

impl MsgdProcess {
    /// Create a builder for custom flags.
    pub fn build() -> MsgdBuilder {
        MsgdBuilder::default()
    }

    /// Spawn `msgd` with default flags.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// The per-target envelope log directory (`<store_dir>/messages/`).
    pub fn messages_dir(&self) -> PathBuf {
        self.store_dir.join("messages")
    }

    /// A client bound to this process's socket.
    pub fn client(&self) -> DaemonClient {
        DaemonClient::new(self.socket_path.clone(), Duration::from_secs(2))
    }

    /// Poll for the socket file to appear, then confirm `status` responds.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("msgd did not become ready within {timeout:?}");
            }
            if self.socket_path.exists() && self.client().status().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("msgd did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Send SIGTERM for a graceful shutdown test.
    pub fn terminate(&self) -> anyhow::Result<()> {
        let status = Command::new("kill").arg("-TERM").arg(self.child.id().to_string()).status()?;
        anyhow::ensure!(status.success(), "kill -TERM failed");
        Ok(())
    }
}

impl Drop for MsgdProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
