// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::model::Priority;

/// Which of the three entry points (spec §1: "`daemon` ... `monitor` ...
/// `client` ...") this invocation should run. Defaults to [`Command::Daemon`]
/// when omitted, so a bare `msgd` keeps today's combined behavior.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the full daemon: socket listener, delivery loop, cache sweepers,
    /// and monitor cycle, together.
    Daemon,
    /// Run only the monitoring cycle — no socket listener, no delivery loop.
    /// Shares the same cache/store/terminal wiring as `daemon`.
    Monitor,
    /// Send a single request to an already-running daemon over its socket,
    /// print the JSON response, and exit.
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
}

/// One-shot requests supported by `msgd client`, mirroring
/// [`crate::client::DaemonClient`]'s four operations (spec §4.E).
#[derive(Debug, Clone, Subcommand)]
pub enum ClientAction {
    /// Publish a message to a target window.
    Publish {
        /// Target window, e.g. `dev:2`.
        target: String,
        subject: String,
        content: String,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Capture a target window's pane content via the daemon.
    Read {
        target: String,
        #[arg(long, default_value = "50")]
        lines: usize,
    },
    /// Report daemon uptime and liveness.
    Status,
    /// Report daemon throughput counters.
    Stats,
}

/// Daemon, monitor, and client configuration, shared by every `msgd`
/// subcommand (spec §6, §9).
#[derive(Debug, Clone, Parser)]
#[command(name = "msgd", version, about)]
pub struct Config {
    /// Which subcommand to run (spec §1, `[ADDED]`); defaults to `daemon`.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Unix-domain socket path for the message daemon.
    #[arg(long, env = "MSGD_SOCKET", default_value = "/tmp/tmux-orc-msgd.sock")]
    pub socket: PathBuf,

    /// Root directory for durable artefacts (`messages/<session>_<window>.json`).
    #[arg(long, env = "MSGD_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// PID file written by the supervisor on daemon start.
    #[arg(long, env = "MSGD_PID_FILE", default_value = "/tmp/tmux-orc-msgd.pid")]
    pub pid_file: PathBuf,

    /// Log file path used by the supervisor when detaching the daemon.
    #[arg(long, env = "MSGD_LOG_FILE", default_value = "/tmp/tmux-orc-msgd.log")]
    pub log_file: PathBuf,

    /// Minimum number of pooled terminal adapters.
    #[arg(long, env = "MSGD_POOL_MIN", default_value = "5")]
    pub pool_min: usize,

    /// Maximum number of pooled terminal adapters.
    #[arg(long, env = "MSGD_POOL_MAX", default_value = "20")]
    pub pool_max: usize,

    /// Per-call budget for a terminal adapter operation, in milliseconds.
    #[arg(long, env = "MSGD_ADAPTER_TIMEOUT_MS", default_value = "2000")]
    pub adapter_timeout_ms: u64,

    /// Default TTL for agent-pane content cache entries, in seconds.
    #[arg(long, env = "MSGD_CONTENT_CACHE_TTL_S", default_value = "30")]
    pub content_cache_ttl_s: u64,

    /// Extended TTL for agent-pane content cache entries once an agent is idle.
    #[arg(long, env = "MSGD_CONTENT_CACHE_IDLE_TTL_S", default_value = "60")]
    pub content_cache_idle_ttl_s: u64,

    /// TTL for tmux session/window list cache entries, in seconds.
    #[arg(long, env = "MSGD_COMMAND_CACHE_TTL_S", default_value = "60")]
    pub command_cache_ttl_s: u64,

    /// Maximum number of entries held by the cache layer before LRU eviction.
    #[arg(long, env = "MSGD_CACHE_CAPACITY", default_value = "2048")]
    pub cache_capacity: usize,

    /// Interval between monitoring engine cycles, in seconds.
    #[arg(long, env = "MSGD_MONITOR_INTERVAL_S", default_value = "5")]
    pub monitor_interval_s: u64,

    /// Idle threshold before an idle notification is emitted, in seconds.
    #[arg(long, env = "MSGD_IDLE_THRESHOLD_S", default_value = "300")]
    pub idle_threshold_s: u64,

    /// PM grace window after a completed recovery, in seconds.
    #[arg(long, env = "MSGD_PM_GRACE_S", default_value = "180")]
    pub pm_grace_s: i64,

    /// Window index that addresses a session's PM (spec §9 open question;
    /// both the monitor and the recovery coordinator consult this one value).
    #[arg(long, env = "MSGD_PM_WINDOW_CONVENTION", default_value = "0")]
    pub pm_window_convention: u32,

    /// Soft per-command deadline, in seconds.
    #[arg(long, env = "MSGD_COMMAND_DEADLINE_S", default_value = "60")]
    pub command_deadline_s: u64,

    /// Grace period to drain the queue on shutdown, in seconds.
    #[arg(long, env = "MSGD_SHUTDOWN_GRACE_S", default_value = "2")]
    pub shutdown_grace_s: u64,

    /// Log format (json or text).
    #[arg(long, env = "MSGD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MSGD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// The subcommand to run, defaulting to [`Command::Daemon`] when none
    /// was given on the command line.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Daemon)
    }

    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_min == 0 {
            anyhow::bail!("--pool-min must be at least 1");
        }
        if self.pool_max < self.pool_min {
            anyhow::bail!("--pool-max must be >= --pool-min");
        }
        if self.content_cache_idle_ttl_s < self.content_cache_ttl_s {
            anyhow::bail!("--content-cache-idle-ttl-s must be >= --content-cache-ttl-s");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Root directory for durable artefacts, defaulting to `~/.tmux_orchestrator`.
    pub fn resolved_store_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(|| {
            dirs_home().join(".tmux_orchestrator")
        })
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.resolved_store_dir().join("messages")
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
