// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level orchestration — wires the Connection Pool, Cache Layer,
//! Message Store, Message Daemon, Priority Router, Recovery Coordinator,
//! and Monitoring Engine into one running system, shared by `main` and
//! integration tests (spec §2 control/data flow).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cache::agent_content::AgentContentCache;
use crate::cache::command::TMuxCommandCache;
use crate::config::Config;
use crate::daemon::Daemon;
use crate::model::Target;
use crate::monitor::MonitoringEngine;
use crate::pool::ConnectionPool;
use crate::recovery::RecoveryCoordinator;
use crate::router::PriorityRouter;
use crate::terminal::Terminal;

/// Every live component of a running system, wired together by [`build`].
///
/// Generic over the terminal adapter so tests can substitute
/// [`crate::terminal::fake::FakeTerminal`] for [`crate::terminal::tmux::TmuxTerminal`].
pub struct System<A: Terminal + 'static> {
    pub daemon: Arc<Daemon<A>>,
    pub monitor: Arc<MonitoringEngine<Arc<Daemon<A>>, A>>,
    pub recovery: Arc<RecoveryCoordinator<Arc<Daemon<A>>, A>>,
    pub content_cache: AgentContentCache,
    pub command_cache: TMuxCommandCache,
    pub pm_window_convention: u32,
    shutdown: CancellationToken,
}

impl<A: Terminal + 'static> System<A> {
    /// The shared shutdown signal; cancel it to drain and stop every task
    /// spawned by [`System::run`] (spec §5 cancellation semantics).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The PM address for `session`, per the configured convention (spec §9
    /// open question — a single fixed value, never inferred per-call).
    pub fn pm_target(&self, session: &str) -> Result<Target, crate::error::MsgdError> {
        Target::new(session, self.pm_window_convention)
    }

    /// Spawn every background task — the socket listener, the delivery
    /// loop, the cache sweepers, and the monitoring cycle — and run until
    /// `shutdown` is cancelled and each task has wound down (spec §5:
    /// "one listener, one delivery worker, one cache sweeper, one cache
    /// refresh worker, one monitor cycle driver").
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let socket = {
            let daemon = Arc::clone(&self.daemon);
            tokio::spawn(async move { daemon.run_socket_listener().await })
        };
        let delivery = {
            let daemon = Arc::clone(&self.daemon);
            tokio::spawn(async move {
                daemon.run_delivery_loop().await;
            })
        };
        let content_sweep = {
            let cache = self.content_cache.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { cache.run_sweeper(Duration::from_secs(30), shutdown).await })
        };
        let command_sweep = {
            let cache = self.command_cache.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { cache.run_sweeper(Duration::from_secs(30), shutdown).await })
        };
        let monitor = {
            let monitor = Arc::clone(&self.monitor);
            tokio::spawn(async move { monitor.run().await })
        };

        let (socket_result, _, _, _, _) = tokio::join!(socket, delivery, content_sweep, command_sweep, monitor);
        socket_result??;
        Ok(())
    }

    /// Run only the monitoring cycle (spec §1 `[ADDED]` `monitor` mode): no
    /// socket listener, no delivery loop, no cache sweepers — just the
    /// content-cache reads and pane classification the monitor itself needs,
    /// until `shutdown` is cancelled.
    pub async fn run_monitor_only(self: Arc<Self>) {
        self.monitor.run().await;
    }
}

/// Build a fully-wired [`System`] from `config`, using `terminal` as the
/// single underlying adapter shared by the pool, the monitoring engine, and
/// the recovery coordinator (spec §4.B: the pool limits concurrency, it
/// doesn't require distinct adapter instances — a stateless adapter like
/// [`crate::terminal::tmux::TmuxTerminal`] may be safely reused).
pub fn build<A: Terminal + Clone + 'static>(config: &Config, terminal: A) -> Arc<System<A>> {
    let shutdown = CancellationToken::new();
    let store = crate::store::MessageStore::new(config.messages_dir());

    let coordinator_terminal = terminal.clone();
    let pool = ConnectionPool::new(config.pool_min, config.pool_max, move || terminal.clone());

    let daemon = Arc::new(Daemon::new(
        config.socket.clone(),
        store,
        pool.clone(),
        Duration::from_millis(config.adapter_timeout_ms),
        Duration::from_secs(config.shutdown_grace_s),
        shutdown.clone(),
    ));

    let content_cache = AgentContentCache::new(
        config.cache_capacity,
        Duration::from_secs(config.content_cache_ttl_s),
        Duration::from_secs(config.content_cache_idle_ttl_s),
        shutdown.clone(),
    );
    let command_cache = TMuxCommandCache::new(config.cache_capacity, Duration::from_secs(config.command_cache_ttl_s), shutdown.clone());

    let router = PriorityRouter::new(Arc::clone(&daemon));
    let recovery = Arc::new(RecoveryCoordinator::with_grace_window(
        router,
        coordinator_terminal,
        config.pm_window_convention,
        config.pm_grace_s,
    ));

    let monitor = Arc::new(MonitoringEngine::new(
        pool,
        content_cache.clone(),
        command_cache.clone(),
        Arc::clone(&recovery),
        config.pm_window_convention,
        Duration::from_secs(config.monitor_interval_s),
        Duration::from_secs(config.idle_threshold_s),
        Duration::from_millis(config.adapter_timeout_ms),
        shutdown.clone(),
    ));

    Arc::new(System {
        daemon,
        monitor,
        recovery,
        content_cache,
        command_cache,
        pm_window_convention: config.pm_window_convention,
        shutdown,
    })
}

/// Initialize tracing/logging from config. Uses `try_init` so it's safe to
/// call more than once (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Write the supervisor's PID file at `path`, creating its parent
/// directory if needed (spec §6 process artefacts).
pub fn write_pid_file(path: &std::path::Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, std::process::id().to_string())
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
