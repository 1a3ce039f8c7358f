// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use msgd::client::DaemonClient;
use msgd::config::{ClientAction, Command, Config};
use msgd::model::Target;
use msgd::run;
use msgd::supervisor;
use msgd::terminal::tmux::TmuxTerminal;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    let result = match config.command() {
        Command::Daemon => run_daemon(&config, /* socket_and_monitor = */ true).await,
        Command::Monitor => run_daemon(&config, /* socket_and_monitor = */ false).await,
        Command::Client { action } => run_client(&config, action).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Run the daemon, either in full (`daemon`: socket listener + delivery loop
/// + cache sweepers + monitor cycle) or monitor-only mode (`monitor`: just
/// the monitor cycle against the shared cache/pool wiring, spec §1 `[ADDED]`).
async fn run_daemon(config: &Config, full: bool) -> anyhow::Result<()> {
    run::init_tracing(config);

    if let Some(pid) = supervisor::read_live_pid(&config.pid_file) {
        error!(pid, path = %config.pid_file.display(), "msgd already running, refusing to start a second daemon against the same pid file");
        std::process::exit(1);
    }

    if let Err(e) = run::write_pid_file(&config.pid_file) {
        warn!(error = %e, path = %config.pid_file.display(), "failed to write pid file");
    }

    let terminal = Arc::new(TmuxTerminal::new().with_call_budget(Duration::from_millis(config.adapter_timeout_ms)));
    let system = run::build(config, terminal);
    let shutdown = system.shutdown_token();

    info!(socket = %config.socket.display(), full, "msgd starting");

    tokio::spawn(wait_for_shutdown_signal(shutdown));

    let result = if full {
        system.run().await
    } else {
        system.run_monitor_only().await;
        Ok(())
    };
    let _ = std::fs::remove_file(&config.pid_file);

    match &result {
        Ok(()) => info!("msgd stopped"),
        Err(e) => error!("msgd exited with error: {e:#}"),
    }
    result
}

/// Drive a single request against a running daemon and print its JSON
/// response (spec §1 `[ADDED]` `client` mode, spec §4.E request shapes).
async fn run_client(config: &Config, action: ClientAction) -> anyhow::Result<()> {
    let client = DaemonClient::new(config.socket.clone(), Duration::from_millis(config.adapter_timeout_ms));

    let response = match action {
        ClientAction::Publish { target, subject, content, priority, tags } => {
            let target: Target = target.parse()?;
            client.publish(&target, &subject, &content, priority, tags).await?
        }
        ClientAction::Read { target, lines } => {
            let target: Target = target.parse()?;
            client.read(&target, lines).await?
        }
        ClientAction::Status => client.status().await?,
        ClientAction::Stats => client.stats().await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM (spec §5: "a shutdown signal
/// cancels accepting new connections, drains the queue for a bounded
/// grace, then aborts remaining deliveries").
async fn wait_for_shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
    shutdown.cancel();
}
