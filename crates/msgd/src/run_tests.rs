// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tempfile::TempDir;

use crate::client::DaemonClient;
use crate::config::Config;
use crate::model::{Priority, Target};
use crate::terminal::fake::FakeTerminal;
use crate::terminal::{Key, WindowMeta};

fn test_config(dir: &TempDir) -> Config {
    let socket = dir.path().join("msgd.sock");
    let store = dir.path().join("store");
    Config::parse_from([
        "msgd",
        "--socket",
        socket.to_str().unwrap(),
        "--store-dir",
        store.to_str().unwrap(),
        "--pid-file",
        dir.path().join("msgd.pid").to_str().unwrap(),
        "--log-file",
        dir.path().join("msgd.log").to_str().unwrap(),
        "--monitor-interval-s",
        "3600",
    ])
}

/// End-to-end happy publish (spec §8 scenario 1): publish through the real
/// socket, observe the delivery interlock on the fake terminal, and confirm
/// the envelope landed in the store.
#[tokio::test]
async fn happy_publish_delivers_and_persists() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let terminal = Arc::new(FakeTerminal::new());
    terminal.add_session("dev", vec![WindowMeta { index: 0, name: "pm".into() }, WindowMeta { index: 2, name: "worker".into() }]);
    let target = Target::new("dev", 2).unwrap();

    let system = crate::run::build(&config, terminal.clone());
    let shutdown = system.shutdown_token();
    let handle = tokio::spawn(system.clone().run());

    wait_for_socket(&config.socket).await;

    let client = DaemonClient::new(config.socket.clone(), Duration::from_secs(2));
    let response = client.publish(&target, "greeting", "hello", Priority::Normal, vec![]).await.unwrap();
    assert_eq!(response["status"], "queued");
    assert!(!response["message_id"].as_str().unwrap().is_empty());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if !terminal.sent_to(&target).is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "delivery did not happen in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let sent = terminal.sent_to(&target);
    assert_eq!(sent, vec!["📨 hello".to_string()]);
    assert_eq!(terminal.keys_pressed(&target), vec![Key::CtrlU, Key::Enter]);

    let stored = system.daemon.read_content(&target, 50).await;
    assert!(stored.is_ok());

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(3), handle).await;
}

/// `status`/`stats` respond over the socket and reflect the processed count
/// (spec §4.E, §8: `messages_processed` is monotonically non-decreasing).
#[tokio::test]
async fn status_and_stats_reflect_processed_deliveries() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let terminal = Arc::new(FakeTerminal::new());
    terminal.add_session("dev", vec![WindowMeta { index: 0, name: "pm".into() }, WindowMeta { index: 1, name: "worker".into() }]);
    let target = Target::new("dev", 1).unwrap();

    let system = crate::run::build(&config, terminal);
    let shutdown = system.shutdown_token();
    let handle = tokio::spawn(system.run());
    wait_for_socket(&config.socket).await;

    let client = DaemonClient::new(config.socket.clone(), Duration::from_secs(2));
    client.publish(&target, "s", "one", Priority::Normal, vec![]).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = client.status().await.unwrap();
        if status["messages_processed"].as_u64().unwrap_or(0) >= 1 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "status never reflected the delivery");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = client.stats().await.unwrap();
    assert!(stats["meeting_target"].as_bool().unwrap());

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(3), handle).await;
}

/// `monitor` mode (spec §1 `[ADDED]`) drives the monitor cycle without ever
/// binding the daemon socket.
#[tokio::test]
async fn monitor_only_mode_never_binds_the_socket() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.monitor_interval_s = 0;

    let terminal = Arc::new(FakeTerminal::new());
    terminal.add_session("dev", vec![WindowMeta { index: 0, name: "pm".into() }, WindowMeta { index: 1, name: "worker".into() }]);

    let system = crate::run::build(&config, terminal);
    let shutdown = system.shutdown_token();
    let handle = tokio::spawn(system.clone().run_monitor_only());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!config.socket.exists(), "monitor-only mode must not bind the daemon socket");

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

async fn wait_for_socket(path: &std::path::Path) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !path.exists() {
        assert!(tokio::time::Instant::now() < deadline, "daemon socket never appeared");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
