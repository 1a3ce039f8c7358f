// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `msgd` binary and exercise it
//! over its Unix socket, covering the literal end-to-end scenarios.

use std::time::Duration;

use msgd_specs::MsgdProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Scenario 1 (happy publish): publish returns `queued` with a non-empty
/// message id immediately, and the envelope is persisted to the store.
#[tokio::test]
async fn happy_publish_is_queued_and_persisted() -> anyhow::Result<()> {
    let msgd = MsgdProcess::start()?;
    msgd.wait_ready(TIMEOUT).await?;

    let client = msgd.client();
    let target: msgd::model::Target = "dev:2".parse()?;
    let response = client.publish(&target, "greeting", "hello", msgd::model::Priority::Normal, vec![]).await?;

    assert_eq!(response["status"], "queued");
    assert!(response["message_id"].as_str().is_some_and(|s| !s.is_empty()));

    let store_file = msgd.messages_dir().join("dev_2.json");
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if store_file.exists() {
            let contents = tokio::fs::read_to_string(&store_file).await?;
            if contents.contains("\"hello\"") {
                break;
            }
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "envelope never reached the store");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}

/// `status` and `stats` are reachable over the socket and reflect throughput.
#[tokio::test]
async fn status_and_stats_respond() -> anyhow::Result<()> {
    let msgd = MsgdProcess::start()?;
    msgd.wait_ready(TIMEOUT).await?;

    let client = msgd.client();
    let status = client.status().await?;
    assert_eq!(status["status"], "running");
    assert!(status["uptime_seconds"].as_f64().is_some());

    let stats = client.stats().await?;
    assert!(stats["target_ms"].as_u64().is_some());

    Ok(())
}

/// Scenario 5 (store overflow): publishing past the 1000-entry cap drops the
/// oldest entries and keeps exactly 1000.
#[tokio::test]
async fn store_overflow_caps_at_1000() -> anyhow::Result<()> {
    let msgd = MsgdProcess::start()?;
    msgd.wait_ready(TIMEOUT).await?;

    let client = msgd.client();
    let target: msgd::model::Target = "t:0".parse()?;
    let mut last_id = String::new();
    for i in 0..1200 {
        let response = client.publish(&target, "overflow", &format!("msg-{i}"), msgd::model::Priority::Low, vec![]).await?;
        if i == 1199 {
            last_id = response["message_id"].as_str().unwrap_or_default().to_string();
        }
    }

    let store_file = msgd.messages_dir().join("t_0.json");
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let entries = loop {
        if store_file.exists() {
            let contents = tokio::fs::read_to_string(&store_file).await?;
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&contents) {
                if let Some(array) = parsed.as_array() {
                    if array.len() >= 1000 {
                        break array.clone();
                    }
                }
            }
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "store never filled to capacity");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(entries.len(), 1000);
    assert_eq!(entries.last().and_then(|e| e["id"].as_str()), Some(last_id.as_str()));

    Ok(())
}

/// SIGTERM drains the queue within the shutdown grace and exits cleanly.
#[tokio::test]
async fn graceful_shutdown_on_sigterm() -> anyhow::Result<()> {
    let mut msgd = MsgdProcess::start()?;
    msgd.wait_ready(TIMEOUT).await?;

    msgd.terminate()?;
    let status = msgd.wait_exit(TIMEOUT).await?;
    assert!(status.success());

    Ok(())
}
