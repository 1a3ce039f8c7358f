// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::daemon::Daemon;
use crate::model::{Priority, Target};
use crate::pool::ConnectionPool;
use crate::store::MessageStore;
use crate::terminal::fake::FakeTerminal;
use crate::terminal::WindowMeta;

async fn spawn_test_daemon(socket_path: &Path) -> (Arc<Daemon<FakeTerminal>>, CancellationToken) {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::new(dir.path());
    let pool = ConnectionPool::new(1, 2, FakeTerminal::new);
    let probe = pool.acquire(Duration::from_millis(50)).await.unwrap();
    let fake: &FakeTerminal = &probe;
    fake.add_session("demo", vec![WindowMeta { index: 0, name: "pm".to_string() }]);
    drop(probe);

    let shutdown = CancellationToken::new();
    let daemon = Arc::new(Daemon::new(socket_path, store, pool, Duration::from_millis(200), Duration::from_millis(50), shutdown.clone()));
    let listener = Arc::clone(&daemon);
    tokio::spawn(async move {
        let _ = listener.run_socket_listener().await;
    });
    // Give the listener a moment to bind before the first client call.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (daemon, shutdown)
}

#[tokio::test]
async fn status_round_trips_over_the_socket() {
    let socket_path = std::env::temp_dir().join(format!("msgd-client-test-{}.sock", uuid::Uuid::new_v4()));
    let (_daemon, shutdown) = spawn_test_daemon(&socket_path).await;
    let client = DaemonClient::new(socket_path.clone(), Duration::from_millis(500));

    let status = client.status().await.unwrap();
    assert_eq!(status["status"], "running");

    shutdown.cancel();
}

#[tokio::test]
async fn publish_then_read_round_trips() {
    let socket_path = std::env::temp_dir().join(format!("msgd-client-test-{}.sock", uuid::Uuid::new_v4()));
    let (_daemon, shutdown) = spawn_test_daemon(&socket_path).await;
    let client = DaemonClient::new(socket_path.clone(), Duration::from_millis(500));
    let target = Target::new("demo", 0).unwrap();

    let response = client.publish(&target, "subject", "hello there", Priority::Normal, vec![]).await.unwrap();
    assert_eq!(response["status"], "queued");

    shutdown.cancel();
}

#[tokio::test]
async fn unreachable_socket_surfaces_daemon_unreachable() {
    let client = DaemonClient::new("/tmp/msgd-client-test-does-not-exist.sock", Duration::from_millis(100));
    let err = client.status().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DaemonUnreachable);
}
