// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use p2p_ctl_daemon::{accept, cfg::config::LifecycleConfig, daemon::Daemon, host::fake::FakeNetwork};

use crate::integration_tests::common::{connect_control, test_config, unique_socket_path, upgrade_to_persistent};

/// Testable property 6, first half: with no persistent connection ever
/// opened, the daemon shuts itself down exactly once the idle timeout
/// elapses.
#[tokio::test]
async fn idle_timeout_shuts_down_the_daemon_with_no_persistent_connection() -> Result<()> {
    let network = FakeNetwork::new();
    let socket = unique_socket_path("idle");
    let host = network.spawn_host(format!("unix://{}", socket.display()));
    let mut cfg = test_config(format!("unix://{}", socket.display()));
    cfg.lifecycle =
        LifecycleConfig { kill_after_no_persistent_secs: Some(1), quit_on_last_persistent_close: false };
    let daemon = Daemon::new(host, cfg);
    let shutdown = daemon.lifecycle.shutdown.clone();

    let accept_task = tokio::spawn(async move {
        let _ = accept::run(daemon).await;
    });

    tokio::time::timeout(Duration::from_secs(3), shutdown.cancelled())
        .await
        .expect("daemon should shut down once the idle timeout elapses with no persistent connection");

    accept_task.await.expect("accept task should exit cleanly");
    Ok(())
}

/// Testable property 6, second half: a persistent connection opened before
/// the deadline cancels the idle timer, and it never fires while that
/// connection stays open.
#[tokio::test]
async fn a_persistent_connection_before_the_deadline_cancels_the_idle_timer() -> Result<()> {
    let network = FakeNetwork::new();
    let socket = unique_socket_path("idle-cancel");
    let host = network.spawn_host(format!("unix://{}", socket.display()));
    let mut cfg = test_config(format!("unix://{}", socket.display()));
    cfg.lifecycle =
        LifecycleConfig { kill_after_no_persistent_secs: Some(1), quit_on_last_persistent_close: false };
    let daemon = Daemon::new(host, cfg);
    let shutdown = daemon.lifecycle.shutdown.clone();

    let accept_daemon = daemon.clone();
    let accept_task = tokio::spawn(async move {
        let _ = accept::run(accept_daemon).await;
    });

    for _ in 0..200 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut client = connect_control(&socket).await?;
    upgrade_to_persistent(&mut client).await?;

    // Hold the persistent connection open past the original 1s deadline;
    // the daemon must not shut down while it is alive.
    let result = tokio::time::timeout(Duration::from_millis(1500), shutdown.cancelled()).await;
    assert!(result.is_err(), "daemon must not shut down while a persistent connection is open");

    drop(client);
    shutdown.cancel();
    let _ = accept_task.await;
    Ok(())
}
