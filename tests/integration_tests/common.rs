// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use p2p_ctl_daemon::{
    accept,
    cfg::{
        config::{Config, FrameConfig, LifecycleConfig, RequestsConfig},
        logger::{LogConfig, Output},
    },
    codec::{self, DEFAULT_MAX_FRAME_BYTES},
    daemon::Daemon,
    host::fake::{FakeHost, FakeNetwork},
    wire::{Request, Response},
};
use tokio::net::{UnixListener, UnixStream};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A filesystem path under the OS temp dir guaranteed unique within this
/// test binary's run, used for control and stream-handler sockets alike.
pub fn unique_socket_path(label: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("p2p-ctl-test-{}-{label}-{n}.sock", std::process::id()))
}

fn test_logger_config() -> LogConfig {
    LogConfig {
        level: "error".to_string(),
        output: Output::Stderr,
        is_show_line: false,
        is_show_module_path: false,
        is_show_target: false,
        file: None,
    }
}

pub fn test_config(listen: String) -> Config {
    Config {
        listen,
        frame: FrameConfig::default(),
        requests: RequestsConfig { default_timeout_secs: 5 },
        lifecycle: LifecycleConfig::default(),
        dht_enabled: true,
        pubsub_enabled: true,
        logger: test_logger_config(),
    }
}

/// One running daemon, fronting its own `FakeHost` on `network`, listening
/// on a unique unix socket. Dropping this stops nothing by itself; tests
/// that care about shutdown cancel `daemon.lifecycle.shutdown` directly.
pub struct RunningDaemon {
    pub daemon: Arc<Daemon<FakeHost>>,
    pub socket: PathBuf,
    _accept_task: tokio::task::JoinHandle<()>,
}

/// Spawns a daemon on a fresh `FakeNetwork`, for tests that only need one.
pub async fn spawn_daemon() -> RunningDaemon {
    let network = FakeNetwork::new();
    spawn_daemon_on(&network).await
}

/// Spawns another daemon sharing `network` with any previously spawned
/// daemon, so their `FakeHost`s can see and dial each other by peer id.
pub async fn spawn_daemon_on(network: &Arc<FakeNetwork>) -> RunningDaemon {
    let socket = unique_socket_path("ctl");
    let host = network.spawn_host(format!("unix://{}", socket.display()));
    let cfg = test_config(format!("unix://{}", socket.display()));
    let daemon = Daemon::new(host, cfg);

    let accept_daemon = daemon.clone();
    let accept_task = tokio::spawn(async move {
        let _ = accept::run(accept_daemon).await;
    });

    wait_for_socket(&socket).await;
    RunningDaemon { daemon, socket, _accept_task: accept_task }
}

async fn wait_for_socket(path: &PathBuf) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon never bound {path:?}");
}

pub async fn connect_control(socket: &PathBuf) -> Result<UnixStream> {
    Ok(UnixStream::connect(socket).await?)
}

/// One non-persistent request/response round trip.
pub async fn roundtrip(stream: &mut UnixStream, req: &Request) -> Result<Response> {
    codec::write_frame(stream, req, DEFAULT_MAX_FRAME_BYTES).await?;
    Ok(codec::read_frame(stream, DEFAULT_MAX_FRAME_BYTES).await?)
}

/// Upgrades `stream` to the persistent-connection protocol, consuming its
/// ack frame.
pub async fn upgrade_to_persistent(stream: &mut UnixStream) -> Result<()> {
    let resp = roundtrip(stream, &Request::PersistentConnUpgrade).await?;
    assert!(matches!(resp, Response::PersistentConnUpgradeAck));
    Ok(())
}

/// A bare unix-socket endpoint that records every preamble frame and the
/// raw bytes that follow it on each accepted connection, mimicking what a
/// real `StreamHandler` endpoint process would observe.
pub struct RecordingEndpoint {
    pub path: PathBuf,
    receiver: tokio::sync::mpsc::UnboundedReceiver<RecordedStream>,
    _task: tokio::task::JoinHandle<()>,
}

pub struct RecordedStream {
    pub preamble: p2p_ctl_daemon::forward::StreamPreamble,
    pub payload: Vec<u8>,
}

impl RecordingEndpoint {
    pub async fn bind(label: &str) -> Self {
        let path = unique_socket_path(label);
        let listener = UnixListener::bind(&path).expect("bind recording endpoint");
        let (tx, receiver) = tokio::sync::mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut conn, _)) = listener.accept().await else { return };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let preamble: p2p_ctl_daemon::forward::StreamPreamble =
                        match codec::read_frame(&mut conn, DEFAULT_MAX_FRAME_BYTES).await {
                            Ok(p) => p,
                            Err(_) => return,
                        };
                    let mut payload = Vec::new();
                    use tokio::io::AsyncReadExt;
                    let _ = conn.read_to_end(&mut payload).await;
                    let _ = tx.send(RecordedStream { preamble, payload });
                });
            }
        });
        Self { path, receiver, _task: task }
    }

    pub async fn next(&mut self, timeout: Duration) -> Option<RecordedStream> {
        tokio::time::timeout(timeout, self.receiver.recv()).await.ok().flatten()
    }
}
