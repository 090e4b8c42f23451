//! Acceptor: binds the control socket (UNIX-domain or TCP, per
//! `cfg.listen`), accepts connections in a loop, and spawns a Request
//! Dispatcher task per connection. Grounded in the teacher's
//! `ClientConnection::connect`/accept-adjacent plumbing generalized from "one
//! client dials out" to "many clients dial in", and in
//! `original_source/p2pd.go`'s `newDaemon`/listener-accept loop for the
//! listen-address parsing and socket-file cleanup on close.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, UnixListener},
};
use tracing::{debug, info, warn};

use crate::{daemon::Daemon, dispatch, host::Host};

/// A control-socket listen address, parsed from `cfg.listen`.
enum ListenAddr {
    Unix(std::path::PathBuf),
    Tcp(String),
}

fn parse_listen_addr(listen: &str) -> Result<ListenAddr> {
    if let Some(path) = listen.strip_prefix("unix://") {
        Ok(ListenAddr::Unix(std::path::PathBuf::from(path)))
    } else if let Some(addr) = listen.strip_prefix("tcp://") {
        Ok(ListenAddr::Tcp(addr.to_string()))
    } else {
        bail!("unsupported listen address {listen:?}, expected unix:// or tcp://")
    }
}

enum Listener {
    Unix(UnixListener, std::path::PathBuf),
    Tcp(TcpListener),
}

impl Listener {
    async fn bind(addr: ListenAddr) -> Result<Self> {
        match addr {
            ListenAddr::Unix(path) => {
                // A stale socket file from an unclean previous shutdown would
                // otherwise make `bind` fail with `AddrInUse`.
                if path.exists() {
                    let _ = std::fs::remove_file(&path);
                }
                let listener = UnixListener::bind(&path)
                    .with_context(|| format!("binding unix socket {path:?}"))?;
                Ok(Listener::Unix(listener, path))
            },
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(&addr)
                    .await
                    .with_context(|| format!("binding tcp socket {addr}"))?;
                Ok(Listener::Tcp(listener))
            },
        }
    }

    /// Removes the backing socket file, if this listener has one. Called
    /// once on daemon shutdown.
    fn cleanup(&self) {
        if let Listener::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Runs the accept loop until `daemon.lifecycle.shutdown` is cancelled.
/// Every accepted connection starts life in the non-persistent Request
/// Dispatcher; a connection upgrades itself into the Persistent-Connection
/// Engine internally if its client asks for it. Whichever protocol it ends
/// in, `daemon.revoke_connection` runs once the connection's task returns,
/// tearing down every handler it registered.
pub async fn run<H: Host>(daemon: Arc<Daemon<H>>) -> Result<()> {
    let addr = parse_listen_addr(&daemon.cfg.listen)?;
    let listener = Listener::bind(addr).await?;
    info!("listening on {}", daemon.cfg.listen);

    // Drives the idle-timeout deadline: `wait_for_shutdown` cancels
    // `daemon.lifecycle.shutdown` itself once `kill_after_no_persistent_secs`
    // elapses with no live connection, which the select below observes.
    let idle_watcher = daemon.clone();
    tokio::spawn(async move {
        idle_watcher.lifecycle.wait_for_shutdown().await;
    });

    loop {
        tokio::select! {
            _ = daemon.lifecycle.shutdown.cancelled() => {
                info!("acceptor shutting down");
                break;
            },
            accepted = accept_one(&listener) => {
                match accepted {
                    Ok(stream) => spawn_connection(daemon.clone(), stream),
                    Err(e) => {
                        warn!("accept failed: {e}");
                    },
                }
            },
        }
    }

    listener.cleanup();
    daemon.host.close().await;
    Ok(())
}

/// Marker trait combining the bounds a control connection needs, so the
/// dispatcher doesn't care whether it came from a UNIX or TCP listener.
/// Mirrors `host::PeerStream`'s blanket-impl shape.
trait ControlConn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ControlConn for T {}

type BoxedConn = Box<dyn ControlConn>;

async fn accept_one(listener: &Listener) -> Result<BoxedConn> {
    match listener {
        Listener::Unix(l, _) => {
            let (stream, _addr) = l.accept().await.context("accepting unix connection")?;
            Ok(Box::new(stream))
        },
        Listener::Tcp(l) => {
            let (stream, _addr) = l.accept().await.context("accepting tcp connection")?;
            Ok(Box::new(stream))
        },
    }
}

fn spawn_connection<H: Host>(daemon: Arc<Daemon<H>>, stream: BoxedConn) {
    let conn_id = daemon.next_conn_id();
    tokio::spawn(async move {
        if let Err(e) = dispatch::run(daemon.clone(), conn_id, stream).await {
            debug!("connection {conn_id} ended with error: {e}");
        }
        daemon.revoke_connection(conn_id).await;
    });
}
