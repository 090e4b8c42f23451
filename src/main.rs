//! Thin process entry point: load config, init logging, wire up a `Host`
//! and run the control-socket Acceptor until a shutdown signal or the
//! lifecycle supervisor's idle timer fires.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use p2p_ctl_daemon::{
    accept,
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    daemon::Daemon,
    host::fake::FakeNetwork,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = resolve_config_path("config.daemon.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let _logger_guard = init_logger(&cfg.logger)?;

    // The real peer-to-peer stack (identity, transports, DHT, pub-sub) is an
    // external collaborator; this binary fronts the bundled in-memory fake
    // so the control-plane multiplexer has a concrete `Host` to dispatch
    // against. A production deployment substitutes its own `Host` at this
    // one call site.
    let network = FakeNetwork::new();
    let host = network.spawn_host(cfg.listen.clone());
    info!(peer = ?host.id(), "daemon identity");

    let daemon = Daemon::new(host, cfg);
    let shutdown = daemon.lifecycle.shutdown.clone();

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        shutdown.cancel();
    });

    accept::run(daemon).await
}
