//! Daemon configuration: one YAML file covering the control socket, frame
//! limits, per-request defaults, process lifecycle and logging. Mirrors the
//! iSCSI initiator's own `Config::load_from_file`/`validate_and_normalize`
//! shape, generalized from session/transport parameters to the control
//! daemon's own knobs.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::logger::LogConfig;

fn default_true() -> bool {
    true
}

fn default_max_message_bytes() -> u32 {
    4 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Control socket address: `unix:///path/to/socket` or `tcp://host:port`.
    pub listen: String,
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub requests: RequestsConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default = "default_true")]
    pub dht_enabled: bool,
    #[serde(default = "default_true")]
    pub pubsub_enabled: bool,
    pub logger: LogConfig,
}

/// Frame-level limits shared by both the non-persistent and persistent
/// protocols, enforced by [`crate::codec::read_frame`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameConfig {
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { max_message_bytes: default_max_message_bytes() }
    }
}

/// Default deadline applied to a request whose own `timeout` is absent or
/// zero; see [`RequestsConfig::effective_timeout`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestsConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self { default_timeout_secs: default_request_timeout_secs() }
    }
}

impl RequestsConfig {
    /// A zero or absent per-request timeout means "use the configured
    /// default", not "wait forever" — preserved from legacy clients that
    /// always send a numeric timeout field and rely on zero meaning unset.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(d) if !d.is_zero() => d,
            _ => Duration::from_secs(self.default_timeout_secs),
        }
    }
}

/// Process-lifetime knobs: when (if ever) the daemon shuts itself down with
/// no administrator signal.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Shut down after this many seconds with zero live persistent
    /// connections. `None` (the default) disables idle shutdown; the daemon
    /// then runs until signaled.
    pub kill_after_no_persistent_secs: Option<u64>,
    /// Once the first persistent connection upgrades, shut down as soon as
    /// the count of live persistent connections returns to zero, superseding
    /// `kill_after_no_persistent_secs` for that connection's lifetime.
    #[serde(default)]
    pub quit_on_last_persistent_close: bool,
}

impl LifecycleConfig {
    pub fn kill_after_no_persistent(&self) -> Option<Duration> {
        self.kill_after_no_persistent_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let mut cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {path:?}"))?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.listen.is_empty(), "listen must not be empty");
        ensure!(self.frame.max_message_bytes > 0, "frame.max_message_bytes must be > 0");
        ensure!(
            self.requests.default_timeout_secs > 0,
            "requests.default_timeout_secs must be > 0"
        );
        if let Some(secs) = self.lifecycle.kill_after_no_persistent_secs {
            ensure!(
                secs > 0,
                "lifecycle.kill_after_no_persistent_secs must be > 0 if set"
            );
        }
        Ok(())
    }
}
