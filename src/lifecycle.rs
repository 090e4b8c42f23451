//! Lifecycle Supervisor: tracks how many connections are live, arms an
//! idle-shutdown timer once the count drops to zero, and disarms it the
//! moment a new connection arrives. Polls on a short interval the same way
//! the teacher's `ClientConnection::wait_inflight_drained` waits for a
//! DashMap to drain: a `sleep` raced against a `CancellationToken` inside a
//! loop, rather than a single precise wakeup.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `None` disables idle shutdown entirely: the daemon runs until signaled.
pub struct LifecycleSupervisor {
    active: AtomicUsize,
    idle_timeout: Option<Duration>,
    /// Set to the instant the active count reached zero; cleared as soon as
    /// a new connection arrives.
    idle_since: Mutex<Option<Instant>>,
    /// Once armed (by the first persistent connection, when
    /// `lifecycle.quit_on_last_persistent_close` is set), the active count
    /// returning to zero shuts the daemon down immediately instead of
    /// waiting out `idle_timeout`.
    armed: AtomicBool,
    /// Cancelled by the Acceptor (or a signal handler) to request shutdown
    /// regardless of activity.
    pub shutdown: CancellationToken,
}

/// An RAII guard representing one live connection; dropping it decrements
/// the active count.
pub struct ConnectionGuard<'a> {
    supervisor: &'a LifecycleSupervisor,
}

impl LifecycleSupervisor {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        // The deadline starts ticking from process boot, not from the first
        // connection's close: a daemon that never sees a single persistent
        // connection must still honor `kill_after_no_persistent_secs`.
        let idle_since = idle_timeout.map(|_| Instant::now());
        Self {
            active: AtomicUsize::new(0),
            idle_timeout,
            idle_since: Mutex::new(idle_since),
            armed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Idempotently arms drain-on-last-close: every subsequent time the
    /// active count returns to zero, the daemon shuts down immediately
    /// rather than starting the idle timer.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Registers one new live connection, disarming any pending idle
    /// shutdown.
    pub fn connection_opened(&self) -> ConnectionGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        *self.idle_since.lock().expect("lifecycle mutex poisoned") = None;
        ConnectionGuard { supervisor: self }
    }

    fn connection_closed(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            if self.armed.load(Ordering::SeqCst) {
                info!("last persistent connection closed, shutting down");
                self.shutdown.cancel();
            } else {
                info!("last connection closed, arming idle shutdown timer");
                *self.idle_since.lock().expect("lifecycle mutex poisoned") =
                    Some(Instant::now());
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until the daemon should shut down: either an explicit shutdown
    /// signal, or (if configured) the idle timer elapsing with no new
    /// connections arriving to reset it.
    pub async fn wait_for_shutdown(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            if let Some(idle_timeout) = self.idle_timeout {
                let idle_since = *self.idle_since.lock().expect("lifecycle mutex poisoned");
                if let Some(since) = idle_since
                    && since.elapsed() >= idle_timeout
                {
                    info!("idle timeout elapsed with no connections, shutting down");
                    self.shutdown.cancel();
                    return;
                }
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(POLL_INTERVAL) => {},
            }
        }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.connection_closed();
    }
}
