//! Ties every component together: the shared registries, the lifecycle
//! supervisor, and the `Host` the daemon fronts. Generic over `Host` rather
//! than `Arc<dyn Host>` since `Host`'s async methods are native
//! return-position-`impl Trait`, which is not object-safe; the corpus this
//! crate was grown from never reaches for `async-trait` either, so a single
//! concrete `H` monomorphized at `main` is the idiomatic fit.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::{
    cfg::config::Config,
    host::Host,
    lifecycle::LifecycleSupervisor,
    persist::waiters::{CancelTable, WaiterTable},
    registry::HandlerRegistry,
    wire::{CallId, Endpoint, PersistentResponse, Proto},
};

/// Identifies one live connection (persistent or not) for the lifetime of
/// the process. Never reused.
pub type ConnId = u64;

/// Everything the Request Dispatcher and Persistent-Connection Engine need
/// to share across connections.
pub struct Daemon<H: Host> {
    pub host: Arc<H>,
    pub cfg: Arc<Config>,
    /// `proto -> Endpoint` for inbound peer streams, owned by the
    /// connection that registered them via `StreamHandler`.
    pub stream_handlers: HandlerRegistry<Endpoint, ConnId>,
    /// `proto -> handler connection id` for persistent unary calls.
    pub unary_handlers: HandlerRegistry<ConnId, ConnId>,
    /// Outbound frame queues for every connection currently upgraded to the
    /// persistent-connection protocol, used to push `RequestHandling`/
    /// `Cancel` frames to a specific handler connection.
    pub persistent_conns: DashMap<ConnId, mpsc::UnboundedSender<PersistentResponse>>,
    pub waiters: WaiterTable,
    pub cancels: CancelTable,
    /// `CallId -> handler ConnId` for every inbound unary call currently
    /// forwarded to a client and awaiting its `UnaryResponse`, so that
    /// connection's disconnect can resolve the waiter with a `Cancel`
    /// instead of leaving it (and the peer stream behind it) pending
    /// forever.
    pub pending_calls: DashMap<CallId, ConnId>,
    pub lifecycle: LifecycleSupervisor,
    next_conn_id: AtomicU64,
}

impl<H: Host> Daemon<H> {
    pub fn new(host: Arc<H>, cfg: Config) -> Arc<Self> {
        let idle_timeout = cfg.lifecycle.kill_after_no_persistent();
        Arc::new(Self {
            host,
            cfg: Arc::new(cfg),
            stream_handlers: HandlerRegistry::new(),
            unary_handlers: HandlerRegistry::new(),
            persistent_conns: DashMap::new(),
            waiters: WaiterTable::new(),
            cancels: CancelTable::new(),
            pending_calls: DashMap::new(),
            lifecycle: LifecycleSupervisor::new(idle_timeout),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Tears down everything owned by `conn_id`: any `StreamHandler`
    /// registrations, any persistent unary handler registrations, its
    /// outbound frame queue, and any inbound unary call it was still
    /// expected to answer. Unregisters from `Host` for every protocol that
    /// became empty as a result, in the order `revoke_owner` reports.
    pub async fn revoke_connection(&self, conn_id: ConnId) {
        for proto in self.stream_handlers.revoke_owner(&conn_id) {
            self.stream_handlers.forget(&proto);
            self.host.remove_stream_handler(&proto);
        }
        for proto in self.unary_handlers.revoke_owner(&conn_id) {
            self.unary_handlers.forget(&proto);
            self.host.remove_stream_handler(&proto);
        }

        let stranded: Vec<CallId> = self
            .pending_calls
            .iter()
            .filter(|e| *e.value() == conn_id)
            .map(|e| *e.key())
            .collect();
        for call_id in stranded {
            self.pending_calls.remove(&call_id);
            self.waiters.resolve(call_id, PersistentResponse::Cancel { call_id });
        }

        self.persistent_conns.remove(&conn_id);
    }

    /// Picks a handler connection id for `proto` and pushes `frame` onto its
    /// outbound queue. Returns the chosen connection id, or `None` if no
    /// handler is registered or the chosen handler's queue has already gone
    /// away.
    pub fn route_to_handler(&self, proto: &Proto, frame: PersistentResponse) -> Option<ConnId> {
        let handler = self.unary_handlers.pick(proto)?;
        let sender = self.persistent_conns.get(&handler)?;
        sender.send(frame).ok()?;
        Some(handler)
    }
}
