//! Response Waiter Table and Cancellation Table for the Persistent-Connection
//! Engine, generalizing the teacher's `ClientConnection::sending`/`reciver`
//! DashMaps (ITT-keyed one-shot correlation) to `CallId`-keyed correlation
//! shared by every call in flight on every upgraded connection.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::wire::{CallId, PersistentResponse};

/// Tracks outstanding `CallUnary` calls awaiting a `CallUnaryResponse` or
/// `DaemonError`. One entry per in-flight call, regardless of which
/// connection issued it.
#[derive(Default)]
pub struct WaiterTable {
    waiters: DashMap<CallId, tokio::sync::oneshot::Sender<PersistentResponse>>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `call_id` and returns the receiving half of its answer
    /// channel. Fails if `call_id` is already registered, which would
    /// indicate a colliding or reused id.
    pub fn register(
        &self,
        call_id: CallId,
    ) -> Result<tokio::sync::oneshot::Receiver<PersistentResponse>, ()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        match self.waiters.entry(call_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(rx)
            },
        }
    }

    /// Delivers `response` to the waiter for its `call_id`, if still
    /// registered. Returns false if there was nobody waiting (the call
    /// already timed out, was cancelled, or `call_id` is unknown).
    pub fn resolve(&self, call_id: CallId, response: PersistentResponse) -> bool {
        match self.waiters.remove(&call_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drops the waiter for `call_id` without resolving it, used when the
    /// caller gives up (timeout or explicit cancel) before an answer
    /// arrives.
    pub fn forget(&self, call_id: &CallId) {
        self.waiters.remove(call_id);
    }

    /// Count of calls currently awaiting an answer. Used by callers that
    /// need to observe the table draining back to empty, e.g. after a
    /// cancellation.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Tracks cancellation tokens for inbound `RequestHandling` calls a local
/// handler is currently working on, so a `Cancel` for that `call_id` can
/// reach the task actually processing it.
#[derive(Default)]
pub struct CancelTable {
    tokens: DashMap<CallId, CancellationToken>,
}

impl CancelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, call_id: CallId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(call_id, token.clone());
        token
    }

    pub fn cancel(&self, call_id: &CallId) -> bool {
        match self.tokens.get(call_id) {
            Some(token) => {
                token.cancel();
                true
            },
            None => false,
        }
    }

    pub fn forget(&self, call_id: &CallId) {
        self.tokens.remove(call_id);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}
