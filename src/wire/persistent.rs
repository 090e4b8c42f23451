//! Request/response tagged unions exchanged on a connection after it has
//! been upgraded via `Request::PersistentConnUpgrade`. Every request here
//! that expects an answer carries a `CallId` chosen by its sender and
//! echoed back on the matching response, since many calls can be in flight
//! concurrently on one connection.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::{CallId, CallOutcome, Proto, WireError, serde_opt_secs};

/// A frame sent on an upgraded connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistentRequest {
    /// Registers this connection as a handler for unary calls on `proto`.
    /// Rejected with `WireError::AlreadySet` if `proto` already has a
    /// handler and `balanced` is false on either registration.
    AddUnaryHandler { proto: Proto, balanced: bool },
    RemoveUnaryHandler { proto: Proto },
    /// Issues a unary call to `peer`, load-balanced across every handler
    /// registered for `proto`.
    CallUnary {
        call_id: CallId,
        peer: Vec<u8>,
        proto: Proto,
        payload: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    /// A handler's answer to a `RequestHandling` it previously received.
    UnaryResponse { call_id: CallId, outcome: CallOutcome },
    /// Cancels an outstanding `CallUnary` (sent by the caller) or tells a
    /// handler to stop working on a `RequestHandling` (sent by the daemon).
    Cancel { call_id: CallId },
}

/// A frame received on an upgraded connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistentResponse {
    AddUnaryHandlerAck,
    RemoveUnaryHandlerAck,
    /// Delivered to a handler connection: a peer's unary call for it to
    /// answer with a matching `UnaryResponse`.
    RequestHandling { call_id: CallId, peer: Vec<u8>, proto: Proto, payload: Vec<u8> },
    /// The answer to a `CallUnary` this connection issued.
    CallUnaryResponse { call_id: CallId, outcome: CallOutcome },
    /// Echoes a `Cancel` back to its sender once applied, or delivered
    /// unprompted when the peer stream behind a `RequestHandling` closed
    /// early.
    Cancel { call_id: CallId },
    DaemonError { call_id: Option<CallId>, kind: String, message: String },
}

/// Wire envelope for a unary call carried on a raw `Host` stream, as distinct
/// from the control-socket framing above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerCallRequest {
    pub call_id: CallId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerCallResponse {
    pub call_id: CallId,
    pub outcome: CallOutcome,
}

impl PersistentResponse {
    pub fn error(call_id: Option<CallId>, err: WireError) -> Self {
        PersistentResponse::DaemonError {
            call_id,
            kind: err.kind().to_string(),
            message: err.message(),
        }
    }
}
