//! Non-persistent request/response tagged unions: everything decoded from a
//! single frame and answered with exactly one frame, except `StreamOpen`
//! (whose success hands the connection over to raw piping) and the `Dht`
//! subtypes that stream zero or more items before their terminal response.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    host::{ConnMgrOp, DhtItem, PeerInfo, PubsubMessage},
    wire::{Endpoint, Proto, WireError, serde_opt_secs},
};

/// DHT request subtypes, mirrored 1:1 onto `Host::dht_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DhtRequest {
    FindPeer {
        peer: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    FindPeersConnected {
        peer: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    FindProviders {
        key: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    GetClosestPeers {
        key: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    GetPublicKey {
        peer: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    GetValue {
        key: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    SearchValue {
        key: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    PutValue {
        key: Vec<u8>,
        value: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    Provide {
        key: Vec<u8>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
}

/// Pub-sub request subtypes, mirrored 1:1 onto `Host::pubsub_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PubsubRequest {
    Topics,
    ListPeers { topic: String },
    Publish { topic: String, data: Vec<u8> },
    Subscribe { topic: String },
}

/// A decoded request frame on the non-persistent path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    Identify,
    Connect {
        peer: Vec<u8>,
        addrs: Vec<String>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    Disconnect { peer: Vec<u8> },
    ListPeers,
    ConnManager(ConnMgrOp),
    /// Opens a stream to `peer` over the first of `protos` the peer accepts,
    /// then switches the connection that carried this request into raw
    /// bidirectional piping for the lifetime of the stream.
    StreamOpen {
        peer: Vec<u8>,
        protos: Vec<Proto>,
        #[serde(default, with = "serde_opt_secs")]
        timeout: Option<Duration>,
    },
    /// Registers `endpoint` as a sink for inbound streams on `proto`.
    /// `balanced = false` keeps the legacy single-endpoint semantics: a
    /// second registration for the same `proto` is rejected outright.
    StreamHandler { proto: Proto, endpoint: Endpoint, balanced: bool },
    RemoveStreamHandler { proto: Proto, endpoint: Endpoint },
    Dht(DhtRequest),
    Pubsub(PubsubRequest),
    /// Upgrades this connection to the persistent-connection engine; every
    /// subsequent frame on it is a `PersistentRequest`/`PersistentResponse`.
    PersistentConnUpgrade,
}

/// A response frame on the non-persistent path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Identify { peer: Vec<u8>, addrs: Vec<String> },
    Connect,
    Disconnect,
    ListPeers { peers: Vec<PeerInfo> },
    ConnManager,
    /// Emitted once, just before the connection drops into raw piping.
    StreamOpenAck { proto: Proto },
    StreamHandler,
    RemoveStreamHandler,
    /// One streamed DHT result item; the terminal frame for a DHT request is
    /// always `DhtEnd`.
    DhtItem(DhtItem),
    DhtEnd,
    PubsubTopics { topics: Vec<String> },
    PubsubListPeers { peers: Vec<Vec<u8>> },
    PubsubPublish,
    /// One streamed pub-sub message; subscriptions do not terminate on their
    /// own, only when the connection closes or the caller disconnects.
    PubsubMessage(PubsubMessage),
    /// Terminal frame for a `SUBSCRIBE` request, once the underlying
    /// subscription ends.
    PubsubEnd,
    PersistentConnUpgradeAck,
    Error { kind: String, message: String },
}

impl From<WireError> for Response {
    fn from(err: WireError) -> Self {
        Response::Error { kind: err.kind().to_string(), message: err.message() }
    }
}
