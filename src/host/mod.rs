//! The `Host` capability interface: the opaque peer-to-peer stack the
//! control daemon multiplexes. This crate implements only the interface and
//! an in-memory fake (see [`fake`]) used by its own test suite; a real
//! transport/identity/DHT/pub-sub stack is an external collaborator.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// In-memory `Host` implementation used by this crate's own tests.
pub mod fake;

use std::{fmt, sync::Arc, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::wire::Proto;

/// Opaque peer identity, compared by equality.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(#[serde(with = "peer_id_bytes")] pub Arc<[u8]>);

mod peer_id_bytes {
    use std::sync::Arc;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Arc<[u8]>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Arc<[u8]>, D::Error> {
        let bytes = Vec::<u8>::deserialize(d)?;
        Ok(Arc::from(bytes))
    }
}

impl PeerId {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque multi-address, compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiaddr(pub Arc<str>);

impl Multiaddr {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer: PeerId,
    pub addrs: Vec<Multiaddr>,
}

/// Connection-manager sub-operations (`CONN_MANAGER` request subtype).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnMgrOp {
    Tag { peer: PeerId, tag: String, weight: i64 },
    Untag { peer: PeerId, tag: String },
    Trim,
    Disconnect { peer: PeerId },
}

/// One item of a streamed DHT result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DhtItem {
    Peer(PeerInfo),
    PeerId(PeerId),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubsubMessage {
    pub from: PeerId,
    pub topic: String,
    pub data: Vec<u8>,
}

/// Marker trait combining the half-duplex byte-stream bounds a peer stream
/// needs; blanket-implemented for anything that already satisfies them.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

pub type BoxedPeerStream = Box<dyn PeerStream>;

/// A peer-originated stream delivered to a registered protocol sink.
pub struct InboundPeerStream {
    pub peer: PeerId,
    pub addr: Multiaddr,
    pub proto: Proto,
    pub stream: BoxedPeerStream,
}

/// Channel through which the host delivers inbound peer streams for a
/// registered protocol.
pub type InboundSink = mpsc::UnboundedSender<InboundPeerStream>;

/// The peer-to-peer host capability set. Out of scope for this crate beyond
/// this interface: identity, transports, security, NAT traversal, DHT,
/// pub-sub and connection-manager internals belong to the implementation.
pub trait Host: Send + Sync + 'static {
    fn local_peer_id(&self) -> PeerId;

    fn listen_addresses(&self) -> Vec<Multiaddr>;

    fn connected_peers(&self) -> Vec<PeerInfo>;

    fn connection_manager(&self, op: ConnMgrOp) -> Result<()>;

    fn connect(
        &self,
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn disconnect(&self, peer: PeerId) -> impl Future<Output = Result<()>> + Send;

    /// Dials `peer`, negotiates one of `protos` and returns the negotiated
    /// protocol plus the opened stream.
    fn new_stream(
        &self,
        peer: PeerId,
        protos: &[Proto],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<(Proto, BoxedPeerStream)>> + Send;

    /// Routes inbound peer streams for `proto` to `sink`. Replaces any prior
    /// sink registered for the same `proto`.
    fn set_stream_handler(&self, proto: Proto, sink: InboundSink);

    /// Stops routing inbound peer streams for `proto`.
    fn remove_stream_handler(&self, proto: &Proto);

    fn dht_find_peer(
        &self,
        peer: PeerId,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<PeerInfo>> + Send;

    fn dht_find_peers_connected(
        &self,
        peer: PeerId,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<mpsc::Receiver<DhtItem>>> + Send;

    fn dht_find_providers(
        &self,
        key: Vec<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<mpsc::Receiver<DhtItem>>> + Send;

    fn dht_get_closest_peers(
        &self,
        key: Vec<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<mpsc::Receiver<DhtItem>>> + Send;

    fn dht_get_public_key(
        &self,
        peer: PeerId,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn dht_get_value(
        &self,
        key: Vec<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn dht_search_value(
        &self,
        key: Vec<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<mpsc::Receiver<DhtItem>>> + Send;

    fn dht_put_value(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn dht_provide(
        &self,
        key: Vec<u8>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn pubsub_topics(&self) -> Vec<String>;

    fn pubsub_list_peers(&self, topic: &str) -> Vec<PeerId>;

    fn pubsub_publish(
        &self,
        topic: &str,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn pubsub_subscribe(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<PubsubMessage>>> + Send;

    /// Shuts the host down. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
