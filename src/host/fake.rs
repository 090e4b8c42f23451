//! A deterministic in-process `Host` used by this crate's own test suite.
//! It is not a production p2p stack: connectivity, DHT and pub-sub are all
//! backed by shared in-memory tables rather than real transports.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow, bail};
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::{
    host::{
        BoxedPeerStream, ConnMgrOp, DhtItem, Host, InboundPeerStream, InboundSink,
        Multiaddr, PeerId, PeerInfo, PubsubMessage,
    },
    wire::Proto,
};

/// Shared "network" that fake hosts dial into, akin to how the teacher's
/// `Pool` holds every live `Session`/`Connection` by key rather than by
/// scanning the whole process.
pub struct FakeNetwork {
    peers: DashMap<PeerId, Arc<FakeHost>>,
    topics: DashMap<String, broadcast::Sender<PubsubMessage>>,
    topic_subscribers: DashMap<String, Vec<PeerId>>,
    dht_values: DashMap<Vec<u8>, Vec<u8>>,
    dht_providers: DashMap<Vec<u8>, Vec<PeerInfo>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: DashMap::new(),
            topics: DashMap::new(),
            topic_subscribers: DashMap::new(),
            dht_values: DashMap::new(),
            dht_providers: DashMap::new(),
        })
    }

    /// Creates and registers a new fake host with a freshly generated peer
    /// id and the given listen address.
    pub fn spawn_host(self: &Arc<Self>, addr: impl Into<Arc<str>>) -> Arc<FakeHost> {
        let mut id_bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::rng(), &mut id_bytes);
        let host = Arc::new(FakeHost {
            id: PeerId::new(Arc::from(id_bytes.to_vec())),
            addrs: vec![Multiaddr::new(addr)],
            network: self.clone(),
            connected: DashMap::new(),
            stream_handlers: DashMap::new(),
        });
        self.peers.insert(host.id.clone(), host.clone());
        host
    }
}

pub struct FakeHost {
    id: PeerId,
    addrs: Vec<Multiaddr>,
    network: Arc<FakeNetwork>,
    connected: DashMap<PeerId, ()>,
    stream_handlers: DashMap<Proto, InboundSink>,
}

impl FakeHost {
    pub fn id(&self) -> PeerId {
        self.id.clone()
    }
}

impl Host for FakeHost {
    fn local_peer_id(&self) -> PeerId {
        self.id.clone()
    }

    fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.addrs.clone()
    }

    fn connected_peers(&self) -> Vec<PeerInfo> {
        self.connected
            .iter()
            .filter_map(|e| {
                let peer = e.key().clone();
                self.network.peers.get(&peer).map(|h| PeerInfo {
                    peer: peer.clone(),
                    addrs: h.addrs.clone(),
                })
            })
            .collect()
    }

    fn connection_manager(&self, op: ConnMgrOp) -> Result<()> {
        match op {
            ConnMgrOp::Disconnect { peer } => {
                self.connected.remove(&peer);
                Ok(())
            },
            // Tagging/trimming are connection-manager policy hints that a
            // production host would act on lazily; the fake has no pool to
            // trim and simply accepts them.
            ConnMgrOp::Tag { .. } | ConnMgrOp::Untag { .. } | ConnMgrOp::Trim => Ok(()),
        }
    }

    async fn connect(
        &self,
        peer: PeerId,
        _addrs: Vec<Multiaddr>,
        _timeout: Option<Duration>,
    ) -> Result<()> {
        if !self.network.peers.contains_key(&peer) {
            bail!("unknown peer");
        }
        self.connected.insert(peer.clone(), ());
        if let Some(target) = self.network.peers.get(&peer) {
            target.connected.insert(self.id.clone(), ());
        }
        Ok(())
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.connected.remove(&peer);
        Ok(())
    }

    async fn new_stream(
        &self,
        peer: PeerId,
        protos: &[Proto],
        _timeout: Option<Duration>,
    ) -> Result<(Proto, BoxedPeerStream)> {
        let proto = protos.first().ok_or_else(|| anyhow!("no protocols offered"))?;
        let target = self
            .network
            .peers
            .get(&peer)
            .ok_or_else(|| anyhow!("unknown peer"))?
            .clone();
        let sink = target
            .stream_handlers
            .get(proto)
            .ok_or_else(|| anyhow!("no handler for protocol {proto}"))?
            .clone();

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let delivered = InboundPeerStream {
            peer: self.id.clone(),
            addr: self.addrs.first().cloned().unwrap_or_else(|| Multiaddr::new("")),
            proto: proto.clone(),
            stream: Box::new(theirs),
        };
        sink.send(delivered).map_err(|_| anyhow!("handler gone"))?;
        Ok((proto.clone(), Box::new(ours)))
    }

    fn set_stream_handler(&self, proto: Proto, sink: InboundSink) {
        self.stream_handlers.insert(proto, sink);
    }

    fn remove_stream_handler(&self, proto: &Proto) {
        self.stream_handlers.remove(proto);
    }

    async fn dht_find_peer(
        &self,
        peer: PeerId,
        _timeout: Option<Duration>,
    ) -> Result<PeerInfo> {
        self.network
            .peers
            .get(&peer)
            .map(|h| PeerInfo { peer: peer.clone(), addrs: h.addrs.clone() })
            .ok_or_else(|| anyhow!("peer not found"))
    }

    async fn dht_find_peers_connected(
        &self,
        peer: PeerId,
        _timeout: Option<Duration>,
    ) -> Result<mpsc::Receiver<DhtItem>> {
        let (tx, rx) = mpsc::channel(16);
        if let Some(host) = self.network.peers.get(&peer) {
            for entry in host.connected.iter() {
                let p = entry.key().clone();
                if let Some(h) = self.network.peers.get(&p) {
                    let _ = tx
                        .send(DhtItem::Peer(PeerInfo { peer: p.clone(), addrs: h.addrs.clone() }))
                        .await;
                }
            }
        }
        Ok(rx)
    }

    async fn dht_find_providers(
        &self,
        key: Vec<u8>,
        _timeout: Option<Duration>,
    ) -> Result<mpsc::Receiver<DhtItem>> {
        let (tx, rx) = mpsc::channel(16);
        if let Some(providers) = self.network.dht_providers.get(&key) {
            for p in providers.iter() {
                let _ = tx.send(DhtItem::Peer(p.clone())).await;
            }
        }
        Ok(rx)
    }

    async fn dht_get_closest_peers(
        &self,
        _key: Vec<u8>,
        _timeout: Option<Duration>,
    ) -> Result<mpsc::Receiver<DhtItem>> {
        let (tx, rx) = mpsc::channel(16);
        for entry in self.network.peers.iter() {
            let _ = tx.send(DhtItem::PeerId(entry.key().clone())).await;
        }
        Ok(rx)
    }

    async fn dht_get_public_key(
        &self,
        peer: PeerId,
        _timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        if self.network.peers.contains_key(&peer) {
            Ok(peer.0.to_vec())
        } else {
            bail!("peer not found")
        }
    }

    async fn dht_get_value(
        &self,
        key: Vec<u8>,
        _timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        self.network
            .dht_values
            .get(&key)
            .map(|v| v.clone())
            .ok_or_else(|| anyhow!("value not found"))
    }

    async fn dht_search_value(
        &self,
        key: Vec<u8>,
        _timeout: Option<Duration>,
    ) -> Result<mpsc::Receiver<DhtItem>> {
        let (tx, rx) = mpsc::channel(4);
        if let Some(v) = self.network.dht_values.get(&key) {
            let _ = tx.send(DhtItem::Bytes(v.clone())).await;
        }
        Ok(rx)
    }

    async fn dht_put_value(
        &self,
        key: Vec<u8>,
        value: Vec<u8>,
        _timeout: Option<Duration>,
    ) -> Result<()> {
        self.network.dht_values.insert(key, value);
        Ok(())
    }

    async fn dht_provide(&self, key: Vec<u8>, _timeout: Option<Duration>) -> Result<()> {
        self.network
            .dht_providers
            .entry(key)
            .or_default()
            .push(PeerInfo { peer: self.id.clone(), addrs: self.addrs.clone() });
        Ok(())
    }

    fn pubsub_topics(&self) -> Vec<String> {
        self.network.topics.iter().map(|e| e.key().clone()).collect()
    }

    fn pubsub_list_peers(&self, topic: &str) -> Vec<PeerId> {
        self.network
            .topic_subscribers
            .get(topic)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    async fn pubsub_publish(&self, topic: &str, data: Vec<u8>) -> Result<()> {
        let tx = self
            .network
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone();
        let _ = tx.send(PubsubMessage { from: self.id.clone(), topic: topic.to_string(), data });
        Ok(())
    }

    async fn pubsub_subscribe(&self, topic: &str) -> Result<mpsc::Receiver<PubsubMessage>> {
        let mut broadcast_rx = self
            .network
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe();
        self.network
            .topic_subscribers
            .entry(topic.to_string())
            .or_default()
            .push(self.id.clone());

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            return;
                        }
                    },
                    Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
        Ok(rx)
    }

    async fn close(&self) {
        self.stream_handlers.clear();
    }
}
