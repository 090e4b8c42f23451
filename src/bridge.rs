//! Host Bridge: translates wire requests into `Host` calls and their
//! results back into wire responses. Kept as a thin mapping layer so the
//! dispatcher and persistent-connection engine never touch `Host` directly.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio::sync::mpsc;

use crate::{
    host::{DhtItem, Host, Multiaddr, PeerId, PubsubMessage},
    wire::{DhtRequest, PubsubRequest, WireError},
};

pub async fn connect<H: Host>(
    host: &H,
    peer: Vec<u8>,
    addrs: Vec<String>,
    timeout: Option<std::time::Duration>,
) -> Result<(), WireError> {
    let addrs = addrs.into_iter().map(Multiaddr::new).collect();
    host.connect(PeerId::new(peer), addrs, timeout)
        .await
        .map_err(WireError::from)
}

pub async fn disconnect<H: Host>(host: &H, peer: Vec<u8>) -> Result<(), WireError> {
    host.disconnect(PeerId::new(peer)).await.map_err(WireError::from)
}

/// Runs one DHT sub-request, streaming every yielded item into `sink` and
/// returning once the underlying `Host` stream (if any) is exhausted.
pub async fn dht<H: Host>(
    host: &H,
    req: DhtRequest,
    sink: &mpsc::Sender<DhtItem>,
) -> Result<(), WireError> {
    match req {
        DhtRequest::FindPeer { peer, timeout } => {
            let info = host
                .dht_find_peer(PeerId::new(peer), timeout)
                .await
                .map_err(WireError::from)?;
            let _ = sink.send(DhtItem::Peer(info)).await;
        },
        DhtRequest::FindPeersConnected { peer, timeout } => {
            drain(host.dht_find_peers_connected(PeerId::new(peer), timeout).await, sink)
                .await?;
        },
        DhtRequest::FindProviders { key, timeout } => {
            drain(host.dht_find_providers(key, timeout).await, sink).await?;
        },
        DhtRequest::GetClosestPeers { key, timeout } => {
            drain(host.dht_get_closest_peers(key, timeout).await, sink).await?;
        },
        DhtRequest::GetPublicKey { peer, timeout } => {
            let key = host
                .dht_get_public_key(PeerId::new(peer), timeout)
                .await
                .map_err(WireError::from)?;
            let _ = sink.send(DhtItem::Bytes(key)).await;
        },
        DhtRequest::GetValue { key, timeout } => {
            let value = host.dht_get_value(key, timeout).await.map_err(WireError::from)?;
            let _ = sink.send(DhtItem::Bytes(value)).await;
        },
        DhtRequest::SearchValue { key, timeout } => {
            drain(host.dht_search_value(key, timeout).await, sink).await?;
        },
        DhtRequest::PutValue { key, value, timeout } => {
            host.dht_put_value(key, value, timeout).await.map_err(WireError::from)?;
        },
        DhtRequest::Provide { key, timeout } => {
            host.dht_provide(key, timeout).await.map_err(WireError::from)?;
        },
    }
    Ok(())
}

async fn drain(
    rx: anyhow::Result<mpsc::Receiver<DhtItem>>,
    sink: &mpsc::Sender<DhtItem>,
) -> Result<(), WireError> {
    let mut rx = rx.map_err(WireError::from)?;
    while let Some(item) = rx.recv().await {
        if sink.send(item).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Runs one pub-sub sub-request. `Subscribe` forwards messages into `sink`
/// until the underlying subscription ends; every other variant answers once.
pub async fn pubsub<H: Host>(
    host: &H,
    req: PubsubRequest,
    sink: &mpsc::Sender<PubsubMessage>,
) -> Result<PubsubOutcome, WireError> {
    match req {
        PubsubRequest::Topics => Ok(PubsubOutcome::Topics(host.pubsub_topics())),
        PubsubRequest::ListPeers { topic } => {
            let peers =
                host.pubsub_list_peers(&topic).into_iter().map(|p| p.0.to_vec()).collect();
            Ok(PubsubOutcome::Peers(peers))
        },
        PubsubRequest::Publish { topic, data } => {
            host.pubsub_publish(&topic, data).await.map_err(WireError::from)?;
            Ok(PubsubOutcome::Published)
        },
        PubsubRequest::Subscribe { topic } => {
            let mut rx = host.pubsub_subscribe(&topic).await.map_err(WireError::from)?;
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            Ok(PubsubOutcome::SubscriptionEnded)
        },
    }
}

pub enum PubsubOutcome {
    Topics(Vec<String>),
    Peers(Vec<Vec<u8>>),
    Published,
    SubscriptionEnded,
}
