//! Request Dispatcher: the per-connection loop for the non-persistent
//! protocol. Reads one [`Request`] at a time and answers with one or more
//! [`Response`] frames, except `StreamOpen` (whose success frame is
//! followed by handing the connection to bidirectional piping) and
//! `PersistentConnUpgrade` (which hands the connection to
//! [`crate::persist::engine`]).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::{
    bridge,
    codec::{self, DEFAULT_MAX_FRAME_BYTES},
    daemon::{ConnId, Daemon},
    forward,
    host::{BoxedPeerStream, Host, PeerId},
    persist,
    registry::{RegisterError, RemoveOutcome},
    wire::{Request, Response, WireError},
};

/// Outcome of handling one request against the daemon and its registries.
/// Writing the response frame(s) back onto the control connection, and any
/// subsequent hand-off, stays the caller's (`run`'s) job, since only `run`
/// owns the connection outright.
enum Outcome {
    Answered(Response),
    StreamOpen { ack: Response, peer_stream: BoxedPeerStream },
    Upgrade,
}

/// Runs the non-persistent protocol over `stream` until it closes, the
/// connection is handed off (stream pipe / persistent upgrade), or a fatal
/// I/O error occurs. `conn_id` has already been allocated by the caller,
/// which remains responsible for calling [`Daemon::revoke_connection`] once
/// this returns.
pub async fn run<H, S>(daemon: Arc<Daemon<H>>, conn_id: ConnId, mut stream: S) -> Result<()>
where
    H: Host,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let max_frame = daemon.cfg.frame.max_message_bytes;
    loop {
        let request: Request = match codec::read_frame(&mut stream, max_frame).await {
            Ok(request) => request,
            Err(codec::FrameError::Eof) => break,
            Err(e) => {
                debug!("connection {conn_id}: read failed: {e}");
                break;
            },
        };

        let outcome = match handle_request(&daemon, conn_id, request, &mut stream).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("connection {conn_id}: fatal error handling request: {e}");
                break;
            },
        };

        match outcome {
            Outcome::Answered(response) => {
                if let Err(e) =
                    codec::write_frame(&mut stream, &response, DEFAULT_MAX_FRAME_BYTES).await
                {
                    warn!("connection {conn_id}: write failed: {e}");
                    break;
                }
            },
            Outcome::StreamOpen { ack, mut peer_stream } => {
                if codec::write_frame(&mut stream, &ack, DEFAULT_MAX_FRAME_BYTES).await.is_err() {
                    break;
                }
                if let Err(e) =
                    tokio::io::copy_bidirectional(&mut stream, &mut *peer_stream).await
                {
                    debug!("connection {conn_id}: piping opened stream: {e}");
                }
                break;
            },
            Outcome::Upgrade => {
                if codec::write_frame(
                    &mut stream,
                    &Response::PersistentConnUpgradeAck,
                    DEFAULT_MAX_FRAME_BYTES,
                )
                .await
                .is_err()
                {
                    break;
                }
                return persist::engine::run(daemon, conn_id, stream).await;
            },
        }
    }
    Ok(())
}

/// Handles one request against `daemon`. Business-level failures (bad
/// handler registration, host errors) are converted to `Outcome::Answered`
/// with an `ERROR` response rather than propagated; only a fatal I/O error
/// while streaming DHT/pub-sub items onto `stream` is returned as `Err`,
/// since by that point the connection itself is presumed dead.
async fn handle_request<H, S>(
    daemon: &Arc<Daemon<H>>,
    conn_id: ConnId,
    request: Request,
    stream: &mut S,
) -> Result<Outcome>
where
    H: Host,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    match request {
        Request::Identify => Ok(Outcome::Answered(Response::Identify {
            peer: daemon.host.local_peer_id().0.to_vec(),
            addrs: daemon.host.listen_addresses().into_iter().map(|a| a.0.to_string()).collect(),
        })),
        Request::Connect { peer, addrs, timeout } => {
            let deadline = daemon.cfg.requests.effective_timeout(timeout);
            let result = match tokio::time::timeout(
                deadline,
                bridge::connect(&*daemon.host, peer, addrs, Some(deadline)),
            )
            .await
            {
                Ok(result) => result.map(|()| Response::Connect),
                Err(_) => Err(WireError::Transport("request timed out".into())),
            };
            Ok(Outcome::Answered(answer(result)))
        },
        Request::Disconnect { peer } => Ok(Outcome::Answered(answer(
            bridge::disconnect(&*daemon.host, peer).await.map(|()| Response::Disconnect),
        ))),
        Request::ListPeers => {
            Ok(Outcome::Answered(Response::ListPeers { peers: daemon.host.connected_peers() }))
        },
        Request::ConnManager(op) => Ok(Outcome::Answered(answer(
            daemon.host.connection_manager(op).map(|()| Response::ConnManager).map_err(WireError::from),
        ))),
        Request::StreamHandler { proto, endpoint, balanced } => {
            match daemon.stream_handlers.register(proto.clone(), endpoint, conn_id, balanced) {
                Ok(became_first) => {
                    if became_first {
                        spawn_inbound_stream_router(daemon.clone(), proto);
                    }
                    Ok(Outcome::Answered(Response::StreamHandler))
                },
                Err(RegisterError::AlreadySet) => {
                    Ok(Outcome::Answered(Response::from(WireError::AlreadySet)))
                },
            }
        },
        Request::RemoveStreamHandler { proto, endpoint } => {
            match daemon.stream_handlers.remove(&proto, &endpoint, &conn_id) {
                RemoveOutcome::Removed { emptied } => {
                    if emptied {
                        daemon.stream_handlers.forget(&proto);
                        daemon.host.remove_stream_handler(&proto);
                    }
                    Ok(Outcome::Answered(Response::RemoveStreamHandler))
                },
                RemoveOutcome::NotFound => {
                    Ok(Outcome::Answered(Response::from(WireError::NotFound)))
                },
            }
        },
        Request::StreamOpen { peer, protos, timeout } => {
            let deadline = daemon.cfg.requests.effective_timeout(timeout);
            match forward::open_peer_stream(&*daemon.host, PeerId::new(peer), &protos, Some(deadline))
                .await
            {
                Ok((proto, peer_stream)) => {
                    Ok(Outcome::StreamOpen { ack: Response::StreamOpenAck { proto }, peer_stream })
                },
                Err(e) => Ok(Outcome::Answered(Response::from(WireError::from(e)))),
            }
        },
        Request::Dht(req) => {
            if !daemon.cfg.dht_enabled {
                return Ok(Outcome::Answered(Response::from(WireError::NotEnabled)));
            }
            let (tx, mut rx) = tokio::sync::mpsc::channel(16);
            let bridge_task = tokio::spawn({
                let host = daemon.host.clone();
                async move { bridge::dht(&*host, req, &tx).await }
            });
            while let Some(item) = rx.recv().await {
                codec::write_frame(stream, &Response::DhtItem(item), DEFAULT_MAX_FRAME_BYTES)
                    .await
                    .context("writing dht item")?;
            }
            match bridge_task.await.context("dht task panicked")? {
                Ok(()) => Ok(Outcome::Answered(Response::DhtEnd)),
                Err(e) => Ok(Outcome::Answered(Response::from(e))),
            }
        },
        Request::Pubsub(req) => {
            if !daemon.cfg.pubsub_enabled {
                return Ok(Outcome::Answered(Response::from(WireError::NotEnabled)));
            }
            let (tx, mut rx) = tokio::sync::mpsc::channel(16);
            let host = daemon.host.clone();
            let bridge_task = tokio::spawn(async move { bridge::pubsub(&*host, req, &tx).await });
            while let Some(msg) = rx.recv().await {
                codec::write_frame(
                    stream,
                    &Response::PubsubMessage(msg),
                    DEFAULT_MAX_FRAME_BYTES,
                )
                .await
                .context("writing pubsub message")?;
            }
            match bridge_task.await.context("pubsub task panicked")? {
                Ok(outcome) => Ok(Outcome::Answered(pubsub_response(outcome))),
                Err(e) => Ok(Outcome::Answered(Response::from(e))),
            }
        },
        Request::PersistentConnUpgrade => Ok(Outcome::Upgrade),
    }
}

/// Flattens a `Result<Response, WireError>` into a plain `Response`, turning
/// an `Err` into the `ERROR` variant.
fn answer(result: Result<Response, WireError>) -> Response {
    result.unwrap_or_else(Response::from)
}

fn pubsub_response(outcome: bridge::PubsubOutcome) -> Response {
    match outcome {
        bridge::PubsubOutcome::Topics(topics) => Response::PubsubTopics { topics },
        bridge::PubsubOutcome::Peers(peers) => Response::PubsubListPeers { peers },
        bridge::PubsubOutcome::Published => Response::PubsubPublish,
        bridge::PubsubOutcome::SubscriptionEnded => Response::PubsubEnd,
    }
}

/// Spawned once per protocol, the first time a connection registers as its
/// `StreamHandler`. Reads every inbound peer stream the `Host` routes to
/// `proto`, picks the next endpoint in rotation, and pipes the stream to it.
fn spawn_inbound_stream_router<H: Host>(daemon: Arc<Daemon<H>>, proto: crate::wire::Proto) {
    let (sink, mut inbound) = tokio::sync::mpsc::unbounded_channel();
    daemon.host.set_stream_handler(proto.clone(), sink);
    tokio::spawn(async move {
        while let Some(inbound_stream) = inbound.recv().await {
            let Some(endpoint) = daemon.stream_handlers.pick(&proto) else {
                warn!("inbound stream for {proto} but no endpoint registered");
                continue;
            };
            let preamble = forward::StreamPreamble {
                peer: inbound_stream.peer.0.to_vec(),
                addr: inbound_stream.addr.0.to_string(),
                proto: inbound_stream.proto.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) =
                    forward::pipe_to_endpoint(&endpoint, preamble, inbound_stream.stream).await
                {
                    warn!("piping inbound stream to {endpoint} failed: {e}");
                }
            });
        }
    });
}
