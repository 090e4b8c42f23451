//! Per-connection loop for the persistent-connection protocol, plus the
//! peer-facing side of a unary RPC: a thin length-delimited envelope
//! (`PeerCallRequest`/`PeerCallResponse`) carried on an actual `Host`
//! stream, round-robined to whichever local connection last called
//! `AddUnaryHandler` for that protocol. Grounded in
//! `original_source/persistent_stream.go`'s
//! `handlePersistentConn`/`openUnaryStream`, generalized from "one handler,
//! one blocking request loop" to many concurrent calls multiplexed by
//! `CallId`.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    codec::{self, DEFAULT_MAX_FRAME_BYTES},
    daemon::{ConnId, Daemon},
    host::{Host, InboundPeerStream, PeerId},
    registry::{RegisterError, RemoveOutcome},
    wire::{CallId, CallOutcome, PeerCallRequest, PeerCallResponse, PersistentRequest,
        PersistentResponse, Proto, WireError},
};

/// Runs the persistent-connection protocol over `stream` until it closes or
/// the daemon shuts down. `conn_id` has already been allocated by the
/// caller, which is also responsible for calling
/// [`Daemon::revoke_connection`] once this returns. Held for the whole
/// lifetime of the connection as one of the daemon's live connections, so a
/// configured `lifecycle.kill_after_no_persistent_secs` never fires while it
/// is open, and the first such connection arms `quit_on_last_persistent_close`.
pub async fn run<H, S>(daemon: Arc<Daemon<H>>, conn_id: ConnId, stream: S) -> Result<()>
where
    H: Host,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if daemon.cfg.lifecycle.quit_on_last_persistent_close {
        daemon.lifecycle.arm();
    }
    let _guard = daemon.lifecycle.connection_opened();

    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<PersistentResponse>();
    daemon.persistent_conns.insert(conn_id, outbound_tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) =
                codec::write_frame(&mut write_half, &frame, DEFAULT_MAX_FRAME_BYTES).await
            {
                warn!("persistent connection {conn_id}: write failed: {e}");
                return;
            }
        }
    });

    let max_frame = daemon.cfg.frame.max_message_bytes;
    loop {
        let frame: PersistentRequest =
            match codec::read_frame(&mut read_half, max_frame).await {
                Ok(frame) => frame,
                Err(codec::FrameError::Eof) => break,
                Err(e) => {
                    debug!("persistent connection {conn_id}: read failed: {e}");
                    break;
                },
            };

        if let Err(e) = handle_frame(&daemon, conn_id, frame, &outbound_tx).await {
            let _ = outbound_tx.send(PersistentResponse::error(None, e.into()));
        }
    }

    writer.abort();
    Ok(())
}

async fn handle_frame<H: Host>(
    daemon: &Arc<Daemon<H>>,
    conn_id: ConnId,
    frame: PersistentRequest,
    outbound_tx: &mpsc::UnboundedSender<PersistentResponse>,
) -> Result<()> {
    match frame {
        PersistentRequest::AddUnaryHandler { proto, balanced } => {
            match daemon.unary_handlers.register(proto.clone(), conn_id, conn_id, balanced) {
                Ok(became_first) => {
                    if became_first {
                        spawn_unary_listener(daemon.clone(), proto);
                    }
                    let _ = outbound_tx.send(PersistentResponse::AddUnaryHandlerAck);
                },
                Err(RegisterError::AlreadySet) => {
                    let _ = outbound_tx
                        .send(PersistentResponse::error(None, WireError::AlreadySet));
                },
            }
        },
        PersistentRequest::RemoveUnaryHandler { proto } => {
            match daemon.unary_handlers.remove(&proto, &conn_id, &conn_id) {
                RemoveOutcome::Removed { emptied } => {
                    if emptied {
                        daemon.unary_handlers.forget(&proto);
                        daemon.host.remove_stream_handler(&proto);
                    }
                    let _ = outbound_tx.send(PersistentResponse::RemoveUnaryHandlerAck);
                },
                RemoveOutcome::NotFound => {
                    let _ =
                        outbound_tx.send(PersistentResponse::error(None, WireError::NotFound));
                },
            }
        },
        PersistentRequest::CallUnary { call_id, peer, proto, payload, timeout } => {
            let daemon = daemon.clone();
            let outbound_tx = outbound_tx.clone();
            let cancel = daemon.cancels.register(call_id);
            let deadline = daemon.cfg.requests.effective_timeout(timeout);
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = tokio::time::timeout(deadline, call_unary_over_host(&daemon, peer, &proto, payload)) => {
                        result.ok()
                    },
                };
                daemon.cancels.forget(&call_id);
                let response = match outcome {
                    Some(outcome) => PersistentResponse::CallUnaryResponse { call_id, outcome },
                    None => PersistentResponse::Cancel { call_id },
                };
                let _ = outbound_tx.send(response);
            });
        },
        PersistentRequest::UnaryResponse { call_id, outcome } => {
            daemon.waiters.resolve(
                call_id,
                PersistentResponse::CallUnaryResponse { call_id, outcome },
            );
        },
        PersistentRequest::Cancel { call_id } => {
            // The spawned `CallUnary` task above is racing `cancel.cancelled()`
            // against the call; cancelling the token here is enough to make
            // it emit the single `Cancel { call_id }` response itself. Doing
            // it again here would double that frame, or send a stray one
            // after the call already resolved with a `CallUnaryResponse`.
            daemon.cancels.cancel(&call_id);
        },
    }
    Ok(())
}

/// Opens a peer stream to `peer` for `proto` and performs one call/response
/// round trip. Any failure short of the deadline (dial, write, read) is
/// folded into `CallOutcome::Err` rather than propagated, since from the
/// caller's perspective a transport failure and a handler-declined call are
/// both just "the call did not produce a payload".
async fn call_unary_over_host<H: Host>(
    daemon: &Daemon<H>,
    peer: Vec<u8>,
    proto: &Proto,
    payload: Vec<u8>,
) -> CallOutcome {
    let attempt = async {
        let (_, mut stream) = daemon
            .host
            .new_stream(PeerId::new(peer), std::slice::from_ref(proto), None)
            .await
            .context("opening unary stream")?;

        let call_id = CallId::random();
        codec::write_frame(
            &mut stream,
            &PeerCallRequest { call_id, payload },
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await
        .context("writing unary call request")?;
        let response: PeerCallResponse = codec::read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES)
            .await
            .context("reading unary call response")?;
        Ok::<_, anyhow::Error>(response.outcome)
    };
    attempt.await.unwrap_or_else(|e| CallOutcome::Err { message: e.to_string().into_bytes() })
}

/// Spawned once per protocol, the first time a local connection registers
/// as its handler. Reads every inbound peer stream the `Host` routes to
/// `proto`, answers each with a single envelope round trip, and exits once
/// the host's inbound sink is dropped (which happens when
/// `remove_stream_handler` is called).
fn spawn_unary_listener<H: Host>(daemon: Arc<Daemon<H>>, proto: Proto) {
    let (sink, mut inbound) = mpsc::unbounded_channel();
    daemon.host.set_stream_handler(proto.clone(), sink);
    tokio::spawn(async move {
        while let Some(inbound_stream) = inbound.recv().await {
            let daemon = daemon.clone();
            let proto = proto.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_one_unary_call(&daemon, &proto, inbound_stream).await {
                    debug!("unary call on {proto} failed: {e}");
                }
            });
        }
    });
}

/// Reads one [`PeerCallRequest`] off `inbound_stream`, hands it to whichever
/// local connection is registered as `proto`'s handler, and races the
/// handler's answer against a one-byte probe read on the same stream: if the
/// calling peer closes its side before the handler responds, the probe read
/// returns first (EOF or error) and the handler is told to stop via a
/// `Cancel` instead of being left to answer into the void.
async fn serve_one_unary_call<H: Host>(
    daemon: &Daemon<H>,
    proto: &Proto,
    mut inbound_stream: InboundPeerStream,
) -> Result<()> {
    let request: PeerCallRequest =
        codec::read_frame(&mut inbound_stream.stream, DEFAULT_MAX_FRAME_BYTES)
            .await
            .context("reading call request")?;

    let rx = daemon
        .waiters
        .register(request.call_id)
        .map_err(|_| anyhow!("duplicate call id"))?;

    let handler_conn_id = daemon.route_to_handler(
        proto,
        PersistentResponse::RequestHandling {
            call_id: request.call_id,
            peer: inbound_stream.peer.0.to_vec(),
            proto: proto.clone(),
            payload: request.payload,
        },
    );
    let Some(handler_conn_id) = handler_conn_id else {
        daemon.waiters.forget(&request.call_id);
        return Err(anyhow!("no local handler registered for {proto}"));
    };
    // Tracked so `Daemon::revoke_connection` can resolve this waiter with a
    // `Cancel` if `handler_conn_id` disconnects before answering, instead of
    // leaving this task (and the peer stream it holds open) waiting forever.
    daemon.pending_calls.insert(request.call_id, handler_conn_id);

    let mut probe = [0u8; 1];
    let outcome = tokio::select! {
        response = rx => {
            daemon.pending_calls.remove(&request.call_id);
            match response {
                Ok(PersistentResponse::CallUnaryResponse { outcome, .. }) => outcome,
                // The handler connection was revoked while this call was
                // in flight; reset the peer stream rather than answer it.
                Ok(PersistentResponse::Cancel { .. }) => {
                    daemon.waiters.forget(&request.call_id);
                    return Ok(());
                },
                Ok(other) => {
                    daemon.waiters.forget(&request.call_id);
                    return Err(anyhow!("unexpected response from handler: {other:?}"));
                },
                Err(_) => {
                    daemon.waiters.forget(&request.call_id);
                    return Err(anyhow!("handler dropped without responding"));
                },
            }
        },
        probed = inbound_stream.stream.read(&mut probe) => {
            daemon.waiters.forget(&request.call_id);
            daemon.pending_calls.remove(&request.call_id);
            daemon.route_to_handler(proto, PersistentResponse::Cancel { call_id: request.call_id });
            return match probed {
                Ok(_) => Err(anyhow!("peer stream sent unexpected data before handler responded")),
                Err(e) => Err(anyhow!(e)).context("peer stream closed early"),
            };
        },
    };

    codec::write_frame(
        &mut inbound_stream.stream,
        &PeerCallResponse { call_id: request.call_id, outcome },
        DEFAULT_MAX_FRAME_BYTES,
    )
    .await
    .context("writing call response")
}
