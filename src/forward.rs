//! Peer-Stream Forwarder: dials a peer over the `Host`, writes a preamble
//! frame identifying the stream, then pipes it bidirectionally against a
//! local endpoint (outbound: a registered `StreamHandler` endpoint; inbound:
//! the caller's own socket, once the Request Dispatcher has handed off).
//! Grounded in `original_source/stream.go`'s `doStreamPipe`/`handleStream`:
//! dial, write a small identifying frame, then two concurrent copies.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;

use crate::{
    codec::{self, DEFAULT_MAX_FRAME_BYTES},
    host::{BoxedPeerStream, PeerId},
    wire::{Endpoint, Proto},
};

/// Preamble written to a locally dialed endpoint before piping begins,
/// mirroring `p2pd`'s `StreamInfo` (`peer`, `addr`, `proto`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPreamble {
    pub peer: Vec<u8>,
    pub addr: String,
    pub proto: Proto,
}

/// Dials `endpoint` as a UNIX-domain socket, writes the preamble, and pipes
/// it bidirectionally against `peer_stream` until either side closes or
/// errors. Returns once the pipe ends; errors from the pipe itself are
/// logged by the caller rather than propagated, since by that point the
/// dispatcher has already acknowledged the stream to its own caller.
pub async fn pipe_to_endpoint(
    endpoint: &Endpoint,
    preamble: StreamPreamble,
    mut peer_stream: BoxedPeerStream,
) -> Result<()> {
    let mut local = UnixStream::connect(endpoint.as_str())
        .await
        .with_context(|| format!("dialing stream handler endpoint {endpoint}"))?;

    codec::write_frame(&mut local, &preamble, DEFAULT_MAX_FRAME_BYTES)
        .await
        .context("writing stream preamble")?;

    tokio::io::copy_bidirectional(&mut local, &mut *peer_stream)
        .await
        .context("piping stream")?;
    Ok(())
}

/// Dials `peer` over `host` for one of `protos`, returning the negotiated
/// protocol and the open stream. Thin enough that it exists mainly to keep
/// the dispatcher's STREAM_OPEN handling symmetric with the inbound path.
pub async fn open_peer_stream<H: crate::host::Host>(
    host: &H,
    peer: PeerId,
    protos: &[Proto],
    timeout: Option<Duration>,
) -> Result<(Proto, BoxedPeerStream)> {
    if protos.is_empty() {
        return Err(anyhow!("no protocols offered"));
    }
    host.new_stream(peer, protos, timeout).await
}
