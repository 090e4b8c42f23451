// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use p2p_ctl_daemon::{
    host::{Host, fake::FakeNetwork},
    wire::{Endpoint, Proto, Request, Response},
};
use tokio::io::AsyncWriteExt;

use crate::integration_tests::common::{RecordingEndpoint, connect_control, roundtrip, spawn_daemon_on};

/// S2: daemon-A's client registers a stream handler for `/test`; daemon-B's
/// client opens a stream to daemon-A on that protocol and writes 4 bytes.
/// The registered endpoint observes the payload and a preamble naming
/// daemon-B as the remote peer.
#[tokio::test]
async fn stream_open_pipes_bytes_to_the_registered_endpoint() -> Result<()> {
    let network = FakeNetwork::new();
    let daemon_a = spawn_daemon_on(&network).await;
    let daemon_b = spawn_daemon_on(&network).await;

    let mut client_a = connect_control(&daemon_a.socket).await?;
    let mut client_b = connect_control(&daemon_b.socket).await?;

    // client-A connects daemon-A to daemon-B.
    let b_id = daemon_b.daemon.host.local_peer_id().0.to_vec();
    let b_addrs: Vec<String> =
        daemon_b.daemon.host.listen_addresses().into_iter().map(|a| a.0.to_string()).collect();
    let resp = roundtrip(
        &mut client_a,
        &Request::Connect { peer: b_id.clone(), addrs: b_addrs, timeout: None },
    )
    .await?;
    assert!(matches!(resp, Response::Connect));

    // client-A registers a stream handler for /test.
    let mut endpoint = RecordingEndpoint::bind("s2").await;
    let endpoint_addr = Endpoint::new(format!("{}", endpoint.path.display()));
    let resp = roundtrip(
        &mut client_a,
        &Request::StreamHandler {
            proto: Proto::new("/test"),
            endpoint: endpoint_addr,
            balanced: false,
        },
    )
    .await?;
    assert!(matches!(resp, Response::StreamHandler));

    // client-B opens a stream to daemon-A and writes 4 bytes.
    let a_id = daemon_a.daemon.host.local_peer_id().0.to_vec();
    let resp = roundtrip(
        &mut client_b,
        &Request::StreamOpen { peer: a_id, protos: vec![Proto::new("/test")], timeout: None },
    )
    .await?;
    assert!(matches!(resp, Response::StreamOpenAck { .. }));

    client_b.write_all(b"test").await?;
    client_b.shutdown().await?;

    let recorded = endpoint
        .next(Duration::from_secs(2))
        .await
        .expect("endpoint should have received the piped stream");
    assert_eq!(recorded.preamble.peer, b_id);
    assert_eq!(recorded.preamble.proto.as_str(), "/test");
    assert_eq!(recorded.payload, b"test");

    Ok(())
}
