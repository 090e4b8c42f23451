// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use p2p_ctl_daemon::{
    host::Host,
    wire::{Endpoint, Proto, Request, Response},
};
use tokio::io::AsyncWriteExt;

use crate::integration_tests::common::{RecordingEndpoint, connect_control, roundtrip, spawn_daemon};

/// S3: two clients register `/test` with `balanced=true`; ten streams opened
/// against it split five-and-five between the two endpoints.
#[tokio::test]
async fn balanced_handlers_split_traffic_evenly() -> Result<()> {
    let running = spawn_daemon().await;

    let mut endpoint_1 = RecordingEndpoint::bind("s3-h1").await;
    let mut endpoint_2 = RecordingEndpoint::bind("s3-h2").await;

    let mut client_1 = connect_control(&running.socket).await?;
    let resp = roundtrip(
        &mut client_1,
        &Request::StreamHandler {
            proto: Proto::new("/test"),
            endpoint: Endpoint::new(format!("{}", endpoint_1.path.display())),
            balanced: true,
        },
    )
    .await?;
    assert!(matches!(resp, Response::StreamHandler));

    let mut client_2 = connect_control(&running.socket).await?;
    let resp = roundtrip(
        &mut client_2,
        &Request::StreamHandler {
            proto: Proto::new("/test"),
            endpoint: Endpoint::new(format!("{}", endpoint_2.path.display())),
            balanced: true,
        },
    )
    .await?;
    assert!(matches!(resp, Response::StreamHandler));

    let self_id = running.daemon.host.local_peer_id().0.to_vec();
    for _ in 0..10 {
        let mut opener = connect_control(&running.socket).await?;
        let resp = roundtrip(
            &mut opener,
            &Request::StreamOpen {
                peer: self_id.clone(),
                protos: vec![Proto::new("/test")],
                timeout: None,
            },
        )
        .await?;
        assert!(matches!(resp, Response::StreamOpenAck { .. }));
        opener.shutdown().await?;
    }

    // Round-robin is linearised by the registry lock and processed by a
    // single router task per protocol, so ten sequential opens alternate
    // deterministically: odd opens land on endpoint 1, even on endpoint 2.
    for i in 0..5 {
        assert!(
            endpoint_1.next(Duration::from_secs(2)).await.is_some(),
            "endpoint 1 missing stream #{i}"
        );
    }
    for i in 0..5 {
        assert!(
            endpoint_2.next(Duration::from_secs(2)).await.is_some(),
            "endpoint 2 missing stream #{i}"
        );
    }

    Ok(())
}
