// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use p2p_ctl_daemon::{
    codec::{self, DEFAULT_MAX_FRAME_BYTES},
    host::{Host, fake::FakeNetwork},
    wire::{CallId, CallOutcome, PersistentRequest, PersistentResponse, Proto},
};
use tokio::net::UnixStream;

use crate::integration_tests::common::{connect_control, spawn_daemon_on, upgrade_to_persistent};

/// Runs a persistent-connection client's side of the wire protocol: writes
/// `PersistentRequest` frames, reads `PersistentResponse` frames back.
async fn send(stream: &mut UnixStream, req: &PersistentRequest) -> Result<()> {
    codec::write_frame(stream, req, DEFAULT_MAX_FRAME_BYTES).await?;
    Ok(())
}

async fn recv(stream: &mut UnixStream) -> Result<PersistentResponse> {
    Ok(codec::read_frame(stream, DEFAULT_MAX_FRAME_BYTES).await?)
}

/// S4: a `sqrt` handler on daemon-A answers `sqrt(x)` for an 8-byte
/// little-endian float `x`; client-B's `CallUnary` for `sqrt(64.0)` gets
/// back `8.0` within `1e-9`.
#[tokio::test]
async fn unary_call_round_trips_through_a_remote_handler() -> Result<()> {
    let network = FakeNetwork::new();
    let daemon_a = spawn_daemon_on(&network).await;
    let daemon_b = spawn_daemon_on(&network).await;
    let a_id = daemon_a.daemon.host.local_peer_id().0.to_vec();

    let mut client_a = connect_control(&daemon_a.socket).await?;
    upgrade_to_persistent(&mut client_a).await?;
    send(
        &mut client_a,
        &PersistentRequest::AddUnaryHandler { proto: Proto::new("/sqrt"), balanced: false },
    )
    .await?;
    assert!(matches!(recv(&mut client_a).await?, PersistentResponse::AddUnaryHandlerAck));

    // Answers every `RequestHandling` with the square root of its 8-byte LE
    // float payload, for as long as the test process keeps this task alive.
    tokio::spawn(async move {
        loop {
            let frame = match recv(&mut client_a).await {
                Ok(f) => f,
                Err(_) => return,
            };
            let PersistentResponse::RequestHandling { call_id, payload, .. } = frame else {
                continue;
            };
            let Ok(bytes) = <[u8; 8]>::try_from(payload.as_slice()) else { continue };
            let x = f64::from_le_bytes(bytes);
            let outcome = CallOutcome::Ok { payload: x.sqrt().to_le_bytes().to_vec() };
            if send(&mut client_a, &PersistentRequest::UnaryResponse { call_id, outcome })
                .await
                .is_err()
            {
                return;
            }
        }
    });

    let mut client_b = connect_control(&daemon_b.socket).await?;
    upgrade_to_persistent(&mut client_b).await?;

    let call_id = CallId::random();
    send(
        &mut client_b,
        &PersistentRequest::CallUnary {
            call_id,
            peer: a_id,
            proto: Proto::new("/sqrt"),
            payload: 64.0_f64.to_le_bytes().to_vec(),
            timeout: None,
        },
    )
    .await?;

    let resp = tokio::time::timeout(Duration::from_secs(2), recv(&mut client_b))
        .await
        .expect("response before timeout")?;
    let PersistentResponse::CallUnaryResponse { call_id: got_id, outcome } = resp else {
        panic!("expected CallUnaryResponse, got {resp:?}");
    };
    assert_eq!(got_id, call_id);
    let CallOutcome::Ok { payload } = outcome else { panic!("expected Ok outcome, got {outcome:?}") };
    let bytes: [u8; 8] = payload.try_into().expect("8-byte payload");
    let result = f64::from_le_bytes(bytes);
    assert!((result - 8.0).abs() < 1e-9, "expected sqrt(64.0) == 8.0, got {result}");

    Ok(())
}
