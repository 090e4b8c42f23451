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

async fn send(stream: &mut UnixStream, req: &PersistentRequest) -> Result<()> {
    codec::write_frame(stream, req, DEFAULT_MAX_FRAME_BYTES).await?;
    Ok(())
}

async fn recv(stream: &mut UnixStream) -> Result<PersistentResponse> {
    Ok(codec::read_frame(stream, DEFAULT_MAX_FRAME_BYTES).await?)
}

/// S5: a `slow` handler on daemon-A sleeps 3s before answering; client-B
/// calls it with a 1s timeout and must observe a `Cancel` response within
/// ~1s, with the daemon's response-waiter table eventually returning to
/// empty once the late answer (if any) arrives and is discarded.
#[tokio::test]
async fn unary_call_timeout_yields_a_cancel_response() -> Result<()> {
    let network = FakeNetwork::new();
    let daemon_a = spawn_daemon_on(&network).await;
    let daemon_b = spawn_daemon_on(&network).await;
    let a_id = daemon_a.daemon.host.local_peer_id().0.to_vec();

    let mut client_a = connect_control(&daemon_a.socket).await?;
    upgrade_to_persistent(&mut client_a).await?;
    send(
        &mut client_a,
        &PersistentRequest::AddUnaryHandler { proto: Proto::new("/slow"), balanced: false },
    )
    .await?;
    assert!(matches!(recv(&mut client_a).await?, PersistentResponse::AddUnaryHandlerAck));

    tokio::spawn(async move {
        loop {
            let frame = match recv(&mut client_a).await {
                Ok(f) => f,
                Err(_) => return,
            };
            let PersistentResponse::RequestHandling { call_id, .. } = frame else { continue };
            tokio::time::sleep(Duration::from_secs(3)).await;
            let outcome = CallOutcome::Ok { payload: b"too late".to_vec() };
            // The calling side has already been answered with a Cancel and
            // moved on by the time this arrives; the daemon just drops it.
            let _ = send(&mut client_a, &PersistentRequest::UnaryResponse { call_id, outcome }).await;
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
            proto: Proto::new("/slow"),
            payload: Vec::new(),
            timeout: Some(Duration::from_secs(1)),
        },
    )
    .await?;

    let resp = tokio::time::timeout(Duration::from_millis(1500), recv(&mut client_b))
        .await
        .expect("a Cancel response should arrive within ~1s")?;
    let PersistentResponse::Cancel { call_id: got_id } = resp else {
        panic!("expected Cancel, got {resp:?}");
    };
    assert_eq!(got_id, call_id);

    // The daemon's own waiter table (for the inbound call it forwarded to
    // daemon-A's client) should drain back to empty once the late
    // UnaryResponse is discarded, well before the 3s sleep elapses again.
    let waiters_emptied = tokio::time::timeout(Duration::from_secs(4), async {
        loop {
            if daemon_a.daemon.waiters.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waiters_emptied.is_ok(), "response-waiter table never drained back to empty");

    Ok(())
}
