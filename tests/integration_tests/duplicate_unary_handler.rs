// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use p2p_ctl_daemon::{
    codec::{self, DEFAULT_MAX_FRAME_BYTES},
    wire::{PersistentRequest, PersistentResponse, Proto},
};
use tokio::net::UnixStream;

use crate::integration_tests::common::{connect_control, spawn_daemon, upgrade_to_persistent};

async fn send(stream: &mut UnixStream, req: &PersistentRequest) -> Result<()> {
    codec::write_frame(stream, req, DEFAULT_MAX_FRAME_BYTES).await?;
    Ok(())
}

async fn recv(stream: &mut UnixStream) -> Result<PersistentResponse> {
    Ok(codec::read_frame(stream, DEFAULT_MAX_FRAME_BYTES).await?)
}

/// S6: two non-balanced `AddUnaryHandler("sqrt")` registrations from
/// different clients collide with `AlreadySet`; after the first client
/// closes, a third registration for the same protocol succeeds.
#[tokio::test]
async fn duplicate_non_balanced_handler_is_rejected_until_the_owner_disconnects() -> Result<()> {
    let running = spawn_daemon().await;

    let mut client_1 = connect_control(&running.socket).await?;
    upgrade_to_persistent(&mut client_1).await?;
    send(
        &mut client_1,
        &PersistentRequest::AddUnaryHandler { proto: Proto::new("/sqrt"), balanced: false },
    )
    .await?;
    assert!(matches!(recv(&mut client_1).await?, PersistentResponse::AddUnaryHandlerAck));

    let mut client_2 = connect_control(&running.socket).await?;
    upgrade_to_persistent(&mut client_2).await?;
    send(
        &mut client_2,
        &PersistentRequest::AddUnaryHandler { proto: Proto::new("/sqrt"), balanced: false },
    )
    .await?;
    let resp = recv(&mut client_2).await?;
    let PersistentResponse::DaemonError { kind, .. } = resp else {
        panic!("expected DaemonError, got {resp:?}");
    };
    assert_eq!(kind, "ALREADY_SET");

    drop(client_1);
    // Give the acceptor's per-connection task time to observe EOF and run
    // `Daemon::revoke_connection`.
    let freed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let mut client_3 = connect_control(&running.socket).await.expect("connect");
            upgrade_to_persistent(&mut client_3).await.expect("upgrade");
            send(
                &mut client_3,
                &PersistentRequest::AddUnaryHandler {
                    proto: Proto::new("/sqrt"),
                    balanced: false,
                },
            )
            .await
            .expect("send");
            match recv(&mut client_3).await.expect("recv") {
                PersistentResponse::AddUnaryHandlerAck => return,
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await;
    assert!(freed.is_ok(), "registration never freed up after the owning client disconnected");

    Ok(())
}
