// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use p2p_ctl_daemon::wire::{Endpoint, Proto, Request, Response};

use crate::integration_tests::common::{connect_control, roundtrip, spawn_daemon};

/// Testable property 4: closing a control connection eventually removes
/// every `StreamHandler` registration it owned. A non-balanced registration
/// that was rejected with `AlreadySet` while the owner was alive succeeds
/// once that owner's connection drops.
#[tokio::test]
async fn closing_a_connection_frees_its_stream_handler_registrations() -> Result<()> {
    let running = spawn_daemon().await;
    let proto = Proto::new("/test");

    let mut owner = connect_control(&running.socket).await?;
    let resp = roundtrip(
        &mut owner,
        &Request::StreamHandler {
            proto: proto.clone(),
            endpoint: Endpoint::new("/tmp/does-not-need-to-exist.sock"),
            balanced: false,
        },
    )
    .await?;
    assert!(matches!(resp, Response::StreamHandler));

    let mut contender = connect_control(&running.socket).await?;
    let resp = roundtrip(
        &mut contender,
        &Request::StreamHandler {
            proto: proto.clone(),
            endpoint: Endpoint::new("/tmp/also-does-not-need-to-exist.sock"),
            balanced: false,
        },
    )
    .await?;
    assert!(matches!(resp, Response::Error { .. }), "second non-balanced registrant should be rejected while the owner is live");

    drop(owner);

    let freed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let mut probe = connect_control(&running.socket).await.expect("connect");
            let resp = roundtrip(
                &mut probe,
                &Request::StreamHandler {
                    proto: proto.clone(),
                    endpoint: Endpoint::new("/tmp/third-does-not-need-to-exist.sock"),
                    balanced: false,
                },
            )
            .await
            .expect("roundtrip");
            match resp {
                Response::StreamHandler => return,
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await;
    assert!(freed.is_ok(), "registration never freed up after the owning connection closed");

    Ok(())
}
