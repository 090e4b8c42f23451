// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use p2p_ctl_daemon::{
    host::Host,
    wire::{Request, Response},
};

use crate::integration_tests::common::{connect_control, roundtrip, spawn_daemon};

/// S1: IDENTIFY returns the host's own peer id and listen addresses.
#[tokio::test]
async fn identify_reports_host_id_and_addresses() -> Result<()> {
    let running = spawn_daemon().await;
    let mut client = connect_control(&running.socket).await?;

    let resp = roundtrip(&mut client, &Request::Identify).await?;
    let Response::Identify { peer, addrs } = resp else {
        panic!("expected Identify response, got {resp:?}");
    };

    assert_eq!(peer, running.daemon.host.local_peer_id().0.to_vec());
    let expected: Vec<String> =
        running.daemon.host.listen_addresses().into_iter().map(|a| a.0.to_string()).collect();
    assert_eq!(addrs.len(), expected.len());
    for addr in &expected {
        assert!(addrs.contains(addr), "missing address {addr} in {addrs:?}");
    }

    Ok(())
}
