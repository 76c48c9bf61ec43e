// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use nbd_adapter_rs::session::Inflight;
use tokio::time::{sleep, timeout};

#[test]
fn counter_tracks_registry_length() {
    let inflight = Inflight::new();
    assert!(inflight.is_empty());

    let a = inflight.insert(0);
    let b = inflight.insert(1);
    assert_ne!(a, b);
    assert_eq!(inflight.len(), 2);

    inflight.remove(a);
    assert_eq!(inflight.len(), 1);
    // Removing twice is harmless.
    inflight.remove(a);
    assert_eq!(inflight.len(), 1);

    inflight.remove(b);
    assert!(inflight.is_empty());
}

#[tokio::test]
async fn drain_returns_immediately_when_empty() -> Result<()> {
    let inflight = Inflight::new();
    timeout(Duration::from_secs(1), inflight.drain(Duration::from_secs(1))).await?;
    Ok(())
}

#[tokio::test]
async fn drain_waits_for_the_last_record() -> Result<()> {
    let inflight = Arc::new(Inflight::new());
    let id = inflight.insert(0);

    let remover = {
        let inflight = Arc::clone(&inflight);
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            inflight.remove(id);
        })
    };

    timeout(Duration::from_secs(5), inflight.drain(Duration::from_millis(10))).await?;
    assert!(inflight.is_empty());
    remover.await?;
    Ok(())
}
