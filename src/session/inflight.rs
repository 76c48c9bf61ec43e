// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Registry of accepted-but-unanswered requests.
//!
//! Records are keyed by a monotonically assigned id: inserted on ingress
//! before the request is handed to the pool, removed by the worker after
//! the reply is fully on the wire. Teardown uses the registry as a drain
//! barrier so no handler outlives its session.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Inflight {
    records: DashMap<u64, u32>,
    next_id: AtomicU64,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding request; returns its record id.
    pub fn insert(&self, cmd: u32) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.records.insert(id, cmd);
        id
    }

    /// Unregister after the reply has been written. Idempotent.
    pub fn remove(&self, id: u64) {
        self.records.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Block until every outstanding request has completed. Workers always
    /// run to completion, so this terminates once the pool has serviced
    /// everything accepted before shutdown.
    pub async fn drain(&self, poll: Duration) {
        loop {
            let left = self.records.len();
            if left == 0 {
                return;
            }
            debug!(left, "waiting for in-flight requests");
            sleep(poll).await;
        }
    }
}
