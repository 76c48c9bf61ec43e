// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared worker pool.
//!
//! A fixed set of executor tasks drains one bounded FIFO queue. Submission
//! is best-effort: when the queue is full the task is handed back and the
//! caller runs it inline, trading a short ingress stall for a hard bound on
//! queued memory.
//!
//! One pool is shared by every session in the process. It is created lazily
//! on the first device attach and never torn down while sessions exist.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, mpsc, mpsc::error::TrySendError};
use tracing::info;

use crate::cfg::config::PoolConfig;

/// Unit of work accepted by the pool.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

static SHARED: OnceCell<WorkerPool> = OnceCell::new();
static DEVICES: AtomicUsize = AtomicUsize::new(0);

/// Handle to a fixed-size executor pool. Cheap to clone; all clones feed
/// the same queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    queue: mpsc::Sender<Task>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `cfg.workers` executors behind a `cfg.queue_depth`-slot queue.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(cfg: &PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(cfg.queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..cfg.workers {
            let rx = Arc::clone(&rx);
            tokio::spawn(worker_loop(rx));
        }

        info!(
            workers = cfg.workers,
            queue_depth = cfg.queue_depth,
            "started worker pool"
        );

        Self {
            queue: tx,
            workers: cfg.workers,
        }
    }

    /// The process-wide pool, created with [`PoolConfig::default`] on first
    /// use. Workers are spawned on the runtime of the first caller.
    pub fn shared() -> &'static WorkerPool {
        SHARED.get_or_init(|| WorkerPool::new(&PoolConfig::default()))
    }

    /// Best-effort enqueue. On a full (or closed) queue the task is handed
    /// back so the caller can execute it inline.
    pub fn try_submit(&self, task: Task) -> Result<(), Task> {
        self.queue.try_send(task).map_err(|e| match e {
            TrySendError::Full(t) | TrySendError::Closed(t) => t,
        })
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }
}

async fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Task>>>) {
    loop {
        // Pull under the lock, run outside it, so the queue keeps draining
        // while this worker is busy.
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        match task {
            Some(task) => task.await,
            None => break,
        }
    }
}

/// Register one more exported device; returns the new count.
pub fn attach_device() -> usize {
    let n = DEVICES.fetch_add(1, Ordering::SeqCst) + 1;
    info!(devices = n, "device attached");
    n
}

/// Unregister a device at session teardown; returns the new count.
pub fn detach_device() -> usize {
    let n = DEVICES.fetch_sub(1, Ordering::SeqCst) - 1;
    info!(devices = n, "device detached");
    n
}

/// Number of sessions currently attached to the shared pool.
pub fn device_count() -> usize {
    DEVICES.load(Ordering::SeqCst)
}
