// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Library entry points: wire a [`BlockDevice`] to `/dev/nbdN` and serve it.

use std::{fs::OpenOptions, os::fd::OwnedFd, path::Path, sync::Arc};

use anyhow::{Context, Result};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use tokio::net::UnixStream;
use tracing::{info, warn};

use crate::{
    cfg::config::ShutdownConfig,
    device::BlockDevice,
    models::TransmissionFlags,
    nbd::{binder, ioctl},
    pool::{self, WorkerPool},
    session::Session,
};

/// Keeps the global device counter balanced across every exit path.
struct DeviceGuard;

impl DeviceGuard {
    fn attach() -> Self {
        pool::attach_device();
        Self
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        pool::detach_device();
    }
}

/// Export `device` on `dev_path` and serve requests until the kernel
/// disconnects it.
///
/// Runs the ingress loop on the caller's task; handlers execute on the
/// process-wide worker pool. Returns after every accepted request has been
/// answered and the session is torn down.
pub async fn run_device<D: BlockDevice>(
    dev_path: impl AsRef<Path>,
    device: Arc<D>,
) -> Result<()> {
    run_device_with(
        dev_path,
        device,
        WorkerPool::shared().clone(),
        &ShutdownConfig::default(),
    )
    .await
}

/// [`run_device`] with an injected pool and shutdown tuning, for callers
/// that want to avoid the process-wide singleton.
pub async fn run_device_with<D: BlockDevice>(
    dev_path: impl AsRef<Path>,
    device: Arc<D>,
    pool: WorkerPool,
    shutdown: &ShutdownConfig,
) -> Result<()> {
    let dev_path = dev_path.as_ref();
    let geo = device.geometry();
    geo.validate()?;

    let _guard = DeviceGuard::attach();

    let (parent_fd, child_fd) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .context("failed to create socket pair")?;

    let nbd = OpenOptions::new()
        .read(true)
        .write(true)
        .open(dev_path)
        .with_context(|| {
            format!(
                "Cannot open NBD {}. Please ensure the 'nbd' module is loaded.",
                dev_path.display()
            )
        })?;

    if let Err(e) = ioctl::set_blksize(&nbd, geo.block_size) {
        warn!("NBD_SET_BLKSIZE failed on {}: {e}", dev_path.display());
    }
    if let Err(e) = ioctl::set_size_blocks(&nbd, geo.size_blocks()) {
        warn!("NBD_SET_SIZE_BLOCKS failed on {}: {e}", dev_path.display());
    }
    if let Err(e) = ioctl::clear_sock(&nbd) {
        warn!("NBD_CLEAR_SOCK failed on {}: {e}", dev_path.display());
    }

    let flags = TransmissionFlags::for_device(geo.read_only);

    // Both ends non-blocking: the session half for the runtime's readiness
    // model, the kernel half as the driver expects it.
    let parent: std::os::unix::net::UnixStream = parent_fd.into();
    parent.set_nonblocking(true)?;
    let child: std::os::unix::net::UnixStream = child_fd.into();
    child.set_nonblocking(true)?;
    let child: OwnedFd = child.into();

    let binder_nbd = nbd
        .try_clone()
        .context("failed to clone nbd device handle")?;
    binder::spawn(
        binder_nbd,
        child,
        flags.bits(),
        dev_path.display().to_string(),
    );

    let stream = UnixStream::from_std(parent)?;
    let session = Session::new(stream, device, pool, shutdown.drain_poll);

    info!(
        "serving {} ({} bytes, block size {})",
        dev_path.display(),
        geo.size_bytes,
        geo.block_size
    );
    session.serve().await;

    if let Err(e) = ioctl::clear_sock(&nbd) {
        warn!("NBD_CLEAR_SOCK failed on {}: {e}", dev_path.display());
    }

    info!("{} exited", dev_path.display());
    Ok(())
}
