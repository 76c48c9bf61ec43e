// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Kernel attachment for one device.
//!
//! `NBD_DO_IT` is a blocking ioctl that must keep a thread parked in the
//! kernel for the device's whole lifetime. The attach sequence therefore
//! runs on a dedicated blocking thread: hand over the socket, set the
//! transmission flags, park in `NBD_DO_IT`, and clear the queue and socket
//! once the device is removed. The thread is detached; teardown is driven
//! from the session side via `NBD_CLEAR_SOCK` / `NBD_DISCONNECT`.

use std::{
    fs::File,
    os::fd::{AsRawFd, OwnedFd},
};

use tracing::{error, info, warn};

use crate::nbd::ioctl;

/// Spawn the blocking attach thread. `nbd` is an independent handle to the
/// device file; `sock` is the kernel-side end of the socket pair and is
/// closed when the thread exits (the driver keeps its own reference).
pub fn spawn(nbd: File, sock: OwnedFd, flags: u32, dev_path: String) {
    let _detached =
        tokio::task::spawn_blocking(move || attach(&nbd, &sock, flags, &dev_path));
}

fn attach(nbd: &File, sock: &OwnedFd, flags: u32, dev_path: &str) {
    if let Err(e) = ioctl::set_sock(nbd, sock.as_raw_fd()) {
        error!("NBD_SET_SOCK failed on {dev_path}: {e}");
    } else if let Err(e) = ioctl::set_flags(nbd, flags) {
        // Old kernels reject flags they do not know; the device still runs
        // without flush/trim.
        warn!("NBD_SET_FLAGS ({flags:#x}) failed on {dev_path}: {e}");
    } else {
        match ioctl::do_it(nbd) {
            Ok(()) => info!("nbd device {dev_path} terminated"),
            Err(e) => warn!("nbd device {dev_path} terminated: {e}"),
        }
    }

    if let Err(e) = ioctl::clear_que(nbd) {
        warn!("NBD_CLEAR_QUE failed on {dev_path}: {e}");
    }
    if let Err(e) = ioctl::clear_sock(nbd) {
        warn!("NBD_CLEAR_SOCK failed on {dev_path}: {e}");
    }
}
