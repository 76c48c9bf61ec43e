// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Out-of-band device control.
//!
//! Both helpers are best-effort one-shots against a device that may already
//! be gone: failures are logged, never returned. They are the escape hatch
//! for a stuck device and the resize path for a running one.

use std::{fs::OpenOptions, path::Path};

use tracing::{error, info, warn};

use crate::nbd::ioctl;

/// Forcibly disconnect `/dev/nbdN`, unblocking whatever thread is parked
/// in `NBD_DO_IT` for it.
pub fn disconnect(dev_path: impl AsRef<Path>) {
    let dev_path = dev_path.as_ref();
    let nbd = match OpenOptions::new().read(true).write(true).open(dev_path) {
        Ok(f) => f,
        Err(e) => {
            error!(
                "Cannot open NBD {}: {e}. Please ensure the 'nbd' module is loaded.",
                dev_path.display()
            );
            return;
        },
    };

    if let Err(e) = ioctl::disconnect(&nbd) {
        warn!("NBD_DISCONNECT failed on {}: {e}", dev_path.display());
    }
    if let Err(e) = ioctl::clear_sock(&nbd) {
        warn!("NBD_CLEAR_SOCK failed on {}: {e}", dev_path.display());
    }
    info!("disconnected [{}]", dev_path.display());
}

/// Resize a running device.
pub fn set_size(dev_path: impl AsRef<Path>, size_bytes: u64) {
    let dev_path = dev_path.as_ref();
    let nbd = match OpenOptions::new().read(true).write(true).open(dev_path) {
        Ok(f) => f,
        Err(e) => {
            error!(
                "Cannot open NBD {}: {e}. Please ensure the 'nbd' module is loaded.",
                dev_path.display()
            );
            return;
        },
    };

    if let Err(e) = ioctl::set_size(&nbd, size_bytes) {
        warn!("NBD_SET_SIZE failed on {}: {e}", dev_path.display());
    }
}
