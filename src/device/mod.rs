// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The capability surface a backing store implements to become a block
//! device.
//!
//! The session engine is storage-agnostic: it hands every kernel request to
//! one of these operations and forwards the returned [`Status`] in the
//! reply. Handlers may suspend for arbitrarily long; outstanding operations
//! are always run to completion before the session tears down.

use anyhow::{Result, ensure};

use crate::models::Status;

/// Static attributes of an exported device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Device block size in bytes.
    pub block_size: u32,
    /// Total device size in bytes. Must be a multiple of `block_size`.
    pub size_bytes: u64,
    /// Advertise the device read-only to the kernel.
    pub read_only: bool,
}

impl Geometry {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.block_size > 0, "block_size must be > 0");
        ensure!(
            self.size_bytes % u64::from(self.block_size) == 0,
            "size_bytes ({}) must be a multiple of block_size ({})",
            self.size_bytes,
            self.block_size
        );
        Ok(())
    }

    /// Device size in block units, as `NBD_SET_SIZE_BLOCKS` expects it.
    #[inline]
    pub fn size_blocks(&self) -> u64 {
        self.size_bytes / u64::from(self.block_size)
    }
}

/// User-supplied I/O handlers behind the adapter.
///
/// `buf.len()` carries the request length for reads and writes; `offset` is
/// the byte offset the kernel asked for. A nonzero [`Status`] travels back
/// to the kernel in the reply `error` field and does not terminate the
/// session.
pub trait BlockDevice: Send + Sync + 'static {
    fn geometry(&self) -> Geometry;

    /// Fill `buf` from the backing store starting at `offset`.
    fn read(&self, buf: &mut [u8], offset: u64) -> impl Future<Output = Status> + Send;

    /// Persist `buf` to the backing store starting at `offset`.
    fn write(&self, buf: &[u8], offset: u64) -> impl Future<Output = Status> + Send;

    /// Flush all completed writes to stable storage.
    fn flush(&self) -> impl Future<Output = Status> + Send;

    /// Discard `len` bytes starting at `offset`.
    fn trim(&self, offset: u64, len: u32) -> impl Future<Output = Status> + Send;

    /// Fire-and-forget notification that the kernel disconnected the
    /// device. No reply frame is associated with it.
    fn disconnect(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}
