// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Thin safe wrappers over the NBD device ioctls.
//!
//! Request codes are `_IO(0xab, n)` per `linux/nbd.h`; the adapter must
//! match the running kernel's numbering, so they are derived with nix's
//! request-code macro rather than hardcoded.

use std::{fs::File, os::fd::AsRawFd, os::unix::io::RawFd};

use nix::{errno::Errno, request_code_none};

const NBD_IOC_MAGIC: u8 = 0xab;

const NBD_SET_SOCK: libc::c_ulong = request_code_none!(NBD_IOC_MAGIC, 0) as libc::c_ulong;
const NBD_SET_BLKSIZE: libc::c_ulong =
    request_code_none!(NBD_IOC_MAGIC, 1) as libc::c_ulong;
const NBD_SET_SIZE: libc::c_ulong = request_code_none!(NBD_IOC_MAGIC, 2) as libc::c_ulong;
const NBD_DO_IT: libc::c_ulong = request_code_none!(NBD_IOC_MAGIC, 3) as libc::c_ulong;
const NBD_CLEAR_SOCK: libc::c_ulong =
    request_code_none!(NBD_IOC_MAGIC, 4) as libc::c_ulong;
const NBD_CLEAR_QUE: libc::c_ulong =
    request_code_none!(NBD_IOC_MAGIC, 5) as libc::c_ulong;
const NBD_SET_SIZE_BLOCKS: libc::c_ulong =
    request_code_none!(NBD_IOC_MAGIC, 7) as libc::c_ulong;
const NBD_DISCONNECT: libc::c_ulong =
    request_code_none!(NBD_IOC_MAGIC, 8) as libc::c_ulong;
const NBD_SET_FLAGS: libc::c_ulong =
    request_code_none!(NBD_IOC_MAGIC, 10) as libc::c_ulong;

fn ioctl_none(nbd: &File, request: libc::c_ulong) -> nix::Result<()> {
    let res = unsafe { libc::ioctl(nbd.as_raw_fd(), request) };
    Errno::result(res).map(drop)
}

fn ioctl_arg(nbd: &File, request: libc::c_ulong, arg: libc::c_ulong) -> nix::Result<()> {
    let res = unsafe { libc::ioctl(nbd.as_raw_fd(), request, arg) };
    Errno::result(res).map(drop)
}

/// Hand one end of the socket pair to the kernel driver.
pub fn set_sock(nbd: &File, sock: RawFd) -> nix::Result<()> {
    ioctl_arg(nbd, NBD_SET_SOCK, sock as libc::c_ulong)
}

pub fn set_blksize(nbd: &File, block_size: u32) -> nix::Result<()> {
    ioctl_arg(nbd, NBD_SET_BLKSIZE, libc::c_ulong::from(block_size))
}

pub fn set_size(nbd: &File, size_bytes: u64) -> nix::Result<()> {
    ioctl_arg(nbd, NBD_SET_SIZE, size_bytes as libc::c_ulong)
}

pub fn set_size_blocks(nbd: &File, blocks: u64) -> nix::Result<()> {
    ioctl_arg(nbd, NBD_SET_SIZE_BLOCKS, blocks as libc::c_ulong)
}

pub fn set_flags(nbd: &File, flags: u32) -> nix::Result<()> {
    ioctl_arg(nbd, NBD_SET_FLAGS, libc::c_ulong::from(flags))
}

/// Drive the device. Blocks inside the kernel for the device's lifetime;
/// returns when the device is disconnected or the socket is cleared.
pub fn do_it(nbd: &File) -> nix::Result<()> {
    ioctl_none(nbd, NBD_DO_IT)
}

pub fn clear_sock(nbd: &File) -> nix::Result<()> {
    ioctl_none(nbd, NBD_CLEAR_SOCK)
}

pub fn clear_que(nbd: &File) -> nix::Result<()> {
    ioctl_none(nbd, NBD_CLEAR_QUE)
}

pub fn disconnect(nbd: &File) -> nix::Result<()> {
    ioctl_none(nbd, NBD_DISCONNECT)
}
