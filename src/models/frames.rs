// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-layout NBD wire frames.
//!
//! Both frames are packed, big-endian throughout, and must stay
//! byte-identical to `struct nbd_request` / `struct nbd_reply` in
//! `linux/nbd.h` — the kernel driver reads them straight off the socket.
//!
//! ```text
//! request (28 B): magic u32 | type u32 | handle [8] | offset u64 | len u32
//! reply   (16 B): magic u32 | error u32 | handle [8]
//! ```
//!
//! The `handle` is an opaque correlation token chosen by the kernel and
//! echoed verbatim in the matching reply; the adapter never interprets it.

use core::fmt;

use anyhow::Result;
use zerocopy::{
    BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::command::{Command, UnknownCommand};

pub const NBD_REQUEST_MAGIC: u32 = 0x2560_9513;
pub const NBD_REPLY_MAGIC: u32 = 0x6744_6698;

/// Size of the request frame on the wire.
pub const REQUEST_LEN: usize = 28;
/// Size of the reply frame on the wire.
pub const REPLY_LEN: usize = 16;

/// Request header as issued by the kernel NBD driver.
#[repr(C)]
#[derive(Default, Clone, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RequestHeader {
    pub magic: U32<BigEndian>,  // 0..4
    pub cmd: U32<BigEndian>,    // 4..8
    pub handle: [u8; 8],        // 8..16
    pub offset: U64<BigEndian>, // 16..24
    pub len: U32<BigEndian>,    // 24..28
}

const _: () = assert!(size_of::<RequestHeader>() == REQUEST_LEN);

impl RequestHeader {
    pub fn from_bytes(buf: &[u8]) -> Result<&Self> {
        <Self as FromBytes>::ref_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed to convert buffer RequestHeader: {e}"))
    }

    /// Decode the command tag; the raw value is preserved in the error so
    /// the session can still answer `EINVAL` with the right handle.
    #[inline]
    pub fn command(&self) -> Result<Command, UnknownCommand> {
        Command::try_from(self.cmd.get())
    }
}

impl fmt::Debug for RequestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHeader")
            .field("magic", &format_args!("{:#010x}", self.magic.get()))
            .field("cmd", &self.cmd.get())
            .field("handle", &format_args!("{:02x?}", self.handle))
            .field("offset", &self.offset.get())
            .field("len", &self.len.get())
            .finish()
    }
}

/// Reply header emitted by the adapter. `magic` is always
/// [`NBD_REPLY_MAGIC`]; `error` is a 32-bit status code, zero on success.
#[repr(C)]
#[derive(Clone, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ReplyHeader {
    pub magic: U32<BigEndian>, // 0..4
    pub error: U32<BigEndian>, // 4..8
    pub handle: [u8; 8],       // 8..16
}

const _: () = assert!(size_of::<ReplyHeader>() == REPLY_LEN);

impl ReplyHeader {
    /// A success reply echoing the request handle.
    pub fn new(handle: [u8; 8]) -> Self {
        Self {
            magic: U32::new(NBD_REPLY_MAGIC),
            error: U32::new(0),
            handle,
        }
    }

    #[inline]
    pub fn set_error(&mut self, error: u32) {
        self.error.set(error);
    }

    pub fn from_bytes(buf: &[u8]) -> Result<&Self> {
        <Self as FromBytes>::ref_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed to convert buffer ReplyHeader: {e}"))
    }
}

impl fmt::Debug for ReplyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHeader")
            .field("magic", &format_args!("{:#010x}", self.magic.get()))
            .field("error", &self.error.get())
            .field("handle", &format_args!("{:02x?}", self.handle))
            .finish()
    }
}
