// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NBD command tags as defined by the kernel uapi (`linux/nbd.h`).
//!
//! The tag travels in the `type` field of every request header. Only the
//! five classic commands are serviced; anything else is answered with
//! `EINVAL` without reaching a handler.

use std::convert::TryFrom;

use thiserror::Error;

/// Commands the kernel NBD driver may issue on the session socket.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Read = 0,
    Write = 1,
    /// Disconnect notification. Terminates the session; carries no reply.
    Disc = 2,
    Flush = 3,
    Trim = 4,
}

impl Command {
    #[inline]
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Read,
            1 => Self::Write,
            2 => Self::Disc,
            3 => Self::Flush,
            4 => Self::Trim,
            _ => return None,
        })
    }

    /// WRITE is the only command that carries payload after the header.
    #[inline]
    pub fn has_payload(&self) -> bool {
        matches!(self, Self::Write)
    }
}

/// Returned when the request `type` field holds an undefined tag.
#[derive(Debug, Error)]
#[error("unknown NBD command: {0:#010x}")]
pub struct UnknownCommand(pub u32);

impl TryFrom<u32> for Command {
    type Error = UnknownCommand;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Self::from_u32(v).ok_or(UnknownCommand(v))
    }
}
