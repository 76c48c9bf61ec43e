// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Handler status codes.
//!
//! The reply `error` field mirrors POSIX `errno` values as 32-bit unsigned
//! integers; zero means success. Handlers return [`Status`] and the session
//! forwards it to the kernel untouched.

use core::fmt;
use std::io;

/// 32-bit NBD status code carried in the reply `error` field.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Status(u32);

impl Status {
    pub const OK: Self = Self(0);
    /// Operation not permitted (write on a read-only device).
    pub const EPERM: Self = Self(1);
    /// I/O error, the catch-all backing-store failure.
    pub const EIO: Self = Self(5);
    pub const ENOMEM: Self = Self(12);
    /// Invalid request (unknown command, out-of-range access).
    pub const EINVAL: Self = Self(22);
    pub const ENOSPC: Self = Self(28);

    #[inline]
    pub const fn errno(code: u32) -> Self {
        Self(code)
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(code) if code > 0 => Self(code as u32),
            _ => Self::EIO,
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OK => write!(f, "Status::OK"),
            Self(code) => write!(f, "Status(errno {code})"),
        }
    }
}
