// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bitflags::bitflags;

bitflags! {
    /// Transmission flags handed to the kernel via `NBD_SET_FLAGS`.
    ///
    /// `HAS_FLAGS` is mandatory whenever any other bit is set; the kernel
    /// ignores the word entirely without it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransmissionFlags: u32 {
        const HAS_FLAGS  = 1 << 0;
        const READ_ONLY  = 1 << 1;
        const SEND_FLUSH = 1 << 2;
        const SEND_FUA   = 1 << 3;
        const ROTATIONAL = 1 << 4;
        const SEND_TRIM  = 1 << 5;
    }
}

impl TransmissionFlags {
    /// Flags advertised for a device: flush and trim are always requested,
    /// the running kernel's `NBD_SET_FLAGS` result decides actual support.
    pub fn for_device(read_only: bool) -> Self {
        let mut flags = Self::HAS_FLAGS | Self::SEND_FLUSH | Self::SEND_TRIM;
        if read_only {
            flags |= Self::READ_ONLY;
        }
        flags
    }
}
