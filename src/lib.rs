// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod adapter;
pub mod cfg;
pub mod device;
pub mod models;
pub mod nbd;
pub mod pool;
pub mod session;

pub use adapter::{run_device, run_device_with};
pub use device::{BlockDevice, Geometry};
pub use models::Status;
pub use nbd::control::{disconnect, set_size};
