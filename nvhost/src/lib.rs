// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! nvhost character-device layer over the host1x engine.

pub mod devices;
pub mod driver;

pub use devices::{create_device, ioctl_code, NvhostChannel, NvhostCtrl, NvhostDevice};
pub use driver::NvhostDriver;
