// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Module device descriptions.
//!
//! A module device is a hardware unit that feeds commands through host1x:
//! display, 2D, 3D, video input, the MPEG encoder and so on. Behavior
//! differences between modules are carried as data (`ModuleFlags` and the
//! resource masks), never as separate types.

use bitflags::bitflags;

use host1x_common::{bits, RegistrationError};

bitflags! {
    /// Capability flags of a module device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModuleFlags: u32 {
        /// Only one client may hold the module's channel at a time.
        const EXCLUSIVE = 1 << 0;
        /// Command streams must run strictly one after another.
        const SERIALIZE = 1 << 1;
        /// Keep the module powered while a channel is open.
        const KEEPALIVE = 1 << 2;
        /// Wait-bases are synchronized on every submit.
        const WAITBASE_SYNC = 1 << 3;
    }
}

/// Clock requested by a module, at `rate` Hz (`u32::MAX` = maximum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSpec {
    pub name: &'static str,
    pub rate: u32,
}

impl ClockSpec {
    pub const fn max(name: &'static str) -> Self {
        Self {
            name,
            rate: u32::MAX,
        }
    }
}

/// Static description of one host1x client module.
#[derive(Debug, Clone)]
pub struct ModuleDevice {
    pub name: &'static str,
    /// Channel index, `None` for the host1x master itself.
    pub index: Option<u32>,
    pub version: u32,
    pub syncpts: u32,
    pub waitbases: u32,
    pub modulemutexes: u32,
    pub flags: ModuleFlags,
    /// Hardware class id, 0 when the module has none.
    pub class: u32,
    pub clocks: &'static [ClockSpec],
    pub powergate_ids: &'static [u32],
}

impl ModuleDevice {
    pub fn is_serialized(&self) -> bool {
        self.flags.contains(ModuleFlags::SERIALIZE)
    }

    pub fn is_exclusive(&self) -> bool {
        self.flags.contains(ModuleFlags::EXCLUSIVE)
    }

    pub fn owns_syncpoint(&self, id: u32) -> bool {
        id < 32 && self.syncpts & (1 << id) != 0
    }

    /// Lowest syncpoint owned by the module, the one used for job fences.
    pub fn primary_syncpoint(&self) -> Option<u32> {
        bits(self.syncpts).next()
    }
}

/// Fixed capacities and syncpoint metadata of a host1x generation.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub nb_channels: usize,
    pub nb_pts: usize,
    pub nb_mlocks: usize,
    pub nb_bases: usize,
    pub syncpt_names: &'static [&'static str],
    pub client_managed: u32,
}

/// Check a device table before it is registered with the host.
///
/// Syncpoint masks must be pairwise disjoint, channel indices must fit the
/// channel array and mutex masks must fit the hardware lock count.
pub fn validate_devices(
    devices: &[ModuleDevice],
    info: &DeviceInfo,
) -> Result<(), RegistrationError> {
    for (i, dev) in devices.iter().enumerate() {
        if let Some(index) = dev.index {
            if index as usize >= info.nb_channels {
                return Err(RegistrationError::ChannelIndexOutOfRange {
                    module: dev.name,
                    index,
                    channels: info.nb_channels,
                });
            }
        }
        if info.nb_mlocks < 32 && dev.modulemutexes >> info.nb_mlocks != 0 {
            return Err(RegistrationError::MutexOutOfRange {
                module: dev.name,
                mask: dev.modulemutexes,
                locks: info.nb_mlocks,
            });
        }
        for other in &devices[i + 1..] {
            if other.name == dev.name {
                return Err(RegistrationError::DuplicateName(dev.name));
            }
            let shared = dev.syncpts & other.syncpts;
            if shared != 0 {
                return Err(RegistrationError::OverlappingSyncpoints {
                    first: dev.name,
                    second: other.name,
                    mask: shared,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DeviceInfo {
        DeviceInfo {
            nb_channels: 2,
            nb_pts: 32,
            nb_mlocks: 16,
            nb_bases: 8,
            syncpt_names: &[],
            client_managed: 0,
        }
    }

    fn dev(name: &'static str, index: u32, syncpts: u32) -> ModuleDevice {
        ModuleDevice {
            name,
            index: Some(index),
            version: 0,
            syncpts,
            waitbases: 0,
            modulemutexes: 0,
            flags: ModuleFlags::empty(),
            class: 0,
            clocks: &[],
            powergate_ids: &[],
        }
    }

    #[test]
    fn test_disjoint_table_accepted() {
        let devs = vec![dev("a", 0, 0b0011), dev("b", 1, 0b1100)];
        assert!(validate_devices(&devs, &info()).is_ok());
    }

    #[test]
    fn test_overlap_rejected() {
        let devs = vec![dev("a", 0, 0b0011), dev("b", 1, 0b0110)];
        assert_eq!(
            validate_devices(&devs, &info()),
            Err(RegistrationError::OverlappingSyncpoints {
                first: "a",
                second: "b",
                mask: 0b0010
            })
        );
    }

    #[test]
    fn test_channel_index_out_of_range() {
        let devs = vec![dev("a", 2, 0)];
        assert!(matches!(
            validate_devices(&devs, &info()),
            Err(RegistrationError::ChannelIndexOutOfRange { index: 2, .. })
        ));
    }

    #[test]
    fn test_flags() {
        let mut d = dev("gr2d", 0, 1 << 18 | 1 << 19);
        d.flags = ModuleFlags::SERIALIZE;
        assert!(d.is_serialized());
        assert!(!d.is_exclusive());
        assert_eq!(d.primary_syncpoint(), Some(18));
        assert!(d.owns_syncpoint(19));
        assert!(!d.owns_syncpoint(40));
    }
}
