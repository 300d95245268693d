// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! File-descriptor table in front of the nvhost nodes.
//!
//! Routes `open`, `ioctl` and `close` to the device implementations in
//! `devices`.

use std::collections::HashMap;
use std::sync::Arc;

use host1x::HostEngine;
use host1x_common::error::errno;

use crate::devices::{self, NvhostDevice};

pub struct NvhostDriver {
    engine: Arc<HostEngine>,
    /// Map of file descriptor → open node.
    files: HashMap<u32, Box<dyn NvhostDevice>>,
    next_fd: u32,
}

impl NvhostDriver {
    pub fn new(engine: Arc<HostEngine>) -> Self {
        Self {
            engine,
            files: HashMap::new(),
            next_fd: 1,
        }
    }

    pub fn engine(&self) -> &Arc<HostEngine> {
        &self.engine
    }

    /// Every node path this engine exposes.
    pub fn device_paths(&self) -> Vec<String> {
        std::iter::once("/dev/nvhost-ctrl".to_string())
            .chain(
                self.engine
                    .devices()
                    .iter()
                    .filter(|m| m.index.is_some())
                    .map(|m| format!("/dev/nvhost-{}", m.name)),
            )
            .collect()
    }

    /// Open `path`. Returns the new descriptor or an errno.
    pub fn open(&mut self, path: &str) -> Result<u32, u32> {
        let device = devices::create_device(path, &self.engine)?;
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, device);
        log::debug!("nvhost: open(\"{}\") -> fd={}", path, fd);
        Ok(fd)
    }

    pub fn ioctl(&mut self, fd: u32, cmd: u32, input: &[u8], output: &mut [u8]) -> u32 {
        let Some(device) = self.files.get_mut(&fd) else {
            log::warn!("nvhost: ioctl on invalid fd={}", fd);
            return errno::EINVAL;
        };
        log::trace!("nvhost: ioctl fd={} ({}), cmd=0x{:08X}", fd, device.name(), cmd);
        device.ioctl(cmd, input, output)
    }

    /// Close `fd`; the node releases whatever it holds.
    pub fn close(&mut self, fd: u32) -> u32 {
        match self.files.remove(&fd) {
            Some(device) => {
                log::debug!("nvhost: close fd={} ({})", fd, device.name());
                0
            }
            None => {
                log::warn!("nvhost: close on invalid fd={}", fd);
                errno::EINVAL
            }
        }
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
