// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Simulated host1x register aperture.
//!
//! The sync bank follows the host1x01 layout bit-exactly for the registers
//! the engine touches (syncpoint values, thresholds, wait-bases, interrupt
//! status/enable, module locks). Each channel gets a small bank holding the
//! DMA pointers. Channel fault reporting does not exist on real silicon in
//! this form and is simulated through `CH_ERR_STATUS` plus a per-channel
//! `FAULT` register.
//!
//! Writes with hardware side effects (CPU increment, write-1-to-clear status,
//! threshold and enable changes) re-evaluate the threshold comparators and
//! raise the interrupt line when an enabled syncpoint crosses its threshold.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use host1x_common::{bits, syncpoint_reached, NB_CHANNELS, NB_PTS};

/// Sync register bank offsets (bytes).
pub mod sync {
    pub const HINTSTATUS: u32 = 0x20;
    /// Simulated: bitmap of channels with a pending fault.
    pub const CH_ERR_STATUS: u32 = 0x24;
    pub const SYNCPT_THRESH_CPU0_INT_STATUS: u32 = 0x40;
    pub const SYNCPT_THRESH_INT_DISABLE: u32 = 0x60;
    pub const SYNCPT_THRESH_INT_ENABLE_CPU0: u32 = 0x68;
    pub const SYNCPT_CPU_INCR: u32 = 0x700;

    pub const fn mlock(id: u32) -> u32 {
        0x2C0 + id * 4
    }

    pub const fn mlock_owner(id: u32) -> u32 {
        0x340 + id * 4
    }

    pub const fn syncpt(id: u32) -> u32 {
        0x400 + id * 4
    }

    pub const fn syncpt_int_thresh(id: u32) -> u32 {
        0x500 + id * 4
    }

    pub const fn syncpt_base(id: u32) -> u32 {
        0x600 + id * 4
    }

    /// Size of the bank in bytes.
    pub const SIZE: usize = 0x800;
}

/// Per-channel register bank offsets (bytes).
pub mod channel {
    pub const DMASTART: u32 = 0x14;
    pub const DMAPUT: u32 = 0x18;
    pub const DMAGET: u32 = 0x1C;
    pub const DMAEND: u32 = 0x20;
    pub const DMACTRL: u32 = 0x24;
    /// Simulated: fault code of the last channel error, 0 when healthy.
    pub const FAULT: u32 = 0x40;

    /// DMACTRL: DMA stopped.
    pub const DMACTRL_DMASTOP: u32 = 1 << 0;
    /// DMACTRL: reset DMAGET to DMASTART.
    pub const DMACTRL_DMAGETRST: u32 = 1 << 1;

    pub const SIZE: usize = 0x80;
}

/// Level-triggered interrupt line between the register file and the
/// dispatch thread.
pub struct IrqLine {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl IrqLine {
    fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Assert the line and wake a sleeping dispatcher.
    pub fn raise(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_all();
    }

    /// Block until the line is asserted or `timeout` expires. Returns whether
    /// the line was asserted; the assertion is consumed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *pending, false)
    }
}

/// The simulated host1x aperture.
pub struct RegisterFile {
    sync: Box<[AtomicU32]>,
    channels: Vec<Box<[AtomicU32]>>,
    /// Mirror of the threshold interrupt enable mask.
    int_enabled: AtomicU32,
    /// Serializes read-modify-write sequences that model single hardware ops.
    rmw: Mutex<()>,
    irq: IrqLine,
}

fn bank(size_bytes: usize) -> Box<[AtomicU32]> {
    (0..size_bytes / 4).map(|_| AtomicU32::new(0)).collect()
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::with_channels(NB_CHANNELS)
    }

    pub fn with_channels(nb_channels: usize) -> Self {
        Self {
            sync: bank(sync::SIZE),
            channels: (0..nb_channels).map(|_| bank(channel::SIZE)).collect(),
            int_enabled: AtomicU32::new(0),
            rmw: Mutex::new(()),
            irq: IrqLine::new(),
        }
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }

    fn sync_cell(&self, offset: u32) -> &AtomicU32 {
        &self.sync[(offset as usize / 4) % self.sync.len()]
    }

    fn channel_cell(&self, ch: u32, offset: u32) -> Option<&AtomicU32> {
        let bank = self.channels.get(ch as usize)?;
        bank.get(offset as usize / 4)
    }

    /// Read a sync bank register.
    pub fn sync_read(&self, offset: u32) -> u32 {
        self.sync_cell(offset).load(Ordering::Acquire)
    }

    /// Write a sync bank register, applying hardware side effects.
    pub fn sync_write(&self, offset: u32, value: u32) {
        let _guard = self.rmw.lock();
        match offset {
            sync::SYNCPT_CPU_INCR => {
                for id in bits(value) {
                    self.sync_cell(sync::syncpt(id)).fetch_add(1, Ordering::AcqRel);
                }
            }
            sync::SYNCPT_THRESH_CPU0_INT_STATUS | sync::CH_ERR_STATUS => {
                self.sync_cell(offset).fetch_and(!value, Ordering::AcqRel);
            }
            sync::SYNCPT_THRESH_INT_ENABLE_CPU0 => {
                self.int_enabled.fetch_or(value, Ordering::AcqRel);
            }
            sync::SYNCPT_THRESH_INT_DISABLE => {
                self.int_enabled.fetch_and(!value, Ordering::AcqRel);
            }
            _ => self.sync_cell(offset).store(value, Ordering::Release),
        }
        self.evaluate_thresholds();
    }

    /// Increment a syncpoint as the channel processor does when it executes
    /// an `INCR_SYNCPT` write.
    pub fn hw_syncpt_incr(&self, id: u32) {
        if id as usize >= NB_PTS {
            return;
        }
        let _guard = self.rmw.lock();
        self.sync_cell(sync::syncpt(id)).fetch_add(1, Ordering::AcqRel);
        self.evaluate_thresholds();
    }

    /// Mask of syncpoints with the threshold interrupt enabled.
    pub fn int_enabled(&self) -> u32 {
        self.int_enabled.load(Ordering::Acquire)
    }

    fn evaluate_thresholds(&self) {
        let enabled = self.int_enabled.load(Ordering::Acquire);
        let mut fired = 0;
        for id in bits(enabled) {
            if id as usize >= NB_PTS {
                continue;
            }
            let value = self.sync_cell(sync::syncpt(id)).load(Ordering::Acquire);
            let thresh = self.sync_cell(sync::syncpt_int_thresh(id)).load(Ordering::Acquire);
            if syncpoint_reached(value, thresh) {
                fired |= 1 << id;
            }
        }
        if fired != 0 {
            self.sync_cell(sync::SYNCPT_THRESH_CPU0_INT_STATUS)
                .fetch_or(fired, Ordering::AcqRel);
        }
        let status = self.sync_read(sync::SYNCPT_THRESH_CPU0_INT_STATUS) & enabled;
        if status != 0 || self.sync_read(sync::CH_ERR_STATUS) != 0 {
            self.irq.raise();
        }
    }

    /// Read a channel register. Out-of-range channels read as zero.
    pub fn channel_read(&self, ch: u32, offset: u32) -> u32 {
        self.channel_cell(ch, offset)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Write a channel register. `DMACTRL_DMAGETRST` rewinds DMAGET.
    pub fn channel_write(&self, ch: u32, offset: u32, value: u32) {
        let Some(cell) = self.channel_cell(ch, offset) else {
            log::warn!("regs: write to nonexistent channel {} offset 0x{:X}", ch, offset);
            return;
        };
        cell.store(value, Ordering::Release);
        if offset == channel::DMACTRL && value & channel::DMACTRL_DMAGETRST != 0 {
            let start = self.channel_read(ch, channel::DMASTART);
            if let Some(get) = self.channel_cell(ch, channel::DMAGET) {
                get.store(start, Ordering::Release);
            }
        }
    }

    /// Latch a fault on channel `ch` and raise the interrupt line.
    pub fn raise_channel_fault(&self, ch: u32, code: u32) {
        if let Some(cell) = self.channel_cell(ch, channel::FAULT) {
            cell.store(code, Ordering::Release);
        }
        let _guard = self.rmw.lock();
        self.sync_cell(sync::CH_ERR_STATUS)
            .fetch_or(1 << ch, Ordering::AcqRel);
        self.irq.raise();
    }

    pub fn nb_channels(&self) -> usize {
        self.channels.len()
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_incr_bitmap() {
        let regs = RegisterFile::new();
        regs.sync_write(sync::SYNCPT_CPU_INCR, (1 << 3) | (1 << 22));
        assert_eq!(regs.sync_read(sync::syncpt(3)), 1);
        assert_eq!(regs.sync_read(sync::syncpt(22)), 1);
        assert_eq!(regs.sync_read(sync::syncpt(4)), 0);
    }

    #[test]
    fn test_threshold_raises_status() {
        let regs = RegisterFile::new();
        regs.sync_write(sync::syncpt_int_thresh(5), 2);
        regs.sync_write(sync::SYNCPT_THRESH_INT_ENABLE_CPU0, 1 << 5);
        regs.hw_syncpt_incr(5);
        assert_eq!(regs.sync_read(sync::SYNCPT_THRESH_CPU0_INT_STATUS), 0);
        regs.hw_syncpt_incr(5);
        assert_eq!(regs.sync_read(sync::SYNCPT_THRESH_CPU0_INT_STATUS), 1 << 5);
        assert!(regs.irq().wait(Duration::from_millis(1)));

        // Write-1-to-clear.
        regs.sync_write(sync::SYNCPT_THRESH_INT_DISABLE, 1 << 5);
        regs.sync_write(sync::SYNCPT_THRESH_CPU0_INT_STATUS, 1 << 5);
        assert_eq!(regs.sync_read(sync::SYNCPT_THRESH_CPU0_INT_STATUS), 0);
    }

    #[test]
    fn test_disabled_syncpoint_does_not_fire() {
        let regs = RegisterFile::new();
        regs.sync_write(sync::syncpt_int_thresh(7), 1);
        regs.hw_syncpt_incr(7);
        assert_eq!(regs.sync_read(sync::SYNCPT_THRESH_CPU0_INT_STATUS), 0);
        assert!(!regs.irq().wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_dmaget_reset() {
        let regs = RegisterFile::new();
        regs.channel_write(2, channel::DMASTART, 0);
        regs.channel_write(2, channel::DMAGET, 0x40);
        regs.channel_write(2, channel::DMACTRL, channel::DMACTRL_DMAGETRST);
        assert_eq!(regs.channel_read(2, channel::DMAGET), 0);
    }

    #[test]
    fn test_channel_fault_latch() {
        let regs = RegisterFile::new();
        regs.raise_channel_fault(3, 0xF);
        assert_eq!(regs.sync_read(sync::CH_ERR_STATUS), 1 << 3);
        assert_eq!(regs.channel_read(3, channel::FAULT), 0xF);
        regs.sync_write(sync::CH_ERR_STATUS, 1 << 3);
        assert_eq!(regs.sync_read(sync::CH_ERR_STATUS), 0);
    }
}
