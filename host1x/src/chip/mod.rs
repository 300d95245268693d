// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chip support abstraction.
//!
//! Each host1x generation implements [`ChipOps`] once; the engine selects an
//! implementation at construction time and never swaps it afterwards.

pub mod t20;

use host1x_common::Host1xResult;

use crate::device::{DeviceInfo, ModuleDevice};
use crate::registers::RegisterFile;

/// Holder of a hardware module lock, as mirrored into `MLOCK_OWNER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlockOwner {
    Free,
    Cpu,
    Channel(u32),
}

/// Register-level operations of one host1x generation.
pub trait ChipOps: Send + Sync {
    /// Chip name for logs and the debug dump.
    fn name(&self) -> &'static str;

    /// Fixed capacities and syncpoint metadata.
    fn info(&self) -> &DeviceInfo;

    /// The module device table registered at init.
    fn devices(&self) -> Vec<ModuleDevice>;

    // Syncpoints

    fn syncpt_load(&self, regs: &RegisterFile, id: u32) -> u32;
    fn syncpt_reset(&self, regs: &RegisterFile, id: u32, value: u32);
    fn syncpt_cpu_incr(&self, regs: &RegisterFile, id: u32);
    fn wait_base_load(&self, regs: &RegisterFile, base: u32) -> u32;
    fn wait_base_store(&self, regs: &RegisterFile, base: u32, value: u32);

    // Threshold interrupts

    fn intr_set_threshold(&self, regs: &RegisterFile, id: u32, threshold: u32);
    fn intr_enable(&self, regs: &RegisterFile, id: u32);
    fn intr_disable(&self, regs: &RegisterFile, id: u32);
    /// Pending threshold interrupts, masked by the enable mask.
    fn intr_pending(&self, regs: &RegisterFile) -> u32;
    fn intr_ack(&self, regs: &RegisterFile, mask: u32);

    // Channel errors

    /// Bitmap of channels with a latched fault.
    fn channel_faults(&self, regs: &RegisterFile) -> u32;
    fn channel_fault_code(&self, regs: &RegisterFile, ch: u32) -> u32;
    fn channel_fault_ack(&self, regs: &RegisterFile, ch: u32);

    // Module locks

    fn mlock_update(&self, regs: &RegisterFile, id: u32, owner: MlockOwner);

    // Channel DMA

    /// Program an empty ring of `size_words` words and start the DMA engine.
    /// Fails without touching the channel if the ring cannot be addressed.
    fn cdma_start(&self, regs: &RegisterFile, ch: u32, size_words: usize) -> Host1xResult<()>;
    /// Publish a new write pointer (in words).
    fn cdma_kick(&self, regs: &RegisterFile, ch: u32, put: u32);
    /// Current hardware read pointer (in words).
    fn cdma_get(&self, regs: &RegisterFile, ch: u32) -> u32;
    /// Current published write pointer (in words).
    fn cdma_put(&self, regs: &RegisterFile, ch: u32) -> u32;
    /// Advance the hardware read pointer (in words).
    fn cdma_set_get(&self, regs: &RegisterFile, ch: u32, get: u32);
    /// Stop DMA and rewind both pointers.
    fn cdma_reset(&self, regs: &RegisterFile, ch: u32);
}
