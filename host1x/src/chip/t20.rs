// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tegra20 (host1x01) chip support: syncpoint assignments, the module device
//! table and register-level operations.

use host1x_common::{bit, Host1xError, Host1xResult, NB_BASES, NB_CHANNELS, NB_MLOCKS, NB_PTS};

use super::{ChipOps, MlockOwner};
use crate::device::{ClockSpec, DeviceInfo, ModuleDevice, ModuleFlags};
use crate::opcodes::{GRAPHICS_3D_CLASS_ID, HOST1X_CLASS_ID, VIDEO_ENCODE_MPEG_CLASS_ID};
use crate::registers::{channel, sync, RegisterFile};

// Syncpoint assignments.
pub const SYNCPT_GRAPHICS_HOST: u32 = 0;
pub const SYNCPT_DISP0_A: u32 = 8;
pub const SYNCPT_DISP1_A: u32 = 9;
pub const SYNCPT_AVP_0: u32 = 10;
pub const SYNCPT_CSI_VI_0: u32 = 11;
pub const SYNCPT_CSI_VI_1: u32 = 12;
pub const SYNCPT_VI_ISP_0: u32 = 13;
pub const SYNCPT_VI_ISP_1: u32 = 14;
pub const SYNCPT_VI_ISP_2: u32 = 15;
pub const SYNCPT_VI_ISP_3: u32 = 16;
pub const SYNCPT_VI_ISP_4: u32 = 17;
pub const SYNCPT_2D_0: u32 = 18;
pub const SYNCPT_2D_1: u32 = 19;
pub const SYNCPT_DISP0_B: u32 = 20;
pub const SYNCPT_DISP1_B: u32 = 21;
pub const SYNCPT_3D: u32 = 22;
pub const SYNCPT_MPE: u32 = 23;
pub const SYNCPT_DISP0_C: u32 = 24;
pub const SYNCPT_DISP1_C: u32 = 25;
pub const SYNCPT_VBLANK0: u32 = 26;
pub const SYNCPT_VBLANK1: u32 = 27;
pub const SYNCPT_MPE_EBM_EOF: u32 = 28;
pub const SYNCPT_MPE_WR_SAFE: u32 = 29;
pub const SYNCPT_2D_TINYBLT: u32 = 30;
pub const SYNCPT_DSI: u32 = 31;

// Wait-base assignments.
pub const WAITBASE_2D_0: u32 = 1;
pub const WAITBASE_2D_1: u32 = 2;
pub const WAITBASE_3D: u32 = 3;
pub const WAITBASE_MPE: u32 = 4;

// Module mutex assignments.
pub const MODMUTEX_2D_FULL: u32 = 1;
pub const MODMUTEX_2D_SIMPLE: u32 = 2;
pub const MODMUTEX_2D_SB_A: u32 = 3;
pub const MODMUTEX_2D_SB_B: u32 = 4;
pub const MODMUTEX_3D: u32 = 5;
pub const MODMUTEX_DISPLAYA: u32 = 6;
pub const MODMUTEX_DISPLAYB: u32 = 7;
pub const MODMUTEX_VI: u32 = 8;
pub const MODMUTEX_DSI: u32 = 9;

// MLOCK_OWNER fields.
const MLOCK_OWNER_CH_OWNS: u32 = 1 << 0;
const MLOCK_OWNER_CPU_OWNS: u32 = 1 << 1;

// Power-gate partitions.
const POWERGATE_3D: u32 = 1;
const POWERGATE_MPE: u32 = 6;

static SYNCPT_NAMES: [&str; NB_PTS] = [
    "gfx_host",
    "", "", "", "", "", "", "",
    "disp0_a", "disp1_a", "avp_0",
    "csi_vi_0", "csi_vi_1",
    "vi_isp_0", "vi_isp_1", "vi_isp_2", "vi_isp_3", "vi_isp_4",
    "2d_0", "2d_1",
    "disp0_b", "disp1_b",
    "3d",
    "mpe",
    "disp0_c", "disp1_c",
    "vblank0", "vblank1",
    "mpe_ebm_eof", "mpe_wr_safe",
    "2d_tinyblt",
    "dsi",
];

/// Syncpoints incremented by their owning module rather than by queued
/// command streams; no future value is tracked for them.
pub const CLIENT_MANAGED: u32 = bit(SYNCPT_DISP0_A)
    | bit(SYNCPT_DISP1_A)
    | bit(SYNCPT_DISP0_B)
    | bit(SYNCPT_DISP1_B)
    | bit(SYNCPT_DISP0_C)
    | bit(SYNCPT_DISP1_C)
    | bit(SYNCPT_DSI)
    | bit(SYNCPT_VBLANK0)
    | bit(SYNCPT_VBLANK1)
    | bit(SYNCPT_CSI_VI_0)
    | bit(SYNCPT_CSI_VI_1)
    | bit(SYNCPT_VI_ISP_1)
    | bit(SYNCPT_VI_ISP_2)
    | bit(SYNCPT_VI_ISP_3)
    | bit(SYNCPT_VI_ISP_4)
    | bit(SYNCPT_MPE_EBM_EOF)
    | bit(SYNCPT_MPE_WR_SAFE)
    | bit(SYNCPT_2D_1)
    | bit(SYNCPT_AVP_0);

static HOST1X_CLOCKS: [ClockSpec; 1] = [ClockSpec::max("host1x")];
static GR3D_CLOCKS: [ClockSpec; 2] = [ClockSpec::max("gr3d"), ClockSpec::max("emc")];
static GR2D_CLOCKS: [ClockSpec; 3] = [
    ClockSpec::max("gr2d"),
    ClockSpec::max("epp"),
    ClockSpec::max("emc"),
];
static MPE_CLOCKS: [ClockSpec; 2] = [ClockSpec::max("mpe"), ClockSpec::max("emc")];

/// host1x01 chip support.
pub struct T20ChipOps {
    info: DeviceInfo,
}

impl T20ChipOps {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                nb_channels: NB_CHANNELS,
                nb_pts: NB_PTS,
                nb_mlocks: NB_MLOCKS,
                nb_bases: NB_BASES,
                syncpt_names: &SYNCPT_NAMES,
                client_managed: CLIENT_MANAGED,
            },
        }
    }
}

impl Default for T20ChipOps {
    fn default() -> Self {
        Self::new()
    }
}

/// The T20 module device table.
pub fn t20_devices() -> Vec<ModuleDevice> {
    vec![
        ModuleDevice {
            name: "host1x",
            index: None,
            version: 0,
            syncpts: 0,
            waitbases: 0,
            modulemutexes: 0,
            flags: ModuleFlags::empty(),
            class: HOST1X_CLASS_ID,
            clocks: &HOST1X_CLOCKS,
            powergate_ids: &[],
        },
        ModuleDevice {
            name: "display",
            index: Some(0),
            version: 0,
            syncpts: bit(SYNCPT_DISP0_A)
                | bit(SYNCPT_DISP1_A)
                | bit(SYNCPT_DISP0_B)
                | bit(SYNCPT_DISP1_B)
                | bit(SYNCPT_DISP0_C)
                | bit(SYNCPT_DISP1_C)
                | bit(SYNCPT_VBLANK0)
                | bit(SYNCPT_VBLANK1),
            waitbases: 0,
            modulemutexes: bit(MODMUTEX_DISPLAYA) | bit(MODMUTEX_DISPLAYB),
            flags: ModuleFlags::empty(),
            class: 0,
            clocks: &[],
            powergate_ids: &[],
        },
        ModuleDevice {
            name: "gr3d",
            index: Some(1),
            version: 1,
            syncpts: bit(SYNCPT_3D),
            waitbases: bit(WAITBASE_3D),
            modulemutexes: bit(MODMUTEX_3D),
            flags: ModuleFlags::empty(),
            class: GRAPHICS_3D_CLASS_ID,
            clocks: &GR3D_CLOCKS,
            powergate_ids: &[POWERGATE_3D],
        },
        ModuleDevice {
            name: "gr2d",
            index: Some(2),
            version: 0,
            syncpts: bit(SYNCPT_2D_0) | bit(SYNCPT_2D_1),
            waitbases: bit(WAITBASE_2D_0) | bit(WAITBASE_2D_1),
            modulemutexes: bit(MODMUTEX_2D_FULL)
                | bit(MODMUTEX_2D_SIMPLE)
                | bit(MODMUTEX_2D_SB_A)
                | bit(MODMUTEX_2D_SB_B),
            flags: ModuleFlags::SERIALIZE,
            class: 0,
            clocks: &GR2D_CLOCKS,
            powergate_ids: &[],
        },
        ModuleDevice {
            name: "isp",
            index: Some(3),
            version: 0,
            syncpts: 0,
            waitbases: 0,
            modulemutexes: 0,
            flags: ModuleFlags::empty(),
            class: 0,
            clocks: &[],
            powergate_ids: &[],
        },
        ModuleDevice {
            name: "vi",
            index: Some(4),
            version: 0,
            syncpts: bit(SYNCPT_CSI_VI_0)
                | bit(SYNCPT_CSI_VI_1)
                | bit(SYNCPT_VI_ISP_0)
                | bit(SYNCPT_VI_ISP_1)
                | bit(SYNCPT_VI_ISP_2)
                | bit(SYNCPT_VI_ISP_3)
                | bit(SYNCPT_VI_ISP_4),
            waitbases: 0,
            modulemutexes: bit(MODMUTEX_VI),
            flags: ModuleFlags::EXCLUSIVE,
            class: 0,
            clocks: &[],
            powergate_ids: &[],
        },
        ModuleDevice {
            name: "mpe",
            index: Some(5),
            version: 1,
            syncpts: bit(SYNCPT_MPE) | bit(SYNCPT_MPE_EBM_EOF) | bit(SYNCPT_MPE_WR_SAFE),
            waitbases: bit(WAITBASE_MPE),
            modulemutexes: 0,
            flags: ModuleFlags::KEEPALIVE | ModuleFlags::WAITBASE_SYNC,
            class: VIDEO_ENCODE_MPEG_CLASS_ID,
            clocks: &MPE_CLOCKS,
            powergate_ids: &[POWERGATE_MPE],
        },
        ModuleDevice {
            name: "dsi",
            index: Some(6),
            version: 0,
            syncpts: bit(SYNCPT_DSI),
            waitbases: 0,
            modulemutexes: bit(MODMUTEX_DSI),
            flags: ModuleFlags::empty(),
            class: 0,
            clocks: &[],
            powergate_ids: &[],
        },
    ]
}

impl ChipOps for T20ChipOps {
    fn name(&self) -> &'static str {
        "tegra20-host1x01"
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn devices(&self) -> Vec<ModuleDevice> {
        t20_devices()
    }

    fn syncpt_load(&self, regs: &RegisterFile, id: u32) -> u32 {
        regs.sync_read(sync::syncpt(id))
    }

    fn syncpt_reset(&self, regs: &RegisterFile, id: u32, value: u32) {
        regs.sync_write(sync::syncpt(id), value);
    }

    fn syncpt_cpu_incr(&self, regs: &RegisterFile, id: u32) {
        regs.sync_write(sync::SYNCPT_CPU_INCR, bit(id));
    }

    fn wait_base_load(&self, regs: &RegisterFile, base: u32) -> u32 {
        regs.sync_read(sync::syncpt_base(base))
    }

    fn wait_base_store(&self, regs: &RegisterFile, base: u32, value: u32) {
        regs.sync_write(sync::syncpt_base(base), value);
    }

    fn intr_set_threshold(&self, regs: &RegisterFile, id: u32, threshold: u32) {
        regs.sync_write(sync::syncpt_int_thresh(id), threshold);
    }

    fn intr_enable(&self, regs: &RegisterFile, id: u32) {
        regs.sync_write(sync::SYNCPT_THRESH_INT_ENABLE_CPU0, bit(id));
    }

    fn intr_disable(&self, regs: &RegisterFile, id: u32) {
        regs.sync_write(sync::SYNCPT_THRESH_INT_DISABLE, bit(id));
    }

    fn intr_pending(&self, regs: &RegisterFile) -> u32 {
        regs.sync_read(sync::SYNCPT_THRESH_CPU0_INT_STATUS) & regs.int_enabled()
    }

    fn intr_ack(&self, regs: &RegisterFile, mask: u32) {
        regs.sync_write(sync::SYNCPT_THRESH_CPU0_INT_STATUS, mask);
    }

    fn channel_faults(&self, regs: &RegisterFile) -> u32 {
        regs.sync_read(sync::CH_ERR_STATUS)
    }

    fn channel_fault_code(&self, regs: &RegisterFile, ch: u32) -> u32 {
        regs.channel_read(ch, channel::FAULT)
    }

    fn channel_fault_ack(&self, regs: &RegisterFile, ch: u32) {
        regs.channel_write(ch, channel::FAULT, 0);
        regs.sync_write(sync::CH_ERR_STATUS, bit(ch));
    }

    fn mlock_update(&self, regs: &RegisterFile, id: u32, owner: MlockOwner) {
        let (locked, owner_reg) = match owner {
            MlockOwner::Free => (0, 0),
            MlockOwner::Cpu => (1, MLOCK_OWNER_CPU_OWNS),
            MlockOwner::Channel(ch) => (1, (ch << 8) | MLOCK_OWNER_CH_OWNS),
        };
        regs.sync_write(sync::mlock_owner(id), owner_reg);
        regs.sync_write(sync::mlock(id), locked);
    }

    fn cdma_start(&self, regs: &RegisterFile, ch: u32, size_words: usize) -> Host1xResult<()> {
        // DMAEND is a byte address.
        let end = u32::try_from(size_words)
            .ok()
            .and_then(|w| w.checked_mul(4))
            .ok_or(Host1xError::InvalidState {
                channel: ch,
                expected: "ring below 4 GiB",
                actual: "oversized ring",
            })?;
        regs.channel_write(ch, channel::DMACTRL, channel::DMACTRL_DMASTOP);
        regs.channel_write(ch, channel::DMASTART, 0);
        regs.channel_write(ch, channel::DMAEND, end);
        regs.channel_write(ch, channel::DMAPUT, 0);
        regs.channel_write(
            ch,
            channel::DMACTRL,
            channel::DMACTRL_DMASTOP | channel::DMACTRL_DMAGETRST,
        );
        regs.channel_write(ch, channel::DMACTRL, 0);
        Ok(())
    }

    fn cdma_kick(&self, regs: &RegisterFile, ch: u32, put: u32) {
        regs.channel_write(ch, channel::DMAPUT, put * 4);
    }

    fn cdma_get(&self, regs: &RegisterFile, ch: u32) -> u32 {
        regs.channel_read(ch, channel::DMAGET) / 4
    }

    fn cdma_put(&self, regs: &RegisterFile, ch: u32) -> u32 {
        regs.channel_read(ch, channel::DMAPUT) / 4
    }

    fn cdma_set_get(&self, regs: &RegisterFile, ch: u32, get: u32) {
        regs.channel_write(ch, channel::DMAGET, get * 4);
    }

    fn cdma_reset(&self, regs: &RegisterFile, ch: u32) {
        regs.channel_write(ch, channel::DMACTRL, channel::DMACTRL_DMASTOP);
        regs.channel_write(ch, channel::DMAPUT, 0);
        regs.channel_write(
            ch,
            channel::DMACTRL,
            channel::DMACTRL_DMASTOP | channel::DMACTRL_DMAGETRST,
        );
    }
}
