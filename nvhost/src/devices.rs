// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! nvhost device nodes: `/dev/nvhost-ctrl` and one `/dev/nvhost-<module>`
//! channel node per host1x client.
//!
//! Arguments travel as little-endian `u32` words laid out like the kernel's
//! ioctl structs. The output buffer receives the whole struct with its out
//! fields filled in. Every ioctl returns 0 or an errno value.

use std::sync::Arc;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use host1x::{ChannelHandle, HostEngine, MutexClient};
use host1x_common::error::errno;
use host1x_common::{bit, syncpoint_reached, Host1xError};

/// Ioctl type byte of every nvhost node.
pub const NVHOST_IOCTL_MAGIC: u32 = b'H' as u32;

/// Submit ABI revision reported by `GET_VERSION`.
pub const NVHOST_SUBMIT_VERSION: u32 = 1;

/// Timeout passed as `-1` to the wait ioctls.
pub const NVHOST_NO_TIMEOUT: i32 = -1;

// Waits without a timeout still need a finite deadline.
const NO_TIMEOUT_CAP: Duration = Duration::from_secs(3600);

pub mod ctrl {
    pub const SYNCPT_READ: u32 = 1;
    pub const SYNCPT_INCR: u32 = 2;
    pub const SYNCPT_WAIT: u32 = 3;
    pub const MODULE_MUTEX: u32 = 4;
    pub const SYNCPT_WAITEX: u32 = 6;
    pub const GET_VERSION: u32 = 7;
    pub const SYNCPT_READ_MAX: u32 = 8;
}

pub mod channel {
    pub const GET_SYNCPOINTS: u32 = 2;
    pub const GET_WAITBASES: u32 = 3;
    pub const GET_MODMUTEXES: u32 = 4;
    pub const SET_TIMEOUT: u32 = 11;
    pub const SUBMIT: u32 = 15;
}

/// Build a read/write ioctl number the way `_IOWR('H', nr, size)` does.
pub const fn ioctl_code(nr: u32, size: u32) -> u32 {
    (3 << 30) | ((size & 0x3FFF) << 16) | (NVHOST_IOCTL_MAGIC << 8) | (nr & 0xFF)
}

/// An open nvhost file.
pub trait NvhostDevice: Send {
    fn name(&self) -> &str;
    fn ioctl(&mut self, cmd: u32, input: &[u8], output: &mut [u8]) -> u32;
}

type Status = Result<(), u32>;

// ── Argument helpers ────────────────────────────────────────────────────────

fn ioctl_nr(cmd: u32) -> Option<u32> {
    ((cmd >> 8) & 0xFF == NVHOST_IOCTL_MAGIC).then_some(cmd & 0xFF)
}

fn read_args<const N: usize>(input: &[u8]) -> Result<[u32; N], u32> {
    let mut rd = input;
    let mut args = [0u32; N];
    rd.read_u32_into::<LittleEndian>(&mut args)
        .map_err(|_| errno::EINVAL)?;
    Ok(args)
}

fn write_args(output: &mut [u8], args: &[u32]) -> Status {
    let mut wr: &mut [u8] = output;
    for &arg in args {
        wr.write_u32::<LittleEndian>(arg)
            .map_err(|_| errno::EINVAL)?;
    }
    Ok(())
}

fn status(result: Status) -> u32 {
    match result {
        Ok(()) => 0,
        Err(e) => e,
    }
}

fn fail(node: &str, e: Host1xError) -> u32 {
    log::debug!("{}: {}", node, e);
    e.errno()
}

fn wait_timeout(timeout_ms: i32) -> Duration {
    if timeout_ms < 0 {
        NO_TIMEOUT_CAP
    } else {
        Duration::from_millis(timeout_ms as u64)
    }
}

// ── /dev/nvhost-ctrl ────────────────────────────────────────────────────────

/// `/dev/nvhost-ctrl`: syncpoint reads, increments and waits plus CPU
/// access to the module mutexes.
///
/// Each ctrl file is its own mutex client: locks it takes can only be
/// released through it, and are released when it is closed.
pub struct NvhostCtrl {
    engine: Arc<HostEngine>,
    client: MutexClient,
    held_mutexes: u32,
}

impl NvhostCtrl {
    pub fn new(engine: Arc<HostEngine>) -> Self {
        let client = engine.mutex_client("nvhost-ctrl");
        Self {
            engine,
            client,
            held_mutexes: 0,
        }
    }

    pub fn held_mutexes(&self) -> u32 {
        self.held_mutexes
    }

    fn syncpt_read(&self, input: &[u8], output: &mut [u8], max: bool) -> Status {
        let [id] = read_args::<1>(input)?;
        let value = if max {
            self.engine.read_syncpoint_max(id)
        } else {
            self.engine.read_syncpoint(id)
        }
        .map_err(|e| fail(self.name(), e))?;
        log::trace!("nvhost-ctrl: read{} id={} -> {}", if max { "_max" } else { "" }, id, value);
        write_args(output, &[id, value])
    }

    fn syncpt_incr(&self, input: &[u8]) -> Status {
        let [id] = read_args::<1>(input)?;
        let value = self
            .engine
            .cpu_increment(id)
            .map_err(|e| fail(self.name(), e))?;
        log::debug!("nvhost-ctrl: incr id={} -> {}", id, value);
        Ok(())
    }

    fn syncpt_wait(&self, input: &[u8], output: &mut [u8], extended: bool) -> Status {
        let [id, threshold, timeout] = read_args::<3>(input)?;
        let timeout = timeout as i32;
        log::debug!(
            "nvhost-ctrl: wait id={} threshold={} timeout={}ms",
            id,
            threshold,
            timeout
        );

        let value = if timeout == 0 {
            // A zero timeout only polls.
            let current = self
                .engine
                .read_syncpoint(id)
                .map_err(|e| fail(self.name(), e))?;
            if !syncpoint_reached(current, threshold) {
                return Err(errno::EAGAIN);
            }
            current
        } else {
            self.engine
                .wait(id, threshold, wait_timeout(timeout))
                .map_err(|e| fail(self.name(), e))?
        };

        if extended {
            write_args(output, &[id, threshold, timeout as u32, value])?;
        }
        Ok(())
    }

    fn module_mutex(&mut self, input: &[u8], output: &mut [u8]) -> Status {
        let [id, lock] = read_args::<2>(input)?;
        if id >= 32 {
            return Err(errno::EINVAL);
        }
        let mask = bit(id);
        if lock != 0 {
            let timeout = self.engine.settings().wait_timeout();
            self.engine
                .mutex_acquire(mask, &self.client, timeout)
                .map_err(|e| fail(self.client.label(), e))?;
            self.held_mutexes |= mask;
        } else {
            if self.held_mutexes & mask == 0 {
                log::warn!("nvhost-ctrl: unlock of mutex {} not taken by this file", id);
                return Err(errno::EINVAL);
            }
            self.engine
                .mutex_release(mask, &self.client)
                .map_err(|e| fail(self.client.label(), e))?;
            self.held_mutexes &= !mask;
        }
        log::debug!("nvhost-ctrl: mutex {} {}", id, if lock != 0 { "locked" } else { "unlocked" });
        write_args(output, &[id, lock])
    }
}

impl NvhostDevice for NvhostCtrl {
    fn name(&self) -> &str {
        "/dev/nvhost-ctrl"
    }

    fn ioctl(&mut self, cmd: u32, input: &[u8], output: &mut [u8]) -> u32 {
        let Some(nr) = ioctl_nr(cmd) else {
            log::warn!("nvhost-ctrl: foreign ioctl 0x{:08X}", cmd);
            return errno::ENOTTY;
        };

        status(match nr {
            ctrl::SYNCPT_READ => self.syncpt_read(input, output, false),
            ctrl::SYNCPT_INCR => self.syncpt_incr(input),
            ctrl::SYNCPT_WAIT => self.syncpt_wait(input, output, false),
            ctrl::MODULE_MUTEX => self.module_mutex(input, output),
            ctrl::SYNCPT_WAITEX => self.syncpt_wait(input, output, true),
            ctrl::GET_VERSION => write_args(output, &[NVHOST_SUBMIT_VERSION]),
            ctrl::SYNCPT_READ_MAX => self.syncpt_read(input, output, true),
            _ => {
                log::warn!("nvhost-ctrl: unknown ioctl_nr={}", nr);
                Err(errno::ENOTTY)
            }
        })
    }
}

impl Drop for NvhostCtrl {
    fn drop(&mut self) {
        if self.held_mutexes == 0 {
            return;
        }
        log::debug!("nvhost-ctrl: releasing mutexes 0x{:04X} on close", self.held_mutexes);
        if let Err(e) = self.engine.mutex_release(self.held_mutexes, &self.client) {
            log::error!("nvhost-ctrl: release on close failed: {}", e);
        }
    }
}

// ── /dev/nvhost-<module> ────────────────────────────────────────────────────

/// Channel node of one host1x client module. Opening it allocates a
/// channel; dropping it frees the channel.
pub struct NvhostChannel {
    engine: Arc<HostEngine>,
    handle: ChannelHandle,
    path: String,
    syncpts: u32,
    waitbases: u32,
    modulemutexes: u32,
    timeout: Option<Duration>,
}

impl NvhostChannel {
    pub fn open(engine: Arc<HostEngine>, module: &str) -> Result<Self, Host1xError> {
        let handle = engine.open_channel(module)?;
        let (syncpts, waitbases, modulemutexes) = engine
            .module(module)
            .map(|m| (m.syncpts, m.waitbases, m.modulemutexes))
            .unwrap_or_default();
        log::info!("nvhost-{}: opened channel {}", module, handle.id);
        Ok(Self {
            engine,
            handle,
            path: format!("/dev/nvhost-{}", module),
            syncpts,
            waitbases,
            modulemutexes,
            timeout: None,
        })
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    fn set_timeout(&mut self, input: &[u8]) -> Status {
        let [ms] = read_args::<1>(input)?;
        self.timeout = (ms != 0).then(|| Duration::from_millis(ms as u64));
        log::debug!("{}: submit timeout {}ms", self.path, ms);
        Ok(())
    }

    /// SUBMIT args: `{num_syncpt_incrs, num_words}`, then that many
    /// `{syncpt_id, syncpt_incrs}` pairs, then the command words. Returns
    /// the first fence as `{syncpt_id, value}`.
    fn submit(&mut self, input: &[u8], output: &mut [u8]) -> Status {
        let [num_incrs, num_words] = read_args::<2>(input)?;
        let mut rd = input.get(8..).ok_or(errno::EINVAL)?;

        let mut increments = Vec::new();
        for _ in 0..num_incrs {
            let id = rd.read_u32::<LittleEndian>().map_err(|_| errno::EINVAL)?;
            let count = rd.read_u32::<LittleEndian>().map_err(|_| errno::EINVAL)?;
            if count as usize > self.handle.capacity {
                return Err(errno::EINVAL);
            }
            increments.extend(std::iter::repeat(id).take(count as usize));
        }
        if num_words as usize > self.handle.capacity {
            return Err(errno::EINVAL);
        }
        let mut words = vec![0u32; num_words as usize];
        rd.read_u32_into::<LittleEndian>(&mut words)
            .map_err(|_| errno::EINVAL)?;

        let timeout = self
            .timeout
            .unwrap_or_else(|| self.engine.settings().submit_timeout());
        let submission = self
            .engine
            .submit_within(&self.handle, &words, &increments, timeout)
            .map_err(|e| fail(&self.path, e))?;

        let fence = submission.fences.first().copied();
        log::debug!(
            "{}: submit {} words, {} increments -> {:?}",
            self.path,
            words.len(),
            increments.len(),
            fence
        );
        match fence {
            Some(f) => write_args(output, &[f.id, f.threshold]),
            None => Ok(()),
        }
    }
}

impl NvhostDevice for NvhostChannel {
    fn name(&self) -> &str {
        &self.path
    }

    fn ioctl(&mut self, cmd: u32, input: &[u8], output: &mut [u8]) -> u32 {
        let Some(nr) = ioctl_nr(cmd) else {
            log::warn!("{}: foreign ioctl 0x{:08X}", self.path, cmd);
            return errno::ENOTTY;
        };

        status(match nr {
            channel::GET_SYNCPOINTS => write_args(output, &[self.syncpts]),
            channel::GET_WAITBASES => write_args(output, &[self.waitbases]),
            channel::GET_MODMUTEXES => write_args(output, &[self.modulemutexes]),
            channel::SET_TIMEOUT => self.set_timeout(input),
            channel::SUBMIT => self.submit(input, output),
            _ => {
                log::warn!("{}: unknown ioctl_nr={}", self.path, nr);
                Err(errno::ENOTTY)
            }
        })
    }
}

impl Drop for NvhostChannel {
    fn drop(&mut self) {
        log::info!("{}: closing channel {}", self.path, self.handle.id);
        if let Err(e) = self.engine.free_channel(&self.handle) {
            log::error!("{}: free on close failed: {}", self.path, e);
        }
    }
}

// ── Factory function ────────────────────────────────────────────────────────

/// Open the node at `path`. Returns the errno to report on failure.
pub fn create_device(path: &str, engine: &Arc<HostEngine>) -> Result<Box<dyn NvhostDevice>, u32> {
    if path == "/dev/nvhost-ctrl" {
        return Ok(Box::new(NvhostCtrl::new(Arc::clone(engine))));
    }

    let module = path
        .strip_prefix("/dev/nvhost-")
        .filter(|name| engine.module(name).is_some_and(|m| m.index.is_some()));
    match module {
        Some(name) => NvhostChannel::open(Arc::clone(engine), name)
            .map(|ch| Box::new(ch) as Box<dyn NvhostDevice>)
            .map_err(|e| {
                log::warn!("nvhost: open {} failed: {}", path, e);
                e.errno()
            }),
        None => {
            log::warn!("nvhost: unknown device path \"{}\"", path);
            Err(errno::ENOENT)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use host1x::chip::t20::{MODMUTEX_3D, SYNCPT_2D_0, SYNCPT_3D};
    use host1x::opcodes;
    use host1x_common::settings::HostSettings;

    fn test_engine() -> Arc<HostEngine> {
        Arc::new(
            HostEngine::with_t20(HostSettings {
                irq_thread: false,
                dump_on_timeout: false,
                wait_timeout_ms: 50,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn args(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn word(buf: &[u8], index: usize) -> u32 {
        u32::from_le_bytes(buf[index * 4..index * 4 + 4].try_into().unwrap())
    }

    #[test]
    fn test_ctrl_incr_and_read() {
        let engine = test_engine();
        let mut dev = NvhostCtrl::new(engine);
        let mut out = [0u8; 8];

        assert_eq!(dev.ioctl(ioctl_code(ctrl::SYNCPT_INCR, 4), &args(&[SYNCPT_3D]), &mut out), 0);
        assert_eq!(dev.ioctl(ioctl_code(ctrl::SYNCPT_INCR, 4), &args(&[SYNCPT_3D]), &mut out), 0);

        assert_eq!(dev.ioctl(ioctl_code(ctrl::SYNCPT_READ, 8), &args(&[SYNCPT_3D]), &mut out), 0);
        assert_eq!(word(&out, 0), SYNCPT_3D);
        assert_eq!(word(&out, 1), 2);

        assert_eq!(dev.ioctl(ioctl_code(ctrl::SYNCPT_READ_MAX, 8), &args(&[SYNCPT_3D]), &mut out), 0);
        assert_eq!(word(&out, 1), 2);
    }

    #[test]
    fn test_ctrl_invalid_syncpoint() {
        let mut dev = NvhostCtrl::new(test_engine());
        let mut out = [0u8; 8];
        assert_eq!(
            dev.ioctl(ioctl_code(ctrl::SYNCPT_READ, 8), &args(&[40]), &mut out),
            errno::EINVAL
        );
    }

    #[test]
    fn test_ctrl_short_args() {
        let mut dev = NvhostCtrl::new(test_engine());
        let mut out = [0u8; 16];
        assert_eq!(
            dev.ioctl(ioctl_code(ctrl::SYNCPT_WAIT, 12), &args(&[SYNCPT_3D]), &mut out),
            errno::EINVAL
        );
    }

    #[test]
    fn test_ctrl_wait_timeouts() {
        let mut dev = NvhostCtrl::new(test_engine());
        let mut out = [0u8; 16];

        // Zero timeout polls.
        assert_eq!(
            dev.ioctl(ioctl_code(ctrl::SYNCPT_WAIT, 12), &args(&[SYNCPT_3D, 1, 0]), &mut out),
            errno::EAGAIN
        );
        assert_eq!(
            dev.ioctl(ioctl_code(ctrl::SYNCPT_WAIT, 12), &args(&[SYNCPT_3D, 1, 20]), &mut out),
            errno::ETIMEDOUT
        );
    }

    #[test]
    fn test_ctrl_waitex_reports_value() {
        let engine = test_engine();
        engine.cpu_increment(SYNCPT_3D).unwrap();
        engine.cpu_increment(SYNCPT_3D).unwrap();

        let mut dev = NvhostCtrl::new(engine);
        let mut out = [0u8; 16];
        let rc = dev.ioctl(
            ioctl_code(ctrl::SYNCPT_WAITEX, 16),
            &args(&[SYNCPT_3D, 1, NVHOST_NO_TIMEOUT as u32, 0]),
            &mut out,
        );
        assert_eq!(rc, 0);
        assert_eq!(word(&out, 3), 2);
    }

    #[test]
    fn test_ctrl_get_version() {
        let mut dev = NvhostCtrl::new(test_engine());
        let mut out = [0u8; 4];
        assert_eq!(dev.ioctl(ioctl_code(ctrl::GET_VERSION, 4), &[], &mut out), 0);
        assert_eq!(word(&out, 0), NVHOST_SUBMIT_VERSION);
    }

    #[test]
    fn test_ctrl_module_mutex_released_on_close() {
        let engine = test_engine();
        let mut dev = NvhostCtrl::new(Arc::clone(&engine));
        let mut out = [0u8; 8];

        let lock = ioctl_code(ctrl::MODULE_MUTEX, 8);
        assert_eq!(dev.ioctl(lock, &args(&[MODMUTEX_3D, 1]), &mut out), 0);
        assert_eq!(dev.held_mutexes(), bit(MODMUTEX_3D));

        // A second ctrl file cannot unlock what the first one holds.
        let mut other = NvhostCtrl::new(Arc::clone(&engine));
        assert_eq!(other.ioctl(lock, &args(&[MODMUTEX_3D, 0]), &mut out), errno::EINVAL);

        drop(dev);
        assert!(engine
            .mutex_try_acquire(bit(MODMUTEX_3D), &engine.mutex_client("test"))
            .unwrap());
    }

    #[test]
    fn test_ctrl_files_hold_mutexes_separately() {
        let engine = test_engine();
        let mut a = NvhostCtrl::new(Arc::clone(&engine));
        let mut b = NvhostCtrl::new(Arc::clone(&engine));
        let mut out = [0u8; 8];
        let lock = ioctl_code(ctrl::MODULE_MUTEX, 8);

        assert_eq!(a.ioctl(lock, &args(&[MODMUTEX_3D, 1]), &mut out), 0);
        // Someone else's token is refused by the engine as well.
        let intruder = engine.mutex_client("intruder");
        assert_eq!(
            engine.mutex_release(bit(MODMUTEX_3D), &intruder),
            Err(Host1xError::MutexNotHeld {
                mask: bit(MODMUTEX_3D)
            })
        );
        assert!(!engine.mutex_try_acquire(bit(MODMUTEX_3D), &intruder).unwrap());

        // b can take another mutex while a keeps its own.
        assert_eq!(b.ioctl(lock, &args(&[MODMUTEX_3D + 1, 1]), &mut out), 0);
        assert_eq!(b.ioctl(lock, &args(&[MODMUTEX_3D, 0]), &mut out), errno::EINVAL);
        assert_eq!(a.ioctl(lock, &args(&[MODMUTEX_3D, 0]), &mut out), 0);
        assert_eq!(b.held_mutexes(), bit(MODMUTEX_3D + 1));

        drop(b);
        assert!(engine
            .mutex_try_acquire(bit(MODMUTEX_3D) | bit(MODMUTEX_3D + 1), &intruder)
            .unwrap());
    }

    #[test]
    fn test_foreign_and_unknown_ioctls() {
        let mut dev = NvhostCtrl::new(test_engine());
        let mut out = [0u8; 8];
        assert_eq!(dev.ioctl(0x4008_4E01, &args(&[0]), &mut out), errno::ENOTTY);
        assert_eq!(dev.ioctl(ioctl_code(0x30, 0), &[], &mut out), errno::ENOTTY);
    }

    #[test]
    fn test_channel_params() {
        let engine = test_engine();
        let mut dev = NvhostChannel::open(engine, "gr2d").unwrap();
        let mut out = [0u8; 4];

        assert_eq!(dev.ioctl(ioctl_code(channel::GET_SYNCPOINTS, 4), &[], &mut out), 0);
        assert_eq!(word(&out, 0), bit(SYNCPT_2D_0) | bit(19));
        assert_eq!(dev.ioctl(ioctl_code(channel::GET_MODMUTEXES, 4), &[], &mut out), 0);
        assert_eq!(word(&out, 0), 0x1E);
        assert_eq!(dev.ioctl(ioctl_code(channel::GET_WAITBASES, 4), &[], &mut out), 0);
        assert_eq!(word(&out, 0), 0x6);
    }

    #[test]
    fn test_channel_submit_returns_fence() {
        let engine = test_engine();
        let mut dev = NvhostChannel::open(Arc::clone(&engine), "gr3d").unwrap();

        let input = args(&[1, 2, SYNCPT_3D, 2, opcodes::NOOP, opcodes::NOOP]);
        let mut out = [0u8; 8];
        assert_eq!(dev.ioctl(ioctl_code(channel::SUBMIT, 0), &input, &mut out), 0);
        assert_eq!(word(&out, 0), SYNCPT_3D);
        assert_eq!(word(&out, 1), 2);

        engine.run_channels().unwrap();
        assert_eq!(engine.read_syncpoint(SYNCPT_3D).unwrap(), 2);
    }

    #[test]
    fn test_channel_submit_truncated() {
        let mut dev = NvhostChannel::open(test_engine(), "gr3d").unwrap();
        let mut out = [0u8; 8];
        let input = args(&[1, 4, SYNCPT_3D, 1, opcodes::NOOP]);
        assert_eq!(dev.ioctl(ioctl_code(channel::SUBMIT, 0), &input, &mut out), errno::EINVAL);
    }

    #[test]
    fn test_channel_serialized_submit_times_out() {
        let engine = test_engine();
        let mut dev = NvhostChannel::open(engine, "gr2d").unwrap();
        let mut out = [0u8; 8];

        assert_eq!(dev.ioctl(ioctl_code(channel::SET_TIMEOUT, 4), &args(&[20]), &mut out), 0);
        let input = args(&[1, 0, SYNCPT_2D_0, 1]);
        assert_eq!(dev.ioctl(ioctl_code(channel::SUBMIT, 0), &input, &mut out), 0);
        // Nothing runs the first job, so the second cannot start.
        assert_eq!(
            dev.ioctl(ioctl_code(channel::SUBMIT, 0), &input, &mut out),
            errno::ETIMEDOUT
        );
    }

    #[test]
    fn test_channel_freed_on_drop() {
        let engine = test_engine();
        let dev = NvhostChannel::open(Arc::clone(&engine), "gr3d").unwrap();
        assert_eq!(engine.channels_in_use(), 1);
        drop(dev);
        assert_eq!(engine.channels_in_use(), 0);
    }

    #[test]
    fn test_create_device_paths() {
        let engine = test_engine();
        assert!(create_device("/dev/nvhost-ctrl", &engine).is_ok());
        assert!(create_device("/dev/nvhost-gr3d", &engine).is_ok());
        assert!(create_device("/dev/nvhost-mpe", &engine).is_ok());
        assert_eq!(create_device("/dev/nvhost-host1x", &engine).err(), Some(errno::ENOENT));
        assert_eq!(create_device("/dev/nvmap", &engine).err(), Some(errno::ENOENT));
    }

    #[test]
    fn test_open_past_pool_capacity_busy() {
        let engine = test_engine();
        let _open: Vec<_> = (0..host1x_common::NB_CHANNELS)
            .map(|_| create_device("/dev/nvhost-gr3d", &engine).unwrap())
            .collect();
        assert_eq!(create_device("/dev/nvhost-gr2d", &engine).err(), Some(errno::EBUSY));
        // The ctrl node needs no channel.
        assert!(create_device("/dev/nvhost-ctrl", &engine).is_ok());
    }
}
