// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Central host1x context.
//!
//! Owns the register file, syncpoint table, module mutexes, channel pool,
//! submitter, interrupt dispatcher and the simulated channel processor.
//! Clients allocate channels, submit command streams and wait on syncpoints
//! through [`HostEngine`]; a background thread services interrupts unless
//! `irq_thread` is disabled, in which case waits poll the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use host1x_common::settings::HostSettings;
use host1x_common::{BusyResource, ChannelId, Host1xError, Host1xResult, IdKind};

use crate::channel::{ChannelHandle, ChannelPool, FreeOutcome};
use crate::chip::t20::T20ChipOps;
use crate::chip::{ChipOps, MlockOwner};
use crate::command_processor::{ClassUnit, CommandProcessor, ExecOutcome};
use crate::debug::{ChannelEntry, DebugSnapshot, SyncpointEntry};
use crate::device::{validate_devices, ModuleDevice};
use crate::intr::{DispatchReport, InterruptDispatcher, Registration, WaitSlot, WaiterAction, WaiterRef};
use crate::module_mutex::{ModuleMutexSet, MutexClient};
use crate::registers::RegisterFile;
use crate::submitter::{CdmaState, CommandStreamSubmitter, JobStatus, JobTicket, Submission, SubmitContext};
use crate::syncpoint::SyncpointTable;

/// How long the interrupt thread sleeps before re-checking for shutdown.
const IRQ_POLL: Duration = Duration::from_millis(50);
/// Poll slice for waits when no interrupt thread runs.
const POLL_SLICE: Duration = Duration::from_millis(1);

struct EngineInner {
    ops: Box<dyn ChipOps>,
    regs: RegisterFile,
    devices: Vec<ModuleDevice>,
    syncpts: SyncpointTable,
    mutexes: ModuleMutexSet,
    pool: ChannelPool,
    submitter: CommandStreamSubmitter,
    intr: InterruptDispatcher,
    processor: Mutex<CommandProcessor>,
    settings: HostSettings,
    threaded: AtomicBool,
    shutdown: AtomicBool,
    next_client: AtomicU64,
}

impl EngineInner {
    fn ctx(&self) -> SubmitContext<'_> {
        SubmitContext {
            ops: self.ops.as_ref(),
            regs: &self.regs,
            syncpts: &self.syncpts,
            mutexes: &self.mutexes,
            intr: &self.intr,
        }
    }

    /// Dispatch pending interrupts, reset faulted channels and retire
    /// completed jobs.
    fn service_interrupts(&self) -> Host1xResult<DispatchReport> {
        let ctx = self.ctx();
        let report = self.intr.dispatch(&self.syncpts, self.ops.as_ref(), &self.regs)?;
        // Faults first: a faulted job must be drained before a completion
        // on a shared syncpoint gets to look at it.
        if !report.faults.is_empty() {
            let mut processor = self.processor.lock();
            for &(ch, code) in &report.faults {
                processor.reset_channel(ch);
                self.submitter.fault(&ctx, ch, code)?;
            }
        }
        for &(ch, generation) in &report.completions {
            self.submitter.update(&ctx, ch, generation)?;
        }
        Ok(report)
    }

    fn irq_loop(&self) {
        log::debug!("host1x: interrupt thread started");
        while !self.shutdown.load(Ordering::Acquire) {
            if !self.regs.irq().wait(IRQ_POLL) {
                continue;
            }
            if let Err(e) = self.service_interrupts() {
                log::error!("host1x: interrupt service failed: {}", e);
            }
        }
        log::debug!("host1x: interrupt thread stopped");
    }

    /// Block on `slot`, servicing interrupts inline when no thread does.
    fn block_on(&self, slot: &WaitSlot, timeout: Duration) -> Option<u32> {
        if self.threaded.load(Ordering::Acquire) {
            return slot.wait(timeout);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Err(e) = self.service_interrupts() {
                log::error!("host1x: interrupt service failed: {}", e);
            }
            let now = Instant::now();
            if now >= deadline {
                return slot.wait(Duration::ZERO);
            }
            if let Some(v) = slot.wait(POLL_SLICE.min(deadline - now)) {
                return Some(v);
            }
            if slot.is_cancelled() {
                return None;
            }
        }
    }

    /// Service interrupts inline when no thread does.
    fn poll(&self) -> Host1xResult<()> {
        if !self.threaded.load(Ordering::Acquire) {
            self.service_interrupts()?;
        }
        Ok(())
    }

    fn snapshot(&self) -> DebugSnapshot {
        let ctx = self.ctx();
        let syncpoints = (0..self.syncpts.len() as u32)
            .map(|id| {
                let min = self
                    .intr
                    .refresh(id, &self.syncpts, self.ops.as_ref(), &self.regs)
                    .unwrap_or_default();
                SyncpointEntry {
                    id,
                    name: self.syncpts.name(id),
                    min,
                    max: self.syncpts.read_max(id).unwrap_or_default(),
                    client_managed: self.syncpts.is_client_managed(id),
                    waiters: self.intr.depth(id),
                }
            })
            .collect();
        let wait_bases = (0..self.syncpts.nb_bases() as u32)
            .map(|base| self.ops.wait_base_load(&self.regs, base))
            .collect();
        let slots = self.pool.status();
        let channels = self
            .submitter
            .status(&ctx)
            .into_iter()
            .map(|cdma| {
                let slot = slots.iter().find(|s| s.id == cdma.channel);
                ChannelEntry {
                    id: cdma.channel,
                    module: cdma.module,
                    refcount: slot.map_or(0, |s| s.refcount),
                    state: cdma.state,
                    dmaput: cdma.dmaput,
                    dmaget: cdma.dmaget,
                    in_flight: cdma.in_flight,
                    mutexes: cdma.mutexes,
                }
            })
            .collect();
        DebugSnapshot {
            chip: self.ops.name(),
            syncpoints,
            wait_bases,
            mutexes_held: self.mutexes.held(),
            channels_in_use: self.pool.in_use(),
            channels,
        }
    }

    fn check_syncpoint(&self, id: u32) -> Host1xResult<()> {
        if id as usize >= self.syncpts.len() {
            return Err(Host1xError::InvalidId {
                kind: IdKind::Syncpoint,
                id,
            });
        }
        Ok(())
    }
}

/// A registered wait that completes in the background.
pub struct PendingWait {
    inner: Arc<EngineInner>,
    slot: Arc<WaitSlot>,
    registration: Option<WaiterRef>,
    expired: Option<u32>,
    id: u32,
    threshold: u32,
}

impl PendingWait {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_done(&self) -> bool {
        self.expired.is_some() || self.slot.is_signaled()
    }

    /// Wait for the threshold. A timeout leaves the registration in place so
    /// the caller may wait again or cancel.
    pub fn wait(&self, timeout: Duration) -> Host1xResult<u32> {
        if let Some(v) = self.expired {
            return Ok(v);
        }
        if let Some(v) = self.inner.block_on(&self.slot, timeout) {
            return Ok(v);
        }
        if self.slot.is_cancelled() {
            return Err(Host1xError::Cancelled { id: self.id });
        }
        Err(Host1xError::Timeout {
            id: self.id,
            threshold: self.threshold,
            current: self.inner.syncpts.read(self.id)?,
        })
    }

    /// Remove the registration. Returns `false` when the wait already
    /// completed, in which case its value stays available through `wait`.
    pub fn cancel(&self) -> bool {
        match self.registration {
            Some(r) => self.inner.intr.cancel(r, self.inner.ops.as_ref(), &self.inner.regs),
            None => false,
        }
    }
}

/// The host1x engine.
pub struct HostEngine {
    inner: Arc<EngineInner>,
    irq_thread: Option<JoinHandle<()>>,
}

impl HostEngine {
    /// Build an engine for the chip described by `ops`.
    ///
    /// The device table is validated before anything is registered; every
    /// syncpoint and wait-base starts at zero.
    pub fn new(ops: Box<dyn ChipOps>, settings: HostSettings) -> Host1xResult<Self> {
        let info = ops.info().clone();
        let devices = ops.devices();
        validate_devices(&devices, &info)?;

        let regs = RegisterFile::with_channels(info.nb_channels);
        let syncpts = SyncpointTable::new(&info);
        for id in 0..info.nb_pts as u32 {
            ops.syncpt_reset(&regs, id, 0);
            ops.intr_disable(&regs, id);
        }
        for base in 0..info.nb_bases as u32 {
            ops.wait_base_store(&regs, base, 0);
        }

        log::info!(
            "host1x: {} with {} channels, {} syncpoints, {} modules",
            ops.name(),
            info.nb_channels,
            info.nb_pts,
            devices.len()
        );

        let inner = Arc::new(EngineInner {
            regs,
            syncpts,
            mutexes: ModuleMutexSet::new(info.nb_mlocks),
            pool: ChannelPool::new(info.nb_channels),
            submitter: CommandStreamSubmitter::new(info.nb_channels),
            intr: InterruptDispatcher::new(info.nb_pts),
            processor: Mutex::new(CommandProcessor::new(info.nb_channels)),
            devices,
            ops,
            settings,
            threaded: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            next_client: AtomicU64::new(1),
        });

        let irq_thread = if inner.settings.irq_thread {
            let worker = Arc::clone(&inner);
            match thread::Builder::new()
                .name("host1x-irq".into())
                .spawn(move || worker.irq_loop())
            {
                Ok(handle) => {
                    inner.threaded.store(true, Ordering::Release);
                    Some(handle)
                }
                Err(e) => {
                    log::warn!("host1x: no interrupt thread ({}), polling instead", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self { inner, irq_thread })
    }

    /// Tegra20 engine.
    pub fn with_t20(settings: HostSettings) -> Host1xResult<Self> {
        Self::new(Box::new(T20ChipOps::new()), settings)
    }

    pub fn chip_name(&self) -> &'static str {
        self.inner.ops.name()
    }

    pub fn settings(&self) -> &HostSettings {
        &self.inner.settings
    }

    pub fn devices(&self) -> &[ModuleDevice] {
        &self.inner.devices
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDevice> {
        self.inner.devices.iter().find(|d| d.name == name)
    }

    pub fn module_by_index(&self, index: u32) -> Option<&ModuleDevice> {
        self.inner.devices.iter().find(|d| d.index == Some(index))
    }

    /// Attach a unit that receives register writes for its class.
    pub fn register_unit(&self, unit: Box<dyn ClassUnit>) {
        self.inner.processor.lock().register_unit(unit);
    }

    // Channels

    /// Allocate a channel for the module bound to channel index
    /// `module_index`.
    pub fn allocate_channel(&self, module_index: u32) -> Host1xResult<ChannelHandle> {
        let module = self
            .module_by_index(module_index)
            .ok_or(Host1xError::InvalidId {
                kind: IdKind::Module,
                id: module_index,
            })?;
        self.bind_channel(module)
    }

    /// Allocate a channel for the module called `name`.
    pub fn open_channel(&self, name: &str) -> Host1xResult<ChannelHandle> {
        let module = self.module(name).ok_or(Host1xError::InvalidId {
            kind: IdKind::Module,
            id: u32::MAX,
        })?;
        self.bind_channel(module)
    }

    fn bind_channel(&self, module: &ModuleDevice) -> Host1xResult<ChannelHandle> {
        let words = self.inner.settings.push_buffer_words();
        let handle = self.inner.pool.allocate(module, words)?;
        if let Err(e) = self
            .inner
            .submitter
            .attach(&self.inner.ctx(), &handle, module, words)
        {
            self.inner.pool.free(&handle)?;
            return Err(e);
        }
        self.inner.processor.lock().reset_channel(handle.id);
        Ok(handle)
    }

    /// Take another reference on an open channel.
    pub fn get_channel(&self, handle: &ChannelHandle) -> Host1xResult<u32> {
        self.inner.pool.get(handle)
    }

    /// Drop a channel reference; the last one tears the channel down.
    pub fn free_channel(&self, handle: &ChannelHandle) -> Host1xResult<FreeOutcome> {
        let outcome = self.inner.pool.free(handle)?;
        if outcome == FreeOutcome::Released {
            match self.inner.submitter.detach(&self.inner.ctx(), handle) {
                Ok(()) => self.inner.processor.lock().reset_channel(handle.id),
                // Someone else already rebound the slot; attach cleaned up.
                Err(Host1xError::InvalidState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    pub fn channel_state(&self, ch: ChannelId) -> Host1xResult<CdmaState> {
        self.inner.submitter.state(ch)
    }

    pub fn channels_in_use(&self) -> usize {
        self.inner.pool.in_use()
    }

    // Command streams

    pub fn begin(&self, handle: &ChannelHandle) -> Host1xResult<()> {
        self.inner.submitter.begin(&self.inner.ctx(), handle)
    }

    /// `begin`, waiting out a serialized predecessor for up to `timeout`.
    pub fn begin_blocking(&self, handle: &ChannelHandle, timeout: Duration) -> Host1xResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.begin(handle) {
                Err(Host1xError::Busy(BusyResource::Serialized { id, target, .. })) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Host1xError::Timeout {
                            id,
                            threshold: target,
                            current: self.inner.syncpts.read(id)?,
                        });
                    }
                    self.wait(id, target, remaining)?;
                }
                other => return other,
            }
        }
    }

    pub fn push_words(&self, handle: &ChannelHandle, words: &[u32]) -> Host1xResult<()> {
        self.inner.submitter.push_words(&self.inner.ctx(), handle, words)
    }

    pub fn append_syncpoint_increment(&self, handle: &ChannelHandle, id: u32) -> Host1xResult<()> {
        self.inner
            .submitter
            .append_syncpoint_increment(&self.inner.ctx(), handle, id)
    }

    pub fn append_syncpoint_wait(&self, handle: &ChannelHandle, id: u32, threshold: u32) -> Host1xResult<()> {
        self.inner
            .submitter
            .append_syncpoint_wait(&self.inner.ctx(), handle, id, threshold)
    }

    /// Submit the stream being built.
    pub fn flush(&self, handle: &ChannelHandle) -> Host1xResult<Submission> {
        self.inner.submitter.submit(&self.inner.ctx(), handle)
    }

    pub fn abort(&self, handle: &ChannelHandle) -> Host1xResult<()> {
        self.inner.submitter.abort(&self.inner.ctx(), handle)
    }

    /// Build and submit `words` followed by one increment per entry of
    /// `increments`. A serialized channel still running its previous job
    /// reports `Busy` without blocking.
    pub fn submit(&self, handle: &ChannelHandle, words: &[u32], increments: &[u32]) -> Host1xResult<Submission> {
        self.begin(handle)?;
        self.fill_and_flush(handle, words, increments)
    }

    /// `submit`, waiting up to the configured submit timeout for a
    /// serialized predecessor.
    pub fn submit_blocking(
        &self,
        handle: &ChannelHandle,
        words: &[u32],
        increments: &[u32],
    ) -> Host1xResult<Submission> {
        self.submit_within(handle, words, increments, self.inner.settings.submit_timeout())
    }

    /// `submit`, waiting up to `timeout` for a serialized predecessor.
    pub fn submit_within(
        &self,
        handle: &ChannelHandle,
        words: &[u32],
        increments: &[u32],
        timeout: Duration,
    ) -> Host1xResult<Submission> {
        self.begin_blocking(handle, timeout)?;
        self.fill_and_flush(handle, words, increments)
    }

    fn fill_and_flush(&self, handle: &ChannelHandle, words: &[u32], increments: &[u32]) -> Host1xResult<Submission> {
        let built = self.push_words(handle, words).and_then(|()| {
            increments
                .iter()
                .try_for_each(|&id| self.append_syncpoint_increment(handle, id))
        });
        if let Err(e) = built {
            self.abort(handle)?;
            return Err(e);
        }
        self.flush(handle)
    }

    pub fn job_status(&self, ticket: &JobTicket) -> JobStatus {
        self.inner.submitter.job_status(ticket)
    }

    // Simulated hardware

    /// Let every channel's DMA engine fetch and execute what has been
    /// published, until no channel makes progress. Returns the number of
    /// words executed.
    pub fn run_channels(&self) -> Host1xResult<usize> {
        let inner = &self.inner;
        let ctx = inner.ctx();
        let mut faulted = 0u32;
        let mut total = 0;
        {
            let mut processor = inner.processor.lock();
            loop {
                let mut progress = 0;
                for ch in 0..inner.pool.capacity() as ChannelId {
                    if faulted & (1 << ch) != 0 {
                        continue;
                    }
                    let Some((get, words)) = inner.submitter.fetch(&ctx, ch)? else {
                        continue;
                    };
                    let outcome = processor.execute(ch, &words, &inner.regs);
                    let incrs = processor.take_increments();
                    inner
                        .submitter
                        .advance_get(&ctx, ch, get, outcome.consumed(), &incrs)?;
                    progress += outcome.consumed();
                    if let ExecOutcome::Faulted { code, .. } = outcome {
                        log::warn!("host1x: channel {} raised fault 0x{:X}", ch, code);
                        faulted |= 1 << ch;
                        inner.regs.raise_channel_fault(ch, code);
                    }
                }
                total += progress;
                if progress == 0 {
                    break;
                }
            }
        }
        inner.poll()?;
        Ok(total)
    }

    /// Service pending interrupts on the calling thread.
    pub fn service_interrupts(&self) -> Host1xResult<DispatchReport> {
        self.inner.service_interrupts()
    }

    // Syncpoints

    /// Current value, refreshed from hardware.
    pub fn read_syncpoint(&self, id: u32) -> Host1xResult<u32> {
        self.inner.check_syncpoint(id)?;
        self.inner
            .intr
            .refresh(id, &self.inner.syncpts, self.inner.ops.as_ref(), &self.inner.regs)
    }

    pub fn read_syncpoint_max(&self, id: u32) -> Host1xResult<u32> {
        self.inner.syncpts.read_max(id)
    }

    pub fn syncpoint_name(&self, id: u32) -> &'static str {
        self.inner.syncpts.name(id)
    }

    /// Increment a syncpoint from the CPU. Returns the new value.
    pub fn cpu_increment(&self, id: u32) -> Host1xResult<u32> {
        let inner = &self.inner;
        inner.check_syncpoint(id)?;
        if !inner.syncpts.is_client_managed(id) {
            inner.syncpts.incr_max(id, 1)?;
        }
        inner.ops.syncpt_cpu_incr(&inner.regs, id);
        let value = self.read_syncpoint(id)?;
        inner.poll()?;
        Ok(value)
    }

    /// Reserve `n` increments a client will perform itself. Returns the
    /// threshold to wait on.
    pub fn reserve_increments(&self, id: u32, n: u32) -> Host1xResult<u32> {
        self.inner.syncpts.incr_max(id, n)
    }

    /// Companion base value, refreshed from hardware.
    pub fn read_wait_base(&self, base: u32) -> Host1xResult<u32> {
        let inner = &self.inner;
        inner.syncpts.wait_base(base)?;
        let value = inner.ops.wait_base_load(&inner.regs, base);
        inner.syncpts.set_wait_base(base, value)?;
        Ok(value)
    }

    /// Block until syncpoint `id` reaches `threshold` or `timeout` expires.
    pub fn wait(&self, id: u32, threshold: u32, timeout: Duration) -> Host1xResult<u32> {
        let inner = &self.inner;
        let slot = WaitSlot::new();
        let registration = inner.intr.register(
            id,
            threshold,
            WaiterAction::Wakeup(slot.clone()),
            &inner.syncpts,
            inner.ops.as_ref(),
            &inner.regs,
        )?;
        let waiter = match registration {
            Registration::Expired(v) => return Ok(v),
            Registration::Queued(r) => r,
        };
        if let Some(v) = inner.block_on(&slot, timeout) {
            return Ok(v);
        }
        if !inner.intr.cancel(waiter, inner.ops.as_ref(), &inner.regs) {
            // Fired between the timeout and the cancel.
            if let Some(v) = slot.wait(Duration::ZERO) {
                return Ok(v);
            }
        }
        let current = inner.syncpts.read(id)?;
        log::warn!(
            "host1x: wait on syncpoint {} ({}) for {} timed out at {}",
            id,
            inner.syncpts.name(id),
            threshold,
            current
        );
        if inner.settings.dump_on_timeout {
            log::warn!("{}", inner.snapshot());
        }
        Err(Host1xError::Timeout {
            id,
            threshold,
            current,
        })
    }

    /// `wait` with the configured default timeout.
    pub fn wait_default(&self, id: u32, threshold: u32) -> Host1xResult<u32> {
        self.wait(id, threshold, self.inner.settings.wait_timeout())
    }

    /// Register a wait without blocking.
    pub fn wait_async(&self, id: u32, threshold: u32) -> Host1xResult<PendingWait> {
        let inner = &self.inner;
        let slot = WaitSlot::new();
        let registration = inner.intr.register(
            id,
            threshold,
            WaiterAction::Wakeup(slot.clone()),
            &inner.syncpts,
            inner.ops.as_ref(),
            &inner.regs,
        )?;
        let (registration, expired) = match registration {
            Registration::Expired(v) => (None, Some(v)),
            Registration::Queued(r) => (Some(r), None),
        };
        Ok(PendingWait {
            inner: Arc::clone(inner),
            slot,
            registration,
            expired,
            id,
            threshold,
        })
    }

    // Module mutexes

    /// Register a CPU client of the module locks.
    pub fn mutex_client(&self, label: &'static str) -> MutexClient {
        let token = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
        log::debug!("host1x: mutex client {} ({})", token, label);
        MutexClient::new(token, label)
    }

    /// Take every lock in `mask` for `client`, or none of them.
    pub fn mutex_try_acquire(&self, mask: u32, client: &MutexClient) -> Host1xResult<bool> {
        let acquired = self.inner.mutexes.try_acquire(mask, client.owner())?;
        if acquired {
            self.mirror_mlocks(mask, MlockOwner::Cpu);
        }
        Ok(acquired)
    }

    /// Block until every lock in `mask` is free, then take them.
    pub fn mutex_acquire(&self, mask: u32, client: &MutexClient, timeout: Duration) -> Host1xResult<()> {
        self.inner.mutexes.acquire(mask, client.owner(), timeout)?;
        self.mirror_mlocks(mask, MlockOwner::Cpu);
        Ok(())
    }

    /// Release locks `client` holds. Bits held by anyone else, channels
    /// included, are refused with `MutexNotHeld`.
    pub fn mutex_release(&self, mask: u32, client: &MutexClient) -> Host1xResult<()> {
        self.inner.mutexes.release(mask, client.owner())?;
        self.mirror_mlocks(mask, MlockOwner::Free);
        Ok(())
    }

    fn mirror_mlocks(&self, mask: u32, owner: MlockOwner) {
        for b in host1x_common::bits(mask) {
            self.inner.ops.mlock_update(&self.inner.regs, b, owner);
        }
    }

    // Debug

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        self.inner.snapshot()
    }

    /// The simulated register aperture, for tests and fault injection.
    pub fn registers(&self) -> &RegisterFile {
        &self.inner.regs
    }
}

impl Drop for HostEngine {
    fn drop(&mut self) {
        if self.inner.settings.dump_on_exit {
            log::info!("{}", self.inner.snapshot());
        }
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.regs.irq().raise();
        if let Some(handle) = self.irq_thread.take() {
            if handle.join().is_err() {
                log::error!("host1x: interrupt thread panicked");
            }
        }
    }
}
