// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command stream submission (CDMA).
//!
//! Every channel runs a small state machine:
//!
//! ```text
//! Idle --begin--> Building --submit--> Pushed --fences reached--> Idle
//!                    |                   (serialize modules only)
//!                    +--abort--> Idle
//! ```
//!
//! Channels of non-serialize modules drop back to Idle as soon as a job is
//! queued, so several jobs may be in flight; serialize modules keep the
//! channel Pushed until every syncpoint target of the job is reached.
//!
//! A channel takes its module's mutex mask on the first `begin` and keeps it
//! until no job is in flight.
//!
//! Several channels may increment the same syncpoint, so a job is only
//! complete once its own channel has executed every increment it queued and
//! its targets are reached. A job dropped by a fault or teardown has exactly
//! its unexecuted increments performed by the CPU.

use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};

use host1x_common::{
    bit, bits, syncpoint_reached, BusyResource, ChannelId, Host1xError, Host1xResult, IdKind,
};

use crate::channel::ChannelHandle;
use crate::chip::{ChipOps, MlockOwner};
use crate::device::ModuleDevice;
use crate::intr::{InterruptDispatcher, Registration, WaiterAction, WaiterRef};
use crate::module_mutex::{ModuleMutexSet, MutexOwner};
use crate::opcodes::{self, IncrCond, HOST1X_CLASS_ID, UCLASS_WAIT_SYNCPT};
use crate::push_buffer::PushBuffer;
use crate::registers::RegisterFile;
use crate::syncpoint::SyncpointTable;

/// Finished jobs remembered per channel for `job_status`.
const HISTORY_LEN: usize = 32;

/// Borrowed view of the engine state a submission touches.
#[derive(Clone, Copy)]
pub struct SubmitContext<'a> {
    pub ops: &'a dyn ChipOps,
    pub regs: &'a RegisterFile,
    pub syncpts: &'a SyncpointTable,
    pub mutexes: &'a ModuleMutexSet,
    pub intr: &'a InterruptDispatcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdmaState {
    Idle,
    Building,
    Pushed,
}

impl CdmaState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Pushed => "pushed",
        }
    }
}

/// Syncpoint target a job reaches when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fence {
    pub id: u32,
    pub threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobTicket {
    pub channel: ChannelId,
    pub generation: u32,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Completed,
    Faulted(u32),
    /// Dropped when its channel was released with the job still in flight.
    Aborted,
    Unknown,
}

/// A queued job and the targets to wait on for its completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub ticket: JobTicket,
    pub fences: Vec<Fence>,
}

impl Submission {
    /// Fence on `id`, if the job increments it.
    pub fn fence(&self, id: u32) -> Option<Fence> {
        self.fences.iter().copied().find(|f| f.id == id)
    }
}

struct Binding {
    module: &'static str,
    class: u32,
    serialize: bool,
    mutexes: u32,
    primary_syncpt: Option<u32>,
}

struct Build {
    start: u32,
    /// (syncpoint, increments) in first-use order.
    incrs: Vec<(u32, u32)>,
}

/// Increments a job queued on one syncpoint.
struct JobIncr {
    id: u32,
    queued: u32,
    executed: u32,
}

struct Job {
    ticket: JobTicket,
    start: u32,
    end: u32,
    fences: Vec<Fence>,
    incrs: Vec<JobIncr>,
    waiters: Vec<WaiterRef>,
}

impl Job {
    fn executed_all(&self) -> bool {
        self.incrs.iter().all(|i| i.executed >= i.queued)
    }

    /// Whether ring position `pos` lies inside this job's words.
    fn contains(&self, pos: u32, mask: u32) -> bool {
        pos.wrapping_sub(self.start) & mask < self.end.wrapping_sub(self.start) & mask
    }
}

struct Cdma {
    id: ChannelId,
    generation: u32,
    binding: Option<Binding>,
    state: CdmaState,
    ring: PushBuffer,
    build: Option<Build>,
    jobs: VecDeque<Job>,
    mutexes_held: u32,
    next_seq: u64,
    history: VecDeque<(JobTicket, JobStatus)>,
}

impl Cdma {
    fn new(id: ChannelId) -> Self {
        Self {
            id,
            generation: 0,
            binding: None,
            state: CdmaState::Idle,
            ring: PushBuffer::new(16),
            build: None,
            jobs: VecDeque::new(),
            mutexes_held: 0,
            next_seq: 1,
            history: VecDeque::new(),
        }
    }

    fn module(&self) -> &'static str {
        self.binding.as_ref().map_or("?", |b| b.module)
    }

    fn serialize(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| b.serialize)
    }

    fn mutex_owner(&self) -> MutexOwner {
        MutexOwner::Channel {
            id: self.id,
            generation: self.generation,
        }
    }

    fn record(&mut self, ticket: JobTicket, status: JobStatus) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back((ticket, status));
    }

    fn expect_building(&self) -> Host1xResult<()> {
        if self.state != CdmaState::Building {
            return Err(Host1xError::InvalidState {
                channel: self.id,
                expected: CdmaState::Building.as_str(),
                actual: self.state.as_str(),
            });
        }
        Ok(())
    }

    fn release_mutexes(&mut self, ctx: &SubmitContext<'_>) {
        if self.mutexes_held == 0 {
            return;
        }
        let mask = self.mutexes_held;
        if let Err(e) = ctx.mutexes.release(mask, self.mutex_owner()) {
            log::error!("cdma: channel {} mutex release failed: {}", self.id, e);
        }
        for b in bits(mask) {
            ctx.ops.mlock_update(ctx.regs, b, MlockOwner::Free);
        }
        self.mutexes_held = 0;
    }

    /// Space available to `push`, bounded by both retired jobs and the
    /// hardware read pointer.
    fn available(&self, ctx: &SubmitContext<'_>) -> usize {
        let get = ctx.ops.cdma_get(ctx.regs, self.id);
        self.ring.space().min(self.ring.space_to(get))
    }

    fn push(&mut self, ctx: &SubmitContext<'_>, words: &[u32]) -> Host1xResult<()> {
        self.expect_building()?;
        let available = self.available(ctx);
        if words.len() > available {
            return Err(Host1xError::RingFull {
                channel: self.id,
                needed: words.len(),
                available,
            });
        }
        self.ring.push(words).map_err(|available| Host1xError::RingFull {
            channel: self.id,
            needed: words.len(),
            available,
        })
    }

    /// Retire jobs from the front of the queue whose increments all ran on
    /// this channel and whose targets are reached.
    fn retire(&mut self, ctx: &SubmitContext<'_>) -> Host1xResult<usize> {
        let mut retired = 0;
        while let Some(job) = self.jobs.front() {
            if !job.executed_all() {
                break;
            }
            let mut done = true;
            for f in &job.fences {
                let value = ctx.intr.refresh(f.id, ctx.syncpts, ctx.ops, ctx.regs)?;
                if !syncpoint_reached(value, f.threshold) {
                    done = false;
                    break;
                }
            }
            if !done {
                break;
            }
            let Some(job) = self.jobs.pop_front() else {
                break;
            };
            for w in &job.waiters {
                ctx.intr.cancel(*w, ctx.ops, ctx.regs);
            }
            self.ring.pop_to(job.end);
            log::trace!("cdma: channel {} job {} completed", self.id, job.ticket.seq);
            self.record(job.ticket, JobStatus::Completed);
            retired += 1;
        }
        if self.jobs.is_empty() {
            if self.state == CdmaState::Pushed {
                self.state = CdmaState::Idle;
            }
            if self.state == CdmaState::Idle {
                self.release_mutexes(ctx);
            }
        }
        Ok(retired)
    }

    /// Count an increment the channel executed at ring position `pos`
    /// towards the job whose words hold it.
    fn credit(&mut self, pos: u32, id: u32) {
        let mask = (self.ring.size() - 1) as u32;
        let Some(job) = self.jobs.iter_mut().find(|j| j.contains(pos, mask)) else {
            log::trace!("cdma: channel {} increment of {} outside any job", self.id, id);
            return;
        };
        match job.incrs.iter_mut().find(|i| i.id == id && i.executed < i.queued) {
            Some(incr) => incr.executed += 1,
            None => log::trace!(
                "cdma: channel {} job {} ran an unreserved increment of {}",
                self.id,
                job.ticket.seq,
                id
            ),
        }
    }

    /// Drop every in-flight job. Increments a job queued but never executed
    /// are performed by the CPU, so targets reserved after it stay reachable.
    fn drain(&mut self, ctx: &SubmitContext<'_>, status: JobStatus) -> Host1xResult<Vec<JobTicket>> {
        let mut dropped = Vec::new();
        while let Some(job) = self.jobs.pop_front() {
            for w in &job.waiters {
                ctx.intr.cancel(*w, ctx.ops, ctx.regs);
            }
            if job.executed_all() {
                // Its own work is done; only other channels' targets lag.
                self.record(job.ticket, JobStatus::Completed);
                continue;
            }
            for incr in &job.incrs {
                let missing = incr.queued.saturating_sub(incr.executed);
                if missing == 0 {
                    continue;
                }
                for _ in 0..missing {
                    ctx.ops.syncpt_cpu_incr(ctx.regs, incr.id);
                }
                log::debug!(
                    "cdma: channel {} cpu-incremented syncpoint {} by {}",
                    self.id,
                    incr.id,
                    missing
                );
                ctx.intr.refresh(incr.id, ctx.syncpts, ctx.ops, ctx.regs)?;
            }
            self.record(job.ticket, status);
            dropped.push(job.ticket);
        }
        Ok(dropped)
    }

    /// Stop DMA and start over with an empty ring.
    fn reset_ring(&mut self, ctx: &SubmitContext<'_>) -> Host1xResult<()> {
        self.build = None;
        self.state = CdmaState::Idle;
        self.ring.reset();
        ctx.ops.cdma_reset(ctx.regs, self.id);
        ctx.ops.cdma_start(ctx.regs, self.id, self.ring.size())
    }
}

/// Per-channel DMA state for the whole channel array.
pub struct CommandStreamSubmitter {
    channels: Vec<Mutex<Cdma>>,
}

/// Snapshot of one channel's DMA state.
#[derive(Debug, Clone)]
pub struct CdmaStatus {
    pub channel: ChannelId,
    pub module: Option<&'static str>,
    pub state: CdmaState,
    pub ring_size: usize,
    pub dmaput: u32,
    pub dmaget: u32,
    pub in_flight: usize,
    pub mutexes: u32,
}

impl CommandStreamSubmitter {
    pub fn new(nb_channels: usize) -> Self {
        Self {
            channels: (0..nb_channels as ChannelId).map(|i| Mutex::new(Cdma::new(i))).collect(),
        }
    }

    fn slot(&self, ch: ChannelId) -> Host1xResult<MutexGuard<'_, Cdma>> {
        self.channels
            .get(ch as usize)
            .map(|c| c.lock())
            .ok_or(Host1xError::InvalidId {
                kind: IdKind::Channel,
                id: ch,
            })
    }

    fn lock(&self, handle: &ChannelHandle) -> Host1xResult<MutexGuard<'_, Cdma>> {
        let cdma = self.slot(handle.id)?;
        if cdma.binding.is_none() || cdma.generation != handle.generation {
            return Err(Host1xError::InvalidState {
                channel: handle.id,
                expected: "owned",
                actual: if cdma.binding.is_none() { "free" } else { "rebound" },
            });
        }
        Ok(cdma)
    }

    /// Bind a freshly allocated channel to `module` and start its DMA engine
    /// on an empty ring of `words` words.
    pub fn attach(
        &self,
        ctx: &SubmitContext<'_>,
        handle: &ChannelHandle,
        module: &ModuleDevice,
        words: usize,
    ) -> Host1xResult<()> {
        let mut cdma = self.slot(handle.id)?;
        if !cdma.jobs.is_empty() {
            // The previous owner freed the slot before its detach ran.
            cdma.drain(ctx, JobStatus::Aborted)?;
        }
        cdma.release_mutexes(ctx);
        cdma.binding = None;
        cdma.ring = PushBuffer::new(words);
        cdma.reset_ring(ctx)?;
        cdma.generation = handle.generation;
        cdma.binding = Some(Binding {
            module: module.name,
            class: module.class,
            serialize: module.is_serialized(),
            mutexes: module.modulemutexes,
            primary_syncpt: module.primary_syncpoint(),
        });
        log::debug!(
            "cdma: channel {} attached to {} ({} words)",
            handle.id,
            module.name,
            cdma.ring.size()
        );
        Ok(())
    }

    /// Tear down a channel whose last reference went away. Jobs still in
    /// flight are dropped as `Aborted`.
    pub fn detach(&self, ctx: &SubmitContext<'_>, handle: &ChannelHandle) -> Host1xResult<()> {
        let mut cdma = self.lock(handle)?;
        if !cdma.jobs.is_empty() || cdma.state == CdmaState::Building {
            log::warn!(
                "cdma: channel {} ({}) released with {} job(s) in flight",
                handle.id,
                cdma.module(),
                cdma.jobs.len()
            );
        }
        cdma.drain(ctx, JobStatus::Aborted)?;
        cdma.release_mutexes(ctx);
        cdma.binding = None;
        cdma.reset_ring(ctx)
    }

    /// Idle -> Building.
    ///
    /// A serialize channel whose previous job is still running reports
    /// `Busy(Serialized)` with the target to wait on.
    pub fn begin(&self, ctx: &SubmitContext<'_>, handle: &ChannelHandle) -> Host1xResult<()> {
        let mut cdma = self.lock(handle)?;
        match cdma.state {
            CdmaState::Building => {
                return Err(Host1xError::Busy(BusyResource::Channel(handle.id)));
            }
            CdmaState::Pushed => {
                cdma.retire(ctx)?;
                if cdma.state == CdmaState::Pushed {
                    let pending = cdma
                        .jobs
                        .iter()
                        .flat_map(|j| j.fences.iter())
                        .find(|f| !ctx.syncpts.satisfied(f.id, f.threshold).unwrap_or(false))
                        .copied();
                    let (id, target) = pending.map_or((0, 0), |f| (f.id, f.threshold));
                    return Err(Host1xError::Busy(BusyResource::Serialized {
                        module: cdma.module(),
                        id,
                        target,
                    }));
                }
            }
            CdmaState::Idle => {}
        }

        let wanted = cdma.binding.as_ref().map_or(0, |b| b.mutexes);
        let missing = wanted & !cdma.mutexes_held;
        if missing != 0 {
            if !ctx.mutexes.try_acquire(missing, cdma.mutex_owner())? {
                return Err(Host1xError::MutexConflict {
                    requested: missing,
                    held: ctx.mutexes.held(),
                });
            }
            for b in bits(missing) {
                ctx.ops.mlock_update(ctx.regs, b, MlockOwner::Channel(handle.id));
            }
            cdma.mutexes_held |= missing;
        }

        let start = cdma.ring.put();
        cdma.build = Some(Build {
            start,
            incrs: Vec::new(),
        });
        cdma.state = CdmaState::Building;
        log::trace!("cdma: channel {} building at {}", handle.id, start);
        Ok(())
    }

    /// Append raw command words. All-or-nothing.
    pub fn push_words(
        &self,
        ctx: &SubmitContext<'_>,
        handle: &ChannelHandle,
        words: &[u32],
    ) -> Host1xResult<()> {
        self.lock(handle)?.push(ctx, words)
    }

    /// Append `IMM(incr_syncpt, OP_DONE | id)` and count the increment.
    pub fn append_syncpoint_increment(
        &self,
        ctx: &SubmitContext<'_>,
        handle: &ChannelHandle,
        id: u32,
    ) -> Host1xResult<()> {
        if id as usize >= ctx.syncpts.len() {
            return Err(Host1xError::InvalidId {
                kind: IdKind::Syncpoint,
                id,
            });
        }
        let mut cdma = self.lock(handle)?;
        cdma.push(ctx, &[opcodes::imm_incr_syncpt(IncrCond::OpDone, id)])?;
        if let Some(build) = cdma.build.as_mut() {
            match build.incrs.iter_mut().find(|(sp, _)| *sp == id) {
                Some((_, n)) => *n += 1,
                None => build.incrs.push((id, 1)),
            }
        }
        Ok(())
    }

    /// Append a host class wait so the channel stalls until syncpoint `id`
    /// reaches `threshold`, then switch back to the module's class.
    pub fn append_syncpoint_wait(
        &self,
        ctx: &SubmitContext<'_>,
        handle: &ChannelHandle,
        id: u32,
        threshold: u32,
    ) -> Host1xResult<()> {
        if id as usize >= ctx.syncpts.len() {
            return Err(Host1xError::InvalidId {
                kind: IdKind::Syncpoint,
                id,
            });
        }
        let mut cdma = self.lock(handle)?;
        let class = cdma.binding.as_ref().map_or(0, |b| b.class);
        let mut words = vec![
            opcodes::setclass(HOST1X_CLASS_ID, UCLASS_WAIT_SYNCPT, 1),
            opcodes::wait_syncpt(id, threshold),
        ];
        if class != 0 && class != HOST1X_CLASS_ID {
            words.push(opcodes::setclass(class, 0, 0));
        }
        cdma.push(ctx, &words)
    }

    /// Building -> Pushed: reserve syncpoint targets, publish DMAPUT and
    /// register completion actions.
    ///
    /// A stream without any increment gets one on the module's primary
    /// syncpoint so its completion can be observed.
    pub fn submit(&self, ctx: &SubmitContext<'_>, handle: &ChannelHandle) -> Host1xResult<Submission> {
        let mut cdma = self.lock(handle)?;
        cdma.expect_building()?;

        let has_incrs = cdma.build.as_ref().is_some_and(|b| !b.incrs.is_empty());
        if !has_incrs {
            let primary = cdma.binding.as_ref().and_then(|b| b.primary_syncpt);
            let Some(id) = primary else {
                return Err(Host1xError::InvalidState {
                    channel: handle.id,
                    expected: "syncpoint increment",
                    actual: "none",
                });
            };
            cdma.push(ctx, &[opcodes::imm_incr_syncpt(IncrCond::OpDone, id)])?;
            if let Some(build) = cdma.build.as_mut() {
                build.incrs.push((id, 1));
            }
        }

        let build = cdma.build.take().ok_or(Host1xError::InvalidState {
            channel: handle.id,
            expected: "building",
            actual: "idle",
        })?;

        // Reserving the targets is the last step that can fail; from here on
        // the job is queued.
        let thresholds = match ctx.syncpts.reserve(&build.incrs) {
            Ok(t) => t,
            Err(e) => {
                cdma.build = Some(build);
                return Err(e);
            }
        };
        let fences: Vec<Fence> = build
            .incrs
            .iter()
            .zip(&thresholds)
            .map(|(&(id, _), &threshold)| Fence { id, threshold })
            .collect();

        let ticket = JobTicket {
            channel: handle.id,
            generation: cdma.generation,
            seq: cdma.next_seq,
        };
        cdma.next_seq += 1;

        let mut waiters = Vec::new();
        for f in &fences {
            let action = WaiterAction::SubmitComplete {
                channel: handle.id,
                generation: cdma.generation,
            };
            match ctx
                .intr
                .register(f.id, f.threshold, action, ctx.syncpts, ctx.ops, ctx.regs)
            {
                Ok(Registration::Queued(r)) => waiters.push(r),
                Ok(Registration::Expired(_)) => {}
                // Still retired once its words execute.
                Err(e) => log::error!(
                    "cdma: channel {} job {} has no completion watch on {}: {}",
                    handle.id,
                    ticket.seq,
                    f.id,
                    e
                ),
            }
        }

        let end = cdma.ring.put();
        cdma.jobs.push_back(Job {
            ticket,
            start: build.start,
            end,
            fences: fences.clone(),
            incrs: build
                .incrs
                .iter()
                .map(|&(id, queued)| JobIncr {
                    id,
                    queued,
                    executed: 0,
                })
                .collect(),
            waiters,
        });
        ctx.ops.cdma_kick(ctx.regs, handle.id, end);
        cdma.state = if cdma.serialize() {
            CdmaState::Pushed
        } else {
            CdmaState::Idle
        };

        log::debug!(
            "cdma: channel {} ({}) job {} submitted, {} words, fences {:?}",
            handle.id,
            cdma.module(),
            ticket.seq,
            end.wrapping_sub(build.start) as usize & (cdma.ring.size() - 1),
            fences
        );
        Ok(Submission { ticket, fences })
    }

    /// Drop the stream being built and rewind the write pointer.
    pub fn abort(&self, ctx: &SubmitContext<'_>, handle: &ChannelHandle) -> Host1xResult<()> {
        let mut cdma = self.lock(handle)?;
        cdma.expect_building()?;
        if let Some(build) = cdma.build.take() {
            cdma.ring.rewind(build.start);
        }
        cdma.state = CdmaState::Idle;
        if cdma.jobs.is_empty() {
            cdma.release_mutexes(ctx);
        }
        log::trace!("cdma: channel {} stream aborted", handle.id);
        Ok(())
    }

    /// Retire finished jobs on channel `ch`. Stale generations are ignored.
    pub fn update(&self, ctx: &SubmitContext<'_>, ch: ChannelId, generation: u32) -> Host1xResult<usize> {
        let mut cdma = self.slot(ch)?;
        if cdma.binding.is_none() || cdma.generation != generation {
            return Ok(0);
        }
        cdma.retire(ctx)
    }

    /// Handle a fault on channel `ch`: every in-flight job fails with `code`
    /// and the channel restarts on an empty ring. Other channels are not
    /// touched.
    pub fn fault(&self, ctx: &SubmitContext<'_>, ch: ChannelId, code: u32) -> Host1xResult<Vec<JobTicket>> {
        let mut cdma = self.slot(ch)?;
        let failed = cdma.drain(ctx, JobStatus::Faulted(code))?;
        cdma.release_mutexes(ctx);
        cdma.reset_ring(ctx)?;
        log::warn!(
            "cdma: channel {} ({}) fault 0x{:X}, {} job(s) failed",
            ch,
            cdma.module(),
            code,
            failed.len()
        );
        Ok(failed)
    }

    pub fn job_status(&self, ticket: &JobTicket) -> JobStatus {
        let Ok(cdma) = self.slot(ticket.channel) else {
            return JobStatus::Unknown;
        };
        if cdma.jobs.iter().any(|j| j.ticket == *ticket) {
            return JobStatus::Queued;
        }
        cdma.history
            .iter()
            .rev()
            .find(|(t, _)| t == ticket)
            .map_or(JobStatus::Unknown, |(_, s)| *s)
    }

    pub fn state(&self, ch: ChannelId) -> Host1xResult<CdmaState> {
        Ok(self.slot(ch)?.state)
    }

    /// Words the DMA engine has yet to fetch, with the read pointer they
    /// start at. `None` when the channel is caught up.
    pub fn fetch(&self, ctx: &SubmitContext<'_>, ch: ChannelId) -> Host1xResult<Option<(u32, Vec<u32>)>> {
        let cdma = self.slot(ch)?;
        let get = ctx.ops.cdma_get(ctx.regs, ch);
        let put = ctx.ops.cdma_put(ctx.regs, ch);
        if get == put {
            return Ok(None);
        }
        Ok(Some((get, cdma.ring.read_range(get, put))))
    }

    /// Move the hardware read pointer past `consumed` words from `get`.
    ///
    /// `incrs` lists the syncpoint increments executed on the way, as
    /// `(word offset from get, syncpoint)`; each is credited to the job it
    /// belongs to and jobs that finished are retired.
    pub fn advance_get(
        &self,
        ctx: &SubmitContext<'_>,
        ch: ChannelId,
        get: u32,
        consumed: usize,
        incrs: &[(usize, u32)],
    ) -> Host1xResult<()> {
        let mut cdma = self.slot(ch)?;
        for &(offset, id) in incrs {
            let pos = cdma.ring.advance(get, offset);
            cdma.credit(pos, id);
        }
        ctx.ops.cdma_set_get(ctx.regs, ch, cdma.ring.advance(get, consumed));
        if cdma.binding.is_some() && !incrs.is_empty() {
            cdma.retire(ctx)?;
        }
        Ok(())
    }

    /// Channels with published words the DMA engine has not fetched.
    pub fn busy_channels(&self, ctx: &SubmitContext<'_>) -> u32 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let ch = *i as ChannelId;
                ctx.ops.cdma_get(ctx.regs, ch) != ctx.ops.cdma_put(ctx.regs, ch)
            })
            .fold(0, |acc, (i, _)| acc | bit(i as u32))
    }

    pub fn status(&self, ctx: &SubmitContext<'_>) -> Vec<CdmaStatus> {
        self.channels
            .iter()
            .map(|c| {
                let cdma = c.lock();
                CdmaStatus {
                    channel: cdma.id,
                    module: cdma.binding.as_ref().map(|b| b.module),
                    state: cdma.state,
                    ring_size: cdma.ring.size(),
                    dmaput: ctx.ops.cdma_put(ctx.regs, cdma.id),
                    dmaget: ctx.ops.cdma_get(ctx.regs, cdma.id),
                    in_flight: cdma.jobs.len(),
                    mutexes: cdma.mutexes_held,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelPool;
    use crate::chip::t20::{
        t20_devices, T20ChipOps, MODMUTEX_2D_FULL, MODMUTEX_3D, SYNCPT_2D_0, SYNCPT_2D_1,
        SYNCPT_3D, SYNCPT_MPE,
    };
    use crate::command_processor::{CommandProcessor, ExecOutcome};
    use crate::registers::sync;

    struct Fixture {
        ops: T20ChipOps,
        regs: RegisterFile,
        syncpts: SyncpointTable,
        mutexes: ModuleMutexSet,
        intr: InterruptDispatcher,
        pool: ChannelPool,
        sub: CommandStreamSubmitter,
    }

    impl Fixture {
        fn new() -> Self {
            let ops = T20ChipOps::new();
            let syncpts = SyncpointTable::new(ops.info());
            Self {
                ops,
                regs: RegisterFile::new(),
                syncpts,
                mutexes: ModuleMutexSet::new(16),
                intr: InterruptDispatcher::new(32),
                pool: ChannelPool::new(8),
                sub: CommandStreamSubmitter::new(8),
            }
        }

        fn ctx(&self) -> SubmitContext<'_> {
            SubmitContext {
                ops: &self.ops,
                regs: &self.regs,
                syncpts: &self.syncpts,
                mutexes: &self.mutexes,
                intr: &self.intr,
            }
        }

        fn open(&self, name: &str, words: usize) -> ChannelHandle {
            let module = t20_devices().into_iter().find(|d| d.name == name).unwrap();
            let h = self.pool.allocate(&module, words).unwrap();
            self.sub.attach(&self.ctx(), &h, &module, words).unwrap();
            h
        }

        /// Run the channel's DMA engine over everything published.
        fn run(&self, ch: ChannelId, cp: &mut CommandProcessor) -> Option<ExecOutcome> {
            let (get, words) = self.sub.fetch(&self.ctx(), ch).unwrap()?;
            let outcome = cp.execute(ch, &words, &self.regs);
            let incrs = cp.take_increments();
            self.sub
                .advance_get(&self.ctx(), ch, get, outcome.consumed(), &incrs)
                .unwrap();
            Some(outcome)
        }

        /// Service interrupts and retire what completed.
        fn service(&self) {
            let report = self
                .intr
                .dispatch(&self.syncpts, &self.ops, &self.regs)
                .unwrap();
            for (ch, code) in report.faults {
                self.sub.fault(&self.ctx(), ch, code).unwrap();
            }
            for (ch, gen) in report.completions {
                self.sub.update(&self.ctx(), ch, gen).unwrap();
            }
        }
    }

    #[test]
    fn test_state_machine() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr3d", 64);

        assert!(matches!(
            f.sub.push_words(&ctx, &h, &[opcodes::NOOP]),
            Err(Host1xError::InvalidState {
                expected: "building",
                actual: "idle",
                ..
            })
        ));

        f.sub.begin(&ctx, &h).unwrap();
        assert_eq!(
            f.sub.begin(&ctx, &h),
            Err(Host1xError::Busy(BusyResource::Channel(h.id)))
        );
        f.sub.push_words(&ctx, &h, &[opcodes::NOOP]).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        let s = f.sub.submit(&ctx, &h).unwrap();
        assert_eq!(
            s.fences,
            vec![Fence {
                id: SYNCPT_3D,
                threshold: 2
            }]
        );
        assert_eq!(f.syncpts.read_max(SYNCPT_3D).unwrap(), 2);
        assert_eq!(f.ops.cdma_put(&f.regs, h.id), 3);
        // Not serialized: the channel is free for the next job right away.
        assert_eq!(f.sub.state(h.id).unwrap(), CdmaState::Idle);
        assert_eq!(f.sub.job_status(&s.ticket), JobStatus::Queued);
        f.sub.begin(&ctx, &h).unwrap();
    }

    #[test]
    fn test_ring_full_writes_nothing() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr3d", 16);
        f.sub.begin(&ctx, &h).unwrap();
        f.sub.push_words(&ctx, &h, &[opcodes::NOOP; 10]).unwrap();
        assert_eq!(
            f.sub.push_words(&ctx, &h, &[opcodes::NOOP; 6]),
            Err(Host1xError::RingFull {
                channel: h.id,
                needed: 6,
                available: 5
            })
        );
        f.sub.push_words(&ctx, &h, &[opcodes::NOOP; 4]).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        assert!(matches!(
            f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D),
            Err(Host1xError::RingFull { available: 0, .. })
        ));
    }

    #[test]
    fn test_serialize_busy_until_target() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr2d", 64);

        f.sub.begin(&ctx, &h).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_2D_0).unwrap();
        let a = f.sub.submit(&ctx, &h).unwrap();
        assert_eq!(f.sub.state(h.id).unwrap(), CdmaState::Pushed);

        assert_eq!(
            f.sub.begin(&ctx, &h),
            Err(Host1xError::Busy(BusyResource::Serialized {
                module: "gr2d",
                id: SYNCPT_2D_0,
                target: 1
            }))
        );

        // Reaching the value from elsewhere does not finish this channel's job.
        f.syncpts.incr_max(SYNCPT_2D_0, 1).unwrap();
        f.regs.hw_syncpt_incr(SYNCPT_2D_0);
        assert!(matches!(
            f.sub.begin(&ctx, &h),
            Err(Host1xError::Busy(BusyResource::Serialized { .. }))
        ));

        let mut cp = CommandProcessor::new(8);
        f.run(h.id, &mut cp);
        f.sub.begin(&ctx, &h).unwrap();
        assert_eq!(f.sub.job_status(&a.ticket), JobStatus::Completed);
    }

    #[test]
    fn test_channel_lock_refused_to_other_owners() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr2d", 64);
        f.sub.begin(&ctx, &h).unwrap();

        let cpu = MutexOwner::Client(7);
        assert_eq!(
            f.mutexes.release(bit(MODMUTEX_2D_FULL), cpu),
            Err(Host1xError::MutexNotHeld {
                mask: bit(MODMUTEX_2D_FULL)
            })
        );
        // A previous binding of the same slot is a different owner too.
        let stale = MutexOwner::Channel {
            id: h.id,
            generation: h.generation.wrapping_sub(1),
        };
        assert!(f.mutexes.release(bit(MODMUTEX_2D_FULL), stale).is_err());
        assert!(!f.mutexes.try_acquire(bit(MODMUTEX_2D_FULL), cpu).unwrap());
        assert_eq!(
            f.mutexes.owner(MODMUTEX_2D_FULL),
            Some(MutexOwner::Channel {
                id: h.id,
                generation: h.generation
            })
        );
    }

    #[test]
    fn test_failed_submit_reserves_nothing() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr3d", 16);
        f.sub.begin(&ctx, &h).unwrap();
        f.sub.push_words(&ctx, &h, &[opcodes::NOOP; 15]).unwrap();
        // No room for the implicit increment.
        assert!(matches!(
            f.sub.submit(&ctx, &h),
            Err(Host1xError::RingFull { .. })
        ));
        assert_eq!(f.syncpts.read_max(SYNCPT_3D).unwrap(), 0);
        assert_eq!(f.intr.depth(SYNCPT_3D), 0);
        assert_eq!(f.ops.cdma_put(&f.regs, h.id), 0);
        assert_eq!(f.sub.state(h.id).unwrap(), CdmaState::Building);
        f.sub.abort(&ctx, &h).unwrap();
    }

    #[test]
    fn test_shared_syncpoint_fault_drains_only_own_increments() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let mut cp = CommandProcessor::new(8);
        let a = f.open("mpe", 64);
        let b = f.open("mpe", 64);

        f.sub.begin(&ctx, &a).unwrap();
        f.sub.push_words(&ctx, &a, &[0xF000_0000]).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &a, SYNCPT_MPE).unwrap();
        let ja = f.sub.submit(&ctx, &a).unwrap();

        f.sub.begin(&ctx, &b).unwrap();
        f.sub.push_words(&ctx, &b, &[opcodes::NOOP]).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &b, SYNCPT_MPE).unwrap();
        let jb = f.sub.submit(&ctx, &b).unwrap();
        assert_eq!(ja.fences[0].threshold, 1);
        assert_eq!(jb.fences[0].threshold, 2);

        // B runs first and lifts the shared counter to A's target.
        f.run(b.id, &mut cp);
        let outcome = f.run(a.id, &mut cp).unwrap();
        let ExecOutcome::Faulted { code, .. } = outcome else {
            panic!("expected fault, got {:?}", outcome);
        };
        f.regs.raise_channel_fault(a.id, code);
        f.service();

        assert_eq!(f.sub.job_status(&ja.ticket), JobStatus::Faulted(code));
        // A's one unexecuted increment was made up, which finishes B too.
        assert_eq!(f.syncpts.read(SYNCPT_MPE).unwrap(), 2);
        f.service();
        assert_eq!(f.sub.job_status(&jb.ticket), JobStatus::Completed);
    }

    #[test]
    fn test_partially_executed_job_drains_remainder() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let mut cp = CommandProcessor::new(8);
        let h = f.open("gr3d", 64);

        f.sub.begin(&ctx, &h).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        f.sub.push_words(&ctx, &h, &[0xF000_0000]).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        let s = f.sub.submit(&ctx, &h).unwrap();
        assert_eq!(s.fences[0].threshold, 3);

        let outcome = f.run(h.id, &mut cp).unwrap();
        assert!(matches!(outcome, ExecOutcome::Faulted { consumed: 1, .. }));
        assert_eq!(f.regs.sync_read(sync::syncpt(SYNCPT_3D)), 1);
        f.sub.fault(&ctx, h.id, 0x10F).unwrap();
        assert_eq!(f.syncpts.read(SYNCPT_3D).unwrap(), 3);
        assert_eq!(f.sub.job_status(&s.ticket), JobStatus::Faulted(0x10F));
    }

    #[test]
    fn test_abort_rewinds() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr3d", 64);
        f.sub.begin(&ctx, &h).unwrap();
        f.sub.push_words(&ctx, &h, &[1, 2, 3]).unwrap();
        f.sub.abort(&ctx, &h).unwrap();
        assert_eq!(f.mutexes.held(), 0);
        f.sub.begin(&ctx, &h).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        f.sub.submit(&ctx, &h).unwrap();
        assert_eq!(f.ops.cdma_put(&f.regs, h.id), 1);
    }

    #[test]
    fn test_mutexes_held_until_retired() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr3d", 64);
        f.sub.begin(&ctx, &h).unwrap();
        assert_eq!(f.mutexes.held(), bit(MODMUTEX_3D));
        assert_eq!(f.regs.sync_read(sync::mlock(MODMUTEX_3D)), 1);

        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        f.sub.submit(&ctx, &h).unwrap();
        assert_eq!(f.mutexes.held(), bit(MODMUTEX_3D));

        // A second gr3d channel cannot start while the first holds the lock.
        let other = f.open("gr3d", 64);
        assert!(matches!(
            f.sub.begin(&ctx, &other),
            Err(Host1xError::MutexConflict { .. })
        ));

        let mut cp = CommandProcessor::new(8);
        f.run(h.id, &mut cp);
        f.service();
        assert_eq!(f.mutexes.held(), 0);
        assert_eq!(f.regs.sync_read(sync::mlock(MODMUTEX_3D)), 0);
        f.sub.begin(&ctx, &other).unwrap();
    }

    #[test]
    fn test_hardware_executes_stream() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let mut cp = CommandProcessor::new(8);
        let h = f.open("gr2d", 64);

        f.sub.begin(&ctx, &h).unwrap();
        f.sub.push_words(&ctx, &h, &[opcodes::setclass(0x51, 0, 0)]).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_2D_0).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_2D_1).unwrap();
        let s = f.sub.submit(&ctx, &h).unwrap();

        assert_eq!(
            f.run(h.id, &mut cp),
            Some(ExecOutcome::Drained { consumed: 3 })
        );
        assert_eq!(f.run(h.id, &mut cp), None);
        f.service();
        assert_eq!(f.sub.job_status(&s.ticket), JobStatus::Completed);
        assert_eq!(f.sub.state(h.id).unwrap(), CdmaState::Idle);
        assert_eq!(f.syncpts.read(SYNCPT_2D_1).unwrap(), 1);
    }

    #[test]
    fn test_cross_channel_wait_stalls() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let mut cp = CommandProcessor::new(8);
        let producer = f.open("gr2d", 64);
        let consumer = f.open("gr3d", 64);

        f.sub.begin(&ctx, &producer).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &producer, SYNCPT_2D_0).unwrap();
        let p = f.sub.submit(&ctx, &producer).unwrap();
        let target = p.fence(SYNCPT_2D_0).unwrap();

        f.sub.begin(&ctx, &consumer).unwrap();
        f.sub
            .append_syncpoint_wait(&ctx, &consumer, target.id, target.threshold)
            .unwrap();
        f.sub.append_syncpoint_increment(&ctx, &consumer, SYNCPT_3D).unwrap();
        f.sub.submit(&ctx, &consumer).unwrap();

        assert!(matches!(
            f.run(consumer.id, &mut cp),
            Some(ExecOutcome::Stalled { id: SYNCPT_2D_0, threshold: 1, .. })
        ));
        assert_eq!(f.regs.sync_read(sync::syncpt(SYNCPT_3D)), 0);

        f.run(producer.id, &mut cp);
        assert!(matches!(
            f.run(consumer.id, &mut cp),
            Some(ExecOutcome::Drained { .. })
        ));
        assert_eq!(f.regs.sync_read(sync::syncpt(SYNCPT_3D)), 1);
    }

    #[test]
    fn test_fault_isolated_to_channel() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let mut cp = CommandProcessor::new(8);
        let bad = f.open("gr3d", 64);
        let good = f.open("gr2d", 64);

        f.sub.begin(&ctx, &good).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &good, SYNCPT_2D_0).unwrap();
        let g = f.sub.submit(&ctx, &good).unwrap();

        f.sub.begin(&ctx, &bad).unwrap();
        f.sub.push_words(&ctx, &bad, &[0xF000_0000]).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &bad, SYNCPT_3D).unwrap();
        let b = f.sub.submit(&ctx, &bad).unwrap();

        let outcome = f.run(bad.id, &mut cp).unwrap();
        let ExecOutcome::Faulted { code, .. } = outcome else {
            panic!("expected fault, got {:?}", outcome);
        };
        f.regs.raise_channel_fault(bad.id, code);
        f.service();

        assert_eq!(f.sub.job_status(&b.ticket), JobStatus::Faulted(code));
        // The failed job's target was completed so waiters do not hang.
        assert_eq!(f.syncpts.read(SYNCPT_3D).unwrap(), 1);
        assert_eq!(f.ops.cdma_put(&f.regs, bad.id), 0);
        assert_eq!(f.mutexes.held() & bit(MODMUTEX_3D), 0);

        // The other channel is untouched.
        assert_eq!(f.sub.job_status(&g.ticket), JobStatus::Queued);
        assert_eq!(f.sub.state(good.id).unwrap(), CdmaState::Pushed);
        f.run(good.id, &mut cp);
        f.service();
        assert_eq!(f.sub.job_status(&g.ticket), JobStatus::Completed);
    }

    #[test]
    fn test_implicit_increment_on_primary_syncpoint() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr3d", 64);
        f.sub.begin(&ctx, &h).unwrap();
        f.sub.push_words(&ctx, &h, &[opcodes::NOOP]).unwrap();
        let s = f.sub.submit(&ctx, &h).unwrap();
        assert_eq!(s.fence(SYNCPT_3D).map(|f| f.threshold), Some(1));

        let isp = f.open("isp", 64);
        f.sub.begin(&ctx, &isp).unwrap();
        assert!(matches!(
            f.sub.submit(&ctx, &isp),
            Err(Host1xError::InvalidState {
                expected: "syncpoint increment",
                ..
            })
        ));
    }

    #[test]
    fn test_detach_aborts_in_flight() {
        let f = Fixture::new();
        let ctx = f.ctx();
        let h = f.open("gr3d", 64);
        f.sub.begin(&ctx, &h).unwrap();
        f.sub.append_syncpoint_increment(&ctx, &h, SYNCPT_3D).unwrap();
        let s = f.sub.submit(&ctx, &h).unwrap();

        f.sub.detach(&ctx, &h).unwrap();
        assert_eq!(f.sub.job_status(&s.ticket), JobStatus::Aborted);
        assert_eq!(f.intr.depth(SYNCPT_3D), 0);
        assert_eq!(f.mutexes.held(), 0);
        assert!(matches!(
            f.sub.begin(&ctx, &h),
            Err(Host1xError::InvalidState { actual: "free", .. })
        ));
    }
}
