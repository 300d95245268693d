// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Syncpoint interrupt dispatch.
//!
//! Each syncpoint has a queue of waiters ordered by how far their threshold
//! lies ahead of the current value. The hardware threshold register always
//! holds the nearest pending threshold; when it fires the dispatcher
//! refreshes the syncpoint from hardware, pops every waiter that is now
//! satisfied and reprograms (or disables) the threshold.
//!
//! Registration, dispatch and cancellation take the same lock, so a waiter is
//! either still queued (and cancellable) or has been popped exactly once.
//! Actions run after the lock is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use host1x_common::{bits, syncpoint_reached, ChannelId, Host1xResult};

use crate::chip::ChipOps;
use crate::registers::RegisterFile;
use crate::syncpoint::SyncpointTable;

/// Bounded re-reads of a syncpoint register that looks inconsistent.
const MAX_REREAD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Signaled(u32),
    Cancelled,
}

/// Wakeup target of a blocked CPU waiter.
pub struct WaitSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl WaitSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
        })
    }

    fn signal(&self, value: u32) {
        let mut state = self.state.lock();
        if *state == SlotState::Pending {
            *state = SlotState::Signaled(value);
        }
        self.cond.notify_all();
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if *state == SlotState::Pending {
            *state = SlotState::Cancelled;
        }
        self.cond.notify_all();
    }

    /// Block until signaled, cancelled or `timeout` expires. Returns the
    /// syncpoint value delivered with the wakeup.
    pub fn wait(&self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match *state {
                SlotState::Signaled(v) => return Some(v),
                SlotState::Cancelled => return None,
                SlotState::Pending => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        return match *state {
                            SlotState::Signaled(v) => Some(v),
                            _ => None,
                        };
                    }
                }
            }
        }
    }

    pub fn is_signaled(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Signaled(_))
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.lock() == SlotState::Cancelled
    }
}

/// What to do when a waiter's threshold is reached.
#[derive(Clone)]
pub enum WaiterAction {
    /// Wake a blocked CPU waiter.
    Wakeup(Arc<WaitSlot>),
    /// Retire finished jobs on a channel.
    SubmitComplete {
        channel: ChannelId,
        generation: u32,
    },
}

struct Waiter {
    ref_id: u64,
    threshold: u32,
    action: WaiterAction,
}

/// Reference to a queued waiter, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterRef {
    pub id: u32,
    ref_id: u64,
}

/// Result of registering a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The threshold was already reached; nothing was queued.
    Expired(u32),
    /// Queued; the action runs when the threshold is reached.
    Queued(WaiterRef),
}

struct IntrState {
    queues: Vec<Vec<Waiter>>,
    next_ref: u64,
}

/// Completed submissions and channel faults found by one dispatch pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub woken: usize,
    pub completions: Vec<(ChannelId, u32)>,
    pub faults: Vec<(ChannelId, u32)>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.woken == 0 && self.completions.is_empty() && self.faults.is_empty()
    }
}

/// Per-syncpoint waiter queues.
pub struct InterruptDispatcher {
    state: Mutex<IntrState>,
}

impl InterruptDispatcher {
    pub fn new(nb_pts: usize) -> Self {
        Self {
            state: Mutex::new(IntrState {
                queues: (0..nb_pts).map(|_| Vec::new()).collect(),
                next_ref: 1,
            }),
        }
    }

    /// Refresh a syncpoint from hardware, re-reading a bounded number of
    /// times if the value lies beyond the reserved future value.
    pub fn refresh(
        &self,
        id: u32,
        syncpts: &SyncpointTable,
        ops: &dyn ChipOps,
        regs: &RegisterFile,
    ) -> Host1xResult<u32> {
        let mut live = ops.syncpt_load(regs, id);
        for _ in 0..MAX_REREAD {
            if syncpts.refresh(id, live)? {
                return Ok(live);
            }
            live = ops.syncpt_load(regs, id);
        }
        log::warn!(
            "intr: syncpoint {} ({}) reads {} beyond max {}",
            id,
            syncpts.name(id),
            live,
            syncpts.read_max(id)?
        );
        syncpts.resync(id, live)?;
        Ok(live)
    }

    /// Queue `action` to run once syncpoint `id` reaches `threshold`.
    ///
    /// An already reached threshold returns `Expired` without queueing.
    pub fn register(
        &self,
        id: u32,
        threshold: u32,
        action: WaiterAction,
        syncpts: &SyncpointTable,
        ops: &dyn ChipOps,
        regs: &RegisterFile,
    ) -> Host1xResult<Registration> {
        let mut state = self.state.lock();
        let current = self.refresh(id, syncpts, ops, regs)?;
        if syncpoint_reached(current, threshold) {
            return Ok(Registration::Expired(current));
        }

        let ref_id = state.next_ref;
        state.next_ref += 1;
        let queue = &mut state.queues[id as usize];
        let distance = threshold.wrapping_sub(current);
        let pos = queue
            .iter()
            .position(|w| w.threshold.wrapping_sub(current) > distance)
            .unwrap_or(queue.len());
        queue.insert(
            pos,
            Waiter {
                ref_id,
                threshold,
                action,
            },
        );
        if pos == 0 {
            ops.intr_set_threshold(regs, id, threshold);
            ops.intr_enable(regs, id);
        }
        log::trace!(
            "intr: waiter {} on syncpoint {} threshold {} (depth {})",
            ref_id,
            id,
            threshold,
            queue.len()
        );
        Ok(Registration::Queued(WaiterRef { id, ref_id }))
    }

    /// Remove a queued waiter. Returns `false` if it already fired.
    pub fn cancel(&self, waiter: WaiterRef, ops: &dyn ChipOps, regs: &RegisterFile) -> bool {
        let mut state = self.state.lock();
        let Some(queue) = state.queues.get_mut(waiter.id as usize) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|w| w.ref_id == waiter.ref_id) else {
            return false;
        };
        let removed = queue.remove(pos);
        if queue.is_empty() {
            ops.intr_disable(regs, waiter.id);
        } else if pos == 0 {
            ops.intr_set_threshold(regs, waiter.id, queue[0].threshold);
        }
        drop(state);
        if let WaiterAction::Wakeup(slot) = removed.action {
            slot.cancel();
        }
        true
    }

    /// Service pending threshold interrupts and channel faults.
    pub fn dispatch(
        &self,
        syncpts: &SyncpointTable,
        ops: &dyn ChipOps,
        regs: &RegisterFile,
    ) -> Host1xResult<DispatchReport> {
        let mut report = DispatchReport::default();

        // Ack after reprogramming so a threshold that is already reached
        // again latches a fresh status bit.
        let pending = ops.intr_pending(regs);
        for id in bits(pending) {
            if id as usize >= syncpts.len() {
                continue;
            }
            self.process(id, syncpts, ops, regs, &mut report)?;
        }
        if pending != 0 {
            ops.intr_ack(regs, pending);
        }

        let faults = ops.channel_faults(regs);
        for ch in bits(faults) {
            let code = ops.channel_fault_code(regs, ch);
            ops.channel_fault_ack(regs, ch);
            log::warn!("intr: channel {} fault 0x{:X}", ch, code);
            report.faults.push((ch, code));
        }

        Ok(report)
    }

    /// Pop and run every satisfied waiter of syncpoint `id`.
    pub fn process(
        &self,
        id: u32,
        syncpts: &SyncpointTable,
        ops: &dyn ChipOps,
        regs: &RegisterFile,
        report: &mut DispatchReport,
    ) -> Host1xResult<()> {
        let (value, fired) = {
            let mut state = self.state.lock();
            let value = self.refresh(id, syncpts, ops, regs)?;
            let queue = &mut state.queues[id as usize];
            let split = queue
                .iter()
                .position(|w| !syncpoint_reached(value, w.threshold))
                .unwrap_or(queue.len());
            let fired: Vec<Waiter> = queue.drain(..split).collect();
            match queue.first() {
                Some(next) => {
                    ops.intr_set_threshold(regs, id, next.threshold);
                    ops.intr_enable(regs, id);
                }
                None => ops.intr_disable(regs, id),
            }
            (value, fired)
        };

        for waiter in fired {
            match waiter.action {
                WaiterAction::Wakeup(slot) => {
                    slot.signal(value);
                    report.woken += 1;
                }
                WaiterAction::SubmitComplete {
                    channel,
                    generation,
                } => {
                    if !report.completions.contains(&(channel, generation)) {
                        report.completions.push((channel, generation));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of waiters queued on syncpoint `id`.
    pub fn depth(&self, id: u32) -> usize {
        self.state
            .lock()
            .queues
            .get(id as usize)
            .map_or(0, |q| q.len())
    }

    /// Queue depth of every syncpoint.
    pub fn depths(&self) -> Vec<usize> {
        self.state.lock().queues.iter().map(|q| q.len()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::t20::{T20ChipOps, SYNCPT_2D_0, SYNCPT_3D};

    struct Fixture {
        ops: T20ChipOps,
        regs: RegisterFile,
        syncpts: SyncpointTable,
        intr: InterruptDispatcher,
    }

    impl Fixture {
        fn new() -> Self {
            let ops = T20ChipOps::new();
            let syncpts = SyncpointTable::new(ops.info());
            Self {
                ops,
                regs: RegisterFile::new(),
                syncpts,
                intr: InterruptDispatcher::new(32),
            }
        }

        fn hw_incr(&self, id: u32, n: u32) {
            self.syncpts.incr_max(id, n).unwrap();
            for _ in 0..n {
                self.regs.hw_syncpt_incr(id);
            }
        }

        fn register(&self, id: u32, threshold: u32, action: WaiterAction) -> Registration {
            self.intr
                .register(id, threshold, action, &self.syncpts, &self.ops, &self.regs)
                .unwrap()
        }

        fn dispatch(&self) -> DispatchReport {
            self.intr
                .dispatch(&self.syncpts, &self.ops, &self.regs)
                .unwrap()
        }
    }

    #[test]
    fn test_already_expired_returns_immediately() {
        let f = Fixture::new();
        f.hw_incr(SYNCPT_3D, 2);
        let slot = WaitSlot::new();
        assert_eq!(
            f.register(SYNCPT_3D, 1, WaiterAction::Wakeup(slot.clone())),
            Registration::Expired(2)
        );
        assert_eq!(f.intr.depth(SYNCPT_3D), 0);
        assert!(!slot.is_signaled());
    }

    #[test]
    fn test_exact_interrupt_wakes_once() {
        let f = Fixture::new();
        f.syncpts.incr_max(SYNCPT_3D, 3).unwrap();
        let slot = WaitSlot::new();
        let reg = f.register(SYNCPT_3D, 3, WaiterAction::Wakeup(slot.clone()));
        assert!(matches!(reg, Registration::Queued(_)));

        for _ in 0..2 {
            f.regs.hw_syncpt_incr(SYNCPT_3D);
        }
        assert!(f.dispatch().is_empty());
        assert!(!slot.is_signaled());

        f.regs.hw_syncpt_incr(SYNCPT_3D);
        let report = f.dispatch();
        assert_eq!(report.woken, 1);
        assert_eq!(slot.wait(Duration::from_millis(1)), Some(3));

        // A second pass finds nothing left.
        f.regs.hw_syncpt_incr(SYNCPT_3D);
        assert_eq!(f.dispatch().woken, 0);
        assert_eq!(f.intr.depth(SYNCPT_3D), 0);
    }

    #[test]
    fn test_one_interrupt_many_waiters() {
        let f = Fixture::new();
        f.syncpts.incr_max(SYNCPT_2D_0, 5).unwrap();
        let slots: Vec<_> = (1..=5).map(|_| WaitSlot::new()).collect();
        for (i, s) in slots.iter().enumerate().rev() {
            f.register(SYNCPT_2D_0, i as u32 + 1, WaiterAction::Wakeup(s.clone()));
        }
        assert_eq!(f.intr.depth(SYNCPT_2D_0), 5);

        for _ in 0..3 {
            f.regs.hw_syncpt_incr(SYNCPT_2D_0);
        }
        assert_eq!(f.dispatch().woken, 3);
        assert!(slots[2].is_signaled());
        assert!(!slots[3].is_signaled());
        assert_eq!(f.intr.depth(SYNCPT_2D_0), 2);
    }

    #[test]
    fn test_wraparound_ordering() {
        let f = Fixture::new();
        f.ops.syncpt_reset(&f.regs, SYNCPT_3D, u32::MAX - 1);
        f.syncpts.reset(SYNCPT_3D, u32::MAX - 1).unwrap();
        f.syncpts.incr_max(SYNCPT_3D, 4).unwrap();

        let late = WaitSlot::new();
        let early = WaitSlot::new();
        f.register(SYNCPT_3D, 1, WaiterAction::Wakeup(late.clone()));
        f.register(SYNCPT_3D, u32::MAX, WaiterAction::Wakeup(early.clone()));

        f.regs.hw_syncpt_incr(SYNCPT_3D);
        assert_eq!(f.dispatch().woken, 1);
        assert!(early.is_signaled());
        assert!(!late.is_signaled());

        f.regs.hw_syncpt_incr(SYNCPT_3D); // 0
        f.regs.hw_syncpt_incr(SYNCPT_3D); // 1
        assert_eq!(f.dispatch().woken, 1);
        assert!(late.is_signaled());
    }

    #[test]
    fn test_cancel_removes_waiter() {
        let f = Fixture::new();
        f.syncpts.incr_max(SYNCPT_3D, 1).unwrap();
        let slot = WaitSlot::new();
        let Registration::Queued(r) = f.register(SYNCPT_3D, 1, WaiterAction::Wakeup(slot.clone()))
        else {
            panic!("expected queued");
        };
        assert!(f.intr.cancel(r, &f.ops, &f.regs));
        assert_eq!(f.intr.depth(SYNCPT_3D), 0);
        assert_eq!(slot.wait(Duration::from_millis(1)), None);

        // Interrupt disabled: the increment raises nothing.
        f.regs.hw_syncpt_incr(SYNCPT_3D);
        assert!(f.dispatch().is_empty());
        // Cancelling again reports the waiter is gone.
        assert!(!f.intr.cancel(r, &f.ops, &f.regs));
    }

    #[test]
    fn test_submit_complete_reported() {
        let f = Fixture::new();
        f.syncpts.incr_max(SYNCPT_3D, 1).unwrap();
        f.register(
            SYNCPT_3D,
            1,
            WaiterAction::SubmitComplete {
                channel: 2,
                generation: 7,
            },
        );
        f.regs.hw_syncpt_incr(SYNCPT_3D);
        assert_eq!(f.dispatch().completions, vec![(2, 7)]);
    }

    #[test]
    fn test_inconsistent_value_resynced() {
        let f = Fixture::new();
        // Hardware runs ahead of any reserved increment.
        f.regs.hw_syncpt_incr(SYNCPT_3D);
        let v = f
            .intr
            .refresh(SYNCPT_3D, &f.syncpts, &f.ops, &f.regs)
            .unwrap();
        assert_eq!(v, 1);
        assert_eq!(f.syncpts.read(SYNCPT_3D).unwrap(), 1);
        assert_eq!(f.syncpts.read_max(SYNCPT_3D).unwrap(), 1);
    }

    #[test]
    fn test_channel_fault_reported() {
        let f = Fixture::new();
        f.regs.raise_channel_fault(4, 0x10F);
        let report = f.dispatch();
        assert_eq!(report.faults, vec![(4, 0x10F)]);
        assert!(f.dispatch().faults.is_empty());
    }
}
