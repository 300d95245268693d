// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Syncpoint table.
//!
//! host1x syncpoints are 32-bit counters incremented by command streams (or
//! by the CPU) and watched by the interrupt path. The table keeps the
//! software view of each counter:
//!
//! - `min`: the last value observed from hardware (the "current" value);
//! - `max`: the value `min` reaches once every queued increment has
//!   executed. Not meaningful for client-managed syncpoints, whose owner
//!   increments them outside of queued command streams.
//!
//! Every comparison against a threshold is done on the wrapped difference,
//! never with `>=` on raw values.

use std::sync::atomic::{AtomicU32, Ordering};

use host1x_common::{bit, syncpoint_reached, Host1xError, Host1xResult, IdKind};

use crate::device::DeviceInfo;

/// Software view of the syncpoint and wait-base banks.
pub struct SyncpointTable {
    min: Box<[AtomicU32]>,
    max: Box<[AtomicU32]>,
    bases: Box<[AtomicU32]>,
    names: &'static [&'static str],
    client_managed: u32,
}

fn counters(n: usize) -> Box<[AtomicU32]> {
    (0..n).map(|_| AtomicU32::new(0)).collect()
}

impl SyncpointTable {
    pub fn new(info: &DeviceInfo) -> Self {
        Self {
            min: counters(info.nb_pts),
            max: counters(info.nb_pts),
            bases: counters(info.nb_bases),
            names: info.syncpt_names,
            client_managed: info.client_managed,
        }
    }

    /// Number of syncpoints.
    pub fn len(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }

    /// Number of wait-bases.
    pub fn nb_bases(&self) -> usize {
        self.bases.len()
    }

    fn check(&self, id: u32) -> Host1xResult<usize> {
        let idx = id as usize;
        if idx >= self.min.len() {
            return Err(Host1xError::InvalidId {
                kind: IdKind::Syncpoint,
                id,
            });
        }
        Ok(idx)
    }

    fn check_base(&self, base: u32) -> Host1xResult<usize> {
        let idx = base as usize;
        if idx >= self.bases.len() {
            return Err(Host1xError::InvalidId {
                kind: IdKind::WaitBase,
                id: base,
            });
        }
        Ok(idx)
    }

    /// Current value of a syncpoint.
    pub fn read(&self, id: u32) -> Host1xResult<u32> {
        let idx = self.check(id)?;
        Ok(self.min[idx].load(Ordering::Acquire))
    }

    /// Future value of a syncpoint once all queued increments complete.
    pub fn read_max(&self, id: u32) -> Host1xResult<u32> {
        let idx = self.check(id)?;
        Ok(self.max[idx].load(Ordering::Acquire))
    }

    /// Advance the current value by one, wrapping at 2^32. Returns the new value.
    pub fn increment(&self, id: u32) -> Host1xResult<u32> {
        let idx = self.check(id)?;
        let new_val = self.min[idx].fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        log::trace!("syncpoint[{}] incremented to {}", id, new_val);
        Ok(new_val)
    }

    /// Reserve `incrs` future increments. Returns the new future value,
    /// which is the threshold a waiter uses to see all of them complete.
    pub fn incr_max(&self, id: u32, incrs: u32) -> Host1xResult<u32> {
        let idx = self.check(id)?;
        Ok(self.max[idx].fetch_add(incrs, Ordering::AcqRel).wrapping_add(incrs))
    }

    /// Reserve several `(id, count)` increments at once and return the
    /// thresholds in the same order. Every id is checked before any future
    /// value moves, so an error leaves the table as it was.
    pub fn reserve(&self, incrs: &[(u32, u32)]) -> Host1xResult<Vec<u32>> {
        let idxs = incrs
            .iter()
            .map(|&(id, _)| self.check(id))
            .collect::<Host1xResult<Vec<_>>>()?;
        Ok(idxs
            .into_iter()
            .zip(incrs)
            .map(|(idx, &(_, n))| self.max[idx].fetch_add(n, Ordering::AcqRel).wrapping_add(n))
            .collect())
    }

    /// Whether the current value has reached `threshold` (wrap-safe).
    pub fn satisfied(&self, id: u32, threshold: u32) -> Host1xResult<bool> {
        Ok(syncpoint_reached(self.read(id)?, threshold))
    }

    /// Store a value read from hardware.
    ///
    /// Returns `Ok(false)` without storing when the value lies beyond `max`
    /// of a syncpoint that is not client-managed: hardware cannot run ahead
    /// of the increments that were queued, so the caller should re-read.
    pub fn refresh(&self, id: u32, live: u32) -> Host1xResult<bool> {
        let idx = self.check(id)?;
        if !self.is_client_managed(id) {
            let max = self.max[idx].load(Ordering::Acquire);
            if !syncpoint_reached(max, live) {
                return Ok(false);
            }
        }
        let mut old = self.min[idx].load(Ordering::Acquire);
        while let Err(cur) =
            self.min[idx].compare_exchange_weak(old, live, Ordering::AcqRel, Ordering::Acquire)
        {
            old = cur;
        }
        if old != live {
            log::trace!("syncpoint[{}] refreshed {} -> {}", id, old, live);
        }
        Ok(true)
    }

    /// Accept a hardware value unconditionally, pulling `max` forward if the
    /// value ran past it.
    pub fn resync(&self, id: u32, live: u32) -> Host1xResult<()> {
        let idx = self.check(id)?;
        self.min[idx].store(live, Ordering::Release);
        let max = self.max[idx].load(Ordering::Acquire);
        if !syncpoint_reached(max, live) {
            self.max[idx].store(live, Ordering::Release);
        }
        Ok(())
    }

    /// Reset both current and future value, as done at init or after a
    /// channel teardown.
    pub fn reset(&self, id: u32, value: u32) -> Host1xResult<()> {
        let idx = self.check(id)?;
        self.min[idx].store(value, Ordering::Release);
        self.max[idx].store(value, Ordering::Release);
        Ok(())
    }

    /// Companion base value of wait-base `base`.
    pub fn wait_base(&self, base: u32) -> Host1xResult<u32> {
        let idx = self.check_base(base)?;
        Ok(self.bases[idx].load(Ordering::Acquire))
    }

    pub fn set_wait_base(&self, base: u32, value: u32) -> Host1xResult<()> {
        let idx = self.check_base(base)?;
        self.bases[idx].store(value, Ordering::Release);
        Ok(())
    }

    /// Symbolic name, empty for unassigned syncpoints.
    pub fn name(&self, id: u32) -> &'static str {
        self.names.get(id as usize).copied().unwrap_or("")
    }

    pub fn is_client_managed(&self, id: u32) -> bool {
        id < 32 && self.client_managed & bit(id) != 0
    }
}
