// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Module mutex arbitration.
//!
//! Shared functional units (the 2D sub-blocks, display heads, VI, DSI) are
//! guarded by hardware lock bits. A module that needs several bits takes all
//! of them in one critical section or none, so two modules needing
//! overlapping subsets can never deadlock holding halves of each other's set.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use host1x_common::{bits, ChannelId, Host1xError, Host1xResult, IdKind};

/// Holder of module lock bits.
///
/// A channel is identified by slot and allocation generation, so a rebound
/// slot never inherits its previous owner's locks. CPU clients carry a
/// token handed out once per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexOwner {
    Channel { id: ChannelId, generation: u32 },
    Client(u64),
}

impl fmt::Display for MutexOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel { id, generation } => write!(f, "channel {}.{}", id, generation),
            Self::Client(token) => write!(f, "client {}", token),
        }
    }
}

/// A CPU client's claim on module locks, handed out by the engine.
///
/// Not `Clone`: only the client that took a lock can release it.
#[derive(Debug)]
pub struct MutexClient {
    token: u64,
    label: &'static str,
}

impl MutexClient {
    pub(crate) fn new(token: u64, label: &'static str) -> Self {
        Self { token, label }
    }

    pub fn owner(&self) -> MutexOwner {
        MutexOwner::Client(self.token)
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

struct MutexState {
    held: u32,
    owners: Vec<Option<MutexOwner>>,
}

/// All-or-nothing bitmask lock set.
pub struct ModuleMutexSet {
    state: Mutex<MutexState>,
    released: Condvar,
    count: usize,
}

impl ModuleMutexSet {
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(MutexState {
                held: 0,
                owners: vec![None; count],
            }),
            released: Condvar::new(),
            count,
        }
    }

    fn check(&self, mask: u32) -> Host1xResult<()> {
        if self.count < 32 && mask >> self.count != 0 {
            return Err(Host1xError::InvalidId {
                kind: IdKind::ModuleMutex,
                id: mask,
            });
        }
        Ok(())
    }

    /// Take every bit in `mask` for `owner`, or none of them.
    pub fn try_acquire(&self, mask: u32, owner: MutexOwner) -> Host1xResult<bool> {
        self.check(mask)?;
        let mut state = self.state.lock();
        if state.held & mask != 0 {
            log::trace!(
                "mutex: {} conflict on 0x{:04X} (held 0x{:04X})",
                owner,
                mask,
                state.held
            );
            return Ok(false);
        }
        state.held |= mask;
        for b in bits(mask) {
            state.owners[b as usize] = Some(owner);
        }
        log::trace!("mutex: {} acquired 0x{:04X}", owner, mask);
        Ok(true)
    }

    /// Block until the whole mask can be taken or `timeout` expires.
    pub fn acquire(&self, mask: u32, owner: MutexOwner, timeout: Duration) -> Host1xResult<()> {
        self.check(mask)?;
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.held & mask != 0 {
            if self.released.wait_until(&mut state, deadline).timed_out() && state.held & mask != 0 {
                return Err(Host1xError::MutexConflict {
                    requested: mask,
                    held: state.held,
                });
            }
        }
        state.held |= mask;
        for b in bits(mask) {
            state.owners[b as usize] = Some(owner);
        }
        log::trace!("mutex: {} acquired 0x{:04X} (blocking)", owner, mask);
        Ok(())
    }

    /// Release bits held by `owner`. Nothing is released if any bit of the
    /// mask is free or held by someone else.
    pub fn release(&self, mask: u32, owner: MutexOwner) -> Host1xResult<()> {
        self.check(mask)?;
        let mut state = self.state.lock();
        let not_held = bits(mask)
            .filter(|&b| state.owners[b as usize] != Some(owner))
            .fold(0u32, |acc, b| acc | (1 << b));
        if not_held != 0 {
            log::error!(
                "mutex: {} released 0x{:04X} but does not hold 0x{:04X}",
                owner,
                mask,
                not_held
            );
            return Err(Host1xError::MutexNotHeld { mask: not_held });
        }
        state.held &= !mask;
        for b in bits(mask) {
            state.owners[b as usize] = None;
        }
        drop(state);
        self.released.notify_all();
        log::trace!("mutex: {} released 0x{:04X}", owner, mask);
        Ok(())
    }

    /// Bits currently held.
    pub fn held(&self) -> u32 {
        self.state.lock().held
    }

    pub fn owner(&self, bit: u32) -> Option<MutexOwner> {
        self.state.lock().owners.get(bit as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const A: MutexOwner = MutexOwner::Client(1);
    const B: MutexOwner = MutexOwner::Client(2);

    #[test]
    fn test_acquire_release() {
        let m = ModuleMutexSet::new(16);
        let gr2d = MutexOwner::Channel { id: 1, generation: 1 };
        assert!(m.try_acquire(0b0110, gr2d).unwrap());
        assert_eq!(m.held(), 0b0110);
        assert_eq!(m.owner(1), Some(gr2d));
        m.release(0b0110, gr2d).unwrap();
        assert_eq!(m.held(), 0);
        assert_eq!(m.owner(1), None);
    }

    #[test]
    fn test_all_or_nothing() {
        let m = ModuleMutexSet::new(16);
        assert!(m.try_acquire(0b0011, A).unwrap());
        // Overlaps on bit 1: nothing of 0b0110 may be granted.
        assert!(!m.try_acquire(0b0110, B).unwrap());
        assert_eq!(m.held(), 0b0011);
        assert_eq!(m.owner(2), None);
        // Disjoint mask still succeeds.
        assert!(m.try_acquire(0b1100, B).unwrap());
    }

    #[test]
    fn test_release_not_held_reported() {
        let m = ModuleMutexSet::new(16);
        assert!(m.try_acquire(0b0010, A).unwrap());
        assert_eq!(
            m.release(0b0110, A),
            Err(Host1xError::MutexNotHeld { mask: 0b0100 })
        );
        // Nothing was released.
        assert_eq!(m.held(), 0b0010);
        // Wrong owner.
        assert!(m.release(0b0010, B).is_err());
    }

    #[test]
    fn test_stale_channel_generation_cannot_release() {
        let m = ModuleMutexSet::new(16);
        let old = MutexOwner::Channel { id: 3, generation: 1 };
        let new = MutexOwner::Channel { id: 3, generation: 2 };
        assert!(m.try_acquire(0b1000, new).unwrap());
        assert_eq!(
            m.release(0b1000, old),
            Err(Host1xError::MutexNotHeld { mask: 0b1000 })
        );
        assert_eq!(m.owner(3), Some(new));
    }

    #[test]
    fn test_mask_beyond_lock_count() {
        let m = ModuleMutexSet::new(16);
        assert!(matches!(
            m.try_acquire(1 << 20, A),
            Err(Host1xError::InvalidId {
                kind: IdKind::ModuleMutex,
                ..
            })
        ));
    }

    #[test]
    fn test_blocking_acquire_timeout() {
        let m = ModuleMutexSet::new(16);
        assert!(m.try_acquire(0b1000, A).unwrap());
        let r = m.acquire(0b1000, B, Duration::from_millis(20));
        assert_eq!(
            r,
            Err(Host1xError::MutexConflict {
                requested: 0b1000,
                held: 0b1000
            })
        );
    }

    #[test]
    fn test_blocking_acquire_after_release() {
        let m = Arc::new(ModuleMutexSet::new(16));
        assert!(m.try_acquire(0b1000, A).unwrap());
        let m2 = m.clone();
        let handle = thread::spawn(move || m2.acquire(0b1100, B, Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(20));
        m.release(0b1000, A).unwrap();
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(m.owner(3), Some(B));
        assert_eq!(m.owner(2), Some(B));
    }
}
