// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Channel pool.
//!
//! A fixed array of hardware command channels. Allocation is accounted
//! twice: a coarse counter capped at the channel count, and the per-slot
//! owner state. `allocate` refuses as soon as the counter reaches capacity,
//! whatever the slots say. Both live under one lock.
//!
//! Slots are reference counted: the allocator holds the first reference,
//! further clients take more with [`ChannelPool::get`], and the slot is
//! released when the last reference is dropped with [`ChannelPool::free`].

use parking_lot::Mutex;

use host1x_common::{BusyResource, ChannelId, Host1xError, Host1xResult, IdKind};

use crate::device::ModuleDevice;

/// Handle to an allocated channel.
///
/// `generation` changes every time the slot is bound to a new owner, so a
/// handle kept past its `free` cannot act on the next owner's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub id: ChannelId,
    pub module_index: u32,
    pub generation: u32,
    pub capacity: usize,
}

/// Owner of a bound slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOwner {
    pub module: &'static str,
    pub module_index: u32,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    owner: Option<SlotOwner>,
    refcount: u32,
    generation: u32,
    capacity: usize,
}

struct PoolState {
    /// Coarse allocation counter.
    allocated: usize,
    slots: Vec<Slot>,
}

/// Status of one slot for the debug dump.
#[derive(Debug, Clone)]
pub struct SlotStatus {
    pub id: ChannelId,
    pub owner: Option<SlotOwner>,
    pub refcount: u32,
}

/// Outcome of dropping a channel reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// Other references remain.
    StillReferenced(u32),
    /// The slot went back to the pool.
    Released,
}

/// Fixed-capacity channel pool.
pub struct ChannelPool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl ChannelPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                allocated: 0,
                slots: vec![Slot::default(); capacity],
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live allocation counter.
    pub fn in_use(&self) -> usize {
        self.state.lock().allocated
    }

    /// Bind a free slot to `module`.
    ///
    /// `capacity_hint` is the push buffer size the caller wants, in words.
    /// Fails with `Busy` once the allocation counter reached the pool size.
    pub fn allocate(&self, module: &ModuleDevice, capacity_hint: usize) -> Host1xResult<ChannelHandle> {
        let module_index = module.index.ok_or(Host1xError::InvalidId {
            kind: IdKind::Module,
            id: u32::MAX,
        })?;
        if module_index as usize > self.capacity {
            return Err(Host1xError::InvalidId {
                kind: IdKind::Module,
                id: module_index,
            });
        }

        let mut state = self.state.lock();
        if state.allocated + 1 > self.capacity {
            log::debug!(
                "channel: pool exhausted for {} ({}/{})",
                module.name,
                state.allocated,
                self.capacity
            );
            return Err(Host1xError::Busy(BusyResource::ChannelPool {
                in_use: state.allocated,
                capacity: self.capacity,
            }));
        }

        let Some(id) = state.slots.iter().position(|s| s.owner.is_none()) else {
            log::warn!(
                "channel: counter at {} but no free slot for {}",
                state.allocated,
                module.name
            );
            return Err(Host1xError::Busy(BusyResource::ChannelPool {
                in_use: state.allocated,
                capacity: self.capacity,
            }));
        };

        state.allocated += 1;
        let slot = &mut state.slots[id];
        slot.owner = Some(SlotOwner {
            module: module.name,
            module_index,
            exclusive: module.is_exclusive(),
        });
        slot.refcount = 1;
        slot.generation = slot.generation.wrapping_add(1);
        slot.capacity = capacity_hint;
        let handle = ChannelHandle {
            id: id as ChannelId,
            module_index,
            generation: slot.generation,
            capacity: capacity_hint,
        };
        log::debug!(
            "channel: {} bound to channel {} (gen {})",
            module.name,
            id,
            handle.generation
        );
        Ok(handle)
    }

    fn slot_mut<'a>(state: &'a mut PoolState, handle: &ChannelHandle) -> Host1xResult<&'a mut Slot> {
        let slot = state
            .slots
            .get_mut(handle.id as usize)
            .ok_or(Host1xError::InvalidId {
                kind: IdKind::Channel,
                id: handle.id,
            })?;
        if slot.owner.is_none() || slot.generation != handle.generation {
            return Err(Host1xError::InvalidState {
                channel: handle.id,
                expected: "owned",
                actual: if slot.owner.is_none() { "free" } else { "rebound" },
            });
        }
        Ok(slot)
    }

    /// Take another reference on an allocated channel. Exclusive modules
    /// admit a single holder.
    pub fn get(&self, handle: &ChannelHandle) -> Host1xResult<u32> {
        let mut state = self.state.lock();
        let slot = Self::slot_mut(&mut state, handle)?;
        if let Some(owner) = slot.owner {
            if owner.exclusive && slot.refcount > 0 {
                return Err(Host1xError::Busy(BusyResource::Exclusive {
                    module: owner.module,
                }));
            }
        }
        slot.refcount += 1;
        Ok(slot.refcount)
    }

    /// Drop a reference. The last one clears ownership and decrements the
    /// allocation counter; the caller then resets the ring.
    pub fn free(&self, handle: &ChannelHandle) -> Host1xResult<FreeOutcome> {
        let mut state = self.state.lock();
        let slot = Self::slot_mut(&mut state, handle)?;
        slot.refcount = slot.refcount.saturating_sub(1);
        if slot.refcount > 0 {
            return Ok(FreeOutcome::StillReferenced(slot.refcount));
        }
        let module = slot.owner.take().map(|o| o.module).unwrap_or("?");
        slot.capacity = 0;
        state.allocated = state.allocated.saturating_sub(1);
        log::debug!("channel: {} released channel {}", module, handle.id);
        Ok(FreeOutcome::Released)
    }

    /// Whether `handle` still names a live binding.
    pub fn validate(&self, handle: &ChannelHandle) -> Host1xResult<SlotOwner> {
        let mut state = self.state.lock();
        let slot = Self::slot_mut(&mut state, handle)?;
        slot.owner.ok_or(Host1xError::InvalidState {
            channel: handle.id,
            expected: "owned",
            actual: "free",
        })
    }

    /// Owner and refcount of every slot.
    pub fn status(&self) -> Vec<SlotStatus> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| SlotStatus {
                id: i as ChannelId,
                owner: s.owner,
                refcount: s.refcount,
            })
            .collect()
    }
}
