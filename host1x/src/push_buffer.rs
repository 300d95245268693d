// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Push buffer: the command ring feeding a channel's DMA engine.
//!
//! Word-indexed ring of power-of-two size. `put` is the software write
//! position (words pushed but possibly not yet published to DMAPUT), `fence`
//! is the oldest word still owned by hardware. One word is always left
//! free so that `put == fence` unambiguously means empty.

/// Ring of 32-bit command words.
#[derive(Debug)]
pub struct PushBuffer {
    words: Vec<u32>,
    mask: u32,
    put: u32,
    fence: u32,
}

impl PushBuffer {
    /// Create a ring of `size` words, rounded up to a power of two (min 16).
    pub fn new(size: usize) -> Self {
        let size = size.max(16).next_power_of_two();
        Self {
            words: vec![0; size],
            mask: (size - 1) as u32,
            put: 0,
            fence: 0,
        }
    }

    /// Ring size in words.
    pub fn size(&self) -> usize {
        self.words.len()
    }

    /// Software write position.
    pub fn put(&self) -> u32 {
        self.put
    }

    /// Oldest position still owned by hardware.
    pub fn fence(&self) -> u32 {
        self.fence
    }

    /// Words that can be pushed without overwriting unconsumed commands.
    pub fn space(&self) -> usize {
        self.space_to(self.fence)
    }

    /// Free words between `put` and `limit`, where `limit == put` means the
    /// whole ring is free.
    pub fn space_to(&self, limit: u32) -> usize {
        (limit.wrapping_sub(self.put).wrapping_sub(1) & self.mask) as usize
    }

    /// Words between `fence` and `put`.
    pub fn used(&self) -> usize {
        (self.put.wrapping_sub(self.fence) & self.mask) as usize
    }

    /// Append `data` at `put`, wrapping as needed. All-or-nothing: on
    /// insufficient space nothing is written and the free count is returned.
    pub fn push(&mut self, data: &[u32]) -> Result<(), usize> {
        let space = self.space();
        if data.len() > space {
            return Err(space);
        }
        for &w in data {
            self.words[self.put as usize] = w;
            self.put = (self.put + 1) & self.mask;
        }
        Ok(())
    }

    /// Release hardware-consumed words up to `new_fence`.
    pub fn pop_to(&mut self, new_fence: u32) {
        self.fence = new_fence & self.mask;
    }

    /// Move the write position back to `put`, discarding unpublished words.
    pub fn rewind(&mut self, put: u32) {
        self.put = put & self.mask;
    }

    /// Copy `len` words starting at ring position `start`, following wrap.
    pub fn read(&self, start: u32, len: usize) -> Vec<u32> {
        (0..len as u32)
            .map(|i| self.words[(start.wrapping_add(i) & self.mask) as usize])
            .collect()
    }

    /// Words from `from` up to (excluding) `to`, following wrap.
    pub fn read_range(&self, from: u32, to: u32) -> Vec<u32> {
        let len = (to.wrapping_sub(from) & self.mask) as usize;
        self.read(from, len)
    }

    /// Empty the ring.
    pub fn reset(&mut self) {
        self.put = 0;
        self.fence = 0;
    }

    /// Advance a ring position by `n` words.
    pub fn advance(&self, pos: u32, n: usize) -> u32 {
        pos.wrapping_add(n as u32) & self.mask
    }
}
