// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Syncpoint index (0..NB_PTS).
pub type SyncpointId = u32;

/// Wait-base index (0..NB_BASES).
pub type WaitBaseId = u32;

/// Channel index (0..NB_CHANNELS).
pub type ChannelId = u32;

/// Number of hardware syncpoints on host1x01 (Tegra20).
pub const NB_PTS: usize = 32;

/// Number of command channels on host1x01.
pub const NB_CHANNELS: usize = 8;

/// Number of hardware module mutex locks.
pub const NB_MLOCKS: usize = 16;

/// Number of syncpoint wait-bases.
pub const NB_BASES: usize = 8;

/// Default push buffer size in 32-bit words (one page).
pub const DEFAULT_PUSH_BUFFER_WORDS: usize = 1024;

/// Single-bit mask for index `n`.
#[inline]
pub const fn bit(n: u32) -> u32 {
    1 << n
}

/// Iterate over the indices of the set bits in `mask`, lowest first.
pub fn bits(mask: u32) -> impl Iterator<Item = u32> {
    (0..32u32).filter(move |i| mask & (1 << i) != 0)
}

/// Wrap-safe threshold check: `value` has reached `threshold` when the
/// 32-bit difference interpreted as signed is non-negative.
#[inline]
pub const fn syncpoint_reached(value: u32, threshold: u32) -> bool {
    (value.wrapping_sub(threshold) as i32) >= 0
}
