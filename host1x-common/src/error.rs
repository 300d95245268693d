// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error taxonomy shared by the host1x engine and the nvhost device layer.
//!
//! Every failure carries enough context (module, channel, syncpoint id) for
//! the caller to log it and decide whether to retry. Resource contention is
//! always a typed value, never a panic.

use thiserror::Error;

/// Kind of identifier rejected by [`Host1xError::InvalidId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Syncpoint,
    WaitBase,
    Channel,
    Module,
    ModuleMutex,
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Syncpoint => "syncpoint",
            Self::WaitBase => "wait-base",
            Self::Channel => "channel",
            Self::Module => "module",
            Self::ModuleMutex => "module mutex",
        };
        f.write_str(s)
    }
}

/// Resource that reported [`Host1xError::Busy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusyResource {
    /// The coarse allocation counter reached the channel count.
    ChannelPool { in_use: usize, capacity: usize },
    /// The channel already has a stream in Building or Pushed state.
    Channel(u32),
    /// A serialized module's previous submission has not completed yet.
    Serialized { module: &'static str, id: u32, target: u32 },
    /// An exclusive module's channel already has an opener.
    Exclusive { module: &'static str },
}

impl std::fmt::Display for BusyResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelPool { in_use, capacity } => {
                write!(f, "channel pool ({}/{} in use)", in_use, capacity)
            }
            Self::Channel(ch) => write!(f, "channel {}", ch),
            Self::Serialized { module, id, target } => write!(
                f,
                "{} (waiting for syncpoint {} to reach {})",
                module, id, target
            ),
            Self::Exclusive { module } => write!(f, "{} (exclusive)", module),
        }
    }
}

/// Errors raised while registering the static device table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("modules {first} and {second} share syncpoints 0x{mask:08X}")]
    OverlappingSyncpoints {
        first: &'static str,
        second: &'static str,
        mask: u32,
    },

    #[error("module {module} uses channel index {index} but only {channels} channels exist")]
    ChannelIndexOutOfRange {
        module: &'static str,
        index: u32,
        channels: usize,
    },

    #[error("module {module} requests mutex bits 0x{mask:08X} beyond the {locks} hardware locks")]
    MutexOutOfRange {
        module: &'static str,
        mask: u32,
        locks: usize,
    },

    #[error("duplicate module name {0}")]
    DuplicateName(&'static str),
}

/// Errors returned by host1x engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Host1xError {
    #[error("invalid {kind} id {id}")]
    InvalidId { kind: IdKind, id: u32 },

    #[error("resource busy: {0}")]
    Busy(BusyResource),

    #[error("push buffer of channel {channel} full: need {needed} words, {available} free")]
    RingFull {
        channel: u32,
        needed: usize,
        available: usize,
    },

    #[error("timed out waiting for syncpoint {id} to reach {threshold} (current {current})")]
    Timeout { id: u32, threshold: u32, current: u32 },

    #[error("module mutex conflict: requested 0x{requested:04X}, held 0x{held:04X}")]
    MutexConflict { requested: u32, held: u32 },

    #[error("module mutex bits 0x{mask:04X} released but not held")]
    MutexNotHeld { mask: u32 },

    #[error("hardware fault on channel {channel}: {reason}")]
    HardwareFault { channel: u32, reason: String },

    #[error("channel {channel} is {actual}, expected {expected}")]
    InvalidState {
        channel: u32,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("wait on syncpoint {id} cancelled")]
    Cancelled { id: u32 },

    #[error("device table rejected: {0}")]
    Registration(#[from] RegistrationError),
}

/// Result alias for host1x operations.
pub type Host1xResult<T> = Result<T, Host1xError>;

/// Linux errno values reported by the nvhost ioctl layer.
pub mod errno {
    pub const ENOENT: u32 = 2;
    pub const EIO: u32 = 5;
    pub const EAGAIN: u32 = 11;
    pub const ENOMEM: u32 = 12;
    pub const EBUSY: u32 = 16;
    pub const EINVAL: u32 = 22;
    pub const ENOTTY: u32 = 25;
    pub const ETIMEDOUT: u32 = 110;
    pub const ECANCELED: u32 = 125;
}

impl Host1xError {
    /// Whether the caller may retry the operation unchanged later.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::RingFull { .. } | Self::MutexConflict { .. } | Self::Timeout { .. }
        )
    }

    /// Errno value used when surfacing the error through an ioctl.
    pub fn errno(&self) -> u32 {
        match self {
            Self::InvalidId { .. } | Self::InvalidState { .. } | Self::MutexNotHeld { .. } => {
                errno::EINVAL
            }
            Self::Registration(_) => errno::EINVAL,
            Self::Busy(_) | Self::MutexConflict { .. } => errno::EBUSY,
            Self::RingFull { .. } => errno::EAGAIN,
            Self::Timeout { .. } => errno::ETIMEDOUT,
            Self::HardwareFault { .. } => errno::EIO,
            Self::Cancelled { .. } => errno::ECANCELED,
        }
    }
}
