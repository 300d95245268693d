// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tegra20 host1x channel and syncpoint engine.
//!
//! Channels, command streams, syncpoints, module locks and interrupts of
//! the host1x block, running against a simulated register aperture.

pub mod channel;
pub mod chip;
pub mod command_processor;
pub mod debug;
pub mod device;
pub mod host_engine;
pub mod intr;
pub mod module_mutex;
pub mod opcodes;
pub mod push_buffer;
pub mod registers;
pub mod submitter;
pub mod syncpoint;

pub use channel::{ChannelHandle, ChannelPool, FreeOutcome};
pub use chip::t20::T20ChipOps;
pub use chip::ChipOps;
pub use debug::DebugSnapshot;
pub use device::{ModuleDevice, ModuleFlags};
pub use host_engine::{HostEngine, PendingWait};
pub use module_mutex::{MutexClient, MutexOwner};
pub use submitter::{CdmaState, Fence, JobStatus, JobTicket, Submission};
pub use syncpoint::SyncpointTable;
