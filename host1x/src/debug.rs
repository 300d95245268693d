// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Read-only state dump, rendered like the host1x debugfs status file.

use std::fmt;

use host1x_common::ChannelId;

use crate::submitter::CdmaState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncpointEntry {
    pub id: u32,
    pub name: &'static str,
    pub min: u32,
    pub max: u32,
    pub client_managed: bool,
    pub waiters: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub id: ChannelId,
    pub module: Option<&'static str>,
    pub refcount: u32,
    pub state: CdmaState,
    pub dmaput: u32,
    pub dmaget: u32,
    pub in_flight: usize,
    pub mutexes: u32,
}

/// Point-in-time view of syncpoints, wait-bases, module locks and channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSnapshot {
    pub chip: &'static str,
    pub syncpoints: Vec<SyncpointEntry>,
    pub wait_bases: Vec<u32>,
    pub mutexes_held: u32,
    pub channels_in_use: usize,
    pub channels: Vec<ChannelEntry>,
}

impl DebugSnapshot {
    pub fn syncpoint(&self, id: u32) -> Option<&SyncpointEntry> {
        self.syncpoints.iter().find(|s| s.id == id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelEntry> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Total number of queued waiters across all syncpoints.
    pub fn total_waiters(&self) -> usize {
        self.syncpoints.iter().map(|s| s.waiters).sum()
    }
}

impl fmt::Display for DebugSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- {} ----", self.chip)?;
        writeln!(f, "---- syncpts ----")?;
        // Unused syncpoints that never moved are skipped, as debugfs does.
        for sp in &self.syncpoints {
            if sp.name.is_empty() && sp.min == 0 && sp.max == 0 && sp.waiters == 0 {
                continue;
            }
            write!(f, "id {} ({}) min {} max {}", sp.id, sp.name, sp.min, sp.max)?;
            if sp.client_managed {
                write!(f, " [client]")?;
            }
            if sp.waiters > 0 {
                write!(f, " waiters {}", sp.waiters)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "---- waitbases ----")?;
        for (i, base) in self.wait_bases.iter().enumerate() {
            if *base != 0 {
                writeln!(f, "waitbase id {} val {}", i, base)?;
            }
        }

        writeln!(f, "---- mlocks ----")?;
        writeln!(f, "held 0x{:04X}", self.mutexes_held)?;

        writeln!(
            f,
            "---- channels ({} in use) ----",
            self.channels_in_use
        )?;
        for ch in &self.channels {
            match ch.module {
                Some(module) => writeln!(
                    f,
                    "{}-{}: {} refs {} put 0x{:X} get 0x{:X} jobs {} mlocks 0x{:04X}",
                    ch.id,
                    module,
                    ch.state.as_str(),
                    ch.refcount,
                    ch.dmaput,
                    ch.dmaget,
                    ch.in_flight,
                    ch.mutexes
                )?,
                None => writeln!(f, "{}: free", ch.id)?,
            }
        }
        Ok(())
    }
}
