// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Simulated channel command processor.
//!
//! Stands in for the host1x channel DMA engine: fetches words between DMAGET
//! and DMAPUT, decodes host1x opcodes and performs the register writes they
//! describe. Writes to the host class (and `INCR_SYNCPT` in any class) are
//! executed here; everything else is forwarded to a [`ClassUnit`] registered
//! for the current class.
//!
//! A `WAIT_SYNCPT` whose threshold is not reached stalls the channel with
//! DMAGET left on the data word of the wait; decoder state is kept per
//! channel so execution resumes mid-opcode on the next run.
//!
//! Every syncpoint increment executed during a run is recorded with the
//! offset of the word that performed it, for per-job accounting.

use std::collections::HashMap;

use crate::opcodes::{
    self, offset_of, Opcode, HOST1X_CLASS_ID, UCLASS_INCR_SYNCPT, UCLASS_INCR_SYNCPT_BASE,
    UCLASS_LOAD_SYNCPT_BASE, UCLASS_WAIT_SYNCPT, UCLASS_WAIT_SYNCPT_BASE,
};
use crate::registers::{sync, RegisterFile};

/// Fault code latched for an illegal opcode (low bits carry the opcode).
pub const FAULT_ILLEGAL_OPCODE: u32 = 0x100;
/// Fault code latched for a gather, which the simulation cannot fetch.
pub const FAULT_GATHER_UNSUPPORTED: u32 = 0x200;

/// A hardware unit that accepts register writes for one class.
pub trait ClassUnit: Send {
    fn class_id(&self) -> u32;

    fn write_reg(&mut self, offset: u32, value: u32);
}

/// Data words still owed to the opcode being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    /// Write `remaining` words to `offset`, bumping it when `increment`.
    Sequence {
        offset: u32,
        remaining: u32,
        increment: bool,
    },
    /// Write one word per set bit of `mask`, relative to `offset`.
    Masked { offset: u32, mask: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Decoder {
    class: u32,
    pending: Pending,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            class: HOST1X_CLASS_ID,
            pending: Pending::None,
        }
    }
}

/// Result of one run over a channel's fetched words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Every fetched word was executed.
    Drained { consumed: usize },
    /// Stopped on an unsatisfied syncpoint wait.
    Stalled {
        consumed: usize,
        id: u32,
        threshold: u32,
    },
    /// The channel raised a fault and stopped.
    Faulted { consumed: usize, code: u32 },
}

impl ExecOutcome {
    pub fn consumed(&self) -> usize {
        match *self {
            Self::Drained { consumed }
            | Self::Stalled { consumed, .. }
            | Self::Faulted { consumed, .. } => consumed,
        }
    }
}

enum Step {
    Continue,
    Stall { id: u32, threshold: u32 },
    Fault(u32),
}

/// Executes command words for every channel.
pub struct CommandProcessor {
    units: HashMap<u32, Box<dyn ClassUnit>>,
    decoders: Vec<Decoder>,
    /// Word being executed, relative to the start of the current run.
    cursor: usize,
    incrs: Vec<(usize, u32)>,
}

impl CommandProcessor {
    pub fn new(nb_channels: usize) -> Self {
        Self {
            units: HashMap::new(),
            decoders: vec![Decoder::default(); nb_channels],
            cursor: 0,
            incrs: Vec::new(),
        }
    }

    /// Attach the unit that receives writes for its class.
    pub fn register_unit(&mut self, unit: Box<dyn ClassUnit>) {
        self.units.insert(unit.class_id(), unit);
    }

    /// Forget mid-opcode state, as a DMA reset does.
    pub fn reset_channel(&mut self, ch: u32) {
        if let Some(d) = self.decoders.get_mut(ch as usize) {
            *d = Decoder::default();
        }
    }

    /// Increments executed by the last run as `(word offset, syncpoint)`.
    pub fn take_increments(&mut self) -> Vec<(usize, u32)> {
        std::mem::take(&mut self.incrs)
    }

    /// Execute `words`, the contents of the ring between DMAGET and DMAPUT.
    pub fn execute(&mut self, ch: u32, words: &[u32], regs: &RegisterFile) -> ExecOutcome {
        self.incrs.clear();
        let Some(mut decoder) = self.decoders.get(ch as usize).copied() else {
            return ExecOutcome::Faulted {
                consumed: 0,
                code: FAULT_ILLEGAL_OPCODE,
            };
        };

        let mut pos = 0;
        let outcome = loop {
            if pos >= words.len() {
                break ExecOutcome::Drained { consumed: pos };
            }
            let word = words[pos];
            self.cursor = pos;
            let step = match decoder.pending {
                Pending::None => self.decode(&mut decoder, word, regs),
                Pending::Sequence {
                    offset,
                    remaining,
                    increment,
                } => {
                    let step = self.write(decoder.class, offset, word, regs);
                    if !matches!(step, Step::Stall { .. }) {
                        decoder.pending = if remaining > 1 {
                            Pending::Sequence {
                                offset: if increment { offset + 1 } else { offset },
                                remaining: remaining - 1,
                                increment,
                            }
                        } else {
                            Pending::None
                        };
                    }
                    step
                }
                Pending::Masked { offset, mask } => {
                    let bit = mask.trailing_zeros();
                    let step = self.write(decoder.class, offset + bit, word, regs);
                    if !matches!(step, Step::Stall { .. }) {
                        let rest = mask & (mask - 1);
                        decoder.pending = if rest != 0 {
                            Pending::Masked { offset, mask: rest }
                        } else {
                            Pending::None
                        };
                    }
                    step
                }
            };
            match step {
                Step::Continue => pos += 1,
                Step::Stall { id, threshold } => {
                    break ExecOutcome::Stalled {
                        consumed: pos,
                        id,
                        threshold,
                    }
                }
                Step::Fault(code) => {
                    decoder = Decoder::default();
                    break ExecOutcome::Faulted {
                        consumed: pos,
                        code,
                    };
                }
            }
        };

        self.decoders[ch as usize] = decoder;
        outcome
    }

    /// Decode an opcode header.
    fn decode(&mut self, decoder: &mut Decoder, word: u32, regs: &RegisterFile) -> Step {
        let offset = offset_of(word);
        match Opcode::from_word(word) {
            Opcode::SetClass => {
                decoder.class = (word >> 6) & 0x3FF;
                let m = word & 0x3F;
                if m != 0 {
                    decoder.pending = Pending::Masked { offset, mask: m };
                }
                Step::Continue
            }
            Opcode::Incr | Opcode::NonIncr => {
                let count = word & 0xFFFF;
                if count != 0 {
                    decoder.pending = Pending::Sequence {
                        offset,
                        remaining: count,
                        increment: Opcode::from_word(word) == Opcode::Incr,
                    };
                }
                Step::Continue
            }
            Opcode::Mask => {
                let m = word & 0xFFFF;
                if m != 0 {
                    decoder.pending = Pending::Masked { offset, mask: m };
                }
                Step::Continue
            }
            Opcode::Imm => self.write(decoder.class, offset, word & 0xFFFF, regs),
            Opcode::Restart => {
                log::trace!("cmdproc: RESTART 0x{:X} (ring wraps implicitly)", (word & 0x0FFF_FFFF) << 4);
                Step::Continue
            }
            Opcode::Gather => Step::Fault(FAULT_GATHER_UNSUPPORTED),
            Opcode::Illegal(op) => Step::Fault(FAULT_ILLEGAL_OPCODE | op),
        }
    }

    /// Perform one register write in `class`.
    fn write(&mut self, class: u32, offset: u32, value: u32, regs: &RegisterFile) -> Step {
        if offset == UCLASS_INCR_SYNCPT {
            let id = value & 0xFF;
            regs.hw_syncpt_incr(id);
            self.incrs.push((self.cursor, id));
            log::trace!("cmdproc: class 0x{:X} incr syncpt {}", class, id);
            return Step::Continue;
        }

        if class == HOST1X_CLASS_ID {
            return match offset {
                UCLASS_WAIT_SYNCPT => {
                    let id = value >> 24;
                    let threshold = value & 0x00FF_FFFF;
                    let current = regs.sync_read(sync::syncpt(id));
                    if opcodes::wait_reached(current, threshold) {
                        Step::Continue
                    } else {
                        Step::Stall { id, threshold }
                    }
                }
                UCLASS_WAIT_SYNCPT_BASE => {
                    let id = value >> 24;
                    let base = (value >> 16) & 0xFF;
                    let threshold = regs
                        .sync_read(sync::syncpt_base(base))
                        .wrapping_add(value & 0xFFFF);
                    let current = regs.sync_read(sync::syncpt(id));
                    if opcodes::wait_reached(current, threshold) {
                        Step::Continue
                    } else {
                        Step::Stall { id, threshold }
                    }
                }
                UCLASS_LOAD_SYNCPT_BASE => {
                    let base = value >> 24;
                    regs.sync_write(sync::syncpt_base(base), value & 0x00FF_FFFF);
                    Step::Continue
                }
                UCLASS_INCR_SYNCPT_BASE => {
                    let base = value >> 24;
                    let cur = regs.sync_read(sync::syncpt_base(base));
                    regs.sync_write(sync::syncpt_base(base), cur.wrapping_add(value & 0x00FF_FFFF));
                    Step::Continue
                }
                _ => {
                    log::trace!("cmdproc: host class write 0x{:X} = 0x{:X}", offset, value);
                    Step::Continue
                }
            };
        }

        if let Some(unit) = self.units.get_mut(&class) {
            unit.write_reg(offset, value);
        } else {
            log::trace!(
                "cmdproc: no unit for class 0x{:X} (offset=0x{:X}, value=0x{:X})",
                class,
                offset,
                value
            );
        }
        Step::Continue
    }
}
