// SPDX-FileCopyrightText: 2025 tegra-host contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! host1x01 command stream opcodes.
//!
//! Every command word carries its opcode in bits [31:28]:
//!
//! | Opcode | Name     | Layout                                          |
//! |--------|----------|-------------------------------------------------|
//! | 0      | SETCLASS | offset [27:16], class [15:6], mask [5:0]        |
//! | 1      | INCR     | offset [27:16], count [15:0]                    |
//! | 2      | NONINCR  | offset [27:16], count [15:0]                    |
//! | 3      | MASK     | offset [27:16], mask [15:0]                     |
//! | 4      | IMM      | offset [27:16], value [15:0]                    |
//! | 5      | RESTART  | address >> 4 [27:0]                             |
//! | 6      | GATHER   | offset [27:16], insert [15], incr [14], count   |
//!
//! Opcodes 7..15 are illegal on this generation and fault the channel.

/// host1x class id.
pub const HOST1X_CLASS_ID: u32 = 0x01;
/// MPEG encoder class id.
pub const VIDEO_ENCODE_MPEG_CLASS_ID: u32 = 0x20;
/// 2D class id.
pub const GRAPHICS_2D_CLASS_ID: u32 = 0x51;
/// 3D class id.
pub const GRAPHICS_3D_CLASS_ID: u32 = 0x60;

/// host1x class register: increment a syncpoint (present at offset 0 in every class).
pub const UCLASS_INCR_SYNCPT: u32 = 0x00;
/// host1x class register: stall the channel until a syncpoint reaches a threshold.
pub const UCLASS_WAIT_SYNCPT: u32 = 0x08;
/// host1x class register: wait relative to a wait-base.
pub const UCLASS_WAIT_SYNCPT_BASE: u32 = 0x09;
/// host1x class register: load a wait-base.
pub const UCLASS_LOAD_SYNCPT_BASE: u32 = 0x0b;
/// host1x class register: add to a wait-base.
pub const UCLASS_INCR_SYNCPT_BASE: u32 = 0x0c;

/// Condition attached to an `INCR_SYNCPT` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IncrCond {
    Immediate = 0,
    OpDone = 1,
    RdDone = 2,
    RegWrSafe = 3,
}

/// Decoded opcode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    SetClass,
    Incr,
    NonIncr,
    Mask,
    Imm,
    Restart,
    Gather,
    Illegal(u32),
}

impl Opcode {
    pub fn from_word(word: u32) -> Self {
        match word >> 28 {
            0 => Self::SetClass,
            1 => Self::Incr,
            2 => Self::NonIncr,
            3 => Self::Mask,
            4 => Self::Imm,
            5 => Self::Restart,
            6 => Self::Gather,
            op => Self::Illegal(op),
        }
    }
}

/// Register offset field shared by most opcodes.
#[inline]
pub const fn offset_of(word: u32) -> u32 {
    (word >> 16) & 0xFFF
}

#[inline]
pub const fn setclass(class_id: u32, offset: u32, mask: u32) -> u32 {
    (offset << 16) | (class_id << 6) | mask
}

#[inline]
pub const fn incr(offset: u32, count: u32) -> u32 {
    (1 << 28) | (offset << 16) | count
}

#[inline]
pub const fn nonincr(offset: u32, count: u32) -> u32 {
    (2 << 28) | (offset << 16) | count
}

#[inline]
pub const fn mask(offset: u32, mask: u32) -> u32 {
    (3 << 28) | (offset << 16) | mask
}

#[inline]
pub const fn imm(offset: u32, value: u32) -> u32 {
    (4 << 28) | (offset << 16) | value
}

#[inline]
pub const fn restart(address: u32) -> u32 {
    (5 << 28) | (address >> 4)
}

#[inline]
pub const fn gather(count: u32) -> u32 {
    (6 << 28) | count
}

/// Payload for `INCR_SYNCPT`.
#[inline]
pub const fn incr_syncpt(cond: IncrCond, id: u32) -> u32 {
    ((cond as u32) << 8) | (id & 0xFF)
}

/// Single-word syncpoint increment usable from any class.
#[inline]
pub const fn imm_incr_syncpt(cond: IncrCond, id: u32) -> u32 {
    imm(UCLASS_INCR_SYNCPT, incr_syncpt(cond, id))
}

/// Payload for `WAIT_SYNCPT`: id [31:24], threshold [23:0].
#[inline]
pub const fn wait_syncpt(id: u32, threshold: u32) -> u32 {
    (id << 24) | (threshold & 0x00FF_FFFF)
}

/// Payload for `WAIT_SYNCPT_BASE`: id [31:24], base [23:16], offset [15:0].
#[inline]
pub const fn wait_syncpt_base(id: u32, base: u32, offset: u32) -> u32 {
    (id << 24) | ((base & 0xFF) << 16) | (offset & 0xFFFF)
}

/// Payload for `INCR_SYNCPT_BASE`: base [31:24], offset [23:0].
#[inline]
pub const fn incr_syncpt_base(base: u32, offset: u32) -> u32 {
    (base << 24) | (offset & 0x00FF_FFFF)
}

/// The canonical no-op: a NONINCR with zero data words.
pub const NOOP: u32 = nonincr(0, 0);

/// Whether a 24-bit hardware wait threshold has been reached by `value`.
#[inline]
pub const fn wait_reached(value: u32, threshold: u32) -> bool {
    ((value.wrapping_sub(threshold) << 8) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_encoding() {
        assert_eq!(setclass(HOST1X_CLASS_ID, UCLASS_WAIT_SYNCPT, 1), 0x0008_0041);
        assert_eq!(incr(0x10, 2), 0x1010_0002);
        assert_eq!(nonincr(0x20, 3), 0x2020_0003);
        assert_eq!(imm_incr_syncpt(IncrCond::OpDone, 22), 0x4000_0116);
        assert_eq!(wait_syncpt(18, 0x0123_4567), 0x1223_4567);
        assert_eq!(NOOP, 0x2000_0000);
    }

    #[test]
    fn test_opcode_decoding() {
        assert_eq!(Opcode::from_word(setclass(0x60, 0, 0)), Opcode::SetClass);
        assert_eq!(Opcode::from_word(imm(0, 5)), Opcode::Imm);
        assert_eq!(Opcode::from_word(gather(4)), Opcode::Gather);
        assert_eq!(Opcode::from_word(0xF000_0000), Opcode::Illegal(15));
        assert_eq!(offset_of(mask(0x123, 0xF)), 0x123);
    }

    #[test]
    fn test_wait_reached_24bit() {
        assert!(wait_reached(10, 10));
        assert!(!wait_reached(9, 10));
        // Only the low 24 bits participate.
        assert!(wait_reached(0x0100_0005, 0x0000_0004));
        assert!(wait_reached(0x0000_0001, 0x00FF_FFFF));
    }
}
