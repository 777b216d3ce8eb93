//! The eight-way ALU group shared by opcodes `0x00-0x3D`, `0x80-0x83`,
//! and `0xF6-0xF7`, sharing one flag-computation path applied uniformly.

use core86_types::Flags;

use crate::flags::{self, Width};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    #[must_use]
    pub const fn from_group_index(index: u8) -> Self {
        match index & 0b111 {
            0 => Self::Add,
            1 => Self::Or,
            2 => Self::Adc,
            3 => Self::Sbb,
            4 => Self::And,
            5 => Self::Sub,
            6 => Self::Xor,
            _ => Self::Cmp,
        }
    }

    /// Applies this ALU op, returning `(result, writes_back)`: CMP and
    /// TEST-style ops compute a result only to set flags from it.
    pub fn apply(self, flags: &mut Flags, a: u32, b: u32, width: Width) -> (u32, bool) {
        match self {
            Self::Add => (flags::add(flags, a, b, false, width), true),
            Self::Adc => (flags::add(flags, a, b, flags.contains(Flags::CARRY), width), true),
            Self::Sub => (flags::sub(flags, a, b, false, width), true),
            Self::Sbb => (flags::sub(flags, a, b, flags.contains(Flags::CARRY), width), true),
            Self::And => (flags::logical(flags, a & b, width), true),
            Self::Or => (flags::logical(flags, a | b, width), true),
            Self::Xor => (flags::logical(flags, a ^ b, width), true),
            Self::Cmp => (flags::sub(flags, a, b, false, width), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmp_sets_flags_without_signaling_a_writeback() {
        let mut flags = Flags::empty();
        let (result, writes_back) = AluOp::Cmp.apply(&mut flags, 5, 5, Width::Byte);
        assert_eq!(result, 0);
        assert!(!writes_back);
        assert!(flags.contains(Flags::ZERO));
    }

    #[test]
    fn group_index_ordering_matches_opcode_table() {
        assert_eq!(AluOp::from_group_index(0), AluOp::Add);
        assert_eq!(AluOp::from_group_index(5), AluOp::Sub);
        assert_eq!(AluOp::from_group_index(7), AluOp::Cmp);
    }
}
