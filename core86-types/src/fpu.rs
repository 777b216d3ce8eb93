//! Raw 80287 state: the eight-register stack, control/status/tag words,
//! and last-instruction metadata. Behavior lives in `core86-fpu`; this
//! module only owns the data and the bit-level accessors DESIGN NOTES §9
//! asks for (`logical_to_physical`, no float-union punning).

use bitflags::bitflags;

bitflags! {
    /// The 16-bit FPU control word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlWord: u16 {
        const INVALID_MASK    = 1 << 0;
        const DENORMAL_MASK   = 1 << 1;
        const ZERODIV_MASK    = 1 << 2;
        const OVERFLOW_MASK   = 1 << 3;
        const UNDERFLOW_MASK  = 1 << 4;
        const PRECISION_MASK  = 1 << 5;
        /// Precision control, bits 9-8: 00=single 10=double 11=extended.
        const PRECISION_LOW   = 1 << 8;
        const PRECISION_HIGH  = 1 << 9;
        /// Rounding control, bits 11-10.
        const ROUNDING_LOW    = 1 << 10;
        const ROUNDING_HIGH   = 1 << 11;
        const INFINITY_CTRL   = 1 << 12;
    }
}

impl Default for ControlWord {
    fn default() -> Self {
        // Reset value: 0x037F (all exceptions masked, 64-bit precision,
        // round-to-nearest).
        Self::from_bits_truncate(0x037F)
    }
}

bitflags! {
    /// The 16-bit FPU status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusWord: u16 {
        const INVALID_OP   = 1 << 0;
        const DENORMAL_OP  = 1 << 1;
        const ZERO_DIVIDE  = 1 << 2;
        const OVERFLOW     = 1 << 3;
        const UNDERFLOW    = 1 << 4;
        const PRECISION    = 1 << 5;
        const STACK_FAULT  = 1 << 6;
        const ERROR_SUMMARY = 1 << 7;
        const C0 = 1 << 8;
        const C1 = 1 << 9;
        const C2 = 1 << 10;
        const TOP_BIT0 = 1 << 11;
        const TOP_BIT1 = 1 << 12;
        const TOP_BIT2 = 1 << 13;
        const C3 = 1 << 14;
        const BUSY = 1 << 15;
    }
}

impl StatusWord {
    const TOP_MASK: u16 = Self::TOP_BIT0.bits() | Self::TOP_BIT1.bits() | Self::TOP_BIT2.bits();
    const CONDITION_MASK: u16 = Self::C0.bits() | Self::C1.bits() | Self::C2.bits() | Self::C3.bits();

    #[must_use]
    #[inline]
    pub const fn top(self) -> u8 {
        ((self.bits() & Self::TOP_MASK) >> 11) as u8
    }

    #[inline]
    pub fn set_top(&mut self, top: u8) {
        let bits = (self.bits() & !Self::TOP_MASK) | (u16::from(top & 0b111) << 11);
        *self = Self::from_bits_truncate(bits);
    }

    #[inline]
    pub fn clear_condition_codes(&mut self) {
        self.remove(Self::C0 | Self::C1 | Self::C2 | Self::C3);
    }

    #[must_use]
    #[inline]
    pub const fn condition_codes(self) -> u8 {
        // Packs C3 C2 C1 C0 into bits 3-0 in that order, as Intel documents them.
        (((self.bits() & Self::CONDITION_MASK) >> 8) & 0x7)
            | (((self.bits() >> 14) & 0x1) << 3)
    }
}

/// Two bits per physical stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Valid = 0b00,
    Zero = 0b01,
    Special = 0b10,
    Empty = 0b11,
}

impl Tag {
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Valid,
            0b01 => Self::Zero,
            0b10 => Self::Special,
            _ => Self::Empty,
        }
    }
}

/// The 16-bit tag word: two bits per physical slot, slot 0 in the low
/// bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagWord(pub u16);

impl Default for TagWord {
    fn default() -> Self {
        // Reset value: every slot empty.
        Self(0xFFFF)
    }
}

impl TagWord {
    #[must_use]
    #[inline]
    pub const fn get(self, physical_slot: u8) -> Tag {
        let shift = (physical_slot & 0b111) * 2;
        Tag::from_bits(((self.0 >> shift) & 0b11) as u8)
    }

    #[inline]
    pub fn set(&mut self, physical_slot: u8, tag: Tag) {
        let shift = (physical_slot & 0b111) * 2;
        let mask = !(0b11u16 << shift);
        self.0 = (self.0 & mask) | ((tag as u16) << shift);
    }
}

/// `logical_to_physical(i, top) = (i + top) & 7` (DESIGN NOTES §9):
/// logical register 0 is always the current top of stack.
#[must_use]
#[inline]
pub const fn logical_to_physical(logical: u8, top: u8) -> u8 {
    (logical.wrapping_add(top)) & 0b111
}

/// Last-instruction metadata recorded by every FPU op, read back by
/// FSTENV/FSAVE-style state dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LastInstruction {
    pub opcode: u16,
    pub ip: u32,
    pub data_ptr: u32,
}

/// The full 80287 register/state block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpuState {
    pub stack: [f64; 8],
    pub control: ControlWord,
    pub status: StatusWord,
    pub tag: TagWord,
    pub last: LastInstruction,
}

impl Default for FpuState {
    fn default() -> Self {
        Self {
            stack: [0.0; 8],
            control: ControlWord::default(),
            status: StatusWord::default(),
            tag: TagWord::default(),
            last: LastInstruction::default(),
        }
    }
}

impl FpuState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    #[inline]
    pub const fn top(&self) -> u8 {
        self.status.top()
    }
}
