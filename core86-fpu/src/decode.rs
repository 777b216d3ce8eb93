//! Escape-opcode decode: turns `(opcode, ModR/M)` into an `FpuOp`
//! describing what to do and what operand (if any) the caller still
//! needs to fetch off the memory bus.
//!
//! This module is pure -- it never touches memory itself. `core86`'s
//! escape dispatcher reads whatever `MemOperand` calls for via its
//! `MemoryBus`, converts it through `crate::memops`, and passes the
//! resulting `f64` back into `FpuCore::execute`.
//!
//! The table is grouped on one key:
//! `((opcode & 7) << 4) | (is_memory as u8) << 3 | reg_field`. A handful
//! of forms outside that scheme (the fixed-encoding `FCOMPP`, `FNINIT`,
//! `FNCLEX`, `FNSTSW AX`) are matched on the full ModR/M byte first.

use crate::constants::Constant;
use crate::ops::ArithKind;

/// Width/kind of a memory operand an `FpuOp` still needs fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOperand {
    Single,
    Double,
    Extended,
    Int16,
    Int32,
    Int64,
}

/// The two `ST(rm)`-destination forms (the `0xDC`/`0xDE` register
/// groups) read their ModR/M `reg` field through this table instead of
/// `ArithKind::from_reg_field`, reproducing a preserved hardware quirk:
/// the SUB and SUBR slots are swapped relative to an Intel-faithful
/// decode. ADD/MUL/DIV/DIVR are unaffected.
#[must_use]
pub const fn arith_kind_for_est_dest(reg: u8) -> Option<ArithKind> {
    match reg {
        0 => Some(ArithKind::Add),
        1 => Some(ArithKind::Mul),
        4 => Some(ArithKind::SubR), // swapped: Intel-correct slot is Sub
        5 => Some(ArithKind::Sub),  // swapped: Intel-correct slot is SubR
        6 => Some(ArithKind::Div),
        7 => Some(ArithKind::DivR),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpuOp {
    /// ST(0) = ST(0) op src, src = ST(rm).
    ArithStDest { kind: ArithKind, rm: u8 },
    /// ST(0) = ST(0) op src, src = a memory operand of the given width.
    ArithStDestMem { kind: ArithKind, operand: MemOperand },
    /// ST(rm) = ST(rm) op ST(0), optionally popping afterwards
    /// (`FADDP`/`FSUBP`/... at `0xDE`).
    ArithEstDest { kind: ArithKind, rm: u8, pop: bool },
    /// ST(0) = ST(0) op src, src an integer memory operand, converted
    /// to `f64` by the caller first.
    ArithIntMem { kind: ArithKind, operand: MemOperand },

    Compare { rm: u8, pop_count: u8 },
    CompareMem { operand: MemOperand },
    Ftst,
    Fxam,

    LoadConst(Constant),
    /// Push a copy of ST(rm) (`FLD ST(i)`).
    LoadSt { rm: u8 },
    /// Load a floating-point memory operand and push it.
    LoadMem { operand: MemOperand },

    /// `FST`/`FSTP` to another stack register.
    StoreSt { rm: u8, pop: bool },
    /// `FST`/`FSTP` to memory.
    StoreMem { operand: MemOperand, pop: bool },

    Fxch { rm: u8 },
    Ffree { rm: u8 },
    Fincstp,
    Fdecstp,

    F2xm1,
    Fyl2x,
    Fyl2xp1,
    Fptan,
    Fpatan,
    Fsin,
    Fcos,
    Fsqrt,
    Fchs,
    Fabs,
    Frndint,
    Fscale,
    Fxtract,

    Finit,
    Fnclex,
    Fnop,
    LoadControlWord,
    StoreControlWord,
    StoreStatusWord,
    /// `FNSTSW AX` -- stores the status word into the integer AX
    /// register rather than memory; `core86`'s dispatcher special-cases
    /// this on decode of `0xDF /4 rm==0`.
    StoreStatusWordToAx,
    Frstor,
    Fsave,

    /// Encodings that exist on later coprocessors (387+ `FUCOM`, Pentium
    /// Pro+ `FCOMI`/`FCMOVcc`, SSE3+ `FISTTP`) or that this core simply
    /// does not implement (packed-BCD `FBLD`/`FBSTP`, `FLDENV`/`FSTENV`).
    /// Raising device-not-available or invalid-opcode for these is the
    /// caller's job; decode only reports that nothing matched.
    InvalidEncoding,
}

/// Decodes an escape opcode (`0xD8`..=`0xDF`) given its already-parsed
/// ModR/M byte. `modrm` is the raw byte; `is_memory` is `mod != 0b11`.
#[must_use]
pub fn decode_escape(opcode: u8, modrm: u8, is_memory: bool) -> FpuOp {
    let reg = (modrm >> 3) & 0b111;
    let rm = modrm & 0b111;

    // Fixed full-byte encodings that don't fit the reg/rm grouping.
    if !is_memory {
        match (opcode, modrm) {
            (0xDE, 0xD9) => return FpuOp::Compare { rm: 0, pop_count: 2 }, // FCOMPP
            (0xDB, 0xE2) => return FpuOp::Fnclex,
            (0xDB, 0xE3) => return FpuOp::Finit,
            (0xD9, 0xD0) => return FpuOp::Fnop,
            (0xDF, 0xE0) => return FpuOp::StoreStatusWordToAx,
            _ => {}
        }
    }

    match ((opcode & 7) << 4) | (u8::from(is_memory) << 3) | reg {
        // 0xD8: ST(0)-destination arithmetic/compare, register or m32real.
        key if opcode == 0xD8 && !is_memory => match ArithKind::from_reg_field(reg) {
            Some(kind) => FpuOp::ArithStDest { kind, rm },
            None if reg == 2 => FpuOp::Compare { rm, pop_count: 0 },
            None if reg == 3 => FpuOp::Compare { rm, pop_count: 1 },
            None => FpuOp::InvalidEncoding,
        },
        _ if opcode == 0xD8 && is_memory => match ArithKind::from_reg_field(reg) {
            Some(kind) => FpuOp::ArithStDestMem { kind, operand: MemOperand::Single },
            None if reg == 2 => FpuOp::CompareMem { operand: MemOperand::Single },
            None if reg == 3 => FpuOp::CompareMem { operand: MemOperand::Single },
            None => FpuOp::InvalidEncoding,
        },

        // 0xD9: loads/stores/constants/transcendentals.
        _ if opcode == 0xD9 && !is_memory => decode_d9_register(reg, rm),
        _ if opcode == 0xD9 && is_memory => decode_d9_memory(reg),

        // 0xDA: m32int arithmetic (register forms don't exist on an 80287).
        _ if opcode == 0xDA && is_memory => match ArithKind::from_reg_field(reg) {
            Some(kind) => FpuOp::ArithIntMem { kind, operand: MemOperand::Int32 },
            None if reg == 2 => FpuOp::CompareMem { operand: MemOperand::Int32 },
            None if reg == 3 => FpuOp::CompareMem { operand: MemOperand::Int32 },
            None => FpuOp::InvalidEncoding,
        },
        _ if opcode == 0xDA => FpuOp::InvalidEncoding,

        // 0xDB: m32int load/store, m80real load/store.
        _ if opcode == 0xDB && is_memory => match reg {
            0 => FpuOp::LoadMem { operand: MemOperand::Int32 },
            2 => FpuOp::StoreMem { operand: MemOperand::Int32, pop: false },
            3 => FpuOp::StoreMem { operand: MemOperand::Int32, pop: true },
            5 => FpuOp::LoadMem { operand: MemOperand::Extended },
            7 => FpuOp::StoreMem { operand: MemOperand::Extended, pop: true },
            _ => FpuOp::InvalidEncoding,
        },
        _ if opcode == 0xDB => FpuOp::InvalidEncoding,

        // 0xDC: ST(rm)-destination arithmetic (register), m64real (memory).
        _ if opcode == 0xDC && !is_memory => match arith_kind_for_est_dest(reg) {
            Some(kind) => FpuOp::ArithEstDest { kind, rm, pop: false },
            None if reg == 2 => FpuOp::Compare { rm, pop_count: 0 },
            None if reg == 3 => FpuOp::Compare { rm, pop_count: 1 },
            None => FpuOp::InvalidEncoding,
        },
        _ if opcode == 0xDC && is_memory => match ArithKind::from_reg_field(reg) {
            Some(kind) => FpuOp::ArithStDestMem { kind, operand: MemOperand::Double },
            None => FpuOp::InvalidEncoding,
        },

        // 0xDD: stack-register FST/FSTP/FFREE (register), m64real + state
        // dump/restore + status-word store (memory).
        _ if opcode == 0xDD && !is_memory => match reg {
            0 => FpuOp::Ffree { rm },
            2 => FpuOp::StoreSt { rm, pop: false },
            3 => FpuOp::StoreSt { rm, pop: true },
            _ => FpuOp::InvalidEncoding, // 4/5 are FUCOM/FUCOMP, 387+.
        },
        _ if opcode == 0xDD && is_memory => match reg {
            0 => FpuOp::LoadMem { operand: MemOperand::Double },
            2 => FpuOp::StoreMem { operand: MemOperand::Double, pop: false },
            3 => FpuOp::StoreMem { operand: MemOperand::Double, pop: true },
            4 => FpuOp::Frstor,
            6 => FpuOp::Fsave,
            7 => FpuOp::StoreStatusWord,
            _ => FpuOp::InvalidEncoding,
        },

        // 0xDE: ST(rm)-destination arithmetic with pop (register),
        // m16int arithmetic (memory).
        _ if opcode == 0xDE && !is_memory => match arith_kind_for_est_dest(reg) {
            Some(kind) => FpuOp::ArithEstDest { kind, rm, pop: true },
            None => FpuOp::InvalidEncoding,
        },
        _ if opcode == 0xDE && is_memory => match ArithKind::from_reg_field(reg) {
            Some(kind) => FpuOp::ArithIntMem { kind, operand: MemOperand::Int16 },
            None if reg == 2 => FpuOp::CompareMem { operand: MemOperand::Int16 },
            None if reg == 3 => FpuOp::CompareMem { operand: MemOperand::Int16 },
            None => FpuOp::InvalidEncoding,
        },

        // 0xDF: m16int/m64int load/store (memory); FNSTSW AX handled above.
        _ if opcode == 0xDF && is_memory => match reg {
            0 => FpuOp::LoadMem { operand: MemOperand::Int16 },
            2 => FpuOp::StoreMem { operand: MemOperand::Int16, pop: false },
            3 => FpuOp::StoreMem { operand: MemOperand::Int16, pop: true },
            5 => FpuOp::LoadMem { operand: MemOperand::Int64 },
            7 => FpuOp::StoreMem { operand: MemOperand::Int64, pop: true },
            _ => FpuOp::InvalidEncoding, // 4/6 are packed-BCD FBLD/FBSTP.
        },
        _ if opcode == 0xDF => FpuOp::InvalidEncoding,

        _ => FpuOp::InvalidEncoding,
    }
}

fn decode_d9_register(reg: u8, rm: u8) -> FpuOp {
    match reg {
        0 => FpuOp::LoadSt { rm },
        1 => FpuOp::Fxch { rm },
        2 => FpuOp::Fnop, // D9 D0 is caught above; other rm values: no-op.
        4 => match rm {
            0 => FpuOp::Fchs,
            1 => FpuOp::Fabs,
            4 => FpuOp::Ftst,
            5 => FpuOp::Fxam,
            _ => FpuOp::InvalidEncoding,
        },
        5 => match Constant::from_rm(rm) {
            Some(c) => FpuOp::LoadConst(c),
            None => FpuOp::InvalidEncoding,
        },
        6 => match rm {
            0 => FpuOp::F2xm1,
            1 => FpuOp::Fyl2x,
            2 => FpuOp::Fptan,
            3 => FpuOp::Fpatan,
            4 => FpuOp::Fxtract,
            6 => FpuOp::Fdecstp,
            7 => FpuOp::Fincstp,
            _ => FpuOp::InvalidEncoding, // 5 is FPREM1, 387+.
        },
        7 => match rm {
            1 => FpuOp::Fyl2xp1,
            2 => FpuOp::Fsqrt,
            4 => FpuOp::Frndint,
            5 => FpuOp::Fscale,
            6 => FpuOp::Fsin,
            7 => FpuOp::Fcos,
            _ => FpuOp::InvalidEncoding, // 0 is FPREM, 3 is FSINCOS (387+).
        },
        _ => FpuOp::InvalidEncoding,
    }
}

fn decode_d9_memory(reg: u8) -> FpuOp {
    match reg {
        0 => FpuOp::LoadMem { operand: MemOperand::Single },
        2 => FpuOp::StoreMem { operand: MemOperand::Single, pop: false },
        3 => FpuOp::StoreMem { operand: MemOperand::Single, pop: true },
        5 => FpuOp::LoadControlWord,
        7 => FpuOp::StoreControlWord,
        _ => FpuOp::InvalidEncoding, // 4/6 are FLDENV/FSTENV.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn d8_register_add_decodes() {
        // D8 C1: reg=0 (ADD), rm=1.
        let op = decode_escape(0xD8, 0xC1, false);
        assert_eq!(op, FpuOp::ArithStDest { kind: ArithKind::Add, rm: 1 });
    }

    #[test]
    fn dc_register_sub_and_subr_are_swapped() {
        // DC E8 (reg=5): Intel-correct slot would be FSUB; here it's SubR.
        let sub_slot = decode_escape(0xDC, 0xE8, false);
        assert_eq!(
            sub_slot,
            FpuOp::ArithEstDest { kind: ArithKind::SubR, rm: 0, pop: false }
        );
        // DC E0 (reg=4): Intel-correct slot would be FSUBR; here it's Sub.
        let subr_slot = decode_escape(0xDC, 0xE0, false);
        assert_eq!(
            subr_slot,
            FpuOp::ArithEstDest { kind: ArithKind::Sub, rm: 0, pop: false }
        );
    }

    #[test]
    fn fcompp_is_a_fixed_full_byte_encoding() {
        assert_eq!(decode_escape(0xDE, 0xD9, false), FpuOp::Compare { rm: 0, pop_count: 2 });
    }

    #[test]
    fn d9_memory_load_single_decodes() {
        assert_eq!(
            decode_escape(0xD9, 0x05, true), // mod=00 reg=0 rm=101 (disp32 m32real)
            FpuOp::LoadMem { operand: MemOperand::Single }
        );
    }

    #[test]
    fn fucom_is_out_of_scope_for_an_80287() {
        assert_eq!(decode_escape(0xDD, 0xE0, false), FpuOp::InvalidEncoding);
    }
}
