//! `FpuCore`: the orchestration layer gluing `FpuState` to the decoded
//! `FpuOp` stream. `core86`'s escape dispatcher owns the `MemoryBus` and
//! EA computation; it hands already-fetched/converted `f64` operands in
//! here and reads `Decision`s back out to learn whether to raise
//! device-not-available (FPU absent/disabled) or invalid-opcode.

use core86_types::fpu::{ControlWord, FpuState, StatusWord};

use crate::compare::{compare, compare_mem, ftst, fxam};
use crate::decode::FpuOp;
use crate::stack::StackOps;
use crate::{constants, transcendental};

/// A 94-byte `FRSTOR`/`FSAVE` image: control word, status word, tag
/// word, instruction/data pointers (4 words, unused beyond storage
/// here), then eight 10-byte extended-precision registers.
pub const SAVE_IMAGE_LEN: usize = 94;

#[derive(Debug, Clone, Default)]
pub struct FpuCore {
    pub state: FpuState,
}

impl FpuCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        log::debug!("fpu reset (FINIT)");
        self.state = FpuState::new();
    }

    #[must_use]
    pub fn control_word(&self) -> u16 {
        self.state.control.bits()
    }

    pub fn set_control_word(&mut self, bits: u16) {
        self.state.control = ControlWord::from_bits_truncate(bits);
    }

    #[must_use]
    pub fn status_word(&self) -> u16 {
        self.state.status.bits()
    }

    /// Runs a decoded operation. `mem_operand` is the already-fetched,
    /// already-converted-to-`f64` memory operand for ops that need one
    /// (ignored otherwise).
    pub fn execute(&mut self, op: FpuOp, mem_operand: f64) {
        match op {
            FpuOp::ArithStDest { kind, rm } => {
                let src = self.state.st(rm);
                let dst = self.state.st(0);
                self.state.set_st(0, kind.apply(dst, src));
            }
            FpuOp::ArithStDestMem { kind, .. } | FpuOp::ArithIntMem { kind, .. } => {
                let dst = self.state.st(0);
                self.state.set_st(0, kind.apply(dst, mem_operand));
            }
            FpuOp::ArithEstDest { kind, rm, pop } => {
                let st0 = self.state.st(0);
                let esti = self.state.st(rm);
                self.state.set_st(rm, kind.apply(esti, st0));
                if pop {
                    self.state.pop();
                }
            }

            FpuOp::Compare { rm, pop_count } => {
                let a = self.state.st(0);
                let b = self.state.st(rm);
                compare(&mut self.state, a, b);
                for _ in 0..pop_count {
                    self.state.pop();
                }
            }
            FpuOp::CompareMem { .. } => compare_mem(&mut self.state, mem_operand),
            FpuOp::Ftst => ftst(&mut self.state),
            FpuOp::Fxam => fxam(&mut self.state),

            FpuOp::LoadConst(c) => self.state.push(c.value()),
            FpuOp::LoadSt { rm } => {
                let value = self.state.st(rm);
                self.state.push(value);
            }
            FpuOp::LoadMem { .. } => self.state.push(mem_operand),

            FpuOp::StoreSt { rm, pop } => {
                let value = self.state.st(0);
                self.state.set_st(rm, value);
                if pop {
                    self.state.pop();
                }
            }
            // Memory stores: the value to write is read by the caller via
            // `top_for_store`/`pop_for_store` before calling `execute`, so
            // nothing to do here beyond the pop bookkeeping.
            FpuOp::StoreMem { pop, .. } => {
                if pop {
                    self.state.pop();
                }
            }

            FpuOp::Fxch { rm } => {
                let a = self.state.st(0);
                let b = self.state.st(rm);
                self.state.set_st(0, b);
                self.state.set_st(rm, a);
            }
            FpuOp::Ffree { rm } => {
                use core86_types::fpu::{logical_to_physical, Tag};
                let physical = logical_to_physical(rm, self.state.top());
                self.state.tag.set(physical, Tag::Empty);
            }
            FpuOp::Fincstp => {
                let top = self.state.top();
                self.state.status.set_top(core86_types::fpu::logical_to_physical(1, top));
            }
            FpuOp::Fdecstp => {
                let top = self.state.top();
                self.state.status.set_top(core86_types::fpu::logical_to_physical(7, top));
            }

            FpuOp::F2xm1 => transcendental::f2xm1(&mut self.state),
            FpuOp::Fyl2x => transcendental::fyl2x(&mut self.state),
            FpuOp::Fyl2xp1 => transcendental::fyl2xp1(&mut self.state),
            FpuOp::Fptan => transcendental::fptan(&mut self.state),
            FpuOp::Fpatan => transcendental::fpatan(&mut self.state),
            FpuOp::Fsin => transcendental::fsin(&mut self.state),
            FpuOp::Fcos => {
                let x = self.state.st(0);
                self.state.set_st(0, x.cos());
            }
            FpuOp::Fsqrt => transcendental::fsqrt(&mut self.state),
            FpuOp::Fchs => transcendental::fchs(&mut self.state),
            FpuOp::Fabs => transcendental::fabs(&mut self.state),
            FpuOp::Frndint => {
                let x = self.state.st(0);
                self.state.set_st(0, x.round());
            }
            FpuOp::Fscale => {
                let x = self.state.st(0);
                let scale = self.state.st(1);
                self.state.set_st(0, x * 2f64.powi(scale.trunc() as i32));
            }
            FpuOp::Fxtract => {
                // Intel's convention differs from `frexp`'s: significand
                // in [1, 2) rather than [0.5, 1), exponent one less.
                let x = self.state.st(0);
                let (mantissa, exponent) = frexp(x);
                let (significand, unbiased_exponent) = if x == 0.0 || !x.is_finite() {
                    (mantissa, exponent)
                } else {
                    (mantissa * 2.0, exponent - 1)
                };
                self.state.set_st(0, f64::from(unbiased_exponent));
                self.state.push(significand);
            }

            FpuOp::Finit | FpuOp::Fnclex => {
                if matches!(op, FpuOp::Finit) {
                    self.reset();
                } else {
                    self.state.status.clear_condition_codes();
                    self.state.status.remove(
                        StatusWord::INVALID_OP
                            | StatusWord::DENORMAL_OP
                            | StatusWord::ZERO_DIVIDE
                            | StatusWord::OVERFLOW
                            | StatusWord::UNDERFLOW
                            | StatusWord::PRECISION
                            | StatusWord::STACK_FAULT
                            | StatusWord::ERROR_SUMMARY,
                    );
                }
            }
            FpuOp::Fnop
            | FpuOp::LoadControlWord
            | FpuOp::StoreControlWord
            | FpuOp::StoreStatusWord
            | FpuOp::StoreStatusWordToAx
            | FpuOp::Frstor
            | FpuOp::Fsave
            | FpuOp::InvalidEncoding => {
                // Handled directly by the caller (control-word bits,
                // status-word read, save-image (de)serialization, or
                // raised as a fault); nothing for `execute` to do.
            }
        }
    }

    /// The value `FST`/`FSTP`/`FIST` family ops should write to memory,
    /// read *before* `execute` (which performs the optional pop).
    #[must_use]
    pub fn value_for_store(&self) -> f64 {
        self.state.st_peek(0)
    }

    /// Serializes the `FSAVE`/`FNSAVE` 94-byte image.
    #[must_use]
    pub fn save_image(&self) -> [u8; SAVE_IMAGE_LEN] {
        let mut out = [0u8; SAVE_IMAGE_LEN];
        out[0..2].copy_from_slice(&self.state.control.bits().to_le_bytes());
        out[2..4].copy_from_slice(&self.state.status.bits().to_le_bytes());
        out[4..6].copy_from_slice(&self.state.tag.0.to_le_bytes());
        out[6..8].copy_from_slice(&(self.state.last.ip as u16).to_le_bytes());
        out[8..10].copy_from_slice(&[0, 0]); // CS (not tracked separately here)
        out[10..12].copy_from_slice(&(self.state.last.data_ptr as u16).to_le_bytes());
        out[12..14].copy_from_slice(&[0, 0]); // operand segment
        for (i, &value) in self.state.stack.iter().enumerate() {
            let base = 14 + i * 10;
            out[base..base + 10].copy_from_slice(&crate::memops::f64_to_extended(value));
        }
        out
    }

    /// Restores from a 94-byte `FRSTOR` image. Extended-precision
    /// registers are read back through the same low-8-bytes-as-double
    /// approximation `memops` uses everywhere else.
    pub fn restore_from_image(&mut self, image: &[u8; SAVE_IMAGE_LEN]) {
        use core86_types::fpu::TagWord;

        log::trace!("fpu frstor: tag word {:#06x}", u16::from_le_bytes([image[4], image[5]]));

        self.state.control = ControlWord::from_bits_truncate(u16::from_le_bytes([image[0], image[1]]));
        self.state.status = StatusWord::from_bits_truncate(u16::from_le_bytes([image[2], image[3]]));
        self.state.tag = TagWord(u16::from_le_bytes([image[4], image[5]]));
        self.state.last.ip = u32::from(u16::from_le_bytes([image[6], image[7]]));
        self.state.last.data_ptr = u32::from(u16::from_le_bytes([image[10], image[11]]));

        for i in 0..8 {
            let base = 14 + i * 10;
            let mut field = [0u8; 10];
            field.copy_from_slice(&image[base..base + 10]);
            self.state.stack[i] = crate::memops::extended_to_f64(field);
        }
    }
}

/// `f64::frexp`-equivalent: splits into mantissa `m` in `[0.5, 1)` and
/// exponent `e` such that `x == m * 2^e`. The standard library dropped
/// this from `f64` itself; reimplemented from its bit layout since
/// `libm`-style crates aren't part of this workspace's stack.
fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || x.is_nan() || x.is_infinite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    if exponent == 0 {
        // Subnormal: normalize by hand.
        let (m, e) = frexp(x * 2f64.powi(64));
        return (m, e - 64);
    }
    let unbiased = exponent - 1022;
    let mantissa_bits = (bits & !(0x7ffu64 << 52)) | (1022u64 << 52);
    (f64::from_bits(mantissa_bits), unbiased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_escape;
    use crate::ops::ArithKind;

    #[test]
    fn fld1_fldl2e_fadd_matches_seed_scenario() {
        let mut core = FpuCore::new();
        core.execute(FpuOp::LoadConst(constants::Constant::One), 0.0);
        core.execute(FpuOp::LoadConst(constants::Constant::Log2E), 0.0);
        core.execute(FpuOp::ArithStDest { kind: ArithKind::Add, rm: 1 }, 0.0);
        assert!((core.state.st_peek(0) - (1.0 + std::f64::consts::LOG2_E)).abs() < 1e-12);
    }

    #[test]
    fn est_dest_sub_pair_preserves_decoded_swap() {
        let mut core = FpuCore::new();
        core.state.push(10.0); // ST(1) after next push
        core.state.push(3.0); // ST(0)
        let op = decode_escape(0xDC, 0xE9, false); // reg=4 rm=1 -> Sub slot per decode swap
        core.execute(op, 0.0);
        // physical dest is logical ST(1) == 10.0 before the op.
        assert_eq!(core.state.st_peek(1), 7.0); // 10 - 3, i.e. Sub semantics at this slot
    }

    #[test]
    fn finit_resets_whole_state() {
        let mut core = FpuCore::new();
        core.state.push(42.0);
        core.execute(FpuOp::Finit, 0.0);
        assert_eq!(core.state.control.bits(), 0x037F);
        assert_eq!(core.state.tag.0, 0xFFFF);
    }

    #[test]
    fn save_and_restore_round_trip_stack_values() {
        let mut core = FpuCore::new();
        core.state.push(1.5);
        core.state.push(-2.25);
        let image = core.save_image();

        let mut restored = FpuCore::new();
        restored.restore_from_image(&image);
        assert_eq!(restored.state.control.bits(), core.state.control.bits());
        assert_eq!(restored.state.tag.0, core.state.tag.0);
        assert_eq!(restored.state.st_peek(0), -2.25);
        assert_eq!(restored.state.st_peek(1), 1.5);
    }

    #[test]
    fn fxtract_splits_mantissa_and_exponent() {
        let mut core = FpuCore::new();
        core.state.push(8.0);
        core.execute(FpuOp::Fxtract, 0.0);
        // 8.0 == 1.0 * 2^3 (Intel FXTRACT: significand in [1, 2)).
        assert_eq!(core.state.st_peek(1), 3.0);
        assert!((core.state.st_peek(0) - 1.0).abs() < 1e-15);
    }
}
