//! Effective-address decode and segment translation.

use core86_hal::A20Line;
use core86_types::{CpuState, Fault, Reg16, SegmentReg};

use crate::decode::ModRm;

/// The classic 8086 mod/rm effective-address table (mod != 11).
///
/// `mod=00, rm=110` is the direct-displacement special case; BP-based
/// forms (`rm` in {2, 3, 6} with mod != 0b00, or rm=6 pulled out above)
/// default to the stack segment unless a segment override is active.
#[must_use]
pub fn effective_offset(regs: &core86_types::GpRegs, modrm: ModRm) -> (u16, SegmentReg) {
    use Reg16::{Bp, Bx, Di, Si};

    if modrm.md == 0b00 && modrm.rm == 0b110 {
        return (modrm.disp as u16, SegmentReg::Ds);
    }

    let (base, default_seg) = match modrm.rm {
        0b000 => (regs.word(Bx).wrapping_add(regs.word(Si)), SegmentReg::Ds),
        0b001 => (regs.word(Bx).wrapping_add(regs.word(Di)), SegmentReg::Ds),
        0b010 => (regs.word(Bp).wrapping_add(regs.word(Si)), SegmentReg::Ss),
        0b011 => (regs.word(Bp).wrapping_add(regs.word(Di)), SegmentReg::Ss),
        0b100 => (regs.word(Si), SegmentReg::Ds),
        0b101 => (regs.word(Di), SegmentReg::Ds),
        0b110 => (regs.word(Bp), SegmentReg::Ss),
        0b111 => (regs.word(Bx), SegmentReg::Ds),
        _ => unreachable!("rm is a 3-bit field"),
    };

    (base.wrapping_add(modrm.disp as u16), default_seg)
}

/// Turns `(selector, offset)` into a 24-bit physical address.
///
/// Real mode cannot fault here; protected mode walks the already-loaded
/// descriptor cache for `seg` -- not the GDT/LDT again -- and falls
/// back to physical 0 when no cache entry is valid (a preserved defect,
/// not a hardening gap -- see DESIGN.md).
#[must_use]
pub fn translate(state: &CpuState, a20: &A20Line, seg: SegmentReg, offset: u16) -> u32 {
    if state.msw.is_protected() {
        let cache = state.seg_caches.get(seg);
        if cache.valid {
            cache.base.wrapping_add(u32::from(offset))
        } else {
            0
        }
    } else {
        let selector = match seg {
            SegmentReg::Es => state.segments.es,
            SegmentReg::Cs => state.segments.cs,
            SegmentReg::Ss => state.segments.ss,
            SegmentReg::Ds => state.segments.ds,
        };
        let physical = (u32::from(selector.0) << 4).wrapping_add(u32::from(offset));
        a20.apply(physical)
    }
}

/// Protected-mode bounds check against the segment limit; real mode
/// never calls this (it has no descriptor cache to compare against).
#[must_use]
pub fn check_limit(state: &CpuState, seg: SegmentReg, offset: u16) -> Result<(), Fault> {
    if !state.msw.is_protected() {
        return Ok(());
    }
    let cache = state.seg_caches.get(seg);
    if cache.valid && !cache.contains_offset(offset) {
        return Err(Fault::GeneralProtection);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core86_types::GpRegs;
    use proptest::prelude::*;

    #[test]
    fn mod_00_rm_110_is_direct_displacement_defaulting_to_ds() {
        let regs = GpRegs::new();
        let modrm = ModRm { md: 0b00, reg: 0, rm: 0b110, disp: 0x1234 };
        let (offset, seg) = effective_offset(&regs, modrm);
        assert_eq!(offset, 0x1234);
        assert_eq!(seg, SegmentReg::Ds);
    }

    #[test]
    fn bp_based_forms_default_to_stack_segment() {
        let mut regs = GpRegs::new();
        regs.set_word(Reg16::Bp, 0x0010);
        let modrm = ModRm { md: 0b01, reg: 0, rm: 0b110, disp: 4 };
        let (offset, seg) = effective_offset(&regs, modrm);
        assert_eq!(offset, 0x0014);
        assert_eq!(seg, SegmentReg::Ss);
    }

    #[test]
    fn real_mode_translation_shifts_selector() {
        let mut state = CpuState::reset();
        state.segments.ds = core86_types::SegmentSelector(0x1000);
        let a20 = A20Line::new(true);
        assert_eq!(translate(&state, &a20, SegmentReg::Ds, 0x0020), 0x10020);
    }

    #[test]
    fn protected_mode_with_no_cache_falls_back_to_zero() {
        let mut state = CpuState::reset();
        state.msw |= core86_types::Msw::PROTECTED_MODE;
        let a20 = A20Line::new(true);
        assert_eq!(translate(&state, &a20, SegmentReg::Ds, 0x0020), 0);
    }

    #[test]
    fn protected_mode_uses_descriptor_cache_base() {
        let mut state = CpuState::reset();
        state.msw |= core86_types::Msw::PROTECTED_MODE;
        state.seg_caches.ds = core86_types::DescriptorCache {
            base: 0x2000,
            limit: 0xFFFF,
            access: core86_types::AccessByte(0x92),
            valid: true,
        };
        let a20 = A20Line::new(true);
        assert_eq!(translate(&state, &a20, SegmentReg::Ds, 0x0020), 0x2020);
    }

    proptest! {
        // Once a descriptor cache is loaded, translation is a pure
        // base+offset add against whatever that cache says, and the
        // limit check agrees with `contains_offset` exactly -- neither
        // one walks the GDT/LDT again.
        #[test]
        fn descriptor_cache_translation_matches_base_plus_offset(
            base in 0u32..0x0010_0000,
            limit in any::<u16>(),
            offset in any::<u16>(),
        ) {
            let mut state = CpuState::reset();
            state.msw |= core86_types::Msw::PROTECTED_MODE;
            state.seg_caches.ds = core86_types::DescriptorCache {
                base,
                limit,
                access: core86_types::AccessByte(0x92),
                valid: true,
            };
            let a20 = A20Line::new(true);

            let translated = translate(&state, &a20, SegmentReg::Ds, offset);
            prop_assert_eq!(translated, base.wrapping_add(u32::from(offset)));

            let within_limit = offset <= limit;
            prop_assert_eq!(check_limit(&state, SegmentReg::Ds, offset).is_ok(), within_limit);
        }
    }
}
