//! The aggregate CPU state, minus the FPU (owned by `core86-fpu`) and
//! the host callback table (owned by `core86`, since it holds behavior
//! rather than data).

use crate::flags::{Flags, TrapToggle};
use crate::regs::GpRegs;
use crate::segment::{DescriptorCache, SegmentSelector, TaskCache};
use crate::system::{DescriptorTableRegister, Msw};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segments {
    pub cs: SegmentSelector,
    pub ds: SegmentSelector,
    pub es: SegmentSelector,
    pub ss: SegmentSelector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentCaches {
    pub es: DescriptorCache,
    pub cs: DescriptorCache,
    pub ss: DescriptorCache,
    pub ds: DescriptorCache,
}

impl SegmentCaches {
    #[must_use]
    #[inline]
    pub const fn get(&self, reg: crate::segment::SegmentReg) -> DescriptorCache {
        match reg {
            crate::segment::SegmentReg::Es => self.es,
            crate::segment::SegmentReg::Cs => self.cs,
            crate::segment::SegmentReg::Ss => self.ss,
            crate::segment::SegmentReg::Ds => self.ds,
        }
    }

    #[inline]
    pub fn set(&mut self, reg: crate::segment::SegmentReg, cache: DescriptorCache) {
        match reg {
            crate::segment::SegmentReg::Es => self.es = cache,
            crate::segment::SegmentReg::Cs => self.cs = cache,
            crate::segment::SegmentReg::Ss => self.ss = cache,
            crate::segment::SegmentReg::Ds => self.ds = cache,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuState {
    pub regs: GpRegs,
    pub segments: Segments,
    pub seg_caches: SegmentCaches,

    pub ip: u16,
    /// IP captured at the start of the current instruction; used by fault
    /// reporting and by string-instruction REP rewinding.
    pub saved_ip: u16,

    pub flags: Flags,
    pub trap_toggle: TrapToggle,

    pub msw: Msw,
    pub gdtr: DescriptorTableRegister,
    pub idtr: DescriptorTableRegister,

    pub ldtr_selector: SegmentSelector,
    pub ldtr_cache: DescriptorCache,

    pub tr_selector: SegmentSelector,
    pub tr_cache: TaskCache,

    /// Escalates nested faults to double/triple fault: true from the
    /// moment a fault gate is being entered until control actually
    /// transfers to the handler.
    pub fault_in_flight: bool,
    /// Set by HLT, cleared by any accepted external interrupt.
    pub halted: bool,
}

impl CpuState {
    /// Initializes state per the power-on/reset routine.
    #[must_use]
    pub fn reset() -> Self {
        let mut state = Self {
            msw: Msw::from_bits_truncate(0xFFF0),
            idtr: DescriptorTableRegister::new(0, 0x03FF),
            gdtr: DescriptorTableRegister::new(0, 0xFFFF),
            ..Self::default()
        };
        state.segments.cs = SegmentSelector(0xF000);
        state.seg_caches.cs = DescriptorCache::real_mode(0xF000);
        state.ip = 0xFFF0;
        state
    }
}
