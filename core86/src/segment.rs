//! Segment-register and system-register (LDTR/TR) descriptor loading.

use core86_hal::MemoryBus;
use core86_types::{
    AccessByte, CpuState, DescriptorCache, Fault, RawDescriptor, SegmentReg, SegmentSelector,
    TaskCache, SYSTEM_TYPE_LDT, SYSTEM_TYPE_TSS_AVAILABLE, SYSTEM_TYPE_TSS_BUSY,
};

/// Reads the raw 8-byte descriptor at `selector`'s index in whichever
/// table (GDT or LDT) its table-indicator bit selects, bounds-checking
/// `index*8+7 <= limit` first.
fn read_descriptor(
    state: &CpuState,
    mem: &mut impl MemoryBus,
    selector: SegmentSelector,
) -> Option<RawDescriptor> {
    let (base, limit) = if selector.table_indicator() {
        (state.ldtr_cache.base, state.ldtr_cache.limit)
    } else {
        (state.gdtr.base, state.gdtr.limit)
    };
    let offset = u32::from(selector.index()) * 8;
    if offset + 7 > u32::from(limit) {
        return None;
    }
    let addr = base + offset;
    let mut bytes = [0u8; 8];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = mem.read_byte(addr + i as u32);
    }
    Some(RawDescriptor::from_bytes(bytes))
}

/// Current privilege level: the RPL of the selector currently loaded in
/// CS.
#[must_use]
pub fn cpl(state: &CpuState) -> u8 {
    state.segments.cs.rpl()
}

/// Loads `selector` into segment register `reg`, applying the full
/// null/type/privilege checks. Real mode is handled by the caller via
/// `DescriptorCache::real_mode` directly; this function is only called
/// in protected mode.
pub fn load_segment(
    state: &mut CpuState,
    mem: &mut impl MemoryBus,
    reg: SegmentReg,
    selector: SegmentSelector,
) -> Result<(), Fault> {
    if selector.is_null() {
        if matches!(reg, SegmentReg::Ss) {
            return Err(Fault::GeneralProtection);
        }
        state.seg_caches.set(reg, DescriptorCache::invalid());
        set_selector(state, reg, selector);
        return Ok(());
    }

    let descriptor = read_descriptor(state, mem, selector).ok_or(Fault::GeneralProtection)?;
    if !descriptor.access.present() {
        return Err(Fault::SegmentNotPresent);
    }

    let current_cpl = cpl(state);
    let rpl = selector.rpl();

    match reg {
        SegmentReg::Ss => {
            if !descriptor.access.is_data() || !descriptor.access.rw() {
                return Err(Fault::GeneralProtection);
            }
            if rpl != current_cpl || descriptor.access.dpl() != current_cpl {
                return Err(Fault::GeneralProtection);
            }
        }
        SegmentReg::Cs => {
            if !descriptor.access.is_code() {
                return Err(Fault::GeneralProtection);
            }
            if descriptor.access.dpl() > current_cpl {
                return Err(Fault::GeneralProtection);
            }
        }
        SegmentReg::Ds | SegmentReg::Es => {
            let readable_code = descriptor.access.is_code() && descriptor.access.rw();
            if !(descriptor.access.is_data() || readable_code) {
                return Err(Fault::GeneralProtection);
            }
            let dpl = descriptor.access.dpl();
            if current_cpl > dpl || rpl > dpl {
                return Err(Fault::GeneralProtection);
            }
        }
    }

    state.seg_caches.set(reg, DescriptorCache::from_descriptor(descriptor));
    set_selector(state, reg, selector);
    Ok(())
}

fn set_selector(state: &mut CpuState, reg: SegmentReg, selector: SegmentSelector) {
    match reg {
        SegmentReg::Es => state.segments.es = selector,
        SegmentReg::Cs => state.segments.cs = selector,
        SegmentReg::Ss => state.segments.ss = selector,
        SegmentReg::Ds => state.segments.ds = selector,
    }
}

/// LLDT: loads the LDT register from a GDT-resident LDT descriptor
/// (type `0x02`).
pub fn load_ldtr(
    state: &mut CpuState,
    mem: &mut impl MemoryBus,
    selector: SegmentSelector,
) -> Result<(), Fault> {
    if selector.is_null() {
        state.ldtr_selector = selector;
        state.ldtr_cache = DescriptorCache::invalid();
        return Ok(());
    }
    let descriptor = read_descriptor(state, mem, selector).ok_or(Fault::GeneralProtection)?;
    if descriptor.access.system_type() != SYSTEM_TYPE_LDT {
        return Err(Fault::GeneralProtection);
    }
    if !descriptor.access.present() {
        return Err(Fault::SegmentNotPresent);
    }
    state.ldtr_selector = selector;
    state.ldtr_cache = DescriptorCache::from_descriptor(descriptor);
    Ok(())
}

/// LTR: loads the task register from a GDT-resident TSS descriptor
/// (type `0x01` available or `0x03` busy), snapshotting `sp0`/`ss0` out
/// of the TSS image and marking the GDT slot busy.
pub fn load_tr(
    state: &mut CpuState,
    mem: &mut impl MemoryBus,
    selector: SegmentSelector,
) -> Result<(), Fault> {
    let descriptor = read_descriptor(state, mem, selector).ok_or(Fault::GeneralProtection)?;
    let ty = descriptor.access.system_type();
    if ty != SYSTEM_TYPE_TSS_AVAILABLE && ty != SYSTEM_TYPE_TSS_BUSY {
        return Err(Fault::GeneralProtection);
    }
    if !descriptor.access.present() {
        return Err(Fault::SegmentNotPresent);
    }

    // TSS layout (80286): byte 0-1 back-link, 2-3 SP0, 4-5 SS0, ...
    let sp0 = read_u16(mem, descriptor.base + 2);
    let ss0 = read_u16(mem, descriptor.base + 4);

    state.tr_selector = selector;
    state.tr_cache = TaskCache {
        cache: DescriptorCache::from_descriptor(descriptor),
        sp0,
        ss0,
    };

    if let Some(offset) = state.gdtr.slot_address(selector.index()) {
        let access_addr = offset + 5;
        let busied = AccessByte(descriptor.access.0).with_busy();
        mem.write_byte(access_addr, busied.0);
    }
    Ok(())
}

fn read_u16(mem: &mut impl MemoryBus, addr: u32) -> u16 {
    let lo = mem.read_byte(addr);
    let hi = mem.read_byte(addr + 1);
    u16::from_le_bytes([lo, hi])
}

#[cfg(test)]
mod tests {
    use super::*;
    use core86_hal::FlatMemory;

    fn write_descriptor(mem: &mut FlatMemory, addr: u32, desc: RawDescriptor) {
        mem.load(addr, &desc.to_bytes());
    }

    #[test]
    fn null_selector_into_ss_faults() {
        let mut state = CpuState::reset();
        state.msw |= core86_types::Msw::PROTECTED_MODE;
        let mut mem = FlatMemory::new(0x10000);
        let err = load_segment(&mut state, &mut mem, SegmentReg::Ss, SegmentSelector(0)).unwrap_err();
        assert_eq!(err, Fault::GeneralProtection);
    }

    #[test]
    fn null_selector_into_ds_invalidates_cache_and_succeeds() {
        let mut state = CpuState::reset();
        state.msw |= core86_types::Msw::PROTECTED_MODE;
        let mut mem = FlatMemory::new(0x10000);
        load_segment(&mut state, &mut mem, SegmentReg::Ds, SegmentSelector(0)).unwrap();
        assert!(!state.seg_caches.ds.valid);
    }

    #[test]
    fn not_present_descriptor_faults_11() {
        let mut state = CpuState::reset();
        state.msw |= core86_types::Msw::PROTECTED_MODE;
        state.gdtr = core86_types::DescriptorTableRegister::new(0x1000, 0xFFFF);
        let mut mem = FlatMemory::new(0x20000);
        write_descriptor(
            &mut mem,
            0x1000 + 8,
            RawDescriptor { limit: 0xFFFF, base: 0x2000, access: AccessByte(0x12) },
        );
        let err = load_segment(&mut state, &mut mem, SegmentReg::Ds, SegmentSelector(0x0008)).unwrap_err();
        assert_eq!(err, Fault::SegmentNotPresent);
    }

    #[test]
    fn well_formed_data_descriptor_populates_cache() {
        let mut state = CpuState::reset();
        state.msw |= core86_types::Msw::PROTECTED_MODE;
        state.gdtr = core86_types::DescriptorTableRegister::new(0x1000, 0xFFFF);
        let mut mem = FlatMemory::new(0x20000);
        write_descriptor(
            &mut mem,
            0x1000 + 8,
            RawDescriptor { limit: 0x0FFF, base: 0x3000, access: AccessByte(0x92) },
        );
        load_segment(&mut state, &mut mem, SegmentReg::Ds, SegmentSelector(0x0008)).unwrap();
        assert!(state.seg_caches.ds.valid);
        assert_eq!(state.seg_caches.ds.base, 0x3000);
        assert_eq!(state.segments.ds, SegmentSelector(0x0008));
    }
}
