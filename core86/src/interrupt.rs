//! Interrupt dispatcher: fault-in-flight escalation, host callback
//! preemption, real- and protected-mode gate entry.

use core86_hal::{InterruptController, MemoryBus, PortBus};
use core86_types::{DescriptorCache, Fault, Flags, SegmentReg, SegmentSelector};

use crate::cpu::Cpu;
use crate::segment;

/// Vectors that carry an extra zero error-code word on the stack when
/// delivered through a protected-mode gate.
const VECTORS_WITH_ERROR_CODE: [u8; 5] = [8, 10, 11, 12, 13];

/// Interrupt-gate type byte (as opposed to trap-gate `0x07`); only
/// interrupt gates clear IF on entry.
const GATE_TYPE_INTERRUPT: u8 = 0x06;

pub fn deliver<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, v: u8) {
    if cpu.state.fault_in_flight {
        if v == Fault::DoubleFault.vector() {
            log::warn!("triple fault, resetting");
            cpu.reset();
            return;
        }
        // Escalate: clear the latch before recursing so the nested call
        // actually delivers vector 8 through the normal gate-entry path,
        // rather than immediately re-hitting this same branch. A fault
        // arising *during that delivery* re-arms the latch on its own and
        // is what produces the triple fault above.
        cpu.state.fault_in_flight = false;
        deliver(cpu, Fault::DoubleFault.vector());
        return;
    }

    if Fault::vector_arms_fault_in_flight(v) {
        cpu.state.fault_in_flight = true;
    }

    if cpu.has_callback(v) {
        cpu.run_callback(v);
        cpu.state.fault_in_flight = false;
        return;
    }

    if cpu.state.msw.is_protected() {
        deliver_protected(cpu, v);
    } else {
        deliver_real(cpu, v);
    }
    cpu.state.fault_in_flight = false;
}

fn deliver_real<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, v: u8) {
    let flags_word = cpu.state.flags.to_word();
    cpu.push_word(flags_word);
    cpu.push_word(cpu.state.segments.cs.0);
    cpu.push_word(cpu.state.ip);

    cpu.state.flags.remove(Flags::TRAP | Flags::INTERRUPT);

    let vector_addr = u32::from(v) * 4;
    let new_ip = cpu.mem.read_word(vector_addr);
    let new_cs = cpu.mem.read_word(vector_addr + 2);

    cpu.state.ip = new_ip;
    cpu.state.segments.cs = SegmentSelector(new_cs);
    cpu.state.seg_caches.cs = DescriptorCache::real_mode(new_cs);
}

fn deliver_protected<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, v: u8) {
    let Some(gate_addr) = cpu.state.idtr.slot_address(u16::from(v)) else {
        log::warn!("idt limit overflow delivering vector {v}, escalating to double fault");
        deliver(cpu, Fault::DoubleFault.vector());
        return;
    };

    let mut bytes = [0u8; 8];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = cpu.mem.read_byte(gate_addr + i as u32);
    }
    let new_ip = u16::from_le_bytes([bytes[0], bytes[1]]);
    let new_cs = u16::from_le_bytes([bytes[2], bytes[3]]);
    let gate_access = core86_types::AccessByte(bytes[5]);

    if !gate_access.present() {
        log::warn!("gate not present for vector {v}");
        deliver(cpu, Fault::SegmentNotPresent.vector());
        return;
    }

    let target_selector = SegmentSelector(new_cs);
    let current_cpl = segment::cpl(&cpu.state);

    // Peek the target code segment's DPL without yet committing the
    // load, to decide whether an inner-privilege stack switch is
    // needed.
    let target_dpl = peek_descriptor_dpl(cpu, target_selector).unwrap_or(current_cpl);

    let old_ss = cpu.state.segments.ss.0;
    let old_sp = cpu.state.regs.word(core86_types::Reg16::Sp);

    if target_dpl < current_cpl {
        let sp0 = cpu.state.tr_cache.sp0;
        let ss0 = cpu.state.tr_cache.ss0;
        cpu.state.segments.ss = SegmentSelector(ss0);
        cpu.state.seg_caches.ss = DescriptorCache::real_mode(ss0);
        cpu.state.regs.set_word(core86_types::Reg16::Sp, sp0);
        cpu.push_word(old_ss);
        cpu.push_word(old_sp);
    }

    cpu.push_word(cpu.state.flags.to_word());
    cpu.push_word(cpu.state.segments.cs.0);
    cpu.push_word(cpu.state.ip);
    if VECTORS_WITH_ERROR_CODE.contains(&v) {
        cpu.push_word(0);
    }

    // CS is loaded before flags are updated -- a preserved ordering
    // quirk, not an oversight; see DESIGN.md.
    let _ = cpu.load_sreg(SegmentReg::Cs, target_selector);
    cpu.state.ip = new_ip;

    cpu.state.flags.remove(Flags::TRAP);
    if gate_access.system_type() == GATE_TYPE_INTERRUPT {
        cpu.state.flags.remove(Flags::INTERRUPT);
    }
}

fn peek_descriptor_dpl<M: MemoryBus, P: PortBus, I: InterruptController>(
    cpu: &mut Cpu<M, P, I>,
    selector: SegmentSelector,
) -> Option<u8> {
    let (base, limit) = if selector.table_indicator() {
        (cpu.state.ldtr_cache.base, cpu.state.ldtr_cache.limit)
    } else {
        (cpu.state.gdtr.base, cpu.state.gdtr.limit)
    };
    let offset = u32::from(selector.index()) * 8;
    if offset + 7 > u32::from(limit) {
        return None;
    }
    let access = cpu.mem.read_byte(base + offset + 5);
    Some(core86_types::AccessByte(access).dpl())
}
