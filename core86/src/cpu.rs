//! The machine: a CPU state, an FPU core, and handles to its three
//! collaborator buses. The single owner that holds all devices is the
//! host embedding `Cpu`, which is generic over the bus implementations
//! rather than holding back-pointers to them.

use core86_fpu::FpuCore;
use core86_hal::{A20Line, InterruptController, MemoryBus, PortBus};
use core86_types::{CpuState, Fault, Reg16, Reg8, SegmentReg, SegmentSelector};

use crate::decode::{decode_modrm, decode_prefixes_and_opcode, ModRm, Repetition};
use crate::ea;

pub const CALLBACK_TABLE_LEN: usize = 256;

/// A host hook that preempts normal gate entry for one interrupt
/// vector: a 256-entry table of optional host callbacks keyed by
/// interrupt number.
pub type HostCallback<M, P, I> = Box<dyn FnMut(&mut Cpu<M, P, I>)>;

pub struct Cpu<M: MemoryBus, P: PortBus, I: InterruptController> {
    pub state: CpuState,
    pub fpu: FpuCore,
    pub mem: M,
    pub ports: P,
    pub intc: I,
    pub a20: A20Line,
    callbacks: Vec<Option<HostCallback<M, P, I>>>,

    // Decode context for the instruction currently being executed.
    pub(crate) segment_override: Option<SegmentReg>,
    pub(crate) repetition: Repetition,
}

impl<M: MemoryBus, P: PortBus, I: InterruptController> Cpu<M, P, I> {
    pub fn new(mem: M, ports: P, intc: I, a20: A20Line) -> Self {
        let mut callbacks = Vec::with_capacity(CALLBACK_TABLE_LEN);
        callbacks.resize_with(CALLBACK_TABLE_LEN, || None);
        Self {
            state: CpuState::reset(),
            fpu: FpuCore::new(),
            mem,
            ports,
            intc,
            a20,
            callbacks,
            segment_override: None,
            repetition: Repetition::None,
        }
    }

    /// Installs (or removes, with `None`) a host callback for vector
    /// `v`, preempting normal gate entry for that vector.
    pub fn set_callback(&mut self, v: u8, callback: Option<HostCallback<M, P, I>>) {
        self.callbacks[v as usize] = callback;
    }

    pub(crate) fn has_callback(&self, v: u8) -> bool {
        self.callbacks[v as usize].is_some()
    }

    pub(crate) fn run_callback(&mut self, v: u8) {
        if let Some(mut callback) = self.callbacks[v as usize].take() {
            callback(self);
            self.callbacks[v as usize] = Some(callback);
        }
    }

    /// Full reset: power-on, triple fault, or a keyboard-controller
    /// `0xFE` command.
    pub fn reset(&mut self) {
        self.state = CpuState::reset();
        self.fpu.reset();
        log::debug!("cpu reset");
    }

    /// Resolves a segment register to the override active for the
    /// current instruction, or its natural default.
    pub(crate) fn seg(&self, default: SegmentReg) -> SegmentReg {
        self.segment_override.unwrap_or(default)
    }

    pub fn translate(&self, seg: SegmentReg, offset: u16) -> u32 {
        ea::translate(&self.state, &self.a20, seg, offset)
    }

    pub fn read_mem_byte(&mut self, seg: SegmentReg, offset: u16) -> u8 {
        if let Err(fault) = ea::check_limit(&self.state, seg, offset) {
            self.interrupt(fault.vector());
            return 0;
        }
        let addr = self.translate(seg, offset);
        self.mem.read_byte(addr)
    }

    pub fn write_mem_byte(&mut self, seg: SegmentReg, offset: u16, value: u8) {
        if let Err(fault) = ea::check_limit(&self.state, seg, offset) {
            self.interrupt(fault.vector());
            return;
        }
        let addr = self.translate(seg, offset);
        self.mem.write_byte(addr, value);
    }

    pub fn read_mem_word(&mut self, seg: SegmentReg, offset: u16) -> u16 {
        let lo = self.read_mem_byte(seg, offset);
        let hi = self.read_mem_byte(seg, offset.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub fn write_mem_word(&mut self, seg: SegmentReg, offset: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_mem_byte(seg, offset, lo);
        self.write_mem_byte(seg, offset.wrapping_add(1), hi);
    }

    /// Fetches the next byte from `CS:IP`, advancing IP.
    pub fn fetch_byte(&mut self) -> u8 {
        let ip = self.state.ip;
        let byte = self.read_mem_byte(SegmentReg::Cs, ip);
        self.state.ip = ip.wrapping_add(1);
        byte
    }

    pub fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte();
        let hi = self.fetch_byte();
        u16::from_le_bytes([lo, hi])
    }

    pub fn push_word(&mut self, value: u16) {
        let sp = self.state.regs.word(Reg16::Sp).wrapping_sub(2);
        self.state.regs.set_word(Reg16::Sp, sp);
        self.write_mem_word(SegmentReg::Ss, sp, value);
    }

    pub fn pop_word(&mut self) -> u16 {
        let sp = self.state.regs.word(Reg16::Sp);
        let value = self.read_mem_word(SegmentReg::Ss, sp);
        self.state.regs.set_word(Reg16::Sp, sp.wrapping_add(2));
        value
    }

    /// Decodes a ModR/M byte (and its displacement, if any) for the
    /// current instruction.
    pub fn fetch_modrm(&mut self) -> ModRm {
        let byte = self.fetch_byte();
        decode_modrm(byte, || self.fetch_byte())
    }

    /// The effective memory operand named by a decoded non-register
    /// ModR/M, resolved against the current segment override.
    pub fn modrm_mem_offset(&self, modrm: ModRm) -> (u16, SegmentReg) {
        let (offset, default_seg) = ea::effective_offset(&self.state.regs, modrm);
        (offset, self.seg(default_seg))
    }

    pub fn read_rm8(&mut self, modrm: ModRm) -> u8 {
        if modrm.is_register() {
            self.state.regs.byte(reg8_from_index(modrm.rm))
        } else {
            let (offset, seg) = self.modrm_mem_offset(modrm);
            self.read_mem_byte(seg, offset)
        }
    }

    pub fn write_rm8(&mut self, modrm: ModRm, value: u8) {
        if modrm.is_register() {
            self.state.regs.set_byte(reg8_from_index(modrm.rm), value);
        } else {
            let (offset, seg) = self.modrm_mem_offset(modrm);
            self.write_mem_byte(seg, offset, value);
        }
    }

    pub fn read_rm16(&mut self, modrm: ModRm) -> u16 {
        if modrm.is_register() {
            self.state.regs.word(reg16_from_index(modrm.rm))
        } else {
            let (offset, seg) = self.modrm_mem_offset(modrm);
            self.read_mem_word(seg, offset)
        }
    }

    pub fn write_rm16(&mut self, modrm: ModRm, value: u16) {
        if modrm.is_register() {
            self.state.regs.set_word(reg16_from_index(modrm.rm), value);
        } else {
            let (offset, seg) = self.modrm_mem_offset(modrm);
            self.write_mem_word(seg, offset, value);
        }
    }

    pub fn read_sreg(&self, index: u8) -> SegmentSelector {
        match index & 0b11 {
            0 => self.state.segments.es,
            1 => self.state.segments.cs,
            2 => self.state.segments.ss,
            _ => self.state.segments.ds,
        }
    }

    /// Loads a segment register, dispatching to the real- or
    /// protected-mode rules.
    pub fn load_sreg(&mut self, reg: SegmentReg, selector: SegmentSelector) -> Result<(), Fault> {
        if self.state.msw.is_protected() {
            crate::segment::load_segment(&mut self.state, &mut self.mem, reg, selector)?;
        } else {
            self.state.seg_caches.set(reg, core86_types::DescriptorCache::real_mode(selector.0));
            match reg {
                SegmentReg::Es => self.state.segments.es = selector,
                SegmentReg::Cs => self.state.segments.cs = selector,
                SegmentReg::Ss => self.state.segments.ss = selector,
                SegmentReg::Ds => self.state.segments.ds = selector,
            }
        }
        Ok(())
    }

    /// Runs one full decode/dispatch/interrupt cycle.
    pub fn step(&mut self) {
        if self.state.trap_toggle.is_armed() {
            self.interrupt(Fault::SingleStep.vector());
        }
        self.state.trap_toggle.latch(self.state.flags.contains(core86_types::Flags::TRAP));

        if self.state.halted {
            return;
        }

        self.segment_override = None;
        self.repetition = Repetition::None;
        self.state.saved_ip = self.state.ip;

        let start_ip = self.state.ip;
        let decoded = match decode_prefixes_and_opcode(start_ip, || self.fetch_byte()) {
            Ok(decoded) => decoded,
            Err(_) => {
                self.interrupt(Fault::GeneralProtection.vector());
                return;
            }
        };
        self.segment_override = decoded.segment_override;
        self.repetition = decoded.repetition;

        crate::dispatch::execute(self, decoded.opcode);
    }

    /// Delivers interrupt/fault vector `v`.
    pub fn interrupt(&mut self, v: u8) {
        crate::interrupt::deliver(self, v);
    }

    /// Checks for a pending unmasked external IRQ and, if one is ready
    /// to be accepted, clears the halt latch and delivers it.
    pub fn poll_external_interrupt(&mut self) {
        if self.state.trap_toggle.is_armed() {
            return;
        }
        if !self.state.flags.contains(core86_types::Flags::INTERRUPT) {
            return;
        }
        if let Some(vector) = self.intc.next_intr() {
            self.state.halted = false;
            self.interrupt(vector);
        }
    }
}

#[must_use]
pub const fn reg8_from_index(index: u8) -> Reg8 {
    match index & 0b111 {
        0 => Reg8::Al,
        1 => Reg8::Cl,
        2 => Reg8::Dl,
        3 => Reg8::Bl,
        4 => Reg8::Ah,
        5 => Reg8::Ch,
        6 => Reg8::Dh,
        _ => Reg8::Bh,
    }
}

#[must_use]
pub const fn reg16_from_index(index: u8) -> Reg16 {
    match index & 0b111 {
        0 => Reg16::Ax,
        1 => Reg16::Cx,
        2 => Reg16::Dx,
        3 => Reg16::Bx,
        4 => Reg16::Sp,
        5 => Reg16::Bp,
        6 => Reg16::Si,
        _ => Reg16::Di,
    }
}

#[must_use]
pub const fn segreg_from_index(index: u8) -> SegmentReg {
    match index & 0b11 {
        0 => SegmentReg::Es,
        1 => SegmentReg::Cs,
        2 => SegmentReg::Ss,
        _ => SegmentReg::Ds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core86_devices::Pic;
    use core86_hal::FlatMemory;
    use proptest::prelude::*;

    fn new_cpu() -> Cpu<FlatMemory, Pic, Pic> {
        Cpu::new(FlatMemory::new(0x10_0000), Pic::new(), Pic::new(), A20Line::new(true))
    }

    #[test]
    fn push_word_decrements_sp_by_two_and_stores_little_endian() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_word(Reg16::Sp, 0x0100);
        cpu.push_word(0xBEEF);
        assert_eq!(cpu.state.regs.word(Reg16::Sp), 0x00FE);
        assert_eq!(cpu.pop_word(), 0xBEEF);
        assert_eq!(cpu.state.regs.word(Reg16::Sp), 0x0100);
    }

    proptest! {
        // A stack of pushes followed by the same number of pops must
        // hand values back in LIFO order and leave SP exactly where it
        // started -- the invariant any interrupt-gate entry/IRET pair or
        // CALL/RET pair relies on.
        #[test]
        fn push_pop_round_trips_any_sequence(values in prop::collection::vec(any::<u16>(), 0..32)) {
            let mut cpu = new_cpu();
            let start_sp = 0x8000u16;
            cpu.state.regs.set_word(Reg16::Sp, start_sp);

            for &v in &values {
                cpu.push_word(v);
            }
            let mut popped = Vec::with_capacity(values.len());
            for _ in &values {
                popped.push(cpu.pop_word());
            }
            popped.reverse();

            prop_assert_eq!(popped, values);
            prop_assert_eq!(cpu.state.regs.word(Reg16::Sp), start_sp);
        }
    }

    #[test]
    fn protected_mode_write_past_segment_limit_faults_instead_of_writing() {
        // Descriptor-cache-coherence (spec.md:161): an out-of-limit
        // offset must raise GP(13) through the normal gate path, not
        // silently land at base+offset.
        let mut cpu = new_cpu();
        cpu.state.msw.insert(core86_types::Msw::PROTECTED_MODE);
        cpu.state.gdtr = core86_types::DescriptorTableRegister::new(0x0000, 0xFFFF);
        cpu.state.idtr = core86_types::DescriptorTableRegister::new(0x1000, 0x00FF);
        cpu.state.segments.cs = SegmentSelector(0x0008);

        // GDT selector 0x0008: present, DPL-0 code segment.
        cpu.mem.write_word(0x0008, 0xFFFF);
        cpu.mem.write_word(0x0008 + 2, 0x0000);
        cpu.mem.write_byte(0x0008 + 4, 0x00);
        cpu.mem.write_byte(0x0008 + 5, 0x9A);

        // IDT[13]: present interrupt gate back into that code segment.
        let idt13 = 0x1000 + 13 * 8;
        cpu.mem.write_word(idt13, 0x0300);
        cpu.mem.write_word(idt13 + 2, 0x0008);
        cpu.mem.write_byte(idt13 + 5, 0x8E);

        cpu.state.seg_caches.ss = core86_types::DescriptorCache {
            base: 0x2000,
            limit: 0xFFFF,
            access: core86_types::AccessByte(0x92),
            valid: true,
        };
        cpu.state.regs.set_word(Reg16::Sp, 0x1000);

        cpu.state.seg_caches.ds = core86_types::DescriptorCache {
            base: 0x3000,
            limit: 0x0005,
            access: core86_types::AccessByte(0x92),
            valid: true,
        };

        cpu.write_mem_byte(SegmentReg::Ds, 0x0010, 0x42);

        assert_eq!(cpu.mem.read_byte(0x3000 + 0x0010), 0);
        assert_eq!(cpu.state.ip, 0x0300);
        assert_eq!(cpu.state.segments.cs, SegmentSelector(0x0008));
        assert!(!cpu.state.fault_in_flight);
    }
}
