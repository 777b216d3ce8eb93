//! Whole-machine black-box tests: a `Cpu` wired to real `core86-hal`
//! reference buses and a real `core86-devices::Pic`, driven purely
//! through its public surface (`step`/`interrupt`/`poll_external_interrupt`),
//! the way a host embedding this crate actually uses it. Unlike the
//! inline `#[cfg(test)]` modules, which exercise one opcode or one
//! decode path at a time, these programs chain several instructions and
//! cross-crate seams together in a single run.

use core86::Cpu;
use core86_devices::Pic;
use core86_fpu::StackOps;
use core86_hal::{A20Line, FlatMemory, InterruptController, MemoryBus, PortBus};
use core86_types::{Flags, Reg16, Reg8, SegmentSelector};

type TestCpu = Cpu<FlatMemory, Pic, Pic>;

fn new_cpu() -> TestCpu {
    Cpu::new(FlatMemory::new(0x10_0000), Pic::new(), Pic::new(), A20Line::new(true))
}

fn load_program(cpu: &mut TestCpu, bytes: &[u8]) {
    let cs_base = u32::from(cpu.state.segments.cs.0) << 4;
    cpu.mem.load(cs_base + u32::from(cpu.state.ip), bytes);
}

#[test]
fn arithmetic_stack_and_string_ops_thread_state_across_instructions() {
    let mut cpu = new_cpu();
    cpu.state.regs.set_word(Reg16::Sp, 0x0400);
    cpu.state.regs.set_word(Reg16::Ax, 0x7FFF);
    cpu.state.regs.set_word(Reg16::Bx, 0x0001);
    cpu.state.regs.set_word(Reg16::Cx, 4);
    cpu.state.regs.set_word(Reg16::Si, 0x0200);
    cpu.state.regs.set_word(Reg16::Di, 0x0300);

    let ds_base = u32::from(cpu.state.segments.ds.0) << 4;
    let es_base = u32::from(cpu.state.segments.es.0) << 4;
    cpu.mem.load(ds_base + 0x0200, &[0xAA, 0xBB, 0xCC, 0xDD]);

    load_program(
        &mut cpu,
        &[
            0x01, 0xD8, // ADD AX, BX      -> AX = 0x8000, OF/SF set
            0x50, // PUSH AX
            0xF3, 0xA4, // REP MOVSB       -> copies 4 bytes DS:SI -> ES:DI
            0x58, // POP AX
        ],
    );

    cpu.step(); // ADD
    assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x8000);
    assert!(cpu.state.flags.contains(Flags::OVERFLOW));

    cpu.step(); // PUSH AX
    assert_eq!(cpu.state.regs.word(Reg16::Sp), 0x03FE);

    for _ in 0..4 {
        cpu.step(); // REP MOVSB, one iteration per CX decrement
    }
    assert_eq!(cpu.state.regs.word(Reg16::Cx), 0);
    assert_eq!(cpu.state.regs.word(Reg16::Si), 0x0204);
    assert_eq!(cpu.state.regs.word(Reg16::Di), 0x0304);
    for (i, &b) in [0xAA, 0xBB, 0xCC, 0xDD].iter().enumerate() {
        assert_eq!(cpu.mem.read_byte(es_base + 0x0300 + i as u32), b);
    }

    cpu.step(); // POP AX
    assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x8000);
    assert_eq!(cpu.state.regs.word(Reg16::Sp), 0x0400);
}

#[test]
fn fpu_escape_opcodes_dispatch_through_the_decode_loop() {
    let mut cpu = new_cpu();
    load_program(
        &mut cpu,
        &[
            0xD9, 0xE8, // FLD1
            0xD9, 0xEA, // FLDL2E
            0xD8, 0xC1, // FADD ST, ST(1)
        ],
    );

    cpu.step(); // FLD1
    cpu.step(); // FLDL2E
    cpu.step(); // FADD

    let result = cpu.fpu.state.st_peek(0);
    assert!((result - (1.0 + std::f64::consts::LOG2_E)).abs() < 1e-12);
}

#[test]
fn external_irq_is_accepted_through_poll_external_interrupt() {
    let mut cpu = new_cpu();
    cpu.state.flags.insert(Flags::INTERRUPT);
    cpu.state.segments.cs = SegmentSelector(0x1000);
    cpu.state.ip = 0x0020;
    cpu.mem.write_word(0x08 * 4, 0x0050); // IRQ0's real-mode vector (0x08)
    cpu.mem.write_word(0x08 * 4 + 2, 0x2000);

    cpu.ports.out_byte(0x21, 0xFE); // unmask IRQ0 only
    cpu.intc.doirq(0);

    cpu.poll_external_interrupt();

    assert_eq!(cpu.state.ip, 0x0050);
    assert_eq!(cpu.state.segments.cs, SegmentSelector(0x2000));
    assert!(!cpu.state.flags.contains(Flags::INTERRUPT));
}

#[test]
fn halted_cpu_resumes_on_a_pending_unmasked_irq() {
    let mut cpu = new_cpu();
    cpu.state.halted = true;
    cpu.state.flags.insert(Flags::INTERRUPT);
    cpu.mem.write_word(0x08 * 4, 0x1234);
    cpu.mem.write_word(0x08 * 4 + 2, 0x5000);

    cpu.ports.out_byte(0x21, 0xFE);
    cpu.intc.doirq(0);
    cpu.poll_external_interrupt();

    assert!(!cpu.state.halted);
    assert_eq!(cpu.state.ip, 0x1234);
    assert_eq!(cpu.state.segments.cs, SegmentSelector(0x5000));
}

#[test]
fn a20_gate_disabled_aliases_fetch_into_the_first_megabyte() {
    // With the gate disabled, CS:IP = FFFF:0010 (linear 0x100000) must
    // fetch from physical 0x000000, not 0x100000 -- the classic A20
    // wraparound a BIOS-era bootstrap can rely on.
    let mut cpu = Cpu::new(FlatMemory::new(0x10_1000), Pic::new(), Pic::new(), A20Line::new(false));
    cpu.state.segments.cs = SegmentSelector(0xFFFF);
    cpu.state.ip = 0x0010;

    cpu.mem.load(0x0000, &[0xB8, 0x78, 0x56]); // MOV AX, 0x5678 at the alias target
    cpu.mem.load(0x10_0000, &[0xB8, 0x34, 0x12]); // MOV AX, 0x1234 at the unmasked linear address

    cpu.step();

    assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x5678);
}

#[test]
fn a20_gate_enabled_reaches_the_high_alias() {
    let mut cpu = Cpu::new(FlatMemory::new(0x10_1000), Pic::new(), Pic::new(), A20Line::new(true));
    cpu.state.segments.cs = SegmentSelector(0xFFFF);
    cpu.state.ip = 0x0010;

    cpu.mem.load(0x0000, &[0xB8, 0x78, 0x56]);
    cpu.mem.load(0x10_0000, &[0xB8, 0x34, 0x12]);

    cpu.step();

    assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x1234);
}

#[test]
fn loading_a_data_descriptor_then_reading_memory_through_it_round_trips() {
    // Builds a tiny GDT by hand, enters protected mode, loads DS from
    // it, and confirms a plain MOV reads through the resulting cache --
    // the whole segment.rs/ea.rs/dispatch.rs seam wired together rather
    // than any one function called directly.
    let mut cpu = new_cpu();
    cpu.state.gdtr = core86_types::DescriptorTableRegister::new(0x0000, 0xFFFF);

    // GDT[1] (selector 0x0008): present, DPL0 data segment based at
    // physical 0x50000.
    let desc = core86_types::RawDescriptor {
        limit: 0xFFFF,
        base: 0x0005_0000,
        access: core86_types::AccessByte(0x92),
    };
    cpu.mem.load(0x0008, &desc.to_bytes());

    cpu.state.msw.insert(core86_types::Msw::PROTECTED_MODE);
    cpu.state.regs.set_word(Reg16::Ax, 0x0008);
    load_program(
        &mut cpu,
        &[
            0x8E, 0xD8, // MOV DS, AX
            0xC6, 0x06, 0x10, 0x00, 0x42, // MOV BYTE PTR [0x0010], 0x42
        ],
    );

    cpu.step(); // MOV DS, AX
    assert!(cpu.state.seg_caches.ds.valid);
    assert_eq!(cpu.state.seg_caches.ds.base, 0x0005_0000);

    cpu.step(); // MOV [0x0010], 0x42
    assert_eq!(cpu.mem.read_byte(0x0005_0010), 0x42);
}

#[test]
fn byte_register_aliasing_survives_a_word_write() {
    let mut cpu = new_cpu();
    load_program(
        &mut cpu,
        &[
            0xB8, 0x34, 0x12, // MOV AX, 0x1234
            0x80, 0xC4, 0x01, // ADD AH, 1
        ],
    );
    cpu.step();
    cpu.step();
    assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x1334);
    assert_eq!(cpu.state.regs.byte(Reg8::Al), 0x34);
}
