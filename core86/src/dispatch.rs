//! The primary one-byte opcode table: the full 8086/80186 integer
//! instruction set dispatched from the single
//! `Decoded` opcode byte the fetch loop already produced. Each opcode arm
//! decodes whatever ModR/M, displacement and immediate bytes it needs
//! itself, since that shape depends on the opcode -- the *prefix and
//! opcode byte* are what `cpu.step` decodes once up front.

use core86_hal::{InterruptController, MemoryBus, PortBus};
use core86_types::{Fault, Flags, Reg16, SegmentReg, SegmentSelector};

use crate::alu::AluOp;
use crate::cpu::{reg16_from_index, reg8_from_index, segreg_from_index, Cpu};
use crate::decode::{ModRm, Repetition};
use crate::flags::{self, ShiftKind, Width};

pub fn execute<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, opcode: u8) {
    use Reg16::{Ax, Bp, Bx, Cx, Dx, Sp};

    match opcode {
        // ---- ALU group 0x00-0x3D: ADD/OR/ADC/SBB/AND/SUB/XOR/CMP ----
        0x00 => alu(cpu, AluOp::Add, Form::EbGb),
        0x01 => alu(cpu, AluOp::Add, Form::EvGv),
        0x02 => alu(cpu, AluOp::Add, Form::GbEb),
        0x03 => alu(cpu, AluOp::Add, Form::GvEv),
        0x04 => alu(cpu, AluOp::Add, Form::AlIb),
        0x05 => alu(cpu, AluOp::Add, Form::AxIv),
        0x06 => push_sreg(cpu, SegmentReg::Es),
        0x07 => pop_sreg(cpu, SegmentReg::Es),

        0x08 => alu(cpu, AluOp::Or, Form::EbGb),
        0x09 => alu(cpu, AluOp::Or, Form::EvGv),
        0x0A => alu(cpu, AluOp::Or, Form::GbEb),
        0x0B => alu(cpu, AluOp::Or, Form::GvEv),
        0x0C => alu(cpu, AluOp::Or, Form::AlIb),
        0x0D => alu(cpu, AluOp::Or, Form::AxIv),
        0x0E => push_sreg(cpu, SegmentReg::Cs),
        0x0F => crate::dispatch_0f::execute(cpu),

        0x10 => alu(cpu, AluOp::Adc, Form::EbGb),
        0x11 => alu(cpu, AluOp::Adc, Form::EvGv),
        0x12 => alu(cpu, AluOp::Adc, Form::GbEb),
        0x13 => alu(cpu, AluOp::Adc, Form::GvEv),
        0x14 => alu(cpu, AluOp::Adc, Form::AlIb),
        0x15 => alu(cpu, AluOp::Adc, Form::AxIv),
        0x16 => push_sreg(cpu, SegmentReg::Ss),
        0x17 => pop_sreg(cpu, SegmentReg::Ss),

        0x18 => alu(cpu, AluOp::Sbb, Form::EbGb),
        0x19 => alu(cpu, AluOp::Sbb, Form::EvGv),
        0x1A => alu(cpu, AluOp::Sbb, Form::GbEb),
        0x1B => alu(cpu, AluOp::Sbb, Form::GvEv),
        0x1C => alu(cpu, AluOp::Sbb, Form::AlIb),
        0x1D => alu(cpu, AluOp::Sbb, Form::AxIv),
        0x1E => push_sreg(cpu, SegmentReg::Ds),
        0x1F => pop_sreg(cpu, SegmentReg::Ds),

        0x20 => alu(cpu, AluOp::And, Form::EbGb),
        0x21 => alu(cpu, AluOp::And, Form::EvGv),
        0x22 => alu(cpu, AluOp::And, Form::GbEb),
        0x23 => alu(cpu, AluOp::And, Form::GvEv),
        0x24 => alu(cpu, AluOp::And, Form::AlIb),
        0x25 => alu(cpu, AluOp::And, Form::AxIv),
        0x27 => daa(cpu),

        0x28 => alu(cpu, AluOp::Sub, Form::EbGb),
        0x29 => alu(cpu, AluOp::Sub, Form::EvGv),
        0x2A => alu(cpu, AluOp::Sub, Form::GbEb),
        0x2B => alu(cpu, AluOp::Sub, Form::GvEv),
        0x2C => alu(cpu, AluOp::Sub, Form::AlIb),
        0x2D => alu(cpu, AluOp::Sub, Form::AxIv),
        0x2F => das(cpu),

        0x30 => alu(cpu, AluOp::Xor, Form::EbGb),
        0x31 => alu(cpu, AluOp::Xor, Form::EvGv),
        0x32 => alu(cpu, AluOp::Xor, Form::GbEb),
        0x33 => alu(cpu, AluOp::Xor, Form::GvEv),
        0x34 => alu(cpu, AluOp::Xor, Form::AlIb),
        0x35 => alu(cpu, AluOp::Xor, Form::AxIv),
        0x37 => aaa(cpu),

        0x38 => alu(cpu, AluOp::Cmp, Form::EbGb),
        0x39 => alu(cpu, AluOp::Cmp, Form::EvGv),
        0x3A => alu(cpu, AluOp::Cmp, Form::GbEb),
        0x3B => alu(cpu, AluOp::Cmp, Form::GvEv),
        0x3C => alu(cpu, AluOp::Cmp, Form::AlIb),
        0x3D => alu(cpu, AluOp::Cmp, Form::AxIv),
        0x3F => aas(cpu),

        // ---- INC/DEC reg16 ----
        0x40..=0x47 => {
            let reg = reg16_from_index(opcode - 0x40);
            let a = u32::from(cpu.state.regs.word(reg));
            let r = inc_value(&mut cpu.state.flags, a, Width::Word);
            cpu.state.regs.set_word(reg, r as u16);
        }
        0x48..=0x4F => {
            let reg = reg16_from_index(opcode - 0x48);
            let a = u32::from(cpu.state.regs.word(reg));
            let r = dec_value(&mut cpu.state.flags, a, Width::Word);
            cpu.state.regs.set_word(reg, r as u16);
        }

        // ---- PUSH/POP reg16 ----
        0x50..=0x57 => {
            let v = cpu.state.regs.word(reg16_from_index(opcode - 0x50));
            cpu.push_word(v);
        }
        0x58..=0x5F => {
            let v = cpu.pop_word();
            cpu.state.regs.set_word(reg16_from_index(opcode - 0x58), v);
        }

        // ---- 80186 additions ----
        0x60 => pusha(cpu),
        0x61 => popa(cpu),
        0x62 => bound(cpu),
        0x68 => {
            let imm = cpu.fetch_word();
            cpu.push_word(imm);
        }
        0x69 => imul_imm(cpu, false),
        0x6A => {
            let imm = i16::from(cpu.fetch_byte() as i8) as u16;
            cpu.push_word(imm);
        }
        0x6B => imul_imm(cpu, true),
        0x6C => string_op(cpu, false, |cpu| {
            let dx = cpu.state.regs.word(Dx);
            let v = cpu.ports.in_byte(dx);
            let di = cpu.state.regs.word(Reg16::Di);
            cpu.write_mem_byte(SegmentReg::Es, di, v);
            step_index(cpu, Reg16::Di, 1);
        }),
        0x6D => string_op(cpu, false, |cpu| {
            let dx = cpu.state.regs.word(Dx);
            let v = cpu.ports.in_word(dx);
            let di = cpu.state.regs.word(Reg16::Di);
            cpu.write_mem_word(SegmentReg::Es, di, v);
            step_index(cpu, Reg16::Di, 2);
        }),
        0x6E => string_op(cpu, false, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_byte(seg, si);
            let dx = cpu.state.regs.word(Dx);
            cpu.ports.out_byte(dx, v);
            step_index(cpu, Reg16::Si, 1);
        }),
        0x6F => string_op(cpu, false, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_word(seg, si);
            let dx = cpu.state.regs.word(Dx);
            cpu.ports.out_word(dx, v);
            step_index(cpu, Reg16::Si, 2);
        }),

        // ---- Jcc rel8 ----
        0x70..=0x7F => {
            let rel = cpu.fetch_byte() as i8;
            if condition(cpu.state.flags, opcode - 0x70) {
                cpu.state.ip = cpu.state.ip.wrapping_add(rel as i16 as u16);
            }
        }

        // ---- ALU group1 (immediate), TEST, XCHG, MOV ----
        0x80 => group1(cpu, Width::Byte, false),
        0x81 => group1(cpu, Width::Word, false),
        0x82 => group1(cpu, Width::Byte, false),
        0x83 => group1(cpu, Width::Word, true),
        0x84 => {
            let modrm = cpu.fetch_modrm();
            let a = u32::from(cpu.read_rm8(modrm));
            let b = u32::from(cpu.state.regs.byte(reg8_from_index(modrm.reg)));
            flags::logical(&mut cpu.state.flags, a & b, Width::Byte);
        }
        0x85 => {
            let modrm = cpu.fetch_modrm();
            let a = u32::from(cpu.read_rm16(modrm));
            let b = u32::from(cpu.state.regs.word(reg16_from_index(modrm.reg)));
            flags::logical(&mut cpu.state.flags, a & b, Width::Word);
        }
        0x86 => {
            let modrm = cpu.fetch_modrm();
            let a = cpu.read_rm8(modrm);
            let reg = reg8_from_index(modrm.reg);
            let b = cpu.state.regs.byte(reg);
            cpu.write_rm8(modrm, b);
            cpu.state.regs.set_byte(reg, a);
        }
        0x87 => {
            let modrm = cpu.fetch_modrm();
            let a = cpu.read_rm16(modrm);
            let reg = reg16_from_index(modrm.reg);
            let b = cpu.state.regs.word(reg);
            cpu.write_rm16(modrm, b);
            cpu.state.regs.set_word(reg, a);
        }
        0x88 => {
            let modrm = cpu.fetch_modrm();
            let v = cpu.state.regs.byte(reg8_from_index(modrm.reg));
            cpu.write_rm8(modrm, v);
        }
        0x89 => {
            let modrm = cpu.fetch_modrm();
            let v = cpu.state.regs.word(reg16_from_index(modrm.reg));
            cpu.write_rm16(modrm, v);
        }
        0x8A => {
            let modrm = cpu.fetch_modrm();
            let v = cpu.read_rm8(modrm);
            cpu.state.regs.set_byte(reg8_from_index(modrm.reg), v);
        }
        0x8B => {
            let modrm = cpu.fetch_modrm();
            let v = cpu.read_rm16(modrm);
            cpu.state.regs.set_word(reg16_from_index(modrm.reg), v);
        }
        0x8C => {
            let modrm = cpu.fetch_modrm();
            let sel = cpu.read_sreg(modrm.reg).0;
            cpu.write_rm16(modrm, sel);
        }
        0x8D => {
            let modrm = cpu.fetch_modrm();
            let (offset, _seg) = cpu.modrm_mem_offset(modrm);
            cpu.state.regs.set_word(reg16_from_index(modrm.reg), offset);
        }
        0x8E => {
            let modrm = cpu.fetch_modrm();
            let sel = SegmentSelector(cpu.read_rm16(modrm));
            let reg = segreg_from_index(modrm.reg);
            if let Err(fault) = cpu.load_sreg(reg, sel) {
                cpu.interrupt(fault.vector());
            }
        }
        0x8F => {
            let modrm = cpu.fetch_modrm();
            let v = cpu.pop_word();
            cpu.write_rm16(modrm, v);
        }
        0x90 => {}
        0x91..=0x97 => {
            let reg = reg16_from_index(opcode - 0x90);
            let a = cpu.state.regs.word(Ax);
            let b = cpu.state.regs.word(reg);
            cpu.state.regs.set_word(Ax, b);
            cpu.state.regs.set_word(reg, a);
        }
        0x98 => {
            let al = cpu.state.regs.byte(core86_types::Reg8::Al);
            cpu.state.regs.set_word(Ax, (al as i8 as i16) as u16);
        }
        0x99 => {
            let ax = cpu.state.regs.word(Ax);
            let dx = if ax & 0x8000 != 0 { 0xFFFF } else { 0 };
            cpu.state.regs.set_word(Dx, dx);
        }
        0x9A => {
            let new_ip = cpu.fetch_word();
            let new_cs = SegmentSelector(cpu.fetch_word());
            let old_cs = cpu.state.segments.cs.0;
            let ip = cpu.state.ip;
            cpu.push_word(old_cs);
            cpu.push_word(ip);
            if let Err(fault) = cpu.load_sreg(SegmentReg::Cs, new_cs) {
                cpu.interrupt(fault.vector());
                return;
            }
            cpu.state.ip = new_ip;
        }
        0x9B => {}
        0x9C => {
            let word = cpu.state.flags.to_word();
            cpu.push_word(word);
        }
        0x9D => {
            let word = cpu.pop_word();
            cpu.state.flags = Flags::from_word(word);
        }
        0x9E => {
            let ah = cpu.state.regs.byte(core86_types::Reg8::Ah);
            let bits = (cpu.state.flags.bits() & 0xFF00) | u16::from(ah);
            cpu.state.flags = Flags::from_bits_truncate(bits);
        }
        0x9F => {
            let ah = (cpu.state.flags.to_word() & 0xFF) as u8;
            cpu.state.regs.set_byte(core86_types::Reg8::Ah, ah);
        }

        0xA0 => {
            let offset = cpu.fetch_word();
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_byte(seg, offset);
            cpu.state.regs.set_byte(core86_types::Reg8::Al, v);
        }
        0xA1 => {
            let offset = cpu.fetch_word();
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_word(seg, offset);
            cpu.state.regs.set_word(Ax, v);
        }
        0xA2 => {
            let offset = cpu.fetch_word();
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.state.regs.byte(core86_types::Reg8::Al);
            cpu.write_mem_byte(seg, offset, v);
        }
        0xA3 => {
            let offset = cpu.fetch_word();
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.state.regs.word(Ax);
            cpu.write_mem_word(seg, offset, v);
        }
        0xA4 => string_op(cpu, false, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let di = cpu.state.regs.word(Reg16::Di);
            let src_seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_byte(src_seg, si);
            cpu.write_mem_byte(SegmentReg::Es, di, v);
            step_index(cpu, Reg16::Si, 1);
            step_index(cpu, Reg16::Di, 1);
        }),
        0xA5 => string_op(cpu, false, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let di = cpu.state.regs.word(Reg16::Di);
            let src_seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_word(src_seg, si);
            cpu.write_mem_word(SegmentReg::Es, di, v);
            step_index(cpu, Reg16::Si, 2);
            step_index(cpu, Reg16::Di, 2);
        }),
        0xA6 => string_op(cpu, true, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let di = cpu.state.regs.word(Reg16::Di);
            let src_seg = cpu.seg(SegmentReg::Ds);
            let a = u32::from(cpu.read_mem_byte(src_seg, si));
            let b = u32::from(cpu.read_mem_byte(SegmentReg::Es, di));
            flags::sub(&mut cpu.state.flags, a, b, false, Width::Byte);
            step_index(cpu, Reg16::Si, 1);
            step_index(cpu, Reg16::Di, 1);
        }),
        0xA7 => string_op(cpu, true, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let di = cpu.state.regs.word(Reg16::Di);
            let src_seg = cpu.seg(SegmentReg::Ds);
            let a = u32::from(cpu.read_mem_word(src_seg, si));
            let b = u32::from(cpu.read_mem_word(SegmentReg::Es, di));
            flags::sub(&mut cpu.state.flags, a, b, false, Width::Word);
            step_index(cpu, Reg16::Si, 2);
            step_index(cpu, Reg16::Di, 2);
        }),
        0xA8 => {
            let imm = u32::from(cpu.fetch_byte());
            let a = u32::from(cpu.state.regs.byte(core86_types::Reg8::Al));
            flags::logical(&mut cpu.state.flags, a & imm, Width::Byte);
        }
        0xA9 => {
            let imm = u32::from(cpu.fetch_word());
            let a = u32::from(cpu.state.regs.word(Ax));
            flags::logical(&mut cpu.state.flags, a & imm, Width::Word);
        }
        0xAA => string_op(cpu, false, |cpu| {
            let di = cpu.state.regs.word(Reg16::Di);
            let v = cpu.state.regs.byte(core86_types::Reg8::Al);
            cpu.write_mem_byte(SegmentReg::Es, di, v);
            step_index(cpu, Reg16::Di, 1);
        }),
        0xAB => string_op(cpu, false, |cpu| {
            let di = cpu.state.regs.word(Reg16::Di);
            let v = cpu.state.regs.word(Ax);
            cpu.write_mem_word(SegmentReg::Es, di, v);
            step_index(cpu, Reg16::Di, 2);
        }),
        0xAC => string_op(cpu, false, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_byte(seg, si);
            cpu.state.regs.set_byte(core86_types::Reg8::Al, v);
            step_index(cpu, Reg16::Si, 1);
        }),
        0xAD => string_op(cpu, false, |cpu| {
            let si = cpu.state.regs.word(Reg16::Si);
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_word(seg, si);
            cpu.state.regs.set_word(Ax, v);
            step_index(cpu, Reg16::Si, 2);
        }),
        0xAE => string_op(cpu, true, |cpu| {
            let di = cpu.state.regs.word(Reg16::Di);
            let a = u32::from(cpu.state.regs.byte(core86_types::Reg8::Al));
            let b = u32::from(cpu.read_mem_byte(SegmentReg::Es, di));
            flags::sub(&mut cpu.state.flags, a, b, false, Width::Byte);
            step_index(cpu, Reg16::Di, 1);
        }),
        0xAF => string_op(cpu, true, |cpu| {
            let di = cpu.state.regs.word(Reg16::Di);
            let a = u32::from(cpu.state.regs.word(Ax));
            let b = u32::from(cpu.read_mem_word(SegmentReg::Es, di));
            flags::sub(&mut cpu.state.flags, a, b, false, Width::Word);
            step_index(cpu, Reg16::Di, 2);
        }),

        0xB0..=0xB7 => {
            let imm = cpu.fetch_byte();
            cpu.state.regs.set_byte(reg8_from_index(opcode - 0xB0), imm);
        }
        0xB8..=0xBF => {
            let imm = cpu.fetch_word();
            cpu.state.regs.set_word(reg16_from_index(opcode - 0xB8), imm);
        }

        0xC0 => group2(cpu, Width::Byte, CountSource::Imm8),
        0xC1 => group2(cpu, Width::Word, CountSource::Imm8),
        0xC2 => {
            let imm = cpu.fetch_word();
            cpu.state.ip = cpu.pop_word();
            let sp = cpu.state.regs.word(Sp).wrapping_add(imm);
            cpu.state.regs.set_word(Sp, sp);
        }
        0xC3 => cpu.state.ip = cpu.pop_word(),
        0xC4 => load_far_pointer(cpu, SegmentReg::Es),
        0xC5 => load_far_pointer(cpu, SegmentReg::Ds),
        0xC6 => {
            let modrm = cpu.fetch_modrm();
            let imm = cpu.fetch_byte();
            cpu.write_rm8(modrm, imm);
        }
        0xC7 => {
            let modrm = cpu.fetch_modrm();
            let imm = cpu.fetch_word();
            cpu.write_rm16(modrm, imm);
        }
        0xC8 => {
            let frame_size = cpu.fetch_word();
            let level = cpu.fetch_byte();
            enter(cpu, frame_size, level);
        }
        0xC9 => {
            let bp = cpu.state.regs.word(Bp);
            cpu.state.regs.set_word(Sp, bp);
            let new_bp = cpu.pop_word();
            cpu.state.regs.set_word(Bp, new_bp);
        }
        0xCA => {
            let imm = cpu.fetch_word();
            far_return(cpu);
            let sp = cpu.state.regs.word(Sp).wrapping_add(imm);
            cpu.state.regs.set_word(Sp, sp);
        }
        0xCB => far_return(cpu),
        0xCC => cpu.interrupt(Fault::Breakpoint.vector()),
        0xCD => {
            let v = cpu.fetch_byte();
            cpu.interrupt(v);
        }
        0xCE => {
            if cpu.state.flags.contains(Flags::OVERFLOW) {
                cpu.interrupt(Fault::Overflow.vector());
            }
        }
        0xCF => {
            cpu.state.ip = cpu.pop_word();
            let new_cs = SegmentSelector(cpu.pop_word());
            let flags_word = cpu.pop_word();
            if let Err(fault) = cpu.load_sreg(SegmentReg::Cs, new_cs) {
                cpu.interrupt(fault.vector());
                return;
            }
            cpu.state.flags = Flags::from_word(flags_word);
        }

        0xD0 => group2(cpu, Width::Byte, CountSource::One),
        0xD1 => group2(cpu, Width::Word, CountSource::One),
        0xD2 => group2(cpu, Width::Byte, CountSource::Cl),
        0xD3 => group2(cpu, Width::Word, CountSource::Cl),
        0xD4 => aam(cpu),
        0xD5 => aad(cpu),
        0xD7 => {
            let bx = cpu.state.regs.word(Bx);
            let al = u16::from(cpu.state.regs.byte(core86_types::Reg8::Al));
            let seg = cpu.seg(SegmentReg::Ds);
            let v = cpu.read_mem_byte(seg, bx.wrapping_add(al));
            cpu.state.regs.set_byte(core86_types::Reg8::Al, v);
        }
        0xD8..=0xDF => cpu.execute_fpu_escape(opcode),

        0xE0 => loop_instr(cpu, LoopKind::Loopne),
        0xE1 => loop_instr(cpu, LoopKind::Loope),
        0xE2 => loop_instr(cpu, LoopKind::Loop),
        0xE3 => {
            let rel = cpu.fetch_byte() as i8;
            if cpu.state.regs.word(Cx) == 0 {
                cpu.state.ip = cpu.state.ip.wrapping_add(rel as i16 as u16);
            }
        }
        0xE4 => {
            let port = u16::from(cpu.fetch_byte());
            let v = cpu.ports.in_byte(port);
            cpu.state.regs.set_byte(core86_types::Reg8::Al, v);
        }
        0xE5 => {
            let port = u16::from(cpu.fetch_byte());
            let v = cpu.ports.in_word(port);
            cpu.state.regs.set_word(Ax, v);
        }
        0xE6 => {
            let port = u16::from(cpu.fetch_byte());
            let v = cpu.state.regs.byte(core86_types::Reg8::Al);
            cpu.ports.out_byte(port, v);
        }
        0xE7 => {
            let port = u16::from(cpu.fetch_byte());
            let v = cpu.state.regs.word(Ax);
            cpu.ports.out_word(port, v);
        }
        0xE8 => {
            let rel = cpu.fetch_word() as i16;
            let ip = cpu.state.ip;
            cpu.push_word(ip);
            cpu.state.ip = ip.wrapping_add(rel as u16);
        }
        0xE9 => {
            let rel = cpu.fetch_word() as i16;
            cpu.state.ip = cpu.state.ip.wrapping_add(rel as u16);
        }
        0xEA => {
            let new_ip = cpu.fetch_word();
            let new_cs = SegmentSelector(cpu.fetch_word());
            if let Err(fault) = cpu.load_sreg(SegmentReg::Cs, new_cs) {
                cpu.interrupt(fault.vector());
                return;
            }
            cpu.state.ip = new_ip;
        }
        0xEB => {
            let rel = cpu.fetch_byte() as i8;
            cpu.state.ip = cpu.state.ip.wrapping_add(rel as i16 as u16);
        }
        0xEC => {
            let port = cpu.state.regs.word(Dx);
            let v = cpu.ports.in_byte(port);
            cpu.state.regs.set_byte(core86_types::Reg8::Al, v);
        }
        0xED => {
            let port = cpu.state.regs.word(Dx);
            let v = cpu.ports.in_word(port);
            cpu.state.regs.set_word(Ax, v);
        }
        0xEE => {
            let port = cpu.state.regs.word(Dx);
            let v = cpu.state.regs.byte(core86_types::Reg8::Al);
            cpu.ports.out_byte(port, v);
        }
        0xEF => {
            let port = cpu.state.regs.word(Dx);
            let v = cpu.state.regs.word(Ax);
            cpu.ports.out_word(port, v);
        }

        0xF4 => cpu.state.halted = true,
        0xF5 => cpu.state.flags.toggle(Flags::CARRY),
        0xF6 => group3(cpu, Width::Byte),
        0xF7 => group3(cpu, Width::Word),
        0xF8 => cpu.state.flags.remove(Flags::CARRY),
        0xF9 => cpu.state.flags.insert(Flags::CARRY),
        0xFA => cpu.state.flags.remove(Flags::INTERRUPT),
        0xFB => cpu.state.flags.insert(Flags::INTERRUPT),
        0xFC => cpu.state.flags.remove(Flags::DIRECTION),
        0xFD => cpu.state.flags.insert(Flags::DIRECTION),
        0xFE => group4(cpu),
        0xFF => group5(cpu),

        _ => cpu.interrupt(Fault::InvalidOpcode.vector()),
    }
}

// ---------------------------------------------------------------------
// ALU group 0x00-0x3D
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    EbGb,
    EvGv,
    GbEb,
    GvEv,
    AlIb,
    AxIv,
}

fn alu<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, op: AluOp, form: Form) {
    match form {
        Form::EbGb => {
            let modrm = cpu.fetch_modrm();
            let a = u32::from(cpu.read_rm8(modrm));
            let b = u32::from(cpu.state.regs.byte(reg8_from_index(modrm.reg)));
            let (result, writes_back) = op.apply(&mut cpu.state.flags, a, b, Width::Byte);
            if writes_back {
                cpu.write_rm8(modrm, result as u8);
            }
        }
        Form::EvGv => {
            let modrm = cpu.fetch_modrm();
            let a = u32::from(cpu.read_rm16(modrm));
            let b = u32::from(cpu.state.regs.word(reg16_from_index(modrm.reg)));
            let (result, writes_back) = op.apply(&mut cpu.state.flags, a, b, Width::Word);
            if writes_back {
                cpu.write_rm16(modrm, result as u16);
            }
        }
        Form::GbEb => {
            let modrm = cpu.fetch_modrm();
            let reg = reg8_from_index(modrm.reg);
            let a = u32::from(cpu.state.regs.byte(reg));
            let b = u32::from(cpu.read_rm8(modrm));
            let (result, writes_back) = op.apply(&mut cpu.state.flags, a, b, Width::Byte);
            if writes_back {
                cpu.state.regs.set_byte(reg, result as u8);
            }
        }
        Form::GvEv => {
            let modrm = cpu.fetch_modrm();
            let reg = reg16_from_index(modrm.reg);
            let a = u32::from(cpu.state.regs.word(reg));
            let b = u32::from(cpu.read_rm16(modrm));
            let (result, writes_back) = op.apply(&mut cpu.state.flags, a, b, Width::Word);
            if writes_back {
                cpu.state.regs.set_word(reg, result as u16);
            }
        }
        Form::AlIb => {
            let imm = u32::from(cpu.fetch_byte());
            let a = u32::from(cpu.state.regs.byte(core86_types::Reg8::Al));
            let (result, writes_back) = op.apply(&mut cpu.state.flags, a, imm, Width::Byte);
            if writes_back {
                cpu.state.regs.set_byte(core86_types::Reg8::Al, result as u8);
            }
        }
        Form::AxIv => {
            let imm = u32::from(cpu.fetch_word());
            let a = u32::from(cpu.state.regs.word(Reg16::Ax));
            let (result, writes_back) = op.apply(&mut cpu.state.flags, a, imm, Width::Word);
            if writes_back {
                cpu.state.regs.set_word(Reg16::Ax, result as u16);
            }
        }
    }
}

fn group1<M: MemoryBus, P: PortBus, I: InterruptController>(
    cpu: &mut Cpu<M, P, I>,
    width: Width,
    imm_byte_sign_extend: bool,
) {
    let modrm = cpu.fetch_modrm();
    let op = AluOp::from_group_index(modrm.reg);
    let imm: u32 = if imm_byte_sign_extend {
        i16::from(cpu.fetch_byte() as i8) as u16 as u32
    } else {
        match width {
            Width::Byte => u32::from(cpu.fetch_byte()),
            Width::Word => u32::from(cpu.fetch_word()),
        }
    };
    let a = match width {
        Width::Byte => u32::from(cpu.read_rm8(modrm)),
        Width::Word => u32::from(cpu.read_rm16(modrm)),
    };
    let (result, writes_back) = op.apply(&mut cpu.state.flags, a, imm, width);
    if writes_back {
        match width {
            Width::Byte => cpu.write_rm8(modrm, result as u8),
            Width::Word => cpu.write_rm16(modrm, result as u16),
        }
    }
}

// ---------------------------------------------------------------------
// Shift/rotate group 2: 0xC0/0xC1 (imm8 count), 0xD0/0xD1 (count=1),
// 0xD2/0xD3 (count=CL).
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountSource {
    One,
    Imm8,
    Cl,
}

fn group2<M: MemoryBus, P: PortBus, I: InterruptController>(
    cpu: &mut Cpu<M, P, I>,
    width: Width,
    count_source: CountSource,
) {
    let modrm = cpu.fetch_modrm();
    let count = match count_source {
        CountSource::One => 1,
        CountSource::Imm8 => cpu.fetch_byte(),
        CountSource::Cl => cpu.state.regs.byte(core86_types::Reg8::Cl),
    };
    let kind = match modrm.reg {
        0 => ShiftKind::Rol,
        1 => ShiftKind::Ror,
        2 => ShiftKind::Rcl,
        3 => ShiftKind::Rcr,
        4 | 6 => ShiftKind::Shl,
        5 => ShiftKind::Shr,
        _ => ShiftKind::Sar,
    };
    let a = match width {
        Width::Byte => u32::from(cpu.read_rm8(modrm)),
        Width::Word => u32::from(cpu.read_rm16(modrm)),
    };
    let result = flags::shift_rotate(&mut cpu.state.flags, kind, a, count, width);
    match width {
        Width::Byte => cpu.write_rm8(modrm, result as u8),
        Width::Word => cpu.write_rm16(modrm, result as u16),
    }
}

// ---------------------------------------------------------------------
// Group 3 (0xF6/0xF7): TEST/NOT/NEG/MUL/IMUL/DIV/IDIV.
// ---------------------------------------------------------------------

fn group3<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, width: Width) {
    let modrm = cpu.fetch_modrm();
    match modrm.reg {
        0 | 1 => {
            let imm = match width {
                Width::Byte => u32::from(cpu.fetch_byte()),
                Width::Word => u32::from(cpu.fetch_word()),
            };
            let a = match width {
                Width::Byte => u32::from(cpu.read_rm8(modrm)),
                Width::Word => u32::from(cpu.read_rm16(modrm)),
            };
            flags::logical(&mut cpu.state.flags, a & imm, width);
        }
        2 => match width {
            Width::Byte => {
                let a = cpu.read_rm8(modrm);
                cpu.write_rm8(modrm, !a);
            }
            Width::Word => {
                let a = cpu.read_rm16(modrm);
                cpu.write_rm16(modrm, !a);
            }
        },
        3 => match width {
            Width::Byte => {
                let a = u32::from(cpu.read_rm8(modrm));
                let r = flags::sub(&mut cpu.state.flags, 0, a, false, Width::Byte);
                cpu.write_rm8(modrm, r as u8);
            }
            Width::Word => {
                let a = u32::from(cpu.read_rm16(modrm));
                let r = flags::sub(&mut cpu.state.flags, 0, a, false, Width::Word);
                cpu.write_rm16(modrm, r as u16);
            }
        },
        4 => mul(cpu, modrm, width),
        5 => imul(cpu, modrm, width),
        6 => div(cpu, modrm, width),
        _ => idiv(cpu, modrm, width),
    }
}

fn mul<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, modrm: ModRm, width: Width) {
    match width {
        Width::Byte => {
            let operand = cpu.read_rm8(modrm);
            let al = cpu.state.regs.byte(core86_types::Reg8::Al);
            let product = u16::from(al) * u16::from(operand);
            cpu.state.regs.set_word(Reg16::Ax, product);
            let overflow = product & 0xFF00 != 0;
            cpu.state.flags.set_cond(Flags::CARRY, overflow);
            cpu.state.flags.set_cond(Flags::OVERFLOW, overflow);
        }
        Width::Word => {
            let operand = cpu.read_rm16(modrm);
            let ax = cpu.state.regs.word(Reg16::Ax);
            let product = u32::from(ax) * u32::from(operand);
            cpu.state.regs.set_word(Reg16::Ax, product as u16);
            cpu.state.regs.set_word(Reg16::Dx, (product >> 16) as u16);
            let overflow = product & 0xFFFF_0000 != 0;
            cpu.state.flags.set_cond(Flags::CARRY, overflow);
            cpu.state.flags.set_cond(Flags::OVERFLOW, overflow);
        }
    }
}

fn imul<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, modrm: ModRm, width: Width) {
    match width {
        Width::Byte => {
            let operand = cpu.read_rm8(modrm) as i8;
            let al = cpu.state.regs.byte(core86_types::Reg8::Al) as i8;
            let product = i16::from(al) * i16::from(operand);
            cpu.state.regs.set_word(Reg16::Ax, product as u16);
            let fits = product == i16::from(product as i8);
            cpu.state.flags.set_cond(Flags::CARRY, !fits);
            cpu.state.flags.set_cond(Flags::OVERFLOW, !fits);
        }
        Width::Word => {
            let operand = cpu.read_rm16(modrm) as i16;
            let ax = cpu.state.regs.word(Reg16::Ax) as i16;
            let product = i32::from(ax) * i32::from(operand);
            cpu.state.regs.set_word(Reg16::Ax, product as u16);
            cpu.state.regs.set_word(Reg16::Dx, (product >> 16) as u16);
            let fits = product == i32::from(product as i16);
            cpu.state.flags.set_cond(Flags::CARRY, !fits);
            cpu.state.flags.set_cond(Flags::OVERFLOW, !fits);
        }
    }
}

fn div<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, modrm: ModRm, width: Width) {
    match width {
        Width::Byte => {
            let divisor = cpu.read_rm8(modrm);
            if divisor == 0 {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            let dividend = cpu.state.regs.word(Reg16::Ax);
            let quotient = dividend / u16::from(divisor);
            let remainder = dividend % u16::from(divisor);
            if quotient > 0xFF {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            cpu.state.regs.set_byte(core86_types::Reg8::Al, quotient as u8);
            cpu.state.regs.set_byte(core86_types::Reg8::Ah, remainder as u8);
        }
        Width::Word => {
            let divisor = cpu.read_rm16(modrm);
            if divisor == 0 {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            let dividend = (u32::from(cpu.state.regs.word(Reg16::Dx)) << 16) | u32::from(cpu.state.regs.word(Reg16::Ax));
            let quotient = dividend / u32::from(divisor);
            let remainder = dividend % u32::from(divisor);
            if quotient > 0xFFFF {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            cpu.state.regs.set_word(Reg16::Ax, quotient as u16);
            cpu.state.regs.set_word(Reg16::Dx, remainder as u16);
        }
    }
}

fn idiv<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, modrm: ModRm, width: Width) {
    match width {
        Width::Byte => {
            let divisor = cpu.read_rm8(modrm) as i8;
            if divisor == 0 {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            let dividend = cpu.state.regs.word(Reg16::Ax) as i16;
            let quotient = dividend / i16::from(divisor);
            let remainder = dividend % i16::from(divisor);
            if !(-128..=127).contains(&quotient) {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            cpu.state.regs.set_byte(core86_types::Reg8::Al, quotient as i8 as u8);
            cpu.state.regs.set_byte(core86_types::Reg8::Ah, remainder as i8 as u8);
        }
        Width::Word => {
            let divisor = cpu.read_rm16(modrm) as i16;
            if divisor == 0 {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            let dividend = ((u32::from(cpu.state.regs.word(Reg16::Dx)) << 16) | u32::from(cpu.state.regs.word(Reg16::Ax))) as i32;
            let quotient = dividend / i32::from(divisor);
            let remainder = dividend % i32::from(divisor);
            if !(-32768..=32767).contains(&quotient) {
                cpu.interrupt(Fault::DivideError.vector());
                return;
            }
            cpu.state.regs.set_word(Reg16::Ax, quotient as i16 as u16);
            cpu.state.regs.set_word(Reg16::Dx, remainder as i16 as u16);
        }
    }
}

// ---------------------------------------------------------------------
// Groups 4/5 (0xFE/0xFF): INC/DEC and the CALL/JMP/PUSH indirect forms.
// ---------------------------------------------------------------------

fn group4<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let modrm = cpu.fetch_modrm();
    match modrm.reg {
        0 => {
            let a = u32::from(cpu.read_rm8(modrm));
            let r = inc_value(&mut cpu.state.flags, a, Width::Byte);
            cpu.write_rm8(modrm, r as u8);
        }
        1 => {
            let a = u32::from(cpu.read_rm8(modrm));
            let r = dec_value(&mut cpu.state.flags, a, Width::Byte);
            cpu.write_rm8(modrm, r as u8);
        }
        _ => cpu.interrupt(Fault::InvalidOpcode.vector()),
    }
}

fn group5<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let modrm = cpu.fetch_modrm();
    match modrm.reg {
        0 => {
            let a = u32::from(cpu.read_rm16(modrm));
            let r = inc_value(&mut cpu.state.flags, a, Width::Word);
            cpu.write_rm16(modrm, r as u16);
        }
        1 => {
            let a = u32::from(cpu.read_rm16(modrm));
            let r = dec_value(&mut cpu.state.flags, a, Width::Word);
            cpu.write_rm16(modrm, r as u16);
        }
        2 => {
            let target = cpu.read_rm16(modrm);
            let ip = cpu.state.ip;
            cpu.push_word(ip);
            cpu.state.ip = target;
        }
        3 => {
            let (offset, seg) = cpu.modrm_mem_offset(modrm);
            let new_ip = cpu.read_mem_word(seg, offset);
            let new_cs = SegmentSelector(cpu.read_mem_word(seg, offset.wrapping_add(2)));
            let old_cs = cpu.state.segments.cs.0;
            let ip = cpu.state.ip;
            cpu.push_word(old_cs);
            cpu.push_word(ip);
            if let Err(fault) = cpu.load_sreg(SegmentReg::Cs, new_cs) {
                cpu.interrupt(fault.vector());
                return;
            }
            cpu.state.ip = new_ip;
        }
        4 => cpu.state.ip = cpu.read_rm16(modrm),
        5 => {
            let (offset, seg) = cpu.modrm_mem_offset(modrm);
            let new_ip = cpu.read_mem_word(seg, offset);
            let new_cs = SegmentSelector(cpu.read_mem_word(seg, offset.wrapping_add(2)));
            if let Err(fault) = cpu.load_sreg(SegmentReg::Cs, new_cs) {
                cpu.interrupt(fault.vector());
                return;
            }
            cpu.state.ip = new_ip;
        }
        6 => {
            let v = cpu.read_rm16(modrm);
            cpu.push_word(v);
        }
        _ => cpu.interrupt(Fault::InvalidOpcode.vector()),
    }
}

// ---------------------------------------------------------------------
// Segment register PUSH/POP, LDS/LES, far RET.
// ---------------------------------------------------------------------

fn push_sreg<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, reg: SegmentReg) {
    let sel = cpu.read_sreg(reg.index() as u8).0;
    cpu.push_word(sel);
}

fn pop_sreg<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, reg: SegmentReg) {
    let sel = SegmentSelector(cpu.pop_word());
    if let Err(fault) = cpu.load_sreg(reg, sel) {
        cpu.interrupt(fault.vector());
    }
}

fn load_far_pointer<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, target_seg: SegmentReg) {
    let modrm = cpu.fetch_modrm();
    let (offset, seg) = cpu.modrm_mem_offset(modrm);
    let new_reg_value = cpu.read_mem_word(seg, offset);
    let new_sel = SegmentSelector(cpu.read_mem_word(seg, offset.wrapping_add(2)));
    cpu.state.regs.set_word(reg16_from_index(modrm.reg), new_reg_value);
    if let Err(fault) = cpu.load_sreg(target_seg, new_sel) {
        cpu.interrupt(fault.vector());
    }
}

fn far_return<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let new_ip = cpu.pop_word();
    let new_cs = SegmentSelector(cpu.pop_word());
    if let Err(fault) = cpu.load_sreg(SegmentReg::Cs, new_cs) {
        cpu.interrupt(fault.vector());
        return;
    }
    cpu.state.ip = new_ip;
}

// ---------------------------------------------------------------------
// PUSHA/POPA: PUSHA pushes the *original* SP; POPA discards the saved
// SP by adding 2 rather than popping into it. Preserved verbatim --
// see DESIGN.md.
// ---------------------------------------------------------------------

fn pusha<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    use core86_types::Reg16::{Bp, Bx, Cx, Di, Dx, Si};
    let original_sp = cpu.state.regs.word(Reg16::Sp);
    let ax = cpu.state.regs.word(Reg16::Ax);
    let cx = cpu.state.regs.word(Cx);
    let dx = cpu.state.regs.word(Dx);
    let bx = cpu.state.regs.word(Bx);
    let bp = cpu.state.regs.word(Bp);
    let si = cpu.state.regs.word(Si);
    let di = cpu.state.regs.word(Di);
    cpu.push_word(ax);
    cpu.push_word(cx);
    cpu.push_word(dx);
    cpu.push_word(bx);
    cpu.push_word(original_sp);
    cpu.push_word(bp);
    cpu.push_word(si);
    cpu.push_word(di);
}

fn popa<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    use core86_types::Reg16::{Bp, Bx, Cx, Di, Dx, Si};
    let di = cpu.pop_word();
    cpu.state.regs.set_word(Di, di);
    let si = cpu.pop_word();
    cpu.state.regs.set_word(Si, si);
    let bp = cpu.pop_word();
    cpu.state.regs.set_word(Bp, bp);
    let sp = cpu.state.regs.word(Reg16::Sp).wrapping_add(2); // discard the saved SP slot
    cpu.state.regs.set_word(Reg16::Sp, sp);
    let bx = cpu.pop_word();
    cpu.state.regs.set_word(Bx, bx);
    let dx = cpu.pop_word();
    cpu.state.regs.set_word(Dx, dx);
    let cx = cpu.pop_word();
    cpu.state.regs.set_word(Cx, cx);
    let ax = cpu.pop_word();
    cpu.state.regs.set_word(Reg16::Ax, ax);
}

// ---------------------------------------------------------------------
// BOUND: the computed effective-address *offset* is itself misread as
// a segment:offset pair -- preserved verbatim rather than corrected.
// See DESIGN.md.
// ---------------------------------------------------------------------

fn bound<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let modrm = cpu.fetch_modrm();
    let index = cpu.state.regs.word(reg16_from_index(modrm.reg)) as i16;
    let (ea_offset, _seg) = cpu.modrm_mem_offset(modrm);
    let fake_seg = ea_offset >> 4;
    let fake_off = ea_offset & 0xF;
    let phys = (u32::from(fake_seg) << 4).wrapping_add(u32::from(fake_off));
    let lower = cpu.mem.read_word(phys) as i16;
    let upper = cpu.mem.read_word(phys.wrapping_add(2)) as i16;
    if index < lower || index > upper {
        cpu.interrupt(Fault::Bounds.vector());
    }
}

// ---------------------------------------------------------------------
// ENTER/LEAVE.
// ---------------------------------------------------------------------

fn enter<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, frame_size: u16, level: u8) {
    let old_bp = cpu.state.regs.word(Reg16::Bp);
    cpu.push_word(old_bp);
    let frame_temp = cpu.state.regs.word(Reg16::Sp);

    let level = level % 32;
    if level > 0 {
        let mut bp = old_bp;
        for _ in 1..level {
            bp = bp.wrapping_sub(2);
            let value = cpu.read_mem_word(SegmentReg::Ss, bp);
            cpu.push_word(value);
        }
        cpu.push_word(frame_temp);
    }

    cpu.state.regs.set_word(Reg16::Bp, frame_temp);
    let sp = frame_temp.wrapping_sub(frame_size);
    cpu.state.regs.set_word(Reg16::Sp, sp);
}

// ---------------------------------------------------------------------
// IMUL with immediate (0x69/0x6B).
// ---------------------------------------------------------------------

fn imul_imm<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, imm_is_byte: bool) {
    let modrm = cpu.fetch_modrm();
    let a = cpu.read_rm16(modrm) as i16;
    let imm = if imm_is_byte {
        i16::from(cpu.fetch_byte() as i8)
    } else {
        cpu.fetch_word() as i16
    };
    let product = i32::from(a) * i32::from(imm);
    let fits = product == i32::from(product as i16);
    cpu.state.regs.set_word(reg16_from_index(modrm.reg), product as u16);
    cpu.state.flags.set_cond(Flags::CARRY, !fits);
    cpu.state.flags.set_cond(Flags::OVERFLOW, !fits);
}

// ---------------------------------------------------------------------
// BCD adjustment: DAA/DAS/AAA/AAS/AAM/AAD.
// ---------------------------------------------------------------------

fn set_zsp_byte(flags: &mut Flags, result: u8) {
    flags.set_cond(Flags::ZERO, result == 0);
    flags.set_cond(Flags::SIGN, result & 0x80 != 0);
    flags.set_cond(Flags::PARITY, flags::parity(result));
}

fn daa<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let old_al = cpu.state.regs.byte(core86_types::Reg8::Al);
    let old_cf = cpu.state.flags.contains(Flags::CARRY);
    let mut result = old_al;
    cpu.state.flags.remove(Flags::CARRY);

    if (old_al & 0x0F) > 9 || cpu.state.flags.contains(Flags::AUXILIARY) {
        let (sum, carried) = result.overflowing_add(6);
        result = sum;
        cpu.state.flags.set_cond(Flags::CARRY, old_cf || carried);
        cpu.state.flags.insert(Flags::AUXILIARY);
    } else {
        cpu.state.flags.remove(Flags::AUXILIARY);
    }

    if old_al > 0x99 || old_cf {
        result = result.wrapping_add(0x60);
        cpu.state.flags.insert(Flags::CARRY);
    }

    set_zsp_byte(&mut cpu.state.flags, result);
    cpu.state.regs.set_byte(core86_types::Reg8::Al, result);
}

fn das<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let old_al = cpu.state.regs.byte(core86_types::Reg8::Al);
    let old_cf = cpu.state.flags.contains(Flags::CARRY);
    let mut result = old_al;
    cpu.state.flags.remove(Flags::CARRY);

    if (old_al & 0x0F) > 9 || cpu.state.flags.contains(Flags::AUXILIARY) {
        let borrowed = result < 6;
        result = result.wrapping_sub(6);
        cpu.state.flags.set_cond(Flags::CARRY, old_cf || borrowed);
        cpu.state.flags.insert(Flags::AUXILIARY);
    } else {
        cpu.state.flags.remove(Flags::AUXILIARY);
    }

    if old_al > 0x99 || old_cf {
        result = result.wrapping_sub(0x60);
        cpu.state.flags.insert(Flags::CARRY);
    }

    set_zsp_byte(&mut cpu.state.flags, result);
    cpu.state.regs.set_byte(core86_types::Reg8::Al, result);
}

fn aaa<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let al = cpu.state.regs.byte(core86_types::Reg8::Al);
    let ah = cpu.state.regs.byte(core86_types::Reg8::Ah);
    if (al & 0x0F) > 9 || cpu.state.flags.contains(Flags::AUXILIARY) {
        cpu.state.regs.set_byte(core86_types::Reg8::Al, al.wrapping_add(6) & 0x0F);
        cpu.state.regs.set_byte(core86_types::Reg8::Ah, ah.wrapping_add(1));
        cpu.state.flags.insert(Flags::AUXILIARY | Flags::CARRY);
    } else {
        cpu.state.regs.set_byte(core86_types::Reg8::Al, al & 0x0F);
        cpu.state.flags.remove(Flags::AUXILIARY | Flags::CARRY);
    }
}

fn aas<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let al = cpu.state.regs.byte(core86_types::Reg8::Al);
    let ah = cpu.state.regs.byte(core86_types::Reg8::Ah);
    if (al & 0x0F) > 9 || cpu.state.flags.contains(Flags::AUXILIARY) {
        cpu.state.regs.set_byte(core86_types::Reg8::Al, al.wrapping_sub(6) & 0x0F);
        cpu.state.regs.set_byte(core86_types::Reg8::Ah, ah.wrapping_sub(1));
        cpu.state.flags.insert(Flags::AUXILIARY | Flags::CARRY);
    } else {
        cpu.state.regs.set_byte(core86_types::Reg8::Al, al & 0x0F);
        cpu.state.flags.remove(Flags::AUXILIARY | Flags::CARRY);
    }
}

fn aam<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let base = cpu.fetch_byte();
    if base == 0 {
        cpu.interrupt(Fault::DivideError.vector());
        return;
    }
    let al = cpu.state.regs.byte(core86_types::Reg8::Al);
    let ah = al / base;
    let al = al % base;
    cpu.state.regs.set_byte(core86_types::Reg8::Ah, ah);
    cpu.state.regs.set_byte(core86_types::Reg8::Al, al);
    set_zsp_byte(&mut cpu.state.flags, al);
}

fn aad<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>) {
    let base = cpu.fetch_byte();
    let al = cpu.state.regs.byte(core86_types::Reg8::Al);
    let ah = cpu.state.regs.byte(core86_types::Reg8::Ah);
    let result = al.wrapping_add(ah.wrapping_mul(base));
    cpu.state.regs.set_byte(core86_types::Reg8::Al, result);
    cpu.state.regs.set_byte(core86_types::Reg8::Ah, 0);
    set_zsp_byte(&mut cpu.state.flags, result);
}

// ---------------------------------------------------------------------
// INC/DEC share the add/sub flag logic but must not touch CF.
// ---------------------------------------------------------------------

fn inc_value(flags: &mut Flags, a: u32, width: Width) -> u32 {
    let old_cf = flags.contains(Flags::CARRY);
    let result = flags::add(flags, a, 1, false, width);
    flags.set_cond(Flags::CARRY, old_cf);
    result
}

fn dec_value(flags: &mut Flags, a: u32, width: Width) -> u32 {
    let old_cf = flags.contains(Flags::CARRY);
    let result = flags::sub(flags, a, 1, false, width);
    flags.set_cond(Flags::CARRY, old_cf);
    result
}

// ---------------------------------------------------------------------
// Jcc / LOOP condition tables.
// ---------------------------------------------------------------------

fn condition(flags: Flags, cc: u8) -> bool {
    match cc & 0xF {
        0x0 => flags.contains(Flags::OVERFLOW),
        0x1 => !flags.contains(Flags::OVERFLOW),
        0x2 => flags.contains(Flags::CARRY),
        0x3 => !flags.contains(Flags::CARRY),
        0x4 => flags.contains(Flags::ZERO),
        0x5 => !flags.contains(Flags::ZERO),
        0x6 => flags.contains(Flags::CARRY) || flags.contains(Flags::ZERO),
        0x7 => !flags.contains(Flags::CARRY) && !flags.contains(Flags::ZERO),
        0x8 => flags.contains(Flags::SIGN),
        0x9 => !flags.contains(Flags::SIGN),
        0xA => flags.contains(Flags::PARITY),
        0xB => !flags.contains(Flags::PARITY),
        0xC => flags.contains(Flags::SIGN) != flags.contains(Flags::OVERFLOW),
        0xD => flags.contains(Flags::SIGN) == flags.contains(Flags::OVERFLOW),
        0xE => flags.contains(Flags::ZERO) || (flags.contains(Flags::SIGN) != flags.contains(Flags::OVERFLOW)),
        _ => !flags.contains(Flags::ZERO) && (flags.contains(Flags::SIGN) == flags.contains(Flags::OVERFLOW)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    Loop,
    Loope,
    Loopne,
}

fn loop_instr<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, kind: LoopKind) {
    let rel = cpu.fetch_byte() as i8;
    let cx = cpu.state.regs.word(Cx).wrapping_sub(1);
    cpu.state.regs.set_word(Cx, cx);
    let take = match kind {
        LoopKind::Loop => cx != 0,
        LoopKind::Loope => cx != 0 && cpu.state.flags.contains(Flags::ZERO),
        LoopKind::Loopne => cx != 0 && !cpu.state.flags.contains(Flags::ZERO),
    };
    if take {
        cpu.state.ip = cpu.state.ip.wrapping_add(rel as i16 as u16);
    }
}

// ---------------------------------------------------------------------
// String instruction repetition: a body closure performs exactly one
// transfer; this wrapper owns the CX/IP-rewind bookkeeping so
// REP/REPE/REPNE semantics live in one place.
// ---------------------------------------------------------------------

fn step_index<M: MemoryBus, P: PortBus, I: InterruptController>(cpu: &mut Cpu<M, P, I>, reg: Reg16, width: u16) {
    let delta = if cpu.state.flags.contains(Flags::DIRECTION) {
        (width as i16).wrapping_neg()
    } else {
        width as i16
    };
    let value = cpu.state.regs.word(reg).wrapping_add(delta as u16);
    cpu.state.regs.set_word(reg, value);
}

fn string_op<M: MemoryBus, P: PortBus, I: InterruptController>(
    cpu: &mut Cpu<M, P, I>,
    terminates_on_zf: bool,
    mut body: impl FnMut(&mut Cpu<M, P, I>),
) {
    match cpu.repetition {
        Repetition::None => body(cpu),
        rep => {
            let cx = cpu.state.regs.word(Cx);
            if cx == 0 {
                return;
            }
            body(cpu);
            let new_cx = cx.wrapping_sub(1);
            cpu.state.regs.set_word(Cx, new_cx);

            let continue_loop = new_cx != 0
                && (!terminates_on_zf
                    || match rep {
                        Repetition::Repe => cpu.state.flags.contains(Flags::ZERO),
                        Repetition::Repne => !cpu.state.flags.contains(Flags::ZERO),
                        Repetition::None => unreachable!("matched on Repetition::None above"),
                    });

            if continue_loop {
                cpu.state.ip = cpu.state.saved_ip;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core86_devices::Pic;
    use core86_hal::{A20Line, FlatMemory};
    use proptest::prelude::*;

    fn new_cpu() -> Cpu<FlatMemory, Pic, Pic> {
        Cpu::new(FlatMemory::new(0x10_0000), Pic::new(), Pic::new(), A20Line::new(true))
    }

    fn run_one(cpu: &mut Cpu<FlatMemory, Pic, Pic>, bytes: &[u8]) {
        let cs_base = u32::from(cpu.state.segments.cs.0) << 4;
        for (i, &b) in bytes.iter().enumerate() {
            cpu.mem.write_byte(cs_base + u32::from(cpu.state.ip) + i as u32, b);
        }
        cpu.step();
    }

    #[test]
    fn seed_scenario_1_add_ax_bx() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_word(Reg16::Ax, 0x7FFF);
        cpu.state.regs.set_word(Reg16::Bx, 0x0001);
        run_one(&mut cpu, &[0x01, 0xD8]); // ADD AX, BX
        assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x8000);
        assert!(!cpu.state.flags.contains(Flags::ZERO));
        assert!(cpu.state.flags.contains(Flags::SIGN));
        assert!(cpu.state.flags.contains(Flags::OVERFLOW));
        assert!(!cpu.state.flags.contains(Flags::CARRY));
    }

    #[test]
    fn seed_scenario_4_mul_bl() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_byte(core86_types::Reg8::Al, 0x80);
        cpu.state.regs.set_byte(core86_types::Reg8::Bl, 0x02);
        run_one(&mut cpu, &[0xF6, 0xE3]); // MUL BL
        assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x0100);
        assert!(cpu.state.flags.contains(Flags::CARRY));
        assert!(cpu.state.flags.contains(Flags::OVERFLOW));
    }

    #[test]
    fn push_pop_round_trips() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_word(Reg16::Sp, 0x0100);
        cpu.state.regs.set_word(Reg16::Bx, 0xBEEF);
        run_one(&mut cpu, &[0x53]); // PUSH BX
        run_one(&mut cpu, &[0x5B]); // POP BX
        assert_eq!(cpu.state.regs.word(Reg16::Bx), 0xBEEF);
        assert_eq!(cpu.state.regs.word(Reg16::Sp), 0x0100);
    }

    #[test]
    fn mov_immediate_to_register() {
        let mut cpu = new_cpu();
        run_one(&mut cpu, &[0xB8, 0x34, 0x12]); // MOV AX, 0x1234
        assert_eq!(cpu.state.regs.word(Reg16::Ax), 0x1234);
    }

    #[test]
    fn div_by_zero_raises_divide_error() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_word(Reg16::Ax, 0x0010);
        cpu.state.regs.set_byte(core86_types::Reg8::Bl, 0);
        cpu.mem.write_word(0 * 4, 0x0040);
        cpu.mem.write_word(0 * 4 + 2, 0x4000);
        run_one(&mut cpu, &[0xF6, 0xF3]); // DIV BL
        assert_eq!(cpu.state.ip, 0x0040);
        assert_eq!(cpu.state.segments.cs, SegmentSelector(0x4000));
    }

    #[test]
    fn rep_movsb_transfers_exactly_cx_bytes() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_word(Reg16::Cx, 3);
        cpu.state.regs.set_word(Reg16::Si, 0x0200);
        cpu.state.regs.set_word(Reg16::Di, 0x0300);
        let ds_base = u32::from(cpu.state.segments.ds.0) << 4;
        let es_base = u32::from(cpu.state.segments.es.0) << 4;
        cpu.mem.load(ds_base + 0x0200, &[1, 2, 3]);

        // REP MOVSB is one instruction; cpu.step() only retires one
        // dispatcher iteration, so drive it until CX reaches zero --
        // exactly as the host loop does, letting each rewind act as the
        // preemption point an external interrupt could land on.
        let cs_base = u32::from(cpu.state.segments.cs.0) << 4;
        cpu.mem.write_byte(cs_base + u32::from(cpu.state.ip), 0xF3);
        cpu.mem.write_byte(cs_base + u32::from(cpu.state.ip) + 1, 0xA4);
        for _ in 0..3 {
            cpu.step();
        }

        assert_eq!(cpu.state.regs.word(Reg16::Cx), 0);
        assert_eq!(cpu.state.regs.word(Reg16::Si), 0x0203);
        assert_eq!(cpu.state.regs.word(Reg16::Di), 0x0303);
        assert_eq!(cpu.mem.read_byte(es_base + 0x0300), 1);
        assert_eq!(cpu.mem.read_byte(es_base + 0x0302), 3);
    }

    #[test]
    fn jcc_short_taken_and_not_taken() {
        let mut cpu = new_cpu();
        cpu.state.flags.insert(Flags::ZERO);
        let start_ip = cpu.state.ip;
        run_one(&mut cpu, &[0x74, 0x05]); // JE +5
        assert_eq!(cpu.state.ip, start_ip.wrapping_add(2).wrapping_add(5));
    }

    #[test]
    fn loop_decrements_cx_and_branches_until_zero() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_word(Reg16::Cx, 1);
        let start_ip = cpu.state.ip;
        run_one(&mut cpu, &[0xE2, 0xFE]); // LOOP -2 (self-jump while CX!=0, here taken once then CX=0)
        assert_eq!(cpu.state.regs.word(Reg16::Cx), 0);
        assert_eq!(cpu.state.ip, start_ip.wrapping_add(2)); // CX hit 0, not taken
    }

    #[test]
    fn daa_corrects_bcd_addition() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_byte(core86_types::Reg8::Al, 0x0F);
        cpu.state.flags.insert(Flags::AUXILIARY);
        run_one(&mut cpu, &[0x27]); // DAA
        assert_eq!(cpu.state.regs.byte(core86_types::Reg8::Al), 0x15);
    }

    #[test]
    fn pusha_pushes_original_sp_popa_discards_it() {
        let mut cpu = new_cpu();
        cpu.state.regs.set_word(Reg16::Sp, 0x0200);
        cpu.state.regs.set_word(Reg16::Bx, 0x1111);
        run_one(&mut cpu, &[0x60]); // PUSHA
        let sp_after_pusha = cpu.state.regs.word(Reg16::Sp);
        assert_eq!(sp_after_pusha, 0x0200 - 16);
        cpu.state.regs.set_word(Reg16::Bx, 0);
        run_one(&mut cpu, &[0x61]); // POPA
        assert_eq!(cpu.state.regs.word(Reg16::Bx), 0x1111);
        assert_eq!(cpu.state.regs.word(Reg16::Sp), 0x0200);
    }

    #[test]
    fn seed_scenario_5_real_to_protected_entry_then_far_jmp_through_gdt() {
        use core86_types::{AccessByte, DescriptorCache};

        let mut cpu = new_cpu();
        cpu.state.ip = 0x0000;

        // Load DS/ES/SS in real mode so each picks up a real-mode-style
        // descriptor cache; CS already has one from reset.
        run_one(&mut cpu, &[0xB8, 0x00, 0x20]); // MOV AX, 0x2000
        run_one(&mut cpu, &[0x8E, 0xD8]); // MOV DS, AX
        run_one(&mut cpu, &[0xB8, 0x00, 0x30]); // MOV AX, 0x3000
        run_one(&mut cpu, &[0x8E, 0xC0]); // MOV ES, AX
        run_one(&mut cpu, &[0xB8, 0x00, 0x40]); // MOV AX, 0x4000
        run_one(&mut cpu, &[0x8E, 0xD0]); // MOV SS, AX

        for (reg, seg) in [
            (cpu.state.seg_caches.cs, 0xF000u16),
            (cpu.state.seg_caches.ds, 0x2000u16),
            (cpu.state.seg_caches.es, 0x3000u16),
            (cpu.state.seg_caches.ss, 0x4000u16),
        ] {
            assert_eq!(reg, DescriptorCache::real_mode(seg));
        }

        // GDT pointer (limit, 24-bit base) lives at DS:0x0500 == physical
        // 0x20500; the GDT itself at physical 0x00030000, with a present
        // DPL-0 code descriptor at index 1 (selector 0x0008).
        let ds_base = 0x2000u32 << 4;
        cpu.mem.write_word(ds_base + 0x0500, 0xFFFF); // limit
        cpu.mem.write_word(ds_base + 0x0502, 0x0000); // base low
        cpu.mem.write_byte(ds_base + 0x0504, 0x03); // base high -> 0x00030000

        cpu.mem.write_word(0x0003_0008, 0xFFFF); // descriptor limit
        cpu.mem.write_word(0x0003_000A, 0x0000); // descriptor base low
        cpu.mem.write_byte(0x0003_000C, 0x04); // descriptor base mid -> 0x00040000
        cpu.mem.write_byte(0x0003_000D, 0x9A); // present, DPL0, code, readable

        run_one(&mut cpu, &[0x0F, 0x01, 0x1E, 0x00, 0x05]); // LGDT [0x0500]
        assert_eq!(cpu.state.gdtr.base, 0x0003_0000);
        assert_eq!(cpu.state.gdtr.limit, 0xFFFF);

        run_one(&mut cpu, &[0xB8, 0x01, 0x00]); // MOV AX, 1
        run_one(&mut cpu, &[0x0F, 0x01, 0xF0]); // LMSW AX
        assert!(cpu.state.msw.is_protected());

        // Entering protected mode doesn't touch the caches LMSW itself
        // leaves alone -- they still read exactly as the real-mode loads
        // above left them.
        for (reg, seg) in [
            (cpu.state.seg_caches.cs, 0xF000u16),
            (cpu.state.seg_caches.ds, 0x2000u16),
            (cpu.state.seg_caches.es, 0x3000u16),
            (cpu.state.seg_caches.ss, 0x4000u16),
        ] {
            assert_eq!(reg, DescriptorCache::real_mode(seg));
            assert_eq!(reg.access, AccessByte(0x93));
            assert_eq!(reg.limit, 0xFFFF);
        }

        run_one(&mut cpu, &[0xEA, 0x10, 0x00, 0x08, 0x00]); // JMP FAR 0008:0010
        assert_eq!(cpu.state.ip, 0x0010);
        assert_eq!(cpu.state.segments.cs, SegmentSelector(0x0008));
        assert_eq!(cpu.state.seg_caches.cs.base, 0x0004_0000);
        assert!(cpu.state.seg_caches.cs.valid);
    }

    proptest! {
        // REP MOVSB always transfers exactly CX bytes, never more and
        // never fewer, and SI/DI always end up advanced by exactly CX.
        #[test]
        fn rep_movsb_transfers_exactly_cx_bytes_for_any_count(
            data in prop::collection::vec(any::<u8>(), 1..=64),
        ) {
            let count = data.len() as u16;
            let data = &data[..];

            let mut cpu = new_cpu();
            cpu.state.regs.set_word(Reg16::Cx, count);
            cpu.state.regs.set_word(Reg16::Si, 0x0200);
            cpu.state.regs.set_word(Reg16::Di, 0x0300);
            let ds_base = u32::from(cpu.state.segments.ds.0) << 4;
            let es_base = u32::from(cpu.state.segments.es.0) << 4;
            cpu.mem.load(ds_base + 0x0200, data);

            let cs_base = u32::from(cpu.state.segments.cs.0) << 4;
            cpu.mem.write_byte(cs_base + u32::from(cpu.state.ip), 0xF3);
            cpu.mem.write_byte(cs_base + u32::from(cpu.state.ip) + 1, 0xA4);
            for _ in 0..count {
                cpu.step();
            }

            prop_assert_eq!(cpu.state.regs.word(Reg16::Cx), 0);
            prop_assert_eq!(cpu.state.regs.word(Reg16::Si), 0x0200u16.wrapping_add(count));
            prop_assert_eq!(cpu.state.regs.word(Reg16::Di), 0x0300u16.wrapping_add(count));
            for (i, &b) in data.iter().enumerate() {
                prop_assert_eq!(cpu.mem.read_byte(es_base + 0x0300 + i as u32), b);
            }
        }
    }
}
