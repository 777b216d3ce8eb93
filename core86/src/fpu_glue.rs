//! Glues the escape-opcode range `0xD8-0xDF` to `core86-fpu`'s decode
//! table and execution engine: this module owns the `MemoryBus` access
//! and effective-address computation the FPU core itself has no
//! opinion about.

use core86_fpu::decode::{decode_escape, FpuOp, MemOperand};
use core86_fpu::memops;
use core86_hal::{InterruptController, MemoryBus, PortBus};
use core86_types::Fault;

use crate::cpu::Cpu;
use crate::decode::ModRm;

impl<M: MemoryBus, P: PortBus, I: InterruptController> Cpu<M, P, I> {
    /// Executes one FPU escape opcode. `opcode` is the already-fetched
    /// `0xD8-0xDF` byte; the ModR/M byte (and its displacement) is
    /// decoded here since whether it even needs a memory operand
    /// depends on the decode.
    pub fn execute_fpu_escape(&mut self, opcode: u8) {
        if self.state.msw.contains(core86_types::Msw::TASK_SWITCHED) {
            // FPU disabled by the task-switched flag: rewind IP and
            // raise #NM (vector 7).
            self.state.ip = self.state.saved_ip;
            self.interrupt(Fault::DeviceNotAvailable.vector());
            return;
        }

        let modrm = self.fetch_modrm();
        let is_memory = !modrm.is_register();
        let op = decode_escape(opcode, modrm_byte(modrm), is_memory);

        match op {
            FpuOp::LoadControlWord => {
                let word = self.read_rm16(modrm);
                self.fpu.set_control_word(word);
            }
            FpuOp::StoreControlWord => {
                let word = self.fpu.control_word();
                self.write_rm16(modrm, word);
            }
            FpuOp::StoreStatusWord => {
                let word = self.fpu.status_word();
                self.write_rm16(modrm, word);
            }
            FpuOp::StoreStatusWordToAx => {
                let word = self.fpu.status_word();
                self.state.regs.set_word(core86_types::Reg16::Ax, word);
            }
            FpuOp::Frstor => {
                let (offset, seg) = self.modrm_mem_offset(modrm);
                let mut image = [0u8; core86_fpu::SAVE_IMAGE_LEN];
                for (i, b) in image.iter_mut().enumerate() {
                    *b = self.read_mem_byte(seg, offset.wrapping_add(i as u16));
                }
                self.fpu.restore_from_image(&image);
            }
            FpuOp::Fsave => {
                let (offset, seg) = self.modrm_mem_offset(modrm);
                let image = self.fpu.save_image();
                for (i, &b) in image.iter().enumerate() {
                    self.write_mem_byte(seg, offset.wrapping_add(i as u16), b);
                }
            }
            FpuOp::InvalidEncoding => {
                self.interrupt(Fault::InvalidOpcode.vector());
            }

            FpuOp::LoadMem { operand } => {
                let value = self.read_fpu_mem_operand(modrm, operand);
                self.fpu.execute(op, value);
            }
            FpuOp::ArithStDestMem { operand, .. } | FpuOp::ArithIntMem { operand, .. } => {
                let value = self.read_fpu_mem_operand(modrm, operand);
                self.fpu.execute(op, value);
            }
            FpuOp::CompareMem { operand } => {
                let value = self.read_fpu_mem_operand(modrm, operand);
                self.fpu.execute(op, value);
            }
            FpuOp::StoreMem { operand, .. } => {
                let value = self.fpu.value_for_store();
                self.fpu.execute(op, 0.0);
                self.write_fpu_mem_operand(modrm, operand, value);
            }

            _ => self.fpu.execute(op, 0.0),
        }
    }

    fn read_fpu_mem_operand(&mut self, modrm: ModRm, operand: MemOperand) -> f64 {
        let (offset, seg) = self.modrm_mem_offset(modrm);
        let len = mem_operand_len(operand);
        let mut bytes = [0u8; 10];
        for i in 0..len {
            bytes[i] = self.read_mem_byte(seg, offset.wrapping_add(i as u16));
        }
        decode_mem_operand(operand, bytes)
    }

    fn write_fpu_mem_operand(&mut self, modrm: ModRm, operand: MemOperand, value: f64) {
        let (offset, seg) = self.modrm_mem_offset(modrm);
        let bytes = encode_mem_operand(operand, value);
        let len = mem_operand_len(operand);
        for i in 0..len {
            self.write_mem_byte(seg, offset.wrapping_add(i as u16), bytes[i]);
        }
    }
}

const fn mem_operand_len(operand: MemOperand) -> usize {
    match operand {
        MemOperand::Single => 4,
        MemOperand::Double => 8,
        MemOperand::Extended => 10,
        MemOperand::Int16 => 2,
        MemOperand::Int32 => 4,
        MemOperand::Int64 => 8,
    }
}

fn decode_mem_operand(operand: MemOperand, bytes: [u8; 10]) -> f64 {
    match operand {
        MemOperand::Single => memops::single_to_f64([bytes[0], bytes[1], bytes[2], bytes[3]]),
        MemOperand::Double => {
            memops::double_to_f64(bytes[0..8].try_into().expect("8-byte slice"))
        }
        MemOperand::Extended => memops::extended_to_f64(bytes),
        MemOperand::Int16 => memops::i16_to_f64([bytes[0], bytes[1]]),
        MemOperand::Int32 => memops::i32_to_f64([bytes[0], bytes[1], bytes[2], bytes[3]]),
        MemOperand::Int64 => memops::i64_to_f64(bytes[0..8].try_into().expect("8-byte slice")),
    }
}

fn encode_mem_operand(operand: MemOperand, value: f64) -> [u8; 10] {
    let mut out = [0u8; 10];
    match operand {
        MemOperand::Single => out[0..4].copy_from_slice(&memops::f64_to_single(value)),
        MemOperand::Double => out[0..8].copy_from_slice(&memops::f64_to_double(value)),
        MemOperand::Extended => out = memops::f64_to_extended(value),
        MemOperand::Int16 => out[0..2].copy_from_slice(&memops::f64_to_i16_saturating(value)),
        MemOperand::Int32 => out[0..4].copy_from_slice(&memops::f64_to_i32_saturating(value)),
        MemOperand::Int64 => out[0..8].copy_from_slice(&memops::f64_to_i64_saturating(value)),
    }
    out
}

const fn modrm_byte(modrm: ModRm) -> u8 {
    (modrm.md << 6) | (modrm.reg << 3) | modrm.rm
}
