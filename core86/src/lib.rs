//! 8086/80186/80286 integer instruction set interpreter, with escape
//! dispatch into an 80287-compatible FPU core (`core86-fpu`).
//!
//! This crate owns decode, the one-byte and `0x0F` opcode tables,
//! segment/descriptor loading, and interrupt delivery. It has no opinion
//! about what backs memory, I/O ports, or interrupt sources -- those are
//! the `core86-hal` trait contracts `Cpu` is generic over.

pub mod alu;
pub mod cpu;
pub mod decode;
pub mod dispatch;
pub mod dispatch_0f;
pub mod ea;
pub mod flags;
pub mod fpu_glue;
pub mod interrupt;
pub mod segment;

pub use cpu::{Cpu, HostCallback, CALLBACK_TABLE_LEN};
