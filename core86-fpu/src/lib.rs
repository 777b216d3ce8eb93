//! An 80287-compatible floating-point coprocessor core.
//!
//! This crate owns the FPU half of the escape-opcode contract: stack
//! discipline, comparisons, transcendentals, constant loads, memory
//! operand conversions, and the `0xD8`-`0xDF` decode table. It never
//! touches a memory or port bus directly -- `core86`'s dispatcher reads
//! operands through its own `core86_hal::MemoryBus` and hands already
//! converted `f64` values in through `FpuCore::execute`.

pub mod compare;
pub mod constants;
pub mod decode;
pub mod memops;
pub mod ops;
pub mod stack;
pub mod transcendental;

mod engine;

pub use crate::engine::{FpuCore, SAVE_IMAGE_LEN};
pub use crate::decode::{decode_escape, FpuOp, MemOperand};
pub use crate::ops::ArithKind;
pub use crate::stack::StackOps;
