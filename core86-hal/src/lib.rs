//! Collaborator contracts the core86 interpreter expects from its host:
//! the physical memory bus, the I/O port bus, the interrupt controller,
//! and the shared A20 line. This crate defines the traits and one
//! reference `MemoryBus`; concrete device models live in
//! `core86-devices`.

pub mod a20;
pub mod bus;
pub mod flat_memory;
pub mod interrupt;

pub use a20::A20Line;
pub use bus::{MemoryBus, PortBus};
pub use flat_memory::FlatMemory;
pub use interrupt::InterruptController;
