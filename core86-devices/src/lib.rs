//! Reference implementations of the collaborators `core86` expects from
//! its host: the dual 8259-style interrupt controller, the PS/2 keyboard
//! controller (and its port-`0x92` alternate A20 gate), the CMOS
//! real-time clock, and a supplemental programmable interval timer.
//! None of these are required by `core86` itself -- they exist so
//! integration tests (and embedding hosts) have a working
//! `core86_hal::InterruptController` and port targets without each
//! needing to write their own.

pub mod keyboard;
pub mod pic;
pub mod pit;
pub mod rtc;

pub use keyboard::Ps2Controller;
pub use pic::Pic;
pub use pit::Pit;
pub use rtc::Cmos;
