//! Vectored CPU faults.
//!
//! Every fault the core can raise is surfaced as an interrupt vector; none
//! of them are a host-visible `panic!`/process abort. `Fault::vector`
//! feeds directly into the interrupt dispatcher.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("divide error")]
    DivideError,
    #[error("single-step trap")]
    SingleStep,
    #[error("breakpoint")]
    Breakpoint,
    #[error("overflow")]
    Overflow,
    #[error("bounds check failed")]
    Bounds,
    #[error("invalid opcode")]
    InvalidOpcode,
    #[error("device not available")]
    DeviceNotAvailable,
    #[error("double fault")]
    DoubleFault,
    #[error("segment not present")]
    SegmentNotPresent,
    #[error("general protection fault")]
    GeneralProtection,
}

impl Fault {
    /// The interrupt vector this fault is delivered through.
    #[must_use]
    pub const fn vector(self) -> u8 {
        match self {
            Self::DivideError => 0,
            Self::SingleStep => 1,
            Self::Breakpoint => 3,
            Self::Overflow => 4,
            Self::Bounds => 5,
            Self::InvalidOpcode => 6,
            Self::DeviceNotAvailable => 7,
            Self::DoubleFault => 8,
            Self::SegmentNotPresent => 11,
            Self::GeneralProtection => 13,
        }
    }

    /// Whether this vector is one of the escalating fault classes that
    /// arm `fault_in_flight`: {8, 10, 11, 12, 13}.
    /// 10 (invalid TSS) and 12 (stack fault) have no dedicated variant
    /// here (neither is raised anywhere in this core) but the vector
    /// check is written against the raw number so a future addition does
    /// not have to touch the escalation logic.
    #[must_use]
    pub const fn vector_arms_fault_in_flight(vector: u8) -> bool {
        matches!(vector, 8 | 10 | 11 | 12 | 13)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_match_the_interrupt_table() {
        assert_eq!(Fault::DivideError.vector(), 0);
        assert_eq!(Fault::SingleStep.vector(), 1);
        assert_eq!(Fault::Breakpoint.vector(), 3);
        assert_eq!(Fault::Overflow.vector(), 4);
        assert_eq!(Fault::Bounds.vector(), 5);
        assert_eq!(Fault::InvalidOpcode.vector(), 6);
        assert_eq!(Fault::DeviceNotAvailable.vector(), 7);
        assert_eq!(Fault::DoubleFault.vector(), 8);
        assert_eq!(Fault::SegmentNotPresent.vector(), 11);
        assert_eq!(Fault::GeneralProtection.vector(), 13);
    }

    #[test]
    fn fault_in_flight_escalation_set() {
        assert!(Fault::vector_arms_fault_in_flight(8));
        assert!(Fault::vector_arms_fault_in_flight(13));
        assert!(!Fault::vector_arms_fault_in_flight(0));
        assert!(!Fault::vector_arms_fault_in_flight(6));
    }
}
