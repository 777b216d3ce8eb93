//! The FLAGS register and the single-instruction trap-toggle latch.

use bitflags::bitflags;

bitflags! {
    /// The subset of the 16-bit FLAGS register this core models.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u16 {
        const CARRY     = 1 << 0;
        const PARITY    = 1 << 2;
        const AUXILIARY = 1 << 4;
        const ZERO      = 1 << 6;
        const SIGN      = 1 << 7;
        const TRAP      = 1 << 8;
        const INTERRUPT = 1 << 9;
        const DIRECTION = 1 << 10;
        const OVERFLOW  = 1 << 11;
    }
}

impl Flags {
    /// Reserved bits that read as 1 on real 8086/80286 hardware.
    pub const RESERVED_ONE: u16 = 0b0000_0000_0000_0010;

    #[must_use]
    #[inline]
    pub const fn to_word(self) -> u16 {
        self.bits() | Self::RESERVED_ONE
    }

    #[must_use]
    #[inline]
    pub const fn from_word(word: u16) -> Self {
        Self::from_bits_truncate(word)
    }

    #[inline]
    pub fn set_cond(&mut self, flag: Self, cond: bool) {
        self.set(flag, cond);
    }
}

/// Delays a single-step (#DB) interrupt by exactly one instruction: TF is
/// copied into this latch at the end of each instruction boundary, and the
/// *previous* value is what the dispatcher checks before the next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapToggle {
    armed: bool,
}

impl TrapToggle {
    #[must_use]
    pub const fn new() -> Self {
        Self { armed: false }
    }

    #[must_use]
    #[inline]
    pub const fn is_armed(self) -> bool {
        self.armed
    }

    /// Called once per instruction boundary with the *current* TF value.
    #[inline]
    pub fn latch(&mut self, trap_flag_set: bool) {
        self.armed = trap_flag_set;
    }

    #[inline]
    pub fn clear(&mut self) {
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_word() {
        let flags = Flags::CARRY | Flags::ZERO | Flags::OVERFLOW;
        let word = flags.to_word();
        assert_eq!(word & Flags::RESERVED_ONE, Flags::RESERVED_ONE);
        assert_eq!(Flags::from_word(word), flags);
    }

    #[test]
    fn trap_toggle_delays_by_one_instruction() {
        let mut toggle = TrapToggle::new();
        assert!(!toggle.is_armed());

        toggle.latch(true);
        // The latch now reflects "TF was set on the instruction that just
        // ran"; the *next* fetch should trap.
        assert!(toggle.is_armed());

        toggle.latch(false);
        assert!(!toggle.is_armed());
    }
}
