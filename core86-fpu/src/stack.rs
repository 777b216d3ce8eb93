//! Stack discipline: push, pop, and logical-index operand reads.

use core86_types::fpu::{logical_to_physical, FpuState, StatusWord, Tag};

/// A quiet NaN used for the "return -NaN" convention on stack
/// underflow.
pub const NEG_NAN: f64 = f64::from_bits(0xFFF8_0000_0000_0000);

pub trait StackOps {
    fn push(&mut self, value: f64);
    fn pop(&mut self) -> f64;
    fn st(&mut self, logical: u8) -> f64;
    fn st_peek(&self, logical: u8) -> f64;
    fn set_st(&mut self, logical: u8, value: f64);
    fn is_empty(&self, logical: u8) -> bool;
}

impl StackOps for FpuState {
    /// Pushes `value` onto the stack. If the slot that would become the
    /// new top (logical -1) is non-empty, sets the stack-overflow bits
    /// `{IE, C1, SF}` first -- the push still happens, overwriting it.
    fn push(&mut self, value: f64) {
        let top = self.top();
        let new_top = logical_to_physical(7, top); // logical -1 == physical top-1

        if self.tag.get(new_top) != Tag::Empty {
            self.status
                .insert(StatusWord::INVALID_OP | StatusWord::C1 | StatusWord::STACK_FAULT);
        }

        self.stack[new_top as usize] = value;
        self.tag.set(new_top, tag_for(value));
        self.status.set_top(new_top);
    }

    /// Pops the top of stack. If empty, sets `{IE, SF}` and returns
    /// `-NaN` without advancing `top`.
    fn pop(&mut self) -> f64 {
        let top = self.top();
        if self.tag.get(top) == Tag::Empty {
            self.status.insert(StatusWord::INVALID_OP | StatusWord::STACK_FAULT);
            return NEG_NAN;
        }

        let value = self.stack[top as usize];
        self.tag.set(top, Tag::Empty);
        self.status.set_top(logical_to_physical(1, top));
        value
    }

    /// Reads logical register `i` without popping. Returns `-NaN` and
    /// sets `{IE, SF}` if that slot is empty -- every arithmetic operand
    /// read goes through `St(i)`.
    fn st(&mut self, logical: u8) -> f64 {
        let physical = logical_to_physical(logical, self.top());
        if self.tag.get(physical) == Tag::Empty {
            self.status.insert(StatusWord::INVALID_OP | StatusWord::STACK_FAULT);
            return NEG_NAN;
        }
        self.stack[physical as usize]
    }

    /// Same as `st`, but never mutates status -- used by inspection paths
    /// (FXAM, state dumps) that must not raise exceptions on an empty
    /// slot.
    fn st_peek(&self, logical: u8) -> f64 {
        let physical = logical_to_physical(logical, self.top());
        if self.tag.get(physical) == Tag::Empty {
            return NEG_NAN;
        }
        self.stack[physical as usize]
    }

    fn set_st(&mut self, logical: u8, value: f64) {
        let physical = logical_to_physical(logical, self.top());
        self.stack[physical as usize] = value;
        self.tag.set(physical, tag_for(value));
    }

    fn is_empty(&self, logical: u8) -> bool {
        let physical = logical_to_physical(logical, self.top());
        self.tag.get(physical) == Tag::Empty
    }
}

fn tag_for(value: f64) -> Tag {
    if value == 0.0 {
        Tag::Zero
    } else if !value.is_finite() || value.is_nan() {
        Tag::Special
    } else {
        Tag::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn push_then_pop_round_trips_bit_exact() {
        let mut state = FpuState::new();
        state.push(core::f64::consts::PI);
        assert_eq!(state.pop().to_bits(), core::f64::consts::PI.to_bits());
        assert_eq!(state.tag.0, 0xFFFF);
    }

    #[test]
    fn st_of_empty_slot_sets_underflow_nan() {
        let mut state = FpuState::new();
        let value = state.st(0);
        assert!(value.is_nan());
        assert!(state.status.contains(StatusWord::INVALID_OP));
        assert!(state.status.contains(StatusWord::STACK_FAULT));
    }

    #[test]
    fn push_onto_full_slot_sets_overflow_bits() {
        let mut state = FpuState::new();
        for _ in 0..8 {
            state.push(1.0);
        }
        // All 8 slots now occupied; one more push overflows onto a full slot.
        state.push(2.0);
        assert!(state.status.contains(StatusWord::INVALID_OP));
        assert!(state.status.contains(StatusWord::C1));
        assert!(state.status.contains(StatusWord::STACK_FAULT));
    }

    #[test]
    fn pop_of_empty_returns_neg_nan_without_moving_top() {
        let mut state = FpuState::new();
        let top_before = state.top();
        let value = state.pop();
        assert!(value.is_nan() && value.is_sign_negative());
        assert!(state.status.contains(StatusWord::INVALID_OP));
        assert_eq!(state.top(), top_before);
    }

    proptest! {
        // Pushing N values (N <= 8, so the stack never wraps onto a
        // still-occupied slot) and popping N times back gives the exact
        // bits back in reverse order, and the stack ends empty.
        #[test]
        fn push_n_then_pop_n_is_lifo_and_bit_exact(
            values in prop::collection::vec(-1.0e30f64..1.0e30f64, 1..=8)
        ) {
            let mut state = FpuState::new();
            for &v in &values {
                state.push(v);
            }
            prop_assert!(!state.status.contains(StatusWord::STACK_FAULT));

            let mut popped = Vec::with_capacity(values.len());
            for _ in &values {
                popped.push(state.pop());
            }
            popped.reverse();

            prop_assert_eq!(
                popped.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
                values.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
            );
            for logical in 0u8..8 {
                prop_assert!(state.is_empty(logical));
            }
        }
    }
}
