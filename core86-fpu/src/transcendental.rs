//! Transcendental operations and their domain restrictions. A domain
//! violation raises the invalid-operation status bit without altering
//! the stack.

use core86_types::fpu::{FpuState, StatusWord};

use crate::stack::StackOps;

fn invalid(state: &mut FpuState) {
    log::trace!("transcendental domain violation, ST(0)={}", state.st_peek(0));
    state.status.insert(StatusWord::INVALID_OP);
}

/// F2XM1: requires 0 <= x <= 0.5. Computes 2^x - 1 in place on ST(0).
pub fn f2xm1(state: &mut FpuState) {
    let x = state.st(0);
    if !(0.0..=0.5).contains(&x) {
        invalid(state);
        return;
    }
    state.set_st(0, 2f64.powf(x) - 1.0);
}

/// FYL2X: requires ST(0) > 0. Computes ST(1) * log2(ST(0)), pops, result
/// left on the new top.
pub fn fyl2x(state: &mut FpuState) {
    let x = state.st(0);
    let y = state.st(1);
    if !(x > 0.0) {
        invalid(state);
        return;
    }
    let result = y * x.log2();
    state.pop();
    state.set_st(0, result);
}

/// FYL2XP1: requires |ST(0)| < 1 - sqrt(0.5). Computes ST(1) *
/// log2(ST(0) + 1), pops.
pub fn fyl2xp1(state: &mut FpuState) {
    let x = state.st(0);
    let y = state.st(1);
    let bound = 1.0 - std::f64::consts::FRAC_1_SQRT_2;
    if !(x.abs() < bound) {
        invalid(state);
        return;
    }
    let result = y * (x + 1.0).log2();
    state.pop();
    state.set_st(0, result);
}

/// FPTAN: requires |ST(0)| < pi/4. Replaces ST(0) with tan(ST(0)) and
/// pushes 1.0 (the 8087/80287 always pushed a constant 1.0 onto the
/// stack alongside the result).
pub fn fptan(state: &mut FpuState) {
    let x = state.st(0);
    if !(x.abs() < std::f64::consts::FRAC_PI_4) {
        invalid(state);
        return;
    }
    state.set_st(0, x.tan());
    state.push(1.0);
}

/// FPATAN: requires |ST(1)| <= |ST(0)| ("requires |y| <= |x|" with
/// y = ST(1), x = ST(0)). Computes atan2(ST(1), ST(0)), pops.
pub fn fpatan(state: &mut FpuState) {
    let x = state.st(0);
    let y = state.st(1);
    if !(y.abs() <= x.abs()) {
        invalid(state);
        return;
    }
    let result = y.atan2(x);
    state.pop();
    state.set_st(0, result);
}

pub fn fsin(state: &mut FpuState) {
    let x = state.st(0);
    state.set_st(0, x.sin());
}

pub fn fsqrt(state: &mut FpuState) {
    let x = state.st(0);
    if x < 0.0 {
        invalid(state);
        return;
    }
    state.set_st(0, x.sqrt());
}

pub fn fchs(state: &mut FpuState) {
    let x = state.st(0);
    state.set_st(0, -x);
}

pub fn fabs(state: &mut FpuState) {
    let x = state.st(0);
    state.set_st(0, x.abs());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f2xm1_out_of_domain_sets_invalid_and_preserves_stack() {
        let mut state = FpuState::new();
        state.push(1.0); // outside [0, 0.5]
        f2xm1(&mut state);
        assert!(state.status.contains(StatusWord::INVALID_OP));
        assert_eq!(state.st(0), 1.0);
    }

    #[test]
    fn f2xm1_in_domain_computes_value() {
        let mut state = FpuState::new();
        state.push(0.5);
        f2xm1(&mut state);
        assert!(!state.status.contains(StatusWord::INVALID_OP));
        assert!((state.st(0) - (2f64.sqrt() - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn fsqrt_of_negative_is_invalid() {
        let mut state = FpuState::new();
        state.push(-4.0);
        fsqrt(&mut state);
        assert!(state.status.contains(StatusWord::INVALID_OP));
    }
}
