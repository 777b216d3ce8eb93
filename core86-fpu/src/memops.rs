//! Conversions between the various memory operand encodings the escape
//! opcodes can load/store and the `f64` this core uses internally.
//!
//! These are plain `to_bits`/`from_bits` functions, never a
//! reinterpreting union. 80-bit extended precision is approximated with
//! `f64`: the low 8 bytes of the 10-byte field are read/written as a
//! double, and the top 2 bytes are left as zero on store. This is a
//! deliberate fidelity gap, not an oversight -- see DESIGN.md.

#[must_use]
pub fn single_to_f64(bytes: [u8; 4]) -> f64 {
    f64::from(f32::from_le_bytes(bytes))
}

#[must_use]
pub fn f64_to_single(value: f64) -> [u8; 4] {
    (value as f32).to_le_bytes()
}

#[must_use]
pub fn double_to_f64(bytes: [u8; 8]) -> f64 {
    f64::from_le_bytes(bytes)
}

#[must_use]
pub fn f64_to_double(value: f64) -> [u8; 8] {
    value.to_le_bytes()
}

/// 10-byte extended-precision field, approximated: low 8 bytes as an
/// `f64`, top 2 bytes ignored/zeroed.
#[must_use]
pub fn extended_to_f64(bytes: [u8; 10]) -> f64 {
    let mut low8 = [0u8; 8];
    low8.copy_from_slice(&bytes[0..8]);
    f64::from_le_bytes(low8)
}

#[must_use]
pub fn f64_to_extended(value: f64) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0..8].copy_from_slice(&value.to_le_bytes());
    out
}

#[must_use]
pub fn i16_to_f64(bytes: [u8; 2]) -> f64 {
    f64::from(i16::from_le_bytes(bytes))
}

#[must_use]
pub fn f64_to_i16_saturating(value: f64) -> [u8; 2] {
    (value.round() as i16).to_le_bytes()
}

#[must_use]
pub fn i32_to_f64(bytes: [u8; 4]) -> f64 {
    f64::from(i32::from_le_bytes(bytes))
}

#[must_use]
pub fn f64_to_i32_saturating(value: f64) -> [u8; 4] {
    (value.round() as i32).to_le_bytes()
}

#[must_use]
pub fn i64_to_f64(bytes: [u8; 8]) -> f64 {
    i64::from_le_bytes(bytes) as f64
}

#[must_use]
pub fn f64_to_i64_saturating(value: f64) -> [u8; 8] {
    (value.round() as i64).to_le_bytes()
}
