//! Constant loads, selected by the ModR/M `rm` field of the `0xD9 /0xE8..0xEE`
//! encoding range.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    One,
    Log2Ten,
    Log2E,
    Pi,
    Log10Two,
    LnTwo,
    Zero,
}

impl Constant {
    #[must_use]
    pub const fn from_rm(rm: u8) -> Option<Self> {
        match rm {
            0 => Some(Self::One),
            1 => Some(Self::Log2Ten),
            2 => Some(Self::Log2E),
            3 => Some(Self::Pi),
            4 => Some(Self::Log10Two),
            5 => Some(Self::LnTwo),
            6 => Some(Self::Zero),
            _ => None,
        }
    }

    #[must_use]
    pub fn value(self) -> f64 {
        match self {
            Self::One => 1.0,
            Self::Log2Ten => std::f64::consts::LOG2_10,
            Self::Log2E => std::f64::consts::LOG2_E,
            Self::Pi => std::f64::consts::PI,
            Self::Log10Two => std::f64::consts::LOG10_2,
            Self::LnTwo => std::f64::consts::LN_2,
            Self::Zero => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rm_maps_to_documented_constants() {
        assert_eq!(Constant::from_rm(0), Some(Constant::One));
        assert_eq!(Constant::from_rm(6), Some(Constant::Zero));
        assert_eq!(Constant::from_rm(7), None);
    }

    #[test]
    fn log2_e_matches_known_value() {
        assert!((Constant::Log2E.value() - std::f64::consts::LOG2_E).abs() < 1e-15);
    }
}
