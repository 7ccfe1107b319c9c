//! Fixed-point log-likelihood ratio
//!
//! Soft bits are carried as saturating 8-bit values. A positive value favours
//! bit 0, a negative value favours bit 1 and zero is the erasure value.

use serde::Serialize;
use std::fmt;
use std::ops::Neg;

/// Soft bit with saturating 8-bit representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct LogLikelihoodRatio(i8);

impl LogLikelihoodRatio {
    /// Largest magnitude a soft bit can take
    pub const LLR_MAX: i8 = 120;

    /// Neutral value, carries no information about the bit
    pub const ZERO: Self = Self(0);

    /// Maximum confidence in bit 0
    pub const MAX: Self = Self(Self::LLR_MAX);

    /// Maximum confidence in bit 1
    pub const MIN: Self = Self(-Self::LLR_MAX);

    /// Create from a raw value, saturating at `LLR_MAX`
    pub fn new(value: i8) -> Self {
        Self(value.clamp(-Self::LLR_MAX, Self::LLR_MAX))
    }

    /// Raw value
    pub fn value(self) -> i8 {
        self.0
    }

    /// Quantize a real-valued LLR
    ///
    /// Values are clipped to `[-range_limit, range_limit]` and scaled so the
    /// limit maps onto `LLR_MAX`. NaN maps to zero.
    pub fn quantize(llr: f32, range_limit: f32) -> Self {
        if llr.is_nan() || range_limit <= 0.0 {
            return Self::ZERO;
        }

        let clipped = llr.clamp(-range_limit, range_limit);
        let scaled = (clipped / range_limit * Self::LLR_MAX as f32).round();
        Self(scaled as i8)
    }

    /// Hard decision, 0 for non-negative values and 1 otherwise
    pub fn hard_decision(self) -> u8 {
        u8::from(self.0 < 0)
    }

    /// Check if the soft bit is the erasure value
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Neg for LogLikelihoodRatio {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl From<LogLikelihoodRatio> for i8 {
    fn from(llr: LogLikelihoodRatio) -> Self {
        llr.0
    }
}

impl fmt::Display for LogLikelihoodRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
