//! Lossy float ↔ 16-bit quantization shared by a matrix and all its rows.

use crate::error::{MatrixError, Result};

/// Default lower bound for packed scores.
pub const DEFAULT_MIN_SCORE: f32 = -1.1;
/// Default upper bound for packed scores.
pub const DEFAULT_MAX_SCORE: f32 = 1.1;

/// Number of steps between the smallest and largest packed code.
pub const PACKED_RANGE: f64 = (i16::MAX as f64) - (i16::MIN as f64);

/// Relative tolerance used by [`ValueConf::almost_equals`].
const ALMOST_EQUAL_FRACTION: f32 = 0.001;

/// Linear map between scores in `[min_score, max_score]` and `i16` codes.
///
/// Two confs written by different processes are compared with
/// [`almost_equals`](ValueConf::almost_equals), never bit-for-bit, because
/// bounds round-trip through `f32` in file headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueConf {
    min_score: f32,
    max_score: f32,
}

impl Default for ValueConf {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            max_score: DEFAULT_MAX_SCORE,
        }
    }
}

impl ValueConf {
    /// Creates a conf for scores in `[min_score, max_score]`.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::InvalidArgument`] if either bound is not finite
    /// or `min_score >= max_score`.
    pub fn new(min_score: f32, max_score: f32) -> Result<Self> {
        if !min_score.is_finite() || !max_score.is_finite() || min_score >= max_score {
            return Err(MatrixError::InvalidArgument(format!(
                "value conf bounds must be finite with min < max, got [{min_score}, {max_score}]"
            )));
        }
        Ok(Self {
            min_score,
            max_score,
        })
    }

    /// Creates a conf covering `[min, max]` as observed in some data set.
    ///
    /// An empty or single-valued range is widened by one unit on each side so
    /// the result is always valid.
    pub fn from_range(min: f32, max: f32) -> Result<Self> {
        if min.is_finite() && max.is_finite() && min >= max {
            return Self::new(min - 1.0, max + 1.0);
        }
        Self::new(min, max)
    }

    #[must_use]
    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    #[must_use]
    pub fn max_score(&self) -> f32 {
        self.max_score
    }

    /// Width of the score interval.
    #[must_use]
    pub fn range(&self) -> f32 {
        self.max_score - self.min_score
    }

    /// Distance between two adjacent codes, in score units.
    #[must_use]
    pub fn step(&self) -> f32 {
        (self.range() as f64 / PACKED_RANGE) as f32
    }

    /// Quantizes `score` to the nearest code, clamping it into range first.
    ///
    /// NaN packs to the code for `min_score`.
    #[must_use]
    pub fn pack(&self, score: f32) -> i16 {
        let min = self.min_score as f64;
        let max = self.max_score as f64;
        let s = if score.is_nan() {
            min
        } else {
            (score as f64).clamp(min, max)
        };
        let scaled = ((s - min) / (max - min) * PACKED_RANGE).round() + i16::MIN as f64;
        scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }

    /// Inverse of [`pack`](ValueConf::pack); always lies within the bounds.
    #[must_use]
    pub fn unpack(&self, code: i16) -> f32 {
        let min = self.min_score as f64;
        let max = self.max_score as f64;
        let fraction = (code as f64 - i16::MIN as f64) / PACKED_RANGE;
        (min + fraction * (max - min)).clamp(min, max) as f32
    }

    /// True if both bounds differ by less than 0.1% of the smaller range.
    #[must_use]
    pub fn almost_equals(&self, other: &ValueConf) -> bool {
        let tolerance = ALMOST_EQUAL_FRACTION * self.range().min(other.range());
        (self.min_score - other.min_score).abs() < tolerance
            && (self.max_score - other.max_score).abs() < tolerance
    }
}
