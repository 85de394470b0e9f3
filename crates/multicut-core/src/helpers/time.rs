// crates/multicut-core/src/helpers/time.rs
//
// Frame index <-> millisecond conversions at the configured output rate.
// Canonical source for this arithmetic — every other crate goes through
// `ms_to_frame_idx` / `frame_idx_to_ms` instead of re-deriving the rational
// math at each call site.

use crate::settings::Rational;

pub type FrameIndex = i64;

/// Rounding mode applied when a millisecond value doesn't land exactly on a
/// frame boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundMode {
    Floor,
    Ceil,
    Nearest,
}

/// Convert milliseconds to a frame index at `rate`, using `mode` to resolve
/// values that fall between two frame boundaries.
///
/// ```
/// use multicut_core::helpers::time::{ms_to_frame_idx, RoundMode};
/// use multicut_core::settings::Rational;
/// let r = Rational::new(30, 1);
/// assert_eq!(ms_to_frame_idx(500, r, RoundMode::Nearest), 15);
/// assert_eq!(ms_to_frame_idx(0, r, RoundMode::Floor), 0);
/// ```
pub fn ms_to_frame_idx(ms: i64, rate: Rational, mode: RoundMode) -> FrameIndex {
    // idx = ms * num / (den * 1000), den always positive so div_euclid is a
    // true floor division regardless of the sign of `num`.
    let num = ms as i128 * rate.num as i128;
    let den = rate.den as i128 * 1000;
    let idx = match mode {
        RoundMode::Floor => num.div_euclid(den),
        RoundMode::Ceil => -(-num).div_euclid(den),
        RoundMode::Nearest => (num * 2 + den).div_euclid(den * 2),
    };
    idx as FrameIndex
}

/// Convert a frame index back to milliseconds at `rate`.
///
/// ```
/// use multicut_core::helpers::time::frame_idx_to_ms;
/// use multicut_core::settings::Rational;
/// let r = Rational::new(30, 1);
/// assert_eq!(frame_idx_to_ms(15, r), 500);
/// ```
pub fn frame_idx_to_ms(idx: FrameIndex, rate: Rational) -> i64 {
    (idx as i128 * rate.den as i128 * 1000 / rate.num as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(num: u32, den: u32) -> Rational { Rational::new(num, den) }

    #[test]
    fn round_trip_within_half_frame() {
        let r = rate(30, 1);
        for ms in [0, 1, 33, 100, 500, 999, 1000, 12345] {
            let idx = ms_to_frame_idx(ms, r, RoundMode::Nearest);
            let back = frame_idx_to_ms(idx, r);
            let frame_ms = 1000.0 * r.den as f64 / r.num as f64;
            assert!((back - ms).unsigned_abs() as f64 <= frame_ms / 2.0 + 1.0,
                "ms={ms} idx={idx} back={back} frame_ms={frame_ms}");
        }
    }

    #[test]
    fn floor_ceil_bracket_nearest() {
        let r = rate(30, 1);
        let ms = 517; // not an exact multiple of 1000/30
        let f = ms_to_frame_idx(ms, r, RoundMode::Floor);
        let c = ms_to_frame_idx(ms, r, RoundMode::Ceil);
        assert!(f <= c);
        assert!(c - f <= 1);
    }

    #[test]
    fn ntsc_rate_nonintegral() {
        let r = rate(30000, 1001);
        let idx = ms_to_frame_idx(1001, r, RoundMode::Nearest);
        assert_eq!(idx, 30);
    }

    #[test]
    fn zero_is_zero() {
        let r = rate(24, 1);
        assert_eq!(ms_to_frame_idx(0, r, RoundMode::Floor), 0);
        assert_eq!(frame_idx_to_ms(0, r), 0);
    }
}
