// crates/multicut-core/src/transitions/helpers.rs
//
// Math utilities for transition implementors. Everything here operates on
// plain `f32` samples normalized to `[0.0, 1.0]` — `PixelBuffer::to_f32_norm`
// / `from_f32_norm` handle the element-type conversion at the edges, so a
// transition impl never branches on I8/I16/F32.

// ── Clamp / lerp ─────────────────────────────────────────────────────────────

/// Clamp `v` to [0.0, 1.0].
#[inline]
pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Linear interpolation between `a` and `b` at `t` ∈ [0, 1].
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// ── Easing curves ─────────────────────────────────────────────────────────────
//
// Take `t` ∈ [0.0, 1.0], return a remapped value in [0.0, 1.0].

/// Smooth-step cubic ease-in/out. Good default for dissolves — zero
/// derivative at both endpoints means no visible pop at either end.
#[inline]
pub fn ease_in_out(t: f32) -> f32 {
    let t = clamp01(t);
    t * t * (3.0 - 2.0 * t)
}

// ── Frame alpha ───────────────────────────────────────────────────────────────

/// Blend alpha for overlap-local position `pos` of total overlap duration
/// `dur` (both in milliseconds). Clamped — callers outside the overlap
/// window get the nearest endpoint rather than an out-of-range alpha.
#[inline]
pub fn overlap_alpha(pos_ms: i64, dur_ms: i64) -> f32 {
    if dur_ms <= 0 {
        return 1.0;
    }
    clamp01(pos_ms as f32 / dur_ms as f32)
}

// ── Pixel blend ───────────────────────────────────────────────────────────────

/// Blend two normalized samples at `alpha` ∈ [0.0, 1.0].
///
/// `alpha = 0.0` → `a` (front/outgoing), `alpha = 1.0` → `b` (rear/incoming).
#[inline]
pub fn blend_sample(a: f32, b: f32, alpha: f32) -> f32 {
    lerp(a, b, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ease_in_out_endpoints() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert!((ease_in_out(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn overlap_alpha_clamped() {
        assert_eq!(overlap_alpha(-10, 300), 0.0);
        assert_eq!(overlap_alpha(400, 300), 1.0);
        assert!((overlap_alpha(150, 300) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn overlap_alpha_zero_duration_is_full_rear() {
        assert_eq!(overlap_alpha(0, 0), 1.0);
    }

    #[test]
    fn blend_sample_endpoints() {
        assert_eq!(blend_sample(0.0, 1.0, 0.0), 0.0);
        assert_eq!(blend_sample(0.0, 1.0, 1.0), 1.0);
        assert!((blend_sample(0.2, 0.8, 0.5) - 0.5).abs() < 1e-6);
    }
}
