// crates/multicut-core/src/transitions/linear_fade.rs
//
// Linear dissolve between an overlap's front and rear clip — the one
// concrete VideoTransition this crate ships.
//
// Runs in normalized sample space with smooth-step easing applied to the
// raw linear alpha; see `transitions::helpers::ease_in_out` for why.

use crate::collaborators::VideoTransition;
use crate::frame::VideoFrame;
use crate::transitions::helpers::ease_in_out;
use crate::transitions::linear_blend_with;

/// Linear dissolve with smooth-step easing, keyed to overlap-local position.
pub struct LinearFade;

impl VideoTransition for LinearFade {
    /// Blend `front` and `rear` at the overlap-local position with
    /// smooth-step easing applied to the raw `pos/dur` ramp.
    fn mix(&self, front: &VideoFrame, rear: &VideoFrame, pos_ms: i64, dur_ms: i64) -> VideoFrame {
        let raw_alpha = crate::transitions::helpers::overlap_alpha(pos_ms, dur_ms);
        linear_blend_with(front, rear, ease_in_out(raw_alpha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ElementType;

    fn solid(value: f32, element: ElementType) -> VideoFrame {
        let mut f = VideoFrame::transparent(2, 2, element, 0);
        f.data = crate::frame::PixelBuffer::from_f32_norm(element, &vec![value; 2 * 2 * 4]);
        f
    }

    #[test]
    fn midpoint_is_50_50() {
        let t = LinearFade;
        let a = solid(0.0, ElementType::F32);
        let b = solid(1.0, ElementType::F32);
        let out = t.mix(&a, &b, 150, 300);
        // ease_in_out(0.5) == 0.5 exactly
        if let crate::frame::PixelBuffer::F32(v) = out.data {
            assert!(v.iter().all(|&s| (s - 0.5).abs() < 1e-5));
        } else {
            panic!("expected F32 buffer");
        }
    }

    #[test]
    fn start_is_all_front() {
        let t = LinearFade;
        let a = solid(0.2, ElementType::F32);
        let b = solid(0.8, ElementType::F32);
        let out = t.mix(&a, &b, 0, 300);
        if let crate::frame::PixelBuffer::F32(v) = out.data {
            assert!(v.iter().all(|&s| (s - 0.2).abs() < 1e-5));
        } else {
            panic!("expected F32 buffer");
        }
    }

    #[test]
    fn end_is_all_rear() {
        let t = LinearFade;
        let a = solid(0.2, ElementType::F32);
        let b = solid(0.8, ElementType::F32);
        let out = t.mix(&a, &b, 300, 300);
        if let crate::frame::PixelBuffer::F32(v) = out.data {
            assert!(v.iter().all(|&s| (s - 0.8).abs() < 1e-5));
        } else {
            panic!("expected F32 buffer");
        }
    }
}
