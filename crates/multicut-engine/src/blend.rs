// crates/multicut-engine/src/blend.rs
//
// Software fallback Blender. Straight alpha-over compositing of `overlay`
// onto `base` at (x, y), scaled by `opacity`. Each mixing worker owns one
// instance — thread-confined, no shared state.

use multicut_core::collaborators::Blender;
use multicut_core::frame::VideoFrame;

pub struct SoftwareBlender;

impl Blender for SoftwareBlender {
    fn blend(&self, base: &mut VideoFrame, overlay: &VideoFrame, x: i32, y: i32, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return;
        }

        let base_w = base.width as i32;
        let base_h = base.height as i32;
        let mut base_samples = base.data.to_f32_norm();
        let overlay_samples = overlay.data.to_f32_norm();
        const CH: usize = VideoFrame::CHANNELS;

        for oy in 0..overlay.height as i32 {
            let by = y + oy;
            if by < 0 || by >= base_h {
                continue;
            }
            for ox in 0..overlay.width as i32 {
                let bx = x + ox;
                if bx < 0 || bx >= base_w {
                    continue;
                }
                let o_idx = (oy as usize * overlay.width as usize + ox as usize) * CH;
                let b_idx = (by as usize * base.width as usize + bx as usize) * CH;

                let src_a = overlay_samples[o_idx + 3] * opacity;
                if src_a <= 0.0 {
                    continue;
                }
                for c in 0..3 {
                    let src = overlay_samples[o_idx + c];
                    let dst = base_samples[b_idx + c];
                    base_samples[b_idx + c] = src * src_a + dst * (1.0 - src_a);
                }
                base_samples[b_idx + 3] = src_a + base_samples[b_idx + 3] * (1.0 - src_a);
            }
        }

        base.data = multicut_core::frame::PixelBuffer::from_f32_norm(base.data.element_type(), &base_samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multicut_core::settings::ElementType;

    fn opaque(w: u32, h: u32, rgba: [f32; 4]) -> VideoFrame {
        let samples: Vec<f32> = (0..(w * h) as usize).flat_map(|_| rgba).collect();
        VideoFrame {
            width: w,
            height: h,
            data: multicut_core::frame::PixelBuffer::from_f32_norm(ElementType::F32, &samples),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn full_opacity_overlay_replaces_base_pixel() {
        let mut base = opaque(2, 2, [1.0, 0.0, 0.0, 1.0]);
        let overlay = opaque(2, 2, [0.0, 0.0, 1.0, 1.0]);
        SoftwareBlender.blend(&mut base, &overlay, 0, 0, 1.0);
        let samples = base.data.to_f32_norm();
        assert!((samples[0] - 0.0).abs() < 1e-4);
        assert!((samples[2] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn half_opacity_averages_evenly() {
        let mut base = opaque(1, 1, [1.0, 0.0, 0.0, 1.0]);
        let overlay = opaque(1, 1, [0.0, 0.0, 1.0, 1.0]);
        SoftwareBlender.blend(&mut base, &overlay, 0, 0, 0.5);
        let samples = base.data.to_f32_norm();
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!((samples[2] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn zero_opacity_is_a_no_op() {
        let mut base = opaque(1, 1, [1.0, 0.0, 0.0, 1.0]);
        let overlay = opaque(1, 1, [0.0, 0.0, 1.0, 1.0]);
        SoftwareBlender.blend(&mut base, &overlay, 0, 0, 0.0);
        let samples = base.data.to_f32_norm();
        assert!((samples[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn out_of_bounds_offset_is_clipped_safely() {
        let mut base = opaque(2, 2, [0.0, 0.0, 0.0, 1.0]);
        let overlay = opaque(2, 2, [1.0, 1.0, 1.0, 1.0]);
        SoftwareBlender.blend(&mut base, &overlay, 5, 5, 1.0);
        let samples = base.data.to_f32_norm();
        assert!(samples.iter().take(3).all(|&v| v == 0.0));
    }
}
