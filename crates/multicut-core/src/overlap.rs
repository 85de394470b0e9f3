// crates/multicut-core/src/overlap.rs
//
// Overlap: the derived entity capturing a time-intersecting pair of clips
// on one track. Construction orders the two clips as front (earlier start)
// and rear (later start) so the rest of the core never has to re-derive
// that ordering.

use std::sync::Arc;

use crate::clip::{Clip, ClipId};
use crate::collaborators::VideoTransition;
use crate::frame::{CorrelativeFrame, Phase, VideoFrame};

/// `a.start < b.end && b.start < a.end` — the has-overlap predicate.
pub fn has_overlap(a: &Clip, b: &Clip) -> bool {
    a.start() < b.end() && b.start() < a.end()
}

#[derive(Clone)]
pub struct Overlap {
    id: i64,
    front_id: ClipId,
    rear_id: ClipId,
    start_ms: i64,
    end_ms: i64,
    transition: Option<Arc<dyn VideoTransition>>,
}

impl Overlap {
    /// `a` and `b` must already satisfy `has_overlap`. `front` is whichever
    /// starts earlier.
    pub fn new(id: i64, a: &Clip, b: &Clip) -> Self {
        let (front, rear) = if a.start() <= b.start() { (a, b) } else { (b, a) };
        Self {
            id,
            front_id: front.id(),
            rear_id: rear.id(),
            start_ms: rear.start().max(front.start()),
            end_ms: front.end().min(rear.end()),
            transition: None,
        }
    }

    pub fn id(&self) -> i64 { self.id }
    pub fn front_id(&self) -> ClipId { self.front_id }
    pub fn rear_id(&self) -> ClipId { self.rear_id }
    pub fn start(&self) -> i64 { self.start_ms }
    pub fn end(&self) -> i64 { self.end_ms }
    pub fn duration(&self) -> i64 { self.end_ms - self.start_ms }

    pub fn set_transition(&mut self, transition: Option<Arc<dyn VideoTransition>>) {
        self.transition = transition;
    }
    pub fn transition(&self) -> Option<&Arc<dyn VideoTransition>> { self.transition.as_ref() }

    /// Blend the already filtered+transformed front/rear frames at
    /// `timeline_pos`. Falls back to a plain rear-over-front blend when no
    /// `VideoTransition` is set.
    pub fn process_source_frame(
        &self,
        timeline_pos: i64,
        frames_out: &mut Vec<CorrelativeFrame>,
        front_frame: VideoFrame,
        rear_frame: VideoFrame,
    ) -> VideoFrame {
        let pos_ms = timeline_pos - self.start_ms;
        let dur_ms = self.duration();

        let out = match &self.transition {
            Some(t) => t.mix(&front_frame, &rear_frame, pos_ms, dur_ms),
            None => {
                let alpha = if dur_ms > 0 { pos_ms as f32 / dur_ms as f32 } else { 1.0 };
                crate::transitions::linear_blend(&front_frame, &rear_frame, alpha.clamp(0.0, 1.0))
            }
        };

        frames_out.push(CorrelativeFrame {
            phase: Phase::AfterTransition,
            clip_id: None,
            track_id: None,
            image: out.clone(),
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ClipSourceReader;
    use crate::frame::VideoFrame;
    use crate::settings::{ElementType, Rational, SharedSettings};

    struct NullReader;
    impl ClipSourceReader for NullReader {
        fn seek_to(&mut self, _: i64) {}
        fn notify_read_pos(&mut self, _: i64) {}
        fn set_direction(&mut self, _: bool) {}
        fn read_source_frame(&mut self, _: i64, _: bool) -> (Option<VideoFrame>, bool) { (None, false) }
        fn clone_box(&self) -> Box<dyn ClipSourceReader> { Box::new(NullReader) }
    }

    fn settings() -> SharedSettings {
        SharedSettings::new(4, 4, Rational::new(30, 1), ElementType::I8).unwrap()
    }

    fn clip(id: i64, start: i64, dur: i64) -> Clip {
        Clip::new_video(id, start, dur, 0, 0, settings(), Box::new(NullReader)).unwrap()
    }

    #[test]
    fn has_overlap_detects_intersection() {
        let a = clip(1, 0, 1000);
        let b = clip(2, 700, 1000);
        assert!(has_overlap(&a, &b));
        let c = clip(3, 2000, 500);
        assert!(!has_overlap(&a, &c));
    }

    #[test]
    fn overlap_orders_front_and_rear() {
        let a = clip(1, 700, 1000); // starts later
        let b = clip(2, 0, 1000);   // starts earlier
        let ov = Overlap::new(1, &a, &b);
        assert_eq!(ov.front_id(), b.id());
        assert_eq!(ov.rear_id(), a.id());
        assert_eq!(ov.start(), 700);
        assert_eq!(ov.end(), 1000);
    }

    fn solid(v: f32) -> VideoFrame {
        let samples: Vec<f32> = (0..(4 * 4 * 4)).map(|_| v).collect();
        VideoFrame {
            width: 4,
            height: 4,
            data: crate::frame::PixelBuffer::from_f32_norm(ElementType::F32, &samples),
            timestamp_ms: 0,
        }
    }

    /// No transition set: the fallback is a straight rear-over-front blend
    /// that reaches an even mix at the overlap's midpoint.
    #[test]
    fn process_source_frame_falls_back_to_midpoint_linear_blend() {
        let a = clip(1, 0, 1000);
        let b = clip(2, 500, 1000);
        let ov = Overlap::new(1, &a, &b); // overlap spans [500, 1000)
        let mut frames_out = Vec::new();

        let out = ov.process_source_frame(750, &mut frames_out, solid(0.0), solid(1.0));

        let samples = out.data.to_f32_norm();
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!(frames_out.iter().any(|f| matches!(f.phase, Phase::AfterTransition)));
    }
}
