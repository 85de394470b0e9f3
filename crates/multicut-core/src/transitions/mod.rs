// crates/multicut-core/src/transitions/mod.rs
//
// Transition system. `VideoTransition` itself (the algorithm contract) lives
// in `collaborators` alongside the other external-interface traits — this
// module only holds the one concrete implementation this crate ships
// (`LinearFade`), its registry, and the shared blend math every transition
// impl (including the no-transition fallback in `Overlap`) builds on.
//
// Adding a new transition:
//   1. Add a variant to `TransitionKind`.
//   2. Create `my_transition.rs` in this folder, impl `VideoTransition`.
//   3. Add `mod my_transition;` below and one line to `registry()`.

mod linear_fade;
pub mod helpers;

use std::collections::HashMap;

use crate::collaborators::VideoTransition;
use crate::frame::{PixelBuffer, VideoFrame};

pub use linear_fade::LinearFade;

/// Discriminant-only enum used as the registry key — identifies *which
/// algorithm* to look up, not how it's configured for a particular overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    LinearFade,
}

/// Map of all registered transitions keyed by `TransitionKind`. Cheap to
/// construct — every impl here is a zero-size struct.
pub fn registry() -> HashMap<TransitionKind, Box<dyn VideoTransition>> {
    let entries: Vec<(TransitionKind, Box<dyn VideoTransition>)> = vec![
        (TransitionKind::LinearFade, Box::new(LinearFade)),
    ];
    entries.into_iter().collect()
}

/// Rear-over-front blend at `alpha` ∈ [0.0, 1.0] with no easing — the "no
/// transition set" fallback used directly by `Overlap::process_source_frame`.
pub fn linear_blend(front: &VideoFrame, rear: &VideoFrame, alpha: f32) -> VideoFrame {
    linear_blend_with(front, rear, alpha)
}

/// Shared implementation: blend two frames sample-for-sample at `alpha`,
/// preserving `front`'s element type and geometry. Every concrete
/// `VideoTransition` in this module funnels through this so blend math is
/// written once regardless of element type.
pub(crate) fn linear_blend_with(front: &VideoFrame, rear: &VideoFrame, alpha: f32) -> VideoFrame {
    debug_assert_eq!(front.width, rear.width, "linear_blend_with: width mismatch");
    debug_assert_eq!(front.height, rear.height, "linear_blend_with: height mismatch");

    let a = front.data.to_f32_norm();
    let b = rear.data.to_f32_norm();
    let blended: Vec<f32> = a.iter().zip(b.iter())
        .map(|(&x, &y)| helpers::blend_sample(x, y, alpha))
        .collect();

    VideoFrame {
        width: front.width,
        height: front.height,
        data: PixelBuffer::from_f32_norm(front.data.element_type(), &blended),
        timestamp_ms: front.timestamp_ms,
    }
}
