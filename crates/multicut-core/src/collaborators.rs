// crates/multicut-core/src/collaborators.rs
//
// External collaborator interfaces. Everything in this module is a trait —
// the core never ships a concrete decoder, filter, or blender. Consumers
// bring their own impl (FFmpeg-backed, GPU-backed, test fake, whatever) and
// hand the core a `Box<dyn Trait>` / `Arc<dyn Trait>`.
//
// Implementations must be `Send + Sync`: clip source readers live inside a
// `Clip` that's mutated from a single track worker thread, but filters and
// transitions are invoked from whichever mixing worker reaches them first.

use crate::clip::ExtraArgs;
use crate::error::CoreResult;
use crate::frame::VideoFrame;

/// Stream/seek-point metadata returned by `MediaParser::open`.
#[derive(Clone, Debug)]
pub struct MediaInfo {
    pub duration_ms: i64,
    pub best_video_stream: Option<usize>,
    pub best_audio_stream: Option<usize>,
}

/// Opens a source URL/path and reports its stream layout. Consumed once per
/// clip at construction time — never touched again by the core afterward.
pub trait MediaParser: Send + Sync {
    fn open(&self, url: &str) -> CoreResult<MediaInfo>;
}

/// Per-clip decoder handle. Positions are milliseconds local to the clip's
/// own source (i.e. already offset by `start_offset`).
pub trait ClipSourceReader: Send + Sync {
    fn seek_to(&mut self, clip_local_ms: i64);
    fn notify_read_pos(&mut self, clip_local_ms: i64);
    fn set_direction(&mut self, forward: bool);
    /// Non-blocking when `wait` is false: returns `(None, false)` until the
    /// decoder has buffered the frame. The returned `bool` is the source's
    /// own eof signal (the caller ORs it with its own duration-based check).
    fn read_source_frame(&mut self, clip_local_ms: i64, wait: bool) -> (Option<VideoFrame>, bool);
    /// Duplicate this reader for `CloneAndConfigure`. Implementors typically
    /// reopen the same source rather than share decoder state.
    fn clone_box(&self) -> Box<dyn ClipSourceReader>;
}

/// Stateless-from-the-core's-view per-clip pixel filter. Reentrant: the same
/// `Arc<dyn VideoFilter>` may be invoked concurrently for different clips.
pub trait VideoFilter: Send + Sync {
    fn filter_image(&self, frame: &VideoFrame, clip_local_pos: i64, extra: &ExtraArgs) -> VideoFrame;
}

/// Per-clip 2D transform: position offset, crop, scale, rotation, opacity,
/// optional time-keyed curves. The core does not interpret any of that —
/// it only calls `apply` at the clip-local position.
pub trait VideoTransformFilter: Send + Sync {
    fn apply(&self, frame: &VideoFrame, clip_local_pos: i64) -> VideoFrame;
}

/// `front`/`rear` are the two clips of an `Overlap`, already passed through
/// their own filter+transform. `pos`/`dur` are the overlap-local position
/// and total overlap duration in milliseconds.
///
/// Alpha convention: a transition that internally computes `alpha` uses
/// `alpha = 0` → 100% front (outgoing), `alpha = 1` → 100% rear (incoming).
pub trait VideoTransition: Send + Sync {
    fn mix(&self, front: &VideoFrame, rear: &VideoFrame, pos_ms: i64, dur_ms: i64) -> VideoFrame;
}

/// One subtitle hit: the rasterized image plus its placement rectangle
/// (x, y, w, h) in output pixel coordinates.
pub struct SubtitleHit {
    pub image: VideoFrame,
    pub rect: (i32, i32, u32, u32),
}

pub trait SubtitleTrack: Send + Sync {
    /// Active subtitle clip at `ms`, or `None` if nothing is showing.
    fn clip_at(&self, ms: i64) -> Option<SubtitleHit>;
}

/// External alpha-compositing utility (GPU-backed preferred, software
/// fallback available). Thread-confined: each mixing worker constructs its
/// own.
pub trait Blender: Send + Sync {
    fn blend(&self, base: &mut VideoFrame, overlay: &VideoFrame, x: i32, y: i32, opacity: f32);
}
