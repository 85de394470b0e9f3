// crates/multicut-engine/src/task.rs
//
// ReadFrameTask: one track's unit of work to produce one output frame.
// State is guarded by an ordinary Mutex rather than a lock-free machine —
// the only true atomics in this crate live on MixFrameTask (see mix_task.rs).

use std::sync::{Arc, Mutex};

use multicut_core::clip::{ClipId, TrackId};
use multicut_core::frame::{CorrelativeFrame, VideoFrame};

pub type FrameIndex = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    New,
    Started,
    SourceReady,
    Processing,
    OutputReady,
    Discarded,
}

/// What a task needs from the clip/overlap layer to produce its frame.
/// Resolved once, at creation time, from the track's clip/overlap iterators.
#[derive(Clone, Debug)]
pub enum SourceRef {
    /// No clip covers this instant — output is a transparent frame.
    None,
    /// Inside exactly one clip, outside any overlap.
    Single(ClipId),
    /// Inside an overlap: front clip, rear clip, owning overlap id.
    Overlap { front: ClipId, rear: ClipId, overlap_id: i64 },
}

/// Narrow callback into the task's host `MixFrameTask`, implemented there.
/// `trigger_drop`/`trigger_start` gate the host's mutually-exclusive 2-bit
/// state; `update_output_frames` merges this task's correlatives into the
/// host's collection.
pub trait ReadFrameTaskCallback: Send + Sync {
    fn trigger_drop(&self) -> bool;
    fn trigger_start(&self) -> bool;
    fn update_output_frames(&self, frames: Vec<CorrelativeFrame>);
}

struct Inner {
    state: TaskState,
    visible: bool,
    source_frames: (Option<VideoFrame>, Option<VideoFrame>),
    output_frame: Option<VideoFrame>,
    correlatives: Vec<CorrelativeFrame>,
}

pub struct ReadFrameTask {
    frame_index: FrameIndex,
    track_id: TrackId,
    source: SourceRef,
    need_seek: bool,
    bypass_bg: bool,
    callback: Arc<dyn ReadFrameTaskCallback>,
    inner: Mutex<Inner>,
}

impl ReadFrameTask {
    pub fn new(
        frame_index: FrameIndex,
        track_id: TrackId,
        source: SourceRef,
        need_seek: bool,
        bypass_bg: bool,
        callback: Arc<dyn ReadFrameTaskCallback>,
    ) -> Arc<Self> {
        Arc::new(Self {
            frame_index,
            track_id,
            source,
            need_seek,
            bypass_bg,
            callback,
            inner: Mutex::new(Inner {
                state: TaskState::New,
                visible: true,
                source_frames: (None, None),
                output_frame: None,
                correlatives: Vec::new(),
            }),
        })
    }

    pub fn frame_index(&self) -> FrameIndex { self.frame_index }
    pub fn track_id(&self) -> TrackId { self.track_id }
    pub fn source(&self) -> &SourceRef { &self.source }
    pub fn needs_seek(&self) -> bool { self.need_seek }
    pub fn bypass_bg(&self) -> bool { self.bypass_bg }

    pub fn is_started(&self) -> bool {
        !matches!(self.inner.lock().unwrap().state, TaskState::New)
    }
    pub fn is_source_frame_ready(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().state,
            TaskState::SourceReady | TaskState::Processing | TaskState::OutputReady
        )
    }
    pub fn is_output_frame_ready(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, TaskState::OutputReady)
    }
    pub fn is_processing(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, TaskState::Processing)
    }
    pub fn is_discarded(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, TaskState::Discarded)
    }
    pub fn is_visible(&self) -> bool { self.inner.lock().unwrap().visible }
    pub fn set_visible(&self, visible: bool) { self.inner.lock().unwrap().visible = visible; }

    /// First touch of this task: gate through the host's `TriggerStart`.
    /// No-op (returns true) if already past `New`. On host refusal, the
    /// task transitions straight to `Discarded` and the host is informed
    /// via `trigger_drop`.
    pub fn begin(&self) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.state, TaskState::New) {
                return true;
            }
            if self.callback.trigger_start() {
                inner.state = TaskState::Started;
                return true;
            }
            inner.state = TaskState::Discarded;
        }
        self.callback.trigger_drop();
        false
    }

    /// Universal cancel token. Idempotent: a second call is a no-op.
    pub fn set_discarded(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, TaskState::Discarded) {
            inner.state = TaskState::Discarded;
        }
    }

    /// Record a fetched source frame. `slot` is 0 for the single-clip or
    /// front-overlap position, 1 for the rear-overlap position. Moves to
    /// `SourceReady` once every slot `source` requires is filled.
    pub fn set_source_frame(&self, slot: usize, frame: Option<VideoFrame>) {
        let mut inner = self.inner.lock().unwrap();
        match slot {
            0 => inner.source_frames.0 = frame,
            _ => inner.source_frames.1 = frame,
        }
        let ready = match &self.source {
            SourceRef::None => true,
            SourceRef::Single(_) => inner.source_frames.0.is_some(),
            SourceRef::Overlap { .. } => inner.source_frames.0.is_some() && inner.source_frames.1.is_some(),
        };
        if ready && matches!(inner.state, TaskState::Started) {
            inner.state = TaskState::SourceReady;
        }
    }

    pub fn source_frames(&self) -> (Option<VideoFrame>, Option<VideoFrame>) {
        self.inner.lock().unwrap().source_frames.clone()
    }

    /// `SourceReady -> Processing`. No-op if not currently `SourceReady`.
    pub fn start_processing(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, TaskState::SourceReady) {
            inner.state = TaskState::Processing;
            true
        } else {
            false
        }
    }

    /// `Processing -> OutputReady`, stamping the produced frame and merging
    /// correlatives up to the host.
    pub fn complete_processing(&self, frame: VideoFrame, correlatives: Vec<CorrelativeFrame>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.output_frame = Some(frame);
            inner.correlatives.extend(correlatives.iter().cloned());
            inner.state = TaskState::OutputReady;
        }
        self.callback.update_output_frames(correlatives);
    }

    /// `OutputReady -> Processing`, explicit reprocessing request. Clears
    /// the previous output.
    pub fn reprocess(&self) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, TaskState::OutputReady) {
            inner.output_frame = None;
            inner.state = TaskState::Processing;
        }
    }

    pub fn video_frame(&self) -> Option<VideoFrame> {
        self.inner.lock().unwrap().output_frame.clone()
    }

    pub fn correlatives(&self) -> Vec<CorrelativeFrame> {
        self.inner.lock().unwrap().correlatives.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysAllow(AtomicBool);
    impl ReadFrameTaskCallback for AlwaysAllow {
        fn trigger_drop(&self) -> bool { true }
        fn trigger_start(&self) -> bool { self.0.load(Ordering::Relaxed) }
        fn update_output_frames(&self, _frames: Vec<CorrelativeFrame>) {}
    }

    #[test]
    fn begin_refused_discards_task() {
        let cb = Arc::new(AlwaysAllow(AtomicBool::new(false)));
        let task = ReadFrameTask::new(0, 1, SourceRef::None, false, false, cb);
        assert!(!task.begin());
        assert!(task.is_discarded());
    }

    #[test]
    fn begin_then_single_source_frame_reaches_ready() {
        let cb = Arc::new(AlwaysAllow(AtomicBool::new(true)));
        let task = ReadFrameTask::new(0, 1, SourceRef::Single(7), false, false, cb);
        assert!(task.begin());
        assert!(task.is_started());
        assert!(!task.is_source_frame_ready());
        task.set_source_frame(0, None);
        assert!(task.is_source_frame_ready());
    }

    #[test]
    fn overlap_source_needs_both_slots() {
        let cb = Arc::new(AlwaysAllow(AtomicBool::new(true)));
        let task = ReadFrameTask::new(0, 1, SourceRef::Overlap { front: 1, rear: 2, overlap_id: 1 }, false, false, cb);
        task.begin();
        task.set_source_frame(0, None);
        assert!(!task.is_source_frame_ready());
        task.set_source_frame(1, None);
        assert!(task.is_source_frame_ready());
    }

    #[test]
    fn set_discarded_is_idempotent() {
        let cb = Arc::new(AlwaysAllow(AtomicBool::new(true)));
        let task = ReadFrameTask::new(0, 1, SourceRef::None, false, false, cb);
        task.set_discarded();
        task.set_discarded();
        assert!(task.is_discarded());
    }
}
