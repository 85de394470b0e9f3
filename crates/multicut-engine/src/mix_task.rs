// crates/multicut-engine/src/mix_task.rs
//
// MixFrameTask: the per-output-frame aggregation of every track's
// ReadFrameTask at one frame index. The 2-bit DROP/START state is the one
// place in this crate that genuinely wants a lock-free compare-exchange —
// cancel and commit must be mutually exclusive and idempotent without
// taking a lock on the hot path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use multicut_core::frame::{CorrelativeFrame, CorrelativeKey, VideoFrame};

use multicut_core::clip::TrackId;

use crate::task::{FrameIndex, ReadFrameTask, ReadFrameTaskCallback};
use std::sync::Arc;

const NONE: u8 = 0;
const DROP: u8 = 0b01;
const START: u8 = 0b10;

pub struct MixFrameTask {
    frame_index: FrameIndex,
    state: AtomicU8,
    sub_tasks: Mutex<Vec<(TrackId, Arc<ReadFrameTask>)>>,
    correlatives: Mutex<HashMap<CorrelativeKey, CorrelativeFrame>>,
    output_frame: Mutex<Option<VideoFrame>>,
    output_ready: std::sync::atomic::AtomicBool,
    processing_started: std::sync::atomic::AtomicBool,
}

impl MixFrameTask {
    pub fn new(frame_index: FrameIndex) -> Arc<Self> {
        Arc::new(Self {
            frame_index,
            state: AtomicU8::new(NONE),
            sub_tasks: Mutex::new(Vec::new()),
            correlatives: Mutex::new(HashMap::new()),
            output_frame: Mutex::new(None),
            output_ready: std::sync::atomic::AtomicBool::new(false),
            processing_started: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn frame_index(&self) -> FrameIndex { self.frame_index }

    pub fn add_sub_task(&self, track_id: TrackId, task: Arc<ReadFrameTask>) {
        self.sub_tasks.lock().unwrap().push((track_id, task));
    }

    pub fn sub_tasks(&self) -> Vec<(TrackId, Arc<ReadFrameTask>)> {
        self.sub_tasks.lock().unwrap().clone()
    }

    /// `∀ sub-task, sub-task.output_ready ∨ sub-task.discarded`.
    pub fn all_sub_tasks_done(&self) -> bool {
        self.sub_tasks.lock().unwrap().iter()
            .all(|(_, t)| t.is_output_frame_ready() || t.is_discarded())
    }

    /// Every sub-task has fetched its source frame(s) and is not discarded —
    /// the gate Worker-A waits on before flipping sub-tasks to `Processing`.
    pub fn all_sources_ready(&self) -> bool {
        self.sub_tasks.lock().unwrap().iter()
            .all(|(_, t)| t.is_source_frame_ready() || t.is_discarded())
    }

    /// One-shot gate so Worker-A only calls `StartProcessing` on each
    /// sub-task once per mix task. Returns `true` the first time, `false`
    /// on every later call.
    pub fn mark_processing_started(&self) -> bool {
        !self.processing_started.swap(true, Ordering::AcqRel)
    }

    pub fn is_output_ready(&self) -> bool { self.output_ready.load(Ordering::Acquire) }

    pub fn set_output(&self, frame: VideoFrame) {
        *self.output_frame.lock().unwrap() = Some(frame);
        self.output_ready.store(true, Ordering::Release);
    }

    pub fn output_frame(&self) -> Option<VideoFrame> {
        self.output_frame.lock().unwrap().clone()
    }

    /// Force a re-composition on the next Worker-B pass. Used by
    /// `RefreshTrackView`, which also `Reprocess()`es the affected
    /// sub-tasks before calling this — the stale `output_frame` is left in
    /// place until `compose` overwrites it.
    pub fn mark_not_output_ready(&self) {
        self.output_ready.store(false, Ordering::Release);
    }

    pub fn correlatives(&self) -> Vec<CorrelativeFrame> {
        self.correlatives.lock().unwrap().values().cloned().collect()
    }

    /// Discard every sub-task. Used by cache eviction; does not itself clear
    /// `output_frame` since a discarded task may still be read once more
    /// before it's dropped from the active list.
    pub fn discard_all_sub_tasks(&self) {
        for (_, t) in self.sub_tasks.lock().unwrap().iter() {
            t.set_discarded();
        }
    }

    pub fn is_dropped(&self) -> bool { self.state.load(Ordering::Acquire) == DROP }
    pub fn is_started_commit(&self) -> bool { self.state.load(Ordering::Acquire) == START }
}

impl ReadFrameTaskCallback for MixFrameTask {
    fn trigger_drop(&self) -> bool {
        self.state
            .compare_exchange(NONE, DROP, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || self.state.load(Ordering::Acquire) == DROP
    }

    fn trigger_start(&self) -> bool {
        self.state
            .compare_exchange(NONE, START, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || self.state.load(Ordering::Acquire) == START
    }

    fn update_output_frames(&self, frames: Vec<CorrelativeFrame>) {
        let mut map = self.correlatives.lock().unwrap();
        for f in frames {
            map.insert(f.key(), f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_drop_and_start_are_mutually_exclusive() {
        let t = MixFrameTask::new(0);
        assert!(t.trigger_drop());
        assert!(t.trigger_drop(), "repeat trigger_drop is a no-op success");
        assert!(!t.trigger_start(), "start must fail once drop has won");
        assert!(t.is_dropped());
    }

    #[test]
    fn trigger_start_wins_when_first() {
        let t = MixFrameTask::new(0);
        assert!(t.trigger_start());
        assert!(!t.trigger_drop());
        assert!(t.is_started_commit());
    }

    #[test]
    fn update_output_frames_dedups_by_key() {
        let t = MixFrameTask::new(0);
        let frame = VideoFrame::transparent(2, 2, multicut_core::settings::ElementType::I8, 0);
        let cf = CorrelativeFrame {
            phase: multicut_core::frame::Phase::Source,
            clip_id: Some(1),
            track_id: Some(1),
            image: frame,
        };
        t.update_output_frames(vec![cf.clone()]);
        t.update_output_frames(vec![cf]);
        assert_eq!(t.correlatives().len(), 1);
    }

    #[test]
    fn mark_processing_started_fires_once() {
        let t = MixFrameTask::new(0);
        assert!(t.mark_processing_started());
        assert!(!t.mark_processing_started());
        assert!(!t.mark_processing_started());
    }

    #[test]
    fn all_sources_ready_is_true_with_no_sub_tasks() {
        let t = MixFrameTask::new(0);
        assert!(t.all_sources_ready());
    }
}
