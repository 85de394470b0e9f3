// crates/multicut-engine/src/track.rs
//
// VideoTrack: ordered clips + derived overlaps + a dedicated worker thread
// that advances ReadFrameTasks. Mutations land on a staging list and are
// committed (staging -> live, overlaps recomputed) lazily at the top of the
// worker's own loop, never synchronously from the caller's thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::warn;

use multicut_core::clip::{Clip, ClipId, ExtraArgs};
pub use multicut_core::clip::TrackId;
use multicut_core::error::{CoreError, CoreResult};
use multicut_core::frame::VideoFrame;
use multicut_core::helpers::time::frame_idx_to_ms;
use multicut_core::overlap::{has_overlap, Overlap};
use multicut_core::settings::SharedSettings;

use crate::task::{FrameIndex, ReadFrameTask, ReadFrameTaskCallback, SourceRef};

const IDLE_SLEEP: Duration = Duration::from_millis(20);
const PRE_READ_WINDOW: usize = 8;

#[derive(Clone, Debug)]
pub struct ClipSummary {
    pub id: ClipId,
    pub start_ms: i64,
    pub end_ms: i64,
    pub is_image: bool,
}

enum PendingOp {
    Insert(Clip),
    Move { id: ClipId, start_ms: i64 },
    ChangeRange { id: ClipId, start_offset_ms: i64, end_offset_ms: i64 },
    RemoveById(ClipId),
}

struct LiveState {
    clips: Vec<Clip>,
    overlaps: Vec<Overlap>,
    next_overlap_id: i64,
}

/// `a.start < b.end && b.start < a.end` with `a != b` restated as a
/// three-clip sweep: no timeline instant may be covered by more than two
/// ranges.
fn violates_three_way_overlap(ranges: &[(ClipId, i64, i64)]) -> bool {
    let mut events: Vec<(i64, i32)> = Vec::with_capacity(ranges.len() * 2);
    for (_, start, end) in ranges {
        events.push((*start, 1));
        events.push((*end, -1));
    }
    // Ends sort before starts at an equal timestamp (-1 < 1): half-open
    // ranges [start, end) don't overlap at a shared boundary.
    events.sort_unstable();
    let mut depth = 0i32;
    for (_, delta) in events {
        depth += delta;
        if depth > 2 {
            return true;
        }
    }
    false
}

fn two_mut(clips: &mut [Clip], i: usize, j: usize) -> (&mut Clip, &mut Clip) {
    debug_assert_ne!(i, j);
    if i < j {
        let (left, right) = clips.split_at_mut(j);
        (&mut left[i], &mut right[0])
    } else {
        let (left, right) = clips.split_at_mut(i);
        (&mut right[0], &mut left[j])
    }
}

pub struct VideoTrack {
    id: TrackId,
    settings: RwLock<SharedSettings>,
    visible: AtomicBool,
    forward: AtomicBool,
    live: Mutex<LiveState>,
    staging: Mutex<Vec<PendingOp>>,
    clip_changed: AtomicBool,
    pending: Mutex<VecDeque<(bool, Arc<ReadFrameTask>)>>,
    quit: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl VideoTrack {
    fn spawn(id: TrackId, settings: SharedSettings, live: LiveState) -> Arc<Self> {
        let track = Arc::new(Self {
            id,
            settings: RwLock::new(settings),
            visible: AtomicBool::new(true),
            forward: AtomicBool::new(true),
            live: Mutex::new(live),
            staging: Mutex::new(Vec::new()),
            clip_changed: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            quit: AtomicBool::new(false),
            worker: Mutex::new(None),
        });
        let worker_track = Arc::clone(&track);
        let handle = thread::spawn(move || worker_track.run_worker_loop());
        *track.worker.lock().unwrap() = Some(handle);
        track
    }

    pub fn new(id: TrackId, settings: SharedSettings) -> Arc<Self> {
        Self::spawn(id, settings, LiveState { clips: Vec::new(), overlaps: Vec::new(), next_overlap_id: 0 })
    }

    /// Build a track whose live clip list is `clips` up front, overlaps
    /// pre-derived before the worker thread starts. Used by
    /// `CloneAndConfigure`: skips the staging/commit cycle so the clone's
    /// `Duration()` and overlap set are correct the instant this returns.
    pub fn new_with_clips(id: TrackId, settings: SharedSettings, mut clips: Vec<Clip>) -> Arc<Self> {
        clips.sort_by_key(|c| c.start());
        let mut next_overlap_id = 0i64;
        let overlaps = Self::derive_overlaps(&clips, &mut next_overlap_id);
        Self::spawn(id, settings, LiveState { clips, overlaps, next_overlap_id })
    }

    /// Pairwise overlap derivation shared by `commit_staging` and
    /// `new_with_clips`. `next_overlap_id` is threaded through so ids keep
    /// increasing across calls rather than resetting.
    fn derive_overlaps(clips: &[Clip], next_overlap_id: &mut i64) -> Vec<Overlap> {
        let mut overlaps = Vec::new();
        for i in 0..clips.len() {
            for j in (i + 1)..clips.len() {
                if has_overlap(&clips[i], &clips[j]) {
                    *next_overlap_id += 1;
                    overlaps.push(Overlap::new(*next_overlap_id, &clips[i], &clips[j]));
                }
            }
        }
        overlaps
    }

    pub fn id(&self) -> TrackId { self.id }

    pub fn close(&self) {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn run_worker_loop(self: Arc<Self>) {
        while !self.quit.load(Ordering::Acquire) {
            if !self.worker_step() {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }

    // ── Mutation API ─────────────────────────────────────────────────────────

    fn projected_ranges_locked(&self, staging: &[PendingOp]) -> Vec<(ClipId, i64, i64)> {
        let live = self.live.lock().unwrap();
        let mut ranges: Vec<(ClipId, i64, i64)> = live.clips.iter().map(|c| (c.id(), c.start(), c.end())).collect();
        let src_durations: std::collections::HashMap<ClipId, i64> =
            live.clips.iter().map(|c| (c.id(), c.src_duration_ms())).collect();
        drop(live);

        for op in staging {
            match op {
                PendingOp::Insert(c) => ranges.push((c.id(), c.start(), c.end())),
                PendingOp::Move { id, start_ms } => {
                    if let Some(r) = ranges.iter_mut().find(|r| r.0 == *id) {
                        let dur = r.2 - r.1;
                        r.1 = *start_ms;
                        r.2 = *start_ms + dur;
                    }
                }
                PendingOp::ChangeRange { id, start_offset_ms, end_offset_ms } => {
                    if let (Some(r), Some(src)) = (ranges.iter_mut().find(|r| r.0 == *id), src_durations.get(id)) {
                        let new_dur = (src - start_offset_ms - end_offset_ms).max(0);
                        r.2 = r.1 + new_dur;
                    }
                }
                PendingOp::RemoveById(id) => ranges.retain(|r| r.0 != *id),
            }
        }
        ranges
    }

    pub fn insert_clip(&self, clip: Clip) -> CoreResult<()> {
        let mut staging = self.staging.lock().unwrap();
        let mut candidate = self.projected_ranges_locked(&staging);
        candidate.push((clip.id(), clip.start(), clip.end()));
        if violates_three_way_overlap(&candidate) {
            return Err(CoreError::IllegalMutation(format!(
                "clip {} would create a three-way overlap", clip.id()
            )));
        }
        staging.push(PendingOp::Insert(clip));
        self.clip_changed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn move_clip(&self, id: ClipId, start_ms: i64) -> CoreResult<()> {
        if start_ms < 0 {
            return Err(CoreError::BadConfig("clip start must be >= 0".into()));
        }
        let mut staging = self.staging.lock().unwrap();
        let mut candidate = self.projected_ranges_locked(&staging);
        let Some(r) = candidate.iter_mut().find(|r| r.0 == id) else {
            return Err(CoreError::NotFound(format!("clip {id}")));
        };
        let dur = r.2 - r.1;
        r.1 = start_ms;
        r.2 = start_ms + dur;
        if violates_three_way_overlap(&candidate) {
            return Err(CoreError::IllegalMutation(format!(
                "moving clip {id} to {start_ms} would create a three-way overlap"
            )));
        }
        staging.push(PendingOp::Move { id, start_ms });
        self.clip_changed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn change_clip_range(&self, id: ClipId, start_offset_ms: i64, end_offset_ms: i64) -> CoreResult<()> {
        let src_dur = {
            let live = self.live.lock().unwrap();
            live.clips.iter().find(|c| c.id() == id).map(|c| c.src_duration_ms())
        };
        let Some(src_dur) = src_dur else {
            return Err(CoreError::NotFound(format!("clip {id}")));
        };
        let new_dur = src_dur - start_offset_ms - end_offset_ms;
        if new_dur <= 0 {
            return Err(CoreError::BadConfig(format!("clip {id} duration {new_dur} must be > 0")));
        }

        let mut staging = self.staging.lock().unwrap();
        let mut candidate = self.projected_ranges_locked(&staging);
        if let Some(r) = candidate.iter_mut().find(|r| r.0 == id) {
            r.2 = r.1 + new_dur;
        }
        if violates_three_way_overlap(&candidate) {
            return Err(CoreError::IllegalMutation(format!(
                "changing clip {id}'s range would create a three-way overlap"
            )));
        }
        staging.push(PendingOp::ChangeRange { id, start_offset_ms, end_offset_ms });
        self.clip_changed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn remove_clip_by_id(&self, id: ClipId) -> CoreResult<()> {
        let mut staging = self.staging.lock().unwrap();
        staging.push(PendingOp::RemoveById(id));
        self.clip_changed.store(true, Ordering::Release);
        Ok(())
    }

    /// Swap staging into live, re-derive overlaps, sort by start. Invoked
    /// lazily by the worker at the top of its loop, never from a mutation
    /// caller's thread.
    fn commit_staging(&self) {
        let ops: Vec<PendingOp> = {
            let mut staging = self.staging.lock().unwrap();
            std::mem::take(&mut *staging)
        };
        if ops.is_empty() {
            return;
        }
        let mut live = self.live.lock().unwrap();
        for op in ops {
            match op {
                PendingOp::Insert(clip) => live.clips.push(clip),
                PendingOp::Move { id, start_ms } => {
                    if let Some(c) = live.clips.iter_mut().find(|c| c.id() == id) {
                        let _ = c.set_start(start_ms);
                    }
                }
                PendingOp::ChangeRange { id, start_offset_ms, end_offset_ms } => {
                    if let Some(c) = live.clips.iter_mut().find(|c| c.id() == id) {
                        let _ = c.change_range(start_offset_ms, end_offset_ms);
                    }
                }
                PendingOp::RemoveById(id) => live.clips.retain(|c| c.id() != id),
            }
        }
        live.clips.sort_by_key(|c| c.start());

        let mut next_overlap_id = live.next_overlap_id;
        live.overlaps = Self::derive_overlaps(&live.clips, &mut next_overlap_id);
        live.next_overlap_id = next_overlap_id;
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn duration(&self) -> i64 {
        self.live.lock().unwrap().clips.iter().map(|c| c.end()).max().unwrap_or(0)
    }

    pub fn clip_list(&self) -> Vec<ClipSummary> {
        self.live.lock().unwrap().clips.iter()
            .map(|c| ClipSummary { id: c.id(), start_ms: c.start(), end_ms: c.end(), is_image: c.is_image() })
            .collect()
    }

    pub fn overlap_list(&self) -> Vec<Overlap> {
        self.live.lock().unwrap().overlaps.clone()
    }

    pub fn overlap_by_id(&self, id: i64) -> Option<Overlap> {
        self.live.lock().unwrap().overlaps.iter().find(|o| o.id() == id).cloned()
    }

    pub fn set_visible(&self, visible: bool) { self.visible.store(visible, Ordering::Release); }
    pub fn is_visible(&self) -> bool { self.visible.load(Ordering::Acquire) }

    pub fn set_direction(&self, forward: bool) {
        self.forward.store(forward, Ordering::Release);
        let mut live = self.live.lock().unwrap();
        for c in live.clips.iter_mut() {
            c.set_direction(forward);
        }
    }
    pub fn direction(&self) -> bool { self.forward.load(Ordering::Acquire) }

    pub fn update_settings(&self, settings: &SharedSettings) {
        self.settings.write().unwrap().sync_video_fields_from(settings);
        let mut live = self.live.lock().unwrap();
        for clip in live.clips.iter_mut() {
            clip.update_geometry(settings);
        }
    }

    pub fn settings(&self) -> SharedSettings { self.settings.read().unwrap().clone() }

    /// Clone this track (and its clips) against `settings`, used by
    /// `CloneAndConfigure`. Starts no worker thread of its own — caller
    /// wraps the result in `VideoTrack::new`-equivalent bookkeeping if it
    /// needs one, or takes just the clip data.
    pub fn cloned_clips(&self, settings: &SharedSettings) -> Vec<Clip> {
        self.live.lock().unwrap().clips.iter()
            .map(|c| c.cloned_with_settings(settings.clone()))
            .collect()
    }

    fn find_source_ref(&self, timeline_pos: i64) -> SourceRef {
        let live = self.live.lock().unwrap();
        if let Some(ov) = live.overlaps.iter().find(|o| timeline_pos >= o.start() && timeline_pos < o.end()) {
            return SourceRef::Overlap { front: ov.front_id(), rear: ov.rear_id(), overlap_id: ov.id() };
        }
        if let Some(c) = live.clips.iter().find(|c| timeline_pos >= c.start() && timeline_pos < c.end()) {
            return SourceRef::Single(c.id());
        }
        SourceRef::None
    }

    /// Queue a new `ReadFrameTask` for `frame_index`. Evicts a prior tail
    /// task that is itself droppable and has never been started.
    pub fn create_read_frame_task(
        &self,
        frame_index: FrameIndex,
        can_drop: bool,
        need_seek: bool,
        bypass_bg: bool,
        callback: Arc<dyn ReadFrameTaskCallback>,
    ) -> Arc<ReadFrameTask> {
        let timeline_pos = {
            let rate = self.settings.read().unwrap().rate();
            frame_idx_to_ms(frame_index, rate)
        };
        let source = self.find_source_ref(timeline_pos);
        let task = ReadFrameTask::new(frame_index, self.id, source, need_seek, bypass_bg, callback);

        let mut q = self.pending.lock().unwrap();
        if let Some((tail_droppable, tail_task)) = q.back() {
            if *tail_droppable && !tail_task.is_started() {
                q.pop_back();
            }
        }
        q.push_back((can_drop, Arc::clone(&task)));
        task
    }

    // ── Worker loop steps ────────────────────────────────────────────────────

    /// Runs one step of the worker loop; returns `true` if it made progress
    /// (caller should not sleep before trying again).
    pub fn worker_step(&self) -> bool {
        if self.clip_changed.swap(false, Ordering::AcqRel) {
            self.commit_staging();
        }

        // 1. Drop any discarded tasks at the head of the pending queue.
        {
            let mut q = self.pending.lock().unwrap();
            while matches!(q.front(), Some((_, t)) if t.is_discarded()) {
                q.pop_front();
            }
        }

        if let Some(task) = self.first_task_needing_processing() {
            self.advance_processing(&task);
            return true;
        }

        if let Some((droppable, task)) = self.first_task_needing_source(PRE_READ_WINDOW) {
            if !task.is_started() {
                if !task.begin() {
                    let _ = droppable;
                    return true; // discarded by host refusal; progress made
                }
            }
            self.fetch_source(&task);
            return true;
        }

        false
    }

    /// A task is only taken up here once the reader's source-gating worker
    /// has flipped it `SourceReady -> Processing` at the MixFrameTask level;
    /// that division keeps "run the filter chain" a single-writer operation.
    fn first_task_needing_processing(&self) -> Option<Arc<ReadFrameTask>> {
        let q = self.pending.lock().unwrap();
        q.iter()
            .find(|(_, t)| t.is_processing() && t.is_visible() && !t.is_discarded())
            .map(|(_, t)| Arc::clone(t))
    }

    fn first_task_needing_source(&self, window: usize) -> Option<(bool, Arc<ReadFrameTask>)> {
        let q = self.pending.lock().unwrap();
        q.iter()
            .take(window)
            .find(|(_, t)| !t.is_source_frame_ready() && !t.is_discarded())
            .map(|(d, t)| (*d, Arc::clone(t)))
    }

    fn fetch_source(&self, task: &Arc<ReadFrameTask>) {
        let rate = self.settings.read().unwrap().rate();
        let timeline_pos = frame_idx_to_ms(task.frame_index(), rate);

        if task.needs_seek() {
            let mut live = self.live.lock().unwrap();
            for c in live.clips.iter_mut() {
                let local = timeline_pos - c.start();
                c.seek_to(local);
            }
        }

        let (f0_done, f1_done) = {
            let (a, b) = task.source_frames();
            (a.is_some(), b.is_some())
        };
        let mut live = self.live.lock().unwrap();
        match task.source().clone() {
            SourceRef::None => task.set_source_frame(0, None),
            SourceRef::Single(id) => {
                if !f0_done {
                    if let Some(c) = live.clips.iter_mut().find(|c| c.id() == id) {
                        let local = timeline_pos - c.start();
                        let (frame, _eof) = c.read_source_frame(local, false);
                        if frame.is_some() {
                            task.set_source_frame(0, frame);
                        }
                    }
                }
            }
            SourceRef::Overlap { front, rear, .. } => {
                if !f0_done {
                    if let Some(c) = live.clips.iter_mut().find(|c| c.id() == front) {
                        let local = timeline_pos - c.start();
                        let (frame, _eof) = c.read_source_frame(local, false);
                        if frame.is_some() {
                            task.set_source_frame(0, frame);
                        }
                    }
                }
                if !f1_done {
                    if let Some(c) = live.clips.iter_mut().find(|c| c.id() == rear) {
                        let local = timeline_pos - c.start();
                        let (frame, _eof) = c.read_source_frame(local, false);
                        if frame.is_some() {
                            task.set_source_frame(1, frame);
                        }
                    }
                }
            }
        }
    }

    fn advance_processing(&self, task: &Arc<ReadFrameTask>) {
        let settings = self.settings.read().unwrap().clone();
        let rate = settings.rate();
        let timeline_pos = frame_idx_to_ms(task.frame_index(), rate);
        let extra = ExtraArgs { bypass_bg_node: task.bypass_bg() };
        let mut frames_out = Vec::new();

        let output = {
            let mut live = self.live.lock().unwrap();
            match task.source().clone() {
                SourceRef::None => {
                    VideoFrame::transparent(settings.width(), settings.height(), settings.element_type(), timeline_pos)
                }
                SourceRef::Single(id) => {
                    let (raw, _) = task.source_frames();
                    let clip = live.clips.iter_mut().find(|c| c.id() == id);
                    match (clip, raw) {
                        (Some(c), Some(frame)) => {
                            let local = timeline_pos - c.start();
                            c.process_source_frame(local, &mut frames_out, frame, &extra)
                        }
                        _ => VideoFrame::transparent(settings.width(), settings.height(), settings.element_type(), timeline_pos),
                    }
                }
                SourceRef::Overlap { front, rear, overlap_id } => {
                    let (f0, f1) = task.source_frames();
                    let front_idx = live.clips.iter().position(|c| c.id() == front);
                    let rear_idx = live.clips.iter().position(|c| c.id() == rear);
                    let blank = || VideoFrame::transparent(settings.width(), settings.height(), settings.element_type(), timeline_pos);

                    match (front_idx, rear_idx) {
                        (Some(fi), Some(ri)) => {
                            let (front_clip, rear_clip) = two_mut(&mut live.clips, fi, ri);
                            let front_local = timeline_pos - front_clip.start();
                            let rear_local = timeline_pos - rear_clip.start();
                            let front_out = match f0 {
                                Some(frame) => front_clip.process_source_frame(front_local, &mut frames_out, frame, &extra),
                                None => blank(),
                            };
                            let rear_out = match f1 {
                                Some(frame) => rear_clip.process_source_frame(rear_local, &mut frames_out, frame, &extra),
                                None => blank(),
                            };
                            match live.overlaps.iter().find(|o| o.id() == overlap_id) {
                                Some(ov) => ov.process_source_frame(timeline_pos, &mut frames_out, front_out, rear_out),
                                None => {
                                    warn!(overlap_id, "overlap vanished mid-processing, falling back to front frame");
                                    front_out
                                }
                            }
                        }
                        _ => blank(),
                    }
                }
            }
        };

        task.complete_processing(output, frames_out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multicut_core::collaborators::ClipSourceReader;
    use multicut_core::settings::{ElementType, Rational};

    struct NullReader;
    impl ClipSourceReader for NullReader {
        fn seek_to(&mut self, _: i64) {}
        fn notify_read_pos(&mut self, _: i64) {}
        fn set_direction(&mut self, _: bool) {}
        fn read_source_frame(&mut self, _: i64, _: bool) -> (Option<VideoFrame>, bool) {
            (Some(VideoFrame::transparent(4, 4, ElementType::I8, 0)), false)
        }
        fn clone_box(&self) -> Box<dyn ClipSourceReader> { Box::new(NullReader) }
    }

    fn settings() -> SharedSettings {
        SharedSettings::new(4, 4, Rational::new(30, 1), ElementType::I8).unwrap()
    }

    fn clip(id: i64, start: i64, dur: i64) -> Clip {
        Clip::new_video(id, start, dur, 0, 0, settings(), Box::new(NullReader)).unwrap()
    }

    fn track() -> Arc<VideoTrack> {
        VideoTrack::new(1, settings())
    }

    #[test]
    fn insert_then_commit_is_visible_after_worker_step() {
        let t = track();
        t.insert_clip(clip(1, 0, 1000)).unwrap();
        t.worker_step();
        assert_eq!(t.clip_list().len(), 1);
        t.close();
    }

    #[test]
    fn three_way_overlap_is_rejected_and_state_is_unchanged() {
        let t = track();
        t.insert_clip(clip(1, 0, 1000)).unwrap();
        t.insert_clip(clip(2, 400, 1000)).unwrap();
        t.worker_step();
        let before = t.clip_list().len();
        let err = t.insert_clip(clip(3, 500, 100)).unwrap_err();
        assert!(matches!(err, CoreError::IllegalMutation(_)));
        t.worker_step();
        assert_eq!(t.clip_list().len(), before);
        t.close();
    }

    #[test]
    fn overlap_is_derived_on_commit() {
        let t = track();
        t.insert_clip(clip(1, 0, 1000)).unwrap();
        t.insert_clip(clip(2, 700, 1000)).unwrap();
        t.worker_step();
        let overlaps = t.overlap_list();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].start(), 700);
        t.close();
    }

    #[test]
    fn create_read_frame_task_resolves_source_ref() {
        let t = track();
        t.insert_clip(clip(1, 0, 1000)).unwrap();
        t.worker_step();

        struct NullCallback;
        impl ReadFrameTaskCallback for NullCallback {
            fn trigger_drop(&self) -> bool { true }
            fn trigger_start(&self) -> bool { true }
            fn update_output_frames(&self, _: Vec<multicut_core::frame::CorrelativeFrame>) {}
        }
        let task = t.create_read_frame_task(0, true, false, false, Arc::new(NullCallback));
        assert!(matches!(task.source(), SourceRef::Single(1)));
        t.close();
    }

    #[test]
    fn move_clip_rejects_missing_id() {
        let t = track();
        let err = t.move_clip(99, 0).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        t.close();
    }
}
