// crates/multicut-engine/src/reader.rs
//
// MultiTrackReader: the public facade. Owns the track list (Z-order,
// index 0 = bottom), the frame-index timeline, and the two mixing worker
// threads (source gating, then mix/compose) that sit above the per-track
// workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::warn;

use multicut_core::clip::{Clip, ClipId, TrackId};
use multicut_core::collaborators::{Blender, SubtitleTrack};
use multicut_core::error::{CoreError, CoreResult};
use multicut_core::frame::{CorrelativeFrame, Phase, VideoFrame};
use multicut_core::helpers::time::{frame_idx_to_ms, ms_to_frame_idx, RoundMode};
use multicut_core::overlap::Overlap;
use multicut_core::settings::SharedSettings;

use crate::blend::SoftwareBlender;
use crate::cache::{cap_window, evict_behind_cursor, evict_seeking};
use crate::mix_task::MixFrameTask;
use crate::task::ReadFrameTaskCallback;
use crate::track::{ClipSummary, VideoTrack};

const IDLE_SLEEP: Duration = Duration::from_millis(20);
const DEFAULT_CACHE_FRAME_NUM: usize = 1;

pub struct ReadResult {
    pub frame: VideoFrame,
    pub eof: bool,
    pub correlatives: Vec<CorrelativeFrame>,
}

struct TrackEntry {
    id: TrackId,
    track: Arc<VideoTrack>,
}

pub struct MultiTrackReader {
    settings: RwLock<SharedSettings>,
    started: AtomicBool,
    next_track_id: AtomicI64,
    tracks: RwLock<Vec<TrackEntry>>,
    blender: Arc<dyn Blender>,
    subtitle_tracks: RwLock<Vec<Arc<dyn SubtitleTrack>>>,

    read_frame_idx: AtomicI64,
    forward: AtomicBool,
    in_seeking: AtomicBool,
    seek_target_idx: AtomicI64,
    cache_frame_num: AtomicUsize,

    mix_tasks: Mutex<VecDeque<Arc<MixFrameTask>>>,
    seeking_tasks: Mutex<VecDeque<Arc<MixFrameTask>>>,
    seeking_flash: Mutex<Option<Arc<MixFrameTask>>>,

    last_error: Mutex<Option<String>>,
    quit: AtomicBool,
    worker_a: Mutex<Option<thread::JoinHandle<()>>>,
    worker_b: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MultiTrackReader {
    /// Construct an unconfigured, unstarted reader with the software
    /// fallback blender. Use `with_blender` to supply a GPU-backed one.
    pub fn new() -> Arc<Self> {
        Self::with_blender(Arc::new(SoftwareBlender))
    }

    pub fn with_blender(blender: Arc<dyn Blender>) -> Arc<Self> {
        Arc::new(Self {
            settings: RwLock::new(
                SharedSettings::new(1, 1, multicut_core::settings::Rational::new(30, 1), multicut_core::settings::ElementType::I8)
                    .expect("1x1@30fps is always a valid placeholder configuration"),
            ),
            started: AtomicBool::new(false),
            next_track_id: AtomicI64::new(1),
            tracks: RwLock::new(Vec::new()),
            blender,
            subtitle_tracks: RwLock::new(Vec::new()),
            read_frame_idx: AtomicI64::new(0),
            forward: AtomicBool::new(true),
            in_seeking: AtomicBool::new(false),
            seek_target_idx: AtomicI64::new(0),
            cache_frame_num: AtomicUsize::new(DEFAULT_CACHE_FRAME_NUM),
            mix_tasks: Mutex::new(VecDeque::new()),
            seeking_tasks: Mutex::new(VecDeque::new()),
            seeking_flash: Mutex::new(None),
            last_error: Mutex::new(None),
            quit: AtomicBool::new(false),
            worker_a: Mutex::new(None),
            worker_b: Mutex::new(None),
        })
    }

    fn fail(&self, err: CoreError) -> CoreError {
        *self.last_error.lock().unwrap() = Some(err.to_string());
        err
    }

    pub fn last_error(&self) -> Option<String> { self.last_error.lock().unwrap().clone() }

    // ── Configuration / lifecycle ────────────────────────────────────────────

    pub fn configure(&self, settings: SharedSettings) -> CoreResult<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(self.fail(CoreError::BadConfig("cannot reconfigure a started reader".into())));
        }
        *self.settings.write().unwrap() = settings;
        Ok(())
    }

    pub fn start(self: &Arc<Self>) -> CoreResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.quit.store(false, Ordering::Release);
        let a = Arc::clone(self);
        let b = Arc::clone(self);
        *self.worker_a.lock().unwrap() = Some(thread::spawn(move || a.run_worker_a()));
        *self.worker_b.lock().unwrap() = Some(thread::spawn(move || b.run_worker_b()));
        Ok(())
    }

    pub fn close(&self) {
        self.quit.store(true, Ordering::Release);
        if let Some(h) = self.worker_a.lock().unwrap().take() { let _ = h.join(); }
        if let Some(h) = self.worker_b.lock().unwrap().take() { let _ = h.join(); }
        for entry in self.tracks.read().unwrap().iter() {
            entry.track.close();
        }
        self.mix_tasks.lock().unwrap().clear();
        self.seeking_tasks.lock().unwrap().clear();
        *self.seeking_flash.lock().unwrap() = None;
        self.started.store(false, Ordering::Release);
    }

    fn require_started(&self) -> CoreResult<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(self.fail(CoreError::NotStarted))
        }
    }

    /// Geometry-only settings change. Rejects any change to rate, color
    /// format, or element type while workers are live.
    pub fn update_settings(&self, new_settings: SharedSettings) -> CoreResult<()> {
        let mut current = self.settings.write().unwrap();
        if new_settings.rate() != current.rate()
            || new_settings.color_format() != current.color_format()
            || new_settings.element_type() != current.element_type()
        {
            return Err(self.fail(CoreError::BadConfig(
                "rate/color-format/element-type cannot change on a live reader".into(),
            )));
        }
        current.sync_video_fields_from(&new_settings);
        let synced = current.clone();
        drop(current);
        for entry in self.tracks.read().unwrap().iter() {
            entry.track.update_settings(&synced);
        }
        Ok(())
    }

    pub fn get_cache_frame_num(&self) -> usize { self.cache_frame_num.load(Ordering::Acquire) }
    pub fn set_cache_frame_num(&self, n: usize) { self.cache_frame_num.store(n.max(1), Ordering::Release); }

    /// Re-seeks to the current read position, forcing a fresh mix-task
    /// build at the cursor. `update_duration` is accepted for API parity;
    /// this port's `duration()` always recomputes live so there is no
    /// cached value to refresh.
    pub fn refresh(&self, _update_duration: bool) -> CoreResult<()> {
        self.require_started()?;
        let idx = self.read_frame_idx.load(Ordering::Acquire);
        self.seek_to_by_idx(idx, false);
        Ok(())
    }

    /// Forces the affected tracks' already-built mix tasks to recompose:
    /// calls `Reprocess()` on every sub-task belonging to `track_ids`, then
    /// marks the owning mix task not output-ready so Worker-B re-composes it.
    pub fn refresh_track_view(&self, track_ids: &[TrackId]) -> CoreResult<()> {
        self.require_started()?;
        let tasks = self.mix_tasks.lock().unwrap();
        for task in tasks.iter() {
            let mut found = false;
            for (track_id, sub) in task.sub_tasks() {
                if track_ids.contains(&track_id) {
                    found = true;
                    sub.reprocess();
                }
            }
            if found {
                task.mark_not_output_ready();
            }
        }
        Ok(())
    }

    // ── Track management ─────────────────────────────────────────────────────

    /// `insert_after`: `-1` appends at the tail (top of the Z-order), `-2`
    /// inserts at the head (bottom).
    pub fn add_track(&self, insert_after: i64) -> CoreResult<TrackId> {
        let id = self.next_track_id.fetch_add(1, Ordering::AcqRel);
        let settings = self.settings.read().unwrap().clone();
        let track = VideoTrack::new(id, settings);
        let mut tracks = self.tracks.write().unwrap();
        let entry = TrackEntry { id, track };
        if insert_after == -2 {
            tracks.insert(0, entry);
        } else if insert_after == -1 {
            tracks.push(entry);
        } else {
            match tracks.iter().position(|e| e.id == insert_after) {
                Some(pos) => tracks.insert(pos + 1, entry),
                None => return Err(self.fail(CoreError::NotFound(format!("track {insert_after}")))),
            }
        }
        Ok(id)
    }

    pub fn remove_track_by_id(&self, id: TrackId) -> CoreResult<()> {
        let mut tracks = self.tracks.write().unwrap();
        let pos = tracks.iter().position(|e| e.id == id)
            .ok_or_else(|| self.fail(CoreError::NotFound(format!("track {id}"))))?;
        let entry = tracks.remove(pos);
        entry.track.close();
        Ok(())
    }

    pub fn remove_track_by_index(&self, index: usize) -> CoreResult<()> {
        let mut tracks = self.tracks.write().unwrap();
        if index >= tracks.len() {
            return Err(self.fail(CoreError::NotFound(format!("track index {index}"))));
        }
        let entry = tracks.remove(index);
        entry.track.close();
        Ok(())
    }

    pub fn change_track_view_order(&self, id: TrackId, new_index: usize) -> CoreResult<()> {
        let mut tracks = self.tracks.write().unwrap();
        let pos = tracks.iter().position(|e| e.id == id)
            .ok_or_else(|| self.fail(CoreError::NotFound(format!("track {id}"))))?;
        let entry = tracks.remove(pos);
        let idx = new_index.min(tracks.len());
        tracks.insert(idx, entry);
        Ok(())
    }

    pub fn set_track_visible(&self, id: TrackId, visible: bool) -> CoreResult<()> {
        self.with_track(id, |t| t.set_visible(visible))
    }

    pub fn is_track_visible(&self, id: TrackId) -> CoreResult<bool> {
        self.with_track(id, |t| t.is_visible())
    }

    fn with_track<R>(&self, id: TrackId, f: impl FnOnce(&VideoTrack) -> R) -> CoreResult<R> {
        let tracks = self.tracks.read().unwrap();
        tracks.iter().find(|e| e.id == id)
            .map(|e| f(&e.track))
            .ok_or_else(|| self.fail(CoreError::NotFound(format!("track {id}"))))
    }

    pub fn insert_clip(&self, track_id: TrackId, clip: Clip) -> CoreResult<()> {
        self.with_track(track_id, |t| t.insert_clip(clip))?
    }

    pub fn move_clip(&self, track_id: TrackId, clip_id: ClipId, start_ms: i64) -> CoreResult<()> {
        self.with_track(track_id, |t| t.move_clip(clip_id, start_ms))?
    }

    pub fn change_clip_range(&self, track_id: TrackId, clip_id: ClipId, start_offset_ms: i64, end_offset_ms: i64) -> CoreResult<()> {
        self.with_track(track_id, |t| t.change_clip_range(clip_id, start_offset_ms, end_offset_ms))?
    }

    pub fn remove_clip_by_id(&self, track_id: TrackId, clip_id: ClipId) -> CoreResult<()> {
        self.with_track(track_id, |t| t.remove_clip_by_id(clip_id))?
    }

    pub fn get_clip_list(&self, track_id: TrackId) -> CoreResult<Vec<ClipSummary>> {
        self.with_track(track_id, |t| t.clip_list())
    }

    pub fn get_overlap_list(&self, track_id: TrackId) -> CoreResult<Vec<Overlap>> {
        self.with_track(track_id, |t| t.overlap_list())
    }

    pub fn get_overlap_by_id(&self, track_id: TrackId, overlap_id: i64) -> CoreResult<Option<Overlap>> {
        self.with_track(track_id, |t| t.overlap_by_id(overlap_id))
    }

    /// Longest of any track's derived duration.
    pub fn duration(&self) -> i64 {
        self.tracks.read().unwrap().iter().map(|e| e.track.duration()).max().unwrap_or(0)
    }

    // ── Clone ────────────────────────────────────────────────────────────────

    /// `CloneAndConfigure`: a fully independent reader at `settings` sharing
    /// no mutable state with `self`. Clones each track's clips, rebuilds the
    /// overlap set, snapshots the subtitle tracks, and starts fresh worker
    /// threads — `Duration()` and every clip id are preserved.
    pub fn clone_and_configure(&self, settings: SharedSettings) -> Arc<Self> {
        let clone = Self::with_blender(Arc::clone(&self.blender));
        *clone.settings.write().unwrap() = settings.clone();
        clone.next_track_id.store(self.next_track_id.load(Ordering::Acquire), Ordering::Release);
        clone.cache_frame_num.store(self.cache_frame_num.load(Ordering::Acquire), Ordering::Release);
        clone.forward.store(self.forward.load(Ordering::Acquire), Ordering::Release);
        clone.read_frame_idx.store(self.read_frame_idx.load(Ordering::Acquire), Ordering::Release);

        let mut cloned_tracks = Vec::new();
        for entry in self.tracks.read().unwrap().iter() {
            let clips = entry.track.cloned_clips(&settings);
            let track = VideoTrack::new_with_clips(entry.id, settings.clone(), clips);
            track.set_visible(entry.track.is_visible());
            track.set_direction(entry.track.direction());
            cloned_tracks.push(TrackEntry { id: entry.id, track });
        }
        *clone.tracks.write().unwrap() = cloned_tracks;
        *clone.subtitle_tracks.write().unwrap() = self.subtitle_tracks.read().unwrap().clone();

        let _ = clone.start();
        clone
    }

    // ── Subtitle tracks ──────────────────────────────────────────────────────

    pub fn add_subtitle_track(&self, track: Arc<dyn SubtitleTrack>) {
        self.subtitle_tracks.write().unwrap().push(track);
    }

    pub fn remove_subtitle_track(&self, index: usize) -> CoreResult<()> {
        let mut tracks = self.subtitle_tracks.write().unwrap();
        if index >= tracks.len() {
            return Err(self.fail(CoreError::NotFound(format!("subtitle track index {index}"))));
        }
        tracks.remove(index);
        Ok(())
    }

    // ── Direction / timeline ─────────────────────────────────────────────────

    pub fn ms_to_frame_idx(&self, ms: i64, mode: RoundMode) -> i64 {
        ms_to_frame_idx(ms, self.settings.read().unwrap().rate(), mode)
    }

    pub fn frame_idx_to_ms(&self, idx: i64) -> i64 {
        frame_idx_to_ms(idx, self.settings.read().unwrap().rate())
    }

    /// Toggles direction on every track and re-seeds the task queue from
    /// `pos` (or the current cursor if `pos` is `None`) with the matching
    /// step.
    pub fn set_direction(&self, forward: bool, pos: Option<i64>) {
        self.forward.store(forward, Ordering::Release);
        for entry in self.tracks.read().unwrap().iter() {
            entry.track.set_direction(forward);
        }
        let idx = pos.map(|p| self.ms_to_frame_idx(p, RoundMode::Nearest))
            .unwrap_or_else(|| self.read_frame_idx.load(Ordering::Acquire));
        self.read_frame_idx.store(idx, Ordering::Release);
        self.mix_tasks.lock().unwrap().clear();
    }

    pub fn direction(&self) -> bool { self.forward.load(Ordering::Acquire) }

    pub fn seek_to(&self, pos_ms: i64, _force: bool) {
        let idx = self.ms_to_frame_idx(pos_ms.max(0), RoundMode::Nearest);
        self.seek_to_by_idx(idx, _force);
    }

    /// Clamps to the last valid frame when `idx` is at or past the track
    /// list's current duration.
    pub fn seek_to_by_idx(&self, idx: i64, _force: bool) {
        let clamped = idx.max(0).min(self.max_frame_idx());
        self.read_frame_idx.store(clamped, Ordering::Release);
        self.mix_tasks.lock().unwrap().clear();
    }

    pub fn consecutive_seek(&self, pos_ms: i64) {
        self.in_seeking.store(true, Ordering::Release);
        let idx = self.ms_to_frame_idx(pos_ms.max(0), RoundMode::Nearest);
        self.seek_target_idx.store(idx, Ordering::Release);
    }

    /// No-op if `consecutive_seek` was never called — idempotent like every
    /// other reader-level mode toggle.
    pub fn stop_consecutive_seek(&self) {
        if !self.in_seeking.swap(false, Ordering::AcqRel) {
            return;
        }
        let target = self.seek_target_idx.load(Ordering::Acquire);
        self.read_frame_idx.store(target, Ordering::Release);

        let mut seeking = self.seeking_tasks.lock().unwrap();
        let mut normal = self.mix_tasks.lock().unwrap();
        normal.clear();
        normal.extend(seeking.drain(..));
        // Promote the task closest to the scrubbed target to the cache head.
        if let Some(pos) = normal.iter().enumerate()
            .min_by_key(|(_, t)| (t.frame_index() - target).abs())
            .map(|(i, _)| i)
        {
            if let Some(t) = normal.remove(pos) {
                normal.push_front(t);
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn read_video_frame_by_pos(&self, pos_ms: i64, nonblocking: bool, precise: bool) -> CoreResult<ReadResult> {
        let idx = self.ms_to_frame_idx(pos_ms.max(0), RoundMode::Nearest);
        self.read_video_frame_by_idx(idx, nonblocking, precise)
    }

    pub fn read_video_frame_by_idx(&self, idx: i64, nonblocking: bool, precise: bool) -> CoreResult<ReadResult> {
        self.require_started()?;
        let idx = idx.max(0);

        if self.in_seeking.load(Ordering::Acquire) {
            return Ok(self.read_seeking(idx));
        }

        let task = self.ensure_mix_task(idx);

        if nonblocking {
            if task.is_output_ready() {
                return Ok(self.finish_read(&task));
            }
            // precise=false permits the nearest cached output behind idx.
            if !precise {
                if let Some(nearest) = self.nearest_ready_task(idx) {
                    return Ok(self.finish_read(&nearest));
                }
            }
            return Err(self.fail(CoreError::SourceError("no cached output available".into())));
        }

        while !task.is_output_ready() {
            if self.quit.load(Ordering::Acquire) {
                return Err(self.fail(CoreError::Cancelled("reader closed while waiting".into())));
            }
            thread::sleep(IDLE_SLEEP);
        }
        self.read_frame_idx.store(idx, Ordering::Release);
        Ok(self.finish_read(&task))
    }

    pub fn read_next_video_frame(&self) -> CoreResult<ReadResult> {
        let cur = self.read_frame_idx.load(Ordering::Acquire);
        let step: i64 = if self.forward.load(Ordering::Acquire) { 1 } else { -1 };
        let next = (cur + step).max(0);
        self.read_video_frame_by_idx(next, false, true)
    }

    fn nearest_ready_task(&self, idx: i64) -> Option<Arc<MixFrameTask>> {
        self.mix_tasks.lock().unwrap().iter()
            .filter(|t| t.is_output_ready() && t.frame_index() <= idx)
            .max_by_key(|t| t.frame_index())
            .cloned()
    }

    fn read_seeking(&self, _idx: i64) -> ReadResult {
        let target = self.seek_target_idx.load(Ordering::Acquire).clamp(0, self.max_frame_idx());
        self.ensure_seeking_task(target);
        let best = self.seeking_tasks.lock().unwrap().iter()
            .filter(|t| t.is_output_ready())
            .min_by_key(|t| (t.frame_index() - target).abs())
            .cloned()
            .or_else(|| self.seeking_flash.lock().unwrap().clone());
        match best {
            Some(t) => self.finish_read(&t),
            None => ReadResult {
                frame: self.empty_frame(0),
                eof: false,
                correlatives: Vec::new(),
            },
        }
    }

    fn finish_read(&self, task: &Arc<MixFrameTask>) -> ReadResult {
        let frame = task.output_frame().unwrap_or_else(|| self.empty_frame(task.frame_index()));
        let frame = self.apply_subtitles(frame);
        ReadResult { frame, eof: false, correlatives: task.correlatives() }
    }

    fn apply_subtitles(&self, mut frame: VideoFrame) -> VideoFrame {
        for track in self.subtitle_tracks.read().unwrap().iter() {
            if let Some(hit) = track.clip_at(frame.timestamp_ms) {
                let (x, y, _w, _h) = hit.rect;
                self.blender.blend(&mut frame, &hit.image, x, y, 1.0);
            }
        }
        frame
    }

    fn empty_frame(&self, idx: i64) -> VideoFrame {
        let s = self.settings.read().unwrap();
        VideoFrame::transparent(s.width(), s.height(), s.element_type(), frame_idx_to_ms(idx, s.rate()))
    }

    fn max_frame_idx(&self) -> i64 {
        self.ms_to_frame_idx(self.duration().max(0), RoundMode::Floor).max(0)
    }

    // ── Mix task creation ────────────────────────────────────────────────────

    /// Materializes the task for `idx` plus a pre-read window of
    /// `cache_frame_num` further tasks ahead of it in the current read
    /// direction, so a precise read after a short scrub-and-release lands
    /// inside an already-warm window instead of starting from scratch.
    fn ensure_mix_task(&self, idx: i64) -> Arc<MixFrameTask> {
        let mut tasks = self.mix_tasks.lock().unwrap();
        let task = match tasks.iter().find(|t| t.frame_index() == idx) {
            Some(t) => Arc::clone(t),
            None => {
                let task = self.build_mix_task(idx);
                tasks.push_back(Arc::clone(&task));
                task
            }
        };

        let forward = self.forward.load(Ordering::Acquire);
        let window = self.cache_frame_num.load(Ordering::Acquire);
        let max_idx = self.max_frame_idx();
        let step: i64 = if forward { 1 } else { -1 };
        for n in 1..=window as i64 {
            let ahead = idx + step * n;
            if ahead < 0 || ahead > max_idx {
                break;
            }
            if !tasks.iter().any(|t| t.frame_index() == ahead) {
                let pre = self.build_mix_task(ahead);
                tasks.push_back(pre);
            }
        }

        let cursor = self.read_frame_idx.load(Ordering::Acquire);
        evict_behind_cursor(&mut tasks, cursor, forward, Some(idx));
        cap_window(&mut tasks, forward, window + 1);
        task
    }

    fn ensure_seeking_task(&self, idx: i64) -> Arc<MixFrameTask> {
        let mut tasks = self.seeking_tasks.lock().unwrap();
        if let Some(t) = tasks.iter().find(|t| t.frame_index() == idx) {
            return Arc::clone(t);
        }
        let task = self.build_mix_task(idx);
        tasks.push_back(Arc::clone(&task));
        let target = self.seek_target_idx.load(Ordering::Acquire);
        evict_seeking(&mut tasks, target);
        cap_window(&mut tasks, true, self.cache_frame_num.load(Ordering::Acquire) + 1);
        task
    }

    fn build_mix_task(&self, idx: i64) -> Arc<MixFrameTask> {
        let mix_task = MixFrameTask::new(idx);
        let in_seeking = self.in_seeking.load(Ordering::Acquire);
        for entry in self.tracks.read().unwrap().iter() {
            let cb: Arc<dyn ReadFrameTaskCallback> = Arc::clone(&mix_task);
            let read_task = entry.track.create_read_frame_task(idx, !in_seeking, false, false, cb);
            mix_task.add_sub_task(entry.id, read_task);
        }
        mix_task
    }

    // ── Worker loops ─────────────────────────────────────────────────────────

    /// Source gating: once every sub-task of a mix task reports its source
    /// frame(s) ready, flip each sub-task `SourceReady -> Processing` so the
    /// owning track worker can run its filter chain.
    fn run_worker_a(self: Arc<Self>) {
        while !self.quit.load(Ordering::Acquire) {
            let mut progressed = false;
            for task in self.active_tasks() {
                if task.is_output_ready() || !task.all_sources_ready() {
                    continue;
                }
                if task.mark_processing_started() {
                    for (_, sub) in task.sub_tasks() {
                        sub.start_processing();
                    }
                    progressed = true;
                }
            }
            if !progressed {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }

    /// Mix/compose: once every sub-task of a mix task is output-ready (or
    /// discarded), alpha-blend the per-track frames bottom-to-top and mark
    /// the mix task output-ready.
    fn run_worker_b(self: Arc<Self>) {
        while !self.quit.load(Ordering::Acquire) {
            let mut progressed = false;
            for task in self.active_tasks() {
                if task.is_output_ready() || !task.all_sub_tasks_done() {
                    continue;
                }
                self.compose(&task);
                progressed = true;
            }
            if !progressed {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }

    fn active_tasks(&self) -> Vec<Arc<MixFrameTask>> {
        let mut all: Vec<Arc<MixFrameTask>> = self.mix_tasks.lock().unwrap().iter().cloned().collect();
        all.extend(self.seeking_tasks.lock().unwrap().iter().cloned());
        all
    }

    fn compose(&self, task: &Arc<MixFrameTask>) {
        let s = self.settings.read().unwrap().clone();
        let ts = frame_idx_to_ms(task.frame_index(), s.rate());
        let mut out = VideoFrame::transparent(s.width(), s.height(), s.element_type(), ts);

        let tracks = self.tracks.read().unwrap();
        for (track_id, read_task) in task.sub_tasks() {
            let visible = tracks.iter().find(|e| e.id == track_id).map(|e| e.track.is_visible()).unwrap_or(false);
            if !visible || read_task.is_discarded() {
                continue;
            }
            let Some(frame) = read_task.video_frame() else { continue };
            if (frame.timestamp_ms - ts).abs() > 1 {
                warn!(track_id, expected = ts, actual = frame.timestamp_ms, "track frame timestamp mismatch");
            }
            if frame.is_opaque_full_canvas() && frame.width == out.width && frame.height == out.height {
                out = frame;
            } else {
                self.blender.blend(&mut out, &frame, 0, 0, 1.0);
            }
        }
        drop(tracks);

        task.set_output(out.clone());
        task.update_output_frames(vec![CorrelativeFrame {
            phase: Phase::AfterMixing,
            clip_id: None,
            track_id: None,
            image: out,
        }]);

        if !self.in_seeking.load(Ordering::Acquire) {
            return;
        }
        // Seeking flash: keep the most recently completed non-blank scrub
        // frame so the caller has something to show while the target
        // frame is still in flight, unless this is the very first frame
        // the scrub has produced (in which case even a blank one is shown).
        let mut flash = self.seeking_flash.lock().unwrap();
        let non_blank = task.output_frame().map(|f| !f.is_blank()).unwrap_or(false);
        if flash.is_none() || non_blank {
            *flash = Some(Arc::clone(task));
        }
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

    #[test]
    fn empty_compose_returns_transparent_frame_at_zero() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        reader.add_track(-1).unwrap();

        let result = reader.read_video_frame_by_pos(0, false, true).unwrap();
        assert_eq!(result.frame.width, 4);
        assert_eq!(result.frame.height, 4);
        assert!(result.frame.data.to_f32_norm().iter().all(|&v| v == 0.0));
        reader.close();
    }

    #[test]
    fn single_clip_exact_read_hits_target_timestamp() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        let track_id = reader.add_track(-1).unwrap();
        let clip = Clip::new_video(1, 0, 1000, 0, 0, settings(), Box::new(NullReader)).unwrap();
        reader.insert_clip(track_id, clip).unwrap();
        thread::sleep(Duration::from_millis(50));

        let idx = reader.ms_to_frame_idx(500, RoundMode::Nearest);
        let result = reader.read_video_frame_by_idx(idx, false, true).unwrap();
        let mixing = result.correlatives.iter().find(|c| matches!(c.phase, Phase::AfterMixing));
        assert!(mixing.is_some());
        reader.close();
    }

    struct OpaqueReader(f32, f32, f32);
    impl ClipSourceReader for OpaqueReader {
        fn seek_to(&mut self, _: i64) {}
        fn notify_read_pos(&mut self, _: i64) {}
        fn set_direction(&mut self, _: bool) {}
        fn read_source_frame(&mut self, _: i64, _: bool) -> (Option<VideoFrame>, bool) {
            let samples: Vec<f32> = (0..(4 * 4)).flat_map(|_| [self.0, self.1, self.2, 1.0]).collect();
            let frame = VideoFrame {
                width: 4,
                height: 4,
                data: multicut_core::frame::PixelBuffer::from_f32_norm(ElementType::F32, &samples),
                timestamp_ms: 0,
            };
            (Some(frame), false)
        }
        fn clone_box(&self) -> Box<dyn ClipSourceReader> {
            Box::new(OpaqueReader(self.0, self.1, self.2))
        }
    }

    /// Scenario: two opaque tracks overlap the same instant. The top track
    /// (inserted last, highest Z) must win the composed pixel since
    /// `compose` iterates bottom-to-top and an opaque full-canvas frame
    /// replaces rather than blends.
    #[test]
    fn cross_track_blend_prefers_the_top_track() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        let bottom = reader.add_track(-1).unwrap();
        let top = reader.add_track(-1).unwrap();
        reader.insert_clip(bottom, Clip::new_video(1, 0, 1000, 0, 0, settings(), Box::new(OpaqueReader(1.0, 0.0, 0.0))).unwrap()).unwrap();
        reader.insert_clip(top, Clip::new_video(2, 0, 1000, 0, 0, settings(), Box::new(OpaqueReader(0.0, 0.0, 1.0))).unwrap()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let result = reader.read_video_frame_by_idx(0, false, true).unwrap();
        let samples = result.frame.data.to_f32_norm();
        assert!((samples[0] - 0.0).abs() < 1e-3, "red channel should be overwritten by the top track");
        assert!((samples[2] - 1.0).abs() < 1e-3, "blue channel should come from the top track");
        reader.close();
    }

    #[test]
    fn scrub_then_release_lands_on_the_target_frame() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        let track_id = reader.add_track(-1).unwrap();
        let clip = Clip::new_video(1, 0, 1000, 0, 0, settings(), Box::new(NullReader)).unwrap();
        reader.insert_clip(track_id, clip).unwrap();
        thread::sleep(Duration::from_millis(50));

        let target_idx = reader.ms_to_frame_idx(500, RoundMode::Nearest);
        reader.consecutive_seek(500);
        // Let the scrub worker produce at least one seeking-task frame.
        thread::sleep(Duration::from_millis(100));
        reader.stop_consecutive_seek();

        let result = reader.read_video_frame_by_idx(target_idx, false, true).unwrap();
        let mixing = result.correlatives.iter().find(|c| matches!(c.phase, Phase::AfterMixing));
        assert!(mixing.is_some());
        reader.close();
    }

    #[test]
    fn stop_consecutive_seek_without_seeking_is_a_no_op() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        reader.stop_consecutive_seek();
        reader.close();
    }

    /// `CloneAndConfigure(settings).Duration() == self.Duration()` and every
    /// clip id is preserved — the round-trip law.
    #[test]
    fn clone_and_configure_preserves_duration_and_clip_ids() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        let track_id = reader.add_track(-1).unwrap();
        reader.insert_clip(track_id, Clip::new_video(1, 0, 1000, 0, 0, settings(), Box::new(NullReader)).unwrap()).unwrap();
        reader.insert_clip(track_id, Clip::new_video(2, 1000, 500, 0, 0, settings(), Box::new(NullReader)).unwrap()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let cloned = reader.clone_and_configure(settings());
        assert_eq!(cloned.duration(), reader.duration());

        let mut orig_ids: Vec<_> = reader.get_clip_list(track_id).unwrap().iter().map(|c| c.id).collect();
        let mut clone_ids: Vec<_> = cloned.get_clip_list(track_id).unwrap().iter().map(|c| c.id).collect();
        orig_ids.sort();
        clone_ids.sort();
        assert_eq!(orig_ids, clone_ids);

        reader.close();
        cloned.close();
    }

    #[test]
    fn refresh_track_view_forces_recomposition() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        let track_id = reader.add_track(-1).unwrap();
        reader.insert_clip(track_id, Clip::new_video(1, 0, 1000, 0, 0, settings(), Box::new(NullReader)).unwrap()).unwrap();
        thread::sleep(Duration::from_millis(50));

        let result = reader.read_video_frame_by_idx(0, false, true).unwrap();
        assert!(result.correlatives.iter().any(|c| matches!(c.phase, Phase::AfterMixing)));

        reader.refresh_track_view(&[track_id]).unwrap();
        let task = reader.ensure_mix_task(0);
        assert!(!task.is_output_ready());
        reader.close();
    }

    #[test]
    fn illegal_mutation_leaves_clip_list_unchanged() {
        let reader = MultiTrackReader::new();
        reader.configure(settings()).unwrap();
        reader.start().unwrap();
        let track_id = reader.add_track(-1).unwrap();
        let a = Clip::new_video(1, 0, 1000, 0, 0, settings(), Box::new(NullReader)).unwrap();
        let b = Clip::new_video(2, 400, 1000, 0, 0, settings(), Box::new(NullReader)).unwrap();
        reader.insert_clip(track_id, a).unwrap();
        reader.insert_clip(track_id, b).unwrap();
        thread::sleep(Duration::from_millis(50));
        let before = reader.get_clip_list(track_id).unwrap().len();

        let c = Clip::new_video(3, 500, 100, 0, 0, settings(), Box::new(NullReader)).unwrap();
        let err = reader.insert_clip(track_id, c).unwrap_err();
        assert!(matches!(err, CoreError::IllegalMutation(_)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(reader.get_clip_list(track_id).unwrap().len(), before);
        reader.close();
    }
}
