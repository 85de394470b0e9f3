// crates/multicut-core/src/clip.rs
//
// Clip: a windowed reference to a source media stream with timeline
// placement, optional filter chain, and transform. Mutated only through
// track APIs (see multicut-engine::track) — this struct itself has no
// knowledge of the track's staging/live split or worker threads.

use std::sync::Arc;

use crate::collaborators::{ClipSourceReader, VideoFilter, VideoTransformFilter};
use crate::error::{CoreError, CoreResult};
use crate::frame::{CorrelativeFrame, Phase, VideoFrame};
use crate::settings::SharedSettings;

pub type ClipId = i64;
pub type TrackId = i64;

/// Extra, filter-specific arguments threaded through `ProcessSourceFrame`.
/// `bypass_bg_node` is the one value the core itself sets (forwarded from
/// `VideoTrack::create_read_frame_task`'s `bypass_bg` flag); filters may
/// stash additional keys here without changing this type's shape.
#[derive(Clone, Debug, Default)]
pub struct ExtraArgs {
    pub bypass_bg_node: bool,
}

/// A clip is either a video clip (reads sequential source frames through a
/// `ClipSourceReader`) or an image clip (computes one constant frame on
/// first touch and returns it for any in-range position).
enum Source {
    Video(Box<dyn ClipSourceReader>),
    Image(Option<VideoFrame>),
}

pub struct Clip {
    id: ClipId,
    track_id: TrackId,
    /// Timeline placement in milliseconds.
    start_ms: i64,
    start_offset_ms: i64,
    end_offset_ms: i64,
    src_duration_ms: i64,
    forward: bool,
    filter: Option<Arc<dyn VideoFilter>>,
    transform: Option<Arc<dyn VideoTransformFilter>>,
    settings: SharedSettings,
    source: Source,
}

impl Clip {
    /// Construct a video clip. `duration = src_duration_ms - start_offset_ms
    /// - end_offset_ms` must be positive.
    pub fn new_video(
        id: ClipId,
        start_ms: i64,
        src_duration_ms: i64,
        start_offset_ms: i64,
        end_offset_ms: i64,
        settings: SharedSettings,
        reader: Box<dyn ClipSourceReader>,
    ) -> CoreResult<Self> {
        Self::validate(start_ms, src_duration_ms, start_offset_ms, end_offset_ms)?;
        Ok(Self {
            id,
            track_id: -1,
            start_ms,
            start_offset_ms,
            end_offset_ms,
            src_duration_ms,
            forward: true,
            filter: None,
            transform: None,
            settings,
            source: Source::Video(reader),
        })
    }

    /// Construct an image clip. For images, `start_offset_ms`/`end_offset_ms`
    /// are reinterpreted as a clip-local time window rather than an offset
    /// into a decoded stream.
    pub fn new_image(
        id: ClipId,
        start_ms: i64,
        duration_ms: i64,
        settings: SharedSettings,
    ) -> CoreResult<Self> {
        if start_ms < 0 {
            return Err(CoreError::BadConfig("clip start must be >= 0".into()));
        }
        if duration_ms <= 0 {
            return Err(CoreError::BadConfig("image clip duration must be > 0".into()));
        }
        Ok(Self {
            id,
            track_id: -1,
            start_ms,
            start_offset_ms: 0,
            end_offset_ms: 0,
            src_duration_ms: duration_ms,
            forward: true,
            filter: None,
            transform: None,
            settings,
            source: Source::Image(None),
        })
    }

    fn validate(start_ms: i64, src_duration_ms: i64, start_offset_ms: i64, end_offset_ms: i64) -> CoreResult<()> {
        if start_ms < 0 {
            return Err(CoreError::BadConfig("clip start must be >= 0".into()));
        }
        let duration = src_duration_ms - start_offset_ms - end_offset_ms;
        if duration <= 0 {
            return Err(CoreError::BadConfig(format!(
                "clip duration {duration} must be > 0 (src={src_duration_ms}, start_off={start_offset_ms}, end_off={end_offset_ms})"
            )));
        }
        Ok(())
    }

    pub fn is_image(&self) -> bool { matches!(self.source, Source::Image(_)) }
    pub fn id(&self) -> ClipId { self.id }
    pub fn track_id(&self) -> TrackId { self.track_id }
    pub fn set_track_id(&mut self, track_id: TrackId) { self.track_id = track_id; }
    pub fn start(&self) -> i64 { self.start_ms }
    pub fn duration(&self) -> i64 { self.src_duration_ms - self.start_offset_ms - self.end_offset_ms }
    pub fn end(&self) -> i64 { self.start_ms + self.duration() }
    pub fn start_offset(&self) -> i64 { self.start_offset_ms }
    pub fn end_offset(&self) -> i64 { self.end_offset_ms }
    pub fn src_duration_ms(&self) -> i64 { self.src_duration_ms }

    pub fn set_start(&mut self, start_ms: i64) -> CoreResult<()> {
        if start_ms < 0 {
            return Err(CoreError::BadConfig("clip start must be >= 0".into()));
        }
        self.start_ms = start_ms;
        Ok(())
    }

    pub fn change_range(&mut self, start_offset_ms: i64, end_offset_ms: i64) -> CoreResult<()> {
        if self.is_image() {
            self.start_offset_ms = start_offset_ms;
            self.end_offset_ms = end_offset_ms;
            return Ok(());
        }
        Self::validate(self.start_ms, self.src_duration_ms, start_offset_ms, end_offset_ms)?;
        self.start_offset_ms = start_offset_ms;
        self.end_offset_ms = end_offset_ms;
        Ok(())
    }

    pub fn set_filter(&mut self, filter: Option<Arc<dyn VideoFilter>>) { self.filter = filter; }
    pub fn filter(&self) -> Option<&Arc<dyn VideoFilter>> { self.filter.as_ref() }
    pub fn set_transform(&mut self, transform: Option<Arc<dyn VideoTransformFilter>>) { self.transform = transform; }

    pub fn set_direction(&mut self, forward: bool) {
        self.forward = forward;
        if let Source::Video(reader) = &mut self.source {
            reader.set_direction(forward);
        }
    }

    /// Seek the underlying source reader to `clip_local_ms` (position
    /// relative to this clip's own timeline, i.e. `timeline_pos - start`).
    pub fn seek_to(&mut self, clip_local_ms: i64) {
        if let Source::Video(reader) = &mut self.source {
            reader.seek_to(clip_local_ms);
        }
    }

    pub fn notify_read_pos(&mut self, timeline_pos_ms: i64) {
        let local = timeline_pos_ms - self.start_ms;
        if let Source::Video(reader) = &mut self.source {
            reader.notify_read_pos(local);
        }
    }

    /// Whether `clip_local_pos` has run off the end (forward) or start
    /// (reverse) of this clip's duration window.
    pub fn is_eof_at(&self, clip_local_pos: i64) -> bool {
        if self.forward {
            clip_local_pos >= self.duration()
        } else {
            clip_local_pos < 0
        }
    }

    /// Ask the clip's source for the frame at `clip_local_pos`. Image clips
    /// compute their constant pixel buffer on first touch and return it for
    /// any in-range position, never touching a decoder.
    pub fn read_source_frame(&mut self, clip_local_pos: i64, wait: bool) -> (Option<VideoFrame>, bool) {
        let eof = self.is_eof_at(clip_local_pos);
        match &mut self.source {
            Source::Video(reader) => reader.read_source_frame(clip_local_pos + self.start_offset_ms, wait).map_eof(eof),
            Source::Image(cached) => {
                if cached.is_none() {
                    *cached = Some(VideoFrame::transparent(
                        self.settings.width(),
                        self.settings.height(),
                        self.settings.element_type(),
                        0,
                    ));
                }
                (cached.clone(), eof)
            }
        }
    }

    /// Run the filter chain (if any) then the transform, appending Source/
    /// AfterFilter/AfterTransform correlatives, and return the post-transform
    /// frame.
    pub fn process_source_frame(
        &self,
        clip_local_pos: i64,
        frames_out: &mut Vec<CorrelativeFrame>,
        input_frame: VideoFrame,
        extra_args: &ExtraArgs,
    ) -> VideoFrame {
        frames_out.push(CorrelativeFrame {
            phase: Phase::Source,
            clip_id: Some(self.id),
            track_id: Some(self.track_id),
            image: input_frame.clone(),
        });

        let filtered = match &self.filter {
            Some(f) => f.filter_image(&input_frame, clip_local_pos, extra_args),
            None => input_frame,
        };
        frames_out.push(CorrelativeFrame {
            phase: Phase::AfterFilter,
            clip_id: Some(self.id),
            track_id: Some(self.track_id),
            image: filtered.clone(),
        });

        let transformed = match &self.transform {
            Some(t) => t.apply(&filtered, clip_local_pos),
            None => filtered,
        };
        frames_out.push(CorrelativeFrame {
            phase: Phase::AfterTransform,
            clip_id: Some(self.id),
            track_id: Some(self.track_id),
            image: transformed.clone(),
        });

        transformed
    }

    /// Duplicate this clip against a (possibly new) `SharedSettings`, used by
    /// `CloneAndConfigure`. The source reader is duplicated via
    /// `ClipSourceReader::clone_box`; image clips drop their cached frame so
    /// it's recomputed at the new geometry on first touch.
    pub fn cloned_with_settings(&self, settings: SharedSettings) -> Self {
        let source = match &self.source {
            Source::Video(reader) => Source::Video(reader.clone_box()),
            Source::Image(_) => Source::Image(None),
        };
        Self {
            id: self.id,
            track_id: self.track_id,
            start_ms: self.start_ms,
            start_offset_ms: self.start_offset_ms,
            end_offset_ms: self.end_offset_ms,
            src_duration_ms: self.src_duration_ms,
            forward: self.forward,
            filter: self.filter.clone(),
            transform: self.transform.clone(),
            settings,
            source,
        }
    }

    /// Adopt a geometry change pushed down from the owning track. Image
    /// clips drop their cached frame so it's rebuilt at the new size on
    /// next touch; video clips just adopt the new settings since their
    /// `ClipSourceReader` is asked for frames at an explicit size already.
    pub fn update_geometry(&mut self, settings: &SharedSettings) {
        self.settings = settings.clone();
        if let Source::Image(cached) = &mut self.source {
            *cached = None;
        }
    }
}

/// Small extension trait so `read_source_frame` can stamp the eof flag
/// computed from clip-local position rather than trusting the (possibly
/// unaware) source reader's own eof signal.
trait MapEof<T> {
    fn map_eof(self, eof: bool) -> (T, bool);
}

impl MapEof<Option<VideoFrame>> for (Option<VideoFrame>, bool) {
    fn map_eof(self, eof: bool) -> (Option<VideoFrame>, bool) {
        (self.0, eof || self.1)
    }
}
