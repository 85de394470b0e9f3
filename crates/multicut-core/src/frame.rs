// crates/multicut-core/src/frame.rs
//
// VideoFrame: the one byte-level surface this crate exposes. Storage is
// generic over the configured ElementType so I8/I16/F32 projects all share
// the same blend math (via `to_f32`/`from_f32`) instead of three copies of
// every transition.

use crate::settings::ElementType;

#[derive(Clone, Debug, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl PixelBuffer {
    pub fn element_type(&self) -> ElementType {
        match self {
            PixelBuffer::U8(_) => ElementType::I8,
            PixelBuffer::U16(_) => ElementType::I16,
            PixelBuffer::F32(_) => ElementType::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::U16(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Zero-filled buffer of the given element type and length (RGBA
    /// channel count already folded into `len`).
    pub fn zeroed(element: ElementType, len: usize) -> Self {
        match element {
            ElementType::I8 => PixelBuffer::U8(vec![0u8; len]),
            ElementType::I16 => PixelBuffer::U16(vec![0u16; len]),
            ElementType::F32 => PixelBuffer::F32(vec![0.0f32; len]),
        }
    }

    /// View every sample as `f32` in `[0.0, 1.0]`. Used by blend math so it
    /// never needs to special-case the element type.
    pub fn to_f32_norm(&self) -> Vec<f32> {
        match self {
            PixelBuffer::U8(v) => v.iter().map(|&b| b as f32 / u8::MAX as f32).collect(),
            PixelBuffer::U16(v) => v.iter().map(|&b| b as f32 / u16::MAX as f32).collect(),
            PixelBuffer::F32(v) => v.clone(),
        }
    }

    /// Inverse of `to_f32_norm` for the given target element type.
    pub fn from_f32_norm(element: ElementType, samples: &[f32]) -> Self {
        match element {
            ElementType::I8 => PixelBuffer::U8(
                samples.iter().map(|&v| (v.clamp(0.0, 1.0) * u8::MAX as f32).round() as u8).collect(),
            ),
            ElementType::I16 => PixelBuffer::U16(
                samples.iter().map(|&v| (v.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16).collect(),
            ),
            ElementType::F32 => PixelBuffer::F32(samples.to_vec()),
        }
    }
}

/// A fully decoded/composited frame. `timestamp_ms` is set by the mixing
/// worker from `frame_idx * rate.den / rate.num`, never by the clip itself.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: PixelBuffer,
    pub timestamp_ms: i64,
}

impl VideoFrame {
    pub const CHANNELS: usize = 4; // RGBA

    /// A fully transparent frame of the given geometry/element type — the
    /// empty-compose result and the mix accumulator's starting point.
    pub fn transparent(width: u32, height: u32, element: ElementType, timestamp_ms: i64) -> Self {
        let len = width as usize * height as usize * Self::CHANNELS;
        Self { width, height, data: PixelBuffer::zeroed(element, len), timestamp_ms }
    }

    pub fn is_opaque_full_canvas(&self) -> bool {
        // Alpha is channel index 3 of every RGBA pixel.
        let samples = self.data.to_f32_norm();
        samples.chunks_exact(Self::CHANNELS).all(|px| px[3] >= 0.999)
    }

    /// True when every pixel is fully transparent — the empty-compose
    /// result before any track has contributed a frame.
    pub fn is_blank(&self) -> bool {
        let samples = self.data.to_f32_norm();
        samples.chunks_exact(Self::CHANNELS).all(|px| px[3] <= 0.001)
    }
}

/// Pipeline phase an intermediate image was captured at — used to tag
/// correlative frames for debugging/preview inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Source,
    AfterFilter,
    AfterTransform,
    AfterAudioEffect,
    AfterTransition,
    AfterMixing,
}

/// {phase, clip-id, track-id, image} — returned alongside the final frame
/// for inspection. `clip_id`/`track_id` are `None` for phases that aren't
/// clip-scoped (e.g. `AfterMixing`).
#[derive(Clone, Debug)]
pub struct CorrelativeFrame {
    pub phase: Phase,
    pub clip_id: Option<i64>,
    pub track_id: Option<i64>,
    pub image: VideoFrame,
}

/// Key used to merge correlative frames into a host's collection without
/// duplicates across repeated `UpdateOutputFrames` calls.
pub type CorrelativeKey = (Phase, Option<i64>, Option<i64>);

impl CorrelativeFrame {
    pub fn key(&self) -> CorrelativeKey {
        (self.phase, self.clip_id, self.track_id)
    }
}
