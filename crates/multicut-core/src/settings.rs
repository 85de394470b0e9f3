// crates/multicut-core/src/settings.rs
//
// SharedSettings: the immutable-feeling bag of output parameters every
// Clip, Track, and the MultiTrackReader itself hold a clone of. Geometry
// may change while workers are paused; frame rate / color format / element
// type are fixed for the lifetime of a configured reader (see
// `UpdateSettings` in the engine crate, which enforces that).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A simple rational number — used for the output frame rate so that
/// non-integer rates (24000/1001 NTSC-style) round-trip exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// Output sample element type. `ColorFormat` is always RGBA (kept as a
/// single-variant enum so a future format doesn't require an API break).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    I8,
    I16,
    F32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    Rgba,
}

/// Output parameters shared by every Clip, Track, and the reader itself.
///
/// Cloned freely — each owner holds its own copy and `sync_video_fields_from`
/// is used to propagate a change without replacing the whole struct (so a
/// clip's own state, e.g. `source_offset`, never has to round-trip through
/// the settings object).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedSettings {
    width:  u32,
    height: u32,
    rate:   Rational,
    color:  ColorFormat,
    element: ElementType,
}

impl SharedSettings {
    /// Construct and validate. `width`/`height` must be in `(0, 16384]`;
    /// `rate.num`/`rate.den` must both be nonzero.
    pub fn new(width: u32, height: u32, rate: Rational, element: ElementType) -> CoreResult<Self> {
        if width == 0 || width > 16384 {
            return Err(CoreError::BadConfig(format!("width {width} out of range (0,16384]")));
        }
        if height == 0 || height > 16384 {
            return Err(CoreError::BadConfig(format!("height {height} out of range (0,16384]")));
        }
        if rate.num == 0 || rate.den == 0 {
            return Err(CoreError::BadConfig(format!("rate {}/{} must be positive", rate.num, rate.den)));
        }
        Ok(Self { width, height, rate, color: ColorFormat::Rgba, element })
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn rate(&self) -> Rational { self.rate }
    pub fn color_format(&self) -> ColorFormat { self.color }
    pub fn element_type(&self) -> ElementType { self.element }

    pub fn set_geometry(&mut self, width: u32, height: u32) -> CoreResult<()> {
        if width == 0 || width > 16384 {
            return Err(CoreError::BadConfig(format!("width {width} out of range (0,16384]")));
        }
        if height == 0 || height > 16384 {
            return Err(CoreError::BadConfig(format!("height {height} out of range (0,16384]")));
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Propagate only the fields that downstream Clips/Tracks need to
    /// re-derive their own geometry — never frame rate, color format, or
    /// element type. Callers that need to change those must rebuild the
    /// reader (see `MultiTrackReader::update_settings`).
    pub fn sync_video_fields_from(&mut self, other: &SharedSettings) {
        self.width = other.width;
        self.height = other.height;
    }
}
