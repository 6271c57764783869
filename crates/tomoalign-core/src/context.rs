//! Conversion context.
//!
//! Some formats cannot be read or written from the alignment alone: AreTomo3
//! records the raw frame size, and the portal stores lengths in Å. The
//! caller supplies that information explicitly through a
//! [`ConversionContext`]; nothing is cached between conversions.

use std::fmt;

use serde::{Deserialize, Serialize};
use tomoalign_geometry::FrameSize;

use crate::adapter::ConversionError;
use crate::types::Format;

/// Raw tilt-series dimensions: frame width and height in pixels, and the
/// number of tilts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiltSeriesSize {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl TiltSeriesSize {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn frame(&self) -> FrameSize {
        FrameSize::new(self.x as f64, self.y as f64)
    }
}

impl fmt::Display for TiltSeriesSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// A piece of context an adapter may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    TsSize,
    PixelSpacing,
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::TsSize => f.write_str("ts_size"),
            ContextKey::PixelSpacing => f.write_str("pixel_spacing"),
        }
    }
}

/// Information about the tilt series that the alignment files do not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionContext {
    pub ts_size: Option<TiltSeriesSize>,
    /// Å per pixel of the raw tilt series.
    pub pixel_spacing: Option<f64>,
}

impl ConversionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ts_size(mut self, x: usize, y: usize, z: usize) -> Self {
        self.ts_size = Some(TiltSeriesSize::new(x, y, z));
        self
    }

    pub fn with_pixel_spacing(mut self, spacing: f64) -> Self {
        self.pixel_spacing = Some(spacing);
        self
    }

    pub fn has(&self, key: ContextKey) -> bool {
        match key {
            ContextKey::TsSize => self.ts_size.is_some(),
            ContextKey::PixelSpacing => self.pixel_spacing.is_some(),
        }
    }

    /// Fill every value missing here from `fallback`.
    pub fn or(self, fallback: &ConversionContext) -> ConversionContext {
        ConversionContext {
            ts_size: self.ts_size.or(fallback.ts_size),
            pixel_spacing: self.pixel_spacing.or(fallback.pixel_spacing),
        }
    }

    /// Fail with `MissingContext` for the first key in `keys` that is absent.
    pub fn require(&self, format: Format, keys: &[ContextKey]) -> Result<(), ConversionError> {
        match keys.iter().find(|k| !self.has(**k)) {
            Some(key) => Err(ConversionError::MissingContext { format, key: *key }),
            None => Ok(()),
        }
    }

    pub fn require_ts_size(&self, format: Format) -> Result<TiltSeriesSize, ConversionError> {
        self.ts_size.ok_or(ConversionError::MissingContext {
            format,
            key: ContextKey::TsSize,
        })
    }

    /// Pixel spacing, which must be finite and positive.
    pub fn require_pixel_spacing(&self, format: Format) -> Result<f64, ConversionError> {
        let spacing = self.pixel_spacing.ok_or(ConversionError::MissingContext {
            format,
            key: ContextKey::PixelSpacing,
        })?;
        if !spacing.is_finite() || spacing <= 0.0 {
            return Err(ConversionError::InvalidField {
                projection: None,
                field: "pixel_spacing".into(),
                message: format!("must be finite and positive, got {}", spacing),
            });
        }
        Ok(spacing)
    }
}
