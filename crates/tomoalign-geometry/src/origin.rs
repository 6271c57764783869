//! Frame origins and the shifts between them.
//!
//! Two formats can agree on every rotation and translation value and still
//! describe different physical maps if one anchors its transforms at the
//! frame centre and the other at a corner. The offset between the two
//! anchors depends on the frame size and, for formats that store lengths in
//! physical units, on the pixel spacing.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::transform::Affine2;

/// Size of a single projection frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f64,
    pub height: f64,
}

impl FrameSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Where a format anchors its per-projection transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOrigin {
    /// Transforms act about the frame centre `(width/2, height/2)`.
    Center,
    /// Transforms act about the first pixel corner `(0, 0)`.
    Corner,
}

/// Position of the frame centre relative to the corner, in the units
/// implied by `pixel_spacing` (pass `1.0` for pixels).
pub fn origin_shift(frame: FrameSize, pixel_spacing: f64) -> Vector2<f64> {
    Vector2::new(
        frame.width / 2.0 * pixel_spacing,
        frame.height / 2.0 * pixel_spacing,
    )
}

/// Re-express `transform`, anchored at `from`, in the `to` convention.
///
/// Identical origins return the transform unchanged. Otherwise the result is
/// conjugated by the centre offset from [`origin_shift`].
pub fn change_origin(
    transform: &Affine2,
    from: FrameOrigin,
    to: FrameOrigin,
    frame: FrameSize,
    pixel_spacing: f64,
) -> Affine2 {
    let centre = origin_shift(frame, pixel_spacing);
    match (from, to) {
        (FrameOrigin::Center, FrameOrigin::Corner) => transform.reanchored(&centre),
        (FrameOrigin::Corner, FrameOrigin::Center) => transform.reanchored(&-centre),
        _ => *transform,
    }
}
