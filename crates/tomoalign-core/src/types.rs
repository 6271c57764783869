//! Canonical alignment model.
//!
//! Every native format is converted into, and out of, the types defined
//! here. A [`CanonicalAlignment`] can only be obtained through
//! [`CanonicalAlignment::new`], which validates every field, so code holding
//! one never has to re-check ranges or invertibility.
//!
//! ## Transform convention
//!
//! The image transform of projection `i` (centre-anchored, pixel units, in
//! the direction IMOD's `.xf` uses: raw image onto aligned image) is
//!
//! $$T_i = R(-\theta_i) \circ P_i$$
//!
//! where $\theta_i$ is [`ProjectionAlignment::tilt_axis_angle`] and $P_i$ is
//! [`ProjectionAlignment::in_plane_transform`]. [`ProjectionAlignment::image_transform`]
//! and [`ProjectionAlignment::from_image_transform`] move between the two.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tomoalign_geometry::Affine2;

use crate::adapter::ConversionError;

/// Maximum |tilt angle| in degrees.
pub const MAX_TILT_ANGLE: f64 = 90.0;

/// The native alignment formats tomoalign understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Imod,
    #[serde(alias = "aretomo")]
    AreTomo3,
    #[serde(alias = "cdp")]
    Portal,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Imod, Format::AreTomo3, Format::Portal];

    /// Short lowercase name, as accepted on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Format::Imod => "imod",
            Format::AreTomo3 => "aretomo3",
            Format::Portal => "portal",
        }
    }

    /// Uppercase label used in the portal's `format` field.
    pub fn label(&self) -> &'static str {
        match self {
            Format::Imod => "IMOD",
            Format::AreTomo3 => "ARETOMO3",
            Format::Portal => "PORTAL",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Format::Imod => "IMOD basename (.xf, .tlt, .xtilt, tilt.com, newst.com)",
            Format::AreTomo3 => "AreTomo3 alignment file (.aln)",
            Format::Portal => "cryoET Data Portal alignment JSON (.json)",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imod" => Ok(Format::Imod),
            "aretomo3" | "aretomo" => Ok(Format::AreTomo3),
            "portal" | "cdp" => Ok(Format::Portal),
            other => Err(ConversionError::UnknownFormat(other.to_string())),
        }
    }
}

/// A length that remembers the unit it was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Length {
    Pixels(f64),
    Angstroms(f64),
}

impl Length {
    pub fn value(&self) -> f64 {
        match self {
            Length::Pixels(v) | Length::Angstroms(v) => *v,
        }
    }

    /// Length in pixels; `None` if an Å value has no spacing to convert with.
    pub fn to_pixels(&self, pixel_spacing: Option<f64>) -> Option<f64> {
        match *self {
            Length::Pixels(v) => Some(v),
            Length::Angstroms(v) => pixel_spacing.map(|s| v / s),
        }
    }

    /// Length in Å; `None` if a pixel value has no spacing to convert with.
    pub fn to_angstroms(&self, pixel_spacing: Option<f64>) -> Option<f64> {
        match *self {
            Length::Pixels(v) => pixel_spacing.map(|s| v * s),
            Length::Angstroms(v) => Some(v),
        }
    }
}

/// Residual correction measured on one patch of one projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalPatch {
    pub patch_index: usize,
    /// Expected patch centre relative to the frame centre (pixels).
    pub center: [f64; 2],
    /// Measured shift from the expected centre (pixels).
    pub shift: [f64; 2],
    /// Reliability flag (1.0 reliable, 0.0 not).
    pub reliability: f64,
}

/// Alignment of a single projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionAlignment {
    /// Stage tilt angle (degrees).
    pub tilt_angle: f64,
    /// In-plane rotation of the tilt axis relative to the image frame (degrees).
    pub tilt_axis_angle: f64,
    /// Out-of-plane tilt about the x axis (degrees).
    pub x_tilt: f64,
    /// Correction left after the tilt-axis rotation is factored out.
    pub in_plane_transform: Affine2,
    /// Whether the projection takes part in reconstruction.
    pub included: bool,
    pub local_alignment: Option<Vec<LocalPatch>>,
}

impl ProjectionAlignment {
    /// A projection with no correction beyond its angles.
    pub fn new(tilt_angle: f64, tilt_axis_angle: f64) -> Self {
        Self {
            tilt_angle,
            tilt_axis_angle,
            x_tilt: 0.0,
            in_plane_transform: Affine2::identity(),
            included: true,
            local_alignment: None,
        }
    }

    /// Split a full image transform into tilt-axis rotation and in-plane part.
    pub fn from_image_transform(
        tilt_angle: f64,
        tilt_axis_angle: f64,
        image_transform: &Affine2,
    ) -> Self {
        Self {
            in_plane_transform: Affine2::rotation(tilt_axis_angle).compose(image_transform),
            ..Self::new(tilt_angle, tilt_axis_angle)
        }
    }

    /// Full image transform `R(-tilt_axis_angle) ∘ in_plane_transform`.
    pub fn image_transform(&self) -> Affine2 {
        Affine2::rotation(-self.tilt_axis_angle).compose(&self.in_plane_transform)
    }

    pub fn with_x_tilt(mut self, x_tilt: f64) -> Self {
        self.x_tilt = x_tilt;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.included = false;
        self
    }

    pub fn with_local_alignment(mut self, patches: Vec<LocalPatch>) -> Self {
        self.local_alignment = Some(patches);
        self
    }

    fn validate(&self, index: usize) -> Result<(), ConversionError> {
        let invalid = |field: &str, message: String| ConversionError::InvalidField {
            projection: Some(index),
            field: field.to_string(),
            message,
        };

        if !self.tilt_angle.is_finite() || self.tilt_angle.abs() > MAX_TILT_ANGLE {
            return Err(invalid(
                "tilt_angle",
                format!("{} is outside [-{}, {}]", self.tilt_angle, MAX_TILT_ANGLE, MAX_TILT_ANGLE),
            ));
        }
        if !self.tilt_axis_angle.is_finite() {
            return Err(invalid("tilt_axis_angle", "must be finite".into()));
        }
        if !self.x_tilt.is_finite() {
            return Err(invalid("x_tilt", "must be finite".into()));
        }
        if !self.in_plane_transform.is_finite() {
            return Err(invalid("in_plane_transform", "must be finite".into()));
        }
        if self.in_plane_transform.is_singular() {
            return Err(ConversionError::SingularTransform {
                projection: index,
                determinant: self.in_plane_transform.determinant(),
            });
        }
        if let Some(patches) = &self.local_alignment {
            let finite = patches.iter().all(|p| {
                p.center.iter().chain(p.shift.iter()).all(|v| v.is_finite())
                    && p.reliability.is_finite()
            });
            if !finite {
                return Err(invalid("local_alignment", "patch values must be finite".into()));
            }
        }
        Ok(())
    }
}

/// Series-level reconstruction hints carried alongside the projections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesParameters {
    /// Reconstruction thickness.
    pub volume_thickness: Option<Length>,
    /// Offset added to every tilt angle (degrees).
    pub tilt_axis_offset: Option<f64>,
    /// Shift of the reconstructed volume in X and Z (pixels).
    pub volume_shift: Option<[f64; 2]>,
}

/// A validated, format-independent tilt-series alignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalAlignment {
    projections: Vec<ProjectionAlignment>,
    volume_thickness: Option<Length>,
    tilt_axis_offset: Option<f64>,
    volume_shift: Option<[f64; 2]>,
    source_format: Format,
}

impl CanonicalAlignment {
    /// Validate and assemble an alignment.
    ///
    /// Projections are kept in the order given (acquisition order for
    /// AreTomo3, stack order for IMOD and the portal).
    pub fn new(
        projections: Vec<ProjectionAlignment>,
        series: SeriesParameters,
        source_format: Format,
    ) -> Result<Self, ConversionError> {
        if projections.is_empty() {
            return Err(ConversionError::InvalidField {
                projection: None,
                field: "projections".into(),
                message: "an alignment needs at least one projection".into(),
            });
        }
        for (i, p) in projections.iter().enumerate() {
            p.validate(i)?;
        }

        let series_invalid = |field: &str, message: &str| ConversionError::InvalidField {
            projection: None,
            field: field.to_string(),
            message: message.to_string(),
        };
        if let Some(t) = series.volume_thickness {
            if !t.value().is_finite() || t.value() <= 0.0 {
                return Err(series_invalid("volume_thickness", "must be finite and positive"));
            }
        }
        if series.tilt_axis_offset.is_some_and(|v| !v.is_finite()) {
            return Err(series_invalid("tilt_axis_offset", "must be finite"));
        }
        if series.volume_shift.is_some_and(|s| !s.iter().all(|v| v.is_finite())) {
            return Err(series_invalid("volume_shift", "must be finite"));
        }

        Ok(Self {
            projections,
            volume_thickness: series.volume_thickness,
            tilt_axis_offset: series.tilt_axis_offset,
            volume_shift: series.volume_shift,
            source_format,
        })
    }

    pub fn projections(&self) -> &[ProjectionAlignment] {
        &self.projections
    }

    pub fn volume_thickness(&self) -> Option<Length> {
        self.volume_thickness
    }

    pub fn tilt_axis_offset(&self) -> Option<f64> {
        self.tilt_axis_offset
    }

    pub fn volume_shift(&self) -> Option<[f64; 2]> {
        self.volume_shift
    }

    pub fn source_format(&self) -> Format {
        self.source_format
    }

    pub fn series(&self) -> SeriesParameters {
        SeriesParameters {
            volume_thickness: self.volume_thickness,
            tilt_axis_offset: self.tilt_axis_offset,
            volume_shift: self.volume_shift,
        }
    }

    pub fn len(&self) -> usize {
        self.projections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    pub fn included_count(&self) -> usize {
        self.projections.iter().filter(|p| p.included).count()
    }

    /// 0-based indices of projections left out of reconstruction.
    pub fn excluded_indices(&self) -> Vec<usize> {
        self.projections
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.included)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn tilt_angles(&self) -> Vec<f64> {
        self.projections.iter().map(|p| p.tilt_angle).collect()
    }

    pub fn has_local_alignment(&self) -> bool {
        self.projections.iter().any(|p| p.local_alignment.is_some())
    }
}
