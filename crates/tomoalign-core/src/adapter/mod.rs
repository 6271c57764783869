//! Format adapters.
//!
//! The [`FormatAdapter`] trait defines the two operations every native
//! format must provide: reading its native model into a
//! [`CanonicalAlignment`] and writing one back. Conversions between formats
//! always pass through the canonical model, so supporting a new format means
//! writing one adapter.
//!
//! Writing can lose information when the target format has no field for
//! something the canonical model holds. Each adapter detects this and either
//! fails with [`ConversionError::LossyConversion`] or, under
//! [`LossyPolicy::Accept`], records what it did in a [`ConversionReport`].

pub mod aretomo;
pub mod imod;
pub mod portal;

pub use aretomo::AreTomo3Adapter;
pub use imod::ImodAdapter;
pub use portal::PortalAdapter;

use serde::Serialize;
use thiserror::Error;
use tomoalign_formats::ParseError;
use tomoalign_geometry::{FrameOrigin, GeometryError};

use crate::context::{ContextKey, ConversionContext};
use crate::types::{CanonicalAlignment, Format, ProjectionAlignment};

/// Two angles closer than this (degrees) count as equal when deciding
/// whether a per-projection value is really series-wide.
pub const ANGLE_TOLERANCE: f64 = 1e-6;

/// Errors raised while converting alignments.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{format}: projection counts disagree ({})", describe_counts(.counts))]
    InconsistentProjectionCount {
        format: Format,
        counts: Vec<(String, usize)>,
    },

    #[error("Projection {projection}: singular transform (determinant {determinant:.3e})")]
    SingularTransform { projection: usize, determinant: f64 },

    #[error(
        "Projection {projection}: matrix is not a rotation (orthogonality error {deviation:.3e}, determinant {determinant:.6})"
    )]
    NotARotation {
        projection: usize,
        deviation: f64,
        determinant: f64,
    },

    #[error("{format} requires {key} in the conversion context")]
    MissingContext { format: Format, key: ContextKey },

    #[error("{format} cannot represent {field} without loss: {detail}")]
    LossyConversion {
        format: Format,
        field: String,
        detail: String,
    },

    #[error("Invalid {field}{}: {message}", .projection.map(|p| format!(" of projection {}", p)).unwrap_or_default())]
    InvalidField {
        projection: Option<usize>,
        field: String,
        message: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown format '{0}' (expected imod, aretomo3 or portal)")]
    UnknownFormat(String),
}

fn describe_counts(counts: &[(String, usize)]) -> String {
    counts
        .iter()
        .map(|(name, n)| format!("{} = {}", name, n))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConversionError {
    /// Attach a projection index to a geometry failure.
    pub fn from_geometry(projection: usize, err: GeometryError) -> Self {
        match err {
            GeometryError::Singular { determinant } => ConversionError::SingularTransform {
                projection,
                determinant,
            },
            GeometryError::NotARotation {
                deviation,
                determinant,
            } => ConversionError::NotARotation {
                projection,
                deviation,
                determinant,
            },
        }
    }
}

/// What to do when the target format cannot hold every canonical value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LossyPolicy {
    /// Fail with [`ConversionError::LossyConversion`].
    #[default]
    Reject,
    /// Approximate, log a warning and record the loss in the report.
    Accept,
}

/// The single tilt-axis angle written for a whole series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TiltAxisAggregate {
    /// Value written (degrees): the common value, or the mean if they differ.
    pub value: f64,
    /// Projections whose own angle differs from `value`.
    pub deviating: Vec<usize>,
}

/// A canonical value that the target format could not hold exactly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossyNote {
    pub field: String,
    pub detail: String,
    pub projections: Vec<usize>,
}

/// Record of everything a conversion approximated or left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionReport {
    pub tilt_axis: Option<TiltAxisAggregate>,
    pub lossy: Vec<LossyNote>,
    /// Reconstruction hints the target format has no field for.
    pub omitted: Vec<String>,
}

impl ConversionReport {
    pub fn is_exact(&self) -> bool {
        self.lossy.is_empty() && self.omitted.is_empty()
    }

    pub fn merge(&mut self, other: ConversionReport) {
        if self.tilt_axis.is_none() {
            self.tilt_axis = other.tilt_axis;
        }
        self.lossy.extend(other.lossy);
        self.omitted.extend(other.omitted);
    }

    /// Apply `policy` to a detected loss.
    pub(crate) fn lossy(
        &mut self,
        format: Format,
        policy: LossyPolicy,
        note: LossyNote,
    ) -> Result<(), ConversionError> {
        match policy {
            LossyPolicy::Reject => Err(ConversionError::LossyConversion {
                format,
                field: note.field,
                detail: note.detail,
            }),
            LossyPolicy::Accept => {
                log::warn!("{}: lossy {}: {}", format, note.field, note.detail);
                self.lossy.push(note);
                Ok(())
            }
        }
    }

    pub(crate) fn omit(&mut self, format: Format, what: String) {
        log::info!("{}: omitted {}", format, what);
        self.omitted.push(what);
    }
}

/// A native value together with the report of how it was produced.
#[derive(Debug, Clone)]
pub struct Converted<T> {
    pub native: T,
    pub report: ConversionReport,
}

impl<T> Converted<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Converted<U> {
        Converted {
            native: f(self.native),
            report: self.report,
        }
    }
}

/// The capability set every native format provides.
pub trait FormatAdapter {
    /// The on-disk model of this format.
    type Native;

    const FORMAT: Format;

    /// Where the format anchors its per-projection transforms.
    const ORIGIN: FrameOrigin;

    /// Context keys `from_native` cannot work without.
    const READ_REQUIRES: &'static [ContextKey];

    /// Context keys `to_native` cannot work without.
    const WRITE_REQUIRES: &'static [ContextKey];

    /// Convert a native alignment into the canonical model.
    fn from_native(
        native: &Self::Native,
        ctx: &ConversionContext,
    ) -> Result<CanonicalAlignment, ConversionError>;

    /// Convert a canonical alignment into this format.
    fn to_native(
        alignment: &CanonicalAlignment,
        ctx: &ConversionContext,
        policy: LossyPolicy,
    ) -> Result<Converted<Self::Native>, ConversionError>;
}

/// Common value (or mean) of `(index, value)` pairs and the indices that differ from it by
/// more than [`ANGLE_TOLERANCE`]. Returns `None` for an empty input.
pub(crate) fn spread(values: &[(usize, f64)]) -> Option<TiltAxisAggregate> {
    if values.is_empty() {
        return None;
    }
    let first = values[0].1;
    let uniform = values.iter().all(|(_, v)| (v - first).abs() <= ANGLE_TOLERANCE);
    let value = if uniform {
        first
    } else {
        values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64
    };
    let deviating = values
        .iter()
        .filter(|(_, v)| (v - value).abs() > ANGLE_TOLERANCE)
        .map(|(i, _)| *i)
        .collect();
    Some(TiltAxisAggregate { value, deviating })
}

/// [`spread`] of `value` over the included projections, or over all of them
/// when none is included.
pub(crate) fn included_spread(
    projections: &[ProjectionAlignment],
    value: impl Fn(&ProjectionAlignment) -> f64,
) -> Option<TiltAxisAggregate> {
    let included: Vec<(usize, f64)> = projections
        .iter()
        .enumerate()
        .filter(|(_, p)| p.included)
        .map(|(i, p)| (i, value(p)))
        .collect();
    if included.is_empty() {
        let all: Vec<(usize, f64)> = projections.iter().map(&value).enumerate().collect();
        return spread(&all);
    }
    spread(&included)
}

/// `Some(v)` unless `v` is zero.
pub(crate) fn nonzero(v: f64) -> Option<f64> {
    (v != 0.0).then_some(v)
}
