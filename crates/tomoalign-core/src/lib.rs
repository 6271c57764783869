//! # Tomoalign Core
//!
//! Conversion of cryo-ET tilt-series alignments between IMOD, AreTomo3 and
//! the cryoET Data Portal.
//!
//! ## Architecture
//!
//! Every format implements the [`adapter::FormatAdapter`] trait, which maps
//! its native model (from `tomoalign-formats`) into a
//! [`types::CanonicalAlignment`] and back. The [`facade`] dispatches on
//! [`types::Format`] and always converts through the canonical model.
//!
//! ## Modules
//!
//! - [`types`]: Canonical alignment model and the format tag.
//! - [`context`]: Explicit conversion context (frame size, pixel spacing).
//! - [`adapter`]: Adapter trait, errors, lossy policy and the three adapters.
//! - [`facade`]: Read, write and convert by format.

pub mod adapter;
pub mod context;
pub mod facade;
pub mod types;

pub use adapter::{ConversionError, ConversionReport, Converted, FormatAdapter, LossyPolicy};
pub use context::{ContextKey, ConversionContext, TiltSeriesSize};
pub use facade::{convert, from_canonical, read, to_canonical, write, Direction, NativeAlignment};
pub use types::{
    CanonicalAlignment, Format, Length, LocalPatch, ProjectionAlignment, SeriesParameters,
};
