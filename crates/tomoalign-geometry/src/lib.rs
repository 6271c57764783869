//! # Tomoalign Geometry
//!
//! Planar geometry for the tomoalign framework. Every per-projection
//! alignment in a tilt series is a 2-D affine map, and every alignment format
//! disagrees with the others about its direction, origin, or units. This crate
//! provides the small set of pure functions needed to reconcile them:
//!
//! - **Transformations** ([`transform`]): Composition, inversion and
//!   re-anchoring of 2-D affine maps.
//! - **Rotations** ([`rotation`]): Angle ⇄ matrix conversion and similarity
//!   decomposition (rotation + isotropic magnification).
//! - **Origins** ([`origin`]): Frame-size- and pixel-spacing-dependent
//!   origin shifts between centre- and corner-anchored conventions.
//!
//! Nothing here holds state; all functions are deterministic.

pub mod origin;
pub mod rotation;
pub mod transform;

pub use origin::{change_origin, origin_shift, FrameOrigin, FrameSize};
pub use rotation::{angle_to_matrix, matrix_to_angle, similarity_decompose, ROTATION_TOLERANCE};
pub use transform::{Affine2, GeometryError, SINGULAR_RELATIVE_TOLERANCE};
