//! Affine transformations of the image plane.
//!
//! Every alignment format stores, per projection, some flavour of a 2-D
//! affine map: a 2x2 linear part plus a translation. [`Affine2`] is the
//! common representation used by the conversion code; the adapters decide
//! which direction and which origin a given native record refers to.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative tolerance below which a determinant counts as zero.
///
/// The determinant is compared against the product of the column norms
/// (the Hadamard bound), so the test is independent of the overall scale of
/// the matrix.
pub const SINGULAR_RELATIVE_TOLERANCE: f64 = 1e-8;

/// Errors from geometric operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Singular transform: determinant {determinant:.3e} is numerically zero")]
    Singular { determinant: f64 },

    #[error(
        "Matrix is not a rotation: orthogonality error {deviation:.3e}, determinant {determinant:.6}"
    )]
    NotARotation { deviation: f64, determinant: f64 },
}

/// An affine transformation of the plane: linear part + translation.
///
/// A point `p` maps to `matrix * p + translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine2 {
    /// 2x2 rotation/scale/shear matrix.
    pub matrix: Matrix2<f64>,
    /// Translation vector (pixels unless stated otherwise by the caller).
    pub translation: Vector2<f64>,
}

impl Default for Affine2 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine2 {
    /// The identity map.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix2::identity(),
            translation: Vector2::zeros(),
        }
    }

    /// Build a transform from a row-major matrix and a shift.
    pub fn from_parts(matrix: [[f64; 2]; 2], shift: [f64; 2]) -> Self {
        Self {
            matrix: Matrix2::new(matrix[0][0], matrix[0][1], matrix[1][0], matrix[1][1]),
            translation: Vector2::new(shift[0], shift[1]),
        }
    }

    /// Create a pure translation.
    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            matrix: Matrix2::identity(),
            translation: Vector2::new(dx, dy),
        }
    }

    /// Create a counter-clockwise rotation about the origin (degrees).
    pub fn rotation(angle_deg: f64) -> Self {
        Self {
            matrix: crate::rotation::angle_to_matrix(angle_deg),
            translation: Vector2::zeros(),
        }
    }

    /// Create a uniform scale about the origin.
    pub fn uniform_scale(factor: f64) -> Self {
        Self {
            matrix: Matrix2::identity() * factor,
            translation: Vector2::zeros(),
        }
    }

    /// Row-major copy of the linear part.
    pub fn matrix_rows(&self) -> [[f64; 2]; 2] {
        [
            [self.matrix[(0, 0)], self.matrix[(0, 1)]],
            [self.matrix[(1, 0)], self.matrix[(1, 1)]],
        ]
    }

    /// Translation as a plain array.
    pub fn shift(&self) -> [f64; 2] {
        [self.translation.x, self.translation.y]
    }

    /// Apply this transformation to a 2D point.
    pub fn apply(&self, point: &[f64; 2]) -> [f64; 2] {
        let v = Vector2::new(point[0], point[1]);
        let result = self.matrix * v + self.translation;
        [result.x, result.y]
    }

    /// Compose two transforms: `self ∘ other` (other first, then self).
    pub fn compose(&self, other: &Affine2) -> Affine2 {
        Affine2 {
            matrix: self.matrix * other.matrix,
            translation: self.matrix * other.translation + self.translation,
        }
    }

    /// Compose two transforms: self followed by other.
    pub fn then(&self, other: &Affine2) -> Affine2 {
        other.compose(self)
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        self.matrix.determinant()
    }

    /// Whether the linear part is numerically singular.
    pub fn is_singular(&self) -> bool {
        let det = self.determinant();
        let bound = self.matrix.column(0).norm() * self.matrix.column(1).norm();
        !det.is_finite() || det.abs() <= SINGULAR_RELATIVE_TOLERANCE * bound
    }

    /// The inverse map.
    ///
    /// Fails with [`GeometryError::Singular`] when the determinant is within
    /// [`SINGULAR_RELATIVE_TOLERANCE`] of zero relative to the column norms.
    pub fn invert(&self) -> Result<Affine2, GeometryError> {
        if self.is_singular() {
            return Err(GeometryError::Singular {
                determinant: self.determinant(),
            });
        }
        let inverse = self.matrix.try_inverse().ok_or(GeometryError::Singular {
            determinant: self.determinant(),
        })?;
        Ok(Affine2 {
            matrix: inverse,
            translation: -(inverse * self.translation),
        })
    }

    /// Re-express this transform about a different anchor point.
    ///
    /// With `s` the position of the old origin in the new coordinate system,
    /// the result is `T(s) ∘ self ∘ T(−s)`. The linear part is unchanged; the
    /// translation picks up `s − M·s`.
    pub fn reanchored(&self, shift: &Vector2<f64>) -> Affine2 {
        Affine2 {
            matrix: self.matrix,
            translation: self.translation + shift - self.matrix * shift,
        }
    }

    /// Whether every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite()) && self.translation.iter().all(|v| v.is_finite())
    }

    /// Largest absolute element-wise difference to another transform.
    pub fn max_abs_diff(&self, other: &Affine2) -> f64 {
        let m = (self.matrix - other.matrix).abs().max();
        let t = (self.translation - other.translation).abs().max();
        m.max(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_transform() {
        let t = Affine2::default();
        let result = t.apply(&[1.0, 2.0]);
        assert!((result[0] - 1.0).abs() < 1e-12);
        assert!((result[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_scale_and_translate() {
        let t = Affine2::uniform_scale(2.0).then(&Affine2::translation(1.0, 0.0));
        let result = t.apply(&[1.0, 1.0]);
        assert!((result[0] - 3.0).abs() < 1e-12);
        assert!((result[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_compose_applies_right_operand_first() {
        let rot = Affine2::rotation(90.0);
        let shift = Affine2::translation(1.0, 0.0);
        // Shift first, then rotate: (0,0) -> (1,0) -> (0,1)
        let p = rot.compose(&shift).apply(&[0.0, 0.0]);
        assert_abs_diff_eq!(p[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_is_associative() {
        let a = Affine2::from_parts([[0.98, -0.19], [0.19, 0.98]], [12.5, -3.0]);
        let b = Affine2::from_parts([[1.1, 0.05], [0.0, 0.9]], [-4.0, 7.25]);
        let c = Affine2::rotation(-33.0).compose(&Affine2::translation(2.0, 5.0));

        let left = a.compose(&b).compose(&c);
        let right = a.compose(&b.compose(&c));
        assert!(left.max_abs_diff(&right) < 1e-12);
    }

    #[test]
    fn test_double_inversion_is_identity() {
        let t = Affine2::from_parts([[0.9803519, -0.1972494], [0.1972494, 0.9803519]], [22.751, -0.799]);
        let back = t.invert().unwrap().invert().unwrap();
        assert!(t.max_abs_diff(&back) < 1e-9);
    }

    #[test]
    fn test_inverse_undoes_transform() {
        let t = Affine2::from_parts([[1.02, 0.1], [-0.2, 0.97]], [5.0, -8.0]);
        let inv = t.invert().unwrap();
        let p = [123.0, -45.5];
        let q = inv.apply(&t.apply(&p));
        assert_abs_diff_eq!(q[0], p[0], epsilon = 1e-9);
        assert_abs_diff_eq!(q[1], p[1], epsilon = 1e-9);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let t = Affine2::from_parts([[1.0, 2.0], [2.0, 4.0]], [0.0, 0.0]);
        let err = t.invert().unwrap_err();
        assert!(matches!(err, GeometryError::Singular { .. }));

        let zero = Affine2::from_parts([[0.0, 0.0], [0.0, 0.0]], [1.0, 1.0]);
        assert!(zero.invert().is_err());
    }

    #[test]
    fn test_singularity_test_is_scale_invariant() {
        // Tiny but well-conditioned matrices are still invertible.
        let tiny = Affine2::uniform_scale(1e-6);
        assert!(tiny.invert().is_ok());

        // Nearly parallel columns are not, whatever the magnitude.
        let eps = 1e-10;
        let nearly = Affine2::from_parts([[1e3, 1e3], [1e3, 1e3 * (1.0 + eps)]], [0.0, 0.0]);
        assert!(nearly.is_singular());
    }

    #[test]
    fn test_reanchor_pure_translation_unchanged() {
        let t = Affine2::translation(0.5, -0.3);
        let moved = t.reanchored(&Vector2::new(2048.0, 2048.0));
        assert!(t.max_abs_diff(&moved) < 1e-12);
    }

    #[test]
    fn test_reanchor_rotation_about_new_centre() {
        // Rotation about (0,0) re-expressed about the point c: c must stay fixed
        // under the original rotation conjugated by the shift.
        let c = Vector2::new(10.0, 0.0);
        let moved = Affine2::rotation(90.0).reanchored(&c);
        let fixed = moved.apply(&[10.0, 0.0]);
        assert_abs_diff_eq!(fixed[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fixed[1], 0.0, epsilon = 1e-12);
    }
}
