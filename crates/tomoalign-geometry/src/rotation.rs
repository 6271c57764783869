//! Rotation angle ⇄ matrix conversion.
//!
//! Angles are in degrees and counter-clockwise positive, matching every
//! tilt-series format handled by tomoalign. Extraction of an angle from a
//! matrix is deliberately strict: a matrix carrying shear or anisotropic
//! magnification encodes more than a rigid rotation, and that has to be
//! surfaced to the caller instead of being rounded away.

use nalgebra::Matrix2;

use crate::transform::GeometryError;

/// Maximum element-wise deviation of `MᵀM` from the identity for a matrix
/// to still count as a rotation.
pub const ROTATION_TOLERANCE: f64 = 1e-4;

/// Rotation matrix for a counter-clockwise angle in degrees.
pub fn angle_to_matrix(angle_deg: f64) -> Matrix2<f64> {
    let (s, c) = angle_deg.to_radians().sin_cos();
    Matrix2::new(c, -s, s, c)
}

/// Recover the angle (degrees, in `(-180, 180]`) of a pure rotation matrix.
///
/// Fails with [`GeometryError::NotARotation`] when the matrix is not
/// orthonormal within [`ROTATION_TOLERANCE`] or is a reflection.
pub fn matrix_to_angle(m: &Matrix2<f64>) -> Result<f64, GeometryError> {
    let determinant = m.determinant();
    let deviation = (m.transpose() * m - Matrix2::identity()).abs().max();
    if !deviation.is_finite() || deviation > ROTATION_TOLERANCE || determinant <= 0.0 {
        return Err(GeometryError::NotARotation {
            deviation,
            determinant,
        });
    }
    Ok(m[(1, 0)].atan2(m[(0, 0)]).to_degrees())
}

/// Split a similarity matrix into its rotation angle (degrees) and isotropic
/// scale: `m = scale · R(angle)`.
///
/// Shear, anisotropic scale and reflections are rejected with
/// [`GeometryError::NotARotation`]; a vanishing determinant is
/// [`GeometryError::Singular`].
pub fn similarity_decompose(m: &Matrix2<f64>) -> Result<(f64, f64), GeometryError> {
    let determinant = m.determinant();
    let bound = m.column(0).norm() * m.column(1).norm();
    if !determinant.is_finite()
        || determinant.abs() <= crate::transform::SINGULAR_RELATIVE_TOLERANCE * bound
    {
        return Err(GeometryError::Singular { determinant });
    }
    if determinant < 0.0 {
        return Err(GeometryError::NotARotation {
            deviation: f64::NAN,
            determinant,
        });
    }
    let scale = determinant.sqrt();
    let angle = matrix_to_angle(&(m / scale))?;
    Ok((angle, scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_angle_matrix_round_trip() {
        for angle in [-179.5, -90.0, -12.6611, 0.0, 0.25, 45.0, 86.0, 180.0] {
            let back = matrix_to_angle(&angle_to_matrix(angle)).unwrap();
            assert_abs_diff_eq!(back, angle, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rotation_direction_is_counter_clockwise() {
        let m = angle_to_matrix(90.0);
        let v = m * nalgebra::Vector2::new(1.0, 0.0);
        assert_abs_diff_eq!(v.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shear_is_not_a_rotation() {
        let shear = Matrix2::new(1.0, 0.2, 0.0, 1.0);
        let err = matrix_to_angle(&shear).unwrap_err();
        assert!(matches!(err, GeometryError::NotARotation { .. }));
    }

    #[test]
    fn test_reflection_is_not_a_rotation() {
        let mirror = Matrix2::new(1.0, 0.0, 0.0, -1.0);
        assert!(matrix_to_angle(&mirror).is_err());
        assert!(similarity_decompose(&mirror).is_err());
    }

    #[test]
    fn test_scaled_rotation_is_not_a_pure_rotation() {
        let m = angle_to_matrix(10.0) * 1.01;
        assert!(matrix_to_angle(&m).is_err());
    }

    #[test]
    fn test_similarity_decompose_recovers_scale() {
        let m = angle_to_matrix(-12.6611) * 1.0125;
        let (angle, scale) = similarity_decompose(&m).unwrap();
        assert_abs_diff_eq!(angle, -12.6611, epsilon = 1e-9);
        assert_abs_diff_eq!(scale, 1.0125, epsilon = 1e-12);
    }

    #[test]
    fn test_similarity_decompose_accepts_imod_precision() {
        // Seven-decimal rows as written by IMOD.
        let m = Matrix2::new(0.9796340, -0.1974376, 0.1974376, 0.9796341);
        let (angle, scale) = similarity_decompose(&m).unwrap();
        assert!(angle > 11.0 && angle < 12.0, "angle = {}", angle);
        assert_abs_diff_eq!(scale, 0.99933, epsilon = 1e-4);
    }

    #[test]
    fn test_similarity_decompose_rejects_anisotropy() {
        let m = Matrix2::new(1.05, 0.0, 0.0, 0.95);
        assert!(matches!(
            similarity_decompose(&m),
            Err(GeometryError::NotARotation { .. })
        ));
    }

    #[test]
    fn test_similarity_decompose_rejects_singular() {
        let m = Matrix2::new(1.0, 1.0, 1.0, 1.0);
        assert!(matches!(
            similarity_decompose(&m),
            Err(GeometryError::Singular { .. })
        ));
    }
}
