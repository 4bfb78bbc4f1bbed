//! Closed-form factorization of a planar projection into intrinsic and rigid parts.
//!
//! A world→image affine map `P` (extended to 3×3 with a `[0, 0, 1]` row) is
//! split as `P = F · R` where
//!
//! ```text
//!     | mx alpha 0 |        | r11 r12 t1 |
//! F = | 0   my   0 |    R = | r21 r22 t2 |
//!     | 0   0    1 |        | 0   0   1  |
//! ```
//!
//! `mx` and `my` are pixel magnifications (pixels per world unit) and `alpha`
//! is the skew term.

use crate::camera::CalibrationError;
use log::debug;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Magnitudes below this are treated as a zero magnification.
const MIN_MAGNIFICATION: f64 = 1e-12;

/// Rotation-plus-translation part of a factorized projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub r11: f64,
    pub r12: f64,
    pub r21: f64,
    pub r22: f64,
    pub t1: f64,
    pub t2: f64,
}

impl RigidTransform {
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.r11, self.r12, self.t1, //
            self.r21, self.r22, self.t2, //
            0.0, 0.0, 1.0,
        )
    }
}

/// Upper-triangular intrinsic matrix recovered by [`IntrinsicMatrix::factorize`],
/// together with the rigid transform it was separated from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicMatrix {
    pub mx: f64,
    pub my: f64,
    pub alpha: f64,
    pub rigid: RigidTransform,
}

impl IntrinsicMatrix {
    /// Factorizes a homogeneous projection matrix into `F · R`.
    ///
    /// `my` comes from the norm of the second row, `mx` from the part of the
    /// first row orthogonal to it. Only the top two rows of `projection` are
    /// read.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::DegenerateProjection`] when either magnification
    /// vanishes (rank-deficient projection).
    pub fn factorize(projection: &Matrix3<f64>) -> Result<Self, CalibrationError> {
        let m = projection;
        let my = m[(1, 0)].hypot(m[(1, 1)]);
        if my.is_nan() || my <= MIN_MAGNIFICATION {
            debug!("factorize: second projection row vanishes");
            return Err(CalibrationError::DegenerateProjection);
        }
        let r21 = m[(1, 0)] / my;
        let r22 = m[(1, 1)] / my;
        let t2 = m[(1, 2)] / my;

        let alpha = m[(0, 0)] * r21 + m[(0, 1)] * r22;
        let u1 = m[(0, 0)] - alpha * r21;
        let u2 = m[(0, 1)] - alpha * r22;
        let mx = u1.hypot(u2);
        if mx.is_nan() || mx <= MIN_MAGNIFICATION {
            debug!("factorize: first projection row is parallel to the second");
            return Err(CalibrationError::DegenerateProjection);
        }

        let rigid = RigidTransform {
            r11: u1 / mx,
            r12: u2 / mx,
            r21,
            r22,
            t1: (m[(0, 2)] - alpha * t2) / mx,
            t2,
        };

        Ok(Self {
            mx,
            my,
            alpha,
            rigid,
        })
    }

    /// The 3×3 intrinsic matrix `F`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.mx, self.alpha, 0.0, //
            0.0, self.my, 0.0, //
            0.0, 0.0, 1.0,
        )
    }

    /// Recomposes `F · R`.
    pub fn projection(&self) -> Matrix3<f64> {
        self.matrix() * self.rigid.matrix()
    }

    /// Physical size of one pixel along x and y (world units per pixel).
    pub fn pixel_size(&self) -> (f64, f64) {
        (1.0 / self.mx, 1.0 / self.my)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_factorize_pure_scale() {
        let p = Matrix3::new(2.0, 0.0, 5.0, 0.0, 3.0, -4.0, 0.0, 0.0, 1.0);
        let k = IntrinsicMatrix::factorize(&p).unwrap();
        assert_relative_eq!(k.mx, 2.0, epsilon = 1e-12);
        assert_relative_eq!(k.my, 3.0, epsilon = 1e-12);
        assert_relative_eq!(k.alpha, 0.0, epsilon = 1e-12);
        assert_relative_eq!(k.rigid.t1, 2.5, epsilon = 1e-12);
        assert_relative_eq!(k.rigid.t2, -4.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_factorize_recomposes_rotated_skewed_projection() {
        let theta: f64 = 0.3;
        let rigid = Matrix3::new(
            theta.cos(),
            -theta.sin(),
            12.0,
            theta.sin(),
            theta.cos(),
            -7.0,
            0.0,
            0.0,
            1.0,
        );
        let f = Matrix3::new(4.0, 0.2, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 1.0);
        let p = f * rigid;

        let k = IntrinsicMatrix::factorize(&p).unwrap();
        assert_relative_eq!(k.mx, 4.0, epsilon = 1e-9);
        assert_relative_eq!(k.my, 5.0, epsilon = 1e-9);
        assert_relative_eq!(k.alpha, 0.2, epsilon = 1e-9);
        assert_relative_eq!(k.projection(), p, epsilon = 1e-9);
        assert_relative_eq!(k.rigid.matrix(), rigid, epsilon = 1e-9);
    }

    #[test]
    fn test_factorize_degenerate() {
        let zero_row = Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            IntrinsicMatrix::factorize(&zero_row),
            Err(CalibrationError::DegenerateProjection)
        ));

        let parallel_rows = Matrix3::new(2.0, 2.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            IntrinsicMatrix::factorize(&parallel_rows),
            Err(CalibrationError::DegenerateProjection)
        ));
    }

    #[test]
    fn test_pixel_size() {
        let p = Matrix3::new(4.0, 0.0, 0.0, 0.0, 8.0, 0.0, 0.0, 0.0, 1.0);
        let k = IntrinsicMatrix::factorize(&p).unwrap();
        assert_eq!(k.pixel_size(), (0.25, 0.125));
    }
}
