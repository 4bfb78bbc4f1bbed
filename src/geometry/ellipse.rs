//! Algebraic least-squares ellipse fitting.
//!
//! Points are normalized (centroid at the origin, mean distance √2), the
//! conic `A x² + B xy + C y² + D x + E y + F = 0` minimizing the algebraic
//! error under `‖(A..F)‖ = 1` is taken from the smallest eigenvector of the
//! scatter matrix, then mapped back to pixel coordinates and converted to
//! geometric form.

use crate::camera::{CalibrationError, Circle};
use nalgebra::{DMatrix, DVector, Matrix6, Point2, Vector6};
use std::f64::consts::{FRAC_PI_2, SQRT_2};

/// Fewest points that determine a conic.
pub const MIN_ELLIPSE_POINTS: usize = 5;

/// Geometric ellipse parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub cx: f64,
    pub cy: f64,
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Major-axis angle from +x, radians.
    pub angle: f64,
}

impl Ellipse {
    pub fn mean_radius(&self) -> f64 {
        0.5 * (self.a + self.b)
    }

    /// Circle with the ellipse's center and mean semi-axis.
    pub fn to_circle(&self) -> Circle {
        Circle::new(self.cx, self.cy, self.mean_radius())
    }
}

/// Fits an ellipse to `points`.
///
/// # Errors
///
/// [`CalibrationError::DegenerateFit`] with fewer than [`MIN_ELLIPSE_POINTS`]
/// points, for coincident or collinear input, or when the best conic is not
/// a real ellipse.
pub fn fit_ellipse(points: &[Point2<f64>]) -> Result<Ellipse, CalibrationError> {
    if points.len() < MIN_ELLIPSE_POINTS {
        return Err(CalibrationError::DegenerateFit(format!(
            "ellipse fit needs at least {} points, got {}",
            MIN_ELLIPSE_POINTS,
            points.len()
        )));
    }

    let (mean_x, mean_y, scale) = normalization_params(points)
        .ok_or_else(|| CalibrationError::DegenerateFit("coincident points".to_string()))?;

    let mut scatter = Matrix6::<f64>::zeros();
    for p in points {
        let x = (p.x - mean_x) * scale;
        let y = (p.y - mean_y) * scale;
        let row = Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        scatter += row * row.transpose();
    }

    let eigen = scatter.symmetric_eigen();
    let (smallest, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| CalibrationError::DegenerateFit("empty eigen decomposition".to_string()))?;
    let coeffs = eigen.eigenvectors.column(smallest).into_owned();

    let conic = denormalize_conic(&coeffs, mean_x, mean_y, scale);
    conic_to_ellipse(&conic)
        .ok_or_else(|| CalibrationError::DegenerateFit("conic is not an ellipse".to_string()))
}

/// Algebraic (Kåsa) circle fit: least squares on `x² + y² + D x + E y + F = 0`.
///
/// Needs at least three non-collinear points.
pub fn fit_circle_algebraic(points: &[Point2<f64>]) -> Result<Circle, CalibrationError> {
    if points.len() < 3 {
        return Err(CalibrationError::DegenerateFit(format!(
            "circle fit needs at least 3 points, got {}",
            points.len()
        )));
    }
    let (mean_x, mean_y, scale) = normalization_params(points)
        .ok_or_else(|| CalibrationError::DegenerateFit("coincident points".to_string()))?;

    let n = points.len();
    let mut a = DMatrix::zeros(n, 3);
    let mut b = DVector::zeros(n);
    for (i, p) in points.iter().enumerate() {
        let x = (p.x - mean_x) * scale;
        let y = (p.y - mean_y) * scale;
        a[(i, 0)] = x;
        a[(i, 1)] = y;
        a[(i, 2)] = 1.0;
        b[i] = -(x * x + y * y);
    }

    let svd = a.svd(true, true);
    if svd.singular_values.min() < 1e-9 {
        return Err(CalibrationError::DegenerateFit(
            "circle samples are collinear".to_string(),
        ));
    }
    let solution = svd
        .solve(&b, 1e-12)
        .map_err(|e| CalibrationError::DegenerateFit(e.to_string()))?;

    let cx = -0.5 * solution[0];
    let cy = -0.5 * solution[1];
    let r_sq = cx * cx + cy * cy - solution[2];
    if r_sq <= 0.0 || !r_sq.is_finite() {
        return Err(CalibrationError::DegenerateFit(
            "circle fit produced an imaginary radius".to_string(),
        ));
    }
    Ok(Circle::new(
        cx / scale + mean_x,
        cy / scale + mean_y,
        r_sq.sqrt() / scale,
    ))
}

/// Centroid and isotropic scale taking mean distance to √2.
/// `None` when every point coincides.
fn normalization_params(points: &[Point2<f64>]) -> Option<(f64, f64, f64)> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| (p.x - mean_x).hypot(p.y - mean_y))
        .sum::<f64>()
        / n;
    if mean_dist <= 1e-15 {
        return None;
    }
    Some((mean_x, mean_y, SQRT_2 / mean_dist))
}

/// Undoes `x' = s (x - mx)`, `y' = s (y - my)` on conic coefficients.
fn denormalize_conic(c: &Vector6<f64>, mx: f64, my: f64, s: f64) -> [f64; 6] {
    let [a_, b_, c_, d_, e_, f_] = [c[0], c[1], c[2], c[3], c[4], c[5]];
    let s2 = s * s;

    let a = a_ * s2;
    let b = b_ * s2;
    let c = c_ * s2;
    let d = -2.0 * a_ * s2 * mx - b_ * s2 * my + d_ * s;
    let e = -b_ * s2 * mx - 2.0 * c_ * s2 * my + e_ * s;
    let f =
        a_ * s2 * mx * mx + b_ * s2 * mx * my + c_ * s2 * my * my - d_ * s * mx - e_ * s * my + f_;

    [a, b, c, d, e, f]
}

fn conic_to_ellipse(conic: &[f64; 6]) -> Option<Ellipse> {
    let [a, b, c, d, e, f] = *conic;

    // Near-zero discriminants come from line pairs and parabolas.
    let denom = 4.0 * a * c - b * b;
    if denom <= 1e-10 * (a * a + b * b + c * c) {
        return None;
    }
    let cx = (b * e - 2.0 * c * d) / denom;
    let cy = (b * d - 2.0 * a * e) / denom;

    // Conic value at the center.
    let f_center = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;
    if f_center.abs() < 1e-300 {
        return None;
    }

    let sum = a + c;
    let diff = ((a - c).powi(2) + b * b).sqrt();
    let lambda1 = 0.5 * (sum + diff);
    let lambda2 = 0.5 * (sum - diff);

    let a_sq = -f_center / lambda1;
    let b_sq = -f_center / lambda2;
    if !(a_sq > 0.0 && b_sq > 0.0) {
        return None;
    }

    let angle = 0.5 * b.atan2(a - c);
    let (semi_a, semi_b, angle) = if a_sq >= b_sq {
        (a_sq.sqrt(), b_sq.sqrt(), angle)
    } else {
        (b_sq.sqrt(), a_sq.sqrt(), angle + FRAC_PI_2)
    };

    let ellipse = Ellipse {
        cx,
        cy,
        a: semi_a,
        b: semi_b,
        angle,
    };
    let finite = [ellipse.cx, ellipse.cy, ellipse.a, ellipse.b]
        .iter()
        .all(|v| v.is_finite());
    finite.then_some(ellipse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sample_ellipse(cx: f64, cy: f64, a: f64, b: f64, angle: f64, n: usize) -> Vec<Point2<f64>> {
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                let (px, py) = (a * t.cos(), b * t.sin());
                Point2::new(
                    cx + angle.cos() * px - angle.sin() * py,
                    cy + angle.sin() * px + angle.cos() * py,
                )
            })
            .collect()
    }

    #[test]
    fn test_fit_ellipse_exact() {
        let points = sample_ellipse(100.0, 80.0, 30.0, 15.0, 0.3, 40);
        let ellipse = fit_ellipse(&points).unwrap();
        assert_relative_eq!(ellipse.cx, 100.0, epsilon = 1e-6);
        assert_relative_eq!(ellipse.cy, 80.0, epsilon = 1e-6);
        assert_relative_eq!(ellipse.a, 30.0, epsilon = 1e-6);
        assert_relative_eq!(ellipse.b, 15.0, epsilon = 1e-6);
        assert_relative_eq!(ellipse.mean_radius(), 22.5, epsilon = 1e-6);
    }

    #[test]
    fn test_fit_ellipse_circle_from_five_points() {
        let points = sample_ellipse(-4.0, 7.0, 3.0, 3.0, 0.0, 5);
        let circle = fit_ellipse(&points).unwrap().to_circle();
        assert_relative_eq!(circle.x, -4.0, epsilon = 1e-6);
        assert_relative_eq!(circle.y, 7.0, epsilon = 1e-6);
        assert_relative_eq!(circle.r, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fit_ellipse_rejects_degenerate_input() {
        let few = sample_ellipse(0.0, 0.0, 5.0, 5.0, 0.0, 4);
        assert!(matches!(
            fit_ellipse(&few),
            Err(CalibrationError::DegenerateFit(_))
        ));

        let line: Vec<Point2<f64>> = (0..10)
            .map(|i| Point2::new(i as f64, 2.0 * i as f64))
            .collect();
        assert!(fit_ellipse(&line).is_err());

        let same = vec![Point2::new(1.0, 1.0); 8];
        assert!(fit_ellipse(&same).is_err());
    }

    #[test]
    fn test_fit_circle_algebraic() {
        let points = vec![
            Point2::new(60.0, 50.0),
            Point2::new(50.0, 60.0),
            Point2::new(40.0, 50.0),
        ];
        let circle = fit_circle_algebraic(&points).unwrap();
        assert_relative_eq!(circle.x, 50.0, epsilon = 1e-9);
        assert_relative_eq!(circle.y, 50.0, epsilon = 1e-9);
        assert_relative_eq!(circle.r, 10.0, epsilon = 1e-9);

        let collinear = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
        ];
        assert!(fit_circle_algebraic(&collinear).is_err());
        assert!(fit_circle_algebraic(&points[..2]).is_err());
    }
}
