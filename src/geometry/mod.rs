//! Point-set geometry used around the solvers.
//!
//! * [`generate_world_grid`] builds the reference target coordinates.
//! * [`order_grid`] puts detected features into the same row-major order.
//! * [`normalization_matrix`] conditions point sets before least squares.
//! * [`sample_circle`] samples equally spaced points on a circle.

use crate::camera::{CalibrationError, Circle, GridSpec};
use log::warn;
use nalgebra::{Matrix3, Point2};
use std::f64::consts::{PI, SQRT_2};

pub mod ellipse;

pub use ellipse::{fit_circle_algebraic, fit_ellipse, Ellipse, MIN_ELLIPSE_POINTS};

/// Anything with an image position that can be sorted into a grid.
pub trait GridFeature: Copy {
    fn position(&self) -> Point2<f64>;
}

impl GridFeature for Point2<f64> {
    fn position(&self) -> Point2<f64> {
        *self
    }
}

impl GridFeature for Circle {
    fn position(&self) -> Point2<f64> {
        self.center()
    }
}

/// Generates the world coordinates of every fiducial in row-major order.
///
/// Point `i` is `((i % cols) * step, (i / cols) * step)`. An empty grid
/// yields an empty vector.
pub fn generate_world_grid(grid: &GridSpec) -> Vec<Point2<f64>> {
    if grid.is_empty() {
        return Vec::new();
    }
    (0..grid.count())
        .map(|i| {
            let row = (i / grid.cols) as f64;
            let col = (i % grid.cols) as f64;
            Point2::new(col * grid.step, row * grid.step)
        })
        .collect()
}

/// Sorts features into canonical row-major order.
///
/// Features are sorted by `y`, split into `grid.rows` runs of `grid.cols`,
/// and each run is sorted by `x`.
///
/// # Errors
///
/// [`CalibrationError::GridSizeMismatch`] if `features.len() != grid.count()`.
pub fn order_grid<T: GridFeature>(
    mut features: Vec<T>,
    grid: &GridSpec,
) -> Result<Vec<T>, CalibrationError> {
    if grid.is_empty() || features.len() != grid.count() {
        warn!(
            "order_grid: grid size mismatch, expected {}x{} = {} features, got {}",
            grid.rows,
            grid.cols,
            grid.count(),
            features.len()
        );
        return Err(CalibrationError::GridSizeMismatch {
            expected: grid.count(),
            found: features.len(),
        });
    }

    features.sort_by(|a, b| a.position().y.total_cmp(&b.position().y));
    for row in features.chunks_mut(grid.cols) {
        row.sort_by(|a, b| a.position().x.total_cmp(&b.position().x));
    }
    Ok(features)
}

/// Similarity transform taking `points` to zero centroid and mean distance √2
/// from the origin.
///
/// # Errors
///
/// [`CalibrationError::InvalidInput`] for an empty set or coincident points.
pub fn normalization_matrix(points: &[Point2<f64>]) -> Result<Matrix3<f64>, CalibrationError> {
    if points.is_empty() {
        return Err(CalibrationError::InvalidInput(
            "cannot normalize an empty point set".to_string(),
        ));
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let center = Point2::new(cx, cy);
    let mean_distance = points.iter().map(|p| (p - center).norm()).sum::<f64>() / n;

    if mean_distance <= f64::EPSILON {
        return Err(CalibrationError::InvalidInput(
            "cannot normalize coincident points".to_string(),
        ));
    }
    let s = SQRT_2 / mean_distance;

    Ok(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Applies a homogeneous 2D transform to every point.
pub fn transform_points(transform: &Matrix3<f64>, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| transform.transform_point(p))
        .collect()
}

/// Samples `samples` points at equal angular steps around `circle`, starting
/// at angle zero.
pub fn sample_circle(circle: &Circle, samples: usize) -> Vec<Point2<f64>> {
    if samples == 0 {
        return Vec::new();
    }
    let delta = 2.0 * PI / samples as f64;
    (0..samples)
        .map(|i| {
            let t = i as f64 * delta;
            Point2::new(circle.x + t.cos() * circle.r, circle.y + t.sin() * circle.r)
        })
        .collect()
}
