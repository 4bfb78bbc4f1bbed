use crate::camera::CalibrationError;
use image::GrayImage;
use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tiny_solver::optimizer::OptimizerOptions;

/// Summary statistics of per-point residual distances, in pixels.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

impl ProjectionError {
    /// Statistics over a set of non-negative residual distances.
    pub fn from_residuals(errors: &[f64]) -> Result<Self, CalibrationError> {
        if errors.is_empty() {
            return Err(CalibrationError::InvalidInput(
                "no residuals to summarize".to_string(),
            ));
        }

        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let variance = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let rmse = (errors.iter().map(|x| x.powi(2)).sum::<f64>() / n).sqrt();
        let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Ok(Self {
            rmse,
            min,
            max,
            mean,
            stddev: variance.sqrt(),
            median,
        })
    }
}

/// Residual statistics of `|projection · world − image|` over all
/// correspondences.
///
/// # Errors
///
/// [`CalibrationError::InvalidInput`] if the point sets are empty or differ
/// in length.
pub fn compute_projection_error(
    projection: &Matrix3<f64>,
    image_points: &[Point2<f64>],
    world_points: &[Point2<f64>],
) -> Result<ProjectionError, CalibrationError> {
    if image_points.len() != world_points.len() {
        return Err(CalibrationError::InvalidInput(format!(
            "image and world point counts differ: {} vs {}",
            image_points.len(),
            world_points.len()
        )));
    }

    let errors: Vec<f64> = image_points
        .iter()
        .zip(world_points)
        .map(|(image, world)| (projection.transform_point(world) - image).norm())
        .collect();
    ProjectionError::from_residuals(&errors)
}

/// Loads an image file and converts it to 8-bit grayscale.
pub fn load_gray_image(image_path: &str) -> Result<GrayImage, CalibrationError> {
    let img = image::open(image_path)?;
    Ok(img.to_luma8())
}

/// Levenberg-Marquardt options with an iteration cap.
pub fn solver_options(max_iterations: usize) -> OptimizerOptions {
    OptimizerOptions {
        max_iteration: max_iterations,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_projection_error_statistics() {
        let stats = ProjectionError::from_residuals(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.median, 2.5);
        assert_relative_eq!(stats.min, 1.0);
        assert_relative_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.rmse, 7.5_f64.sqrt());
        assert_relative_eq!(stats.stddev, 1.25_f64.sqrt());

        assert!(ProjectionError::from_residuals(&[]).is_err());
    }

    #[test]
    fn test_compute_projection_error() {
        let projection = Matrix3::new(2.0, 0.0, 1.0, 0.0, 2.0, 1.0, 0.0, 0.0, 1.0);
        let world = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        let image = vec![
            Point2::new(1.0, 1.0),
            Point2::new(3.0, 1.0),
            Point2::new(1.0, 6.0),
        ];

        let stats = compute_projection_error(&projection, &image, &world).unwrap();
        assert_relative_eq!(stats.min, 0.0);
        assert_relative_eq!(stats.max, 3.0);
        assert_relative_eq!(stats.median, 0.0);
        assert_relative_eq!(stats.mean, 1.0);

        assert!(compute_projection_error(&projection, &image[..2], &world).is_err());
    }

    #[test]
    fn test_load_gray_image_missing_file() {
        assert!(matches!(
            load_gray_image("does/not/exist.png"),
            Err(CalibrationError::ImageError(_))
        ));
    }

    #[test]
    fn test_solver_options() {
        let options = solver_options(7);
        assert_eq!(options.max_iteration, 7);
    }
}
