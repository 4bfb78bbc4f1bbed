//! Linear calibration from image/world point correspondences.
//!
//! [`calibrate`] normalizes both point sets, fits a 2×3 affine map between
//! them with [`solve_projection`], undoes the normalizations and factorizes
//! the result into an [`IntrinsicMatrix`].

use crate::camera::{CalibrationError, IntrinsicMatrix, SearchConfig};
use crate::detection::detect_grid_centers;
use crate::geometry::{generate_world_grid, normalization_matrix, transform_points};
use crate::util::{compute_projection_error, ProjectionError};
use image::GrayImage;
use log::{debug, info, warn};
use nalgebra::{Matrix2x3, Matrix3, Matrix6, Point2, Vector6};

/// Ratio of smallest to largest singular value below which the normal
/// equations are considered singular.
const SINGULARITY_THRESHOLD: f64 = 1e-12;

/// Least-squares affine map taking `world_points` onto `image_points`.
///
/// Each correspondence contributes the rows `[x, y, 1, 0, 0, 0]` and
/// `[0, 0, 0, x, y, 1]` of a 2N×6 system whose right-hand side is the stacked
/// image coordinates. The system is solved through its normal equations, so
/// callers should pass normalized coordinates.
///
/// # Errors
///
/// * [`CalibrationError::InvalidInput`] if the sets are empty or differ in length.
/// * [`CalibrationError::SingularSystem`] if the world points do not span the plane.
pub fn solve_projection(
    image_points: &[Point2<f64>],
    world_points: &[Point2<f64>],
) -> Result<Matrix2x3<f64>, CalibrationError> {
    if image_points.len() != world_points.len() {
        warn!(
            "solve_projection: point counts differ, image {} world {}",
            image_points.len(),
            world_points.len()
        );
        return Err(CalibrationError::InvalidInput(format!(
            "image and world point counts differ: {} vs {}",
            image_points.len(),
            world_points.len()
        )));
    }
    if image_points.is_empty() {
        return Err(CalibrationError::InvalidInput(
            "no point correspondences".to_string(),
        ));
    }

    let mut ata = Matrix6::<f64>::zeros();
    let mut atb = Vector6::<f64>::zeros();
    for (image, world) in image_points.iter().zip(world_points) {
        let row_x = Vector6::new(world.x, world.y, 1.0, 0.0, 0.0, 0.0);
        let row_y = Vector6::new(0.0, 0.0, 0.0, world.x, world.y, 1.0);
        ata += row_x * row_x.transpose() + row_y * row_y.transpose();
        atb += row_x * image.x + row_y * image.y;
    }

    let svd = ata.svd(true, true);
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    if max_sv <= 0.0 || min_sv <= SINGULARITY_THRESHOLD * max_sv {
        warn!(
            "solve_projection: singular system, singular values range {:e}..{:e}",
            min_sv, max_sv
        );
        return Err(CalibrationError::SingularSystem);
    }
    let x = svd.solve(&atb, 0.0).map_err(|err| {
        debug!("solve_projection: {}", err);
        CalibrationError::SingularSystem
    })?;

    Ok(Matrix2x3::new(x[0], x[1], x[2], x[3], x[4], x[5]))
}

/// Affine map from `world_points` to `image_points` in unnormalized coordinates,
/// as a homogeneous 3×3 matrix.
///
/// Both sets are normalized before the solve; the result is
/// `N_image⁻¹ · P · N_world`.
pub fn estimate_projection(
    image_points: &[Point2<f64>],
    world_points: &[Point2<f64>],
) -> Result<Matrix3<f64>, CalibrationError> {
    if image_points.len() != world_points.len() {
        return Err(CalibrationError::InvalidInput(format!(
            "image and world point counts differ: {} vs {}",
            image_points.len(),
            world_points.len()
        )));
    }

    let image_norm = normalization_matrix(image_points)?;
    let world_norm = normalization_matrix(world_points)?;
    let normalized_image = transform_points(&image_norm, image_points);
    let normalized_world = transform_points(&world_norm, world_points);

    let affine = solve_projection(&normalized_image, &normalized_world)?;
    let mut projection = Matrix3::identity();
    projection.fixed_view_mut::<2, 3>(0, 0).copy_from(&affine);

    let image_denorm = image_norm
        .try_inverse()
        .ok_or(CalibrationError::SingularSystem)?;
    Ok(image_denorm * projection * world_norm)
}

/// Recovers the intrinsic matrix from corresponding image and world points.
///
/// # Errors
///
/// * [`CalibrationError::InvalidInput`] for mismatched, empty or coincident point sets.
/// * [`CalibrationError::SingularSystem`] if the least-squares system has no solution.
/// * [`CalibrationError::DegenerateProjection`] if the fitted map has a zero magnification.
pub fn calibrate(
    image_points: &[Point2<f64>],
    world_points: &[Point2<f64>],
) -> Result<IntrinsicMatrix, CalibrationError> {
    let projection = estimate_projection(image_points, world_points)?;
    let intrinsic = IntrinsicMatrix::factorize(&projection)?;
    debug!(
        "calibrate: mx {:.6}, my {:.6}, alpha {:.6}",
        intrinsic.mx, intrinsic.my, intrinsic.alpha
    );
    Ok(intrinsic)
}

/// Result of [`calibrate_with_report`].
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub intrinsic: IntrinsicMatrix,
    /// World→image map in unnormalized coordinates.
    pub projection: Matrix3<f64>,
    /// Distances between the observed image points and the projected world points.
    pub error: ProjectionError,
}

/// Same as [`calibrate`], also returning the full projection and its
/// residual statistics.
pub fn calibrate_with_report(
    image_points: &[Point2<f64>],
    world_points: &[Point2<f64>],
) -> Result<CalibrationReport, CalibrationError> {
    let projection = estimate_projection(image_points, world_points)?;
    let intrinsic = IntrinsicMatrix::factorize(&projection)?;
    let error = compute_projection_error(&projection, image_points, world_points)?;
    info!(
        "Calibrated {} points: mx {:.6}, my {:.6}, alpha {:.6}, rmse {:.4} px",
        image_points.len(),
        intrinsic.mx,
        intrinsic.my,
        intrinsic.alpha,
        error.rmse
    );
    Ok(CalibrationReport {
        intrinsic,
        projection,
        error,
    })
}

/// Detects the grid described by `config` in `image` and calibrates against
/// the matching world grid.
pub fn calibrate_image(
    image: &GrayImage,
    config: &SearchConfig,
) -> Result<CalibrationReport, CalibrationError> {
    let image_points = detect_grid_centers(image, config)?;
    let world_points = generate_world_grid(&config.grid);
    calibrate_with_report(&image_points, &world_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::GridSpec;
    use approx::assert_relative_eq;
    use image::Luma;
    use imageproc::drawing::draw_filled_circle_mut;

    fn project(projection: &Matrix3<f64>, world: &[Point2<f64>]) -> Vec<Point2<f64>> {
        transform_points(projection, world)
    }

    #[test]
    fn test_calibrate_recovers_scale() {
        let world = generate_world_grid(&GridSpec::new(3, 3, 10.0));
        let projection = Matrix3::new(2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 1.0);
        let image = project(&projection, &world);

        let intrinsic = calibrate(&image, &world).unwrap();
        assert_relative_eq!(intrinsic.mx, 2.0, epsilon = 1e-3);
        assert_relative_eq!(intrinsic.my, 3.0, epsilon = 1e-3);
        assert_relative_eq!(intrinsic.alpha, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_calibrate_rotated_skewed_grid() {
        let theta: f64 = -0.2;
        let rigid = Matrix3::new(
            theta.cos(),
            -theta.sin(),
            150.0,
            theta.sin(),
            theta.cos(),
            80.0,
            0.0,
            0.0,
            1.0,
        );
        let f = Matrix3::new(25.0, 0.5, 0.0, 0.0, 24.0, 0.0, 0.0, 0.0, 1.0);
        let world = generate_world_grid(&GridSpec::new(4, 5, 0.5));
        let image = project(&(f * rigid), &world);

        let report = calibrate_with_report(&image, &world).unwrap();
        assert_relative_eq!(report.intrinsic.mx, 25.0, epsilon = 1e-6);
        assert_relative_eq!(report.intrinsic.my, 24.0, epsilon = 1e-6);
        assert_relative_eq!(report.intrinsic.alpha, 0.5, epsilon = 1e-6);
        assert_relative_eq!(report.projection, f * rigid, epsilon = 1e-6);
        assert!(report.error.max < 1e-6);
    }

    #[test]
    fn test_solve_projection_size_mismatch() {
        let world = generate_world_grid(&GridSpec::new(2, 2, 1.0));
        assert!(matches!(
            solve_projection(&world[..3], &world),
            Err(CalibrationError::InvalidInput(_))
        ));
        assert!(matches!(
            calibrate(&world[..3], &world),
            Err(CalibrationError::InvalidInput(_))
        ));
        assert!(solve_projection(&[], &[]).is_err());
    }

    #[test]
    fn test_solve_projection_singular() {
        let world: Vec<Point2<f64>> = (0..6).map(|i| Point2::new(i as f64, i as f64)).collect();
        let image: Vec<Point2<f64>> = world.iter().map(|p| Point2::new(2.0 * p.x, p.y)).collect();
        assert!(matches!(
            solve_projection(&image, &world),
            Err(CalibrationError::SingularSystem)
        ));
        assert!(matches!(
            calibrate(&image, &world),
            Err(CalibrationError::SingularSystem)
        ));
    }

    #[test]
    fn test_calibrate_image_synthetic_target() {
        let mut image = GrayImage::new(240, 190);
        for r in 0..3 {
            for c in 0..4 {
                let center = (40 + c * 50, 40 + r * 50);
                draw_filled_circle_mut(&mut image, center, 12, Luma([255u8]));
            }
        }
        let config = SearchConfig::new(GridSpec::new(3, 4, 2.0));
        let report = calibrate_image(&image, &config).unwrap();
        assert_relative_eq!(report.intrinsic.mx, 25.0, epsilon = 0.1);
        assert_relative_eq!(report.intrinsic.my, 25.0, epsilon = 0.1);
        assert!(report.error.rmse < 1.0);
    }
}
