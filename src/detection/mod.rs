//! Circle-grid detection in a grayscale image.
//!
//! The pipeline is:
//! 1. Canny edge detection with `[0, edge_strength]` hysteresis bounds.
//! 2. 8-connected labelling of the edge map and one bounding rectangle per
//!    component.
//! 3. A roundness filter (aspect ratio within 0.1 of 1) and an optional ROI
//!    containment filter, keeping the `rows * cols` largest rectangles.
//! 4. An ellipse fit per rectangle, run in parallel over a shared read-only
//!    edge map.
//! 5. Row-major ordering of the located circles.

use crate::camera::{CalibrationError, Circle, Rect, SearchConfig};
use crate::geometry::{fit_ellipse, order_grid, GridFeature};
use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{debug, warn};
use nalgebra::Point2;
use rayon::prelude::*;

/// Largest accepted `|1 - width / height|` for a candidate component.
pub const ROUNDNESS_TOLERANCE: f64 = 0.1;

/// Canny needs a one-pixel border on each side.
const MIN_IMAGE_SIDE: u32 = 3;

/// Runs the edge detector used by the grid search.
///
/// The lower hysteresis bound is zero with strict comparison, so every
/// non-suppressed gradient connected to a strong edge is kept.
pub fn detect_edges(image: &GrayImage, edge_strength: f64) -> GrayImage {
    let low = f32::MIN_POSITIVE;
    let high = (edge_strength as f32).max(low);
    canny(image, low, high)
}

/// Returns `true` when `rect` is round enough and lies inside `roi`.
pub fn is_valid_component(rect: &Rect, roi: Option<&Rect>) -> bool {
    if (1.0 - rect.aspect_ratio()).abs() > ROUNDNESS_TOLERANCE {
        return false;
    }
    match roi {
        Some(roi) => roi.contains_rect(rect),
        None => true,
    }
}

/// Bounding rectangles of every 8-connected component of `edges`, indexed by
/// label minus one.
pub fn component_rectangles(edges: &GrayImage) -> Vec<Rect> {
    let labels = connected_components(edges, Connectivity::Eight, Luma([0u8]));
    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;

    // (min_x, min_y, max_x, max_y) per label
    let mut bounds: Vec<Option<(u32, u32, u32, u32)>> = vec![None; max_label];
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        let entry = &mut bounds[label - 1];
        *entry = Some(match *entry {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds
        .into_iter()
        .flatten()
        .map(|(x0, y0, x1, y1)| Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1))
        .collect()
}

/// Selects the `rows * cols` largest round components of `edges`.
///
/// # Errors
///
/// [`CalibrationError::InsufficientCandidates`] when fewer valid components
/// exist than the grid needs.
pub fn find_candidate_rectangles(
    edges: &GrayImage,
    config: &SearchConfig,
) -> Result<Vec<Rect>, CalibrationError> {
    let needed = config.grid.count();
    let mut candidates: Vec<Rect> = component_rectangles(edges)
        .into_iter()
        .filter(|rect| is_valid_component(rect, config.roi.as_ref()))
        .collect();

    if candidates.len() < needed {
        warn!(
            "find_candidate_rectangles: count of components too small, need {}, found {}",
            needed,
            candidates.len()
        );
        return Err(CalibrationError::InsufficientCandidates {
            needed,
            found: candidates.len(),
        });
    }

    candidates.sort_by(|a, b| b.area().cmp(&a.area()));
    candidates.truncate(needed);
    debug!(
        "find_candidate_rectangles: kept {} of the round components",
        candidates.len()
    );
    Ok(candidates)
}

/// Coordinates of non-zero edge pixels inside `rect`, relative to its origin.
fn edge_points_in(edges: &GrayImage, rect: &Rect) -> Vec<Point2<f64>> {
    let x_end = rect.right().min(edges.width());
    let y_end = rect.bottom().min(edges.height());
    let mut points = Vec::new();
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            if edges.get_pixel(x, y)[0] != 0 {
                points.push(Point2::new((x - rect.x) as f64, (y - rect.y) as f64));
            }
        }
    }
    points
}

/// Fits a circle to the edge pixels inside `rect`, in full-image coordinates.
///
/// The radius is the mean of the fitted ellipse's semi-axes.
pub fn locate_circle_checked(edges: &GrayImage, rect: &Rect) -> Result<Circle, CalibrationError> {
    let points = edge_points_in(edges, rect);
    let ellipse = fit_ellipse(&points)?;
    let circle = ellipse.to_circle();
    Ok(Circle::new(
        circle.x + rect.x as f64,
        circle.y + rect.y as f64,
        circle.r,
    ))
}

/// Like [`locate_circle_checked`], but a failed fit yields the zero
/// [`Circle`] sentinel so one bad cell does not abort a whole grid.
pub fn locate_circle(edges: &GrayImage, rect: &Rect) -> Circle {
    locate_circle_checked(edges, rect).unwrap_or_else(|err| {
        warn!("locate_circle: {} in {:?}", err, rect);
        Circle::default()
    })
}

/// Center of the circle located inside `rect`.
pub fn locate_circle_center(edges: &GrayImage, rect: &Rect) -> Point2<f64> {
    locate_circle(edges, rect).center()
}

/// Fits every candidate component of `edges` and orders the results.
fn locate_grid<T, F>(
    edges: &GrayImage,
    config: &SearchConfig,
    fit: F,
) -> Result<Vec<T>, CalibrationError>
where
    T: GridFeature + Send,
    F: Fn(&GrayImage, &Rect) -> T + Sync,
{
    let rectangles = find_candidate_rectangles(edges, config)?;

    // par_iter keeps the output aligned with `rectangles`.
    let features: Vec<T> = rectangles
        .par_iter()
        .map(|rect| fit(edges, rect))
        .collect();

    order_grid(features, &config.grid)
}

fn find_grid<T, F>(
    image: &GrayImage,
    config: &SearchConfig,
    fit: F,
) -> Result<Vec<T>, CalibrationError>
where
    T: GridFeature + Send,
    F: Fn(&GrayImage, &Rect) -> T + Sync,
{
    config.validate()?;
    if image.width() < MIN_IMAGE_SIDE || image.height() < MIN_IMAGE_SIDE {
        return Err(CalibrationError::InvalidInput(format!(
            "image {}x{} is too small for edge detection",
            image.width(),
            image.height()
        )));
    }

    let edges = detect_edges(image, config.edge_strength);
    locate_grid(&edges, config, fit)
}

/// Detects the calibration grid and returns its circles in row-major order.
///
/// # Errors
///
/// * [`CalibrationError::InvalidInput`] for an invalid configuration or an
///   image smaller than 3×3.
/// * [`CalibrationError::InsufficientCandidates`] when too few round
///   components are found.
/// * [`CalibrationError::GridSizeMismatch`] if ordering fails.
pub fn detect_grid(
    image: &GrayImage,
    config: &SearchConfig,
) -> Result<Vec<Circle>, CalibrationError> {
    find_grid(image, config, locate_circle)
}

/// Same as [`detect_grid`], returning only the circle centers.
pub fn detect_grid_centers(
    image: &GrayImage,
    config: &SearchConfig,
) -> Result<Vec<Point2<f64>>, CalibrationError> {
    find_grid(image, config, locate_circle_center)
}

/// Locates the single tracked circle inside `roi`, using the 1×1 tracking
/// configuration.
pub fn track_circle(image: &GrayImage, roi: Option<Rect>) -> Result<Circle, CalibrationError> {
    let circles = detect_grid(image, &SearchConfig::single_circle(roi))?;
    circles
        .last()
        .copied()
        .ok_or(CalibrationError::GridSizeMismatch {
            expected: 1,
            found: 0,
        })
}
