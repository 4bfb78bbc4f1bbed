//! Value types shared by every stage of the calibration pipeline.
//!
//! This module holds the plain data that flows between the detector, the
//! linear solvers and the non-linear refinements: circles, bounding
//! rectangles, grid geometry and search configuration. It also defines
//! [`CalibrationError`], the single error type returned by every public
//! operation in the crate.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

pub mod intrinsic;
pub mod model_store;

pub use intrinsic::{IntrinsicMatrix, RigidTransform};
pub use model_store::{CameraModel, Magnification, PixelSize};

/// Default upper hysteresis bound used by the grid detector.
pub const DEFAULT_EDGE_STRENGTH: f64 = 100.0;

/// Edge strength used when tracking a single circle for optical-center search.
pub const TRACKING_EDGE_STRENGTH: f64 = 50.0;

/// A detected or fitted circular fiducial in image coordinates.
///
/// The all-zero circle is the sentinel produced when a fit degenerates
/// inside a batch; see [`Circle::is_sentinel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

impl Circle {
    pub fn new(x: f64, y: f64, r: f64) -> Self {
        Self { x, y, r }
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    /// `true` for the zero circle emitted by a failed fit.
    pub fn is_sentinel(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.r == 0.0
    }

    pub fn is_valid(&self) -> bool {
        self.r > 0.0 && self.x.is_finite() && self.y.is_finite() && self.r.is_finite()
    }
}

/// Axis-aligned bounding box of a connected component, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width over height. Zero-height rectangles report an infinite ratio.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return f64::INFINITY;
        }
        self.width as f64 / self.height as f64
    }

    /// One past the last column, clamped to `u32::MAX`.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// One past the last row, clamped to `u32::MAX`.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// `true` when `other` lies entirely inside `self`.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.intersection(other) == Some(*other)
    }
}

/// Geometry of the calibration target: `rows × cols` fiducials spaced `step`
/// world units apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub step: f64,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, step: f64) -> Self {
        Self { rows, cols, step }
    }

    /// Number of fiducials a complete detection must contain.
    pub fn count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

fn default_edge_strength() -> f64 {
    DEFAULT_EDGE_STRENGTH
}

/// Grid detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Upper hysteresis bound of the edge detector; the lower bound is fixed at zero.
    #[serde(default = "default_edge_strength")]
    pub edge_strength: f64,
    pub grid: GridSpec,
    /// Only components fully inside this rectangle are considered.
    #[serde(default)]
    pub roi: Option<Rect>,
}

impl SearchConfig {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            edge_strength: DEFAULT_EDGE_STRENGTH,
            grid,
            roi: None,
        }
    }

    pub fn with_edge_strength(mut self, edge_strength: f64) -> Self {
        self.edge_strength = edge_strength;
        self
    }

    pub fn with_roi(mut self, roi: Option<Rect>) -> Self {
        self.roi = roi;
        self
    }

    /// Configuration for locating one tracked circle inside `roi`.
    pub fn single_circle(roi: Option<Rect>) -> Self {
        Self {
            edge_strength: TRACKING_EDGE_STRENGTH,
            grid: GridSpec::new(1, 1, 1.0),
            roi,
        }
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        validation::validate_search_config(self)
    }

    /// Loads a search configuration from a YAML file and validates it.
    ///
    /// ```yaml
    /// edge_strength: 100.0
    /// grid: { rows: 5, cols: 7, step: 0.5 }
    /// roi: { x: 10, y: 10, width: 600, height: 400 }
    /// ```
    pub fn load_from_yaml(path: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let config: SearchConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        let yaml_string = serde_yaml::to_string(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }
}

/// Intersection of the optical axis with the image plane, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalCenter {
    pub x: f64,
    pub y: f64,
}

impl OpticalCenter {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Grid size mismatch: expected {expected} features, found {found}")]
    GridSizeMismatch { expected: usize, found: usize },
    #[error("Too few candidate components: need {needed}, found {found}")]
    InsufficientCandidates { needed: usize, found: usize },
    #[error("Degenerate fit: {0}")]
    DegenerateFit(String),
    #[error("Least squares system is singular")]
    SingularSystem,
    #[error("Solver did not reach a usable solution: {0}")]
    SolverUnusable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Projection is degenerate, zero magnification")]
    DegenerateProjection,
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("YAML error: {0}")]
    YamlError(String),
    #[error("JSON error: {0}")]
    JsonError(String),
    #[error("Image error: {0}")]
    ImageError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CalibrationError {
    fn from(err: serde_yaml::Error) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        CalibrationError::JsonError(err.to_string())
    }
}

impl From<image::ImageError> for CalibrationError {
    fn from(err: image::ImageError) -> Self {
        CalibrationError::ImageError(err.to_string())
    }
}

/// Common validation functions for calibration parameters
pub mod validation {
    use super::*;

    pub fn validate_grid_spec(grid: &GridSpec) -> Result<(), CalibrationError> {
        if grid.is_empty() {
            return Err(CalibrationError::InvalidInput(format!(
                "grid must have at least one row and column, got {}x{}",
                grid.rows, grid.cols
            )));
        }
        if grid.step <= 0.0 || !grid.step.is_finite() {
            return Err(CalibrationError::InvalidInput(format!(
                "grid step must be positive, got {}",
                grid.step
            )));
        }
        Ok(())
    }

    pub fn validate_search_config(config: &SearchConfig) -> Result<(), CalibrationError> {
        if config.edge_strength < 0.0 || !config.edge_strength.is_finite() {
            return Err(CalibrationError::InvalidInput(format!(
                "edge strength must be non-negative, got {}",
                config.edge_strength
            )));
        }
        if let Some(roi) = &config.roi {
            validate_roi(roi)?;
        }
        validate_grid_spec(&config.grid)
    }

    pub fn validate_roi(roi: &Rect) -> Result<(), CalibrationError> {
        if roi.is_empty() {
            return Err(CalibrationError::InvalidInput(format!(
                "region of interest must have a non-zero size, got {}x{}",
                roi.width, roi.height
            )));
        }
        if roi.x.checked_add(roi.width).is_none() || roi.y.checked_add(roi.height).is_none() {
            return Err(CalibrationError::InvalidInput(format!(
                "region of interest {:?} exceeds the pixel coordinate range",
                roi
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_containment() {
        let roi = Rect::new(10, 10, 100, 100);
        assert!(roi.contains_rect(&Rect::new(10, 10, 20, 20)));
        assert!(roi.contains_rect(&Rect::new(80, 80, 30, 30)));
        assert!(!roi.contains_rect(&Rect::new(95, 95, 20, 20)));
        assert!(!roi.contains_rect(&Rect::new(0, 0, 5, 5)));
    }

    #[test]
    fn test_rect_edges_saturate() {
        let far = Rect::new(u32::MAX - 5, u32::MAX - 2, 10, 10);
        assert_eq!(far.right(), u32::MAX);
        assert_eq!(far.bottom(), u32::MAX);
        assert!(!far.contains_rect(&Rect::new(0, 0, 4, 4)));
        assert!(far.intersection(&Rect::new(0, 0, 4, 4)).is_none());
    }

    #[test]
    fn test_search_config_rejects_bad_roi() {
        let grid = GridSpec::new(1, 1, 1.0);
        let with_roi = |roi: Rect| SearchConfig::new(grid).with_roi(Some(roi));

        assert!(matches!(
            with_roi(Rect::new(u32::MAX - 5, 0, 10, 10)).validate(),
            Err(CalibrationError::InvalidInput(_))
        ));
        assert!(with_roi(Rect::new(0, u32::MAX, 10, 1)).validate().is_err());
        assert!(with_roi(Rect::new(10, 10, 0, 20)).validate().is_err());
        assert!(with_roi(Rect::new(u32::MAX - 10, 0, 10, 10)).validate().is_ok());
    }

    #[test]
    fn test_rect_aspect_ratio() {
        assert_eq!(Rect::new(0, 0, 20, 20).aspect_ratio(), 1.0);
        assert_eq!(Rect::new(0, 0, 30, 20).aspect_ratio(), 1.5);
        assert!(Rect::new(0, 0, 3, 0).aspect_ratio().is_infinite());
    }

    #[test]
    fn test_search_config_validation() {
        let config = SearchConfig::new(GridSpec::new(3, 4, 1.5));
        assert!(config.validate().is_ok());
        assert_eq!(config.edge_strength, DEFAULT_EDGE_STRENGTH);

        let negative = config.clone().with_edge_strength(-1.0);
        assert!(matches!(
            negative.validate(),
            Err(CalibrationError::InvalidInput(_))
        ));

        let empty = SearchConfig::new(GridSpec::new(0, 4, 1.5));
        assert!(empty.validate().is_err());

        let zero_step = SearchConfig::new(GridSpec::new(2, 2, 0.0));
        assert!(zero_step.validate().is_err());
    }

    #[test]
    fn test_search_config_yaml_roundtrip() {
        let path = std::env::temp_dir().join("camcalib_search_config_test.yaml");
        let path = path.to_str().unwrap();
        let config = SearchConfig::new(GridSpec::new(5, 7, 0.5))
            .with_edge_strength(80.0)
            .with_roi(Some(Rect::new(1, 2, 300, 200)));
        config.save_to_yaml(path).unwrap();

        let loaded = SearchConfig::load_from_yaml(path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_search_config_yaml_defaults() {
        let config: SearchConfig =
            serde_yaml::from_str("grid: { rows: 2, cols: 3, step: 1.0 }").unwrap();
        assert_eq!(config.edge_strength, DEFAULT_EDGE_STRENGTH);
        assert_eq!(config.roi, None);
        assert_eq!(config.grid.count(), 6);
    }
}
