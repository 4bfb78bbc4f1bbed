//! Circle-Grid Calibration Library
//!
//! Calibrates a microscope camera from images of a planar target carrying a
//! regular grid of circular fiducials. This library provides:
//! - Circle-grid detection (edge map, connected components, ellipse fits)
//! - Canonical row-major ordering of detected fiducials
//! - Normalized linear estimation of the world→image affine map and its
//!   factorization into an intrinsic matrix (mx, my, alpha)
//! - Non-linear circle refinement and optical-center estimation across
//!   magnifications
//! - A persistent camera model of named magnifications
//!
//! The non-linear problems are solved with the tiny-solver
//! Levenberg-Marquardt optimizer.

pub mod calibration;
pub mod camera;
pub mod detection;
pub mod geometry;
pub mod optimization;
pub mod util;

// Re-export commonly used types
pub use camera::{
    CalibrationError, CameraModel, Circle, GridSpec, IntrinsicMatrix, Magnification, OpticalCenter,
    Rect, SearchConfig,
};

pub use calibration::{calibrate, calibrate_image, calibrate_with_report, CalibrationReport};
pub use detection::{detect_grid, detect_grid_centers, track_circle};
pub use geometry::{generate_world_grid, order_grid};
pub use optimization::{
    estimate_optical_center, fit_circle, CircleFitCost, OpticalCenterCost, Optimizer,
};
