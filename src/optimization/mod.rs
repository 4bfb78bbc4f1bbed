//! Non-linear refinements built on `tiny_solver`.
//!
//! This module defines the [`Optimizer`] trait, the common interface of the
//! least-squares problems solved after the linear calibration:
//!
//! * [`CircleFitCost`] refines a circle's center and radius from edge samples.
//! * [`OpticalCenterCost`] aligns circles imaged at several magnifications to
//!   recover the shared optical center.
//! * [`DistortionCost`] fits a 14-parameter image→world distortion model.
//!   It is a standalone building block and is not used by
//!   [`crate::calibration::calibrate`].
//!
//! Each problem follows the same two steps:
//! 1. A linear or closed-form estimate of the initial parameters.
//! 2. A Levenberg-Marquardt refinement.

use serde::{Deserialize, Serialize};

pub mod circle;
pub mod distortion;
pub mod optical_center;

pub use circle::{fit_circle, fit_circle_with_options, CircleFitCost};
pub use distortion::{DistortionCost, DistortionParams};
pub use optical_center::{
    estimate_optical_center, estimate_optical_center_with_options, OpticalCenterCost,
};

use crate::camera::CalibrationError;

/// Solver settings for [`fit_circle_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleFitOptions {
    pub max_iterations: usize,
}

impl Default for CircleFitOptions {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

/// Solver settings for [`estimate_optical_center_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalCenterOptions {
    /// Points sampled on each circle.
    pub samples: usize,
    pub max_iterations: usize,
}

impl Default for OpticalCenterOptions {
    fn default() -> Self {
        Self {
            samples: 10,
            max_iterations: 100,
        }
    }
}

/// A least-squares problem with a linear initialization and a non-linear
/// refinement.
pub trait Optimizer {
    /// Refines the current parameters with Levenberg-Marquardt.
    ///
    /// # Arguments
    ///
    /// * `verbose` - If `true`, logs progress and results at info level.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::InvalidInput`] if the problem data is insufficient.
    /// * [`CalibrationError::SolverUnusable`] if the solver fails or returns
    ///   non-finite parameters.
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError>;

    /// Computes an initial estimate of the parameters in closed form.
    fn linear_estimation(&mut self) -> Result<(), CalibrationError>
    where
        Self: Sized;

    /// Current parameter vector, in the order the solver sees it.
    fn get_parameters(&self) -> Vec<f64>;
}
