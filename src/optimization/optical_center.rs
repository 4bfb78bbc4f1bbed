//! Optical-center estimation from one circle imaged at several magnifications.
//!
//! Circle `0` is the reference. Every other circle `i` is modelled as the
//! reference scaled by `(sx_i, sy_i)` about the optical center `(x0, y0)`:
//!
//! ```text
//! x_i = sx_i * x_ref + (1 - sx_i) * x0
//! y_i = sy_i * y_ref + (1 - sy_i) * y0
//! ```
//!
//! Points are sampled at the same angles on both circles, so samples
//! correspond by angle. The center is shared by all magnifications and each
//! magnification has its own scale pair.

use crate::camera::{CalibrationError, Circle, OpticalCenter};
use crate::geometry::sample_circle;
use crate::optimization::{OpticalCenterOptions, Optimizer};
use crate::util::solver_options;

use log::{info, warn};
use nalgebra::{DVector, Point2};
use std::collections::HashMap;
use std::fmt;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

const CENTER_KEY: &str = "center";

fn scale_key(index: usize) -> String {
    format!("scale_{index}")
}

/// Residuals of one magnification against the reference, over the parameter
/// blocks `[x0, y0]` and `[sx, sy]`.
#[derive(Debug, Clone)]
struct ScaleAboutCenterResidual {
    reference: Vec<Point2<f64>>,
    feature: Vec<Point2<f64>>,
}

impl<T: nalgebra::RealField> Factor<T> for ScaleAboutCenterResidual {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let x0 = params[0][0].clone();
        let y0 = params[0][1].clone();
        let sx = params[1][0].clone();
        let sy = params[1][1].clone();
        let one = T::from_f64(1.0).unwrap();

        let mut residuals = DVector::zeros(self.feature.len() * 2);
        for (i, (reference, feature)) in self.reference.iter().zip(&self.feature).enumerate() {
            let ref_x = T::from_f64(reference.x).unwrap();
            let ref_y = T::from_f64(reference.y).unwrap();
            let f_x = T::from_f64(feature.x).unwrap();
            let f_y = T::from_f64(feature.y).unwrap();

            residuals[i * 2] = sx.clone() * ref_x + (one.clone() - sx.clone()) * x0.clone() - f_x;
            residuals[i * 2 + 1] =
                sy.clone() * ref_y + (one.clone() - sy.clone()) * y0.clone() - f_y;
        }
        residuals
    }
}

/// Joint optical-center problem over a reference circle and the circles of
/// the other magnifications.
#[derive(Clone)]
pub struct OpticalCenterCost {
    circles: Vec<Circle>,
    center: OpticalCenter,
    /// `(sx, sy)` for circles `1..`.
    scales: Vec<(f64, f64)>,
    options: OpticalCenterOptions,
}

impl OpticalCenterCost {
    pub fn new(circles: Vec<Circle>, options: OpticalCenterOptions) -> Self {
        Self {
            circles,
            center: OpticalCenter::new(0.0, 0.0),
            scales: Vec::new(),
            options,
        }
    }

    pub fn get_center(&self) -> OpticalCenter {
        self.center
    }

    /// Scale pairs of the non-reference magnifications, in input order.
    pub fn get_scales(&self) -> &[(f64, f64)] {
        &self.scales
    }

    fn check_input(&self) -> Result<(), CalibrationError> {
        if self.circles.len() < 2 {
            warn!(
                "estimate_optical_center: need at least 2 circles, got {}",
                self.circles.len()
            );
            return Err(CalibrationError::InvalidInput(format!(
                "optical center estimation needs at least 2 circles, got {}",
                self.circles.len()
            )));
        }
        if self.options.samples < 2 {
            return Err(CalibrationError::InvalidInput(format!(
                "optical center estimation needs at least 2 samples per circle, got {}",
                self.options.samples
            )));
        }
        if let Some(circle) = self.circles.iter().find(|c| !c.is_valid()) {
            return Err(CalibrationError::InvalidInput(format!(
                "cannot sample circle {:?}",
                circle
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for OpticalCenterCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OpticalCenterCost Summary:\n center: {:?}\n circles: {}, samples per circle: {}",
            self.center,
            self.circles.len(),
            self.options.samples
        )
    }
}

impl Optimizer for OpticalCenterCost {
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError> {
        self.check_input()?;
        if self.scales.len() != self.circles.len() - 1 {
            return Err(CalibrationError::InvalidInput(
                "scale initialization missing, run linear_estimation first".to_string(),
            ));
        }

        if verbose {
            info!(
                "Starting optical center estimation over {} magnifications",
                self.circles.len()
            );
        }

        let samples = self.options.samples;
        let reference = sample_circle(&self.circles[0], samples);

        let mut problem = tiny_solver::Problem::new();
        let mut initial_values = HashMap::new();
        initial_values.insert(
            CENTER_KEY.to_string(),
            DVector::from_vec(vec![self.center.x, self.center.y]),
        );

        for (i, (circle, &(sx, sy))) in self.circles[1..].iter().zip(&self.scales).enumerate() {
            let key = scale_key(i + 1);
            let residual = ScaleAboutCenterResidual {
                reference: reference.clone(),
                feature: sample_circle(circle, samples),
            };
            problem.add_residual_block(
                samples * 2,
                &[CENTER_KEY, key.as_str()],
                Box::new(residual),
                None,
            );
            initial_values.insert(key, DVector::from_vec(vec![sx, sy]));
        }

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(
                &problem,
                &initial_values,
                Some(solver_options(self.options.max_iterations)),
            )
            .ok_or_else(|| {
                warn!("estimate_optical_center: solver failed");
                CalibrationError::SolverUnusable("optical center solve failed".to_string())
            })?;

        let center = result.get(CENTER_KEY).ok_or_else(|| {
            CalibrationError::SolverUnusable("center missing from result".to_string())
        })?;
        if !(center[0].is_finite() && center[1].is_finite()) {
            return Err(CalibrationError::SolverUnusable(format!(
                "optical center solve produced ({}, {})",
                center[0], center[1]
            )));
        }
        self.center = OpticalCenter::new(center[0], center[1]);

        for (i, scale) in self.scales.iter_mut().enumerate() {
            if let Some(values) = result.get(&scale_key(i + 1)) {
                *scale = (values[0], values[1]);
            }
        }

        if verbose {
            info!(
                "Optical center: ({:.4}, {:.4}), scales {:?}",
                self.center.x, self.center.y, self.scales
            );
        }
        Ok(())
    }

    /// Centers on the reference circle and takes each scale from the radius
    /// ratio to the reference.
    fn linear_estimation(&mut self) -> Result<(), CalibrationError> {
        self.check_input()?;
        let reference = self.circles[0];
        self.center = OpticalCenter::new(reference.x, reference.y);
        self.scales = self.circles[1..]
            .iter()
            .map(|c| {
                let ratio = c.r / reference.r;
                (ratio, ratio)
            })
            .collect();
        Ok(())
    }

    /// `[x0, y0, sx_1, sy_1, ...]`.
    fn get_parameters(&self) -> Vec<f64> {
        let mut params = vec![self.center.x, self.center.y];
        for &(sx, sy) in &self.scales {
            params.push(sx);
            params.push(sy);
        }
        params
    }
}

/// Estimates the optical center with the default sample count.
pub fn estimate_optical_center(circles: &[Circle]) -> Result<OpticalCenter, CalibrationError> {
    estimate_optical_center_with_options(circles, &OpticalCenterOptions::default())
}

/// Estimates the optical center shared by `circles`.
///
/// # Errors
///
/// * [`CalibrationError::InvalidInput`] with fewer than two circles, fewer
///   than two samples, or a circle with a non-positive radius.
/// * [`CalibrationError::SolverUnusable`] if the solver fails.
pub fn estimate_optical_center_with_options(
    circles: &[Circle],
    options: &OpticalCenterOptions,
) -> Result<OpticalCenter, CalibrationError> {
    let mut cost = OpticalCenterCost::new(circles.to_vec(), *options);
    cost.linear_estimation()?;
    cost.optimize(false)?;
    Ok(cost.get_center())
}
