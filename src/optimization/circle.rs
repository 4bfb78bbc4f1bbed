//! Circle refinement from edge samples.
//!
//! The residual for a sample `(px, py)` is `r² − (px − x0)² − (py − y0)²`,
//! which avoids the square root of a point-to-center distance. The initial
//! guess comes from an algebraic ellipse fit (or a Kåsa circle fit for three
//! or four samples).

use crate::camera::{CalibrationError, Circle};
use crate::geometry::{fit_circle_algebraic, fit_ellipse, MIN_ELLIPSE_POINTS};
use crate::optimization::{CircleFitOptions, Optimizer};
use crate::util::solver_options;

use log::{info, warn};
use nalgebra::{DVector, Point2};
use std::collections::HashMap;
use std::fmt;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

/// Fewest samples that determine a circle.
pub const MIN_CIRCLE_POINTS: usize = 3;

/// `tiny_solver` factor over the parameter block `[x0, y0, r]`.
#[derive(Debug, Clone)]
struct CircleResidual {
    samples: Vec<Point2<f64>>,
}

impl<T: nalgebra::RealField> Factor<T> for CircleResidual {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let circle = &params[0];
        let x0 = circle[0].clone();
        let y0 = circle[1].clone();
        let r = circle[2].clone();
        let r_sq = r.clone() * r;

        let mut residuals = DVector::zeros(self.samples.len());
        for (i, p) in self.samples.iter().enumerate() {
            let dx = T::from_f64(p.x).unwrap() - x0.clone();
            let dy = T::from_f64(p.y).unwrap() - y0.clone();
            residuals[i] = r_sq.clone() - dx.clone() * dx - dy.clone() * dy;
        }
        residuals
    }
}

/// Circle refinement problem over a set of edge samples.
#[derive(Clone)]
pub struct CircleFitCost {
    circle: Circle,
    samples: Vec<Point2<f64>>,
    options: CircleFitOptions,
}

impl CircleFitCost {
    /// Creates a problem whose initial circle is the zero sentinel; call
    /// [`Optimizer::linear_estimation`] before optimizing.
    pub fn new(samples: Vec<Point2<f64>>, options: CircleFitOptions) -> Self {
        Self {
            circle: Circle::default(),
            samples,
            options,
        }
    }

    /// Creates a problem starting from a known circle.
    pub fn with_initial_guess(
        samples: Vec<Point2<f64>>,
        initial: Circle,
        options: CircleFitOptions,
    ) -> Self {
        Self {
            circle: initial,
            samples,
            options,
        }
    }

    pub fn get_circle(&self) -> Circle {
        self.circle
    }
}

impl fmt::Debug for CircleFitCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CircleFitCost Summary:\n circle: {:?}\n samples: {}, max iterations: {}",
            self.circle,
            self.samples.len(),
            self.options.max_iterations
        )
    }
}

impl Optimizer for CircleFitCost {
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError> {
        if self.samples.len() < MIN_CIRCLE_POINTS {
            return Err(CalibrationError::InvalidInput(format!(
                "circle refinement needs at least {} samples, got {}",
                MIN_CIRCLE_POINTS,
                self.samples.len()
            )));
        }

        if verbose {
            info!("Starting circle refinement from {:?}", self.circle);
        }

        let mut problem = tiny_solver::Problem::new();
        let residual = CircleResidual {
            samples: self.samples.clone(),
        };
        problem.add_residual_block(self.samples.len(), &["circle"], Box::new(residual), None);

        let mut initial_values = HashMap::new();
        initial_values.insert(
            "circle".to_string(),
            DVector::from_vec(vec![self.circle.x, self.circle.y, self.circle.r]),
        );

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(
                &problem,
                &initial_values,
                Some(solver_options(self.options.max_iterations)),
            )
            .ok_or_else(|| {
                warn!("fit_circle: solver failed");
                CalibrationError::SolverUnusable("circle refinement failed".to_string())
            })?;

        let params = result.get("circle").ok_or_else(|| {
            CalibrationError::SolverUnusable("circle parameters missing from result".to_string())
        })?;

        // The residual is even in r, so the solver may land on -r.
        let refined = Circle::new(params[0], params[1], params[2].abs());
        if !refined.is_valid() {
            warn!("fit_circle: solver returned {:?}", refined);
            return Err(CalibrationError::SolverUnusable(format!(
                "circle refinement produced {:?}",
                refined
            )));
        }
        self.circle = refined;

        if verbose {
            info!("Refined circle: {:?}", self.circle);
        }
        Ok(())
    }

    fn linear_estimation(&mut self) -> Result<(), CalibrationError> {
        if self.samples.len() >= MIN_ELLIPSE_POINTS {
            match fit_ellipse(&self.samples) {
                Ok(ellipse) => {
                    self.circle = ellipse.to_circle();
                    return Ok(());
                }
                Err(err) => warn!("fit_circle: ellipse initialization failed, {}", err),
            }
        }
        self.circle = fit_circle_algebraic(&self.samples)?;
        Ok(())
    }

    /// `[x0, y0, r]`.
    fn get_parameters(&self) -> Vec<f64> {
        vec![self.circle.x, self.circle.y, self.circle.r]
    }
}

/// Fits a circle to `samples` with the default iteration budget.
pub fn fit_circle(samples: &[Point2<f64>]) -> Result<Circle, CalibrationError> {
    fit_circle_with_options(samples, &CircleFitOptions::default())
}

/// Fits a circle to `samples`.
///
/// # Errors
///
/// * [`CalibrationError::DegenerateFit`] for fewer than three samples or
///   collinear samples.
/// * [`CalibrationError::SolverUnusable`] if the refinement fails.
pub fn fit_circle_with_options(
    samples: &[Point2<f64>],
    options: &CircleFitOptions,
) -> Result<Circle, CalibrationError> {
    let mut cost = CircleFitCost::new(samples.to_vec(), *options);
    cost.linear_estimation()?;
    cost.optimize(false)?;
    Ok(cost.get_circle())
}
