//! Image→world mapping with radial, tangential and thin-prism distortion.
//!
//! For an image point `(u, v)` and distortion center `(x0, y0)`, with
//! `du = u − x0`, `dv = v − y0`, `ρ = du² + dv²`:
//!
//! ```text
//! δu = k1·du·ρ + k2·du·ρ² + p1·(3du² + dv²) + 2·p2·du·dv + s1·ρ
//! δv = k1·dv·ρ + k2·dv·ρ² + 2·p1·du·dv + p2·(du² + 3dv²) + s2·ρ
//! x  = q11·(u − δu) + q12·(v − δv) + q13
//! y  = q21·(u − δu) + q22·(v − δv) + q23
//! ```
//!
//! The parameter vector is
//! `[q11, q12, q13, q21, q22, q23, x0, y0, k1, k2, p1, p2, s1, s2]`.

use crate::calibration::estimate_projection;
use crate::camera::CalibrationError;
use crate::optimization::Optimizer;
use crate::util::{solver_options, ProjectionError};

use log::info;
use nalgebra::{DVector, Point2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

pub const DISTORTION_PARAM_COUNT: usize = 14;

/// Corresponding points needed to constrain every parameter.
const MIN_CORRESPONDENCES: usize = DISTORTION_PARAM_COUNT / 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistortionParams {
    pub q11: f64,
    pub q12: f64,
    pub q13: f64,
    pub q21: f64,
    pub q22: f64,
    pub q23: f64,
    pub x0: f64,
    pub y0: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub s1: f64,
    pub s2: f64,
}

impl DistortionParams {
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.q11, self.q12, self.q13, self.q21, self.q22, self.q23, self.x0, self.y0, self.k1,
            self.k2, self.p1, self.p2, self.s1, self.s2,
        ]
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, CalibrationError> {
        if values.len() != DISTORTION_PARAM_COUNT {
            return Err(CalibrationError::InvalidInput(format!(
                "distortion model has {} parameters, got {}",
                DISTORTION_PARAM_COUNT,
                values.len()
            )));
        }
        Ok(Self {
            q11: values[0],
            q12: values[1],
            q13: values[2],
            q21: values[3],
            q22: values[4],
            q23: values[5],
            x0: values[6],
            y0: values[7],
            k1: values[8],
            k2: values[9],
            p1: values[10],
            p2: values[11],
            s1: values[12],
            s2: values[13],
        })
    }

    /// Maps an image point to world coordinates.
    pub fn image_to_world(&self, image: &Point2<f64>) -> Point2<f64> {
        let (x, y) = image_to_world(&self.to_vec(), image.x, image.y);
        Point2::new(x, y)
    }
}

fn image_to_world<T: nalgebra::RealField>(p: &[T], u: T, v: T) -> (T, T) {
    let two = T::from_f64(2.0).unwrap();
    let three = T::from_f64(3.0).unwrap();

    let du = u.clone() - p[6].clone();
    let dv = v.clone() - p[7].clone();
    let du2 = du.clone() * du.clone();
    let dv2 = dv.clone() * dv.clone();
    let dudv = du.clone() * dv.clone();
    let rho = du2.clone() + dv2.clone();
    let rho2 = rho.clone() * rho.clone();

    let (k1, k2) = (p[8].clone(), p[9].clone());
    let (p1, p2) = (p[10].clone(), p[11].clone());
    let (s1, s2) = (p[12].clone(), p[13].clone());

    let delta_u = k1.clone() * du.clone() * rho.clone()
        + k2.clone() * du * rho2.clone()
        + p1.clone() * (three.clone() * du2.clone() + dv2.clone())
        + p2.clone() * two.clone() * dudv.clone()
        + s1 * rho.clone();
    let delta_v = k1 * dv.clone() * rho.clone()
        + k2 * dv * rho2
        + p1 * two * dudv
        + p2 * (du2 + three * dv2)
        + s2 * rho;

    let u_corr = u - delta_u;
    let v_corr = v - delta_v;
    let x = p[0].clone() * u_corr.clone() + p[1].clone() * v_corr.clone() + p[2].clone();
    let y = p[3].clone() * u_corr + p[4].clone() * v_corr + p[5].clone();
    (x, y)
}

/// `tiny_solver` factor over the 14-parameter block.
#[derive(Debug, Clone)]
struct DistortionResidual {
    image_points: Vec<Point2<f64>>,
    world_points: Vec<Point2<f64>>,
}

impl<T: nalgebra::RealField> Factor<T> for DistortionResidual {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let p: Vec<T> = params[0].iter().cloned().collect();
        let mut residuals = DVector::zeros(self.image_points.len() * 2);
        for (i, (image, world)) in self.image_points.iter().zip(&self.world_points).enumerate() {
            let (x, y) = image_to_world(
                &p,
                T::from_f64(image.x).unwrap(),
                T::from_f64(image.y).unwrap(),
            );
            residuals[i * 2] = x - T::from_f64(world.x).unwrap();
            residuals[i * 2 + 1] = y - T::from_f64(world.y).unwrap();
        }
        residuals
    }
}

/// Distortion fit over image/world correspondences.
#[derive(Clone)]
pub struct DistortionCost {
    params: DistortionParams,
    image_points: Vec<Point2<f64>>,
    world_points: Vec<Point2<f64>>,
    max_iterations: usize,
}

impl DistortionCost {
    pub fn new(
        image_points: Vec<Point2<f64>>,
        world_points: Vec<Point2<f64>>,
        max_iterations: usize,
    ) -> Self {
        Self {
            params: DistortionParams::default(),
            image_points,
            world_points,
            max_iterations,
        }
    }

    /// Creates a problem starting from known parameters instead of the
    /// affine estimate.
    pub fn with_initial_params(
        image_points: Vec<Point2<f64>>,
        world_points: Vec<Point2<f64>>,
        initial: DistortionParams,
        max_iterations: usize,
    ) -> Self {
        Self {
            params: initial,
            image_points,
            world_points,
            max_iterations,
        }
    }

    pub fn get_params(&self) -> DistortionParams {
        self.params
    }

    /// World-space residual distances under the current parameters.
    pub fn residual_error(&self) -> Result<ProjectionError, CalibrationError> {
        let errors: Vec<f64> = self
            .image_points
            .iter()
            .zip(&self.world_points)
            .map(|(image, world)| (self.params.image_to_world(image) - world).norm())
            .collect();
        ProjectionError::from_residuals(&errors)
    }

    fn check_input(&self) -> Result<(), CalibrationError> {
        if self.image_points.len() != self.world_points.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "image and world point counts differ: {} vs {}",
                self.image_points.len(),
                self.world_points.len()
            )));
        }
        if self.image_points.len() < MIN_CORRESPONDENCES {
            return Err(CalibrationError::InvalidInput(format!(
                "distortion fit needs at least {} correspondences, got {}",
                MIN_CORRESPONDENCES,
                self.image_points.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for DistortionCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DistortionCost Summary:\n params: {:?}\n correspondences: {}",
            self.params,
            self.image_points.len()
        )
    }
}

impl Optimizer for DistortionCost {
    fn optimize(&mut self, verbose: bool) -> Result<(), CalibrationError> {
        self.check_input()?;

        if verbose {
            info!("Starting distortion fit from {:?}", self.params);
        }

        let mut problem = tiny_solver::Problem::new();
        let residual = DistortionResidual {
            image_points: self.image_points.clone(),
            world_points: self.world_points.clone(),
        };
        problem.add_residual_block(
            self.image_points.len() * 2,
            &["distortion"],
            Box::new(residual),
            None,
        );

        let mut initial_values = HashMap::new();
        initial_values.insert(
            "distortion".to_string(),
            DVector::from_vec(self.params.to_vec()),
        );

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(
                &problem,
                &initial_values,
                Some(solver_options(self.max_iterations)),
            )
            .ok_or_else(|| CalibrationError::SolverUnusable("distortion fit failed".to_string()))?;

        let values = result.get("distortion").ok_or_else(|| {
            CalibrationError::SolverUnusable(
                "distortion parameters missing from result".to_string(),
            )
        })?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::SolverUnusable(
                "distortion fit produced non-finite parameters".to_string(),
            ));
        }
        self.params = DistortionParams::from_slice(values.as_slice())?;

        if verbose {
            info!("Fitted distortion model: {:?}", self.params);
        }
        Ok(())
    }

    /// Affine image→world fit with the distortion center at the image-point
    /// centroid and every distortion coefficient zero.
    fn linear_estimation(&mut self) -> Result<(), CalibrationError> {
        self.check_input()?;
        let affine = estimate_projection(&self.world_points, &self.image_points)?;

        let n = self.image_points.len() as f64;
        let x0 = self.image_points.iter().map(|p| p.x).sum::<f64>() / n;
        let y0 = self.image_points.iter().map(|p| p.y).sum::<f64>() / n;

        self.params = DistortionParams {
            q11: affine[(0, 0)],
            q12: affine[(0, 1)],
            q13: affine[(0, 2)],
            q21: affine[(1, 0)],
            q22: affine[(1, 1)],
            q23: affine[(1, 2)],
            x0,
            y0,
            ..Default::default()
        };
        Ok(())
    }

    fn get_parameters(&self) -> Vec<f64> {
        self.params.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn image_lattice() -> Vec<Point2<f64>> {
        let mut points = Vec::new();
        for r in 0..7 {
            for c in 0..7 {
                points.push(Point2::new(50.0 + 40.0 * c as f64, 40.0 + 40.0 * r as f64));
            }
        }
        points
    }

    #[test]
    fn test_params_slice_layout() {
        let values: Vec<f64> = (0..14).map(|i| i as f64).collect();
        let params = DistortionParams::from_slice(&values).unwrap();
        assert_eq!(params.q11, 0.0);
        assert_eq!(params.x0, 6.0);
        assert_eq!(params.s2, 13.0);
        assert_eq!(params.to_vec(), values);
        assert!(DistortionParams::from_slice(&values[..13]).is_err());
    }

    #[test]
    fn test_image_to_world_without_distortion_is_affine() {
        let params = DistortionParams {
            q11: 0.5,
            q12: 0.1,
            q13: -3.0,
            q21: 0.0,
            q22: 0.25,
            q23: 7.0,
            x0: 100.0,
            y0: 80.0,
            ..Default::default()
        };
        let world = params.image_to_world(&Point2::new(20.0, 40.0));
        assert_relative_eq!(world.x, 0.5 * 20.0 + 0.1 * 40.0 - 3.0);
        assert_relative_eq!(world.y, 0.25 * 40.0 + 7.0);
    }

    #[test]
    fn test_radial_term() {
        let params = DistortionParams {
            q11: 1.0,
            q22: 1.0,
            k1: 1e-3,
            ..Default::default()
        };
        // du = 10, dv = 0, rho = 100, delta_u = k1 * 10 * 100 = 1
        let world = params.image_to_world(&Point2::new(10.0, 0.0));
        assert_relative_eq!(world.x, 9.0, epsilon = 1e-12);
        assert_relative_eq!(world.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_estimation_recovers_affine() {
        let truth = DistortionParams {
            q11: 0.02,
            q12: 0.001,
            q13: -1.0,
            q21: -0.0005,
            q22: 0.021,
            q23: 2.0,
            ..Default::default()
        };
        let image = image_lattice();
        let world: Vec<Point2<f64>> = image.iter().map(|p| truth.image_to_world(p)).collect();

        let mut cost = DistortionCost::new(image, world, 20);
        cost.linear_estimation().unwrap();
        let params = cost.get_params();
        assert_relative_eq!(params.q11, 0.02, epsilon = 1e-9);
        assert_relative_eq!(params.q12, 0.001, epsilon = 1e-9);
        assert_relative_eq!(params.q23, 2.0, epsilon = 1e-7);
        assert!(cost.residual_error().unwrap().max < 1e-9);
    }

    #[test]
    fn test_optimize_reduces_error() {
        let truth = DistortionParams {
            q11: 0.02,
            q22: 0.02,
            q13: -1.0,
            q23: 2.0,
            x0: 170.0,
            y0: 160.0,
            k1: 2e-7,
            ..Default::default()
        };
        let image = image_lattice();
        let world: Vec<Point2<f64>> = image.iter().map(|p| truth.image_to_world(p)).collect();

        let initial = DistortionParams { k1: 1e-7, ..truth };
        let mut cost = DistortionCost::with_initial_params(image, world, initial, 50);
        let before = cost.residual_error().unwrap().rmse;
        cost.optimize(false).unwrap();
        let after = cost.residual_error().unwrap().rmse;
        assert!(before > 1e-5);
        assert!(after < before, "rmse went from {} to {}", before, after);
    }

    #[test]
    fn test_too_few_correspondences() {
        let image = vec![Point2::new(0.0, 0.0); 3];
        let mut cost = DistortionCost::new(image.clone(), image, 10);
        assert!(matches!(
            cost.linear_estimation(),
            Err(CalibrationError::InvalidInput(_))
        ));
    }
}
