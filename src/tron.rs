//! # Trust-Region Newton Solver
//!
//! TRON bounds each step inside a trust region of radius Δ and solves the
//! Newton system approximately with Steihaug-Toint conjugate gradient,
//! touching the Hessian only through Hessian-vector products — no O(n²)
//! storage. The CG recursion truncates at the region boundary or on negative
//! curvature, so the proposed step is always well-defined even far from a
//! minimum. Steps are accepted by gain ratio (actual vs. predicted
//! reduction); rejected steps shrink the radius and retry without advancing
//! the iterate, which keeps the accepted value sequence non-increasing.

use ndarray::Array1;

use crate::function::{Evaluation, TwiceDiffFunction};
use crate::normalization::NormalizationContext;
use crate::optimizer::{norm, OptimizationError, Solver};

const DEFAULT_INITIAL_RADIUS: f64 = 1.0;
const MAX_RADIUS: f64 = 1e10;
/// Steps with a gain ratio at or below this are rejected.
const ETA_ACCEPT: f64 = 1e-4;
const ETA_SHRINK: f64 = 0.25;
const ETA_EXPAND: f64 = 0.75;
/// Inexact-Newton forcing term: the CG residual only needs to drop to this
/// fraction of the gradient norm.
const CG_TOLERANCE: f64 = 0.1;
/// Radius collapse below this floor ends the step at the current iterate.
const RADIUS_FLOOR: f64 = 1e-12;
const MAX_REJECTIONS: usize = 60;

/// Trust-region Newton solver driven by Hessian-vector products.
pub struct Tron {
    initial_radius: f64,
    radius: f64,
    max_cg_iterations: Option<usize>,
}

impl Tron {
    pub fn new() -> Self {
        Self {
            initial_radius: DEFAULT_INITIAL_RADIUS,
            radius: DEFAULT_INITIAL_RADIUS,
            max_cg_iterations: None,
        }
    }

    pub fn with_initial_radius(mut self, radius: f64) -> Self {
        self.initial_radius = radius.max(RADIUS_FLOOR);
        self.radius = self.initial_radius;
        self
    }

    /// Caps the inner CG iterations per Newton step. Defaults to
    /// `min(dimension, 200)`.
    pub fn with_max_cg_iterations(mut self, cap: usize) -> Self {
        self.max_cg_iterations = Some(cap.max(1));
        self
    }

    /// Steihaug-Toint CG on `H p = -g`, truncated at the trust-region
    /// boundary or on negative curvature. Returns the step and whether the
    /// boundary was hit.
    fn solve_subproblem<F: TwiceDiffFunction + ?Sized>(
        &self,
        objective: &F,
        coefficients: &Array1<f64>,
        gradient: &Array1<f64>,
        normalization: &NormalizationContext,
    ) -> Result<(Array1<f64>, bool), OptimizationError> {
        let n = gradient.len();
        let cap = self.max_cg_iterations.unwrap_or_else(|| n.min(200));

        let mut z: Array1<f64> = Array1::zeros(n);
        let mut residual = -gradient;
        let mut direction = residual.clone();
        let residual_norm_0 = norm(&residual);
        if residual_norm_0 == 0.0 {
            return Ok((z, false));
        }
        let target = CG_TOLERANCE * residual_norm_0;
        let mut rr = residual.dot(&residual);

        for _ in 0..cap {
            let h_d = objective.hessian_vector(coefficients, &direction, normalization)?;
            let curvature = direction.dot(&h_d);
            if curvature <= 0.0 {
                // Negative curvature: the model is unbounded along this
                // direction, so ride it to the boundary.
                let step = &z + &(boundary_tau(&z, &direction, self.radius) * &direction);
                return Ok((step, true));
            }

            let alpha = rr / curvature;
            let z_next = &z + &(alpha * &direction);
            if norm(&z_next) >= self.radius {
                let step = &z + &(boundary_tau(&z, &direction, self.radius) * &direction);
                return Ok((step, true));
            }
            z = z_next;

            residual.scaled_add(-alpha, &h_d);
            let rr_next = residual.dot(&residual);
            if rr_next.sqrt() <= target {
                break;
            }
            let beta = rr_next / rr;
            direction = &residual + &(beta * &direction);
            rr = rr_next;
        }
        Ok((z, false))
    }
}

impl Default for Tron {
    fn default() -> Self {
        Self::new()
    }
}

/// Positive root of `||z + tau d||^2 = radius^2`.
fn boundary_tau(z: &Array1<f64>, d: &Array1<f64>, radius: f64) -> f64 {
    let a = d.dot(d);
    let b = 2.0 * z.dot(d);
    let c = z.dot(z) - radius * radius;
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    (-b + discriminant.sqrt()) / (2.0 * a)
}

impl<F: TwiceDiffFunction + ?Sized> Solver<F> for Tron {
    fn reset(&mut self) {
        self.radius = self.initial_radius;
    }

    fn step(
        &mut self,
        objective: &F,
        coefficients: &Array1<f64>,
        evaluation: &Evaluation,
        normalization: &NormalizationContext,
    ) -> Result<(Array1<f64>, Evaluation), OptimizationError> {
        for _ in 0..MAX_REJECTIONS {
            if self.radius < RADIUS_FLOOR {
                break;
            }

            let (step, hit_boundary) =
                self.solve_subproblem(objective, coefficients, &evaluation.gradient, normalization)?;
            let step_norm = norm(&step);
            if step_norm == 0.0 {
                break;
            }

            // Quadratic-model reduction the step promises.
            let h_step = objective.hessian_vector(coefficients, &step, normalization)?;
            let predicted =
                -(evaluation.gradient.dot(&step) + 0.5 * step.dot(&h_step));

            let candidate = coefficients + &step;
            let candidate_evaluation = objective.calculate(&candidate, normalization)?;
            let actual = evaluation.value - candidate_evaluation.value;
            let gain = if predicted > 0.0 {
                actual / predicted
            } else {
                // The model predicted no progress; trust it less.
                -1.0
            };

            if gain > ETA_ACCEPT && actual > 0.0 && candidate_evaluation.value.is_finite() {
                if gain < ETA_SHRINK {
                    self.radius *= 0.5;
                } else if gain > ETA_EXPAND && hit_boundary {
                    self.radius = (2.0 * self.radius).min(MAX_RADIUS);
                }
                log::trace!(
                    "Accepted trust-region step: gain {gain:.3}, radius {:.3e}.",
                    self.radius
                );
                return Ok((candidate, candidate_evaluation));
            }

            self.radius = (0.25 * self.radius).min(0.5 * step_norm);
            log::trace!(
                "Rejected trust-region step (gain {gain:.3}); radius shrunk to {:.3e}.",
                self.radius
            );
        }

        // Radius collapsed without an acceptable step. Stay put; the driver
        // will observe zero value change and terminate.
        Ok((coefficients.clone(), evaluation.clone()))
    }
}
