//! # Limited-Memory Quasi-Newton Solver
//!
//! L-BFGS approximates the inverse Hessian from a bounded history of
//! curvature pairs `(s, y)` and applies it to the gradient with the two-loop
//! recursion, so memory stays O(m n). Step lengths are chosen by a
//! Strong-Wolfe line search, which both enforces monotone decrease and keeps
//! the curvature pairs well-posed (`s . y > 0`).

use ndarray::Array1;
use std::collections::VecDeque;

use crate::function::{Evaluation, ObjectiveFunction};
use crate::normalization::NormalizationContext;
use crate::optimizer::{norm, OptimizationError, Solver};

const DEFAULT_MEMORY: usize = 10;
/// Sufficient-decrease (Armijo) constant.
const C1: f64 = 1e-4;
/// Curvature constant.
const C2: f64 = 0.9;
const MAX_BRACKET_ATTEMPTS: usize = 20;
const MAX_ZOOM_ATTEMPTS: usize = 30;
/// Curvature pairs with `s . y` at or below this are discarded; updating
/// with them would corrupt the inverse-Hessian approximation.
const CURVATURE_FLOOR: f64 = 1e-10;

/// Quasi-Newton line-search solver with bounded curvature memory.
pub struct Lbfgs {
    memory: usize,
    /// Curvature history as `(s, y, 1 / (s . y))`, oldest first.
    history: VecDeque<(Array1<f64>, Array1<f64>, f64)>,
}

impl Lbfgs {
    pub fn new() -> Self {
        Self {
            memory: DEFAULT_MEMORY,
            history: VecDeque::new(),
        }
    }

    /// Bounds the number of retained curvature pairs.
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory.max(1);
        self
    }

    /// Two-loop recursion: applies the implicit inverse-Hessian
    /// approximation to the gradient, yielding a descent direction.
    fn direction(&self, gradient: &Array1<f64>) -> Array1<f64> {
        if self.history.is_empty() {
            return -gradient;
        }

        let mut q = gradient.clone();
        let mut alphas = Vec::with_capacity(self.history.len());
        for (s, y, rho) in self.history.iter().rev() {
            let alpha = rho * s.dot(&q);
            q.scaled_add(-alpha, y);
            alphas.push(alpha);
        }

        // Initial Hessian H0 = gamma * I from the most recent pair.
        let (s_last, y_last, _) = self.history.back().expect("history checked non-empty");
        let yy = y_last.dot(y_last);
        let gamma = if yy > CURVATURE_FLOOR {
            s_last.dot(y_last) / yy
        } else {
            1.0
        };
        let mut r = gamma * q;

        for ((s, y, rho), alpha) in self.history.iter().zip(alphas.into_iter().rev()) {
            let beta = rho * y.dot(&r);
            r.scaled_add(alpha - beta, s);
        }
        -r
    }

    fn record_pair(&mut self, s: Array1<f64>, y: Array1<f64>) {
        let sy = s.dot(&y);
        if sy > CURVATURE_FLOOR {
            if self.history.len() >= self.memory {
                self.history.pop_front();
            }
            self.history.push_back((s, y, 1.0 / sy));
        } else {
            log::trace!("Skipping curvature pair with s.y = {sy:.3e}.");
        }
    }
}

impl Default for Lbfgs {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ObjectiveFunction + ?Sized> Solver<F> for Lbfgs {
    fn reset(&mut self) {
        self.history.clear();
    }

    fn step(
        &mut self,
        objective: &F,
        coefficients: &Array1<f64>,
        evaluation: &Evaluation,
        normalization: &NormalizationContext,
    ) -> Result<(Array1<f64>, Evaluation), OptimizationError> {
        let mut direction = self.direction(&evaluation.gradient);
        if evaluation.gradient.dot(&direction) >= 0.0 {
            // The approximation proposed an ascent direction; drop it and
            // fall back to steepest descent.
            self.history.clear();
            direction = -&evaluation.gradient;
        }

        let searched = line_search(objective, coefficients, &direction, evaluation, normalization);
        let (next_coefficients, next_evaluation) = match searched {
            Ok(accepted) => accepted,
            Err(OptimizationError::LineSearchFailed { .. }) if !self.history.is_empty() => {
                // One restart with a fresh steepest-descent direction before
                // surfacing the failure.
                self.history.clear();
                let fallback = -&evaluation.gradient;
                line_search(objective, coefficients, &fallback, evaluation, normalization)?
            }
            Err(error) => return Err(error),
        };

        let s = &next_coefficients - coefficients;
        let y = &next_evaluation.gradient - &evaluation.gradient;
        self.record_pair(s, y);
        Ok((next_coefficients, next_evaluation))
    }
}

/// Strong-Wolfe line search: brackets an acceptable interval by expansion,
/// then narrows it by bisection until both the sufficient-decrease and
/// curvature conditions hold.
fn line_search<F: ObjectiveFunction + ?Sized>(
    objective: &F,
    x: &Array1<f64>,
    direction: &Array1<f64>,
    at_x: &Evaluation,
    normalization: &NormalizationContext,
) -> Result<(Array1<f64>, Evaluation), OptimizationError> {
    let d0 = at_x.gradient.dot(direction);
    if d0 >= 0.0 || norm(direction) == 0.0 {
        return Err(OptimizationError::LineSearchFailed { attempts: 0 });
    }

    let evaluate = |alpha: f64| -> Result<(Array1<f64>, Evaluation), OptimizationError> {
        let candidate = x + &(alpha * direction);
        let evaluation = objective.calculate(&candidate, normalization)?;
        Ok((candidate, evaluation))
    };
    let wolfe_ok = |alpha: f64, evaluation: &Evaluation| {
        let armijo =
            evaluation.value.is_finite() && evaluation.value <= at_x.value + C1 * alpha * d0;
        let curvature = evaluation.gradient.dot(direction).abs() <= C2 * d0.abs();
        armijo && curvature
    };

    // Expansion phase: grow alpha until the step overshoots (Armijo fails or
    // the directional derivative turns non-negative), bracketing a solution.
    let mut lo = 0.0;
    let mut hi = None;
    let mut alpha = 1.0;
    let mut best = None;
    for _ in 0..MAX_BRACKET_ATTEMPTS {
        let (candidate, evaluation) = evaluate(alpha)?;
        if wolfe_ok(alpha, &evaluation) {
            return Ok((candidate, evaluation));
        }
        let overshoot = !evaluation.value.is_finite()
            || evaluation.value > at_x.value + C1 * alpha * d0
            || evaluation.gradient.dot(direction) >= 0.0;
        if overshoot {
            hi = Some(alpha);
            break;
        }
        // Still descending: remember the point and expand.
        best = Some((candidate, evaluation));
        lo = alpha;
        alpha *= 2.0;
    }
    let Some(mut hi) = hi else {
        // Never overshot; take the furthest strictly-decreasing point.
        return best.ok_or(OptimizationError::LineSearchFailed {
            attempts: MAX_BRACKET_ATTEMPTS,
        });
    };

    // Zoom phase: bisect [lo, hi] keeping the invariant that an acceptable
    // step lies inside.
    for _ in 0..MAX_ZOOM_ATTEMPTS {
        let mid = 0.5 * (lo + hi);
        let (candidate, evaluation) = evaluate(mid)?;
        if wolfe_ok(mid, &evaluation) {
            return Ok((candidate, evaluation));
        }
        let sufficient = evaluation.value.is_finite()
            && evaluation.value <= at_x.value + C1 * mid * d0;
        if !sufficient {
            hi = mid;
        } else if evaluation.gradient.dot(direction) < 0.0 {
            lo = mid;
            best = Some((candidate, evaluation));
        } else {
            hi = mid;
        }
    }

    // The interval collapsed without meeting the curvature condition; accept
    // the best sufficiently-decreasing point seen, if any.
    match best {
        Some((candidate, evaluation)) if evaluation.value < at_x.value => {
            Ok((candidate, evaluation))
        }
        _ => Err(OptimizationError::LineSearchFailed {
            attempts: MAX_BRACKET_ATTEMPTS + MAX_ZOOM_ATTEMPTS,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// f(x) = (x - t)' D (x - t) / 2 with diagonal D, minimum at t.
    struct DiagonalQuadratic {
        target: Array1<f64>,
        scales: Array1<f64>,
    }

    impl ObjectiveFunction for DiagonalQuadratic {
        fn dimension(&self) -> usize {
            self.target.len()
        }

        fn calculate(
            &self,
            coefficients: &Array1<f64>,
            _normalization: &NormalizationContext,
        ) -> Result<Evaluation, OptimizationError> {
            let delta = coefficients - &self.target;
            let scaled = &delta * &self.scales;
            Ok(Evaluation {
                value: 0.5 * delta.dot(&scaled),
                gradient: scaled,
            })
        }
    }

    #[test]
    fn minimizes_an_ill_scaled_quadratic() {
        let objective = DiagonalQuadratic {
            target: array![3.0, -1.0, 0.5],
            scales: array![100.0, 1.0, 10.0],
        };
        let identity = NormalizationContext::identity();
        let mut solver = Lbfgs::new();

        let mut x = array![0.0, 0.0, 0.0];
        let mut evaluation = objective.calculate(&x, &identity).unwrap();
        for _ in 0..60 {
            if norm(&evaluation.gradient) < 1e-10 {
                break;
            }
            let (next_x, next_eval) = solver
                .step(&objective, &x, &evaluation, &identity)
                .unwrap();
            assert!(next_eval.value <= evaluation.value);
            x = next_x;
            evaluation = next_eval;
        }
        for i in 0..3 {
            assert_abs_diff_eq!(x[i], objective.target[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn two_loop_matches_steepest_descent_with_empty_history() {
        let solver = Lbfgs::new();
        let gradient = array![2.0, -3.0];
        assert_eq!(solver.direction(&gradient), array![-2.0, 3.0]);
    }
}
