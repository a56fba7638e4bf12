//! # The Iterative Minimization Driver
//!
//! [`Optimizer`] owns the sequential outer loop shared by both solver
//! families: resolve the initial point, evaluate, hand the current iterate to
//! the solver for one safeguarded step, record diagnostics, and test the
//! convergence criteria. The solver (L-BFGS or TRON) decides *how* a step is
//! proposed and accepted; the driver decides *when* to stop.
//!
//! Iteration `k + 1` depends on the full result of iteration `k`, so the loop
//! itself is strictly sequential; all parallelism lives inside the
//! objective's partition reductions. An `Optimizer` is not safe for
//! concurrent `optimize` calls on the same instance — each call mutates the
//! tracker and done flag.

use ndarray::Array1;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::function::{Evaluation, ObjectiveFunction};
use crate::normalization::NormalizationContext;
use crate::state::{ConvergenceReason, OptimizerState, StateTracker};

/// A comprehensive error type for optimization failures.
///
/// Numerical failures abort the current run but never corrupt diagnostics
/// already recorded; the caller decides whether to retry from a different
/// initial point.
#[derive(Error, Debug)]
pub enum OptimizationError {
    #[error(
        "The objective produced a non-finite value ({value}) at iteration {iteration}. The run was aborted; previously tracked states are preserved."
    )]
    NonFiniteValue { iteration: u32, value: f64 },

    #[error("The gradient contained a non-finite component at iteration {iteration}.")]
    NonFiniteGradient { iteration: u32 },

    #[error("The objective expects {expected} coefficients but {found} were supplied.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error(
        "The line search failed to find an acceptable step after {attempts} attempts. The search direction may not be a descent direction."
    )]
    LineSearchFailed { attempts: usize },
}

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Iterating,
    Converged,
    MaxIterationsReached,
}

/// Configuration shared by every optimizer variant.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Applies to both the relative value-change and gradient-norm checks.
    pub tolerance: f64,
    /// Bounded-work guarantee: the loop never runs more iterations than this.
    pub max_iterations: u32,
    /// Shared read-only across every objective evaluation of the run.
    pub normalization: Arc<NormalizationContext>,
    /// Record a full per-iteration history. When disabled, history queries
    /// return nothing; this is not an error.
    pub track_state: bool,
    /// When no explicit initial point is given, start from the previous
    /// run's final coefficients instead of the zero vector.
    pub reuse_previous_model: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 100,
            normalization: Arc::new(NormalizationContext::identity()),
            track_state: true,
            reuse_previous_model: false,
        }
    }
}

impl OptimizerConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_normalization(mut self, normalization: Arc<NormalizationContext>) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_state_tracking(mut self, track_state: bool) -> Self {
        self.track_state = track_state;
        self
    }

    pub fn with_reuse_previous_model(mut self, reuse: bool) -> Self {
        self.reuse_previous_model = reuse;
        self
    }
}

/// One safeguarded minimization step.
///
/// Given the current iterate and its evaluation, the solver proposes a
/// direction, applies its acceptance safeguard (line search or trust
/// region), and returns the accepted next iterate with its evaluation. A
/// returned value must never exceed the current one.
pub trait Solver<F: ObjectiveFunction + ?Sized> {
    /// Clears any memory carried between iterations (curvature pairs, trust
    /// radius). Called once at the start of every `optimize` run.
    fn reset(&mut self);

    fn step(
        &mut self,
        objective: &F,
        coefficients: &Array1<f64>,
        evaluation: &Evaluation,
        normalization: &NormalizationContext,
    ) -> Result<(Array1<f64>, Evaluation), OptimizationError>;
}

/// The result of a completed optimization run.
#[derive(Debug, Clone)]
pub struct OptimizedModel {
    pub coefficients: Array1<f64>,
    pub value: f64,
    pub gradient_norm: f64,
    pub reason: ConvergenceReason,
    /// Accepted iterations, excluding the initial evaluation.
    pub iterations: u32,
}

/// The iterative minimizer, generic over the step strategy.
pub struct Optimizer<S> {
    config: OptimizerConfig,
    solver: S,
    tracker: Option<StateTracker>,
    previous_coefficients: Option<Array1<f64>>,
    phase: RunPhase,
    done: bool,
}

impl<S> Optimizer<S> {
    pub fn new(config: OptimizerConfig, solver: S) -> Self {
        Self {
            config,
            solver,
            tracker: None,
            previous_coefficients: None,
            phase: RunPhase::NotStarted,
            done: false,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Diagnostics from the most recent run. `None` when tracking is
    /// disabled or no run has started.
    pub fn state_tracker(&self) -> Option<&StateTracker> {
        self.tracker.as_ref()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Whether the most recent `optimize` call ran to completion.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Minimizes `objective`, starting from `initial` when given.
    ///
    /// With no explicit initial point, the previous run's final coefficients
    /// are reused when so configured (and available); otherwise the zero
    /// vector of the objective's dimension is used.
    pub fn optimize<F>(
        &mut self,
        objective: &F,
        initial: Option<Array1<f64>>,
    ) -> Result<OptimizedModel, OptimizationError>
    where
        F: ObjectiveFunction + ?Sized,
        S: Solver<F>,
    {
        self.phase = RunPhase::NotStarted;
        self.done = false;
        self.tracker = self.config.track_state.then(StateTracker::new);
        self.solver.reset();
        let normalization = Arc::clone(&self.config.normalization);

        let mut coefficients = match initial {
            Some(explicit) => {
                if explicit.len() != objective.dimension() {
                    return Err(OptimizationError::DimensionMismatch {
                        expected: objective.dimension(),
                        found: explicit.len(),
                    });
                }
                explicit
            }
            None => match (&self.previous_coefficients, self.config.reuse_previous_model) {
                (Some(previous), true) if previous.len() == objective.dimension() => {
                    log::debug!("Warm-starting from the previous run's coefficients.");
                    previous.clone()
                }
                _ => Array1::zeros(objective.dimension()),
            },
        };

        let run_start = Instant::now();
        let mut evaluation = objective.calculate(&coefficients, &normalization)?;
        check_finite(0, &evaluation)?;
        log::info!(
            "Starting optimization: {} parameters, initial value {:.6e}.",
            coefficients.len(),
            evaluation.value
        );
        self.phase = RunPhase::Iterating;
        self.track(0, &coefficients, &evaluation, run_start);

        let mut iterations = 0;
        let mut reason = None;
        for iteration in 1..=self.config.max_iterations {
            let gradient_norm = norm(&evaluation.gradient);
            if gradient_norm < self.config.tolerance {
                reason = Some(ConvergenceReason::GradientConverged);
                break;
            }

            let iteration_start = Instant::now();
            let (next_coefficients, next_evaluation) =
                self.solver
                    .step(objective, &coefficients, &evaluation, &normalization)?;
            check_finite(iteration, &next_evaluation)?;

            let previous_value = evaluation.value;
            coefficients = next_coefficients;
            evaluation = next_evaluation;
            iterations = iteration;
            self.track(iteration, &coefficients, &evaluation, iteration_start);
            log::debug!(
                "Iteration {iteration}: value {:.6e}, gradient norm {:.6e}.",
                evaluation.value,
                norm(&evaluation.gradient)
            );

            let relative_change =
                (evaluation.value - previous_value).abs() / previous_value.abs().max(1.0);
            if relative_change < self.config.tolerance {
                reason = Some(ConvergenceReason::FunctionValuesConverged);
                break;
            }
        }

        let reason = reason.unwrap_or(ConvergenceReason::MaxIterationsReached);
        self.phase = match reason {
            ConvergenceReason::MaxIterationsReached => RunPhase::MaxIterationsReached,
            _ => RunPhase::Converged,
        };
        if let Some(tracker) = &mut self.tracker {
            tracker.set_convergence_reason(reason);
        }
        self.previous_coefficients = Some(coefficients.clone());
        self.done = true;

        let gradient_norm = norm(&evaluation.gradient);
        log::info!(
            "Optimization finished after {iterations} iterations ({reason:?}): value {:.6e}, gradient norm {:.6e}.",
            evaluation.value,
            gradient_norm
        );
        Ok(OptimizedModel {
            coefficients,
            value: evaluation.value,
            gradient_norm,
            reason,
            iterations,
        })
    }

    fn track(
        &mut self,
        iteration: u32,
        coefficients: &Array1<f64>,
        evaluation: &Evaluation,
        started: Instant,
    ) {
        if let Some(tracker) = &mut self.tracker {
            tracker.track(
                OptimizerState {
                    iteration,
                    value: evaluation.value,
                    gradient: evaluation.gradient.clone(),
                    coefficients: coefficients.clone(),
                },
                started.elapsed(),
            );
        }
    }
}

pub(crate) fn norm(vector: &Array1<f64>) -> f64 {
    vector.dot(vector).sqrt()
}

fn check_finite(iteration: u32, evaluation: &Evaluation) -> Result<(), OptimizationError> {
    if !evaluation.value.is_finite() {
        return Err(OptimizationError::NonFiniteValue {
            iteration,
            value: evaluation.value,
        });
    }
    if evaluation.gradient.iter().any(|g| !g.is_finite()) {
        return Err(OptimizationError::NonFiniteGradient { iteration });
    }
    Ok(())
}
