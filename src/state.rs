//! # Per-Iteration Optimizer Diagnostics
//!
//! The optimizer appends one [`OptimizerState`] snapshot per accepted
//! iteration to a [`StateTracker`], together with the iteration's elapsed
//! wall time. The tracker is append-only: past entries are never mutated,
//! and the two logs stay index-aligned by construction.

use ndarray::Array1;
use std::time::Duration;

/// Why an optimization run terminated. Exactly one reason is recorded when
/// the loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceReason {
    /// The relative change in objective value fell below tolerance.
    FunctionValuesConverged,
    /// The Euclidean norm of the gradient fell below tolerance.
    GradientConverged,
    /// The iteration cap was hit before either tolerance triggered.
    MaxIterationsReached,
}

/// A snapshot of one accepted optimizer iteration. Immutable after append.
#[derive(Debug, Clone)]
pub struct OptimizerState {
    /// Iteration index; 0 is the initial evaluation before any step.
    pub iteration: u32,
    /// Objective value at `coefficients`.
    pub value: f64,
    /// Gradient at `coefficients`; same dimensionality as the parameters.
    pub gradient: Array1<f64>,
    /// The parameter vector after this iteration's accepted step.
    pub coefficients: Array1<f64>,
}

/// Append-only ordered log of optimizer snapshots and per-iteration times.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: Vec<OptimizerState>,
    times: Vec<Duration>,
    convergence_reason: Option<ConvergenceReason>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one snapshot with its elapsed wall time. The two logs always
    /// have equal length.
    pub(crate) fn track(&mut self, state: OptimizerState, elapsed: Duration) {
        self.states.push(state);
        self.times.push(elapsed);
    }

    pub(crate) fn set_convergence_reason(&mut self, reason: ConvergenceReason) {
        self.convergence_reason = Some(reason);
    }

    /// All tracked snapshots, in iteration order.
    pub fn states(&self) -> &[OptimizerState] {
        &self.states
    }

    /// Elapsed wall time per tracked iteration, index-aligned with
    /// [`StateTracker::states`].
    pub fn times(&self) -> &[Duration] {
        &self.times
    }

    /// The most recently tracked snapshot, if any iteration has run.
    pub fn latest(&self) -> Option<&OptimizerState> {
        self.states.last()
    }

    /// Whether the run this tracker belongs to has terminated. Absent only
    /// while still iterating.
    pub fn converged(&self) -> bool {
        self.convergence_reason.is_some()
    }

    pub fn convergence_reason(&self) -> Option<ConvergenceReason> {
        self.convergence_reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn snapshot(iteration: u32, value: f64) -> OptimizerState {
        OptimizerState {
            iteration,
            value,
            gradient: array![0.1, -0.2],
            coefficients: array![1.0, 2.0],
        }
    }

    #[test]
    fn logs_stay_index_aligned() {
        let mut tracker = StateTracker::new();
        assert!(tracker.latest().is_none());
        for i in 0..5 {
            tracker.track(snapshot(i, 10.0 - i as f64), Duration::from_millis(i as u64));
            assert_eq!(tracker.states().len(), tracker.times().len());
        }
        assert_eq!(tracker.latest().unwrap().iteration, 4);
        assert!(!tracker.converged());
    }

    #[test]
    fn reason_marks_convergence() {
        let mut tracker = StateTracker::new();
        tracker.track(snapshot(0, 1.0), Duration::ZERO);
        tracker.set_convergence_reason(ConvergenceReason::GradientConverged);
        assert!(tracker.converged());
        assert_eq!(
            tracker.convergence_reason(),
            Some(ConvergenceReason::GradientConverged)
        );
    }
}
