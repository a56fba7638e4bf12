//! # Objective Functions over Partitioned Data
//!
//! The optimizer consumes an [`ObjectiveFunction`]: something that can
//! produce a loss value and gradient at a parameter vector. Second-order
//! solvers additionally need [`TwiceDiffFunction`] Hessian-vector products.
//!
//! The concrete losses here evaluate by distributed reduction: every
//! partition folds its records into a local `(value, gradient)` partial, and
//! partials are merged with a depth-bounded sum via
//! [`PartitionedDataSet::tree_aggregate`]. Evaluation is read-only over the
//! dataset, so scoring the same model twice yields identical results.

use ndarray::Array1;

use crate::data::{LabeledPoint, PartitionedDataSet};
use crate::normalization::NormalizationContext;
use crate::optimizer::OptimizationError;

/// Number of pairwise-merge rounds used when combining per-partition
/// partials. Two rounds bound fan-in well for realistic partition counts.
pub const DEFAULT_AGGREGATION_DEPTH: usize = 2;

/// A loss value and its gradient at one parameter vector.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub value: f64,
    pub gradient: Array1<f64>,
}

/// A differentiable scalar objective bound to a fixed dataset.
///
/// Implementations must be free of side effects: repeated calls with the
/// same coefficients and normalization return identical results.
pub trait ObjectiveFunction {
    /// Dimensionality of the parameter vector this objective expects.
    fn dimension(&self) -> usize;

    /// Loss value and gradient at `coefficients`, with `normalization`
    /// applied to the parameter vector before record contributions are
    /// evaluated (identity context leaves it untouched).
    fn calculate(
        &self,
        coefficients: &Array1<f64>,
        normalization: &NormalizationContext,
    ) -> Result<Evaluation, OptimizationError>;
}

/// A twice-differentiable objective exposing Hessian-vector products, for
/// solvers that build second-order steps without materializing the Hessian.
pub trait TwiceDiffFunction: ObjectiveFunction {
    fn hessian_vector(
        &self,
        coefficients: &Array1<f64>,
        direction: &Array1<f64>,
        normalization: &NormalizationContext,
    ) -> Result<Array1<f64>, OptimizationError>;
}

fn check_dimension(expected: usize, found: usize) -> Result<(), OptimizationError> {
    if expected == found {
        Ok(())
    } else {
        Err(OptimizationError::DimensionMismatch { expected, found })
    }
}

/// Per-partition accumulator for a value-and-gradient reduction.
#[derive(Clone)]
struct ValueGradient {
    value: f64,
    gradient: Array1<f64>,
}

impl ValueGradient {
    fn zero(dimension: usize) -> Self {
        Self {
            value: 0.0,
            gradient: Array1::zeros(dimension),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.value += other.value;
        self.gradient += &other.gradient;
        self
    }
}

/// Numerically stable `ln(1 + e^m)`.
fn log1p_exp(margin: f64) -> f64 {
    margin.max(0.0) + (-margin.abs()).exp().ln_1p()
}

fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Weighted logistic loss with per-record offsets.
///
/// Each record contributes `w * (ln(1 + e^m) - y * m)` where
/// `m = x . c + offset`. Minimizing the total over a dataset is maximum
/// weighted likelihood for binary labels.
pub struct LogisticLossFunction {
    data: PartitionedDataSet,
    aggregation_depth: usize,
}

impl LogisticLossFunction {
    pub fn new(data: PartitionedDataSet) -> Self {
        Self {
            data,
            aggregation_depth: DEFAULT_AGGREGATION_DEPTH,
        }
    }

    /// Bounds merge fan-in when combining per-partition partials.
    pub fn with_aggregation_depth(mut self, depth: usize) -> Self {
        self.aggregation_depth = depth.max(1);
        self
    }
}

impl ObjectiveFunction for LogisticLossFunction {
    fn dimension(&self) -> usize {
        self.data.dimension()
    }

    fn calculate(
        &self,
        coefficients: &Array1<f64>,
        normalization: &NormalizationContext,
    ) -> Result<Evaluation, OptimizationError> {
        check_dimension(self.dimension(), coefficients.len())?;
        let effective = normalization.transform_coefficients(coefficients);

        let per_record = |mut acc: ValueGradient, point: &LabeledPoint| {
            let margin = point.features.dot(&effective) + point.offset;
            acc.value += point.weight * (log1p_exp(margin) - point.label * margin);
            let residual = point.weight * (sigmoid(margin) - point.label);
            acc.gradient.scaled_add(residual, &point.features);
            acc
        };

        let total = self.data.tree_aggregate(
            ValueGradient::zero(self.dimension()),
            per_record,
            ValueGradient::merge,
            self.aggregation_depth,
        );

        Ok(Evaluation {
            value: total.value,
            gradient: normalization.transform_gradient(&total.gradient),
        })
    }
}

impl TwiceDiffFunction for LogisticLossFunction {
    fn hessian_vector(
        &self,
        coefficients: &Array1<f64>,
        direction: &Array1<f64>,
        normalization: &NormalizationContext,
    ) -> Result<Array1<f64>, OptimizationError> {
        check_dimension(self.dimension(), coefficients.len())?;
        check_dimension(self.dimension(), direction.len())?;
        let effective = normalization.transform_coefficients(coefficients);
        let effective_direction = normalization.transform_direction(direction);

        let per_record = |mut acc: Array1<f64>, point: &LabeledPoint| {
            let margin = point.features.dot(&effective) + point.offset;
            let mu = sigmoid(margin);
            let curvature = point.weight * mu * (1.0 - mu);
            let along = point.features.dot(&effective_direction);
            acc.scaled_add(curvature * along, &point.features);
            acc
        };

        let product = self.data.tree_aggregate(
            Array1::zeros(self.dimension()),
            per_record,
            |mut a: Array1<f64>, b| {
                a += &b;
                a
            },
            self.aggregation_depth,
        );

        Ok(normalization.transform_gradient(&product))
    }
}

/// Weighted squared-error loss with per-record offsets:
/// `w * (m - y)^2 / 2` where `m = x . c + offset`.
pub struct SquaredLossFunction {
    data: PartitionedDataSet,
    aggregation_depth: usize,
}

impl SquaredLossFunction {
    pub fn new(data: PartitionedDataSet) -> Self {
        Self {
            data,
            aggregation_depth: DEFAULT_AGGREGATION_DEPTH,
        }
    }

    pub fn with_aggregation_depth(mut self, depth: usize) -> Self {
        self.aggregation_depth = depth.max(1);
        self
    }
}

impl ObjectiveFunction for SquaredLossFunction {
    fn dimension(&self) -> usize {
        self.data.dimension()
    }

    fn calculate(
        &self,
        coefficients: &Array1<f64>,
        normalization: &NormalizationContext,
    ) -> Result<Evaluation, OptimizationError> {
        check_dimension(self.dimension(), coefficients.len())?;
        let effective = normalization.transform_coefficients(coefficients);

        let per_record = |mut acc: ValueGradient, point: &LabeledPoint| {
            let residual = point.features.dot(&effective) + point.offset - point.label;
            acc.value += 0.5 * point.weight * residual * residual;
            acc.gradient.scaled_add(point.weight * residual, &point.features);
            acc
        };

        let total = self.data.tree_aggregate(
            ValueGradient::zero(self.dimension()),
            per_record,
            ValueGradient::merge,
            self.aggregation_depth,
        );

        Ok(Evaluation {
            value: total.value,
            gradient: normalization.transform_gradient(&total.gradient),
        })
    }
}

impl TwiceDiffFunction for SquaredLossFunction {
    fn hessian_vector(
        &self,
        coefficients: &Array1<f64>,
        direction: &Array1<f64>,
        normalization: &NormalizationContext,
    ) -> Result<Array1<f64>, OptimizationError> {
        check_dimension(self.dimension(), coefficients.len())?;
        check_dimension(self.dimension(), direction.len())?;
        let effective_direction = normalization.transform_direction(direction);

        let per_record = |mut acc: Array1<f64>, point: &LabeledPoint| {
            let along = point.features.dot(&effective_direction);
            acc.scaled_add(point.weight * along, &point.features);
            acc
        };

        let product = self.data.tree_aggregate(
            Array1::zeros(self.dimension()),
            per_record,
            |mut a: Array1<f64>, b| {
                a += &b;
                a
            },
            self.aggregation_depth,
        );

        Ok(normalization.transform_gradient(&product))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LabeledPoint;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn tiny_dataset() -> PartitionedDataSet {
        let records = vec![
            (0, LabeledPoint::new(1.0, array![1.0, 0.5], 0.1, 1.0).unwrap()),
            (1, LabeledPoint::new(0.0, array![-0.5, 1.0], 0.0, 2.0).unwrap()),
            (2, LabeledPoint::new(1.0, array![0.2, -1.0], -0.1, 0.5).unwrap()),
        ];
        PartitionedDataSet::partition(records, 2).unwrap()
    }

    #[test]
    fn logistic_gradient_matches_finite_differences() {
        let objective = LogisticLossFunction::new(tiny_dataset());
        let identity = NormalizationContext::identity();
        let coefficients = array![0.3, -0.7];
        let evaluation = objective.calculate(&coefficients, &identity).unwrap();

        let h = 1e-6;
        for i in 0..2 {
            let mut bumped = coefficients.clone();
            bumped[i] += h;
            let forward = objective.calculate(&bumped, &identity).unwrap().value;
            bumped[i] -= 2.0 * h;
            let backward = objective.calculate(&bumped, &identity).unwrap().value;
            let numeric = (forward - backward) / (2.0 * h);
            assert_abs_diff_eq!(evaluation.gradient[i], numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn logistic_hessian_vector_matches_gradient_differences() {
        let objective = LogisticLossFunction::new(tiny_dataset());
        let identity = NormalizationContext::identity();
        let coefficients = array![0.3, -0.7];
        let direction = array![0.4, 0.9];

        let h = 1e-6;
        let forward = objective
            .calculate(&(&coefficients + &(h * &direction)), &identity)
            .unwrap()
            .gradient;
        let backward = objective
            .calculate(&(&coefficients - &(h * &direction)), &identity)
            .unwrap()
            .gradient;
        let numeric = (&forward - &backward) / (2.0 * h);

        let analytic = objective
            .hessian_vector(&coefficients, &direction, &identity)
            .unwrap();
        for i in 0..2 {
            assert_abs_diff_eq!(analytic[i], numeric[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn squared_loss_has_linear_gradient() {
        let objective = SquaredLossFunction::new(tiny_dataset());
        let identity = NormalizationContext::identity();
        let at_zero = objective.calculate(&array![0.0, 0.0], &identity).unwrap();
        let hessian_step = objective
            .hessian_vector(&array![0.0, 0.0], &array![1.0, 1.0], &identity)
            .unwrap();
        let at_ones = objective.calculate(&array![1.0, 1.0], &identity).unwrap();
        // For a quadratic, g(c + v) = g(c) + H v exactly.
        for i in 0..2 {
            assert_abs_diff_eq!(
                at_ones.gradient[i],
                at_zero.gradient[i] + hessian_step[i],
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn rejects_mismatched_coefficients() {
        let objective = LogisticLossFunction::new(tiny_dataset());
        let identity = NormalizationContext::identity();
        assert!(matches!(
            objective.calculate(&array![1.0, 2.0, 3.0], &identity),
            Err(OptimizationError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn scoring_is_idempotent() {
        let objective = LogisticLossFunction::new(tiny_dataset());
        let identity = NormalizationContext::identity();
        let coefficients = array![0.8, -1.2];
        let first = objective.calculate(&coefficients, &identity).unwrap();
        let second = objective.calculate(&coefficients, &identity).unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(first.gradient, second.gradient);
    }
}
