//! # Weighted Training Records and Partitioned Collections
//!
//! This module is the data layer the rest of the crate computes over. It
//! provides the immutable [`LabeledPoint`] record and [`PartitionedDataSet`],
//! an in-process stand-in for a distributed key-value collection: records are
//! grouped into partitions, per-partition work runs on independent rayon
//! tasks with no shared mutable state, and the only synchronization point is
//! the final reduction.
//!
//! - Strict validation: records are checked at construction (finite fields,
//!   strictly positive weight) so downstream numerics never see bad input.
//! - Read-only evaluation: every operation here either borrows the records
//!   immutably or builds a new collection; nothing mutates a dataset in
//!   place, which is what makes repeated objective evaluations idempotent.

use ndarray::Array1;
use rayon::prelude::*;
use thiserror::Error;

/// Labels at or above this value are treated as the positive class.
///
/// Binary labels are conventionally 0.0 / 1.0, so the midpoint separates the
/// classes while tolerating small floating-point noise.
pub const POSITIVE_LABEL_THRESHOLD: f64 = 0.5;

/// A comprehensive error type for record and dataset construction failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Record weight must be strictly positive, but {0} was supplied.")]
    NonPositiveWeight(f64),

    #[error("Record field '{field}' must be finite, but {value} was supplied.")]
    NonFiniteField { field: &'static str, value: f64 },

    #[error(
        "All records in a dataset must share one feature dimensionality. Expected {expected} but record {record_id} has {found}."
    )]
    DimensionMismatch {
        record_id: u64,
        expected: usize,
        found: usize,
    },

    #[error("A dataset must contain at least one record.")]
    EmptyDataSet,

    #[error("A dataset must have at least one partition, but {0} was requested.")]
    InvalidPartitionCount(usize),
}

/// One immutable unit of training data.
///
/// Constructed once at data-load time and never mutated; transformations such
/// as down-sampling produce new records via [`LabeledPoint::reweighted`].
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPoint {
    /// Response value; 0.0 / 1.0 for binary classification.
    pub label: f64,
    /// Feature vector; fixed dimensionality across a dataset.
    pub features: Array1<f64>,
    /// Additive bias excluded from optimization.
    pub offset: f64,
    /// Strictly positive multiplier on this record's loss contribution.
    pub weight: f64,
}

impl LabeledPoint {
    /// Builds a record, validating that all scalar fields are finite and the
    /// weight is strictly positive.
    pub fn new(
        label: f64,
        features: Array1<f64>,
        offset: f64,
        weight: f64,
    ) -> Result<Self, DataError> {
        for (field, value) in [("label", label), ("offset", offset), ("weight", weight)] {
            if !value.is_finite() {
                return Err(DataError::NonFiniteField { field, value });
            }
        }
        if weight <= 0.0 {
            return Err(DataError::NonPositiveWeight(weight));
        }
        Ok(Self {
            label,
            features,
            offset,
            weight,
        })
    }

    /// Whether this record's label is at or above [`POSITIVE_LABEL_THRESHOLD`].
    pub fn is_positive(&self) -> bool {
        self.label >= POSITIVE_LABEL_THRESHOLD
    }

    /// A copy of this record carrying a different weight. The original is
    /// left untouched.
    pub fn reweighted(&self, weight: f64) -> Result<Self, DataError> {
        Self::new(self.label, self.features.clone(), self.offset, weight)
    }
}

/// A partitioned collection of `(identifier, record)` pairs.
///
/// Each partition is processed by an independent worker task; reductions
/// combine per-partition partial results with an associative, commutative
/// merge. The collection is read-only once built.
#[derive(Debug, Clone)]
pub struct PartitionedDataSet {
    partitions: Vec<Vec<(u64, LabeledPoint)>>,
    dimension: usize,
}

impl PartitionedDataSet {
    /// Distributes `records` round-robin across `num_partitions` partitions,
    /// validating that every record shares one feature dimensionality.
    pub fn partition(
        records: Vec<(u64, LabeledPoint)>,
        num_partitions: usize,
    ) -> Result<Self, DataError> {
        if num_partitions == 0 {
            return Err(DataError::InvalidPartitionCount(num_partitions));
        }
        let dimension = match records.first() {
            Some((_, point)) => point.features.len(),
            None => return Err(DataError::EmptyDataSet),
        };
        for (id, point) in &records {
            if point.features.len() != dimension {
                return Err(DataError::DimensionMismatch {
                    record_id: *id,
                    expected: dimension,
                    found: point.features.len(),
                });
            }
        }

        let mut partitions = vec![Vec::new(); num_partitions];
        for (index, pair) in records.into_iter().enumerate() {
            partitions[index % num_partitions].push(pair);
        }
        Ok(Self {
            partitions,
            dimension,
        })
    }

    /// Rebuilds a dataset from already-partitioned records, keeping the
    /// partition structure as given. Used by transformations that preserve
    /// partitioning (`map`, `filter`, down-sampling).
    pub(crate) fn from_partitions(
        partitions: Vec<Vec<(u64, LabeledPoint)>>,
        dimension: usize,
    ) -> Self {
        Self {
            partitions,
            dimension,
        }
    }

    /// The shared feature dimensionality of every record.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Total number of records, counted in parallel across partitions.
    pub fn count(&self) -> usize {
        self.partitions.par_iter().map(Vec::len).sum()
    }

    /// Number of records satisfying `predicate`.
    pub fn count_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&(u64, LabeledPoint)) -> bool + Sync,
    {
        self.partitions
            .par_iter()
            .map(|partition| partition.iter().filter(|pair| predicate(pair)).count())
            .sum()
    }

    /// A new dataset with `mapper` applied to every pair, partition structure
    /// preserved. The mapper must preserve feature dimensionality.
    pub fn map<F>(&self, mapper: F) -> Self
    where
        F: Fn(&(u64, LabeledPoint)) -> (u64, LabeledPoint) + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|partition| partition.iter().map(&mapper).collect())
            .collect();
        Self::from_partitions(partitions, self.dimension)
    }

    /// A new dataset retaining only pairs satisfying `predicate`. Partitions
    /// may become empty; the partition count is preserved.
    pub fn filter<P>(&self, predicate: P) -> Self
    where
        P: Fn(&(u64, LabeledPoint)) -> bool + Sync,
    {
        let partitions = self
            .partitions
            .par_iter()
            .map(|partition| {
                partition
                    .iter()
                    .filter(|pair| predicate(pair))
                    .cloned()
                    .collect()
            })
            .collect();
        Self::from_partitions(partitions, self.dimension)
    }

    /// Sequential iterator over every `(identifier, record)` pair, in
    /// partition order. Intended for inspection and tests, not hot paths.
    pub fn iter_records(&self) -> impl Iterator<Item = &(u64, LabeledPoint)> {
        self.partitions.iter().flat_map(|partition| partition.iter())
    }

    pub(crate) fn partitions(&self) -> &[Vec<(u64, LabeledPoint)>] {
        &self.partitions
    }

    /// Aggregates per-record contributions with a depth-bounded merge tree.
    ///
    /// Each partition folds its records into a local partial with `seq_op`
    /// (running in parallel across partitions), then partials are combined
    /// with `comb_op` in at most `depth` rounds of bounded fan-in, Spark
    /// `treeAggregate`-style. `comb_op` must be associative and commutative.
    /// A `depth` of 1 degenerates to a single flat reduction. Read-only over
    /// the dataset: repeated calls with the same operators yield identical
    /// results.
    pub fn tree_aggregate<A, S, C>(&self, zero: A, seq_op: S, comb_op: C, depth: usize) -> A
    where
        A: Clone + Send + Sync,
        S: Fn(A, &LabeledPoint) -> A + Sync,
        C: Fn(A, A) -> A + Sync,
    {
        let mut partials: Vec<A> = self
            .partitions
            .par_iter()
            .map(|partition| {
                partition
                    .iter()
                    .fold(zero.clone(), |acc, (_, point)| seq_op(acc, point))
            })
            .collect();

        // Bound merge fan-in: with p partials and d rounds, a chunk width of
        // ceil(p^(1/d)) collapses everything within d rounds.
        let depth = depth.max(1);
        let width = if depth == 1 {
            partials.len().max(1)
        } else {
            let p = partials.len() as f64;
            (p.powf(1.0 / depth as f64).ceil() as usize).max(2)
        };
        while partials.len() > 1 {
            partials = partials
                .par_chunks(width)
                .map(|chunk| {
                    let mut merged = chunk[0].clone();
                    for partial in &chunk[1..] {
                        merged = comb_op(merged, partial.clone());
                    }
                    merged
                })
                .collect();
        }
        partials.into_iter().next().unwrap_or(zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn point(label: f64, weight: f64) -> LabeledPoint {
        LabeledPoint::new(label, array![1.0, 2.0], 0.0, weight).unwrap()
    }

    fn dataset(n: usize, partitions: usize) -> PartitionedDataSet {
        let records = (0..n)
            .map(|i| (i as u64, point(if i % 3 == 0 { 1.0 } else { 0.0 }, 1.0)))
            .collect();
        PartitionedDataSet::partition(records, partitions).unwrap()
    }

    #[test]
    fn rejects_non_positive_weight() {
        assert!(matches!(
            LabeledPoint::new(1.0, array![1.0], 0.0, 0.0),
            Err(DataError::NonPositiveWeight(_))
        ));
        assert!(matches!(
            LabeledPoint::new(1.0, array![1.0], 0.0, -2.5),
            Err(DataError::NonPositiveWeight(_))
        ));
    }

    #[test]
    fn rejects_non_finite_fields() {
        assert!(matches!(
            LabeledPoint::new(f64::NAN, array![1.0], 0.0, 1.0),
            Err(DataError::NonFiniteField { field: "label", .. })
        ));
        assert!(matches!(
            LabeledPoint::new(0.0, array![1.0], f64::INFINITY, 1.0),
            Err(DataError::NonFiniteField { field: "offset", .. })
        ));
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let records = vec![
            (0, point(1.0, 1.0)),
            (1, LabeledPoint::new(0.0, array![1.0], 0.0, 1.0).unwrap()),
        ];
        assert!(matches!(
            PartitionedDataSet::partition(records, 2),
            Err(DataError::DimensionMismatch { record_id: 1, .. })
        ));
    }

    #[test]
    fn rejects_empty_and_zero_partitions() {
        assert!(matches!(
            PartitionedDataSet::partition(Vec::new(), 2),
            Err(DataError::EmptyDataSet)
        ));
        assert!(matches!(
            PartitionedDataSet::partition(vec![(0, point(1.0, 1.0))], 0),
            Err(DataError::InvalidPartitionCount(0))
        ));
    }

    #[test]
    fn count_and_filter_agree() {
        let data = dataset(30, 4);
        assert_eq!(data.count(), 30);
        let positives = data.filter(|(_, p)| p.is_positive());
        assert_eq!(positives.count(), data.count_where(|(_, p)| p.is_positive()));
        assert_eq!(positives.num_partitions(), 4);
    }

    #[test]
    fn tree_aggregate_is_depth_invariant() {
        let data = dataset(100, 7);
        let sum_weights = |depth| {
            data.tree_aggregate(0.0_f64, |acc, p| acc + p.weight, |a, b| a + b, depth)
        };
        let flat = sum_weights(1);
        for depth in [2, 3, 5] {
            assert!((sum_weights(depth) - flat).abs() < 1e-12);
        }
        assert!((flat - 100.0).abs() < 1e-12);
    }

    #[test]
    fn tree_aggregate_is_repeatable() {
        let data = dataset(50, 3);
        let run = || data.tree_aggregate(0.0_f64, |acc, p| acc + p.label, |a, b| a + b, 2);
        assert_eq!(run(), run());
    }
}
