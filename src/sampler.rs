//! # Class-Balancing Down-Sampler
//!
//! Binary classification data is often dominated by the negative class. The
//! [`DownSampler`] rebalances class proportions by keeping every positive
//! record untouched while retaining each negative record independently with
//! probability `rate`, rescaling survivors' weights by `1/rate` so the
//! negative class's expected total weighted loss contribution is preserved.
//!
//! This is a Bernoulli sample, not an exact-count sample: for `n` negatives
//! the retained count has mean `n * rate` with binomial variance. Callers
//! needing tight counts should average over many trials.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

use crate::data::PartitionedDataSet;

/// Error type for down-sampler construction failures.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error(
        "Down-sampling rate must lie strictly inside (0, 1), but {0} was supplied. A rate of 0 would drop every negative; a rate of 1 would be a no-op."
    )]
    InvalidRate(f64),
}

/// Bernoulli down-sampler for the negative class of a binary dataset.
///
/// The rate is validated once at construction; a built sampler can be applied
/// to any number of datasets.
#[derive(Debug, Clone, Copy)]
pub struct DownSampler {
    rate: f64,
}

impl DownSampler {
    /// Builds a sampler, rejecting any rate outside the open interval (0, 1).
    pub fn new(rate: f64) -> Result<Self, SamplerError> {
        if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
            return Err(SamplerError::InvalidRate(rate));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Produces a new dataset with the negative class down-sampled.
    ///
    /// Positive records pass through unchanged. Each negative record survives
    /// an independent Bernoulli(rate) draw; survivors are reweighted by
    /// `1/rate`. Partition structure is preserved, identifiers pass through
    /// untouched, and the input is never mutated.
    ///
    /// Each partition draws from its own `StdRng` stream seeded from `seed`
    /// and the partition index, so a fixed seed and partitioning reproduce
    /// the same sample regardless of worker scheduling.
    pub fn down_sample(&self, data: &PartitionedDataSet, seed: u64) -> PartitionedDataSet {
        let inverse_rate = 1.0 / self.rate;
        let partitions = data
            .partitions()
            .par_iter()
            .enumerate()
            .map(|(index, partition)| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
                partition
                    .iter()
                    .filter_map(|(id, point)| {
                        if point.is_positive() {
                            Some((*id, point.clone()))
                        } else if rng.gen::<f64>() < self.rate {
                            // Validated construction cannot fail here: the
                            // original weight is positive and so is 1/rate.
                            let reweighted = point
                                .reweighted(point.weight * inverse_rate)
                                .expect("rescaled weight remains positive");
                            Some((*id, reweighted))
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();
        PartitionedDataSet::from_partitions(partitions, data.dimension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LabeledPoint;
    use ndarray::array;

    fn binary_dataset() -> PartitionedDataSet {
        let records = (0..200)
            .map(|i| {
                let label = if i % 4 == 0 { 1.0 } else { 0.0 };
                let point = LabeledPoint::new(label, array![i as f64, 1.0], 0.0, 1.0).unwrap();
                (i as u64, point)
            })
            .collect();
        PartitionedDataSet::partition(records, 5).unwrap()
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let sampler = DownSampler::new(0.3).unwrap();
        let data = binary_dataset();
        let first = sampler.down_sample(&data, 42);
        let second = sampler.down_sample(&data, 42);
        assert_eq!(first.count(), second.count());
        for (a, b) in first.iter_records().zip(second.iter_records()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn input_is_left_untouched() {
        let sampler = DownSampler::new(0.2).unwrap();
        let data = binary_dataset();
        let before = data.count();
        let _ = sampler.down_sample(&data, 7);
        assert_eq!(data.count(), before);
        assert!(data.iter_records().all(|(_, p)| (p.weight - 1.0).abs() < 1e-12));
    }
}
