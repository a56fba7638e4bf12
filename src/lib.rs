#![deny(unused_imports)]
//! # descent
//!
//! Iterative minimization of weighted classification losses over partitioned
//! training data, plus a class-balancing down-sampler for binary labels.
//!
//! The crate is organized bottom-up:
//!
//! - [`data`] holds the immutable [`data::LabeledPoint`] record and the
//!   [`data::PartitionedDataSet`] collection whose reductions run
//!   data-parallel across partitions.
//! - [`sampler`] rebalances class proportions by Bernoulli-sampling the
//!   negative class and reweighting survivors.
//! - [`function`] defines the objective-function traits and the weighted
//!   logistic / squared losses evaluated by distributed reduction.
//! - [`optimizer`] drives the sequential minimization loop shared by the
//!   [`lbfgs`] quasi-Newton solver and the [`tron`] trust-region Newton
//!   solver, recording per-iteration diagnostics in a [`state::StateTracker`].

pub mod data;
pub mod function;
pub mod lbfgs;
pub mod normalization;
pub mod optimizer;
pub mod sampler;
pub mod state;
pub mod tron;

pub use data::{LabeledPoint, PartitionedDataSet, POSITIVE_LABEL_THRESHOLD};
pub use function::{Evaluation, LogisticLossFunction, ObjectiveFunction, SquaredLossFunction, TwiceDiffFunction};
pub use lbfgs::Lbfgs;
pub use normalization::NormalizationContext;
pub use optimizer::{OptimizationError, OptimizedModel, Optimizer, OptimizerConfig, RunPhase, Solver};
pub use sampler::{DownSampler, SamplerError};
pub use state::{ConvergenceReason, OptimizerState, StateTracker};
pub use tron::Tron;
