// hypergrad/lib.rs

//! # hypergrad
//!
//! Solutions of Lasso, weighted Lasso and elastic-net problems together with
//! their Jacobians with respect to the log-hyperparameters, and the
//! validation criteria that turn those Jacobians into hyperparameter
//! gradients.
//!
//! Four interchangeable differentiation strategies live in [`algo`]:
//! forward iterative differentiation, implicit-forward (fixed-point on the
//! final support), implicit differentiation with a conjugate-gradient solve,
//! and reverse-mode differentiation through the unrolled solver.

#![deny(dead_code)]
#![deny(unused_imports)]

pub mod algo;
pub mod config;
pub mod criterion;
pub mod datasets;
pub mod design;
pub mod estimator;
pub mod models;
pub mod search;
pub mod support;

pub use algo::{
    Backward, BetaJac, BetaJacV, DiffAlgorithm, Forward, Implicit, ImplicitForward, SolverStatus,
};
pub use config::SolverConfig;
pub use criterion::{Criterion, FiniteDiffMonteCarloSure, HeldOutMse};
pub use design::Design;
pub use estimator::{CoordinateDescentEstimator, Estimator};
pub use models::{ElasticNet, Lasso, Model, Penalty, WeightedLasso};
pub use search::{Monitor, SearchResult, bfgs_search, grid_search};
pub use support::{HyperColumns, Support};
