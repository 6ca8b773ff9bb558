// hypergrad/models.rs

//! # Penalized Regression Families
//!
//! Every family minimizes the same composite objective
//!
//! ```text
//! P(beta) = 1/(2n) ||y - X beta||^2 + sum_j l1_j |beta_j| + l2/2 ||beta||^2
//! ```
//!
//! and differs only in how the log-hyperparameters map to the levels
//! `l1_j` and `l2`:
//!
//! | family          | log_alpha length | l1_j             | l2               |
//! |-----------------|------------------|------------------|------------------|
//! | `Lasso`         | 1                | `exp(la[0])`     | 0                |
//! | `WeightedLasso` | n_features       | `exp(la[j])`     | 0                |
//! | `ElasticNet`    | 2                | `exp(la[0])`     | `exp(la[1])`     |
//!
//! A model turns `log_alpha` into a [`Penalty`], which carries the levels and
//! their closed-form derivatives with respect to `log_alpha`. The
//! differentiation algorithms only ever talk to the `Penalty`.

use crate::algo::{AlgoError, BetaJac, forward};
use crate::design::Design;
use crate::estimator::Estimator;
use crate::support::{HyperColumns, Support};
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

/// Errors raised when a model interprets its log-hyperparameters.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{model} expects {expected} log-hyperparameters, but {found} were supplied.")]
    HyperparameterShape {
        model: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Log-hyperparameter {index} is not finite: {value}.")]
    NonFiniteHyperparameter { index: usize, value: f64 },
}

/// How the hyperparameter columns map onto the penalty levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HyperLayout {
    /// One level shared by every feature.
    Shared,
    /// One level per feature.
    PerFeature,
    /// An l1 level in column 0 and an l2 level in column 1.
    L1L2,
}

/// Penalty levels at a given `log_alpha`, with their derivatives.
#[derive(Debug, Clone)]
pub struct Penalty {
    l1: Array1<f64>,
    l2: f64,
    layout: HyperLayout,
}

impl Penalty {
    pub fn shared(alpha: f64, n_features: usize) -> Self {
        Self {
            l1: Array1::from_elem(n_features, alpha),
            l2: 0.0,
            layout: HyperLayout::Shared,
        }
    }

    pub fn per_feature(alphas: Array1<f64>) -> Self {
        Self {
            l1: alphas,
            l2: 0.0,
            layout: HyperLayout::PerFeature,
        }
    }

    pub fn l1_l2(alpha_1: f64, alpha_2: f64, n_features: usize) -> Self {
        Self {
            l1: Array1::from_elem(n_features, alpha_1),
            l2: alpha_2,
            layout: HyperLayout::L1L2,
        }
    }

    pub fn layout(&self) -> HyperLayout {
        self.layout
    }

    pub fn n_features(&self) -> usize {
        self.l1.len()
    }

    pub fn n_hyperparams(&self) -> usize {
        match self.layout {
            HyperLayout::Shared => 1,
            HyperLayout::PerFeature => self.l1.len(),
            HyperLayout::L1L2 => 2,
        }
    }

    /// The l1 level of feature `j`.
    pub fn l1(&self, j: usize) -> f64 {
        self.l1[j]
    }

    pub fn l2(&self) -> f64 {
        self.l2
    }

    /// The only non-zero partial of `l1_j` with respect to `log_alpha`, as
    /// `(column, value)`. Levels are exponentials of the hyperparameters, so
    /// the value is the level itself.
    pub fn dl1_dlog_alpha(&self, j: usize) -> (usize, f64) {
        match self.layout {
            HyperLayout::Shared | HyperLayout::L1L2 => (0, self.l1[j]),
            HyperLayout::PerFeature => (j, self.l1[j]),
        }
    }

    /// The non-zero partial of `l2` with respect to `log_alpha`, if any.
    pub fn dl2_dlog_alpha(&self) -> Option<(usize, f64)> {
        match self.layout {
            HyperLayout::L1L2 => Some((1, self.l2)),
            HyperLayout::Shared | HyperLayout::PerFeature => None,
        }
    }

    /// Soft-threshold level of coordinate `j` for a coordinate step of size
    /// `1 / lipschitz`.
    pub fn threshold(&self, j: usize, lipschitz: f64) -> f64 {
        self.l1[j] / lipschitz
    }

    /// Derivative of [`Penalty::threshold`] with respect to `log_alpha`.
    pub fn dthreshold_dlog_alpha(&self, j: usize, lipschitz: f64) -> (usize, f64) {
        let (k, value) = self.dl1_dlog_alpha(j);
        (k, value / lipschitz)
    }

    /// Ridge shrinkage applied after soft-thresholding coordinate `j`.
    pub fn shrinkage(&self, lipschitz: f64) -> f64 {
        1.0 + self.l2 / lipschitz
    }

    /// Penalty term of the objective.
    pub fn value(&self, beta: ArrayView1<f64>) -> f64 {
        let l1_term: f64 = beta
            .iter()
            .zip(self.l1.iter())
            .map(|(&b, &level)| level * b.abs())
            .sum();
        l1_term + 0.5 * self.l2 * beta.dot(&beta)
    }

    /// Hyperparameter columns that can be non-zero in a Jacobian restricted
    /// to `support`.
    pub fn hyper_columns(&self, support: &Support) -> HyperColumns {
        match self.layout {
            HyperLayout::Shared | HyperLayout::L1L2 => HyperColumns::all(self.n_hyperparams()),
            HyperLayout::PerFeature => {
                HyperColumns::subset(support.indices().to_vec(), self.n_hyperparams())
            }
        }
    }
}

/// A differentiable penalized least-squares family.
pub trait Model {
    fn name(&self) -> &'static str;

    /// Length of `log_alpha` for a design with `n_features` columns.
    fn n_hyperparams(&self, n_features: usize) -> usize;

    /// Validates `log_alpha` and converts it to penalty levels.
    fn penalty(&self, log_alpha: ArrayView1<f64>, n_features: usize)
    -> Result<Penalty, ModelError>;

    /// Sweep cap of the built-in coordinate descent.
    fn max_iter(&self) -> usize;

    /// An injected estimator, used for primal solves instead of the built-in
    /// coordinate descent.
    fn estimator(&self) -> Option<&dyn Estimator>;

    /// Full-batch solve with exact coordinate-wise Jacobian accumulation.
    fn get_beta_jac(
        &self,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        tol: f64,
    ) -> Result<BetaJac, AlgoError>
    where
        Self: Sized,
    {
        forward::get_beta_jac_iterdiff(x, y, log_alpha, self, tol)
    }
}

fn check_log_alpha(
    model: &'static str,
    log_alpha: ArrayView1<f64>,
    expected: usize,
) -> Result<(), ModelError> {
    if log_alpha.len() != expected {
        return Err(ModelError::HyperparameterShape {
            model,
            expected,
            found: log_alpha.len(),
        });
    }
    if let Some((index, &value)) = log_alpha.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ModelError::NonFiniteHyperparameter { index, value });
    }
    Ok(())
}

const DEFAULT_MAX_ITER: usize = 1000;

/// `1/(2n) ||y - X beta||^2 + alpha ||beta||_1`.
#[derive(Debug)]
pub struct Lasso {
    max_iter: usize,
    estimator: Option<Box<dyn Estimator>>,
}

impl Lasso {
    pub fn new() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            estimator: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_estimator(mut self, estimator: impl Estimator + 'static) -> Self {
        self.estimator = Some(Box::new(estimator));
        self
    }
}

impl Default for Lasso {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for Lasso {
    fn name(&self) -> &'static str {
        "Lasso"
    }

    fn n_hyperparams(&self, _: usize) -> usize {
        1
    }

    fn penalty(
        &self,
        log_alpha: ArrayView1<f64>,
        n_features: usize,
    ) -> Result<Penalty, ModelError> {
        check_log_alpha(self.name(), log_alpha, 1)?;
        Ok(Penalty::shared(log_alpha[0].exp(), n_features))
    }

    fn max_iter(&self) -> usize {
        self.max_iter
    }

    fn estimator(&self) -> Option<&dyn Estimator> {
        self.estimator.as_deref()
    }
}

/// `1/(2n) ||y - X beta||^2 + sum_j alpha_j |beta_j|`, one hyperparameter
/// per feature.
#[derive(Debug)]
pub struct WeightedLasso {
    max_iter: usize,
    estimator: Option<Box<dyn Estimator>>,
}

impl WeightedLasso {
    pub fn new() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            estimator: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_estimator(mut self, estimator: impl Estimator + 'static) -> Self {
        self.estimator = Some(Box::new(estimator));
        self
    }
}

impl Default for WeightedLasso {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for WeightedLasso {
    fn name(&self) -> &'static str {
        "WeightedLasso"
    }

    fn n_hyperparams(&self, n_features: usize) -> usize {
        n_features
    }

    fn penalty(
        &self,
        log_alpha: ArrayView1<f64>,
        n_features: usize,
    ) -> Result<Penalty, ModelError> {
        check_log_alpha(self.name(), log_alpha, n_features)?;
        Ok(Penalty::per_feature(log_alpha.mapv(f64::exp)))
    }

    fn max_iter(&self) -> usize {
        self.max_iter
    }

    fn estimator(&self) -> Option<&dyn Estimator> {
        self.estimator.as_deref()
    }
}

/// `1/(2n) ||y - X beta||^2 + alpha_1 ||beta||_1 + alpha_2/2 ||beta||^2`,
/// with `log_alpha = [log alpha_1, log alpha_2]`.
#[derive(Debug)]
pub struct ElasticNet {
    max_iter: usize,
    estimator: Option<Box<dyn Estimator>>,
}

impl ElasticNet {
    pub fn new() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            estimator: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_estimator(mut self, estimator: impl Estimator + 'static) -> Self {
        self.estimator = Some(Box::new(estimator));
        self
    }
}

impl Default for ElasticNet {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for ElasticNet {
    fn name(&self) -> &'static str {
        "ElasticNet"
    }

    fn n_hyperparams(&self, _: usize) -> usize {
        2
    }

    fn penalty(
        &self,
        log_alpha: ArrayView1<f64>,
        n_features: usize,
    ) -> Result<Penalty, ModelError> {
        check_log_alpha(self.name(), log_alpha, 2)?;
        Ok(Penalty::l1_l2(
            log_alpha[0].exp(),
            log_alpha[1].exp(),
            n_features,
        ))
    }

    fn max_iter(&self) -> usize {
        self.max_iter
    }

    fn estimator(&self) -> Option<&dyn Estimator> {
        self.estimator.as_deref()
    }
}
