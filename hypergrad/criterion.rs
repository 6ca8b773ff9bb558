// hypergrad/criterion.rs

//! # Validation Criteria
//!
//! A criterion scores a fitted model and, given a [`DiffAlgorithm`], returns
//! the gradient of that score with respect to `log_alpha`. The gradient is
//! always obtained as `jac^T v` where `v` is the derivative of the score with
//! respect to the coefficients on the support.

use crate::algo::{AlgoError, DiffAlgorithm, get_beta};
use crate::design::{Design, DesignError};
use crate::models::Model;
use crate::support::Support;
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CriterionError {
    #[error("Differentiation failed: {0}")]
    Algo(#[from] AlgoError),

    #[error("Data split is invalid: {0}")]
    Design(#[from] DesignError),

    #[error("The {split} split is empty.")]
    EmptySplit { split: &'static str },

    #[error("Noise level must be positive and finite, got {sigma}.")]
    InvalidNoiseLevel { sigma: f64 },
}

pub trait Criterion {
    fn name(&self) -> &'static str;

    /// Value of the criterion at `log_alpha`, without any derivative.
    fn get_val(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        tol: f64,
    ) -> Result<f64, CriterionError>;

    /// Value and gradient with respect to `log_alpha`.
    fn get_val_grad(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        algo: &dyn DiffAlgorithm,
        tol: f64,
    ) -> Result<(f64, Array1<f64>), CriterionError>;
}

/// Mean squared error on held-out rows of a model fitted on training rows.
#[derive(Debug, Clone)]
pub struct HeldOutMse {
    idx_train: Vec<usize>,
    idx_val: Vec<usize>,
}

struct Split {
    x_train: Design,
    y_train: Array1<f64>,
    x_val: Design,
    y_val: Array1<f64>,
}

impl HeldOutMse {
    pub fn new(idx_train: Vec<usize>, idx_val: Vec<usize>) -> Self {
        Self { idx_train, idx_val }
    }

    fn split(&self, x: &Design, y: ArrayView1<f64>) -> Result<Split, CriterionError> {
        if self.idx_train.is_empty() {
            return Err(CriterionError::EmptySplit { split: "training" });
        }
        if self.idx_val.is_empty() {
            return Err(CriterionError::EmptySplit {
                split: "validation",
            });
        }
        x.check_samples("held-out target", y.len())?;
        let x_train = x.select_rows(&self.idx_train)?;
        let x_val = x.select_rows(&self.idx_val)?;
        Ok(Split {
            x_train,
            y_train: self.idx_train.iter().map(|&i| y[i]).collect(),
            x_val,
            y_val: self.idx_val.iter().map(|&i| y[i]).collect(),
        })
    }
}

impl Split {
    fn value(&self, support: &Support, dense: ArrayView1<f64>) -> f64 {
        let pred = self.x_val.matvec_support(support.indices(), dense);
        let resid = &self.y_val - &pred;
        resid.dot(&resid) / self.y_val.len() as f64
    }

    fn direction(&self, support: &Support, dense: ArrayView1<f64>) -> Array1<f64> {
        let pred = self.x_val.matvec_support(support.indices(), dense);
        let resid = &pred - &self.y_val;
        self.x_val.t_matvec_support(support.indices(), resid.view())
            * (2.0 / self.y_val.len() as f64)
    }
}

impl Criterion for HeldOutMse {
    fn name(&self) -> &'static str {
        "held-out MSE"
    }

    fn get_val(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        tol: f64,
    ) -> Result<f64, CriterionError> {
        let split = self.split(x, y)?;
        let (support, dense) =
            get_beta(model, &split.x_train, split.y_train.view(), log_alpha, tol)?;
        Ok(split.value(&support, dense.view()))
    }

    fn get_val_grad(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        algo: &dyn DiffAlgorithm,
        tol: f64,
    ) -> Result<(f64, Array1<f64>), CriterionError> {
        let split = self.split(x, y)?;
        let get_v = |support: &Support, dense: ArrayView1<f64>| split.direction(support, dense);
        let out = algo.get_beta_jac_v(
            model,
            &split.x_train,
            split.y_train.view(),
            log_alpha,
            &get_v,
            tol,
        )?;
        let value = split.value(&out.support, out.dense.view());
        Ok((value, out.jac_v))
    }
}

/// Stein's unbiased risk estimate with a finite-difference Monte-Carlo
/// estimate of the degrees of freedom.
///
/// The perturbation `delta ~ N(0, I)` is drawn from a fresh generator seeded with
/// `random_state` on every call, so repeated evaluations are reproducible
/// and the criterion is a smooth function of `log_alpha`.
#[derive(Debug, Clone)]
pub struct FiniteDiffMonteCarloSure {
    sigma: f64,
    finite_difference_step: Option<f64>,
    random_state: u64,
}

impl FiniteDiffMonteCarloSure {
    pub fn new(sigma: f64) -> Self {
        Self {
            sigma,
            finite_difference_step: None,
            random_state: 42,
        }
    }

    pub fn with_finite_difference_step(mut self, step: f64) -> Self {
        self.finite_difference_step = Some(step);
        self
    }

    pub fn with_random_state(mut self, random_state: u64) -> Self {
        self.random_state = random_state;
        self
    }

    /// Probe direction and step for a target of length `n_samples`.
    fn perturbation(&self, n_samples: usize) -> Result<(Array1<f64>, f64), CriterionError> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(CriterionError::InvalidNoiseLevel { sigma: self.sigma });
        }
        let epsilon = self
            .finite_difference_step
            .unwrap_or_else(|| 2.0 * self.sigma / (n_samples as f64).powf(0.3));
        let mut rng = StdRng::seed_from_u64(self.random_state);
        let delta: Array1<f64> =
            Array1::from_iter((0..n_samples).map(|_| rng.sample(StandardNormal)));
        Ok((delta, epsilon))
    }

    fn value(
        &self,
        x: &Design,
        y: ArrayView1<f64>,
        delta: &Array1<f64>,
        epsilon: f64,
        fit_1: (&Support, ArrayView1<f64>),
        fit_2: (&Support, ArrayView1<f64>),
    ) -> f64 {
        let n_samples = y.len() as f64;
        let sigma2 = self.sigma * self.sigma;
        let x_beta_1 = x.matvec_support(fit_1.0.indices(), fit_1.1);
        let x_beta_2 = x.matvec_support(fit_2.0.indices(), fit_2.1);
        let resid = &y - &x_beta_1;
        let dof = delta.dot(&(&x_beta_2 - &x_beta_1)) / epsilon;
        resid.dot(&resid) - n_samples * sigma2 + 2.0 * sigma2 * dof
    }
}

impl Criterion for FiniteDiffMonteCarloSure {
    fn name(&self) -> &'static str {
        "finite-difference Monte-Carlo SURE"
    }

    fn get_val(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        tol: f64,
    ) -> Result<f64, CriterionError> {
        x.check_samples("SURE target", y.len())?;
        let (delta, epsilon) = self.perturbation(y.len())?;
        let y_2 = &y + &(&delta * epsilon);
        let (support_1, dense_1) = get_beta(model, x, y, log_alpha, tol)?;
        let (support_2, dense_2) = get_beta(model, x, y_2.view(), log_alpha, tol)?;
        Ok(self.value(
            x,
            y,
            &delta,
            epsilon,
            (&support_1, dense_1.view()),
            (&support_2, dense_2.view()),
        ))
    }

    fn get_val_grad(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        algo: &dyn DiffAlgorithm,
        tol: f64,
    ) -> Result<(f64, Array1<f64>), CriterionError> {
        x.check_samples("SURE target", y.len())?;
        let (delta, epsilon) = self.perturbation(y.len())?;
        let sigma2 = self.sigma * self.sigma;
        let y_2 = &y + &(&delta * epsilon);

        let get_v_1 = |support: &Support, dense: ArrayView1<f64>| -> Array1<f64> {
            let indices = support.indices();
            let resid = &x.matvec_support(indices, dense) - &y;
            let mut v = x.t_matvec_support(indices, resid.view()) * 2.0;
            v.scaled_add(
                -2.0 * sigma2 / epsilon,
                &x.t_matvec_support(indices, delta.view()),
            );
            v
        };
        let get_v_2 = |support: &Support, _: ArrayView1<f64>| -> Array1<f64> {
            x.t_matvec_support(support.indices(), delta.view()) * (2.0 * sigma2 / epsilon)
        };

        let out_1 = algo.get_beta_jac_v(model, x, y, log_alpha, &get_v_1, tol)?;
        let out_2 = algo.get_beta_jac_v(model, x, y_2.view(), log_alpha, &get_v_2, tol)?;
        let value = self.value(
            x,
            y,
            &delta,
            epsilon,
            (&out_1.support, out_1.dense.view()),
            (&out_2.support, out_2.dense.view()),
        );
        Ok((value, &out_1.jac_v + &out_2.jac_v))
    }
}
