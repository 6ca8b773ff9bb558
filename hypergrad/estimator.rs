// hypergrad/estimator.rs

//! # External Estimators
//!
//! A model can delegate its primal solve to any object implementing
//! [`Estimator`]. The differentiation algorithms never look inside it: they
//! take the returned coefficients and read the support off their non-zero
//! positions.
//!
//! [`CoordinateDescentEstimator`] is the reference implementation. It works
//! on the objective scaled by `n_samples`, checks the duality gap only once
//! the coefficients have stopped moving, and can warm-start from its
//! previous solution.

use crate::design::{Design, DesignError};
use crate::models::Penalty;
use ndarray::{Array1, ArrayView1};
use std::cell::RefCell;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Estimator input is inconsistent with the design: {0}")]
    Design(#[from] DesignError),

    #[error("Estimator produced a non-finite coefficient for feature {feature}.")]
    NonFiniteCoefficient { feature: usize },
}

/// Output of an estimator fit.
#[derive(Debug, Clone)]
pub struct EstimatorFit {
    pub coef: Array1<f64>,
    pub n_iter: usize,
    pub dual_gap: f64,
    pub converged: bool,
}

/// Solves a penalized least-squares problem for fixed penalty levels.
pub trait Estimator: fmt::Debug {
    fn fit(
        &self,
        x: &Design,
        y: ArrayView1<f64>,
        penalty: &Penalty,
        tol: f64,
    ) -> Result<EstimatorFit, EstimatorError>;
}

/// Cyclic coordinate descent stopped on the duality gap.
#[derive(Debug)]
pub struct CoordinateDescentEstimator {
    max_iter: usize,
    tol: Option<f64>,
    warm_start: bool,
    coef: RefCell<Option<Array1<f64>>>,
}

impl CoordinateDescentEstimator {
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            tol: None,
            warm_start: false,
            coef: RefCell::new(None),
        }
    }

    /// Uses this tolerance instead of the one passed to `fit`.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = Some(tol);
        self
    }

    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }

    /// Coefficients of the last fit, kept only when warm starting.
    pub fn last_coef(&self) -> Option<Array1<f64>> {
        self.coef.borrow().clone()
    }

    fn initial_coef(&self, n_features: usize) -> Array1<f64> {
        if self.warm_start {
            if let Some(coef) = self.coef.borrow().as_ref() {
                if coef.len() == n_features {
                    return coef.clone();
                }
            }
        }
        Array1::zeros(n_features)
    }
}

impl Estimator for CoordinateDescentEstimator {
    fn fit(
        &self,
        x: &Design,
        y: ArrayView1<f64>,
        penalty: &Penalty,
        tol: f64,
    ) -> Result<EstimatorFit, EstimatorError> {
        x.check_samples("estimator target", y.len())?;
        if penalty.n_features() != x.n_features() {
            return Err(DesignError::DimensionMismatch {
                context: "estimator penalty",
                expected: x.n_features(),
                found: penalty.n_features(),
            }
            .into());
        }

        let tol = self.tol.unwrap_or(tol);
        let n_samples = x.n_samples() as f64;
        let sq_norms = x.column_sq_norms();
        let gap_tol = tol * y.dot(&y);

        let mut w = self.initial_coef(x.n_features());
        let mut r = x.residual(y, w.view());
        let mut dual_gap = f64::INFINITY;
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 1..=self.max_iter {
            n_iter = iter;
            let mut w_max = 0.0_f64;
            let mut d_w_max = 0.0_f64;
            for j in 0..w.len() {
                if sq_norms[j] == 0.0 {
                    continue;
                }
                let w_j = w[j];
                let rho = x.column_dot(j, r.view()) + sq_norms[j] * w_j;
                let w_new = soft_threshold(rho, n_samples * penalty.l1(j))
                    / (sq_norms[j] + n_samples * penalty.l2());
                if w_new != w_j {
                    x.column_axpy(j, w_j - w_new, r.view_mut());
                }
                w[j] = w_new;
                d_w_max = d_w_max.max((w_new - w_j).abs());
                w_max = w_max.max(w_new.abs());
            }

            if w_max == 0.0 || d_w_max / w_max < tol || iter == self.max_iter {
                dual_gap = duality_gap(x, y, w.view(), r.view(), penalty);
                if dual_gap <= gap_tol {
                    converged = true;
                    break;
                }
            }
        }

        if let Some(feature) = w.iter().position(|v| !v.is_finite()) {
            return Err(EstimatorError::NonFiniteCoefficient { feature });
        }
        if !converged {
            log::debug!(
                "Coordinate descent estimator stopped after {} sweeps \
                 with duality gap {:.3e} (target {:.3e}).",
                n_iter,
                dual_gap,
                gap_tol
            );
        }
        if self.warm_start {
            *self.coef.borrow_mut() = Some(w.clone());
        }

        Ok(EstimatorFit {
            coef: w,
            n_iter,
            dual_gap,
            converged,
        })
    }
}

pub(crate) fn soft_threshold(z: f64, threshold: f64) -> f64 {
    if z > threshold {
        z - threshold
    } else if z < -threshold {
        z + threshold
    } else {
        0.0
    }
}

/// Duality gap of the `n_samples`-scaled problem
/// `1/2 ||r||^2 + n sum_j l1_j |w_j| + n l2/2 ||w||^2`.
fn duality_gap(
    x: &Design,
    y: ArrayView1<f64>,
    w: ArrayView1<f64>,
    r: ArrayView1<f64>,
    penalty: &Penalty,
) -> f64 {
    let n_samples = x.n_samples() as f64;
    let l2_reg = n_samples * penalty.l2();
    let xt_a = &x.t_matvec(r) - &(&w * l2_reg);

    // Dual feasibility is measured feature by feature against each l1 level.
    let dual_norm = xt_a
        .iter()
        .enumerate()
        .filter(|&(j, _)| penalty.l1(j) > 0.0)
        .fold(0.0_f64, |acc, (j, &v)| {
            acc.max(v.abs() / (n_samples * penalty.l1(j)))
        });

    let r_norm2 = r.dot(&r);
    let w_norm2 = w.dot(&w);
    let (scale, mut gap) = if dual_norm > 1.0 {
        let scale = 1.0 / dual_norm;
        (scale, 0.5 * r_norm2 * (1.0 + scale * scale))
    } else {
        (1.0, r_norm2)
    };

    let l1_term: f64 = w
        .iter()
        .enumerate()
        .map(|(j, &v)| n_samples * penalty.l1(j) * v.abs())
        .sum();
    gap += l1_term - scale * r.dot(&y) + 0.5 * l2_reg * (1.0 + scale * scale) * w_norm2;
    gap
}
