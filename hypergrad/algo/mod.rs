// hypergrad/algo/mod.rs

//! # Differentiation Strategies
//!
//! All four strategies share the coordinate-descent engine defined here.
//! For feature `j` with `L_j = ||X_j||^2 / n` one coordinate step is
//!
//! ```text
//! z_j    = beta_j + X_j^T r / (n L_j)
//! beta_j = ST(z_j, l1_j / L_j) / (1 + l2 / L_j)
//! ```
//!
//! and the matching Jacobian row update (with `dr = -X dbeta`) is
//!
//! ```text
//! dz_j    = dbeta_j + X_j^T dr / (n L_j)
//! dbeta_j = |sign beta_j| (dz_j - sign beta_j d(l1_j) / L_j) / (1 + l2 / L_j)
//!           - beta_j (d(l2) / L_j) / (1 + l2 / L_j)
//! ```
//!
//! The residual sensitivity `X_j / (n L_j)` is the same for every family,
//! so it lives here rather than on the models.

pub mod backward;
pub mod forward;
pub mod implicit;
pub mod implicit_forward;

use crate::config::SolverConfig;
use crate::design::{Design, DesignError};
use crate::estimator::{EstimatorError, soft_threshold};
use crate::models::{Model, ModelError, Penalty};
use crate::support::{HyperColumns, Support};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, ArrayViewMut2, Axis};
use thiserror::Error;

/// Errors raised by the differentiation algorithms.
#[derive(Error, Debug)]
pub enum AlgoError {
    #[error("Invalid hyperparameters: {0}")]
    Model(#[from] ModelError),

    #[error("The injected estimator failed: {0}")]
    Estimator(#[from] EstimatorError),

    #[error("Design matrix operation failed: {0}")]
    Design(#[from] DesignError),

    #[error("Target has {found} entries, but the design has {expected} samples.")]
    TargetShape { expected: usize, found: usize },

    #[error("Direction vector has {found} entries, but the support has {expected} features.")]
    DirectionShape { expected: usize, found: usize },
}

/// How an iterative solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Converged,
    MaxIterationsReached,
}

/// Solution and restricted Jacobian at one `log_alpha`.
#[derive(Debug, Clone)]
pub struct BetaJac {
    pub support: Support,
    /// Coefficients on the support.
    pub dense: Array1<f64>,
    /// `d dense / d log_alpha[hyper_columns]`, shape `(|support|, |hyper_columns|)`.
    pub jac: Array2<f64>,
    pub hyper_columns: HyperColumns,
    pub status: SolverStatus,
    pub n_iter: usize,
}

impl BetaJac {
    /// Contracts the Jacobian with the direction returned by `get_v`.
    pub fn into_beta_jac_v(self, get_v: &DirectionFn) -> Result<BetaJacV, AlgoError> {
        let v = get_v(&self.support, self.dense.view());
        check_direction(&self.support, &v)?;
        let local = self.jac.t().dot(&v);
        Ok(BetaJacV {
            jac_v: self.hyper_columns.scatter(local.view()),
            support: self.support,
            dense: self.dense,
        })
    }
}

/// Solution at one `log_alpha` with the Jacobian already contracted.
#[derive(Debug, Clone)]
pub struct BetaJacV {
    pub support: Support,
    pub dense: Array1<f64>,
    /// `jac^T v`, shaped like `log_alpha`.
    pub jac_v: Array1<f64>,
}

/// Maps `(support, dense)` to the vector `v` contracted with the Jacobian.
/// The returned vector must have one entry per support feature.
pub type DirectionFn<'a> = dyn Fn(&Support, ArrayView1<f64>) -> Array1<f64> + 'a;

/// A strategy for computing `jac^T v` at a given `log_alpha`.
pub trait DiffAlgorithm {
    fn name(&self) -> &'static str;

    fn get_beta_jac_v(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        get_v: &DirectionFn,
        tol: f64,
    ) -> Result<BetaJacV, AlgoError>;
}

/// Forward iterative differentiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forward;

impl DiffAlgorithm for Forward {
    fn name(&self) -> &'static str {
        "forward"
    }

    fn get_beta_jac_v(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        get_v: &DirectionFn,
        tol: f64,
    ) -> Result<BetaJacV, AlgoError> {
        forward::get_beta_jac_iterdiff(x, y, log_alpha, model, tol)?.into_beta_jac_v(get_v)
    }
}

/// Primal solve followed by a fixed-point Jacobian iteration on the support.
#[derive(Debug, Clone, Copy)]
pub struct ImplicitForward {
    pub tol_jac: f64,
    pub n_iter_jac: usize,
}

impl ImplicitForward {
    pub fn new(tol_jac: f64, n_iter_jac: usize) -> Self {
        Self {
            tol_jac,
            n_iter_jac,
        }
    }

    pub fn from_config(config: &SolverConfig) -> Self {
        Self::new(config.implicit_forward.tol_jac, config.implicit_forward.n_iter_jac)
    }
}

impl Default for ImplicitForward {
    fn default() -> Self {
        Self::new(1e-3, 100)
    }
}

impl DiffAlgorithm for ImplicitForward {
    fn name(&self) -> &'static str {
        "implicit_forward"
    }

    fn get_beta_jac_v(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        get_v: &DirectionFn,
        tol: f64,
    ) -> Result<BetaJacV, AlgoError> {
        implicit_forward::get_beta_jac_fast_iterdiff(
            x,
            y,
            log_alpha,
            model,
            tol,
            self.tol_jac,
            self.n_iter_jac,
        )?
        .into_beta_jac_v(get_v)
    }
}

/// Implicit differentiation with a conjugate-gradient solve.
#[derive(Debug, Clone, Copy)]
pub struct Implicit {
    pub tol_cg: f64,
    pub max_iter_cg: usize,
}

impl Implicit {
    pub fn new(tol_cg: f64, max_iter_cg: usize) -> Self {
        Self {
            tol_cg,
            max_iter_cg,
        }
    }

    pub fn from_config(config: &SolverConfig) -> Self {
        Self::new(config.implicit.tol_cg, config.implicit.max_iter_cg)
    }
}

impl Default for Implicit {
    fn default() -> Self {
        Self::new(1e-6, 100)
    }
}

impl DiffAlgorithm for Implicit {
    fn name(&self) -> &'static str {
        "implicit"
    }

    fn get_beta_jac_v(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        get_v: &DirectionFn,
        tol: f64,
    ) -> Result<BetaJacV, AlgoError> {
        implicit::get_beta_jac_t_v_implicit(
            x,
            y,
            log_alpha,
            get_v,
            model,
            tol,
            self.tol_cg,
            self.max_iter_cg,
        )
    }
}

/// Reverse-mode differentiation through the unrolled coordinate descent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backward;

impl DiffAlgorithm for Backward {
    fn name(&self) -> &'static str {
        "backward"
    }

    fn get_beta_jac_v(
        &self,
        model: &dyn Model,
        x: &Design,
        y: ArrayView1<f64>,
        log_alpha: ArrayView1<f64>,
        get_v: &DirectionFn,
        tol: f64,
    ) -> Result<BetaJacV, AlgoError> {
        backward::get_beta_jac_t_v_backward(x, y, log_alpha, get_v, model, tol)
    }
}

/// Result of a primal solve.
#[derive(Debug, Clone)]
pub(crate) struct PrimalFit {
    pub beta: Array1<f64>,
    pub status: SolverStatus,
    pub n_iter: usize,
}

/// Receives every coordinate step and every completed sweep of the solver.
pub(crate) trait SweepObserver {
    fn after_coordinate(&mut self, j: usize, beta_j: f64);
    fn after_sweep(&mut self, beta: ArrayView1<f64>);
}

impl SweepObserver for () {
    fn after_coordinate(&mut self, _: usize, _: f64) {}
    fn after_sweep(&mut self, _: ArrayView1<f64>) {}
}

/// Cyclic coordinate descent on `P(beta)` for a fixed penalty.
pub(crate) struct CoordinateDescent<'a> {
    x: &'a Design,
    penalty: &'a Penalty,
    lipschitz: Array1<f64>,
    n_samples: f64,
}

impl<'a> CoordinateDescent<'a> {
    pub fn new(x: &'a Design, penalty: &'a Penalty) -> Self {
        let n_samples = x.n_samples() as f64;
        let lipschitz = x.column_sq_norms() / n_samples;
        Self {
            x,
            penalty,
            lipschitz,
            n_samples,
        }
    }

    pub fn lipschitz(&self, j: usize) -> f64 {
        self.lipschitz[j]
    }

    /// `1 / (n L_j)`, the factor in front of `X_j^T r` in `z_j`.
    pub fn residual_scale(&self, j: usize) -> f64 {
        1.0 / (self.n_samples * self.lipschitz[j])
    }

    /// One coordinate step on `beta` and `r`. Returns the new value, or `None`
    /// when column `j` is identically zero.
    pub fn update(&self, j: usize, beta: &mut Array1<f64>, r: &mut Array1<f64>) -> Option<f64> {
        let lipschitz = self.lipschitz[j];
        if lipschitz == 0.0 {
            return None;
        }
        let old = beta[j];
        let z = old + self.x.column_dot(j, r.view()) * self.residual_scale(j);
        let new = soft_threshold(z, self.penalty.threshold(j, lipschitz))
            / self.penalty.shrinkage(lipschitz);
        if new != old {
            self.x.column_axpy(j, old - new, r.view_mut());
            beta[j] = new;
        }
        Some(new)
    }

    pub fn objective(&self, beta: ArrayView1<f64>, r: ArrayView1<f64>) -> f64 {
        r.dot(&r) / (2.0 * self.n_samples) + self.penalty.value(beta)
    }

    /// Jacobian row update for coordinate `j` after its primal step to
    /// `beta_j`. `row` holds `d beta_j` over the kept hyperparameter columns
    /// and `dr` holds `-X dbeta` over the same columns.
    pub fn jac_row(
        &self,
        j: usize,
        beta_j: f64,
        mut row: ArrayViewMut1<f64>,
        mut dr: ArrayViewMut2<f64>,
        cols: &HyperColumns,
    ) {
        let lipschitz = self.lipschitz[j];
        if beta_j == 0.0 {
            if row.iter().all(|&d| d == 0.0) {
                return;
            }
            let old = row.to_owned();
            self.x.column_axpy_block(j, 1.0, old.view(), dr);
            row.fill(0.0);
            return;
        }

        let shrinkage = self.penalty.shrinkage(lipschitz);
        let mut new = Array1::<f64>::zeros(row.len());
        self.x.column_dot_block(j, dr.view(), new.view_mut());
        new *= self.residual_scale(j);
        new += &row;
        new /= shrinkage;

        let (k, dthreshold) = self.penalty.dthreshold_dlog_alpha(j, lipschitz);
        if let Some(pos) = cols.position(k) {
            new[pos] -= beta_j.signum() * dthreshold / shrinkage;
        }
        if let Some((k, dl2)) = self.penalty.dl2_dlog_alpha() {
            if let Some(pos) = cols.position(k) {
                new[pos] -= beta_j * (dl2 / lipschitz) / shrinkage;
            }
        }

        let delta = &new - &row;
        self.x.column_axpy_block(j, -1.0, delta.view(), dr.view_mut());
        row.assign(&new);
    }

    /// Runs sweeps from `beta` until the largest update is at most `tol`,
    /// the objective stops decreasing by more than `tol * |P|`, or
    /// `max_iter` sweeps have been made.
    pub fn solve<O: SweepObserver>(
        &self,
        y: ArrayView1<f64>,
        mut beta: Array1<f64>,
        max_iter: usize,
        tol: f64,
        observer: &mut O,
    ) -> PrimalFit {
        let mut r = self.x.residual(y, beta.view());
        let mut prev_objective = self.objective(beta.view(), r.view());
        let mut status = SolverStatus::MaxIterationsReached;
        let mut n_iter = 0;

        for iter in 1..=max_iter {
            n_iter = iter;
            let mut max_update = 0.0_f64;
            for j in 0..beta.len() {
                let old = beta[j];
                if let Some(new) = self.update(j, &mut beta, &mut r) {
                    max_update = max_update.max((new - old).abs());
                    observer.after_coordinate(j, new);
                }
            }
            observer.after_sweep(beta.view());

            let objective = self.objective(beta.view(), r.view());
            log::debug!(
                "Sweep {}: objective {:.12e}, max update {:.3e}",
                iter,
                objective,
                max_update
            );
            if max_update <= tol || prev_objective - objective <= tol * objective.abs() {
                status = SolverStatus::Converged;
                break;
            }
            prev_objective = objective;
        }

        if status == SolverStatus::MaxIterationsReached {
            log::warn!(
                "Coordinate descent did not converge within {} sweeps (tol {:.1e}); \
                 returning the last iterate.",
                max_iter,
                tol
            );
        }

        PrimalFit {
            beta,
            status,
            n_iter,
        }
    }
}

pub(crate) fn check_target(x: &Design, y: ArrayView1<f64>) -> Result<(), AlgoError> {
    if y.len() != x.n_samples() {
        return Err(AlgoError::TargetShape {
            expected: x.n_samples(),
            found: y.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_direction(support: &Support, v: &Array1<f64>) -> Result<(), AlgoError> {
    if v.len() != support.len() {
        return Err(AlgoError::DirectionShape {
            expected: support.len(),
            found: v.len(),
        });
    }
    Ok(())
}

/// Primal solve through the injected estimator if the model has one,
/// otherwise through the built-in coordinate descent.
pub(crate) fn solve_primal(
    model: &dyn Model,
    x: &Design,
    y: ArrayView1<f64>,
    penalty: &Penalty,
    tol: f64,
) -> Result<PrimalFit, AlgoError> {
    match model.estimator() {
        Some(estimator) => {
            let fit = estimator.fit(x, y, penalty, tol)?;
            let status = if fit.converged {
                SolverStatus::Converged
            } else {
                SolverStatus::MaxIterationsReached
            };
            Ok(PrimalFit {
                beta: fit.coef,
                status,
                n_iter: fit.n_iter,
            })
        }
        None => {
            let cd = CoordinateDescent::new(x, penalty);
            Ok(cd.solve(y, Array1::zeros(x.n_features()), model.max_iter(), tol, &mut ()))
        }
    }
}

/// Solution on its support without any derivative, for value-only criteria.
pub fn get_beta(
    model: &dyn Model,
    x: &Design,
    y: ArrayView1<f64>,
    log_alpha: ArrayView1<f64>,
    tol: f64,
) -> Result<(Support, Array1<f64>), AlgoError> {
    check_target(x, y)?;
    let penalty = model.penalty(log_alpha, x.n_features())?;
    let fit = solve_primal(model, x, y, &penalty, tol)?;
    let support = Support::from_coefficients(fit.beta.view());
    let dense = support.restrict(fit.beta.view());
    Ok((support, dense))
}

/// Gathers the rows in `support` and the kept columns of a full Jacobian.
pub(crate) fn restrict_jacobian(
    full: &Array2<f64>,
    support: &Support,
    cols: &HyperColumns,
) -> Array2<f64> {
    full.select(Axis(0), support.indices())
        .select(Axis(1), cols.columns())
}
