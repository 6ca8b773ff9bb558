// hypergrad/algo/forward.rs

//! Forward iterative differentiation: coordinate descent from zero with the
//! full Jacobian carried along in lock-step. Slow but exact for the iterate
//! it returns, which makes it the reference for the other strategies.

use super::{
    AlgoError, BetaJac, CoordinateDescent, SweepObserver, check_target, restrict_jacobian,
};
use crate::design::Design;
use crate::models::{Model, Penalty};
use crate::support::{HyperColumns, Support};
use ndarray::{Array1, Array2, ArrayView1};

/// Propagates `dbeta` (all features, all hyperparameters) and `dr = -X dbeta`
/// through each coordinate step.
struct JacobianTracker<'a, 'b> {
    cd: &'b CoordinateDescent<'a>,
    cols: HyperColumns,
    dbeta: Array2<f64>,
    dr: Array2<f64>,
}

impl SweepObserver for JacobianTracker<'_, '_> {
    fn after_coordinate(&mut self, j: usize, beta_j: f64) {
        self.cd
            .jac_row(j, beta_j, self.dbeta.row_mut(j), self.dr.view_mut(), &self.cols);
    }

    fn after_sweep(&mut self, _: ArrayView1<f64>) {}
}

/// Solves the model at `log_alpha` and returns its support, the coefficients
/// on it and the Jacobian restricted to `(support, hyper_columns)`.
///
/// The built-in coordinate descent is always used: an injected estimator
/// does not expose its iterates.
pub fn get_beta_jac_iterdiff(
    x: &Design,
    y: ArrayView1<f64>,
    log_alpha: ArrayView1<f64>,
    model: &dyn Model,
    tol: f64,
) -> Result<BetaJac, AlgoError> {
    check_target(x, y)?;
    let penalty: Penalty = model.penalty(log_alpha, x.n_features())?;
    let n_hyper = penalty.n_hyperparams();
    let cd = CoordinateDescent::new(x, &penalty);

    let mut tracker = JacobianTracker {
        cd: &cd,
        cols: HyperColumns::all(n_hyper),
        dbeta: Array2::zeros((x.n_features(), n_hyper)),
        dr: Array2::zeros((x.n_samples(), n_hyper)),
    };
    let fit = cd.solve(
        y,
        Array1::zeros(x.n_features()),
        model.max_iter(),
        tol,
        &mut tracker,
    );

    let support = Support::from_coefficients(fit.beta.view());
    let hyper_columns = penalty.hyper_columns(&support);
    let jac = restrict_jacobian(&tracker.dbeta, &support, &hyper_columns);
    log::info!(
        "{} forward differentiation: {} sweeps, support size {}",
        model.name(),
        fit.n_iter,
        support.len()
    );

    Ok(BetaJac {
        dense: support.restrict(fit.beta.view()),
        support,
        jac,
        hyper_columns,
        status: fit.status,
        n_iter: fit.n_iter,
    })
}
