// hypergrad/algo/implicit.rs

//! # Implicit Differentiation
//!
//! On the support `S` the optimality conditions read
//!
//! ```text
//! X_S^T (X_S beta_S - y) / n + l1_S * sign(beta_S) + l2 beta_S = 0
//! ```
//!
//! Differentiating with respect to `log_alpha` gives `H dbeta_S = -B` with
//! `H = X_S^T X_S / n + l2 I` and `B[:, k] = d(l1_S)/dk * sign_S + d(l2)/dk
//! beta_S`. The product `jac^T v = -B^T H^{-1} v` only needs one linear solve,
//! done here with conjugate gradients so `H` is never formed.

use super::{AlgoError, BetaJacV, DirectionFn, check_direction, check_target, solve_primal};
use crate::design::Design;
use crate::models::Model;
use crate::support::Support;
use ndarray::{Array1, ArrayView1};

/// How a conjugate-gradient solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgStatus {
    Converged,
    MaxIterationsReached,
}

#[derive(Debug, Clone)]
pub struct CgResult {
    pub solution: Array1<f64>,
    pub iterations: usize,
    pub residual_norm: f64,
    pub status: CgStatus,
}

/// Solves `A u = b` for a symmetric positive (semi-)definite operator
/// `apply`, starting from zero. Stops once `||A u - b|| <= tol ||b||`.
pub fn conjugate_gradient<F>(apply: F, b: ArrayView1<f64>, tol: f64, max_iter: usize) -> CgResult
where
    F: Fn(ArrayView1<f64>) -> Array1<f64>,
{
    let mut u = Array1::<f64>::zeros(b.len());
    let mut r = b.to_owned();
    let b_norm = b.dot(&b).sqrt();
    let target = tol * b_norm;
    let mut rs = r.dot(&r);

    if rs.sqrt() <= target {
        return CgResult {
            solution: u,
            iterations: 0,
            residual_norm: rs.sqrt(),
            status: CgStatus::Converged,
        };
    }

    let mut p = r.clone();
    for iter in 1..=max_iter {
        let ap = apply(p.view());
        let curvature = p.dot(&ap);
        if curvature <= 0.0 {
            // Direction in the null space; nothing more can be gained.
            log::warn!(
                "Conjugate gradient met non-positive curvature {:.3e} at iteration {}.",
                curvature,
                iter
            );
            return CgResult {
                solution: u,
                iterations: iter,
                residual_norm: rs.sqrt(),
                status: CgStatus::MaxIterationsReached,
            };
        }
        let step = rs / curvature;
        u.scaled_add(step, &p);
        r.scaled_add(-step, &ap);
        let rs_next = r.dot(&r);
        if rs_next.sqrt() <= target {
            return CgResult {
                solution: u,
                iterations: iter,
                residual_norm: rs_next.sqrt(),
                status: CgStatus::Converged,
            };
        }
        p *= rs_next / rs;
        p += &r;
        rs = rs_next;
    }

    CgResult {
        solution: u,
        iterations: max_iter,
        residual_norm: rs.sqrt(),
        status: CgStatus::MaxIterationsReached,
    }
}

/// `jac^T v` at `log_alpha` by implicit differentiation, without ever
/// forming the Jacobian.
#[allow(clippy::too_many_arguments)]
pub fn get_beta_jac_t_v_implicit(
    x: &Design,
    y: ArrayView1<f64>,
    log_alpha: ArrayView1<f64>,
    get_v: &DirectionFn,
    model: &dyn Model,
    tol: f64,
    tol_cg: f64,
    max_iter_cg: usize,
) -> Result<BetaJacV, AlgoError> {
    check_target(x, y)?;
    let penalty = model.penalty(log_alpha, x.n_features())?;
    let fit = solve_primal(model, x, y, &penalty, tol)?;

    let support = Support::from_coefficients(fit.beta.view());
    let dense = support.restrict(fit.beta.view());
    let mut jac_v = Array1::<f64>::zeros(penalty.n_hyperparams());
    if support.is_empty() {
        return Ok(BetaJacV {
            support,
            dense,
            jac_v,
        });
    }

    let v = get_v(&support, dense.view());
    check_direction(&support, &v)?;

    let n_samples = x.n_samples() as f64;
    let l2 = penalty.l2();
    let indices = support.indices();
    let hessian = |w: ArrayView1<f64>| -> Array1<f64> {
        let xw = x.matvec_support(indices, w);
        let mut out = x.t_matvec_support(indices, xw.view()) / n_samples;
        if l2 != 0.0 {
            out.scaled_add(l2, &w);
        }
        out
    };
    let cg = conjugate_gradient(hessian, v.view(), tol_cg, max_iter_cg);
    if cg.status != CgStatus::Converged {
        log::warn!(
            "Conjugate gradient stopped after {} iterations with residual {:.3e}; \
             using the approximate solution.",
            cg.iterations,
            cg.residual_norm
        );
    }

    // jac^T v = -B^T u
    for (p, &j) in indices.iter().enumerate() {
        let u_p = cg.solution[p];
        let (k, dl1) = penalty.dl1_dlog_alpha(j);
        jac_v[k] -= dl1 * dense[p].signum() * u_p;
        if let Some((k, dl2)) = penalty.dl2_dlog_alpha() {
            jac_v[k] -= dl2 * dense[p] * u_p;
        }
    }

    log::info!(
        "{} implicit differentiation: support size {}, {} CG iterations",
        model.name(),
        support.len(),
        cg.iterations
    );

    Ok(BetaJacV {
        support,
        dense,
        jac_v,
    })
}
