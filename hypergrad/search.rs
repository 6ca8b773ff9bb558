// hypergrad/search.rs

//! # Outer Hyperparameter Search
//!
//! Minimizes a [`Criterion`] over `log_alpha`, either exhaustively on a grid
//! (values only) or with BFGS driven by the hypergradients of a
//! [`DiffAlgorithm`]. Every evaluation is recorded in a [`Monitor`].

use crate::algo::DiffAlgorithm;
use crate::config::SolverConfig;
use crate::criterion::{Criterion, CriterionError};
use crate::design::Design;
use crate::models::Model;
use ndarray::{Array1, ArrayView1};
use std::cell::RefCell;
use std::time::Instant;
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Cost handed to BFGS when an evaluation fails or is not finite.
const FAILED_EVALUATION_COST: f64 = 1e10;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Criterion evaluation failed: {0}")]
    Criterion(#[from] CriterionError),

    #[error("The search grid is empty.")]
    EmptyGrid,

    #[error("alpha_max is zero: the target is orthogonal to every feature.")]
    DegenerateData,

    #[error("No evaluation produced a finite objective.")]
    NoFiniteEvaluation,
}

/// Trajectory of an outer search.
#[derive(Debug)]
pub struct Monitor {
    start: Instant,
    pub objs: Vec<f64>,
    pub log_alphas: Vec<Array1<f64>>,
    pub grads: Vec<Option<Array1<f64>>>,
    pub times: Vec<f64>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            objs: Vec::new(),
            log_alphas: Vec::new(),
            grads: Vec::new(),
            times: Vec::new(),
        }
    }

    pub fn record(&mut self, obj: f64, log_alpha: ArrayView1<f64>, grad: Option<Array1<f64>>) {
        self.objs.push(obj);
        self.log_alphas.push(log_alpha.to_owned());
        self.grads.push(grad);
        self.times.push(self.start.elapsed().as_secs_f64());
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    /// Index of the lowest finite objective recorded so far.
    pub fn best_index(&self) -> Option<usize> {
        self.best_index_since(0)
    }

    /// Index of the lowest finite objective among records `start..`.
    pub fn best_index_since(&self, start: usize) -> Option<usize> {
        (start..self.objs.len())
            .filter(|&i| self.objs[i].is_finite())
            .min_by(|&a, &b| self.objs[a].total_cmp(&self.objs[b]))
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub log_alpha: Array1<f64>,
    pub value: f64,
    pub n_evaluations: usize,
}

/// Smallest penalty level giving an all-zero Lasso solution:
/// `max_j |X_j^T y| / n`.
pub fn alpha_max(x: &Design, y: ArrayView1<f64>) -> f64 {
    let n_samples = x.n_samples() as f64;
    x.t_matvec(y)
        .iter()
        .fold(0.0_f64, |acc, &v| acc.max(v.abs()))
        / n_samples
}

/// `n_grid` points geometrically spaced from `alpha_max` down to
/// `alpha_max * exp(-span)`, repeated over `n_hyperparams` entries.
pub fn log_alpha_grid(
    log_alpha_max: f64,
    span: f64,
    n_grid: usize,
    n_hyperparams: usize,
) -> Vec<Array1<f64>> {
    let step = if n_grid > 1 {
        span / (n_grid - 1) as f64
    } else {
        0.0
    };
    (0..n_grid)
        .map(|i| Array1::from_elem(n_hyperparams, log_alpha_max - step * i as f64))
        .collect()
}

/// Evaluates the criterion at every grid point and keeps the best one.
pub fn grid_search(
    criterion: &dyn Criterion,
    model: &dyn Model,
    x: &Design,
    y: ArrayView1<f64>,
    log_alphas: &[Array1<f64>],
    tol: f64,
    monitor: &mut Monitor,
) -> Result<SearchResult, SearchError> {
    if log_alphas.is_empty() {
        return Err(SearchError::EmptyGrid);
    }
    let mut best: Option<(f64, &Array1<f64>)> = None;
    for log_alpha in log_alphas {
        let value = criterion.get_val(model, x, y, log_alpha.view(), tol)?;
        monitor.record(value, log_alpha.view(), None);
        log::debug!(
            "Grid point {:?}: {} = {:.6e}",
            log_alpha.to_vec(),
            criterion.name(),
            value
        );
        if value.is_finite() && best.is_none_or(|(b, _)| value < b) {
            best = Some((value, log_alpha));
        }
    }
    let (value, log_alpha) = best.ok_or(SearchError::NoFiniteEvaluation)?;
    log::info!(
        "Grid search over {} points: best {} = {:.6e} at {:?}",
        log_alphas.len(),
        criterion.name(),
        value,
        log_alpha.to_vec()
    );
    Ok(SearchResult {
        log_alpha: log_alpha.clone(),
        value,
        n_evaluations: log_alphas.len(),
    })
}

/// Minimizes the criterion over `log_alpha` with BFGS, starting from
/// `log_alpha0`. Iterates are clamped to
/// `[log alpha_max - log_alpha_span, log alpha_max]`.
///
/// If BFGS stops with an error (iteration cap, failed line search) the best
/// point recorded in `monitor` during this search is returned.
#[allow(clippy::too_many_arguments)]
pub fn bfgs_search(
    criterion: &dyn Criterion,
    algo: &dyn DiffAlgorithm,
    model: &dyn Model,
    x: &Design,
    y: ArrayView1<f64>,
    log_alpha0: ArrayView1<f64>,
    config: &SolverConfig,
    monitor: &mut Monitor,
) -> Result<SearchResult, SearchError> {
    let largest = alpha_max(x, y);
    if largest <= 0.0 {
        return Err(SearchError::DegenerateData);
    }
    let upper = largest.ln();
    let lower = upper - config.search.log_alpha_span;
    let tol = config.tol;
    let first_record = monitor.len();

    let monitor_cell = RefCell::new(monitor);
    let cost_and_grad = |log_alpha: &Array1<f64>| -> (f64, Array1<f64>) {
        let clamped = log_alpha.mapv(|v| v.clamp(lower, upper));
        if &clamped != log_alpha {
            log::warn!(
                "log_alpha {:?} left [{:.3}, {:.3}]; evaluating at the clamped point.",
                log_alpha.to_vec(),
                lower,
                upper
            );
        }
        match criterion.get_val_grad(model, x, y, clamped.view(), algo, tol) {
            Ok((value, grad)) if value.is_finite() => {
                monitor_cell
                    .borrow_mut()
                    .record(value, clamped.view(), Some(grad.clone()));
                (value, grad)
            }
            Ok((value, _)) => {
                log::warn!(
                    "Non-finite criterion value {}, returning large finite value",
                    value
                );
                (FAILED_EVALUATION_COST, Array1::zeros(log_alpha.len()))
            }
            Err(e) => {
                log::warn!(
                    "Criterion evaluation failed: {}, returning large finite value",
                    e
                );
                (FAILED_EVALUATION_COST, Array1::zeros(log_alpha.len()))
            }
        }
    };

    let outcome = Bfgs::new(log_alpha0.mapv(|v| v.clamp(lower, upper)), cost_and_grad)
        .with_tolerance(config.search.tolerance)
        .with_max_iterations(config.search.max_iterations)
        .run();
    let monitor = monitor_cell.into_inner();

    match outcome {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => {
            log::info!(
                "BFGS search with {} converged in {} iterations: {} = {:.6e}",
                algo.name(),
                iterations,
                criterion.name(),
                final_value
            );
            Ok(SearchResult {
                log_alpha: final_point.mapv(|v| v.clamp(lower, upper)),
                value: final_value,
                n_evaluations: monitor.len() - first_record,
            })
        }
        Err(e) => {
            log::warn!("BFGS stopped early ({e}); keeping the best evaluated point.");
            let best = monitor
                .best_index_since(first_record)
                .ok_or(SearchError::NoFiniteEvaluation)?;
            Ok(SearchResult {
                log_alpha: monitor.log_alphas[best].clone(),
                value: monitor.objs[best],
                n_evaluations: monitor.len() - first_record,
            })
        }
    }
}
