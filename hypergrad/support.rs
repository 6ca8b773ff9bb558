// hypergrad/support.rs

//! Support sets and the hyperparameter columns a Jacobian is restricted to.

use ndarray::{Array1, ArrayView1};

/// The non-zero pattern of a coefficient vector.
///
/// Holds both the boolean mask over all features and the sorted list of
/// active indices. Two supports compare equal only if they select exactly the
/// same features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Support {
    mask: Vec<bool>,
    indices: Vec<usize>,
}

impl Support {
    pub fn from_coefficients(beta: ArrayView1<f64>) -> Self {
        let mask: Vec<bool> = beta.iter().map(|&b| b != 0.0).collect();
        let indices = mask
            .iter()
            .enumerate()
            .filter_map(|(j, &active)| active.then_some(j))
            .collect();
        Self { mask, indices }
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.mask.len()
    }

    /// Gathers the entries of a full-length vector that lie on the support.
    pub fn restrict(&self, full: ArrayView1<f64>) -> Array1<f64> {
        self.indices.iter().map(|&j| full[j]).collect()
    }

    /// Scatters a support-indexed vector back to full length.
    pub fn expand(&self, dense: ArrayView1<f64>) -> Array1<f64> {
        let mut full = Array1::zeros(self.mask.len());
        for (&j, &value) in self.indices.iter().zip(dense.iter()) {
            full[j] = value;
        }
        full
    }
}

/// The subset of hyperparameter columns kept in a restricted Jacobian.
///
/// For a shared or two-level penalty every column can be non-zero. For a
/// per-feature penalty, the derivative of the support coefficients with
/// respect to an inactive feature's level is zero, so only the support's own
/// columns are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperColumns {
    columns: Vec<usize>,
    position: Vec<Option<usize>>,
}

impl HyperColumns {
    /// Keeps all `n_hyperparams` columns.
    pub fn all(n_hyperparams: usize) -> Self {
        Self {
            columns: (0..n_hyperparams).collect(),
            position: (0..n_hyperparams).map(Some).collect(),
        }
    }

    /// Keeps the given sorted columns out of `n_hyperparams`.
    pub fn subset(columns: Vec<usize>, n_hyperparams: usize) -> Self {
        let mut position = vec![None; n_hyperparams];
        for (pos, &k) in columns.iter().enumerate() {
            position[k] = Some(pos);
        }
        Self { columns, position }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn n_hyperparams(&self) -> usize {
        self.position.len()
    }

    /// Local position of hyperparameter column `k`, if it is kept.
    pub fn position(&self, k: usize) -> Option<usize> {
        self.position.get(k).copied().flatten()
    }

    /// Scatters a vector over the kept columns into one shaped like `log_alpha`.
    pub fn scatter(&self, local: ArrayView1<f64>) -> Array1<f64> {
        let mut full = Array1::zeros(self.position.len());
        for (&k, &value) in self.columns.iter().zip(local.iter()) {
            full[k] = value;
        }
        full
    }
}
