// hypergrad/design.rs

//! # Design Matrices
//!
//! The solvers never index `X` directly. Everything goes through the column
//! kernels below, implemented once for a column-major dense array and once
//! for a CSC sparse matrix.
//!
//! Both variants accumulate over rows in ascending order with the same
//! floating-point operations, so a dense matrix and its CSC copy (without
//! explicit zeros) drive coordinate descent through bit-identical iterates.
//! Supports computed from either storage can therefore be compared with `==`.

use ndarray::{
    Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, ShapeBuilder,
};
use sprs::CsMat;
use thiserror::Error;

/// Errors raised while building or slicing a design matrix.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("Row index {index} is out of bounds for a design with {n_samples} samples.")]
    RowOutOfBounds { index: usize, n_samples: usize },

    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
}

/// A design matrix of shape `(n_samples, n_features)`.
#[derive(Debug, Clone)]
pub enum Design {
    /// Dense storage, always kept in column-major order.
    Dense(Array2<f64>),
    /// Compressed sparse column storage.
    Sparse(CsMat<f64>),
}

impl Design {
    /// Wraps a dense array, converting it to column-major order if needed.
    pub fn dense(x: Array2<f64>) -> Self {
        if x.t().is_standard_layout() {
            return Design::Dense(x);
        }
        let mut fortran = Array2::zeros(x.raw_dim().f());
        fortran.assign(&x);
        Design::Dense(fortran)
    }

    /// Wraps a sparse matrix, converting CSR input to CSC.
    pub fn sparse(x: CsMat<f64>) -> Self {
        if x.is_csc() {
            Design::Sparse(x)
        } else {
            Design::Sparse(x.to_other_storage())
        }
    }

    /// Builds a CSC matrix holding the non-zero entries of `x`.
    pub fn sparse_from_dense(x: ArrayView2<f64>) -> Self {
        let (n_samples, n_features) = x.dim();
        let mut indptr = Vec::with_capacity(n_features + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for column in x.columns() {
            for (row, &value) in column.iter().enumerate() {
                if value != 0.0 {
                    indices.push(row);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }
        Design::Sparse(CsMat::new_csc((n_samples, n_features), indptr, indices, data))
    }

    pub fn n_samples(&self) -> usize {
        match self {
            Design::Dense(x) => x.nrows(),
            Design::Sparse(x) => x.rows(),
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Design::Dense(x) => x.ncols(),
            Design::Sparse(x) => x.cols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Design::Sparse(_))
    }

    /// `X_j^T v`.
    pub fn column_dot(&self, j: usize, v: ArrayView1<f64>) -> f64 {
        match self {
            Design::Dense(x) => x
                .column(j)
                .iter()
                .zip(v.iter())
                .fold(0.0, |acc, (&a, &b)| acc + a * b),
            Design::Sparse(x) => x.outer_view(j).map_or(0.0, |col| {
                col.iter().fold(0.0, |acc, (row, &a)| acc + a * v[row])
            }),
        }
    }

    /// `out = X_j^T M` for a block `M` of shape `(n_samples, k)`.
    pub fn column_dot_block(&self, j: usize, m: ArrayView2<f64>, mut out: ArrayViewMut1<f64>) {
        out.fill(0.0);
        match self {
            Design::Dense(x) => {
                for (row, &a) in x.column(j).iter().enumerate() {
                    out.scaled_add(a, &m.row(row));
                }
            }
            Design::Sparse(x) => {
                if let Some(col) = x.outer_view(j) {
                    for (row, &a) in col.iter() {
                        out.scaled_add(a, &m.row(row));
                    }
                }
            }
        }
    }

    /// `v += alpha X_j`.
    pub fn column_axpy(&self, j: usize, alpha: f64, mut v: ArrayViewMut1<f64>) {
        match self {
            Design::Dense(x) => {
                v.scaled_add(alpha, &x.column(j));
            }
            Design::Sparse(x) => {
                if let Some(col) = x.outer_view(j) {
                    for (row, &a) in col.iter() {
                        v[row] += alpha * a;
                    }
                }
            }
        }
    }

    /// `M += alpha X_j a^T` for a block `M` of shape `(n_samples, k)`.
    pub fn column_axpy_block(
        &self,
        j: usize,
        alpha: f64,
        a: ArrayView1<f64>,
        mut m: ArrayViewMut2<f64>,
    ) {
        match self {
            Design::Dense(x) => {
                for (row, &x_ij) in x.column(j).iter().enumerate() {
                    m.row_mut(row).scaled_add(alpha * x_ij, &a);
                }
            }
            Design::Sparse(x) => {
                if let Some(col) = x.outer_view(j) {
                    for (row, &x_ij) in col.iter() {
                        m.row_mut(row).scaled_add(alpha * x_ij, &a);
                    }
                }
            }
        }
    }

    /// Squared Euclidean norm of every column.
    pub fn column_sq_norms(&self) -> Array1<f64> {
        match self {
            Design::Dense(x) => x
                .columns()
                .into_iter()
                .map(|col| col.iter().fold(0.0, |acc, &a| acc + a * a))
                .collect(),
            Design::Sparse(x) => (0..x.cols())
                .map(|j| {
                    x.outer_view(j)
                        .map_or(0.0, |col| col.iter().fold(0.0, |acc, (_, &a)| acc + a * a))
                })
                .collect(),
        }
    }

    /// Dense copy of column `j`.
    pub fn column(&self, j: usize) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_samples());
        self.column_axpy(j, 1.0, out.view_mut());
        out
    }

    /// `X_S coef` where `coef` is indexed like `support`.
    pub fn matvec_support(&self, support: &[usize], coef: ArrayView1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_samples());
        for (&j, &c) in support.iter().zip(coef.iter()) {
            if c != 0.0 {
                self.column_axpy(j, c, out.view_mut());
            }
        }
        out
    }

    /// `X_S^T v`.
    pub fn t_matvec_support(&self, support: &[usize], v: ArrayView1<f64>) -> Array1<f64> {
        support.iter().map(|&j| self.column_dot(j, v)).collect()
    }

    /// `X coef` for a full-length coefficient vector.
    pub fn matvec(&self, coef: ArrayView1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_samples());
        for (j, &c) in coef.iter().enumerate() {
            if c != 0.0 {
                self.column_axpy(j, c, out.view_mut());
            }
        }
        out
    }

    /// `X^T v`.
    pub fn t_matvec(&self, v: ArrayView1<f64>) -> Array1<f64> {
        (0..self.n_features()).map(|j| self.column_dot(j, v)).collect()
    }

    /// `y - X coef`.
    pub fn residual(&self, y: ArrayView1<f64>, coef: ArrayView1<f64>) -> Array1<f64> {
        let mut r = y.to_owned();
        for (j, &c) in coef.iter().enumerate() {
            if c != 0.0 {
                self.column_axpy(j, -c, r.view_mut());
            }
        }
        r
    }

    /// Returns the design restricted to `rows`, in the order given.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Design, DesignError> {
        let n_samples = self.n_samples();
        if let Some(&index) = rows.iter().find(|&&i| i >= n_samples) {
            return Err(DesignError::RowOutOfBounds { index, n_samples });
        }
        match self {
            Design::Dense(x) => Ok(Design::dense(x.select(Axis(0), rows))),
            Design::Sparse(x) => {
                // An old row may appear several times in `rows`.
                let mut targets: Vec<Vec<usize>> = vec![Vec::new(); n_samples];
                for (new_row, &old_row) in rows.iter().enumerate() {
                    targets[old_row].push(new_row);
                }
                let mut indptr = Vec::with_capacity(x.cols() + 1);
                let mut indices = Vec::new();
                let mut data = Vec::new();
                indptr.push(0);
                let mut entries: Vec<(usize, f64)> = Vec::new();
                for j in 0..x.cols() {
                    entries.clear();
                    if let Some(col) = x.outer_view(j) {
                        for (old_row, &value) in col.iter() {
                            entries.extend(targets[old_row].iter().map(|&r| (r, value)));
                        }
                    }
                    entries.sort_by_key(|&(r, _)| r);
                    for &(r, value) in &entries {
                        indices.push(r);
                        data.push(value);
                    }
                    indptr.push(indices.len());
                }
                Ok(Design::Sparse(CsMat::new_csc(
                    (rows.len(), x.cols()),
                    indptr,
                    indices,
                    data,
                )))
            }
        }
    }

    /// Fails fast when `len` does not match the number of samples.
    pub fn check_samples(&self, context: &'static str, len: usize) -> Result<(), DesignError> {
        if len != self.n_samples() {
            return Err(DesignError::DimensionMismatch {
                context,
                expected: self.n_samples(),
                found: len,
            });
        }
        Ok(())
    }
}
