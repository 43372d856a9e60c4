pub use nalgebra::{DMatrix, DVector};

use nalgebra::{Cholesky, Dyn};
use ndarray::prelude::*;

/// Copy a 2D array view into a `DMatrix`
pub fn to_dmatrix(xx: &ArrayView2<f32>) -> DMatrix<f32> {
    DMatrix::<f32>::from_fn(xx.nrows(), xx.ncols(), |i, j| xx[[i, j]])
}

/// Copy a 1D array view into a `DVector`
pub fn to_dvector(xx: &ArrayView1<f32>) -> DVector<f32> {
    DVector::<f32>::from_iterator(xx.len(), xx.iter().cloned())
}

/// Copy a `DVector` back into an `Array1`
pub fn to_array1(xx: &DVector<f32>) -> Array1<f32> {
    xx.iter().cloned().collect()
}

/// Gaussian `N(P⁻¹ h, P⁻¹)` in the information form, solved once by
/// a Cholesky factor `P = L L'`
pub struct GaussianInfoSolver {
    chol: Cholesky<f32, Dyn>,
}

impl GaussianInfoSolver {
    /// `None` if the precision matrix is not positive definite
    pub fn new(precision: DMatrix<f32>) -> Option<Self> {
        precision.cholesky().map(|chol| Self { chol })
    }

    /// Posterior mean `P⁻¹ h`
    pub fn mean(&self, hh: &DVector<f32>) -> DVector<f32> {
        self.chol.solve(hh)
    }

    /// Draw `P⁻¹ h + L'⁻¹ z` given standard normal `z`
    pub fn sample(&self, hh: &DVector<f32>, zz: &DVector<f32>) -> Option<DVector<f32>> {
        let dev = self.chol.l().transpose().solve_upper_triangular(zz)?;
        Some(self.mean(hh) + dev)
    }
}
