//! Covariance matrix and standard errors from the Jacobian at the solution.
//!
//! The covariance is `(JᵀJ)⁻¹` scaled by the reduced chi-square, so reported
//! errors reflect the observed scatter of the residuals rather than the
//! nominal measurement uncertainties alone.

use crate::fitting::lm::{cholesky, cholesky_substitute};
use ndarray::{Array1, Array2};

/// Reduced chi-square: `chi2 / (n - nvarys)`, with the denominator floored at 1.
pub fn reduced_chi_square(chi_square: f64, n_residuals: usize, n_params: usize) -> f64 {
    let dof = n_residuals.saturating_sub(n_params).max(1);
    chi_square / dof as f64
}

/// Covariance matrix `(JᵀJ)⁻¹ · redchi`. `None` when `JᵀJ` is singular.
pub fn covariance_matrix(jacobian: &Array2<f64>, redchi: f64) -> Option<Array2<f64>> {
    let jtj = jacobian.t().dot(jacobian);
    let n = jtj.nrows();
    let l = cholesky(&jtj)?;

    let mut covar = Array2::zeros((n, n));
    for j in 0..n {
        let mut unit = Array1::zeros(n);
        unit[j] = 1.0;
        let column = cholesky_substitute(&l, &unit);
        covar.column_mut(j).assign(&column);
    }
    covar.mapv_inplace(|v| v * redchi);
    Some(covar)
}

/// Square roots of the covariance diagonal.
pub fn standard_errors(covar: &Array2<f64>) -> Array1<f64> {
    covar.diag().mapv(|v| v.max(0.0).sqrt())
}
