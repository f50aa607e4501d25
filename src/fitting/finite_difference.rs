//! Finite difference methods for numerical differentiation.
//!
//! This module provides functions for computing the Jacobian of a fit problem
//! using finite difference approximations, sequentially or across the rayon
//! thread pool.

use crate::error::{PowderFitError, Result};
use crate::fitting::problem::Problem;
use ndarray::{Array1, Array2};
use rayon::prelude::*;

/// Default step size for finite differences.
const DEFAULT_EPSILON: f64 = 1e-8;

fn step_for(value: f64, eps: f64) -> f64 {
    if value.abs() > eps {
        value.abs() * eps
    } else {
        eps
    }
}

/// Compute the Jacobian matrix using forward finite differences.
///
/// The Jacobian is the matrix of partial derivatives of the residuals with
/// respect to the parameters: J[i,j] = ∂residual[i]/∂param[j].
///
/// # Arguments
///
/// * `problem` - The problem to evaluate
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `epsilon` - The step size for finite differences (optional)
pub fn jacobian(
    problem: &dyn Problem,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    let residuals = problem.eval(params)?;
    if residuals.len() != n_residuals {
        return Err(PowderFitError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));
    for j in 0..n_params {
        let mut params_perturbed = params.clone();
        let eps_j = step_for(params[j], eps);
        params_perturbed[j] += eps_j;

        let residuals_perturbed = problem.eval(&params_perturbed)?;
        for i in 0..n_residuals {
            jac[[i, j]] = (residuals_perturbed[i] - residuals[i]) / eps_j;
        }
    }

    Ok(jac)
}

/// Compute the Jacobian matrix using central finite differences, one column
/// per rayon task.
pub fn jacobian_parallel(
    problem: &dyn Problem,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    let columns: Result<Vec<Array1<f64>>> = (0..n_params)
        .into_par_iter()
        .map(|j| {
            let eps_j = step_for(params[j], eps);

            let mut params_forward = params.clone();
            params_forward[j] += eps_j;
            let mut params_backward = params.clone();
            params_backward[j] -= eps_j;

            let forward = problem.eval(&params_forward)?;
            let backward = problem.eval(&params_backward)?;
            if forward.len() != n_residuals || backward.len() != n_residuals {
                return Err(PowderFitError::DimensionMismatch(format!(
                    "Expected {} residuals, got {}",
                    n_residuals,
                    forward.len()
                )));
            }
            Ok((forward - backward) / (2.0 * eps_j))
        })
        .collect();

    let mut jac = Array2::zeros((n_residuals, n_params));
    for (j, column) in columns?.into_iter().enumerate() {
        jac.column_mut(j).assign(&column);
    }
    Ok(jac)
}
