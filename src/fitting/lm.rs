//! Core Levenberg-Marquardt algorithm implementation.
//!
//! Damped Gauss-Newton iterations on `(JᵀJ + λD) δ = -Jᵀr`, with `D` either the
//! identity or the diagonal of `JᵀJ` (Marquardt scaling). The normal equations
//! are solved with a Cholesky factorisation; a non positive-definite system is
//! treated like a rejected step.

use crate::error::{PowderFitError, Result};
use crate::fitting::finite_difference::{jacobian, jacobian_parallel};
use crate::fitting::problem::Problem;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Configuration options for the Levenberg-Marquardt algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of iterations. Default: 200
    pub max_iterations: usize,

    /// Tolerance for relative reduction of the cost. Default: 1e-10
    pub ftol: f64,

    /// Tolerance for relative change in parameter values. Default: 1e-10
    pub xtol: f64,

    /// Tolerance for the gradient norm. Default: 1e-10
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-12
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e12
    pub max_lambda: f64,

    /// Scale the damping by the diagonal of JᵀJ. Default: true
    pub scaled_damping: bool,

    /// Central differences on the rayon pool instead of sequential forward
    /// differences. Default: true
    pub parallel_jacobian: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-12,
            max_lambda: 1e12,
            scaled_damping: true,
            parallel_jacobian: true,
        }
    }
}

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of accepted iterations
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// Whether the optimization converged
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The Jacobian matrix at the solution
    pub jacobian: Option<Array2<f64>>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    fn jacobian(&self, problem: &dyn Problem, params: &Array1<f64>) -> Result<Array2<f64>> {
        match problem.analytical_jacobian(params) {
            Some(jac) => jac,
            None if self.config.parallel_jacobian => jacobian_parallel(problem, params, None),
            None => jacobian(problem, params, None),
        }
    }

    fn jacobian_evals(&self, n_params: usize) -> usize {
        if self.config.parallel_jacobian {
            2 * n_params
        } else {
            n_params + 1
        }
    }

    /// Minimize the sum of squared residuals for the given problem.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    pub fn minimize(&self, problem: &dyn Problem, initial_params: Array1<f64>) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(PowderFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let config = &self.config;
        let mut params = initial_params;
        let mut residuals = problem.eval(&params)?;
        let mut cost: f64 = residuals.iter().map(|r| r * r).sum();
        let mut func_evals = 1;
        let mut lambda = config.initial_lambda;
        let mut iterations = 0;

        if n_params == 0 {
            return Ok(LmResult {
                params,
                residuals,
                cost,
                iterations,
                func_evals,
                success: true,
                message: "No free parameters".to_string(),
                jacobian: None,
            });
        }

        let mut jac = self.jacobian(problem, &params)?;
        func_evals += self.jacobian_evals(n_params);

        let (success, message) = 'outer: loop {
            let jtj = jac.t().dot(&jac);
            let gradient = jac.t().dot(&residuals);

            let gradient_norm = gradient.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if gradient_norm <= config.gtol {
                break (
                    true,
                    format!("Gradient convergence: |g| = {:.2e} <= {:.2e}", gradient_norm, config.gtol),
                );
            }
            if cost <= f64::MIN_POSITIVE {
                break (true, "Zero residual".to_string());
            }

            // Inner loop: raise lambda until a step decreases the cost.
            loop {
                if iterations >= config.max_iterations {
                    break 'outer (
                        false,
                        format!("Maximum iterations ({}) reached", config.max_iterations),
                    );
                }

                let mut a = jtj.clone();
                for i in 0..n_params {
                    let d = if config.scaled_damping {
                        jtj[[i, i]].max(1e-12)
                    } else {
                        1.0
                    };
                    a[[i, i]] += lambda * d;
                }
                let step = cholesky_solve(&a, &gradient.mapv(|g| -g));

                let Some(step) = step else {
                    lambda = (lambda * config.lambda_up_factor).min(config.max_lambda);
                    if lambda >= config.max_lambda {
                        break 'outer (false, "Normal equations are singular".to_string());
                    }
                    continue;
                };

                let predicted = &residuals + &jac.dot(&step);
                let predicted_cost: f64 = predicted.iter().map(|r| r * r).sum();
                let predicted_reduction = (cost - predicted_cost) / cost;

                let small_step = step
                    .iter()
                    .zip(params.iter())
                    .all(|(dx, x)| dx.abs() <= config.xtol * (config.xtol + x.abs()));

                let new_params = &params + &step;
                let new_residuals = problem.eval(&new_params)?;
                func_evals += 1;
                let new_cost: f64 = new_residuals.iter().map(|r| r * r).sum();
                trace!(iterations, lambda, cost, new_cost, "lm step");

                if new_cost.is_finite() && new_cost < cost {
                    let actual_reduction = (cost - new_cost) / cost;
                    params = new_params;
                    residuals = new_residuals;
                    cost = new_cost;
                    iterations += 1;
                    lambda = (lambda * config.lambda_down_factor).max(config.min_lambda);

                    if actual_reduction <= config.ftol && predicted_reduction <= config.ftol {
                        break 'outer (
                            true,
                            format!("Cost convergence: |df|/|f| = {:.2e} <= {:.2e}", actual_reduction, config.ftol),
                        );
                    }
                    if small_step {
                        break 'outer (true, "Parameter convergence".to_string());
                    }

                    jac = self.jacobian(problem, &params)?;
                    func_evals += self.jacobian_evals(n_params);
                    continue 'outer;
                }

                // Rejected step
                if predicted_reduction.abs() <= config.ftol || small_step {
                    break 'outer (true, "Converged: no further reduction possible".to_string());
                }
                lambda = (lambda * config.lambda_up_factor).min(config.max_lambda);
                if lambda >= config.max_lambda {
                    break 'outer (
                        false,
                        "Failed to decrease cost, and lambda reached maximum".to_string(),
                    );
                }
            }
        };

        debug!(success, iterations, func_evals, cost, %message, "lm finished");
        Ok(LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success,
            message,
            jacobian: Some(jac),
        })
    }
}

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
pub(crate) fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for k in 0..n {
        let mut diag = a[[k, k]];
        for j in 0..k {
            diag -= l[[k, j]] * l[[k, j]];
        }
        // Pivots lost to cancellation count as singular.
        if !diag.is_finite() || diag <= a[[k, k]].abs() * 1e-12 {
            return None;
        }
        let lkk = diag.sqrt();
        l[[k, k]] = lkk;
        for i in k + 1..n {
            let mut value = a[[i, k]];
            for j in 0..k {
                value -= l[[i, j]] * l[[k, j]];
            }
            l[[i, k]] = value / lkk;
        }
    }
    Some(l)
}

/// Solve `L Lᵀ x = b` given the Cholesky factor `L`.
pub(crate) fn cholesky_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = b.clone();
    for i in 0..n {
        for j in 0..i {
            y[i] -= l[[i, j]] * y[j];
        }
        y[i] /= l[[i, i]];
    }
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = y[i];
        for j in (i + 1)..n {
            x[i] -= l[[j, i]] * x[j];
        }
        x[i] /= l[[i, i]];
    }
    x
}

/// Solve `A x = b` for symmetric positive-definite `A`.
pub(crate) fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky(a).map(|l| cholesky_substitute(&l, b))
}
