//! Problem definition trait and the powder-pattern fit problem.
//!
//! A [`Problem`] is a nonlinear least squares problem in a flat parameter
//! vector. [`FitProblem`] maps that vector onto the free parameters of a
//! snapshot of the parameter graph, in the unbounded internal space of each
//! parameter's [`BoundsTransform`].

use crate::calculator::CalculatorBackend;
use crate::error::{PowderFitError, Result};
use crate::experiment::ExperimentData;
use crate::parameters::bounds::BoundsTransform;
use crate::parameters::constraints::ConstraintEngine;
use crate::parameters::graph::ParameterGraph;
use crate::parameters::parameter::ParamId;
use ndarray::{Array1, Array2};
use std::sync::Arc;

/// A trait representing a nonlinear least squares problem.
///
/// Problems must be shareable across threads: the Jacobian is evaluated
/// column by column on the rayon pool.
pub trait Problem: Sync {
    /// Evaluate the residuals at the given parameters.
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Analytical Jacobian, when the problem has one. The optimizer falls
    /// back to finite differences otherwise.
    fn analytical_jacobian(&self, _params: &Array1<f64>) -> Option<Result<Array2<f64>>> {
        None
    }

    /// Evaluate the sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}

/// Weighted residuals `(y - calc) / e` of a simulated pattern against a
/// measured one, as a function of the free parameters.
#[derive(Debug, Clone)]
pub struct FitProblem {
    graph: ParameterGraph,
    constraints: ConstraintEngine,
    backend: Arc<dyn CalculatorBackend>,
    x: Array1<f64>,
    y: Array1<f64>,
    weights: Array1<f64>,
    free: Vec<ParamId>,
    transforms: Vec<BoundsTransform>,
}

impl FitProblem {
    /// Build a problem over `free` from snapshots of the session state.
    pub fn new(
        graph: ParameterGraph,
        constraints: ConstraintEngine,
        backend: Arc<dyn CalculatorBackend>,
        data: &ExperimentData,
        free: Vec<ParamId>,
    ) -> Result<Self> {
        let transforms = free
            .iter()
            .map(|id| graph.parameter(*id).map(|p| BoundsTransform::new(*p.bounds())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            graph,
            constraints,
            backend,
            x: data.x(),
            y: data.y(),
            weights: data.weights(),
            free,
            transforms,
        })
    }

    pub fn free(&self) -> &[ParamId] {
        &self.free
    }

    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    /// Current values of the free parameters in internal space.
    pub fn initial_internal(&self) -> Result<Array1<f64>> {
        self.free
            .iter()
            .zip(&self.transforms)
            .map(|(id, t)| Ok(t.to_internal(self.graph.parameter(*id)?.value())?))
            .collect::<Result<Vec<_>>>()
            .map(Array1::from_vec)
    }

    /// Map an internal vector to parameter values.
    pub fn to_external(&self, internal: &Array1<f64>) -> Vec<f64> {
        internal
            .iter()
            .zip(&self.transforms)
            .map(|(v, t)| t.to_external(*v))
            .collect()
    }

    /// Standard errors in parameter space from internal-space errors.
    pub fn external_errors(&self, internal: &Array1<f64>, sigma: &Array1<f64>) -> Vec<f64> {
        internal
            .iter()
            .zip(sigma)
            .zip(&self.transforms)
            .map(|((v, s), t)| s * t.derivative(*v).abs())
            .collect()
    }

    /// The graph with the free parameters set from `internal` and the
    /// constraints applied.
    pub fn graph_at(&self, internal: &Array1<f64>) -> Result<ParameterGraph> {
        if internal.len() != self.free.len() {
            return Err(PowderFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.free.len(),
                internal.len()
            )));
        }
        let mut graph = self.graph.clone();
        for (id, value) in self.free.iter().zip(self.to_external(internal)) {
            graph.set_value_clamped(*id, value)?;
        }
        self.constraints.evaluate_all(&mut graph)?;
        Ok(graph)
    }

    /// Simulated pattern at `internal`.
    pub fn simulate(&self, internal: &Array1<f64>) -> Result<Array1<f64>> {
        let graph = self.graph_at(internal)?;
        self.backend.compute(&graph, &self.x)
    }
}

impl Problem for FitProblem {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let calc = self.simulate(params)?;
        if calc.len() != self.y.len() {
            return Err(PowderFitError::DimensionMismatch(format!(
                "backend returned {} points for {} measured",
                calc.len(),
                self.y.len()
            )));
        }
        let residuals = (&self.y - &calc) * &self.weights;
        if residuals.iter().any(|r| !r.is_finite()) {
            return Err(PowderFitError::FunctionEvaluation(
                "simulated pattern contains non-finite values".to_string(),
            ));
        }
        Ok(residuals)
    }

    fn parameter_count(&self) -> usize {
        self.free.len()
    }

    fn residual_count(&self) -> usize {
        self.y.len()
    }
}
