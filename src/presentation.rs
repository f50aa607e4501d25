//! Plot buffers for the pattern view.
//!
//! What is drawn depends on the experiment slot: nothing when it is unset, a
//! simulated curve on the range grid when the user skipped loading data, and
//! measured, simulated, residual and background curves once data is loaded.

use crate::calculator::CalculationEngine;
use crate::error::Result;
use crate::experiment::{ExperimentSetup, ExperimentState};
use crate::parameters::graph::ParameterGraph;
use ndarray::Array1;
use serde::Serialize;

/// Curves handed to the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotBuffers {
    pub x: Array1<f64>,
    /// `None` when no data is loaded.
    pub measured: Option<Array1<f64>>,
    pub simulated: Array1<f64>,
    /// `measured - simulated`.
    pub residual: Option<Array1<f64>>,
    pub background: Array1<f64>,
}

impl PlotBuffers {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Recompute the plot buffers. `Ok(None)` when the experiment slot is unset.
pub fn plot_buffers(
    engine: &mut CalculationEngine,
    graph: &ParameterGraph,
    experiment: &ExperimentSetup,
) -> Result<Option<PlotBuffers>> {
    let (x, measured) = match &experiment.state {
        ExperimentState::NotSet => return Ok(None),
        ExperimentState::Skipped => (experiment.range.grid(), None),
        ExperimentState::Loaded(data) => (data.x(), Some(data.y())),
    };

    let simulated = engine.compute(graph, &x)?;
    let residual = measured.as_ref().map(|y| y - &simulated);
    let background = x.mapv(|xi| graph.background().evaluate(xi));

    Ok(Some(PlotBuffers {
        x,
        measured,
        simulated,
        residual,
        background,
    }))
}
