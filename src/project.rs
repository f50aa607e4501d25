//! Project documents: everything needed to rebuild a session.

use crate::error::{PowderFitError, Result};
use crate::experiment::ExperimentSetup;
use crate::fitting::minimizer::MinimizerSelection;
use crate::fitting::orchestrator::FitResult;
use crate::parameters::constraints::ConstraintEngine;
use crate::parameters::graph::ParameterGraph;
use serde::{Deserialize, Serialize};

/// Current document format.
pub const FORMAT_VERSION: u32 = 1;

/// Serializable snapshot of a session. History and subscriptions are not
/// part of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub version: u32,
    pub graph: ParameterGraph,
    #[serde(default)]
    pub constraints: ConstraintEngine,
    #[serde(default)]
    pub experiment: ExperimentSetup,
    pub calculator: String,
    pub minimizer: MinimizerSelection,
    #[serde(default)]
    pub fit_result: Option<FitResult>,
}

impl ProjectDocument {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document, rejecting formats newer than this library.
    pub fn from_json(text: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(text)?;
        if document.version > FORMAT_VERSION {
            return Err(PowderFitError::InvalidInput(format!(
                "project format {} is newer than supported format {}",
                document.version, FORMAT_VERSION
            )));
        }
        Ok(document)
    }

    /// Check the graph, that every constraint names parameters of the graph
    /// in a valid evaluation order, and the experiment.
    pub fn validate(&self, max_grid_points: usize) -> Result<()> {
        self.graph.validate()?;
        self.constraints.validate(&self.graph)?;
        self.experiment.validate(max_grid_points)
    }
}
