//! Experiment data
//!
//! A measured powder pattern (`x`, `y`, `e`), the state machine of the
//! experiment slot (`NotSet`, `Skipped`, `Loaded`) and the grid used to
//! simulate a pattern when no data is loaded.

use crate::error::{PowderFitError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One measured dataset. Arrays are validated at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentData {
    name: String,
    x: Vec<f64>,
    y: Vec<f64>,
    e: Vec<f64>,
}

impl ExperimentData {
    /// Build a dataset from equal-length arrays with strictly ascending `x`
    /// and strictly positive `e`.
    ///
    /// # Examples
    ///
    /// ```
    /// use powderfit_rs::experiment::ExperimentData;
    ///
    /// let data = ExperimentData::new("d1a", vec![10.0, 10.1], vec![5.0, 6.0], vec![1.0, 1.0]).unwrap();
    /// assert_eq!(data.len(), 2);
    /// assert!(ExperimentData::new("bad", vec![10.0, 9.0], vec![1.0, 1.0], vec![1.0, 1.0]).is_err());
    /// ```
    pub fn new(name: &str, x: Vec<f64>, y: Vec<f64>, e: Vec<f64>) -> Result<Self> {
        let data = Self {
            name: name.to_string(),
            x,
            y,
            e,
        };
        data.validate()?;
        Ok(data)
    }

    /// Re-check the construction invariants, e.g. after deserialization.
    pub fn validate(&self) -> Result<()> {
        let (x, y, e) = (&self.x, &self.y, &self.e);
        if x.is_empty() {
            return Err(PowderFitError::InvalidExperiment("dataset is empty".to_string()));
        }
        if x.len() != y.len() || x.len() != e.len() {
            return Err(PowderFitError::InvalidExperiment(format!(
                "array lengths differ: x={}, y={}, e={}",
                x.len(),
                y.len(),
                e.len()
            )));
        }
        if x.iter().chain(y).chain(e).any(|v| !v.is_finite()) {
            return Err(PowderFitError::InvalidExperiment(
                "dataset contains non-finite values".to_string(),
            ));
        }
        if let Some(i) = x.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PowderFitError::InvalidExperiment(format!(
                "x is not strictly ascending at index {}",
                i + 1
            )));
        }
        if let Some(i) = e.iter().position(|&v| v <= 0.0) {
            return Err(PowderFitError::InvalidExperiment(format!(
                "uncertainty at index {} is not positive",
                i
            )));
        }
        Ok(())
    }

    /// Parse whitespace-separated `x y [e]` columns. Blank lines and lines
    /// starting with `#` are skipped. Without a third column `e = sqrt(y)`,
    /// or 1 where `y <= 1`.
    pub fn from_xye(name: &str, text: &str) -> Result<Self> {
        let (mut x, mut y, mut e) = (Vec::new(), Vec::new(), Vec::new());
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns = line
                .split_whitespace()
                .map(|s| s.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| {
                    PowderFitError::InvalidExperiment(format!("line {}: {}", lineno + 1, err))
                })?;
            match columns.as_slice() {
                [xi, yi] => {
                    x.push(*xi);
                    y.push(*yi);
                    e.push(if *yi > 1.0 { yi.sqrt() } else { 1.0 });
                }
                [xi, yi, ei, ..] => {
                    x.push(*xi);
                    y.push(*yi);
                    e.push(*ei);
                }
                _ => {
                    return Err(PowderFitError::InvalidExperiment(format!(
                        "line {}: expected at least two columns",
                        lineno + 1
                    )))
                }
            }
        }
        Self::new(name, x, y, e)
    }

    /// Read an `.xye` file; the dataset is named after the file stem.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("experiment");
        Self::from_xye(name, &text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> Array1<f64> {
        Array1::from_vec(self.x.clone())
    }

    pub fn y(&self) -> Array1<f64> {
        Array1::from_vec(self.y.clone())
    }

    pub fn e(&self) -> Array1<f64> {
        Array1::from_vec(self.e.clone())
    }

    /// Fit weights `1 / e`.
    pub fn weights(&self) -> Array1<f64> {
        self.e.iter().map(|e| 1.0 / e).collect()
    }

    pub fn x_slice(&self) -> &[f64] {
        &self.x
    }

    pub fn y_slice(&self) -> &[f64] {
        &self.y
    }

    pub fn e_slice(&self) -> &[f64] {
        &self.e
    }
}

/// Grid used to simulate a pattern when no measured x is available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationRange {
    pub x_min: f64,
    pub x_max: f64,
    pub x_step: f64,
}

impl Default for SimulationRange {
    fn default() -> Self {
        Self {
            x_min: 10.0,
            x_max: 150.0,
            x_step: 0.1,
        }
    }
}

impl SimulationRange {
    /// Range spanned by a dataset, with the mean step.
    pub fn from_data(data: &ExperimentData) -> Self {
        let x = data.x_slice();
        let x_min = x[0];
        let x_max = x[x.len() - 1];
        let x_step = if x.len() > 1 {
            (x_max - x_min) / (x.len() - 1) as f64
        } else {
            SimulationRange::default().x_step
        };
        Self { x_min, x_max, x_step }
    }

    /// Number of grid points, or `None` when the bounds or step are not
    /// finite, the step is not positive, `x_max < x_min`, or the count does
    /// not fit in a `usize`.
    pub fn point_count(&self) -> Option<usize> {
        let finite = self.x_min.is_finite() && self.x_max.is_finite() && self.x_step.is_finite();
        if !finite || !(self.x_step > 0.0) || self.x_max < self.x_min {
            return None;
        }
        let steps = ((self.x_max - self.x_min) / self.x_step + 0.5).floor();
        if !steps.is_finite() || steps >= usize::MAX as f64 {
            return None;
        }
        (steps as usize).checked_add(1)
    }

    /// Accept the range only if it describes at most `max_points` points.
    pub fn validate(&self, max_points: usize) -> Result<()> {
        match self.point_count() {
            Some(n) if n <= max_points => Ok(()),
            Some(n) => Err(PowderFitError::InvalidInput(format!(
                "simulation range {}..{} step {} has {} points, the limit is {}",
                self.x_min, self.x_max, self.x_step, n, max_points
            ))),
            None => Err(PowderFitError::InvalidInput(format!(
                "invalid simulation range {}..{} step {}",
                self.x_min, self.x_max, self.x_step
            ))),
        }
    }

    /// Grid points from `x_min` to `x_max` inclusive (within half a step).
    /// A range that cannot be counted yields the single point `x_min`.
    pub fn grid(&self) -> Array1<f64> {
        match self.point_count() {
            Some(n) => Array1::from_iter((0..n).map(|i| self.x_min + i as f64 * self.x_step)),
            None => Array1::from_vec(vec![self.x_min]),
        }
    }
}

/// Occupancy of the experiment slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum ExperimentState {
    /// Nothing loaded and simulation not requested.
    #[default]
    NotSet,
    /// The user chose to work without data; simulate on the range grid.
    Skipped,
    Loaded(ExperimentData),
}

impl ExperimentState {
    pub fn data(&self) -> Option<&ExperimentData> {
        match self {
            Self::Loaded(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Experiment slot together with its simulation range; the unit recorded in
/// undo entries for experiment changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentSetup {
    pub state: ExperimentState,
    pub range: SimulationRange,
}

impl ExperimentSetup {
    /// Check a setup that did not come through the session's edit paths. A
    /// range derived from loaded data is only required to be countable; one
    /// used for simulation must also respect `max_points`.
    pub fn validate(&self, max_points: usize) -> Result<()> {
        match &self.state {
            ExperimentState::Loaded(data) => {
                data.validate()?;
                self.range.validate(usize::MAX)
            }
            _ => self.range.validate(max_points),
        }
    }
}
