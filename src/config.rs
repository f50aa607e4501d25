//! Session configuration.
//!
//! Everything here has a default matching the desktop application, so a
//! configuration file only needs to name what it changes:
//!
//! ```
//! use powderfit_rs::config::SessionConfig;
//!
//! let config = SessionConfig::from_json(r#"{ "default_calculator": "gaussian" }"#).unwrap();
//! assert_eq!(config.default_calculator, "gaussian");
//! assert_eq!(config.default_engine, "lmopt");
//! ```

use crate::error::Result;
use crate::experiment::SimulationRange;
use crate::fitting::lm::LmConfig;
use serde::{Deserialize, Serialize};

/// Initial pattern and instrument values of a new sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleDefaults {
    pub scale: f64,
    pub zero_shift: f64,
    /// Wavelength in Å.
    pub wavelength: f64,
    pub resolution_u: f64,
    pub resolution_v: f64,
    pub resolution_w: f64,
    pub resolution_x: f64,
    pub resolution_y: f64,
}

impl Default for SampleDefaults {
    fn default() -> Self {
        Self {
            scale: 100.0,
            zero_shift: 0.0,
            wavelength: 1.912,
            resolution_u: 0.1447,
            resolution_v: -0.4252,
            resolution_w: 0.3864,
            resolution_x: 0.0,
            resolution_y: 0.0,
        }
    }
}

/// Configuration of a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Calculation backend selected at startup.
    pub default_calculator: String,

    /// Minimizer engine selected at startup; its default method is used.
    pub default_engine: String,

    /// Grid used when simulating without data.
    pub simulation_range: SimulationRange,

    pub sample: SampleDefaults,

    /// Settings of the Levenberg-Marquardt core shared by the bundled engines.
    pub lm: LmConfig,

    /// Largest simulation grid accepted from a range edit or a project.
    pub max_grid_points: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_calculator: "pseudo-voigt".to_string(),
            default_engine: "lmopt".to_string(),
            simulation_range: SimulationRange::default(),
            sample: SampleDefaults::default(),
            lm: LmConfig::default(),
            max_grid_points: 1_000_000,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_calculator(mut self, name: &str) -> Self {
        self.default_calculator = name.to_string();
        self
    }

    pub fn with_engine(mut self, name: &str) -> Self {
        self.default_engine = name.to_string();
        self
    }

    pub fn with_simulation_range(mut self, range: SimulationRange) -> Self {
        self.simulation_range = range;
        self
    }

    pub fn with_sample(mut self, sample: SampleDefaults) -> Self {
        self.sample = sample;
        self
    }

    pub fn with_lm(mut self, lm: LmConfig) -> Self {
        self.lm = lm;
        self
    }

    pub fn with_max_grid_points(mut self, max_grid_points: usize) -> Self {
        self.max_grid_points = max_grid_points;
        self
    }

    /// Set the iteration limit of the Levenberg-Marquardt core.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.lm.max_iterations = max_iterations;
        self
    }
}
