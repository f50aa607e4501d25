//! Calculation engine adapter
//!
//! A [`CalculatorBackend`] turns a parameter graph and an x grid into a
//! simulated pattern. The [`CalculationEngine`] holds the registered backends,
//! the current selection and the last computed curve. Every `compute` call
//! runs the backend; switching backend drops the remembered curve.

pub mod pattern;

use crate::error::{PowderFitError, Result};
use crate::parameters::graph::ParameterGraph;
use ndarray::Array1;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use pattern::{Peak, Reflection};

/// A pattern calculator. Implementations must be pure with respect to the
/// graph they are given; fits call them from worker threads.
pub trait CalculatorBackend: Send + Sync + fmt::Debug {
    /// Name shown in the calculator selector.
    fn name(&self) -> &str;

    /// Simulated intensity at every point of `x`.
    fn compute(&self, graph: &ParameterGraph, x: &Array1<f64>) -> Result<Array1<f64>>;
}

/// Gaussian peak shapes with Caglioti widths.
#[derive(Debug, Clone, Default)]
pub struct GaussianBackend;

impl CalculatorBackend for GaussianBackend {
    fn name(&self) -> &str {
        "gaussian"
    }

    fn compute(&self, graph: &ParameterGraph, x: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(pattern::sum_peaks(graph, x, |dx, peak| {
            (pattern::gaussian(dx, peak.fwhm_gauss), peak.fwhm_gauss)
        }))
    }
}

/// Pseudo-Voigt peak shapes: a fixed mix of Gaussian and Lorentzian sharing
/// one width, the Lorentzian broadening from `resolution_x`/`resolution_y`
/// added to the Caglioti width.
#[derive(Debug, Clone)]
pub struct PseudoVoigtBackend {
    eta: f64,
}

impl Default for PseudoVoigtBackend {
    fn default() -> Self {
        Self { eta: 0.5 }
    }
}

impl PseudoVoigtBackend {
    /// `eta` is the Lorentzian fraction, clamped to `[0, 1]`.
    pub fn with_eta(eta: f64) -> Self {
        Self {
            eta: eta.clamp(0.0, 1.0),
        }
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }
}

impl CalculatorBackend for PseudoVoigtBackend {
    fn name(&self) -> &str {
        "pseudo-voigt"
    }

    fn compute(&self, graph: &ParameterGraph, x: &Array1<f64>) -> Result<Array1<f64>> {
        let eta = self.eta;
        Ok(pattern::sum_peaks(graph, x, move |dx, peak| {
            let fwhm = peak.fwhm_gauss + peak.fwhm_lorentz;
            let value = eta * pattern::lorentzian(dx, fwhm) + (1.0 - eta) * pattern::gaussian(dx, fwhm);
            (value, fwhm)
        }))
    }
}

#[derive(Debug, Clone)]
struct LastCurve {
    generation: u64,
    curve: Array1<f64>,
}

/// Registered backends plus the current selection.
#[derive(Debug, Clone)]
pub struct CalculationEngine {
    backends: Vec<Arc<dyn CalculatorBackend>>,
    current: usize,
    generation: u64,
    last: Option<LastCurve>,
}

impl Default for CalculationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculationEngine {
    /// Engine with the bundled backends; `pseudo-voigt` is selected.
    pub fn new() -> Self {
        Self {
            backends: vec![
                Arc::new(PseudoVoigtBackend::default()),
                Arc::new(GaussianBackend),
            ],
            current: 0,
            generation: 0,
            last: None,
        }
    }

    /// Engine with exactly the given backends, the first one selected.
    pub fn with_backends(backends: Vec<Arc<dyn CalculatorBackend>>) -> Result<Self> {
        if backends.is_empty() {
            return Err(PowderFitError::InvalidInput(
                "at least one calculation backend is required".to_string(),
            ));
        }
        let mut engine = Self {
            backends: Vec::with_capacity(backends.len()),
            current: 0,
            generation: 0,
            last: None,
        };
        for backend in backends {
            engine.register(backend)?;
        }
        Ok(engine)
    }

    /// Add a backend. Names must be unique.
    pub fn register(&mut self, backend: Arc<dyn CalculatorBackend>) -> Result<()> {
        if self.backends.iter().any(|b| b.name() == backend.name()) {
            return Err(PowderFitError::DuplicateName(format!(
                "calculation backend '{}'",
                backend.name()
            )));
        }
        debug!(backend = backend.name(), "registered calculation backend");
        self.backends.push(backend);
        Ok(())
    }

    /// Names of the registered backends in registration order.
    pub fn available(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn current_name(&self) -> &str {
        self.backends[self.current].name()
    }

    /// Shared handle on the current backend, for use off the dispatch thread.
    pub fn backend(&self) -> Arc<dyn CalculatorBackend> {
        Arc::clone(&self.backends[self.current])
    }

    /// Incremented on every successful switch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Select a backend by name. An unknown name keeps the current selection.
    /// Returns the previously selected name.
    pub fn switch(&mut self, name: &str) -> Result<String> {
        let Some(index) = self.backends.iter().position(|b| b.name() == name) else {
            warn!(backend = name, "unknown calculation backend");
            return Err(PowderFitError::UnknownBackend(name.to_string()));
        };
        let previous = self.current_name().to_string();
        self.current = index;
        self.generation += 1;
        self.last = None;
        info!(from = %previous, to = name, "calculation backend switched");
        Ok(previous)
    }

    /// Forget the last computed curve.
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    /// The last computed curve, if it came from the current backend.
    pub fn cached(&self) -> Option<&Array1<f64>> {
        self.last
            .as_ref()
            .filter(|c| c.generation == self.generation)
            .map(|c| &c.curve)
    }

    /// Simulated pattern for `graph` on `x` with the current backend.
    pub fn compute(&mut self, graph: &ParameterGraph, x: &Array1<f64>) -> Result<Array1<f64>> {
        let curve = self.backends[self.current].compute(graph, x)?;
        if curve.len() != x.len() {
            return Err(PowderFitError::DimensionMismatch(format!(
                "backend '{}' returned {} points for {} x values",
                self.current_name(),
                curve.len(),
                x.len()
            )));
        }
        self.last = Some(LastCurve {
            generation: self.generation,
            curve: curve.clone(),
        });
        Ok(curve)
    }
}
