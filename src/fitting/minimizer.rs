//! Pluggable minimizer engines and the registry that selects between them.
//!
//! An engine offers one or more named methods. The bundled engines both drive
//! the Levenberg-Marquardt core and differ only in the configuration each
//! method maps to.

use crate::error::{PowderFitError, Result};
use crate::fitting::lm::{LevenbergMarquardt, LmConfig, LmResult};
use crate::fitting::problem::Problem;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A nonlinear least-squares engine.
pub trait Minimizer: Send + Sync + fmt::Debug {
    /// Engine name shown in the minimizer selector.
    fn name(&self) -> &str;

    /// Methods offered by this engine.
    fn methods(&self) -> Vec<String>;

    /// Method selected when the engine is selected.
    fn default_method(&self) -> &str;

    /// Minimize `problem` starting from `initial` with the named method.
    fn minimize(&self, problem: &dyn Problem, initial: Array1<f64>, method: &str) -> Result<LmResult>;
}

/// Engine and method currently selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimizerSelection {
    pub engine: String,
    pub method: String,
}

impl MinimizerSelection {
    pub fn new(engine: &str, method: &str) -> Self {
        Self {
            engine: engine.to_string(),
            method: method.to_string(),
        }
    }
}

impl fmt::Display for MinimizerSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.engine, self.method)
    }
}

/// Levenberg-Marquardt engine with one configuration per method.
#[derive(Debug, Clone)]
pub struct LmEngine {
    name: String,
    methods: Vec<(String, LmConfig)>,
    default_method: String,
}

impl LmEngine {
    /// `lmopt`: `leastsq` uses Marquardt-scaled damping with a parallel
    /// central-difference Jacobian, `least_squares` uses identity damping
    /// with forward differences.
    pub fn lmopt(config: LmConfig) -> Self {
        let least_squares = LmConfig {
            scaled_damping: false,
            parallel_jacobian: false,
            ..config.clone()
        };
        Self {
            name: "lmopt".to_string(),
            methods: vec![
                ("leastsq".to_string(), config),
                ("least_squares".to_string(), least_squares),
            ],
            default_method: "leastsq".to_string(),
        }
    }

    /// `damped`: `lm` starts heavily damped, `newton` starts close to a pure
    /// Gauss-Newton step.
    pub fn damped(config: LmConfig) -> Self {
        let lm = LmConfig {
            initial_lambda: 1.0,
            ..config.clone()
        };
        let newton = LmConfig {
            initial_lambda: config.min_lambda.max(1e-9),
            lambda_down_factor: 0.01,
            ..config
        };
        Self {
            name: "damped".to_string(),
            methods: vec![("newton".to_string(), newton), ("lm".to_string(), lm)],
            default_method: "lm".to_string(),
        }
    }

    /// Configuration behind a method.
    pub fn config(&self, method: &str) -> Option<&LmConfig> {
        self.methods.iter().find(|(m, _)| m == method).map(|(_, c)| c)
    }
}

impl Minimizer for LmEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn methods(&self) -> Vec<String> {
        self.methods.iter().map(|(m, _)| m.clone()).collect()
    }

    fn default_method(&self) -> &str {
        &self.default_method
    }

    fn minimize(&self, problem: &dyn Problem, initial: Array1<f64>, method: &str) -> Result<LmResult> {
        let config = self.config(method).ok_or_else(|| PowderFitError::UnknownMethod {
            engine: self.name.clone(),
            method: method.to_string(),
        })?;
        LevenbergMarquardt::with_config(config.clone()).minimize(problem, initial)
    }
}

/// Registered engines plus the current engine/method selection.
#[derive(Debug, Clone)]
pub struct MinimizerRegistry {
    engines: Vec<Arc<dyn Minimizer>>,
    selection: MinimizerSelection,
}

impl Default for MinimizerRegistry {
    fn default() -> Self {
        Self::new(LmConfig::default())
    }
}

impl MinimizerRegistry {
    /// Registry with `lmopt` and `damped`; `lmopt`/`leastsq` is selected.
    pub fn new(config: LmConfig) -> Self {
        Self {
            engines: vec![
                Arc::new(LmEngine::lmopt(config.clone())),
                Arc::new(LmEngine::damped(config)),
            ],
            selection: MinimizerSelection::new("lmopt", "leastsq"),
        }
    }

    /// Add an engine. Names must be unique.
    pub fn register(&mut self, engine: Arc<dyn Minimizer>) -> Result<()> {
        if self.find(engine.name()).is_some() {
            return Err(PowderFitError::DuplicateName(format!(
                "minimizer engine '{}'",
                engine.name()
            )));
        }
        self.engines.push(engine);
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Minimizer>> {
        self.engines.iter().find(|e| e.name() == name)
    }

    /// Names of the registered engines in registration order.
    pub fn engines(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn methods(&self, engine: &str) -> Result<Vec<String>> {
        self.find(engine)
            .map(|e| e.methods())
            .ok_or_else(|| PowderFitError::UnknownEngine(engine.to_string()))
    }

    pub fn selection(&self) -> &MinimizerSelection {
        &self.selection
    }

    /// Select an engine and reset the method to its default. An unknown name
    /// keeps the current selection. Returns the previous selection.
    pub fn select_engine(&mut self, name: &str) -> Result<MinimizerSelection> {
        let Some(engine) = self.find(name) else {
            warn!(engine = name, "unknown minimizer engine");
            return Err(PowderFitError::UnknownEngine(name.to_string()));
        };
        let next = MinimizerSelection::new(engine.name(), engine.default_method());
        info!(from = %self.selection, to = %next, "minimizer engine switched");
        Ok(std::mem::replace(&mut self.selection, next))
    }

    /// Select a method of the current engine. Returns the previous selection.
    pub fn select_method(&mut self, method: &str) -> Result<MinimizerSelection> {
        let engine = &self.selection.engine;
        let known = self.methods(engine)?.iter().any(|m| m == method);
        if !known {
            warn!(engine = %engine, method, "unknown minimizer method");
            return Err(PowderFitError::UnknownMethod {
                engine: engine.clone(),
                method: method.to_string(),
            });
        }
        let next = MinimizerSelection::new(engine, method);
        Ok(std::mem::replace(&mut self.selection, next))
    }

    /// Put back a selection recorded earlier (undo, project restore).
    pub fn restore(&mut self, selection: &MinimizerSelection) -> Result<()> {
        let known = self
            .methods(&selection.engine)?
            .iter()
            .any(|m| *m == selection.method);
        if !known {
            return Err(PowderFitError::UnknownMethod {
                engine: selection.engine.clone(),
                method: selection.method.clone(),
            });
        }
        self.selection = selection.clone();
        Ok(())
    }

    /// The selected engine and method.
    pub fn current(&self) -> Result<(Arc<dyn Minimizer>, String)> {
        let engine = self
            .find(&self.selection.engine)
            .ok_or_else(|| PowderFitError::UnknownEngine(self.selection.engine.clone()))?;
        Ok((Arc::clone(engine), self.selection.method.clone()))
    }
}
