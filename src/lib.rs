//! # powderfit-rs
//!
//! `powderfit-rs` is the session core of a powder-diffraction fitting
//! application: a parameter graph with constraints, an undo/redo history,
//! pluggable pattern calculators and Levenberg-Marquardt fits running on a
//! background thread.
//!
//! The library provides:
//! - A parameter graph of phases, atoms, pattern, instrument and background
//! - Numeric and object constraints, also parsed from text
//! - An explicitly owned undo/redo stack with compound entries
//! - Switchable calculation backends for the simulated pattern
//! - A minimizer registry and a fit orchestrator
//! - A typed event bus and tagged values for the UI edge
//!
//! ## Basic Usage
//!
//! ```
//! use powderfit_rs::{ExperimentData, Session};
//!
//! let mut session = Session::new();
//! session.add_default_phase().unwrap();
//!
//! let x: Vec<f64> = (0..101).map(|i| 10.0 + 0.1 * i as f64).collect();
//! let y = vec![10.0; x.len()];
//! let e = vec![1.0; x.len()];
//! session
//!     .load_experiment(ExperimentData::new("flat", x, y, e).unwrap())
//!     .unwrap();
//!
//! let buffers = session.plot_buffers().unwrap();
//! assert_eq!(buffers.len(), 101);
//! ```

pub mod calculator;
pub mod config;
pub mod error;
pub mod events;
pub mod experiment;
pub mod fitting;
pub mod history;
pub mod parameters;
pub mod presentation;
pub mod project;
pub mod session;
pub mod ui;

// Re-exports for convenience
pub use calculator::{CalculationEngine, CalculatorBackend, GaussianBackend, PseudoVoigtBackend};
pub use config::{SampleDefaults, SessionConfig};
pub use error::{PowderFitError, Result};
pub use events::{Event, EventBus, SubscriptionId};
pub use experiment::{ExperimentData, ExperimentSetup, ExperimentState, SimulationRange};
pub use fitting::{
    FitResult, FitStatus, LevenbergMarquardt, LmConfig, Minimizer, MinimizerRegistry, MinimizerSelection,
    Problem,
};
pub use history::{Owner, RefreshGroup, UndoStack};
pub use parameters::{Constraint, ConstraintEngine, ParamId, Parameter, ParameterGraph};
pub use presentation::PlotBuffers;
pub use project::ProjectDocument;
pub use session::Session;
pub use ui::UiValue;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
