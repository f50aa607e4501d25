//! Fitting: the least-squares problem, the Levenberg-Marquardt core, the
//! minimizer registry and background fit orchestration.

pub mod covariance;
pub mod finite_difference;
pub mod lm;
pub mod minimizer;
pub mod orchestrator;
pub mod problem;

pub use lm::{LevenbergMarquardt, LmConfig, LmResult};
pub use minimizer::{LmEngine, Minimizer, MinimizerRegistry, MinimizerSelection};
pub use orchestrator::{FitJob, FitOrchestrator, FitOutcome, FitResult, FitStatus, FitTask};
pub use problem::{FitProblem, Problem};
