//! Background fit execution.
//!
//! A [`FitJob`] owns everything a fit needs (a snapshot of the sample, the
//! data, the backend and the minimizer) so it can run on its own thread. The
//! [`FitOrchestrator`] allows one job in flight at a time and records the
//! outcome when the dispatch thread collects it.

use crate::error::{PowderFitError, Result};
use crate::fitting::covariance::{covariance_matrix, reduced_chi_square, standard_errors};
use crate::fitting::minimizer::Minimizer;
use crate::fitting::problem::{FitProblem, Problem};
use crate::parameters::parameter::ParamId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of the orchestrator. `Succeeded` and `Failed` are idle states
/// that remember how the last fit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl FitStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary statistics of a finished fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub success: bool,
    /// Number of varied parameters.
    pub nvarys: usize,
    /// Goodness of fit: weighted sum of squared residuals.
    pub gof: f64,
    /// `gof / max(n - nvarys, 1)`.
    pub redchi: f64,
    pub iterations: usize,
    pub message: String,
}

/// Everything a finished job hands back to the dispatch thread.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub result: FitResult,
    /// Best-fit values of the free parameters.
    pub values: Vec<(ParamId, f64)>,
    /// Standard errors, `None` where the covariance is unavailable.
    pub errors: Vec<(ParamId, Option<f64>)>,
    pub elapsed: Duration,
}

/// A self-contained fit ready to run on any thread.
#[derive(Debug)]
pub struct FitJob {
    problem: FitProblem,
    minimizer: Arc<dyn Minimizer>,
    method: String,
}

impl FitJob {
    pub fn new(problem: FitProblem, minimizer: Arc<dyn Minimizer>, method: &str) -> Self {
        Self {
            problem,
            minimizer,
            method: method.to_string(),
        }
    }

    /// Run the minimization to completion on the calling thread.
    pub fn run(&self) -> Result<FitOutcome> {
        let start = Instant::now();
        let problem = &self.problem;
        let initial = problem.initial_internal()?;
        debug!(
            engine = self.minimizer.name(),
            method = %self.method,
            nvarys = problem.parameter_count(),
            points = problem.residual_count(),
            "fit job started"
        );

        let lm = self.minimizer.minimize(problem, initial, &self.method)?;

        let nvarys = problem.parameter_count();
        let redchi = reduced_chi_square(lm.cost, problem.residual_count(), nvarys);
        let external = problem.to_external(&lm.params);
        let sigma = lm
            .jacobian
            .as_ref()
            .filter(|_| nvarys > 0)
            .and_then(|jac| covariance_matrix(jac, redchi))
            .map(|covar| problem.external_errors(&lm.params, &standard_errors(&covar)));

        let free = problem.free();
        let values = free.iter().copied().zip(external).collect();
        let errors = match sigma {
            Some(sigma) => free
                .iter()
                .copied()
                .zip(sigma.into_iter().map(|s| Some(s).filter(|s| s.is_finite())))
                .collect(),
            None => free.iter().map(|id| (*id, None)).collect(),
        };

        Ok(FitOutcome {
            result: FitResult {
                success: lm.success,
                nvarys,
                gof: lm.cost,
                redchi,
                iterations: lm.iterations,
                message: lm.message,
            },
            values,
            errors,
            elapsed: start.elapsed(),
        })
    }
}

/// Handle on a job running on the `fit-worker` thread.
#[derive(Debug)]
pub struct FitTask {
    handle: Option<JoinHandle<Result<FitOutcome>>>,
    started: Instant,
}

impl FitTask {
    pub fn spawn(job: FitJob) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("fit-worker".to_string())
            .spawn(move || job.run())?;
        Ok(Self {
            handle: Some(handle),
            started: Instant::now(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The job's result if it has finished, without blocking.
    pub fn try_take(&mut self) -> Option<Result<FitOutcome>> {
        if !self.is_finished() {
            return None;
        }
        self.handle.take().map(join)
    }

    /// Block until the job finishes.
    pub fn wait(mut self) -> Result<FitOutcome> {
        match self.handle.take() {
            Some(handle) => join(handle),
            None => Err(PowderFitError::Fit("fit result already collected".to_string())),
        }
    }
}

fn join(handle: JoinHandle<Result<FitOutcome>>) -> Result<FitOutcome> {
    handle
        .join()
        .unwrap_or_else(|_| Err(PowderFitError::Fit("fit worker panicked".to_string())))
}

/// Allows one fit in flight and keeps the last good result.
#[derive(Debug, Default)]
pub struct FitOrchestrator {
    status: FitStatus,
    task: Option<FitTask>,
    result: Option<FitResult>,
    last_error: Option<String>,
    last_elapsed: Option<Duration>,
}

impl FitOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Result of the last successful fit.
    pub fn result(&self) -> Option<&FitResult> {
        self.result.as_ref()
    }

    /// Message of the last failed fit, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Time spent by the running fit, or by the last one.
    pub fn elapsed(&self) -> Option<Duration> {
        self.task.as_ref().map(FitTask::elapsed).or(self.last_elapsed)
    }

    /// Replace the remembered result, e.g. from a restored project.
    pub(crate) fn reset(&mut self, result: Option<FitResult>) {
        self.status = FitStatus::Idle;
        self.result = result;
        self.last_error = None;
        self.last_elapsed = None;
    }

    /// Start `job` on the worker thread.
    pub fn launch(&mut self, job: FitJob) -> Result<()> {
        if self.is_running() {
            warn!("fit requested while another fit is running");
            return Err(PowderFitError::FitAlreadyRunning);
        }
        self.task = Some(FitTask::spawn(job)?);
        self.status = FitStatus::Running;
        info!("fit started");
        Ok(())
    }

    /// Collect the running job if it has finished.
    pub fn poll(&mut self) -> Option<Result<FitOutcome>> {
        let outcome = self.task.as_mut()?.try_take()?;
        Some(self.finish(outcome))
    }

    /// Block until the running job finishes. `None` when nothing is running.
    pub fn wait(&mut self) -> Option<Result<FitOutcome>> {
        let task = self.task.take()?;
        let outcome = task.wait();
        Some(self.finish(outcome))
    }

    fn finish(&mut self, outcome: Result<FitOutcome>) -> Result<FitOutcome> {
        self.last_elapsed = self.task.take().map(|t| t.elapsed()).or(self.last_elapsed);
        match &outcome {
            Ok(done) if done.result.success => {
                info!(
                    nvarys = done.result.nvarys,
                    redchi = done.result.redchi,
                    iterations = done.result.iterations,
                    "fit succeeded"
                );
                self.last_elapsed = Some(done.elapsed);
                self.status = FitStatus::Succeeded;
                self.result = Some(done.result.clone());
                self.last_error = None;
            }
            Ok(done) => {
                warn!(message = %done.result.message, "fit did not converge");
                self.last_elapsed = Some(done.elapsed);
                self.status = FitStatus::Failed;
                self.last_error = Some(done.result.message.clone());
            }
            Err(e) => {
                warn!(error = %e, "fit failed");
                self.status = FitStatus::Failed;
                self.last_error = Some(e.to_string());
            }
        }
        outcome
    }
}
