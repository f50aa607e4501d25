use crate::test_helpers::{fit_ready_session, id, synthetic_data};
use ndarray::Array1;
use powderfit_rs::fitting::{LmEngine, LmResult};
use powderfit_rs::{
    CalculatorBackend, FitStatus, LmConfig, Minimizer, ParameterGraph, PowderFitError, Problem, Session,
    SessionConfig,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sleeps, then runs the bundled Levenberg-Marquardt engine.
#[derive(Debug)]
struct Sluggish {
    delay: Duration,
    inner: LmEngine,
}

impl Sluggish {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            inner: LmEngine::lmopt(LmConfig::default()),
        }
    }
}

impl Minimizer for Sluggish {
    fn name(&self) -> &str {
        "sluggish"
    }

    fn methods(&self) -> Vec<String> {
        vec!["leastsq".to_string()]
    }

    fn default_method(&self) -> &str {
        "leastsq"
    }

    fn minimize(&self, problem: &dyn Problem, initial: Array1<f64>, method: &str) -> powderfit_rs::Result<LmResult> {
        thread::sleep(self.delay);
        self.inner.minimize(problem, initial, method)
    }
}

#[derive(Debug)]
struct Exploding;

impl Minimizer for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn methods(&self) -> Vec<String> {
        vec!["boom".to_string()]
    }

    fn default_method(&self) -> &str {
        "boom"
    }

    fn minimize(&self, _problem: &dyn Problem, _initial: Array1<f64>, _method: &str) -> powderfit_rs::Result<LmResult> {
        Err(PowderFitError::Fit("matrix is singular".to_string()))
    }
}

#[derive(Debug)]
struct Constant(&'static str, f64);

impl CalculatorBackend for Constant {
    fn name(&self) -> &str {
        self.0
    }

    fn compute(&self, _graph: &ParameterGraph, x: &Array1<f64>) -> powderfit_rs::Result<Array1<f64>> {
        Ok(Array1::from_elem(x.len(), self.1))
    }
}

fn loaded_session() -> Session {
    let mut session = fit_ready_session();
    let data = synthetic_data(&session, &[("pattern.scale", 115.0)], None);
    session.load_experiment(data).unwrap();
    session.set_fixed(id(&session, "pattern.scale"), false).unwrap();
    session
}

#[test]
fn test_second_fit_is_rejected_while_running() {
    let mut session = loaded_session();
    session.register_minimizer(Arc::new(Sluggish::new(300))).unwrap();
    session.select_engine("sluggish").unwrap();
    let scale = id(&session, "pattern.scale");

    session.fit().unwrap();
    assert_eq!(session.fit_status(), FitStatus::Running);

    assert!(matches!(session.fit(), Err(PowderFitError::FitAlreadyRunning)));
    assert!(session.fit_result().is_none());
    assert!(matches!(
        session.set_value(scale, 1.0),
        Err(PowderFitError::FitAlreadyRunning)
    ));
    assert!(matches!(session.undo(), Err(PowderFitError::FitAlreadyRunning)));
    assert!(session.fit_elapsed().is_some());

    assert_eq!(session.wait_fit(), FitStatus::Succeeded);
    assert_eq!(session.fit_result().unwrap().nvarys, 1);
    assert_eq!(session.history_depth(), 3);
}

#[test]
fn test_poll_fit_until_done() {
    let mut session = loaded_session();
    session.register_minimizer(Arc::new(Sluggish::new(50))).unwrap();
    session.select_engine("sluggish").unwrap();

    session.fit().unwrap();
    let mut polls = 0;
    while !session.poll_fit() {
        polls += 1;
        assert!(polls < 2000, "fit never finished");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(session.fit_status(), FitStatus::Succeeded);
    assert!(!session.poll_fit());
}

#[test]
fn test_failed_fit_keeps_previous_result() {
    let mut session = loaded_session();
    let scale = id(&session, "pattern.scale");
    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Succeeded);
    let previous = session.fit_result().cloned().unwrap();
    let fitted = session.get(scale).unwrap().value();
    let depth = session.history_depth();

    session.register_minimizer(Arc::new(Exploding)).unwrap();
    session.select_engine("exploding").unwrap();
    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Failed);

    assert_eq!(session.fit_result(), Some(&previous));
    assert!(session.last_fit_error().unwrap().contains("singular"));
    assert_eq!(session.get(scale).unwrap().value(), fitted);
    assert_eq!(session.history_depth(), depth + 1);

    // Failed is idle: the session accepts edits and new fits
    session.select_engine("lmopt").unwrap();
    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Succeeded);
}

#[test]
fn test_unconverged_fit_writes_back_best_values() {
    let mut session = Session::with_config(SessionConfig::default().with_max_iterations(1)).unwrap();
    session.add_default_phase().unwrap();
    session.add_background_point(10.0, 0.0).unwrap();
    let data = synthetic_data(&session, &[("pattern.scale", 115.0)], None);
    session.load_experiment(data).unwrap();
    let scale = id(&session, "pattern.scale");
    session.set_fixed(scale, false).unwrap();
    session.reset_history();
    let start = session.get(scale).unwrap().value();

    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Failed);
    assert!(session.fit_result().is_none());
    assert!(session.last_fit_error().unwrap().contains("Maximum iterations"));

    let stopped = session.get(scale).unwrap().value();
    assert!((stopped - 115.0).abs() < (start - 115.0).abs());
    assert_eq!(session.history_depth(), 1);
    assert_eq!(session.undo_label(), Some("Fit"));

    session.undo().unwrap();
    assert_eq!(session.get(scale).unwrap().value(), start);
}

#[test]
fn test_unknown_engine_and_method_keep_selection() {
    let mut session = loaded_session();
    assert!(matches!(
        session.select_engine("bumps"),
        Err(PowderFitError::UnknownEngine(_))
    ));
    assert!(matches!(
        session.select_method("dream"),
        Err(PowderFitError::UnknownMethod { .. })
    ));
    assert_eq!(session.minimizers().selection().engine, "lmopt");
    assert_eq!(session.minimizers().selection().method, "leastsq");
}

#[test]
fn test_backend_switch_invalidates_curve() {
    let mut session = fit_ready_session();
    session.register_backend(Arc::new(Constant("Engine1", 1.0))).unwrap();
    session.register_backend(Arc::new(Constant("Engine2", 2.0))).unwrap();
    session.skip_experiment().unwrap();

    session.switch_calculator("Engine1").unwrap();
    let simulated = &session.plot_buffers().unwrap().simulated;
    assert!(simulated.iter().all(|v| *v == 1.0));

    session.switch_calculator("Engine2").unwrap();
    assert_eq!(session.calculator().current_name(), "Engine2");
    let simulated = &session.plot_buffers().unwrap().simulated;
    assert!(simulated.iter().all(|v| *v == 2.0));

    assert!(matches!(
        session.switch_calculator("cryspy"),
        Err(PowderFitError::UnknownBackend(_))
    ));
    assert_eq!(session.calculator().current_name(), "Engine2");

    // Undoing the switch recomputes with the previous backend
    session.undo().unwrap();
    assert_eq!(session.calculator().current_name(), "Engine1");
    assert!(session.plot_buffers().unwrap().simulated.iter().all(|v| *v == 1.0));
}
