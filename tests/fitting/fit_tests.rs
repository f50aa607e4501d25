use crate::test_helpers::{approx_eq, fit_ready_session, id, synthetic_data};
use approx::assert_relative_eq;
use powderfit_rs::{FitStatus, PowderFitError, Session};

fn free_count(session: &Session) -> usize {
    session
        .graph()
        .entries()
        .iter()
        .filter(|e| e.parameter.enabled() && !e.parameter.fixed())
        .count()
}

#[test]
fn test_fit_101_points_leastsq() {
    let mut session = fit_ready_session();
    let data = synthetic_data(
        &session,
        &[("pattern.scale", 130.0), ("pattern.zero_shift", 0.02)],
        None,
    );
    assert_eq!(data.len(), 101);
    session.load_experiment(data).unwrap();

    let scale = id(&session, "pattern.scale");
    let shift = id(&session, "pattern.zero_shift");
    session.set_fixed(scale, false).unwrap();
    session.set_fixed(shift, false).unwrap();
    assert_eq!(session.minimizers().selection().engine, "lmopt");
    assert_eq!(session.minimizers().selection().method, "leastsq");

    let nvarys = free_count(&session);
    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Succeeded);

    let result = session.fit_result().unwrap();
    assert!(result.success, "{}", result.message);
    assert_eq!(result.nvarys, nvarys);
    assert_eq!(result.nvarys, 2);
    assert!(result.gof < 1e-6);
    assert_relative_eq!(session.get(scale).unwrap().value(), 130.0, epsilon = 1e-3);
    assert_relative_eq!(session.get(shift).unwrap().value(), 0.02, epsilon = 1e-5);
}

#[test]
fn test_noisy_fit_reports_errors() {
    let mut session = fit_ready_session();
    let data = synthetic_data(&session, &[("pattern.scale", 120.0)], Some((7, 0.01)));
    session.load_experiment(data).unwrap();
    let scale = id(&session, "pattern.scale");
    session.set_fixed(scale, false).unwrap();

    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Succeeded);

    let fitted = session.get(scale).unwrap();
    assert!(approx_eq(fitted.value(), 120.0, 0.02), "scale {}", fitted.value());
    let error = fitted.error().unwrap();
    assert!(error > 0.0 && error < 5.0, "error {}", error);

    let result = session.fit_result().unwrap();
    assert!(result.redchi > 0.0);
    assert_relative_eq!(result.redchi, result.gof / 100.0, epsilon = 1e-12);
}

#[test]
fn test_fit_is_one_undo_entry() {
    let mut session = fit_ready_session();
    let data = synthetic_data(
        &session,
        &[("pattern.scale", 90.0), ("pattern.zero_shift", -0.01)],
        None,
    );
    session.load_experiment(data).unwrap();
    let scale = id(&session, "pattern.scale");
    let shift = id(&session, "pattern.zero_shift");
    session.set_fixed(scale, false).unwrap();
    session.set_fixed(shift, false).unwrap();
    let depth = session.history_depth();

    session.fit().unwrap();
    session.wait_fit();
    assert_eq!(session.history_depth(), depth + 1);
    assert_eq!(session.undo_label(), Some("Fit"));

    session.undo().unwrap();
    assert_eq!(session.get(scale).unwrap().value(), 100.0);
    assert_eq!(session.get(shift).unwrap().value(), 0.0);
    session.redo().unwrap();
    assert_relative_eq!(session.get(scale).unwrap().value(), 90.0, epsilon = 1e-3);
}

#[test]
fn test_derived_parameters_are_not_varied() {
    let mut session = fit_ready_session();
    let data = synthetic_data(&session, &[("pattern.scale", 110.0)], None);
    session.load_experiment(data).unwrap();

    let scale = id(&session, "pattern.scale");
    let a = id(&session, "phases.Dichlorine.cell.length_a");
    let b = id(&session, "phases.Dichlorine.cell.length_b");
    session.set_fixed(scale, false).unwrap();
    session.set_fixed(b, false).unwrap();
    session
        .add_constraint_text("phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a")
        .unwrap();

    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Succeeded);
    assert_eq!(session.fit_result().unwrap().nvarys, 1);
    assert_eq!(session.get(b).unwrap().value(), session.get(a).unwrap().value());
}

#[test]
fn test_fit_requires_data() {
    let mut session = fit_ready_session();
    assert!(matches!(
        session.fit(),
        Err(PowderFitError::InvalidExperiment(_))
    ));
    assert_eq!(session.fit_status(), FitStatus::Idle);
}

#[test]
fn test_damped_engine_methods() {
    for method in ["lm", "newton"] {
        let mut session = fit_ready_session();
        let data = synthetic_data(&session, &[("pattern.scale", 125.0)], None);
        session.load_experiment(data).unwrap();
        session.set_fixed(id(&session, "pattern.scale"), false).unwrap();
        session.select_engine("damped").unwrap();
        session.select_method(method).unwrap();

        session.fit().unwrap();
        assert_eq!(session.wait_fit(), FitStatus::Succeeded, "method {}", method);
        assert_relative_eq!(
            session.get(id(&session, "pattern.scale")).unwrap().value(),
            125.0,
            epsilon = 1e-3
        );
    }
}
