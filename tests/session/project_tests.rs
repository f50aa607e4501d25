use crate::test_helpers::{approx_eq, fit_ready_session, id, session_with_phase, synthetic_data};
use powderfit_rs::{FitStatus, PowderFitError, ProjectDocument, Session, SessionConfig, SimulationRange};
use serde_json::Value;

/// Snapshot of `session` as JSON, passed through `edit`.
fn edited_json(session: &Session, edit: impl FnOnce(&mut Value)) -> String {
    let mut value: Value = serde_json::from_str(&session.snapshot().to_json().unwrap()).unwrap();
    edit(&mut value);
    value.to_string()
}

#[test]
fn test_snapshot_round_trip_through_json() {
    let mut session = fit_ready_session();
    let data = synthetic_data(&session, &[("pattern.scale", 125.0)], None);
    session.load_experiment(data).unwrap();
    session.set_fixed(id(&session, "pattern.scale"), false).unwrap();
    session
        .add_constraint_text("phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a")
        .unwrap();
    session.select_engine("damped").unwrap();
    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Succeeded);

    let json = session.snapshot().to_json().unwrap();
    let document = ProjectDocument::from_json(&json).unwrap();

    let mut restored = Session::new();
    restored.add_default_phase().unwrap();
    assert!(restored.can_undo());
    restored.restore(document).unwrap();

    assert!(!restored.can_undo());
    assert!(!restored.can_redo());
    assert_eq!(restored.constraints().len(), 1);
    assert_eq!(restored.minimizers().selection().engine, "damped");
    assert_eq!(restored.minimizers().selection().method, "lm");
    assert!(restored.experiment().state.is_loaded());
    assert_eq!(restored.fit_status(), FitStatus::Idle);

    let scale = id(&restored, "pattern.scale");
    assert!(approx_eq(
        restored.get(scale).unwrap().value(),
        session.get(id(&session, "pattern.scale")).unwrap().value(),
        1e-12
    ));
    assert!(!restored.get(scale).unwrap().fixed());
    let result = restored.fit_result().unwrap();
    assert_eq!(result.nvarys, 1);
    assert!(restored.plot_buffers().is_some());
}

#[test]
fn test_restored_session_keeps_allocating_fresh_ids() {
    let session = fit_ready_session();
    let document = ProjectDocument::from_json(&session.snapshot().to_json().unwrap()).unwrap();

    let mut restored = Session::new();
    restored.restore(document).unwrap();
    let point = restored.add_background_point(20.0, 1.0).unwrap();
    assert!(restored.graph().path(point).unwrap().starts_with("background"));
    assert_eq!(
        restored.graph().entries().iter().filter(|e| e.parameter.id() == point).count(),
        1
    );
}

#[test]
fn test_newer_format_is_rejected() {
    let session = fit_ready_session();
    let mut document = session.snapshot();
    document.version += 1;
    let json = document.to_json().unwrap();
    assert!(matches!(
        ProjectDocument::from_json(&json),
        Err(PowderFitError::InvalidInput(_))
    ));
}

#[test]
fn test_restore_with_unknown_calculator_keeps_session() {
    let mut session = fit_ready_session();
    let mut document = session.snapshot();
    document.calculator = "cryspy".to_string();
    document.graph = Session::new().graph().clone();

    assert!(matches!(
        session.restore(document),
        Err(PowderFitError::UnknownBackend(_))
    ));
    assert_eq!(session.graph().phases().len(), 1);
}

#[test]
fn test_config_selects_bundled_engines() {
    let config = SessionConfig::new().with_calculator("gaussian").with_engine("damped");
    let session = Session::with_config(config).unwrap();
    assert_eq!(session.calculator().current_name(), "gaussian");
    assert_eq!(session.minimizers().selection().engine, "damped");

    let config = SessionConfig::new().with_calculator("cryspy");
    assert!(matches!(
        Session::with_config(config),
        Err(PowderFitError::UnknownBackend(_))
    ));
    let config = SessionConfig::new().with_engine("bumps");
    assert!(matches!(
        Session::with_config(config),
        Err(PowderFitError::UnknownEngine(_))
    ));
}

#[test]
fn test_inconsistent_documents_are_rejected() {
    let mut source = session_with_phase();
    source.add_background_point(10.0, 1.0).unwrap();
    source.add_background_point(20.0, 2.0).unwrap();
    source
        .add_constraint_text("phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a")
        .unwrap();
    source
        .add_constraint_text("phases.Dichlorine.cell.length_c = 1 * phases.Dichlorine.cell.length_b")
        .unwrap();

    // Two phases with one name
    let json = edited_json(&source, |v| {
        let phase = v["graph"]["phases"][0].clone();
        v["graph"]["phases"].as_array_mut().unwrap().push(phase);
    });
    assert!(ProjectDocument::from_json(&json).is_err());

    // Two atoms with one label
    let json = edited_json(&source, |v| {
        let atoms = v["graph"]["phases"][0]["atoms"].as_array_mut().unwrap();
        let atom = atoms[0].clone();
        atoms.push(atom);
    });
    assert!(ProjectDocument::from_json(&json).is_err());

    // Background out of order
    let json = edited_json(&source, |v| {
        v["graph"]["background"]["points"].as_array_mut().unwrap().reverse();
    });
    assert!(ProjectDocument::from_json(&json).is_err());

    let mut session = fit_ready_session();
    session.set_value(id(&session, "pattern.scale"), 42.0).unwrap();
    let before = session.snapshot();

    // length_b is read before the constraint that sets it
    let json = edited_json(&source, |v| {
        v["constraints"]["constraints"].as_array_mut().unwrap().reverse();
    });
    let document = ProjectDocument::from_json(&json).unwrap();
    assert!(matches!(
        session.restore(document),
        Err(PowderFitError::CyclicConstraint(_))
    ));

    // Constraint on a parameter the graph does not have
    let mut document = fit_ready_session().snapshot();
    document.constraints = source.constraints().clone();
    document.graph = Session::new().graph().clone();
    assert!(matches!(
        session.restore(document),
        Err(PowderFitError::UnknownParameter(_))
    ));

    // Simulation grid too large to build
    let mut document = source.snapshot();
    document.experiment.range = SimulationRange {
        x_min: 0.0,
        x_max: 180.0,
        x_step: 1e-12,
    };
    assert!(matches!(
        session.restore(document),
        Err(PowderFitError::InvalidInput(_))
    ));

    assert_eq!(session.snapshot(), before);
    assert!(session.can_undo());
}
