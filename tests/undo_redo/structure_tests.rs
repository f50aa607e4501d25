use crate::test_helpers::{id, session_with_phase};
use powderfit_rs::{ExperimentData, ExperimentState, PowderFitError, Session};

#[test]
fn test_add_and_remove_phase() {
    let mut session = Session::new();
    assert_eq!(session.add_default_phase().unwrap(), "Dichlorine");
    assert_eq!(session.add_default_phase().unwrap(), "Dichlorine2");
    assert_eq!(session.graph().phases().len(), 2);

    session.undo().unwrap();
    assert_eq!(session.graph().phases().len(), 1);
    session.redo().unwrap();
    assert_eq!(session.graph().phases()[1].name(), "Dichlorine2");
}

#[test]
fn test_remove_phase_restores_ids_and_constraints() {
    let mut session = session_with_phase();
    let a = id(&session, "phases.Dichlorine.cell.length_a");
    let b = id(&session, "phases.Dichlorine.cell.length_b");
    let before = session.graph().phases()[0].parameter_ids();

    session
        .add_constraint_text("phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a")
        .unwrap();
    session.add_constraint_text("pattern.scale <= 500").unwrap();
    assert_eq!(session.constraints().len(), 2);

    session.remove_phase("Dichlorine").unwrap();
    assert!(session.graph().phases().is_empty());
    assert_eq!(session.constraints().len(), 1);
    assert!(session.get(a).is_err());

    session.undo().unwrap();
    assert_eq!(session.graph().phases()[0].parameter_ids(), before);
    assert_eq!(session.constraints().len(), 2);
    assert_eq!(session.constraints().get(0).unwrap().dependent(), b);
    assert_eq!(session.constraints().get(0).unwrap().independent(), Some(a));

    // The restored constraint is live again
    session.set_value(a, 9.1).unwrap();
    assert_eq!(session.get(b).unwrap().value(), 9.1);
}

#[test]
fn test_rename_phase_and_space_group() {
    let mut session = session_with_phase();
    session.rename_phase("Dichlorine", "Cl2").unwrap();
    assert!(session.graph().find("phases.Cl2.cell.length_a").is_some());

    session.add_default_phase().unwrap();
    assert!(matches!(
        session.rename_phase("Dichlorine", "Cl2"),
        Err(PowderFitError::DuplicateName(_))
    ));

    session.set_space_group("Cl2", "P m -3 m").unwrap();
    assert_eq!(session.graph().phase("Cl2").unwrap().space_group(), "P m -3 m");

    session.undo().unwrap();
    session.undo().unwrap();
    session.undo().unwrap();
    let phase = &session.graph().phases()[0];
    assert_eq!(phase.name(), "Dichlorine");
    assert_eq!(phase.space_group(), "P 42/n c m");
}

#[test]
fn test_atoms() {
    let mut session = session_with_phase();
    let label = session.add_default_atom("Dichlorine").unwrap();
    assert_eq!(label, "Label2");
    let x = id(&session, "phases.Dichlorine.atoms.Label2.fract_x");
    assert_eq!(session.get(x).unwrap().value(), 0.05);

    session
        .add_constraint_text("phases.Dichlorine.atoms.Label2.fract_y = 1 * phases.Dichlorine.atoms.Cl1.fract_y")
        .unwrap();
    session.remove_atom("Dichlorine", "Label2").unwrap();
    assert!(session.constraints().is_empty());
    assert!(session.remove_atom("Dichlorine", "Label2").is_err());

    session.undo().unwrap();
    assert_eq!(session.constraints().len(), 1);
    assert_eq!(session.graph().phases()[0].atoms().len(), 2);
}

#[test]
fn test_background_points() {
    let mut session = session_with_phase();
    let y = session.add_background_point(20.0, 5.0).unwrap();
    session.add_background_point(40.0, 3.0).unwrap();
    assert!(session.add_background_point(20.0, 1.0).is_err());
    assert_eq!(session.graph().background().evaluate(30.0), 4.0);

    session.remove_background_point(20.0).unwrap();
    assert!(session.get(y).is_err());
    session.undo().unwrap();
    assert_eq!(session.get(y).unwrap().value(), 5.0);
    assert!(session.graph().find("background.points[20].y").is_some());
}

#[test]
fn test_load_experiment_is_undoable() {
    let mut session = session_with_phase();
    let data = ExperimentData::new(
        "run1",
        vec![10.0, 11.0, 12.0],
        vec![4.0, 2.0, 3.0],
        vec![1.0, 1.0, 1.0],
    )
    .unwrap();
    session.load_experiment(data).unwrap();

    let points = session.graph().background().points();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].x(), 10.0);
    assert_eq!(points[1].x(), 12.0);
    assert_eq!(points[1].y.value(), 2.0);
    assert_eq!(session.experiment().range.x_max, 12.0);

    session.undo().unwrap();
    assert_eq!(session.experiment().state, ExperimentState::NotSet);
    assert!(session.graph().background().is_empty());
    assert!(session.plot_buffers().is_none());

    session.redo().unwrap();
    assert!(session.experiment().state.is_loaded());
    assert_eq!(session.plot_buffers().unwrap().len(), 3);
}
