use crate::test_helpers::{id, session_with_phase};
use powderfit_rs::parameters::{ArithmeticOp, Constraint};
use powderfit_rs::PowderFitError;

#[test]
fn test_dependent_already_independent_is_cyclic() {
    let mut session = session_with_phase();
    let a = id(&session, "phases.Dichlorine.cell.length_a");
    let b = id(&session, "phases.Dichlorine.cell.length_b");
    let c = id(&session, "phases.Dichlorine.cell.length_c");

    session
        .add_constraint(Constraint::object(b, 1.0, ArithmeticOp::Mul, a))
        .unwrap();
    let before = session.constraints().clone();
    let values = session.graph().values();
    let depth = session.history_depth();

    let result = session.add_constraint(Constraint::object(a, 2.0, ArithmeticOp::Mul, c));
    assert!(matches!(result, Err(PowderFitError::CyclicConstraint(_))));
    assert_eq!(session.constraints(), &before);
    assert_eq!(session.graph().values(), values);
    assert_eq!(session.history_depth(), depth);
}

#[test]
fn test_self_reference_is_cyclic() {
    let mut session = session_with_phase();
    let a = id(&session, "phases.Dichlorine.cell.length_a");
    assert!(matches!(
        session.add_constraint(Constraint::object(a, 1.0, ArithmeticOp::Mul, a)),
        Err(PowderFitError::CyclicConstraint(_))
    ));
    assert!(session.constraints().is_empty());
}

#[test]
fn test_enabling_rechecks_cycles() {
    let mut session = session_with_phase();
    let a = id(&session, "phases.Dichlorine.cell.length_a");
    let b = id(&session, "phases.Dichlorine.cell.length_b");
    let c = id(&session, "phases.Dichlorine.cell.length_c");

    session
        .add_constraint(Constraint::object(a, 1.0, ArithmeticOp::Mul, c))
        .unwrap();
    session.toggle_constraint(0, false).unwrap();
    session
        .add_constraint(Constraint::object(b, 1.0, ArithmeticOp::Mul, a))
        .unwrap();

    assert!(matches!(
        session.toggle_constraint(0, true),
        Err(PowderFitError::CyclicConstraint(_))
    ));
    assert!(!session.constraints().get(0).unwrap().enabled());
}

#[test]
fn test_enabling_ahead_of_its_source_is_rejected() {
    let mut session = session_with_phase();
    let a = id(&session, "phases.Dichlorine.cell.length_a");
    let b = id(&session, "phases.Dichlorine.cell.length_b");
    let c = id(&session, "phases.Dichlorine.cell.length_c");

    session
        .add_constraint(Constraint::object(c, 1.0, ArithmeticOp::Mul, b))
        .unwrap();
    session.toggle_constraint(0, false).unwrap();
    session
        .add_constraint(Constraint::object(b, 1.0, ArithmeticOp::Mul, a))
        .unwrap();
    let depth = session.history_depth();

    // c = b would run before b = a and read a stale b
    assert!(matches!(
        session.toggle_constraint(0, true),
        Err(PowderFitError::CyclicConstraint(_))
    ));
    assert!(!session.constraints().get(0).unwrap().enabled());
    assert_eq!(session.history_depth(), depth);

    // A chain in list order propagates in one pass
    session.remove_constraint(0).unwrap();
    session
        .add_constraint(Constraint::object(c, 1.0, ArithmeticOp::Mul, b))
        .unwrap();
    session.set_value(a, 5.0).unwrap();
    assert_eq!(session.get(b).unwrap().value(), 5.0);
    assert_eq!(session.get(c).unwrap().value(), 5.0);

    session.undo().unwrap();
    assert_eq!(session.get(a).unwrap().value(), 8.56);
    assert_eq!(session.get(c).unwrap().value(), 8.56);
}

#[test]
fn test_text_constraints() {
    let mut session = session_with_phase();
    session
        .add_constraint_text("phases.Dichlorine.cell.length_b = phases.Dichlorine.cell.length_a")
        .unwrap();
    assert_eq!(
        session.constraints().get(0).unwrap().describe(session.graph()),
        "phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a"
    );

    assert!(matches!(
        session.add_constraint_text("phases.Nope.scale = 2 * pattern.scale"),
        Err(PowderFitError::Expression(_))
    ));
    assert!(matches!(
        session.add_constraint_text("pattern.scale ~ 2"),
        Err(PowderFitError::Expression(_))
    ));
    assert_eq!(session.constraints().len(), 1);
}
