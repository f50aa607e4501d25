use crate::test_helpers::{id, session_with_phase};
use approx::assert_relative_eq;
use powderfit_rs::parameters::{ArithmeticOp, Constraint, RelationalOp};

#[test]
fn test_dependent_follows_in_one_entry() {
    let mut session = session_with_phase();
    let x = id(&session, "instrument.resolution_x");
    let y = id(&session, "instrument.resolution_y");

    session
        .add_constraint(Constraint::object(y, 2.0, ArithmeticOp::Mul, x))
        .unwrap();
    let depth = session.history_depth();

    session.set_value(x, 5.0).unwrap();
    assert_relative_eq!(session.get(y).unwrap().value(), 10.0);
    assert_eq!(session.history_depth(), depth + 1);

    // One undo restores both
    session.undo().unwrap();
    assert_relative_eq!(session.get(x).unwrap().value(), 0.0);
    assert_relative_eq!(session.get(y).unwrap().value(), 0.0);

    session.redo().unwrap();
    assert_relative_eq!(session.get(y).unwrap().value(), 10.0);
}

#[test]
fn test_adding_constraint_evaluates_immediately() {
    let mut session = session_with_phase();
    let scale = id(&session, "pattern.scale");
    let index = session.add_constraint_text("pattern.scale < 80").unwrap();
    assert_eq!(index, 0);
    assert_relative_eq!(session.get(scale).unwrap().value(), 80.0);

    // Numeric constraints clamp, they do not pin
    session.set_value(scale, 20.0).unwrap();
    assert_relative_eq!(session.get(scale).unwrap().value(), 20.0);
    session.set_value(scale, 95.0).unwrap();
    assert_relative_eq!(session.get(scale).unwrap().value(), 80.0);

    session.undo().unwrap();
    session.undo().unwrap();
    session.undo().unwrap();
    assert!(session.constraints().is_empty());
    assert_relative_eq!(session.get(scale).unwrap().value(), 100.0);
}

#[test]
fn test_toggle_and_remove() {
    let mut session = session_with_phase();
    let a = id(&session, "phases.Dichlorine.cell.length_a");
    let c = id(&session, "phases.Dichlorine.cell.length_c");
    session
        .add_constraint(Constraint::object(c, 1.0, ArithmeticOp::Mul, a))
        .unwrap();
    assert_relative_eq!(session.get(c).unwrap().value(), 8.56);

    session.toggle_constraint(0, false).unwrap();
    session.set_value(a, 9.0).unwrap();
    assert_relative_eq!(session.get(c).unwrap().value(), 8.56);

    session.toggle_constraint(0, true).unwrap();
    assert_relative_eq!(session.get(c).unwrap().value(), 9.0);
    assert_eq!(session.undo_label(), Some("Enable constraint 1"));

    session.undo().unwrap();
    assert!(!session.constraints().get(0).unwrap().enabled());
    assert_relative_eq!(session.get(c).unwrap().value(), 8.56);

    session.remove_constraint(0).unwrap();
    assert!(session.constraints().is_empty());
    assert!(session.remove_constraint(0).is_err());
    session.undo().unwrap();
    assert_eq!(session.constraints().len(), 1);
}

#[test]
fn test_numeric_operators() {
    let mut session = session_with_phase();
    let w = id(&session, "instrument.resolution_w");
    session
        .add_constraint(Constraint::numeric(w, RelationalOp::GreaterEqual, 0.5))
        .unwrap();
    assert_relative_eq!(session.get(w).unwrap().value(), 0.5);

    session
        .add_constraint(Constraint::numeric(w, RelationalOp::Equal, 0.7))
        .unwrap();
    assert_relative_eq!(session.get(w).unwrap().value(), 0.7);
}
