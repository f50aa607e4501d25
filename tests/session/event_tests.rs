use crate::test_helpers::{fit_ready_session, id, session_with_phase};
use powderfit_rs::parameters::{IdAllocator, Phase};
use powderfit_rs::{Event, FitStatus, PowderFitError, UiValue};
use std::sync::{Arc, Mutex};

fn recorder(session: &mut powderfit_rs::Session) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

#[test]
fn test_structural_edit_events() {
    let mut session = session_with_phase();
    session.skip_experiment().unwrap();
    let seen = recorder(&mut session);

    session.add_default_phase().unwrap();
    let events = seen.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            Event::CalculatedDataChanged,
            Event::StructureChanged,
            Event::PhasesChanged,
            Event::ParametersChanged,
            Event::UndoRedoChanged,
        ]
    );
}

#[test]
fn test_no_recompute_without_experiment_slot() {
    let mut session = session_with_phase();
    let seen = recorder(&mut session);
    session.set_value(id(&session, "pattern.scale"), 50.0).unwrap();
    let events = seen.lock().unwrap().clone();
    assert_eq!(events, vec![Event::ParametersChanged, Event::UndoRedoChanged]);
}

#[test]
fn test_unsubscribed_handler_stops_receiving() {
    let mut session = session_with_phase();
    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    let subscription = session.subscribe(move |_| *sink.lock().unwrap() += 1);

    session.set_value(id(&session, "pattern.scale"), 50.0).unwrap();
    let after_first = *count.lock().unwrap();
    assert!(after_first > 0);

    assert!(session.unsubscribe(subscription));
    assert!(!session.unsubscribe(subscription));
    session.set_value(id(&session, "pattern.scale"), 60.0).unwrap();
    assert_eq!(*count.lock().unwrap(), after_first);
}

#[test]
fn test_fit_status_events() {
    let mut session = fit_ready_session();
    session.load_experiment_text("flat", "10.0 5.0 1.0\n10.5 5.0 1.0\n11.0 5.0 1.0\n").unwrap();
    session.set_fixed(id(&session, "background.points[10].y"), false).unwrap();
    let seen = recorder(&mut session);

    session.fit().unwrap();
    assert_eq!(session.wait_fit(), FitStatus::Succeeded);

    let events = seen.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&Event::FitStatusChanged(FitStatus::Running)));
    assert!(events.contains(&Event::FitStatusChanged(FitStatus::Succeeded)));
    assert!(events.contains(&Event::FitResultsChanged));
    assert_eq!(events.last(), Some(&Event::UndoRedoChanged));
}

#[test]
fn test_replace_phases_clears_history() {
    let mut session = session_with_phase();
    session
        .add_constraint_text("phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a")
        .unwrap();
    session.add_background_point(10.0, 1.0).unwrap();
    session
        .add_constraint_text("background.points[10].y < 5")
        .unwrap();
    assert!(session.can_undo());

    let silicon = Phase::new(session.ids_mut(), "Silicon", "F d -3 m", [5.43, 5.43, 5.43, 90.0, 90.0, 90.0]);
    session.replace_phases(vec![silicon]).unwrap();

    assert!(!session.can_undo());
    assert_eq!(session.graph().phases().len(), 1);
    assert!(session.graph().phase("Silicon").is_some());
    assert!(session.graph().find("phases.Dichlorine.cell.length_a").is_none());
    assert_eq!(session.constraints().len(), 1);
}

#[test]
fn test_replace_phases_rejects_colliding_ids() {
    let mut session = session_with_phase();
    session.add_background_point(10.0, 1.0).unwrap();
    let seen = recorder(&mut session);
    let graph = session.graph().clone();

    // Ids from a private allocator overlap the ones already in the session
    let mut ids = IdAllocator::new();
    let imported = Phase::new(&mut ids, "Silicon", "F d -3 m", [5.43, 5.43, 5.43, 90.0, 90.0, 90.0]);
    assert!(matches!(
        session.replace_phases(vec![imported]),
        Err(PowderFitError::DuplicateName(_))
    ));
    assert_eq!(session.graph(), &graph);
    assert!(session.can_undo());
    assert!(seen.lock().unwrap().is_empty());

    let silicon = Phase::new(session.ids_mut(), "Silicon", "F d -3 m", [5.43, 5.43, 5.43, 90.0, 90.0, 90.0]);
    session.replace_phases(vec![silicon]).unwrap();
    let added = session.add_default_phase().unwrap();
    assert_eq!(session.graph().phases().len(), 2);
    assert!(session.graph().phase(&added).is_some());
}

#[test]
fn test_parameter_table_rendering() {
    let mut session = session_with_phase();
    let rows = session.list_visible("cell.length");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(rows.iter().all(|r| r.path.contains("cell.length")));

    let scale = id(&session, "pattern.scale");
    session.set_enabled(scale, false).unwrap();
    assert!(session.list_visible("pattern.scale").is_empty());
    assert_eq!(session.list_visible("SCALE").len(), 1);
    session.set_enabled(scale, true).unwrap();

    let table = session.parameters_as_obj("pattern.scale");
    let UiValue::List(items) = &table else {
        panic!("expected a list, got {:?}", table);
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("path"), Some(&UiValue::from("pattern.scale")));
    assert_eq!(items[0].get("value").and_then(UiValue::as_f64), Some(100.0));
    assert_eq!(items[0].get("error"), Some(&UiValue::Null));

    let json = table.to_json().unwrap();
    assert_eq!(UiValue::from_json(&json).unwrap(), table);
}

#[test]
fn test_constraint_and_status_rendering() {
    let mut session = session_with_phase();
    session
        .add_constraint_text("phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a")
        .unwrap();
    session.toggle_constraint(0, false).unwrap();

    let constraints = session.constraints_as_obj();
    let UiValue::List(items) = &constraints else {
        panic!("expected a list, got {:?}", constraints);
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("index").and_then(UiValue::as_f64), Some(1.0));
    assert_eq!(items[0].get("enabled").and_then(UiValue::as_bool), Some(false));

    let status = session.status_as_obj();
    assert_eq!(status.get("constraints").and_then(UiValue::as_f64), Some(1.0));
    assert_eq!(status.get("can_undo"), Some(&UiValue::Bool(true)));
    assert_eq!(status.get("undo_label"), Some(&UiValue::from("Disable constraint 1")));
    assert_eq!(status.get("minimizer"), Some(&UiValue::from("lmopt")));
}
