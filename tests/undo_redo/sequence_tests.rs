use crate::test_helpers::{id, session_with_phase};
use powderfit_rs::{ParamId, RefreshGroup, Session};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

const EDITABLE: [&str; 5] = [
    "pattern.scale",
    "pattern.zero_shift",
    "phases.Dichlorine.cell.length_a",
    "phases.Dichlorine.atoms.Cl1.fract_x",
    "instrument.resolution_w",
];

fn editable(session: &Session) -> Vec<ParamId> {
    EDITABLE.iter().map(|p| id(session, p)).collect()
}

fn random_edits(session: &mut Session, rng: &mut ChaCha8Rng, count: usize) {
    let ids = editable(session);
    for _ in 0..count {
        let target = ids[rng.gen_range(0..ids.len())];
        let value = rng.gen_range(0.1..10.0);
        session.set_value(target, value).unwrap();
    }
}

#[test]
fn test_undo_restores_initial_values() {
    for seed in 0..8 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut session = session_with_phase();
        let before: BTreeMap<ParamId, f64> = session.graph().values();
        let depth = session.history_depth();

        let count = rng.gen_range(1..20);
        random_edits(&mut session, &mut rng, count);
        assert_eq!(session.history_depth(), depth + count);

        for _ in 0..count {
            assert!(session.undo().unwrap().is_some());
        }
        assert_eq!(session.graph().values(), before, "seed {}", seed);
    }
}

#[test]
fn test_redo_reproduces_undone_state() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut session = session_with_phase();
    random_edits(&mut session, &mut rng, 12);
    let after = session.graph().clone();

    for _ in 0..5 {
        session.undo().unwrap();
    }
    assert!(session.can_redo());
    for _ in 0..5 {
        session.redo().unwrap();
    }
    assert_eq!(session.graph(), &after);
    assert!(!session.can_redo());
}

#[test]
fn test_new_commit_discards_redo() {
    let mut session = session_with_phase();
    let scale = id(&session, "pattern.scale");
    let shift = id(&session, "pattern.zero_shift");

    session.set_value(scale, 110.0).unwrap();
    session.set_value(scale, 120.0).unwrap();
    session.undo().unwrap();
    assert_eq!(session.redo_label(), Some("Edit pattern.scale"));

    session.set_value(shift, 0.05).unwrap();
    assert!(!session.can_redo());
    assert_eq!(session.redo().unwrap(), None);
    assert_eq!(session.get(scale).unwrap().value(), 110.0);
}

#[test]
fn test_empty_history() {
    let mut session = Session::new();
    assert!(!session.can_undo());
    assert_eq!(session.undo().unwrap(), None);
    assert_eq!(session.redo().unwrap(), None);
    assert_eq!(session.undo_label(), None);
}

#[test]
fn test_refresh_groups() {
    let mut session = session_with_phase();

    session.set_value(id(&session, "pattern.scale"), 50.0).unwrap();
    assert_eq!(session.undo().unwrap(), Some(RefreshGroup::Parameters));

    session
        .set_value(id(&session, "phases.Dichlorine.cell.length_c"), 6.5)
        .unwrap();
    assert_eq!(session.undo().unwrap(), Some(RefreshGroup::Structure));

    session.select_engine("damped").unwrap();
    assert_eq!(session.undo().unwrap(), Some(RefreshGroup::None));
    assert_eq!(session.minimizers().selection().engine, "lmopt");
    assert_eq!(session.redo().unwrap(), Some(RefreshGroup::None));
    assert_eq!(session.minimizers().selection().method, "lm");
}

#[test]
fn test_flag_edits_are_undoable() {
    let mut session = session_with_phase();
    let scale = id(&session, "pattern.scale");

    session.set_fixed(scale, false).unwrap();
    session.set_enabled(scale, false).unwrap();
    assert!(session.list_visible("pattern.scale").is_empty());

    session.undo().unwrap();
    assert_eq!(session.list_visible("pattern.scale").len(), 1);
    session.undo().unwrap();
    assert!(session.get(scale).unwrap().fixed());
}
