use crate::test_helpers::{fit_ready_session, session_with_phase};
use powderfit_rs::{ExperimentData, PowderFitError, Session, SessionConfig, SimulationRange};
use std::io::Write;

const XYE: &str = "# d1a
10.0 100.0 10.0
10.5 120.0 11.0
11.0 90.0 9.5
";

#[test]
fn test_malformed_text_keeps_previous_data() {
    let mut session = fit_ready_session();
    session.load_experiment_text("d1a", XYE).unwrap();
    let depth = session.history_depth();

    let malformed = ["10.0 1.0\n9.0 2.0\n", "10.0 abc\n", "10.0\n", "", "10.0 1.0 -1.0\n"];
    for text in malformed {
        assert!(
            matches!(
                session.load_experiment_text("bad", text),
                Err(PowderFitError::InvalidExperiment(_))
            ),
            "accepted {:?}",
            text
        );
    }
    assert_eq!(session.experiment().state.data().unwrap().name(), "d1a");
    assert_eq!(session.history_depth(), depth);
}

#[test]
fn test_unequal_lengths_rejected() {
    let result = ExperimentData::new("d", vec![1.0, 2.0], vec![1.0], vec![1.0, 1.0]);
    assert!(matches!(result, Err(PowderFitError::InvalidExperiment(_))));
}

#[test]
fn test_two_column_uncertainties() {
    let data = ExperimentData::from_xye("two", "10.0 100.0\n10.5 0.25\n").unwrap();
    assert_eq!(data.e_slice(), &[10.0, 1.0]);
}

#[test]
fn test_load_from_path_uses_file_stem() {
    let path = std::env::temp_dir().join(format!("powderfit-{}-hrpt.xye", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(XYE.as_bytes()).unwrap();
    drop(file);

    let mut session = fit_ready_session();
    session.load_experiment_path(&path).unwrap();
    let name = session.experiment().state.data().unwrap().name().to_string();
    std::fs::remove_file(&path).unwrap();

    assert!(name.ends_with("hrpt"));
    assert_eq!(session.experiment().range.x_min, 10.0);
    assert_eq!(session.experiment().range.x_max, 11.0);
    assert!(session.load_experiment_path(&path).is_err());
}

#[test]
fn test_load_adds_background_to_empty_sample() {
    let mut session = session_with_phase();
    assert!(session.graph().background().is_empty());
    session.load_experiment_text("d1a", XYE).unwrap();

    let background = session.graph().background();
    assert_eq!(background.evaluate(10.0), 90.0);
    assert_eq!(background.evaluate(11.0), 90.0);
    assert!(session.graph().find("background.points[10].y").is_some());
    assert!(session.graph().find("background.points[11].y").is_some());
}

#[test]
fn test_plot_follows_experiment_slot() {
    let mut session = fit_ready_session();
    assert!(session.plot_buffers().is_none());

    session.skip_experiment().unwrap();
    let buffers = session.plot_buffers().unwrap();
    assert!(buffers.measured.is_none());
    assert!(!buffers.is_empty());

    session.load_experiment_text("d1a", XYE).unwrap();
    let buffers = session.plot_buffers().unwrap();
    assert_eq!(buffers.len(), 3);
    assert!(buffers.residual.is_some());

    session.remove_experiment().unwrap();
    assert!(session.plot_buffers().is_none());
    session.undo().unwrap();
    assert_eq!(session.plot_buffers().unwrap().len(), 3);
}

#[test]
fn test_simulation_range_validation() {
    let mut session = fit_ready_session();
    session.skip_experiment().unwrap();
    let bad = SimulationRange {
        x_min: 20.0,
        x_max: 10.0,
        x_step: 0.1,
    };
    assert!(matches!(
        session.set_simulation_range(bad),
        Err(PowderFitError::InvalidInput(_))
    ));

    let range = SimulationRange {
        x_min: 10.0,
        x_max: 12.0,
        x_step: 0.5,
    };
    session.set_simulation_range(range).unwrap();
    assert_eq!(session.plot_buffers().unwrap().len(), 5);
    assert_eq!(session.undo_label(), Some("Simulation range"));
}

#[test]
fn test_unbounded_and_oversized_ranges_rejected() {
    let mut session = fit_ready_session();
    let before = session.experiment().range;
    let depth = session.history_depth();

    let infinite = SimulationRange {
        x_min: 0.0,
        x_max: f64::INFINITY,
        x_step: 0.1,
    };
    assert!(matches!(
        session.set_simulation_range(infinite),
        Err(PowderFitError::InvalidInput(_))
    ));
    let dense = SimulationRange {
        x_min: 0.0,
        x_max: 100.0,
        x_step: 1e-9,
    };
    assert!(matches!(
        session.set_simulation_range(dense),
        Err(PowderFitError::InvalidInput(_))
    ));
    assert_eq!(session.experiment().range, before);
    assert_eq!(session.history_depth(), depth);

    // Skipping still simulates on the previous grid
    session.skip_experiment().unwrap();
    assert_eq!(session.plot_buffers().unwrap().len(), before.grid().len());

    let config = SessionConfig::default().with_max_grid_points(100);
    assert!(Session::with_config(config).is_err());
}
