//! Simulate a pattern for the default phase, perturb the sample and fit it
//! back.
//!
//! Run with `RUST_LOG=powderfit_rs=debug` to see the session log.

use powderfit_rs::calculator::{CalculatorBackend, PseudoVoigtBackend};
use powderfit_rs::{ExperimentData, FitStatus, Session, UiValue};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Simulate and fit");
    println!("================\n");

    let mut session = Session::new();
    let phase = session.add_default_phase()?;
    session.add_background_point(10.0, 2.0)?;
    session.add_background_point(60.0, 2.0)?;

    // Measured data: the same sample with a larger scale and a zero shift
    let mut truth = session.graph().clone();
    let scale = truth.find("pattern.scale").ok_or("no scale parameter")?;
    let shift = truth.find("pattern.zero_shift").ok_or("no zero shift parameter")?;
    truth.set_value(scale, 142.0)?;
    truth.set_value(shift, 0.035)?;

    let x: Vec<f64> = (0..=5000).map(|i| 10.0 + 0.01 * i as f64).collect();
    let y = PseudoVoigtBackend::default().compute(&truth, &ndarray::Array1::from_vec(x.clone()))?;
    let e: Vec<f64> = y.iter().map(|v| v.abs().sqrt().max(1.0)).collect();
    session.load_experiment(ExperimentData::new("simulated", x, y.to_vec(), e)?)?;

    session.set_fixed(scale, false)?;
    session.set_fixed(shift, false)?;
    println!("Phase {} loaded, {} free parameters", phase, session.graph().free_parameters().len());

    session.fit()?;
    while !session.poll_fit() {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    match session.fit_status() {
        FitStatus::Succeeded => {
            let result = session.fit_result().ok_or("fit result missing")?;
            println!("\nFit converged in {} iterations", result.iterations);
            println!("  chi-square:         {:.6e}", result.gof);
            println!("  reduced chi-square: {:.6e}", result.redchi);
        }
        status => {
            println!("\nFit ended as {}: {}", status.as_str(), session.last_fit_error().unwrap_or(""));
        }
    }

    println!("\nParameters:");
    for row in session.list_visible("pattern") {
        let error = row.error.map_or("-".to_string(), |e| format!("{:.2e}", e));
        println!("  {:3} {:<24} {:>12.6} +/- {}", row.index, row.path, row.value, error);
    }

    println!("\nUndo: {}", session.undo_label().unwrap_or("nothing"));
    session.undo()?;
    println!("After undo, scale = {}", session.get(scale)?.value());

    if let UiValue::Object(status) = session.status_as_obj() {
        println!("\nStatus:");
        for (key, value) in status {
            println!("  {}: {}", key, value.to_json()?);
        }
    }

    Ok(())
}
