//! Peak-sum powder pattern
//!
//! Reflection positions come from the lattice metric, intensities from a
//! kinematic structure factor with an isotropic Debye–Waller term and the
//! Lorentz-polarisation factor. Widths follow the Caglioti relation
//! `FWHM² = U tan²θ + V tanθ + W`, with an optional Lorentzian part
//! `X tanθ + Y / cosθ`. Symmetry is not expanded: every listed atom site
//! contributes once.

use crate::parameters::graph::{Lattice, ParameterGraph, Phase};
use ndarray::Array1;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Largest Miller index visited in each direction.
const MAX_INDEX: i32 = 24;

/// Peaks further than this many FWHM from a point do not contribute to it.
const PROFILE_WINDOW: f64 = 20.0;

/// Reflections closer than this in 2θ (degrees) are merged into one peak.
const MERGE_TOLERANCE: f64 = 1e-7;

/// One merged reflection of a phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reflection {
    /// Bragg angle 2θ in degrees, before the zero shift.
    pub two_theta: f64,
    /// Integrated intensity including the phase scale.
    pub intensity: f64,
}

/// A peak ready to be profiled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub center: f64,
    pub intensity: f64,
    pub fwhm_gauss: f64,
    pub fwhm_lorentz: f64,
}

/// Relative scattering power of an element symbol. Charges and digits are
/// ignored (`O2-` is oxygen); unknown symbols scatter like neon.
pub fn scattering_power(specie: &str) -> f64 {
    let symbol: String = specie.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    match symbol.as_str() {
        "H" => 1.0,
        "He" => 2.0,
        "Li" => 3.0,
        "B" => 5.0,
        "C" => 6.0,
        "N" => 7.0,
        "O" => 8.0,
        "F" => 9.0,
        "Na" => 11.0,
        "Mg" => 12.0,
        "Al" => 13.0,
        "Si" => 14.0,
        "P" => 15.0,
        "S" => 16.0,
        "Cl" => 17.0,
        "K" => 19.0,
        "Ca" => 20.0,
        "Ti" => 22.0,
        "Mn" => 25.0,
        "Fe" => 26.0,
        "Co" => 27.0,
        "Ni" => 28.0,
        "Cu" => 29.0,
        "Zn" => 30.0,
        "Sr" => 38.0,
        "Ba" => 56.0,
        "La" => 57.0,
        "Tb" => 65.0,
        "Pb" => 82.0,
        _ => 10.0,
    }
}

/// Reciprocal metric tensor of a cell, `None` for a degenerate cell.
pub fn reciprocal_metric(lattice: &Lattice) -> Option<[[f64; 3]; 3]> {
    let [a, b, c, alpha, beta, gamma] = lattice.cell();
    let (ca, cb, cg) = (
        alpha.to_radians().cos(),
        beta.to_radians().cos(),
        gamma.to_radians().cos(),
    );
    let g = [
        [a * a, a * b * cg, a * c * cb],
        [a * b * cg, b * b, b * c * ca],
        [a * c * cb, b * c * ca, c * c],
    ];

    let det = g[0][0] * (g[1][1] * g[2][2] - g[1][2] * g[2][1])
        - g[0][1] * (g[1][0] * g[2][2] - g[1][2] * g[2][0])
        + g[0][2] * (g[1][0] * g[2][1] - g[1][1] * g[2][0]);
    if !(det > 1e-12) || !det.is_finite() {
        return None;
    }

    let mut inv = [[0.0; 3]; 3];
    for (i, row) in inv.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            let (r0, r1) = ((j + 1) % 3, (j + 2) % 3);
            let (c0, c1) = ((i + 1) % 3, (i + 2) % 3);
            *value = (g[r0][c0] * g[r1][c1] - g[r0][c1] * g[r1][c0]) / det;
        }
    }
    Some(inv)
}

/// Merged reflections of a phase up to `two_theta_max` degrees.
pub fn reflections(phase: &Phase, wavelength: f64, two_theta_max: f64) -> Vec<Reflection> {
    let Some(gstar) = reciprocal_metric(&phase.lattice) else {
        return Vec::new();
    };
    if !(wavelength > 0.0) || phase.atoms().is_empty() {
        return Vec::new();
    }

    let theta_max = (two_theta_max.min(179.0) / 2.0).to_radians();
    let d_min = wavelength / (2.0 * theta_max.sin());
    let [a, b, c, ..] = phase.lattice.cell();
    let bound = |length: f64| ((length / d_min).floor() as i32).clamp(0, MAX_INDEX);
    let (hmax, kmax, lmax) = (bound(a), bound(b), bound(c));

    let atoms: Vec<_> = phase
        .atoms()
        .iter()
        .map(|atom| {
            (
                scattering_power(atom.specie()) * atom.occupancy.value(),
                [atom.fract_x.value(), atom.fract_y.value(), atom.fract_z.value()],
                atom.u_iso.value(),
            )
        })
        .collect();

    let mut found = Vec::new();
    for h in -hmax..=hmax {
        for k in -kmax..=kmax {
            for l in -lmax..=lmax {
                if h == 0 && k == 0 && l == 0 {
                    continue;
                }
                let hkl = [h as f64, k as f64, l as f64];
                let mut inv_d2 = 0.0;
                for i in 0..3 {
                    for j in 0..3 {
                        inv_d2 += hkl[i] * gstar[i][j] * hkl[j];
                    }
                }
                let sin_theta = wavelength * inv_d2.sqrt() / 2.0;
                if !(sin_theta > 0.0 && sin_theta < 1.0) {
                    continue;
                }
                let theta = sin_theta.asin();
                let two_theta = 2.0 * theta.to_degrees();
                if two_theta > two_theta_max {
                    continue;
                }

                let s2 = (sin_theta / wavelength).powi(2);
                let (mut re, mut im) = (0.0, 0.0);
                for (f, xyz, u_iso) in &atoms {
                    let debye_waller = (-8.0 * PI * PI * u_iso * s2).exp();
                    let phase_angle = 2.0 * PI * (hkl[0] * xyz[0] + hkl[1] * xyz[1] + hkl[2] * xyz[2]);
                    re += f * debye_waller * phase_angle.cos();
                    im += f * debye_waller * phase_angle.sin();
                }
                let f2 = re * re + im * im;
                if f2 < 1e-12 {
                    continue;
                }

                let cos_2theta = (2.0 * theta).cos();
                let lorentz_polarisation =
                    (1.0 + cos_2theta * cos_2theta) / (sin_theta * sin_theta * theta.cos());
                found.push(Reflection {
                    two_theta,
                    intensity: f2 * lorentz_polarisation,
                });
            }
        }
    }

    found.sort_by(|a, b| a.two_theta.total_cmp(&b.two_theta));
    let scale = phase.scale.value();
    let mut merged: Vec<Reflection> = Vec::with_capacity(found.len());
    for r in found {
        match merged.last_mut() {
            Some(last) if (r.two_theta - last.two_theta).abs() < MERGE_TOLERANCE => {
                last.intensity += r.intensity * scale;
            }
            _ => merged.push(Reflection {
                two_theta: r.two_theta,
                intensity: r.intensity * scale,
            }),
        }
    }
    merged
}

/// Peaks of every phase with instrument widths and the zero shift applied.
pub fn peaks(graph: &ParameterGraph, two_theta_max: f64) -> Vec<Peak> {
    let instrument = graph.instrument();
    let wavelength = instrument.wavelength.value();
    let (u, v, w) = (
        instrument.resolution_u.value(),
        instrument.resolution_v.value(),
        instrument.resolution_w.value(),
    );
    let (x, y) = (instrument.resolution_x.value(), instrument.resolution_y.value());
    let zero_shift = graph.pattern().zero_shift.value();

    graph
        .phases()
        .iter()
        .flat_map(|phase| reflections(phase, wavelength, two_theta_max))
        .map(|r| {
            let theta = (r.two_theta / 2.0).to_radians();
            let tan = theta.tan();
            let fwhm_gauss = (u * tan * tan + v * tan + w).max(1e-8).sqrt();
            let fwhm_lorentz = (x * tan + y / theta.cos()).max(0.0);
            Peak {
                center: r.two_theta + zero_shift,
                intensity: r.intensity,
                fwhm_gauss,
                fwhm_lorentz,
            }
        })
        .collect()
}

/// Area-normalised Gaussian.
pub fn gaussian(dx: f64, fwhm: f64) -> f64 {
    let ln2 = std::f64::consts::LN_2;
    (2.0 / fwhm) * (ln2 / PI).sqrt() * (-4.0 * ln2 * dx * dx / (fwhm * fwhm)).exp()
}

/// Area-normalised Lorentzian.
pub fn lorentzian(dx: f64, fwhm: f64) -> f64 {
    (2.0 / (PI * fwhm)) / (1.0 + 4.0 * dx * dx / (fwhm * fwhm))
}

/// `scale * Σ intensity * profile(x - center) + background(x)` over the grid,
/// evaluated in parallel. `profile` returns `(shape value, total fwhm)`.
pub fn sum_peaks<F>(graph: &ParameterGraph, x: &Array1<f64>, profile: F) -> Array1<f64>
where
    F: Fn(f64, &Peak) -> (f64, f64) + Sync,
{
    let two_theta_max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let peaks = if two_theta_max.is_finite() {
        // Peaks just above the grid still leak into it.
        peaks(graph, (two_theta_max + 5.0).min(179.0))
    } else {
        Vec::new()
    };
    let scale = graph.pattern().scale.value();
    let background = graph.background();

    let grid = x.to_vec();
    let values: Vec<f64> = grid
        .par_iter()
        .map(|&xi| {
            let signal: f64 = peaks
                .iter()
                .filter_map(|peak| {
                    let dx = xi - peak.center;
                    let (value, fwhm) = profile(dx, peak);
                    (dx.abs() <= PROFILE_WINDOW * fwhm).then_some(peak.intensity * value)
                })
                .sum();
            scale * signal + background.evaluate(xi)
        })
        .collect();
    Array1::from_vec(values)
}
