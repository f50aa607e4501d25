//! The parameter graph
//!
//! The graph is the complete mutable scientific model of a session: an ordered
//! list of crystallographic phases, one pattern object, one instrument object
//! and a background. Every scalar in it is a [`Parameter`]; the containers own
//! them directly and the graph exposes id-based lookup across the whole tree.
//! Lookups go through an index from id and path to location, rebuilt after
//! every structural change.
//!
//! The graph itself knows nothing about undo/redo or notifications. The
//! session commits every user-visible change through the history stack and
//! only then calls the raw mutators here.

use crate::config::SampleDefaults;
use crate::error::{PowderFitError, Result};
use crate::parameters::bounds::Bounds;
use crate::parameters::parameter::{IdAllocator, ParamId, Parameter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Which kind of object owns a parameter. Undo entries are classified by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Phase, lattice or atom site.
    Phase,
    /// Pattern, instrument or background.
    Settings,
}

/// Unit cell lengths and angles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub length_a: Parameter,
    pub length_b: Parameter,
    pub length_c: Parameter,
    pub angle_alpha: Parameter,
    pub angle_beta: Parameter,
    pub angle_gamma: Parameter,
}

impl Lattice {
    pub fn new(ids: &mut IdAllocator, cell: [f64; 6]) -> Self {
        let length = |ids: &mut IdAllocator, name: &str, v: f64| {
            ids.parameter(name, v, "Å").bounded(Bounds::min_only(0.0))
        };
        let angle = |ids: &mut IdAllocator, name: &str, v: f64| {
            ids.parameter(name, v, "deg").bounded(Bounds { min: 0.0, max: 180.0 })
        };
        Self {
            length_a: length(ids, "length_a", cell[0]),
            length_b: length(ids, "length_b", cell[1]),
            length_c: length(ids, "length_c", cell[2]),
            angle_alpha: angle(ids, "angle_alpha", cell[3]),
            angle_beta: angle(ids, "angle_beta", cell[4]),
            angle_gamma: angle(ids, "angle_gamma", cell[5]),
        }
    }

    /// `[a, b, c, alpha, beta, gamma]`.
    pub fn cell(&self) -> [f64; 6] {
        [
            self.length_a.value(),
            self.length_b.value(),
            self.length_c.value(),
            self.angle_alpha.value(),
            self.angle_beta.value(),
            self.angle_gamma.value(),
        ]
    }

    fn params(&self) -> [&Parameter; 6] {
        [
            &self.length_a,
            &self.length_b,
            &self.length_c,
            &self.angle_alpha,
            &self.angle_beta,
            &self.angle_gamma,
        ]
    }

    fn params_mut(&mut self) -> [&mut Parameter; 6] {
        let Lattice {
            length_a,
            length_b,
            length_c,
            angle_alpha,
            angle_beta,
            angle_gamma,
        } = self;
        [length_a, length_b, length_c, angle_alpha, angle_beta, angle_gamma]
    }
}

/// One atom site of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomSite {
    label: String,
    specie: String,
    pub fract_x: Parameter,
    pub fract_y: Parameter,
    pub fract_z: Parameter,
    pub occupancy: Parameter,
    pub u_iso: Parameter,
}

impl AtomSite {
    pub fn new(ids: &mut IdAllocator, label: &str, specie: &str, fract: [f64; 3], u_iso: f64) -> Self {
        Self {
            label: label.to_string(),
            specie: specie.to_string(),
            fract_x: ids.parameter("fract_x", fract[0], ""),
            fract_y: ids.parameter("fract_y", fract[1], ""),
            fract_z: ids.parameter("fract_z", fract[2], ""),
            occupancy: ids.parameter("occupancy", 1.0, ""),
            u_iso: ids.parameter("Uiso", u_iso, "Å²"),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn specie(&self) -> &str {
        &self.specie
    }

    pub fn parameter_ids(&self) -> Vec<ParamId> {
        self.params().iter().map(|p| p.id()).collect()
    }

    fn params(&self) -> [&Parameter; 5] {
        [&self.fract_x, &self.fract_y, &self.fract_z, &self.occupancy, &self.u_iso]
    }

    fn params_mut(&mut self) -> [&mut Parameter; 5] {
        let AtomSite {
            fract_x,
            fract_y,
            fract_z,
            occupancy,
            u_iso,
            ..
        } = self;
        [fract_x, fract_y, fract_z, occupancy, u_iso]
    }
}

/// A crystallographic phase contributing to the simulated pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    name: String,
    space_group: String,
    pub scale: Parameter,
    pub lattice: Lattice,
    atoms: Vec<AtomSite>,
}

impl Phase {
    pub fn new(ids: &mut IdAllocator, name: &str, space_group: &str, cell: [f64; 6]) -> Self {
        Self {
            name: name.to_string(),
            space_group: space_group.to_string(),
            scale: ids.parameter("scale", 1.0, ""),
            lattice: Lattice::new(ids, cell),
            atoms: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space_group(&self) -> &str {
        &self.space_group
    }

    pub fn atoms(&self) -> &[AtomSite] {
        &self.atoms
    }

    pub fn atom(&self, label: &str) -> Option<&AtomSite> {
        self.atoms.iter().find(|a| a.label == label)
    }

    /// Append an atom site; labels must be unique within the phase.
    pub fn add_atom(&mut self, atom: AtomSite) -> Result<()> {
        let index = self.atoms.len();
        self.insert_atom(index, atom)
    }

    pub(crate) fn insert_atom(&mut self, index: usize, atom: AtomSite) -> Result<()> {
        if self.atom(&atom.label).is_some() {
            return Err(PowderFitError::DuplicateName(format!(
                "atom '{}' in phase '{}'",
                atom.label, self.name
            )));
        }
        let index = index.min(self.atoms.len());
        self.atoms.insert(index, atom);
        Ok(())
    }

    pub(crate) fn remove_atom(&mut self, label: &str) -> Result<(usize, AtomSite)> {
        let index = self
            .atoms
            .iter()
            .position(|a| a.label == label)
            .ok_or_else(|| PowderFitError::NotFound(format!("atom '{}' in phase '{}'", label, self.name)))?;
        Ok((index, self.atoms.remove(index)))
    }

    /// Ids of every parameter owned by this phase.
    pub fn parameter_ids(&self) -> Vec<ParamId> {
        let mut ids = vec![self.scale.id()];
        ids.extend(self.lattice.params().iter().map(|p| p.id()));
        for atom in &self.atoms {
            ids.extend(atom.parameter_ids());
        }
        ids
    }

    fn visit<'a>(&'a self, index: usize, out: &mut Vec<(Slot, GraphEntry<'a>)>) {
        let prefix = format!("phases.{}", self.name);
        let entry = GraphEntry::new(format!("{}.scale", prefix), Scope::Phase, &self.scale);
        out.push((Slot::PhaseScale(index), entry));
        for (k, p) in self.lattice.params().into_iter().enumerate() {
            let entry = GraphEntry::new(format!("{}.cell.{}", prefix, p.name()), Scope::Phase, p);
            out.push((Slot::Cell(index, k), entry));
        }
        for (a, atom) in self.atoms.iter().enumerate() {
            for (k, p) in atom.params().into_iter().enumerate() {
                let group = if p.id() == atom.u_iso.id() { ".adp" } else { "" };
                let path = format!("{}.atoms.{}{}.{}", prefix, atom.label, group, p.name());
                out.push((Slot::Atom(index, a, k), GraphEntry::new(path, Scope::Phase, p)));
            }
        }
    }
}

/// Global pattern settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub scale: Parameter,
    pub zero_shift: Parameter,
}

/// Instrument resolution and wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub wavelength: Parameter,
    pub resolution_u: Parameter,
    pub resolution_v: Parameter,
    pub resolution_w: Parameter,
    pub resolution_x: Parameter,
    pub resolution_y: Parameter,
}

impl Instrument {
    fn params(&self) -> [&Parameter; 6] {
        [
            &self.wavelength,
            &self.resolution_u,
            &self.resolution_v,
            &self.resolution_w,
            &self.resolution_x,
            &self.resolution_y,
        ]
    }

    fn params_mut(&mut self) -> [&mut Parameter; 6] {
        let Instrument {
            wavelength,
            resolution_u,
            resolution_v,
            resolution_w,
            resolution_x,
            resolution_y,
        } = self;
        [wavelength, resolution_u, resolution_v, resolution_w, resolution_x, resolution_y]
    }
}

/// One interpolation point of the background, keyed by its x position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundPoint {
    x: f64,
    pub y: Parameter,
}

impl BackgroundPoint {
    pub fn new(ids: &mut IdAllocator, x: f64, y: f64) -> Self {
        Self {
            x,
            y: ids.parameter("y", y, ""),
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }
}

/// Piecewise-linear baseline, points kept strictly ascending in x.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Background {
    points: Vec<BackgroundPoint>,
}

impl Background {
    pub fn points(&self) -> &[BackgroundPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Insert keeping x strictly ascending. Returns the insertion index.
    pub(crate) fn insert(&mut self, point: BackgroundPoint) -> Result<usize> {
        if !point.x.is_finite() {
            return Err(PowderFitError::InvalidInput(format!(
                "background position {} is not finite",
                point.x
            )));
        }
        match self
            .points
            .binary_search_by(|p| p.x.total_cmp(&point.x))
        {
            Ok(_) => Err(PowderFitError::DuplicateName(format!(
                "background point at x = {}",
                point.x
            ))),
            Err(index) => {
                self.points.insert(index, point);
                Ok(index)
            }
        }
    }

    pub(crate) fn remove(&mut self, x: f64) -> Result<(usize, BackgroundPoint)> {
        let index = self
            .points
            .binary_search_by(|p| p.x.total_cmp(&x))
            .map_err(|_| PowderFitError::NotFound(format!("background point at x = {}", x)))?;
        Ok((index, self.points.remove(index)))
    }

    /// Linear interpolation between points, constant beyond the ends, zero
    /// when there are no points.
    pub fn evaluate(&self, x: f64) -> f64 {
        let points = &self.points;
        match points.len() {
            0 => 0.0,
            1 => points[0].y.value(),
            n => {
                if x <= points[0].x {
                    return points[0].y.value();
                }
                if x >= points[n - 1].x {
                    return points[n - 1].y.value();
                }
                let upper = points.partition_point(|p| p.x <= x);
                let (p0, p1) = (&points[upper - 1], &points[upper]);
                let t = (x - p0.x) / (p1.x - p0.x);
                p0.y.value() + t * (p1.y.value() - p0.y.value())
            }
        }
    }
}

/// Where a parameter lives inside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    PhaseScale(usize),
    Cell(usize, usize),
    Atom(usize, usize, usize),
    PatternScale,
    ZeroShift,
    Instrument(usize),
    Background(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct GraphIndex {
    slots: HashMap<ParamId, (Slot, Scope, String)>,
    paths: HashMap<String, ParamId>,
}

/// A parameter together with its derived path and owner class.
#[derive(Debug, Clone)]
pub struct GraphEntry<'a> {
    pub path: String,
    pub scope: Scope,
    pub parameter: &'a Parameter,
}

impl<'a> GraphEntry<'a> {
    fn new(path: String, scope: Scope, parameter: &'a Parameter) -> Self {
        Self { path, scope, parameter }
    }
}

/// A row of the UI parameter listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleParameter {
    /// 1-based display index.
    pub index: usize,
    pub id: ParamId,
    pub path: String,
    pub value: f64,
    pub unit: String,
    pub fixed: bool,
    pub error: Option<f64>,
}

/// The complete scientific parameter tree of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphData")]
pub struct ParameterGraph {
    ids: IdAllocator,
    phases: Vec<Phase>,
    pattern: Pattern,
    instrument: Instrument,
    #[serde(default)]
    background: Background,
    #[serde(skip)]
    index: GraphIndex,
}

/// Serialized form of [`ParameterGraph`], checked before it is accepted.
#[derive(Deserialize)]
struct GraphData {
    ids: IdAllocator,
    phases: Vec<Phase>,
    pattern: Pattern,
    instrument: Instrument,
    #[serde(default)]
    background: Background,
}

impl TryFrom<GraphData> for ParameterGraph {
    type Error = PowderFitError;

    fn try_from(data: GraphData) -> Result<Self> {
        let mut graph = Self {
            ids: data.ids,
            phases: data.phases,
            pattern: data.pattern,
            instrument: data.instrument,
            background: data.background,
            index: GraphIndex::default(),
        };
        graph.validate()?;
        graph.reindex();
        let highest = graph.index.slots.keys().copied().max();
        if let Some(id) = highest {
            graph.ids.reserve(id);
        }
        Ok(graph)
    }
}

impl Default for ParameterGraph {
    fn default() -> Self {
        Self::new(&SampleDefaults::default())
    }
}

impl ParameterGraph {
    /// An empty sample (no phases, no background) with the given pattern and
    /// instrument settings.
    pub fn new(defaults: &SampleDefaults) -> Self {
        let mut ids = IdAllocator::new();
        let pattern = Pattern {
            scale: ids.parameter("scale", defaults.scale, ""),
            zero_shift: ids.parameter("zero_shift", defaults.zero_shift, "deg"),
        };
        let instrument = Instrument {
            wavelength: ids
                .parameter("wavelength", defaults.wavelength, "Å")
                .bounded(Bounds::min_only(1e-6)),
            resolution_u: ids.parameter("resolution_u", defaults.resolution_u, ""),
            resolution_v: ids.parameter("resolution_v", defaults.resolution_v, ""),
            resolution_w: ids.parameter("resolution_w", defaults.resolution_w, ""),
            resolution_x: ids.parameter("resolution_x", defaults.resolution_x, ""),
            resolution_y: ids.parameter("resolution_y", defaults.resolution_y, ""),
        };
        let mut graph = Self {
            ids,
            phases: Vec::new(),
            pattern,
            instrument,
            background: Background::default(),
            index: GraphIndex::default(),
        };
        graph.reindex();
        graph
    }

    pub fn ids_mut(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phase_index(&self, name: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.name == name)
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    /// The phase the application creates when the user asks for a new one.
    pub fn default_phase(&mut self, name: &str) -> Phase {
        let ids = &mut self.ids;
        let mut phase = Phase::new(ids, name, "P 42/n c m", [8.56, 8.56, 6.12, 90.0, 90.0, 90.0]);
        phase.atoms.push(AtomSite::new(ids, "Cl1", "Cl", [0.125, 0.167, 0.107], 0.0));
        phase
    }

    /// The atom site appended by "add atom": `Label{n}`, oxygen near the origin.
    pub fn default_atom(&mut self, phase_index: usize) -> Result<AtomSite> {
        let count = self
            .phases
            .get(phase_index)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase #{}", phase_index)))?
            .atoms
            .len();
        let mut n = count + 1;
        while self.phases[phase_index].atom(&format!("Label{}", n)).is_some() {
            n += 1;
        }
        Ok(AtomSite::new(&mut self.ids, &format!("Label{}", n), "O", [0.05, 0.05, 0.05], 0.0))
    }

    /// Every parameter with its derived path, in graph order.
    pub fn entries(&self) -> Vec<GraphEntry<'_>> {
        self.walk().into_iter().map(|(_, entry)| entry).collect()
    }

    fn walk(&self) -> Vec<(Slot, GraphEntry<'_>)> {
        let mut out = Vec::new();
        for (index, phase) in self.phases.iter().enumerate() {
            phase.visit(index, &mut out);
        }
        out.push((
            Slot::PatternScale,
            GraphEntry::new("pattern.scale".into(), Scope::Settings, &self.pattern.scale),
        ));
        out.push((
            Slot::ZeroShift,
            GraphEntry::new("pattern.zero_shift".into(), Scope::Settings, &self.pattern.zero_shift),
        ));
        for (k, p) in self.instrument.params().into_iter().enumerate() {
            let entry = GraphEntry::new(format!("instrument.{}", p.name()), Scope::Settings, p);
            out.push((Slot::Instrument(k), entry));
        }
        for (b, point) in self.background.points.iter().enumerate() {
            let path = format!("background.points[{}].y", point.x);
            out.push((Slot::Background(b), GraphEntry::new(path, Scope::Settings, &point.y)));
        }
        out
    }

    fn reindex(&mut self) {
        let mut index = GraphIndex::default();
        for (slot, entry) in self.walk() {
            let id = entry.parameter.id();
            index.paths.insert(entry.path.clone(), id);
            index.slots.insert(id, (slot, entry.scope, entry.path));
        }
        self.index = index;
    }

    /// Check the invariants a loaded or imported graph must satisfy: unique
    /// phase names, unique atom labels per phase, finite strictly ascending
    /// background positions and unique parameter ids.
    pub fn validate(&self) -> Result<()> {
        for (i, phase) in self.phases.iter().enumerate() {
            if self.phases[..i].iter().any(|p| p.name == phase.name) {
                return Err(PowderFitError::DuplicateName(format!("phase '{}'", phase.name)));
            }
            for (j, atom) in phase.atoms.iter().enumerate() {
                if phase.atoms[..j].iter().any(|a| a.label == atom.label) {
                    return Err(PowderFitError::DuplicateName(format!(
                        "atom '{}' in phase '{}'",
                        atom.label, phase.name
                    )));
                }
            }
        }
        let points = &self.background.points;
        if let Some(point) = points.iter().find(|p| !p.x.is_finite()) {
            return Err(PowderFitError::InvalidInput(format!(
                "background position {} is not finite",
                point.x
            )));
        }
        if let Some(pair) = points.windows(2).find(|w| w[0].x >= w[1].x) {
            return Err(PowderFitError::InvalidInput(format!(
                "background positions {} and {} are not strictly ascending",
                pair[0].x, pair[1].x
            )));
        }
        let mut seen = HashSet::new();
        for entry in self.entries() {
            if !seen.insert(entry.parameter.id()) {
                return Err(PowderFitError::DuplicateName(format!(
                    "parameter id {} ({})",
                    entry.parameter.id(),
                    entry.path
                )));
            }
        }
        Ok(())
    }

    /// Fails when any of `ids` is already used in the graph.
    fn check_fresh(&self, ids: &[ParamId]) -> Result<()> {
        match ids.iter().find(|id| self.contains(**id)) {
            Some(id) => Err(PowderFitError::DuplicateName(format!("parameter id {}", id))),
            None => Ok(()),
        }
    }

    pub fn get(&self, id: ParamId) -> Option<&Parameter> {
        match self.index.slots.get(&id)?.0 {
            Slot::PhaseScale(p) => Some(&self.phases.get(p)?.scale),
            Slot::Cell(p, k) => self.phases.get(p)?.lattice.params().into_iter().nth(k),
            Slot::Atom(p, a, k) => self.phases.get(p)?.atoms.get(a)?.params().into_iter().nth(k),
            Slot::PatternScale => Some(&self.pattern.scale),
            Slot::ZeroShift => Some(&self.pattern.zero_shift),
            Slot::Instrument(k) => self.instrument.params().into_iter().nth(k),
            Slot::Background(b) => self.background.points.get(b).map(|point| &point.y),
        }
    }

    pub fn get_mut(&mut self, id: ParamId) -> Option<&mut Parameter> {
        let slot = self.index.slots.get(&id)?.0;
        match slot {
            Slot::PhaseScale(p) => Some(&mut self.phases.get_mut(p)?.scale),
            Slot::Cell(p, k) => self.phases.get_mut(p)?.lattice.params_mut().into_iter().nth(k),
            Slot::Atom(p, a, k) => self
                .phases
                .get_mut(p)?
                .atoms
                .get_mut(a)?
                .params_mut()
                .into_iter()
                .nth(k),
            Slot::PatternScale => Some(&mut self.pattern.scale),
            Slot::ZeroShift => Some(&mut self.pattern.zero_shift),
            Slot::Instrument(k) => self.instrument.params_mut().into_iter().nth(k),
            Slot::Background(b) => self.background.points.get_mut(b).map(|point| &mut point.y),
        }
    }

    /// Like [`get`](Self::get) but failing with `UnknownParameter`.
    pub fn parameter(&self, id: ParamId) -> Result<&Parameter> {
        self.get(id).ok_or(PowderFitError::UnknownParameter(id))
    }

    pub fn parameter_mut(&mut self, id: ParamId) -> Result<&mut Parameter> {
        self.get_mut(id).ok_or(PowderFitError::UnknownParameter(id))
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.index.slots.contains_key(&id)
    }

    pub fn path(&self, id: ParamId) -> Option<String> {
        self.index.slots.get(&id).map(|(_, _, path)| path.clone())
    }

    pub fn scope(&self, id: ParamId) -> Option<Scope> {
        self.index.slots.get(&id).map(|(_, scope, _)| *scope)
    }

    /// Look a parameter up by its dotted path.
    pub fn find(&self, path: &str) -> Option<ParamId> {
        self.index.paths.get(path).copied()
    }

    /// Enabled parameters whose path contains `filter` (case-insensitive),
    /// ordered by path and numbered from 1.
    pub fn list_visible(&self, filter: &str) -> Vec<VisibleParameter> {
        let needle = filter.to_lowercase();
        let mut rows: Vec<_> = self
            .entries()
            .into_iter()
            .filter(|e| e.parameter.enabled())
            .filter(|e| needle.is_empty() || e.path.to_lowercase().contains(&needle))
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows.into_iter()
            .enumerate()
            .map(|(i, e)| VisibleParameter {
                index: i + 1,
                id: e.parameter.id(),
                path: e.path,
                value: e.parameter.value(),
                unit: e.parameter.unit().to_string(),
                fixed: e.parameter.fixed(),
                error: e.parameter.error(),
            })
            .collect()
    }

    /// Ids of enabled, non-fixed parameters in graph order.
    pub fn free_parameters(&self) -> Vec<ParamId> {
        self.entries()
            .into_iter()
            .filter(|e| e.parameter.enabled() && !e.parameter.fixed())
            .map(|e| e.parameter.id())
            .collect()
    }

    /// Current value of every parameter, keyed by id.
    pub fn values(&self) -> BTreeMap<ParamId, f64> {
        self.entries()
            .into_iter()
            .map(|e| (e.parameter.id(), e.parameter.value()))
            .collect()
    }

    /// Raw value write with bounds checking. Returns the previous value.
    pub fn set_value(&mut self, id: ParamId, value: f64) -> Result<f64> {
        let param = self.parameter_mut(id)?;
        let old = param.value();
        param.set_value(value)?;
        Ok(old)
    }

    /// Raw value write used by constraint evaluation and fits; clamps into bounds.
    pub(crate) fn set_value_clamped(&mut self, id: ParamId, value: f64) -> Result<f64> {
        let param = self.parameter_mut(id)?;
        let old = param.value();
        param.set_value_clamped(value);
        Ok(old)
    }

    pub(crate) fn insert_phase(&mut self, index: usize, phase: Phase) -> Result<()> {
        if self.phase(&phase.name).is_some() {
            return Err(PowderFitError::DuplicateName(format!("phase '{}'", phase.name)));
        }
        self.check_fresh(&phase.parameter_ids())?;
        let index = index.min(self.phases.len());
        self.phases.insert(index, phase);
        self.reindex();
        Ok(())
    }

    pub(crate) fn remove_phase(&mut self, name: &str) -> Result<(usize, Phase)> {
        let index = self
            .phase_index(name)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase '{}'", name)))?;
        let phase = self.phases.remove(index);
        self.reindex();
        Ok((index, phase))
    }

    /// Swap in a new phase list. The result must pass [`validate`](Self::validate),
    /// so the new phases may not reuse ids of the pattern, instrument or
    /// background, nor of each other.
    pub(crate) fn replace_phases(&mut self, phases: Vec<Phase>) -> Result<Vec<Phase>> {
        let mut candidate = self.clone();
        candidate.phases = phases;
        candidate.validate()?;
        candidate.reindex();
        let highest = candidate.index.slots.keys().copied().max();
        if let Some(id) = highest {
            candidate.ids.reserve(id);
        }
        let old = std::mem::take(&mut self.phases);
        *self = candidate;
        Ok(old)
    }

    pub(crate) fn insert_atom(&mut self, phase: usize, index: usize, atom: AtomSite) -> Result<usize> {
        self.check_fresh(&atom.parameter_ids())?;
        let target = self
            .phases
            .get_mut(phase)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase #{}", phase)))?;
        let index = index.min(target.atoms.len());
        target.insert_atom(index, atom)?;
        self.reindex();
        Ok(index)
    }

    pub(crate) fn remove_atom(&mut self, phase: usize, label: &str) -> Result<(usize, AtomSite)> {
        let removed = self
            .phases
            .get_mut(phase)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase #{}", phase)))?
            .remove_atom(label)?;
        self.reindex();
        Ok(removed)
    }

    /// Insert a background point keeping x strictly ascending. Returns its index.
    pub(crate) fn insert_background(&mut self, point: BackgroundPoint) -> Result<usize> {
        self.check_fresh(&[point.y.id()])?;
        let index = self.background.insert(point)?;
        self.reindex();
        Ok(index)
    }

    pub(crate) fn remove_background(&mut self, x: f64) -> Result<(usize, BackgroundPoint)> {
        let removed = self.background.remove(x)?;
        self.reindex();
        Ok(removed)
    }

    pub(crate) fn rename_phase(&mut self, index: usize, name: &str) -> Result<String> {
        if self.phases.iter().enumerate().any(|(i, p)| i != index && p.name == name) {
            return Err(PowderFitError::DuplicateName(format!("phase '{}'", name)));
        }
        let phase = self
            .phases
            .get_mut(index)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase #{}", index)))?;
        let old = std::mem::replace(&mut phase.name, name.to_string());
        self.reindex();
        Ok(old)
    }

    pub(crate) fn set_space_group(&mut self, index: usize, symbol: &str) -> Result<String> {
        let phase = self
            .phases
            .get_mut(index)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase #{}", index)))?;
        Ok(std::mem::replace(&mut phase.space_group, symbol.to_string()))
    }
}
