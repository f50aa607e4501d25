//! The fitting session.
//!
//! [`Session`] owns the parameter graph, the constraints, the experiment slot,
//! the calculation and minimizer selections, the undo stack, the fit
//! orchestrator and the event bus. Every mutating operation follows the same
//! path:
//!
//! 1. validate and apply the change to a copy of the affected state,
//! 2. resolve constraints and collect every value they moved,
//! 3. commit one undo entry holding the edit and its consequences,
//! 4. recompute the plot buffers, then emit events.
//!
//! A failing operation returns before step 3 and leaves the session untouched.
//! While a fit is running every mutating operation fails with
//! [`PowderFitError::FitAlreadyRunning`].
//!
//! ```
//! use powderfit_rs::Session;
//!
//! let mut session = Session::new();
//! session.add_default_phase().unwrap();
//! let scale = session.graph().find("pattern.scale").unwrap();
//!
//! session.set_value(scale, 250.0).unwrap();
//! assert_eq!(session.undo_label(), Some("Edit pattern.scale"));
//!
//! session.undo().unwrap();
//! assert_eq!(session.get(scale).unwrap().value(), 100.0);
//! ```

use crate::calculator::{CalculationEngine, CalculatorBackend};
use crate::config::SessionConfig;
use crate::error::{PowderFitError, Result};
use crate::events::{Event, EventBus, SubscriptionId};
use crate::experiment::{ExperimentData, ExperimentSetup, ExperimentState, SimulationRange};
use crate::fitting::minimizer::{Minimizer, MinimizerRegistry, MinimizerSelection};
use crate::fitting::orchestrator::{FitJob, FitOrchestrator, FitOutcome, FitResult, FitStatus};
use crate::fitting::problem::FitProblem;
use crate::history::{Mutation, Owner, RefreshGroup, Revertible, UndoEntry, UndoStack};
use crate::parameters::constraints::{Constraint, ConstraintEngine, ValueChange};
use crate::parameters::expression::ConstraintExpression;
use crate::parameters::graph::{BackgroundPoint, ParameterGraph, Phase, Scope, VisibleParameter};
use crate::parameters::parameter::{IdAllocator, ParamId, Parameter};
use crate::presentation::{self, PlotBuffers};
use crate::project::{ProjectDocument, FORMAT_VERSION};
use crate::ui::{ObjectBuilder, ParameterEdit, UiValue};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name given to phases created with [`Session::add_default_phase`].
pub const DEFAULT_PHASE_NAME: &str = "Dichlorine";

/// The part of a session that undo entries are applied to.
#[derive(Debug, Clone)]
struct SessionState {
    graph: ParameterGraph,
    constraints: ConstraintEngine,
    experiment: ExperimentSetup,
    calculator: CalculationEngine,
    minimizers: MinimizerRegistry,
}

impl SessionState {
    fn insert_constraints(&mut self, constraints: &[(usize, Constraint)]) {
        for (index, constraint) in constraints {
            self.constraints.insert(*index, constraint.clone());
        }
    }

    fn remove_constraints(&mut self, constraints: &[(usize, Constraint)]) -> Result<()> {
        for (index, _) in constraints.iter().rev() {
            self.constraints.remove(*index)?;
        }
        Ok(())
    }
}

impl Revertible for SessionState {
    fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Value { id, new, .. } => {
                self.graph.set_value_clamped(*id, *new)?;
            }
            Mutation::Fixed { id, new, .. } => self.graph.parameter_mut(*id)?.set_fixed(*new),
            Mutation::Enabled { id, new, .. } => self.graph.parameter_mut(*id)?.set_enabled(*new),
            Mutation::PhaseInserted {
                index,
                phase,
                constraints,
            } => {
                self.graph.insert_phase(*index, (**phase).clone())?;
                self.insert_constraints(constraints);
            }
            Mutation::PhaseRemoved {
                phase, constraints, ..
            } => {
                self.remove_constraints(constraints)?;
                self.graph.remove_phase(phase.name())?;
            }
            Mutation::PhaseRenamed { index, new, .. } => {
                self.graph.rename_phase(*index, new)?;
            }
            Mutation::SpaceGroup { index, new, .. } => {
                self.graph.set_space_group(*index, new)?;
            }
            Mutation::AtomInserted {
                phase,
                index,
                atom,
                constraints,
            } => {
                self.graph.insert_atom(*phase, *index, (**atom).clone())?;
                self.insert_constraints(constraints);
            }
            Mutation::AtomRemoved {
                phase,
                atom,
                constraints,
                ..
            } => {
                self.remove_constraints(constraints)?;
                self.graph.remove_atom(*phase, atom.label())?;
            }
            Mutation::BackgroundInserted { point, constraints } => {
                self.graph.insert_background(point.clone())?;
                self.insert_constraints(constraints);
            }
            Mutation::BackgroundRemoved { point, constraints } => {
                self.remove_constraints(constraints)?;
                self.graph.remove_background(point.x())?;
            }
            Mutation::ConstraintInserted { index, constraint } => {
                self.constraints.insert(*index, constraint.clone());
            }
            Mutation::ConstraintRemoved { index, .. } => {
                self.constraints.remove(*index)?;
            }
            Mutation::ConstraintToggled { index, new, .. } => {
                self.constraints.set_enabled(*index, *new)?;
            }
            Mutation::Experiment { new, .. } => self.experiment = (**new).clone(),
            Mutation::Calculator { new, .. } => {
                self.calculator.switch(new)?;
            }
            Mutation::Minimizer { new, .. } => self.minimizers.restore(new)?,
        }
        Ok(())
    }
}

fn owner_of(scope: Option<Scope>) -> Owner {
    match scope {
        Some(Scope::Phase) => Owner::Phase,
        _ => Owner::Settings,
    }
}

fn value_mutations(changes: Vec<ValueChange>) -> impl Iterator<Item = Mutation> {
    changes.into_iter().map(|c| Mutation::Value {
        id: c.id,
        old: c.old,
        new: c.new,
    })
}

/// A powder-diffraction fitting session.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    history: UndoStack,
    orchestrator: FitOrchestrator,
    events: EventBus,
    config: SessionConfig,
    plot: Option<PlotBuffers>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Session with the default configuration: no phases, no experiment,
    /// `pseudo-voigt` calculator, `lmopt`/`leastsq` minimizer.
    pub fn new() -> Self {
        let config = SessionConfig::default();
        Self {
            state: SessionState {
                graph: ParameterGraph::new(&config.sample),
                constraints: ConstraintEngine::new(),
                experiment: ExperimentSetup {
                    state: ExperimentState::NotSet,
                    range: config.simulation_range,
                },
                calculator: CalculationEngine::new(),
                minimizers: MinimizerRegistry::new(config.lm.clone()),
            },
            history: UndoStack::new(),
            orchestrator: FitOrchestrator::new(),
            events: EventBus::new(),
            config,
            plot: None,
        }
    }

    /// Session built from `config`. Fails when the configured calculator or
    /// engine is not one of the bundled ones, or when the simulation range
    /// exceeds `max_grid_points`.
    pub fn with_config(config: SessionConfig) -> Result<Self> {
        config.simulation_range.validate(config.max_grid_points)?;
        let mut calculator = CalculationEngine::new();
        if calculator.current_name() != config.default_calculator {
            calculator.switch(&config.default_calculator)?;
        }
        let mut minimizers = MinimizerRegistry::new(config.lm.clone());
        minimizers.select_engine(&config.default_engine)?;

        Ok(Self {
            state: SessionState {
                graph: ParameterGraph::new(&config.sample),
                constraints: ConstraintEngine::new(),
                experiment: ExperimentSetup {
                    state: ExperimentState::NotSet,
                    range: config.simulation_range,
                },
                calculator,
                minimizers,
            },
            history: UndoStack::new(),
            orchestrator: FitOrchestrator::new(),
            events: EventBus::new(),
            config,
            plot: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn graph(&self) -> &ParameterGraph {
        &self.state.graph
    }

    pub fn constraints(&self) -> &ConstraintEngine {
        &self.state.constraints
    }

    pub fn experiment(&self) -> &ExperimentSetup {
        &self.state.experiment
    }

    pub fn calculator(&self) -> &CalculationEngine {
        &self.state.calculator
    }

    pub fn minimizers(&self) -> &MinimizerRegistry {
        &self.state.minimizers
    }

    /// Id allocator of the graph, for building phases handed to
    /// [`replace_phases`](Self::replace_phases).
    pub fn ids_mut(&mut self) -> &mut IdAllocator {
        self.state.graph.ids_mut()
    }

    // Events

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn ensure_idle(&self, operation: &str) -> Result<()> {
        if self.orchestrator.is_running() {
            warn!(operation, "rejected while a fit is running");
            return Err(PowderFitError::FitAlreadyRunning);
        }
        Ok(())
    }

    /// Recompute the plot buffers from the current state.
    fn recompute(&mut self) -> bool {
        let state = &mut self.state;
        match presentation::plot_buffers(&mut state.calculator, &state.graph, &state.experiment) {
            Ok(Some(buffers)) => {
                self.plot = Some(buffers);
                true
            }
            Ok(None) => {
                self.plot = None;
                false
            }
            Err(e) => {
                warn!(error = %e, "pattern calculation failed");
                self.plot = None;
                false
            }
        }
    }

    /// Recompute, then emit `events` and the undo/redo availability.
    fn publish(&mut self, recompute: bool, events: Vec<Event>) {
        let mut all = Vec::with_capacity(events.len() + 2);
        if recompute && self.recompute() {
            all.push(Event::CalculatedDataChanged);
        }
        all.extend(events);
        all.push(Event::UndoRedoChanged);
        self.events.emit_all(&all);
    }

    fn commit(&mut self, entry: UndoEntry, events: Vec<Event>) {
        let recompute = entry.refresh_group() != RefreshGroup::None;
        self.history.commit(entry);
        self.publish(recompute, events);
    }

    // Parameters

    pub fn get(&self, id: ParamId) -> Result<&Parameter> {
        self.state.graph.parameter(id)
    }

    /// Set a parameter value. Values outside the parameter's bounds are
    /// rejected; an unchanged value records nothing.
    pub fn set_value(&mut self, id: ParamId, value: f64) -> Result<()> {
        self.ensure_idle("set_value")?;
        let param = self.state.graph.parameter(id)?;
        let old = param.value();
        if old == value {
            return Ok(());
        }
        param.bounds().check(value)?;

        let mut graph = self.state.graph.clone();
        graph.set_value(id, value)?;
        let dependents = self.state.constraints.evaluate_all(&mut graph)?;
        self.state.graph = graph;

        let path = self.path_of(id);
        let mut entry = UndoEntry::new(format!("Edit {}", path), owner_of(self.state.graph.scope(id)));
        entry.push(Mutation::Value { id, old, new: value });
        for mutation in value_mutations(dependents) {
            entry.push(mutation);
        }
        debug!(%path, old, new = value, "value edited");
        self.commit(entry, vec![Event::ParametersChanged]);
        Ok(())
    }

    /// Include or exclude a parameter from fits.
    pub fn set_fixed(&mut self, id: ParamId, fixed: bool) -> Result<()> {
        self.ensure_idle("set_fixed")?;
        let old = self.state.graph.parameter(id)?.fixed();
        if old == fixed {
            return Ok(());
        }
        self.state.graph.parameter_mut(id)?.set_fixed(fixed);

        let label = format!("{} {}", if fixed { "Fix" } else { "Free" }, self.path_of(id));
        let entry = UndoEntry::with_mutations(
            label,
            owner_of(self.state.graph.scope(id)),
            vec![Mutation::Fixed { id, old, new: fixed }],
        );
        self.commit(entry, vec![Event::ParametersChanged]);
        Ok(())
    }

    /// Show or hide a parameter; hidden parameters are not listed or fitted.
    pub fn set_enabled(&mut self, id: ParamId, enabled: bool) -> Result<()> {
        self.ensure_idle("set_enabled")?;
        let old = self.state.graph.parameter(id)?.enabled();
        if old == enabled {
            return Ok(());
        }
        self.state.graph.parameter_mut(id)?.set_enabled(enabled);

        let label = format!("{} {}", if enabled { "Enable" } else { "Disable" }, self.path_of(id));
        let entry = UndoEntry::with_mutations(
            label,
            owner_of(self.state.graph.scope(id)),
            vec![Mutation::Enabled { id, old, new: enabled }],
        );
        self.commit(entry, vec![Event::ParametersChanged]);
        Ok(())
    }

    fn path_of(&self, id: ParamId) -> String {
        self.state.graph.path(id).unwrap_or_else(|| id.to_string())
    }

    pub fn list_visible(&self, filter: &str) -> Vec<VisibleParameter> {
        self.state.graph.list_visible(filter)
    }

    /// Apply an edit submitted by the parameter table. Unknown ids are
    /// logged and ignored.
    pub fn edit_parameter(&mut self, id: ParamId, value: &UiValue) -> Result<()> {
        if !self.state.graph.contains(id) {
            warn!(%id, "edit of unknown parameter ignored");
            return Ok(());
        }
        match ParameterEdit::from_ui(value)? {
            ParameterEdit::Value(v) => self.set_value(id, v),
            ParameterEdit::Fixed(b) => self.set_fixed(id, b),
            ParameterEdit::Enabled(b) => self.set_enabled(id, b),
        }
    }

    // Phases and atoms

    /// Add the default phase under a free name (`Dichlorine`, `Dichlorine2`,
    /// ...). Returns the name used.
    pub fn add_default_phase(&mut self) -> Result<String> {
        self.ensure_idle("add_default_phase")?;
        let mut name = DEFAULT_PHASE_NAME.to_string();
        let mut n = 1;
        while self.state.graph.phase(&name).is_some() {
            n += 1;
            name = format!("{}{}", DEFAULT_PHASE_NAME, n);
        }
        let phase = self.state.graph.default_phase(&name);
        self.insert_phase(phase)?;
        Ok(name)
    }

    /// Add an empty phase with the given cell `[a, b, c, alpha, beta, gamma]`.
    pub fn add_phase(&mut self, name: &str, space_group: &str, cell: [f64; 6]) -> Result<()> {
        self.ensure_idle("add_phase")?;
        if self.state.graph.phase(name).is_some() {
            return Err(PowderFitError::DuplicateName(format!("phase '{}'", name)));
        }
        let phase = Phase::new(self.state.graph.ids_mut(), name, space_group, cell);
        self.insert_phase(phase)
    }

    fn insert_phase(&mut self, phase: Phase) -> Result<()> {
        let index = self.state.graph.phases().len();
        let label = format!("Add phase {}", phase.name());
        self.state.graph.insert_phase(index, phase.clone())?;
        info!(phase = phase.name(), "phase added");
        let entry = UndoEntry::with_mutations(
            label,
            Owner::Phase,
            vec![Mutation::PhaseInserted {
                index,
                phase: Box::new(phase),
                constraints: Vec::new(),
            }],
        );
        self.commit(entry, structure_events());
        Ok(())
    }

    /// Remove a phase together with every constraint that mentions one of its
    /// parameters. Undo restores both.
    pub fn remove_phase(&mut self, name: &str) -> Result<()> {
        self.ensure_idle("remove_phase")?;
        let ids = self
            .state
            .graph
            .phase(name)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase '{}'", name)))?
            .parameter_ids();
        let (index, phase) = self.state.graph.remove_phase(name)?;
        let constraints = self.state.constraints.remove_referencing(&ids);
        info!(phase = name, constraints = constraints.len(), "phase removed");

        let entry = UndoEntry::with_mutations(
            format!("Remove phase {}", name),
            Owner::Phase,
            vec![Mutation::PhaseRemoved {
                index,
                phase: Box::new(phase),
                constraints,
            }],
        );
        let mut events = structure_events();
        events.push(Event::ConstraintsChanged);
        self.commit(entry, events);
        Ok(())
    }

    pub fn rename_phase(&mut self, name: &str, new_name: &str) -> Result<()> {
        self.ensure_idle("rename_phase")?;
        if name == new_name {
            return Ok(());
        }
        if new_name.trim().is_empty() {
            return Err(PowderFitError::InvalidInput("phase name cannot be empty".to_string()));
        }
        let index = self.phase_index(name)?;
        let old = self.state.graph.rename_phase(index, new_name)?;
        let entry = UndoEntry::with_mutations(
            format!("Rename phase {} to {}", name, new_name),
            Owner::Phase,
            vec![Mutation::PhaseRenamed {
                index,
                old,
                new: new_name.to_string(),
            }],
        );
        self.commit(entry, structure_events());
        Ok(())
    }

    pub fn set_space_group(&mut self, phase: &str, symbol: &str) -> Result<()> {
        self.ensure_idle("set_space_group")?;
        let index = self.phase_index(phase)?;
        if self.state.graph.phases()[index].space_group() == symbol {
            return Ok(());
        }
        let old = self.state.graph.set_space_group(index, symbol)?;
        let entry = UndoEntry::with_mutations(
            format!("Space group of {}", phase),
            Owner::Phase,
            vec![Mutation::SpaceGroup {
                index,
                old,
                new: symbol.to_string(),
            }],
        );
        self.commit(entry, vec![Event::StructureChanged]);
        Ok(())
    }

    fn phase_index(&self, name: &str) -> Result<usize> {
        self.state
            .graph
            .phase_index(name)
            .ok_or_else(|| PowderFitError::NotFound(format!("phase '{}'", name)))
    }

    /// Append the default atom to a phase. Returns its label.
    pub fn add_default_atom(&mut self, phase: &str) -> Result<String> {
        self.ensure_idle("add_default_atom")?;
        let phase_index = self.phase_index(phase)?;
        let atom = self.state.graph.default_atom(phase_index)?;
        let label = atom.label().to_string();
        let index = self
            .state
            .graph
            .insert_atom(phase_index, usize::MAX, atom.clone())?;

        let entry = UndoEntry::with_mutations(
            format!("Add atom {} to {}", label, phase),
            Owner::Phase,
            vec![Mutation::AtomInserted {
                phase: phase_index,
                index,
                atom: Box::new(atom),
                constraints: Vec::new(),
            }],
        );
        self.commit(entry, vec![Event::StructureChanged, Event::ParametersChanged]);
        Ok(label)
    }

    pub fn remove_atom(&mut self, phase: &str, label: &str) -> Result<()> {
        self.ensure_idle("remove_atom")?;
        let phase_index = self.phase_index(phase)?;
        let (index, atom) = self.state.graph.remove_atom(phase_index, label)?;
        let constraints = self.state.constraints.remove_referencing(&atom.parameter_ids());

        let entry = UndoEntry::with_mutations(
            format!("Remove atom {} from {}", label, phase),
            Owner::Phase,
            vec![Mutation::AtomRemoved {
                phase: phase_index,
                index,
                atom: Box::new(atom),
                constraints,
            }],
        );
        self.commit(
            entry,
            vec![
                Event::StructureChanged,
                Event::ParametersChanged,
                Event::ConstraintsChanged,
            ],
        );
        Ok(())
    }

    /// Replace every phase at once (structure import). Not undoable: the
    /// history is cleared because older entries refer to the replaced phases.
    /// Build the phases with ids from [`ids_mut`](Self::ids_mut).
    pub fn replace_phases(&mut self, phases: Vec<Phase>) -> Result<()> {
        self.ensure_idle("replace_phases")?;
        let old_ids: Vec<ParamId> = self
            .state
            .graph
            .phases()
            .iter()
            .flat_map(Phase::parameter_ids)
            .collect();

        let replaced = self.state.graph.replace_phases(phases)?;

        let dropped = self.state.constraints.remove_referencing(&old_ids);
        self.history.reset();
        info!(
            replaced = replaced.len(),
            phases = self.state.graph.phases().len(),
            constraints_dropped = dropped.len(),
            "phases replaced"
        );
        let mut events = structure_events();
        events.push(Event::ConstraintsChanged);
        self.publish(true, events);
        Ok(())
    }

    // Background

    /// Add a background point at `x`. Returns the id of its `y` parameter.
    pub fn add_background_point(&mut self, x: f64, y: f64) -> Result<ParamId> {
        self.ensure_idle("add_background_point")?;
        let point = BackgroundPoint::new(self.state.graph.ids_mut(), x, y);
        let id = point.y.id();
        self.state.graph.insert_background(point.clone())?;

        let entry = UndoEntry::with_mutations(
            format!("Add background point at {}", x),
            Owner::Settings,
            vec![Mutation::BackgroundInserted {
                point,
                constraints: Vec::new(),
            }],
        );
        self.commit(entry, vec![Event::ParametersChanged]);
        Ok(id)
    }

    pub fn remove_background_point(&mut self, x: f64) -> Result<()> {
        self.ensure_idle("remove_background_point")?;
        let (_, point) = self.state.graph.remove_background(x)?;
        let constraints = self.state.constraints.remove_referencing(&[point.y.id()]);

        let entry = UndoEntry::with_mutations(
            format!("Remove background point at {}", x),
            Owner::Settings,
            vec![Mutation::BackgroundRemoved { point, constraints }],
        );
        self.commit(entry, vec![Event::ParametersChanged]);
        Ok(())
    }

    // Constraints

    /// Add a constraint and apply it. The constraint and the values it moves
    /// form one undo entry.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<usize> {
        self.ensure_idle("add_constraint")?;
        let mut graph = self.state.graph.clone();
        let mut constraints = self.state.constraints.clone();
        let (index, changes) = constraints.add(constraint.clone(), &mut graph)?;

        let owner = owner_of(graph.scope(constraint.dependent()));
        let label = format!("Add constraint {}", constraint.describe(&graph));
        self.state.graph = graph;
        self.state.constraints = constraints;

        let mut entry = UndoEntry::new(label, owner);
        entry.push(Mutation::ConstraintInserted { index, constraint });
        for mutation in value_mutations(changes) {
            entry.push(mutation);
        }
        self.commit(entry, vec![Event::ConstraintsChanged, Event::ParametersChanged]);
        Ok(index)
    }

    /// Parse and add a constraint such as
    /// `phases.A.cell.length_b = 1 * phases.A.cell.length_a`.
    pub fn add_constraint_text(&mut self, text: &str) -> Result<usize> {
        let constraint = ConstraintExpression::parse(text)?.resolve(&self.state.graph)?;
        self.add_constraint(constraint)
    }

    /// Remove a constraint. Values it set are kept.
    pub fn remove_constraint(&mut self, index: usize) -> Result<()> {
        self.ensure_idle("remove_constraint")?;
        let constraint = self.state.constraints.remove(index)?;
        let owner = owner_of(self.state.graph.scope(constraint.dependent()));
        let entry = UndoEntry::with_mutations(
            format!("Remove constraint {}", constraint.describe(&self.state.graph)),
            owner,
            vec![Mutation::ConstraintRemoved { index, constraint }],
        );
        self.commit(entry, vec![Event::ConstraintsChanged]);
        Ok(())
    }

    /// Enable or disable a constraint. Enabling applies it immediately.
    pub fn toggle_constraint(&mut self, index: usize, enabled: bool) -> Result<()> {
        self.ensure_idle("toggle_constraint")?;
        let current = self
            .state
            .constraints
            .get(index)
            .ok_or_else(|| PowderFitError::InvalidConstraint(format!("no constraint at index {}", index)))?;
        if current.enabled() == enabled {
            return Ok(());
        }
        let owner = owner_of(self.state.graph.scope(current.dependent()));

        let mut graph = self.state.graph.clone();
        let mut constraints = self.state.constraints.clone();
        let changes = constraints.toggle(index, enabled, &mut graph)?;
        self.state.graph = graph;
        self.state.constraints = constraints;

        let label = format!("{} constraint {}", if enabled { "Enable" } else { "Disable" }, index + 1);
        let mut entry = UndoEntry::new(label, owner);
        entry.push(Mutation::ConstraintToggled {
            index,
            old: !enabled,
            new: enabled,
        });
        for mutation in value_mutations(changes) {
            entry.push(mutation);
        }
        self.commit(entry, vec![Event::ConstraintsChanged, Event::ParametersChanged]);
        Ok(())
    }

    // History

    /// Revert the latest entry. Returns the refresh group that was replayed,
    /// `None` when there was nothing to undo.
    pub fn undo(&mut self) -> Result<Option<RefreshGroup>> {
        self.ensure_idle("undo")?;
        let group = self.history.undo(&mut self.state)?;
        self.after_replay(group);
        Ok(group)
    }

    /// Re-apply the latest undone entry.
    pub fn redo(&mut self) -> Result<Option<RefreshGroup>> {
        self.ensure_idle("redo")?;
        let group = self.history.redo(&mut self.state)?;
        self.after_replay(group);
        Ok(group)
    }

    fn after_replay(&mut self, group: Option<RefreshGroup>) {
        let Some(group) = group else {
            return;
        };
        let mut events = Event::for_refresh(group);
        if group == RefreshGroup::None {
            events.push(self.minimizer_event());
        } else {
            events.push(Event::ConstraintsChanged);
            events.push(Event::ExperimentChanged);
            events.push(Event::CalculatorChanged(self.state.calculator.current_name().to_string()));
        }
        self.publish(group != RefreshGroup::None, events);
    }

    /// Forget all undo and redo entries.
    pub fn reset_history(&mut self) {
        self.history.reset();
        self.events.emit(&Event::UndoRedoChanged);
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.history.undo_label()
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.history.redo_label()
    }

    pub fn history_depth(&self) -> usize {
        self.history.depth()
    }

    // Calculator and minimizer selection

    /// Make another calculation backend available.
    pub fn register_backend(&mut self, backend: Arc<dyn CalculatorBackend>) -> Result<()> {
        self.state.calculator.register(backend)
    }

    /// Select the calculation backend. The cached curve is dropped and the
    /// plot recomputed with the new backend.
    pub fn switch_calculator(&mut self, name: &str) -> Result<()> {
        self.ensure_idle("switch_calculator")?;
        if self.state.calculator.current_name() == name {
            return Ok(());
        }
        let old = self.state.calculator.switch(name)?;
        let entry = UndoEntry::with_mutations(
            format!("Calculator {}", name),
            Owner::Settings,
            vec![Mutation::Calculator {
                old,
                new: name.to_string(),
            }],
        );
        self.commit(entry, vec![Event::CalculatorChanged(name.to_string())]);
        Ok(())
    }

    /// Make another minimizer engine available.
    pub fn register_minimizer(&mut self, engine: Arc<dyn Minimizer>) -> Result<()> {
        self.state.minimizers.register(engine)
    }

    /// Select a minimizer engine; its default method becomes current.
    pub fn select_engine(&mut self, name: &str) -> Result<()> {
        self.ensure_idle("select_engine")?;
        if self.state.minimizers.selection().engine == name {
            return Ok(());
        }
        let old = self.state.minimizers.select_engine(name)?;
        self.commit_minimizer(old);
        Ok(())
    }

    pub fn select_method(&mut self, method: &str) -> Result<()> {
        self.ensure_idle("select_method")?;
        if self.state.minimizers.selection().method == method {
            return Ok(());
        }
        let old = self.state.minimizers.select_method(method)?;
        self.commit_minimizer(old);
        Ok(())
    }

    fn commit_minimizer(&mut self, old: MinimizerSelection) {
        let new = self.state.minimizers.selection().clone();
        let entry = UndoEntry::with_mutations(
            format!("Minimizer {}", new),
            Owner::Session,
            vec![Mutation::Minimizer { old, new }],
        );
        let event = self.minimizer_event();
        self.commit(entry, vec![event]);
    }

    fn minimizer_event(&self) -> Event {
        let selection = self.state.minimizers.selection();
        Event::MinimizerChanged {
            engine: selection.engine.clone(),
            method: selection.method.clone(),
        }
    }

    // Experiment

    /// Adopt a dataset. The simulation range follows the data, and an empty
    /// background gets two points at the ends of the range, at the lowest
    /// measured intensity.
    pub fn load_experiment(&mut self, data: ExperimentData) -> Result<()> {
        self.ensure_idle("load_experiment")?;
        let range = SimulationRange::from_data(&data);
        let name = data.name().to_string();
        let baseline = data
            .y_slice()
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .max(0.0);

        let mut mutations = Vec::new();
        if self.state.graph.background().is_empty() {
            let mut graph = self.state.graph.clone();
            let mut xs = vec![range.x_min];
            if range.x_max > range.x_min {
                xs.push(range.x_max);
            }
            for x in xs {
                let point = BackgroundPoint::new(graph.ids_mut(), x, baseline);
                graph.insert_background(point.clone())?;
                mutations.push(Mutation::BackgroundInserted {
                    point,
                    constraints: Vec::new(),
                });
            }
            self.state.graph = graph;
        }

        let new = ExperimentSetup {
            state: ExperimentState::Loaded(data),
            range,
        };
        let old = std::mem::replace(&mut self.state.experiment, new.clone());
        mutations.insert(
            0,
            Mutation::Experiment {
                old: Box::new(old),
                new: Box::new(new),
            },
        );
        info!(experiment = %name, "experiment loaded");

        let entry = UndoEntry::with_mutations(format!("Load experiment {}", name), Owner::Settings, mutations);
        self.commit(entry, vec![Event::ExperimentChanged, Event::ParametersChanged]);
        Ok(())
    }

    /// Parse and load whitespace-separated `x y [e]` columns.
    pub fn load_experiment_text(&mut self, name: &str, text: &str) -> Result<()> {
        let data = ExperimentData::from_xye(name, text)?;
        self.load_experiment(data)
    }

    pub fn load_experiment_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let data = ExperimentData::from_path(path)?;
        self.load_experiment(data)
    }

    /// Drop the dataset. The plot is cleared until data is loaded or skipped.
    pub fn remove_experiment(&mut self) -> Result<()> {
        self.set_experiment_state(ExperimentState::NotSet, "Remove experiment")
    }

    /// Work without data: simulate on the simulation range grid.
    pub fn skip_experiment(&mut self) -> Result<()> {
        self.set_experiment_state(ExperimentState::Skipped, "Skip experiment")
    }

    fn set_experiment_state(&mut self, state: ExperimentState, label: &str) -> Result<()> {
        self.ensure_idle(label)?;
        if self.state.experiment.state == state {
            return Ok(());
        }
        let new = ExperimentSetup {
            state,
            range: self.state.experiment.range,
        };
        self.replace_experiment(new, label);
        Ok(())
    }

    /// Change the grid used when simulating without data.
    pub fn set_simulation_range(&mut self, range: SimulationRange) -> Result<()> {
        self.ensure_idle("set_simulation_range")?;
        range.validate(self.config.max_grid_points)?;
        if self.state.experiment.range == range {
            return Ok(());
        }
        let new = ExperimentSetup {
            state: self.state.experiment.state.clone(),
            range,
        };
        self.replace_experiment(new, "Simulation range");
        Ok(())
    }

    fn replace_experiment(&mut self, new: ExperimentSetup, label: &str) {
        let old = std::mem::replace(&mut self.state.experiment, new.clone());
        let entry = UndoEntry::with_mutations(
            label,
            Owner::Settings,
            vec![Mutation::Experiment {
                old: Box::new(old),
                new: Box::new(new),
            }],
        );
        self.commit(entry, vec![Event::ExperimentChanged]);
    }

    // Fitting

    /// Start a fit of the free parameters (not fixed, enabled, not derived by
    /// a constraint) against the loaded data on a background thread.
    pub fn fit(&mut self) -> Result<()> {
        if self.orchestrator.is_running() {
            warn!("fit requested while another fit is running");
            return Err(PowderFitError::FitAlreadyRunning);
        }
        let data = self
            .state
            .experiment
            .state
            .data()
            .ok_or_else(|| PowderFitError::InvalidExperiment("no experiment data loaded".to_string()))?;

        let derived = self.state.constraints.derived_ids();
        let free: Vec<ParamId> = self
            .state
            .graph
            .free_parameters()
            .into_iter()
            .filter(|id| !derived.contains(id))
            .collect();

        let problem = FitProblem::new(
            self.state.graph.clone(),
            self.state.constraints.clone(),
            self.state.calculator.backend(),
            data,
            free,
        )?;
        let (engine, method) = self.state.minimizers.current()?;
        info!(
            engine = engine.name(),
            method = %method,
            nvarys = problem.free().len(),
            "launching fit"
        );
        self.orchestrator.launch(FitJob::new(problem, engine, &method))?;
        self.events.emit(&Event::FitStatusChanged(FitStatus::Running));
        Ok(())
    }

    /// Collect a finished fit without blocking. Returns whether a fit
    /// completed during this call.
    pub fn poll_fit(&mut self) -> bool {
        match self.orchestrator.poll() {
            Some(outcome) => {
                self.complete_fit(outcome);
                true
            }
            None => false,
        }
    }

    /// Block until the running fit finishes and apply its outcome. Returns
    /// the resulting status.
    pub fn wait_fit(&mut self) -> FitStatus {
        if let Some(outcome) = self.orchestrator.wait() {
            self.complete_fit(outcome);
        }
        self.orchestrator.status()
    }

    fn complete_fit(&mut self, outcome: Result<FitOutcome>) {
        // A fit that stopped short still hands back its best parameters
        if let Ok(done) = &outcome {
            self.write_back(done);
        }
        let status = self.orchestrator.status();
        self.publish(
            true,
            vec![
                Event::ParametersChanged,
                Event::FitStatusChanged(status),
                Event::FitResultsChanged,
            ],
        );
    }

    /// Commit best-fit values as one `Fit` entry. Errors are attached to the
    /// parameters outside the undo history.
    fn write_back(&mut self, outcome: &FitOutcome) {
        let before = self.state.graph.values();
        let mut graph = self.state.graph.clone();
        for (id, value) in &outcome.values {
            if graph.set_value_clamped(*id, *value).is_err() {
                warn!(%id, "fitted parameter no longer exists");
            }
        }
        if let Err(e) = self.state.constraints.evaluate_all(&mut graph) {
            warn!(error = %e, "constraints could not be applied to fit result");
            return;
        }
        for (id, error) in &outcome.errors {
            if let Some(param) = graph.get_mut(*id) {
                param.set_error(*error);
            }
        }

        let mutations: Vec<Mutation> = graph
            .values()
            .into_iter()
            .filter_map(|(id, new)| {
                let old = *before.get(&id)?;
                (old != new).then_some(Mutation::Value { id, old, new })
            })
            .collect();
        self.state.graph = graph;
        self.history
            .commit(UndoEntry::with_mutations("Fit", Owner::Settings, mutations));
    }

    pub fn fit_status(&self) -> FitStatus {
        self.orchestrator.status()
    }

    /// Result of the last successful fit.
    pub fn fit_result(&self) -> Option<&FitResult> {
        self.orchestrator.result()
    }

    pub fn last_fit_error(&self) -> Option<&str> {
        self.orchestrator.last_error()
    }

    pub fn fit_elapsed(&self) -> Option<Duration> {
        self.orchestrator.elapsed()
    }

    // Presentation

    /// Current plot buffers, `None` while the experiment slot is unset.
    pub fn plot_buffers(&self) -> Option<&PlotBuffers> {
        self.plot.as_ref()
    }

    /// Recompute the plot buffers and notify subscribers.
    pub fn refresh(&mut self) {
        self.publish(true, Vec::new());
    }

    // Projects

    pub fn snapshot(&self) -> ProjectDocument {
        ProjectDocument {
            version: FORMAT_VERSION,
            graph: self.state.graph.clone(),
            constraints: self.state.constraints.clone(),
            experiment: self.state.experiment.clone(),
            calculator: self.state.calculator.current_name().to_string(),
            minimizer: self.state.minimizers.selection().clone(),
            fit_result: self.orchestrator.result().cloned(),
        }
    }

    /// Replace the session content with a project. History is cleared. A
    /// document that fails validation leaves the session untouched.
    pub fn restore(&mut self, document: ProjectDocument) -> Result<()> {
        self.ensure_idle("restore")?;
        document.validate(self.config.max_grid_points)?;
        let mut calculator = self.state.calculator.clone();
        if calculator.current_name() != document.calculator {
            calculator.switch(&document.calculator)?;
        }
        calculator.invalidate();
        let mut minimizers = self.state.minimizers.clone();
        minimizers.restore(&document.minimizer)?;

        self.state = SessionState {
            graph: document.graph,
            constraints: document.constraints,
            experiment: document.experiment,
            calculator,
            minimizers,
        };
        self.history.reset();
        self.orchestrator.reset(document.fit_result);
        info!(phases = self.state.graph.phases().len(), "project restored");

        let mut events = vec![Event::ProjectChanged];
        events.extend(structure_events());
        events.extend([
            Event::ConstraintsChanged,
            Event::ExperimentChanged,
            Event::CalculatorChanged(self.state.calculator.current_name().to_string()),
            self.minimizer_event(),
            Event::FitResultsChanged,
        ]);
        self.publish(true, events);
        Ok(())
    }

    // UI renderings

    /// Visible parameters as a list of objects.
    pub fn parameters_as_obj(&self, filter: &str) -> UiValue {
        UiValue::List(self.list_visible(filter).iter().map(UiValue::from).collect())
    }

    /// The last fit result, or null.
    pub fn fit_results_as_obj(&self) -> UiValue {
        self.fit_result().map_or(UiValue::Null, UiValue::from)
    }

    pub fn constraints_as_obj(&self) -> UiValue {
        let graph = &self.state.graph;
        UiValue::List(
            self.state
                .constraints
                .all()
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    ObjectBuilder::new()
                        .field("index", i + 1)
                        .field("expression", c.describe(graph))
                        .field("enabled", c.enabled())
                        .build()
                })
                .collect(),
        )
    }

    /// Summary shown in the status bar.
    pub fn status_as_obj(&self) -> UiValue {
        let selection = self.state.minimizers.selection();
        let experiment = match &self.state.experiment.state {
            ExperimentState::NotSet => UiValue::Null,
            ExperimentState::Skipped => UiValue::from("simulation"),
            ExperimentState::Loaded(data) => UiValue::from(data.name()),
        };
        ObjectBuilder::new()
            .field("phases", self.state.graph.phases().len())
            .field("parameters", self.state.graph.entries().len())
            .field("free_parameters", self.state.graph.free_parameters().len())
            .field("constraints", self.state.constraints.len())
            .field("experiment", experiment)
            .field("calculator", self.state.calculator.current_name())
            .field("minimizer", selection.engine.as_str())
            .field("method", selection.method.as_str())
            .field("fit_status", self.fit_status().as_str())
            .field("fit_elapsed", self.fit_elapsed().map(|d| d.as_secs_f64()))
            .field("can_undo", self.can_undo())
            .field("can_redo", self.can_redo())
            .field("undo_label", self.undo_label())
            .field("redo_label", self.redo_label())
            .build()
    }
}

fn structure_events() -> Vec<Event> {
    vec![
        Event::StructureChanged,
        Event::PhasesChanged,
        Event::ParametersChanged,
    ]
}
