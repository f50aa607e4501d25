//! Undo/redo stack
//!
//! Every committed change to a session is recorded as an [`UndoEntry`]: a label
//! for the UI, the class of object that owned the change and a list of
//! invertible [`Mutation`]s. Undo applies the inverses in reverse order, redo
//! re-applies the mutations in order. Either every mutation of an entry lands
//! or the target is left as it was. The stack does not know how to apply a
//! mutation; the owner of the state implements [`Revertible`].

use crate::error::Result;
use crate::experiment::ExperimentSetup;
use crate::fitting::minimizer::MinimizerSelection;
use crate::parameters::constraints::Constraint;
use crate::parameters::graph::{AtomSite, BackgroundPoint, Phase};
use crate::parameters::parameter::ParamId;
use tracing::debug;

/// Class of the object that owned a change, captured at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// A phase, its lattice or one of its atoms.
    Phase,
    /// Pattern, instrument, background, experiment or calculator.
    Settings,
    /// Session-level selections that have no scientific content.
    Session,
}

/// What the UI has to refresh after an undo or redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshGroup {
    /// Phases changed shape; rebuild structure views and recompute.
    Structure,
    /// Only parameter values changed; recompute and refresh the listing.
    Parameters,
    /// Nothing scientific changed.
    None,
}

/// One invertible change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Value {
        id: ParamId,
        old: f64,
        new: f64,
    },
    Fixed {
        id: ParamId,
        old: bool,
        new: bool,
    },
    Enabled {
        id: ParamId,
        old: bool,
        new: bool,
    },
    PhaseInserted {
        index: usize,
        phase: Box<Phase>,
        constraints: Vec<(usize, Constraint)>,
    },
    PhaseRemoved {
        index: usize,
        phase: Box<Phase>,
        constraints: Vec<(usize, Constraint)>,
    },
    PhaseRenamed {
        index: usize,
        old: String,
        new: String,
    },
    SpaceGroup {
        index: usize,
        old: String,
        new: String,
    },
    AtomInserted {
        phase: usize,
        index: usize,
        atom: Box<AtomSite>,
        constraints: Vec<(usize, Constraint)>,
    },
    AtomRemoved {
        phase: usize,
        index: usize,
        atom: Box<AtomSite>,
        constraints: Vec<(usize, Constraint)>,
    },
    BackgroundInserted {
        point: BackgroundPoint,
        constraints: Vec<(usize, Constraint)>,
    },
    BackgroundRemoved {
        point: BackgroundPoint,
        constraints: Vec<(usize, Constraint)>,
    },
    ConstraintInserted {
        index: usize,
        constraint: Constraint,
    },
    ConstraintRemoved {
        index: usize,
        constraint: Constraint,
    },
    ConstraintToggled {
        index: usize,
        old: bool,
        new: bool,
    },
    Experiment {
        old: Box<ExperimentSetup>,
        new: Box<ExperimentSetup>,
    },
    Calculator {
        old: String,
        new: String,
    },
    Minimizer {
        old: MinimizerSelection,
        new: MinimizerSelection,
    },
}

impl Mutation {
    /// The mutation that undoes this one.
    pub fn inverse(&self) -> Mutation {
        match self.clone() {
            Self::Value { id, old, new } => Self::Value { id, old: new, new: old },
            Self::Fixed { id, old, new } => Self::Fixed { id, old: new, new: old },
            Self::Enabled { id, old, new } => Self::Enabled { id, old: new, new: old },
            Self::PhaseInserted {
                index,
                phase,
                constraints,
            } => Self::PhaseRemoved {
                index,
                phase,
                constraints,
            },
            Self::PhaseRemoved {
                index,
                phase,
                constraints,
            } => Self::PhaseInserted {
                index,
                phase,
                constraints,
            },
            Self::PhaseRenamed { index, old, new } => Self::PhaseRenamed { index, old: new, new: old },
            Self::SpaceGroup { index, old, new } => Self::SpaceGroup { index, old: new, new: old },
            Self::AtomInserted {
                phase,
                index,
                atom,
                constraints,
            } => Self::AtomRemoved {
                phase,
                index,
                atom,
                constraints,
            },
            Self::AtomRemoved {
                phase,
                index,
                atom,
                constraints,
            } => Self::AtomInserted {
                phase,
                index,
                atom,
                constraints,
            },
            Self::BackgroundInserted { point, constraints } => {
                Self::BackgroundRemoved { point, constraints }
            }
            Self::BackgroundRemoved { point, constraints } => {
                Self::BackgroundInserted { point, constraints }
            }
            Self::ConstraintInserted { index, constraint } => {
                Self::ConstraintRemoved { index, constraint }
            }
            Self::ConstraintRemoved { index, constraint } => {
                Self::ConstraintInserted { index, constraint }
            }
            Self::ConstraintToggled { index, old, new } => {
                Self::ConstraintToggled { index, old: new, new: old }
            }
            Self::Experiment { old, new } => Self::Experiment { old: new, new: old },
            Self::Calculator { old, new } => Self::Calculator { old: new, new: old },
            Self::Minimizer { old, new } => Self::Minimizer { old: new, new: old },
        }
    }
}

/// State that undo entries can be applied to.
pub trait Revertible {
    /// Apply one mutation in its forward direction.
    fn apply(&mut self, mutation: &Mutation) -> Result<()>;
}

/// A labelled group of mutations undone and redone as one step.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    label: String,
    owner: Owner,
    mutations: Vec<Mutation>,
}

impl UndoEntry {
    pub fn new(label: impl Into<String>, owner: Owner) -> Self {
        Self {
            label: label.into(),
            owner,
            mutations: Vec::new(),
        }
    }

    pub fn with_mutations(label: impl Into<String>, owner: Owner, mutations: Vec<Mutation>) -> Self {
        Self {
            label: label.into(),
            owner,
            mutations,
        }
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Refresh group replayed on undo or redo of this entry.
    pub fn refresh_group(&self) -> RefreshGroup {
        match self.owner {
            Owner::Session => RefreshGroup::None,
            Owner::Phase => RefreshGroup::Structure,
            Owner::Settings if self.mutations.len() > 1 => RefreshGroup::Structure,
            Owner::Settings => RefreshGroup::Parameters,
        }
    }
}

/// Linear history with a redo list. Owned by the session.
#[derive(Debug, Clone)]
pub struct UndoStack {
    history: Vec<UndoEntry>,
    future: Vec<UndoEntry>,
    recording: bool,
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoStack {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            future: Vec::new(),
            recording: true,
        }
    }

    /// Record an entry and drop the redo list. Ignored while recording is
    /// disabled or when the entry is empty. Returns whether it was recorded.
    pub fn commit(&mut self, entry: UndoEntry) -> bool {
        if !self.recording || entry.is_empty() {
            return false;
        }
        debug!(label = entry.label(), mutations = entry.mutations.len(), "commit");
        self.history.push(entry);
        self.future.clear();
        true
    }

    /// Revert the latest entry. `None` when there is nothing to undo. On
    /// error the entry stays on the stack and `target` is unchanged.
    pub fn undo<T: Revertible + Clone>(&mut self, target: &mut T) -> Result<Option<RefreshGroup>> {
        let Some(entry) = self.history.pop() else {
            return Ok(None);
        };
        let inverses: Vec<Mutation> = entry.mutations.iter().rev().map(Mutation::inverse).collect();
        if let Err(e) = apply_all(target, &inverses) {
            self.history.push(entry);
            return Err(e);
        }
        debug!(label = entry.label(), "undo");
        let group = entry.refresh_group();
        self.future.push(entry);
        Ok(Some(group))
    }

    /// Re-apply the latest undone entry. `None` when there is nothing to redo.
    /// On error the entry stays on the redo list and `target` is unchanged.
    pub fn redo<T: Revertible + Clone>(&mut self, target: &mut T) -> Result<Option<RefreshGroup>> {
        let Some(entry) = self.future.pop() else {
            return Ok(None);
        };
        if let Err(e) = apply_all(target, &entry.mutations) {
            self.future.push(entry);
            return Err(e);
        }
        debug!(label = entry.label(), "redo");
        let group = entry.refresh_group();
        self.history.push(entry);
        Ok(Some(group))
    }

    /// Forget everything, e.g. after a project is loaded.
    pub fn reset(&mut self) {
        self.history.clear();
        self.future.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.history.last().map(|e| e.label())
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.future.last().map(|e| e.label())
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn depth(&self) -> usize {
        self.history.len()
    }
}

/// Apply `mutations` to a copy of `target` and swap it in only if all succeed.
fn apply_all<T: Revertible + Clone>(target: &mut T, mutations: &[Mutation]) -> Result<()> {
    let mut staged = target.clone();
    for mutation in mutations {
        staged.apply(mutation)?;
    }
    *target = staged;
    Ok(())
}
