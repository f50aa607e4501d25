//! Implementation of relational constraints between parameters
//!
//! Two kinds of constraint are supported, matching what the application exposes
//! in its constraint editor:
//!
//! - numeric: `dependent <relop> value`, where `==` pins the dependent and the
//!   inequalities clamp it;
//! - object: `dependent = value <op> independent`, which derives the dependent
//!   from another parameter.
//!
//! Constraints are evaluated in insertion order. A dependent may only feed
//! enabled constraints placed after the one that sets it, which rules out
//! cycles and reads of values not yet updated.

use crate::error::{PowderFitError, Result};
use crate::parameters::graph::ParameterGraph;
use crate::parameters::parameter::ParamId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Operator of a numeric constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationalOp {
    /// Equal to (==)
    Equal,

    /// Less than (<)
    Less,

    /// Less than or equal to (<=)
    LessEqual,

    /// Greater than (>)
    Greater,

    /// Greater than or equal to (>=)
    GreaterEqual,
}

impl RelationalOp {
    /// Convert the operator to its text form
    pub fn as_operator(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
        }
    }

    /// The value the dependent takes after the constraint is applied.
    /// Strict and non-strict inequalities clamp to the same boundary.
    pub fn apply(&self, current: f64, value: f64) -> f64 {
        match self {
            Self::Equal => value,
            Self::Less | Self::LessEqual => current.min(value),
            Self::Greater | Self::GreaterEqual => current.max(value),
        }
    }
}

impl fmt::Display for RelationalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_operator())
    }
}

/// Operator of an object constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Mul,
    Div,
    Add,
    Sub,
}

impl ArithmeticOp {
    pub fn as_operator(&self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Add => "+",
            Self::Sub => "-",
        }
    }

    /// `lhs op rhs`, or `None` for a division by zero.
    pub fn apply(&self, lhs: f64, rhs: f64) -> Option<f64> {
        match self {
            Self::Mul => Some(lhs * rhs),
            Self::Div if rhs == 0.0 => None,
            Self::Div => Some(lhs / rhs),
            Self::Add => Some(lhs + rhs),
            Self::Sub => Some(lhs - rhs),
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_operator())
    }
}

/// A constraint between parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Numeric {
        dependent: ParamId,
        op: RelationalOp,
        value: f64,
        enabled: bool,
    },
    Object {
        dependent: ParamId,
        value: f64,
        op: ArithmeticOp,
        independent: ParamId,
        enabled: bool,
    },
}

impl Constraint {
    /// An enabled numeric constraint.
    pub fn numeric(dependent: ParamId, op: RelationalOp, value: f64) -> Self {
        Self::Numeric {
            dependent,
            op,
            value,
            enabled: true,
        }
    }

    /// An enabled object constraint `dependent = value op independent`.
    pub fn object(dependent: ParamId, value: f64, op: ArithmeticOp, independent: ParamId) -> Self {
        Self::Object {
            dependent,
            value,
            op,
            independent,
            enabled: true,
        }
    }

    pub fn dependent(&self) -> ParamId {
        match self {
            Self::Numeric { dependent, .. } | Self::Object { dependent, .. } => *dependent,
        }
    }

    pub fn independent(&self) -> Option<ParamId> {
        match self {
            Self::Numeric { .. } => None,
            Self::Object { independent, .. } => Some(*independent),
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Self::Numeric { enabled, .. } | Self::Object { enabled, .. } => *enabled,
        }
    }

    pub(crate) fn set_enabled(&mut self, value: bool) {
        match self {
            Self::Numeric { enabled, .. } | Self::Object { enabled, .. } => *enabled = value,
        }
    }

    /// Whether the constraint mentions the parameter on either side.
    pub fn references(&self, id: ParamId) -> bool {
        self.dependent() == id || self.independent() == Some(id)
    }

    /// New value of the dependent given the current graph, if any.
    fn target(&self, graph: &ParameterGraph) -> Result<Option<f64>> {
        let current = graph.parameter(self.dependent())?.value();
        Ok(match self {
            Self::Numeric { op, value, .. } => Some(op.apply(current, *value)),
            Self::Object {
                value,
                op,
                independent,
                ..
            } => op.apply(*value, graph.parameter(*independent)?.value()),
        })
    }

    /// Text form using parameter paths, e.g. `phases.A.cell.length_b = 1 * phases.A.cell.length_a`.
    pub fn describe(&self, graph: &ParameterGraph) -> String {
        let name = |id: ParamId| graph.path(id).unwrap_or_else(|| id.to_string());
        match self {
            Self::Numeric {
                dependent, op, value, ..
            } => format!("{} {} {}", name(*dependent), op, value),
            Self::Object {
                dependent,
                value,
                op,
                independent,
                ..
            } => format!("{} = {} {} {}", name(*dependent), value, op, name(*independent)),
        }
    }
}

/// One value written by constraint evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueChange {
    pub id: ParamId,
    pub old: f64,
    pub new: f64,
}

/// The ordered set of constraints of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintEngine {
    constraints: Vec<Constraint>,
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Constraint> {
        self.constraints.get(index)
    }

    pub fn all(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Validate a constraint against the current set. `replacing` names an
    /// index to ignore (the constraint being re-enabled).
    pub fn check(
        &self,
        candidate: &Constraint,
        graph: &ParameterGraph,
        replacing: Option<usize>,
    ) -> Result<()> {
        let dependent = candidate.dependent();
        if !graph.contains(dependent) {
            return Err(PowderFitError::UnknownParameter(dependent));
        }
        if let Some(independent) = candidate.independent() {
            if !graph.contains(independent) {
                return Err(PowderFitError::UnknownParameter(independent));
            }
            if independent == dependent {
                return Err(PowderFitError::CyclicConstraint(format!(
                    "{} depends on itself",
                    candidate.describe(graph)
                )));
            }
        }

        let feeds_another = self
            .constraints
            .iter()
            .enumerate()
            .filter(|(i, c)| Some(*i) != replacing && c.enabled())
            .any(|(_, c)| c.independent() == Some(dependent));
        if feeds_another {
            return Err(PowderFitError::CyclicConstraint(format!(
                "{} drives another enabled constraint",
                graph.path(dependent).unwrap_or_else(|| dependent.to_string())
            )));
        }

        // Evaluation runs in list order, so the independent must not be
        // written by a constraint further down.
        if let Some(independent) = candidate.independent() {
            let position = replacing.unwrap_or(self.constraints.len());
            let written_later = self
                .constraints
                .iter()
                .enumerate()
                .filter(|(i, c)| *i > position && c.enabled())
                .any(|(_, c)| c.dependent() == independent);
            if written_later {
                return Err(PowderFitError::CyclicConstraint(format!(
                    "{} is set by a later constraint",
                    graph.path(independent).unwrap_or_else(|| independent.to_string())
                )));
            }
        }
        Ok(())
    }

    /// Check a whole set, e.g. one read from a project file: every parameter
    /// must exist, and no enabled constraint may read a value that a later
    /// enabled constraint writes.
    pub fn validate(&self, graph: &ParameterGraph) -> Result<()> {
        for (i, constraint) in self.constraints.iter().enumerate() {
            for id in std::iter::once(constraint.dependent()).chain(constraint.independent()) {
                if !graph.contains(id) {
                    return Err(PowderFitError::UnknownParameter(id));
                }
            }
            if !constraint.enabled() {
                continue;
            }
            if constraint.independent() == Some(constraint.dependent()) {
                return Err(PowderFitError::CyclicConstraint(format!(
                    "{} depends on itself",
                    constraint.describe(graph)
                )));
            }
            let stale = self.constraints[..i]
                .iter()
                .filter(|c| c.enabled())
                .any(|c| c.independent() == Some(constraint.dependent()));
            if stale {
                return Err(PowderFitError::CyclicConstraint(format!(
                    "{} is read before it is set",
                    constraint.describe(graph)
                )));
            }
        }
        Ok(())
    }

    /// Add a constraint and evaluate the whole set. Returns the index of the
    /// new constraint and the values that changed.
    pub fn add(
        &mut self,
        constraint: Constraint,
        graph: &mut ParameterGraph,
    ) -> Result<(usize, Vec<ValueChange>)> {
        self.check(&constraint, graph, None)?;
        debug!(constraint = %constraint.describe(graph), "adding constraint");
        self.constraints.push(constraint);
        let changes = self.evaluate_all(graph)?;
        Ok((self.constraints.len() - 1, changes))
    }

    /// Enable or disable a constraint. Enabling re-runs the cycle check and
    /// evaluates the set.
    pub fn toggle(
        &mut self,
        index: usize,
        enabled: bool,
        graph: &mut ParameterGraph,
    ) -> Result<Vec<ValueChange>> {
        let constraint = self
            .constraints
            .get(index)
            .ok_or_else(|| PowderFitError::InvalidConstraint(format!("no constraint at index {}", index)))?;
        if constraint.enabled() == enabled {
            return Ok(Vec::new());
        }
        if enabled {
            self.check(constraint, graph, Some(index))?;
        }
        self.constraints[index].set_enabled(enabled);
        if enabled {
            self.evaluate_all(graph)
        } else {
            Ok(Vec::new())
        }
    }

    /// Apply every enabled constraint in insertion order. Running it again
    /// without intervening edits changes nothing.
    pub fn evaluate_all(&self, graph: &mut ParameterGraph) -> Result<Vec<ValueChange>> {
        for c in self.constraints.iter().filter(|c| c.enabled()) {
            graph.parameter(c.dependent())?;
            if let Some(independent) = c.independent() {
                graph.parameter(independent)?;
            }
        }

        let mut order = Vec::new();
        let mut changes: BTreeMap<ParamId, ValueChange> = BTreeMap::new();
        for c in self.constraints.iter().filter(|c| c.enabled()) {
            let Some(target) = c.target(graph)? else {
                continue;
            };
            let id = c.dependent();
            let old = graph.set_value_clamped(id, target)?;
            let new = graph.parameter(id)?.value();
            if old == new {
                continue;
            }
            changes
                .entry(id)
                .and_modify(|change| change.new = new)
                .or_insert_with(|| {
                    order.push(id);
                    ValueChange { id, old, new }
                });
        }

        Ok(order
            .into_iter()
            .filter_map(|id| changes.remove(&id))
            .filter(|change| change.old != change.new)
            .collect())
    }

    /// Dependents of enabled object constraints; these are not free in a fit.
    pub fn derived_ids(&self) -> BTreeSet<ParamId> {
        self.constraints
            .iter()
            .filter(|c| c.enabled() && c.independent().is_some())
            .map(|c| c.dependent())
            .collect()
    }

    pub(crate) fn insert(&mut self, index: usize, constraint: Constraint) {
        let index = index.min(self.constraints.len());
        self.constraints.insert(index, constraint);
    }

    pub(crate) fn remove(&mut self, index: usize) -> Result<Constraint> {
        if index >= self.constraints.len() {
            return Err(PowderFitError::InvalidConstraint(format!(
                "no constraint at index {}",
                index
            )));
        }
        Ok(self.constraints.remove(index))
    }

    pub(crate) fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let constraint = self.constraints.get_mut(index).ok_or_else(|| {
            PowderFitError::InvalidConstraint(format!("no constraint at index {}", index))
        })?;
        constraint.set_enabled(enabled);
        Ok(())
    }

    /// Remove every constraint that mentions one of `ids`. Returned with their
    /// original indices in ascending order so they can be re-inserted as-is.
    pub(crate) fn remove_referencing(&mut self, ids: &[ParamId]) -> Vec<(usize, Constraint)> {
        let mut removed = Vec::new();
        let mut index = 0;
        let mut original = 0;
        while index < self.constraints.len() {
            if ids.iter().any(|id| self.constraints[index].references(*id)) {
                removed.push((original, self.constraints.remove(index)));
            } else {
                index += 1;
            }
            original += 1;
        }
        removed
    }
}
