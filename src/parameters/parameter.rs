//! Parameter definition
//!
//! A `Parameter` is one scalar of the scientific model (a lattice length, an
//! atom coordinate, the instrument wavelength, ...). It is owned by exactly one
//! object in the [`ParameterGraph`](crate::parameters::graph::ParameterGraph)
//! and referenced everywhere else by its [`ParamId`].

use crate::parameters::bounds::{Bounds, BoundsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a parameter for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamId(pub u64);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out parameter ids. Serialized with the graph so a restored project
/// keeps allocating past the ids it already contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> ParamId {
        if self.next == 0 {
            self.next = 1;
        }
        let id = ParamId(self.next);
        self.next += 1;
        id
    }

    /// Make sure `id` is never handed out again.
    pub fn reserve(&mut self, id: ParamId) {
        if self.next <= id.0 {
            self.next = id.0.saturating_add(1);
        }
    }

    /// Create a parameter with a fresh id.
    pub fn parameter(&mut self, name: &str, value: f64, unit: &str) -> Parameter {
        Parameter::new(self.next_id(), name, value, unit)
    }
}

/// A single named parameter of the scientific model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    id: ParamId,

    /// Leaf name, e.g. `length_a` or `fract_x`. The dotted path is derived
    /// from the owning objects.
    name: String,

    value: f64,

    unit: String,

    #[serde(default)]
    bounds: Bounds,

    /// Fixed parameters are excluded from fitting.
    fixed: bool,

    /// Disabled parameters are hidden from the parameter listing.
    enabled: bool,

    /// Standard error from the last fit that varied this parameter.
    #[serde(default)]
    error: Option<f64>,
}

impl Parameter {
    /// Create a fixed, enabled, unbounded parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use powderfit_rs::parameters::parameter::{ParamId, Parameter};
    ///
    /// let param = Parameter::new(ParamId(7), "length_a", 8.56, "Å");
    /// assert_eq!(param.value(), 8.56);
    /// assert!(param.fixed());
    /// assert!(param.error().is_none());
    /// ```
    pub fn new(id: ParamId, name: &str, value: f64, unit: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            bounds: Bounds::default(),
            fixed: true,
            enabled: true,
            error: None,
        }
    }

    /// Builder-style bounds; the value is clamped into the new range.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Result<Self, BoundsError> {
        self.set_bounds(min, max)?;
        Ok(self)
    }

    /// Builder-style bounds from an already validated range.
    pub(crate) fn bounded(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self.value = bounds.clamp(self.value);
        self
    }

    /// Builder-style `fixed` flag.
    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn fixed(&self) -> bool {
        self.fixed
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn error(&self) -> Option<f64> {
        self.error
    }

    /// Set the value, rejecting values outside the bounds.
    pub fn set_value(&mut self, value: f64) -> Result<(), BoundsError> {
        self.bounds.check(value)?;
        self.value = value;
        Ok(())
    }

    /// Set the value, clamping into the bounds. Used when a constraint or a
    /// minimizer produces the value rather than a user.
    pub(crate) fn set_value_clamped(&mut self, value: f64) {
        if value.is_finite() {
            self.value = self.bounds.clamp(value);
        }
    }

    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), BoundsError> {
        let bounds = Bounds::new(min, max)?;
        self.bounds = bounds;
        self.value = bounds.clamp(self.value);
        Ok(())
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_error(&mut self, error: Option<f64>) {
        self.error = error;
    }
}
