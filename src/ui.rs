//! Tagged values exchanged with the UI.
//!
//! The UI binding layer is dynamically typed; [`UiValue`] is the only shape
//! data takes when it crosses that edge. Internal state stays strongly typed
//! and is converted here.

use crate::error::{PowderFitError, Result};
use crate::fitting::orchestrator::FitResult;
use crate::parameters::graph::VisibleParameter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A number, string, bool, structured object, list or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UiValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Object(BTreeMap<String, UiValue>),
    List(Vec<UiValue>),
    Null,
}

impl UiValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            // Text fields in the parameter table submit numbers as strings
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Field of an object value.
    pub fn get(&self, key: &str) -> Option<&UiValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<f64> for UiValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<usize> for UiValue {
    fn from(v: usize) -> Self {
        Self::Number(v as f64)
    }
}

impl From<bool> for UiValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for UiValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for UiValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<UiValue>> From<Option<T>> for UiValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Builds an [`UiValue::Object`] field by field.
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    fields: BTreeMap<String, UiValue>,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: &str, value: impl Into<UiValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> UiValue {
        UiValue::Object(self.fields)
    }
}

impl From<&VisibleParameter> for UiValue {
    fn from(p: &VisibleParameter) -> Self {
        ObjectBuilder::new()
            .field("index", p.index)
            .field("id", p.id.0 as f64)
            .field("path", p.path.as_str())
            .field("value", p.value)
            .field("unit", p.unit.as_str())
            .field("fixed", p.fixed)
            .field("error", p.error)
            .build()
    }
}

impl From<&FitResult> for UiValue {
    fn from(r: &FitResult) -> Self {
        ObjectBuilder::new()
            .field("success", r.success)
            .field("nvarys", r.nvarys)
            .field("gof", r.gof)
            .field("redchi", r.redchi)
            .field("iterations", r.iterations)
            .field("message", r.message.as_str())
            .build()
    }
}

/// Edits the parameter table can submit for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterEdit {
    Value(f64),
    Fixed(bool),
    Enabled(bool),
}

impl ParameterEdit {
    /// Decode `{"value": 1.0}`, `{"fixed": true}` or `{"enabled": false}`, or
    /// a bare number meaning a value edit.
    pub fn from_ui(value: &UiValue) -> Result<Self> {
        if let Some(v) = value.as_f64() {
            return Ok(Self::Value(v));
        }
        if let Some(v) = value.get("value").and_then(UiValue::as_f64) {
            return Ok(Self::Value(v));
        }
        if let Some(b) = value.get("fixed").and_then(UiValue::as_bool) {
            return Ok(Self::Fixed(b));
        }
        if let Some(b) = value.get("enabled").and_then(UiValue::as_bool) {
            return Ok(Self::Enabled(b));
        }
        Err(PowderFitError::InvalidInput(format!(
            "unsupported parameter edit: {:?}",
            value
        )))
    }
}
