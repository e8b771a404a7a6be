//! Action schemas - typed declarations for every action in the catalog
//!
//! A schema says which parameters an action takes, their types, whether
//! they are required, and what shape of value the action returns. The
//! validator checks plans against these declarations; the executor uses the
//! same coercion rules at runtime.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

// ============================================================================
// Parameter Types
// ============================================================================

/// Declared type of an action parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    /// Coerce a JSON value to this type without losing information
    ///
    /// Returns `None` when the value cannot be represented exactly:
    /// `"42"` becomes integer 42, `"forty-two"` does not, `3.5` is not an
    /// integer. `null` never coerces.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => None,

            (ParamType::String, Value::String(_)) => Some(value.clone()),
            (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64().and_then(integral_f64)
                }
            }
            (ParamType::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }

            (ParamType::Number, Value::Number(_)) => Some(value.clone()),
            (ParamType::Number, Value::String(s)) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Some(Value::from(i))
                } else {
                    s.parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                        .map(Value::Number)
                }
            }

            (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Boolean, Value::String(s)) => {
                if s.eq_ignore_ascii_case("true") {
                    Some(Value::Bool(true))
                } else if s.eq_ignore_ascii_case("false") {
                    Some(Value::Bool(false))
                } else {
                    None
                }
            }

            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Largest integer an f64 holds exactly (2^53)
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

fn integral_f64(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_F64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

/// Where a parameter ends up in a rendered command (informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamSource {
    Path,
    Query,
    Body,
    #[default]
    Unknown,
}

/// Declared shape of an action's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    Scalar,
    Sequence,
    Object,
    /// Not declared; checked at runtime only
    #[default]
    Any,
}

impl ResultShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultShape::Scalar => "scalar",
            ResultShape::Sequence => "sequence",
            ResultShape::Object => "object",
            ResultShape::Any => "any",
        }
    }

    /// Can a `foreach` iterate over a binding of this shape?
    pub fn is_iterable(&self) -> bool {
        matches!(self, ResultShape::Sequence | ResultShape::Any)
    }

    /// Can a binding of this shape feed a scalar-typed parameter?
    pub fn fits_scalar_param(&self) -> bool {
        matches!(self, ResultShape::Scalar | ResultShape::Any)
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level of an action, checked against the safety policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionRisk {
    #[default]
    Low,
    Medium,
    High,
}

impl ActionRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionRisk::Low => "low",
            ActionRisk::Medium => "medium",
            ActionRisk::High => "high",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ActionRisk::Low => "Low risk - read-only, no side effects",
            ActionRisk::Medium => "Medium risk - may change application state",
            ActionRisk::High => "High risk - destructive or hard to reverse",
        }
    }
}

impl fmt::Display for ActionRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the JSON type of a value, for error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Schemas
// ============================================================================

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    pub required: bool,

    #[serde(default)]
    pub source: ParamSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            source: ParamSource::Unknown,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn source(mut self, source: ParamSource) -> Self {
        self.source = source;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Full declaration of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSchema {
    /// Unique, stable identifier (e.g. "shell.find_files")
    pub id: String,

    /// Human-readable description, shown to the planner
    pub description: String,

    /// Parameters in declaration order
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    #[serde(default)]
    pub returns: ResultShape,

    #[serde(default)]
    pub risk: ActionRisk,
}

impl ActionSchema {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            params: Vec::new(),
            returns: ResultShape::Any,
            risk: ActionRisk::Low,
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn returns(mut self, shape: ResultShape) -> Self {
        self.returns = shape;
        self
    }

    pub fn risk(mut self, risk: ActionRisk) -> Self {
        self.risk = risk;
        self
    }

    pub fn get_param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }
}
