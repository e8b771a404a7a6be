//! Execution plans - ordered steps with typed inter-step references
//!
//! Wire shape (what a planner produces and what `to_wire` emits):
//!
//! ```text
//! {
//!   "metadata": {"name": "error-count"},
//!   "steps": [
//!     {"action": "shell.find_files", "params": {"path": "/var/log"}, "store_as": "log_files"},
//!     {"action": "shell.count_matches",
//!      "params": {"pattern": "ERROR", "file": {"$item": true}},
//!      "foreach": "log_files", "store_as": "error_counts"}
//!   ]
//! }
//! ```
//!
//! A parameter is a reference or a current-item marker only when its JSON
//! object has exactly one key, `$ref` or `$item`. Everything else is a
//! literal, so a literal string can never be mistaken for a reference.

use crate::error::PlanningError;
use crate::executor::FailurePolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const REF_KEY: &str = "$ref";
const ITEM_KEY: &str = "$item";

// ============================================================================
// Parameter Values
// ============================================================================

/// A step parameter: literal, reference to an earlier binding, or the
/// current `foreach` element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ParamValue {
    Literal(Value),

    /// Name bound by an earlier step's `store_as`
    Reference(String),

    /// The element being iterated, optionally one field of it
    CurrentItem { field: Option<String> },
}

impl ParamValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParamValue::Literal(value.into())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        ParamValue::Reference(name.into())
    }

    pub fn item() -> Self {
        ParamValue::CurrentItem { field: None }
    }

    pub fn item_field(field: impl Into<String>) -> Self {
        ParamValue::CurrentItem {
            field: Some(field.into()),
        }
    }

    pub fn as_reference(&self) -> Option<&str> {
        match self {
            ParamValue::Reference(name) => Some(name),
            _ => None,
        }
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.len() == 1 {
                if let Some(Value::String(name)) = map.get(REF_KEY) {
                    return ParamValue::Reference(name.clone());
                }
                if let Some(marker) = map.get(ITEM_KEY) {
                    let field = marker.as_str().map(str::to_string);
                    return ParamValue::CurrentItem { field };
                }
            }
        }
        ParamValue::Literal(value)
    }
}

impl From<ParamValue> for Value {
    fn from(param: ParamValue) -> Self {
        let mut map = Map::new();
        match param {
            ParamValue::Literal(value) => return value,
            ParamValue::Reference(name) => {
                map.insert(REF_KEY.to_string(), Value::String(name));
            }
            ParamValue::CurrentItem { field } => {
                let marker = field.map(Value::String).unwrap_or(Value::Bool(true));
                map.insert(ITEM_KEY.to_string(), marker);
            }
        }
        Value::Object(map)
    }
}

// ============================================================================
// Steps and Plans
// ============================================================================

/// One action invocation within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub action: String,

    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,

    /// Iterate the handler over this earlier binding (must be a sequence)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,

    /// Bind this step's result under this name for later steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,

    /// Overrides the executor's failure policy for this step only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<FailurePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PlanStep {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: BTreeMap::new(),
            foreach: None,
            store_as: None,
            on_error: None,
            description: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn literal(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.param(name, ParamValue::literal(value))
    }

    pub fn reference(self, name: impl Into<String>, binding: impl Into<String>) -> Self {
        self.param(name, ParamValue::reference(binding))
    }

    pub fn item(self, name: impl Into<String>) -> Self {
        self.param(name, ParamValue::item())
    }

    pub fn foreach(mut self, binding: impl Into<String>) -> Self {
        self.foreach = Some(binding.into());
        self
    }

    pub fn store_as(mut self, name: impl Into<String>) -> Self {
        self.store_as = Some(name.into());
        self
    }

    pub fn on_error(mut self, policy: FailurePolicy) -> Self {
        self.on_error = Some(policy);
        self
    }

    /// Every binding name this step reads (references and `foreach`)
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.params
            .values()
            .filter_map(ParamValue::as_reference)
            .chain(self.foreach.as_deref())
    }
}

/// Free-form plan metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Ordered sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub metadata: PlanMetadata,

    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            metadata: PlanMetadata {
                name: Some(name.into()),
                description: None,
            },
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Encode into the planner-facing wire shape
    pub fn to_wire(&self) -> Value {
        // Every field is plain data; serializing into a Value cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode a planner response; anything off-shape is rejected whole
    pub fn from_wire(value: Value) -> Result<Self, PlanningError> {
        serde_json::from_value(value).map_err(|e| PlanningError::Malformed(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> Result<Self, PlanningError> {
        serde_json::from_str(text).map_err(|e| PlanningError::Malformed(e.to_string()))
    }
}
