//! Error types for nlcmd.
//!
//! One enum per concern. `EngineError` is what the router hands back to a
//! caller; everything below it converts into it with `?`.

use crate::schema::ParamType;
use crate::validator::ValidationErrors;
use thiserror::Error;

/// Action registry failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Action already registered: {0}")]
    Duplicate(String),

    #[error("Action not found: {0}")]
    NotFound(String),

    #[error("Invalid schema for action '{id}': {reason}")]
    InvalidSchema { id: String, reason: String },
}

/// Failure reported by an action handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Parameter missing or of the wrong shape inside a handler
    pub fn bad_param(name: &str, reason: &str) -> Self {
        Self::new(format!("parameter '{}': {}", name, reason))
    }
}

/// Runtime faults raised while executing a single step
///
/// Most of these mirror validation violations. The executor re-checks them
/// because it never trusts that the plan it receives is the one that was
/// validated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepFault {
    #[error("action '{0}' is not registered")]
    UnknownAction(String),

    #[error("parameter '{param}' references unbound name '{name}'")]
    UnboundReference { param: String, name: String },

    #[error("parameter '{param}' uses the current item outside of foreach")]
    ItemOutsideForeach { param: String },

    #[error("parameter '{param}' reads field '{field}' missing from the current item")]
    ItemFieldMissing { param: String, field: String },

    #[error("parameter '{param}' expected {expected}, got {found}")]
    TypeMismatch {
        param: String,
        expected: ParamType,
        found: &'static str,
    },

    #[error("required parameter '{0}' is missing")]
    MissingParam(String),

    #[error("parameter '{0}' is not declared by the action")]
    UnexpectedParam(String),

    #[error("foreach target '{0}' is not bound")]
    ForeachUnbound(String),

    #[error("foreach target '{name}' holds {found}, not a sequence")]
    ForeachNotSequence { name: String, found: &'static str },

    #[error("{failed} of {total} items failed")]
    ItemsFailed { failed: usize, total: usize },

    #[error("name '{0}' is already bound")]
    DuplicateBinding(String),

    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
}

/// External planner failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("planner did not answer within {0}ms")]
    Timeout(u64),

    #[error("planner returned a malformed plan: {0}")]
    Malformed(String),

    #[error("planner backend error: {0}")]
    Backend(String),
}

/// Result projection failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("unsupported output format '{0}' (expected text, json or table)")]
    UnsupportedFormat(String),

    #[error("failed to serialize result: {0}")]
    Serialization(String),
}

/// Top-level error surfaced to callers of the router
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("unable to plan this request (intent '{intent}'): {reason}")]
    Unplannable { intent: String, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("internal error: {0}")]
    Internal(String),
}
