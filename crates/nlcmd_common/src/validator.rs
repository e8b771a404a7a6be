//! Plan Validator - the gate between an untrusted plan and the executor
//!
//! Validation is exhaustive, not fail-fast: every violation in the plan is
//! collected so whoever inspects a rejected plan sees all of its problems at
//! once. A plan with any violation never reaches the executor.
//!
//! Per step, in order:
//! 1. safety policy (denied action, risk above the configured maximum)
//! 2. action exists in the registry
//! 3. required parameters present
//! 4. no undeclared parameters
//! 5. literal values type-check or coerce losslessly
//! 6. references name a binding from a strictly earlier step
//! 7. current-item markers only inside `foreach` steps
//! 8. `foreach` names an earlier sequence binding
//! 9. `store_as` never rebinds a name

use crate::config::PolicyConfig;
use crate::plan::{ExecutionPlan, ParamValue, PlanStep};
use crate::registry::ActionRegistry;
use crate::schema::{json_type_name, ActionSchema, ResultShape};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// Violations
// ============================================================================

/// What is wrong
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    #[error("plan has no steps")]
    EmptyPlan,

    #[error("plan has {count} steps, more than the allowed {max}")]
    TooManySteps { count: usize, max: usize },

    #[error("action '{action}' is forbidden: {reason}")]
    ForbiddenAction { action: String, reason: String },

    #[error("unknown action '{action}'")]
    UnknownAction { action: String },

    #[error("missing required parameter '{param}'")]
    MissingParam { param: String },

    #[error("parameter '{param}' is not declared by the action")]
    UnexpectedParam { param: String },

    #[error("parameter '{param}' expected {expected}, got {found}")]
    TypeMismatch {
        param: String,
        expected: String,
        found: String,
    },

    #[error("parameter '{param}' references '{name}', which is only bound at step {bound_at}")]
    ForwardReference {
        param: String,
        name: String,
        bound_at: usize,
    },

    #[error("parameter '{param}' references '{name}', which is never bound")]
    UnboundReference { param: String, name: String },

    #[error("parameter '{param}' uses the current item but the step has no foreach")]
    ItemOutsideForeach { param: String },

    #[error("foreach target '{name}' is only bound at step {bound_at}")]
    ForeachForward { name: String, bound_at: usize },

    #[error("foreach target '{name}' is never bound")]
    ForeachUnbound { name: String },

    #[error("foreach target '{name}' is a {shape}, not a sequence")]
    ForeachNotSequence { name: String, shape: String },

    #[error("'{name}' is already bound by step {first_step}")]
    DuplicateBinding { name: String, first_step: usize },
}

/// One problem, located in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Step index, `None` for plan-level problems
    pub step: Option<usize>,
    pub action: Option<String>,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.step, &self.action) {
            (Some(step), Some(action)) => write!(f, "step {} ({}): {}", step, action, self.kind),
            (Some(step), None) => write!(f, "step {}: {}", step, self.kind),
            _ => write!(f, "plan: {}", self.kind),
        }
    }
}

/// Every violation found in a rejected plan
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    violations: Vec<Violation>,
}

impl ValidationErrors {
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter()
    }

    /// Violations attached to one step
    pub fn for_step(&self, step: usize) -> Vec<&Violation> {
        self.violations.iter().filter(|v| v.step == Some(step)).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan rejected with {} violation(s)", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "\n  - {}", violation)?;
        }
        Ok(())
    }
}

// ============================================================================
// Validated Plan
// ============================================================================

/// A plan that passed validation, with literals coerced to declared types
///
/// Only `PlanValidator` builds one, and the executor only accepts this type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    plan: ExecutionPlan,
}

impl ValidatedPlan {
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.plan.steps
    }

    pub fn len(&self) -> usize {
        self.plan.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.steps.is_empty()
    }
}

// ============================================================================
// Validator
// ============================================================================

pub struct PlanValidator {
    registry: Arc<ActionRegistry>,
    policy: PolicyConfig,
}

/// Where and with what shape a name was bound
#[derive(Debug, Clone, Copy)]
struct Binding {
    step: usize,
    shape: ResultShape,
}

/// Per-run validation state
struct Pass<'a> {
    /// First step that binds each name anywhere in the plan
    binding_sites: HashMap<&'a str, usize>,
    /// Names bound by steps already visited
    bound: HashMap<&'a str, Binding>,
    violations: Vec<Violation>,
}

impl<'a> Pass<'a> {
    fn push(&mut self, step: usize, action: &str, kind: ViolationKind) {
        self.violations.push(Violation {
            step: Some(step),
            action: Some(action.to_string()),
            kind,
        });
    }
}

impl PlanValidator {
    pub fn new(registry: Arc<ActionRegistry>, policy: PolicyConfig) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Validate a candidate plan; returns it normalized or every violation
    pub fn validate(&self, plan: &ExecutionPlan) -> Result<ValidatedPlan, ValidationErrors> {
        let mut pass = Pass {
            binding_sites: HashMap::new(),
            bound: HashMap::new(),
            violations: Vec::new(),
        };

        if plan.steps.is_empty() {
            pass.violations.push(Violation {
                step: None,
                action: None,
                kind: ViolationKind::EmptyPlan,
            });
        }
        if plan.steps.len() > self.policy.max_steps {
            pass.violations.push(Violation {
                step: None,
                action: None,
                kind: ViolationKind::TooManySteps {
                    count: plan.steps.len(),
                    max: self.policy.max_steps,
                },
            });
        }

        for (index, step) in plan.steps.iter().enumerate() {
            if let Some(name) = step.store_as.as_deref() {
                pass.binding_sites.entry(name).or_insert(index);
            }
        }

        let mut normalized = plan.clone();
        for (index, step) in plan.steps.iter().enumerate() {
            let params = self.check_step(index, step, &mut pass);
            normalized.steps[index].params = params;
        }

        if pass.violations.is_empty() {
            debug!(steps = plan.steps.len(), "Plan validated");
            Ok(ValidatedPlan { plan: normalized })
        } else {
            warn!(violations = pass.violations.len(), "Plan rejected");
            Err(ValidationErrors {
                violations: pass.violations,
            })
        }
    }

    /// Check one step, returning its parameters with literals coerced
    fn check_step<'a>(
        &self,
        index: usize,
        step: &'a PlanStep,
        pass: &mut Pass<'a>,
    ) -> std::collections::BTreeMap<String, ParamValue> {
        let action = step.action.as_str();
        let schema = self.registry.get(action).map(|a| &a.schema);

        // Safety policy
        if self.policy.is_denied(action) {
            pass.push(
                index,
                action,
                ViolationKind::ForbiddenAction {
                    action: action.to_string(),
                    reason: "denied by policy".to_string(),
                },
            );
        } else if let Some(schema) = schema {
            if schema.risk > self.policy.max_risk {
                pass.push(
                    index,
                    action,
                    ViolationKind::ForbiddenAction {
                        action: action.to_string(),
                        reason: format!(
                            "risk {} exceeds the allowed {}",
                            schema.risk, self.policy.max_risk
                        ),
                    },
                );
            }
        }

        // Action exists, parameters match its schema
        let mut params = step.params.clone();
        match schema {
            Some(schema) => self.check_params(index, step, schema, &mut params, pass),
            None => pass.push(
                index,
                action,
                ViolationKind::UnknownAction {
                    action: action.to_string(),
                },
            ),
        }

        // References and current-item markers
        for (param, value) in &step.params {
            match value {
                ParamValue::Reference(name) => {
                    let Some(shape) = self.check_reference(index, action, param, name, pass) else {
                        continue;
                    };
                    let scalar_param = schema.and_then(|s| s.get_param(param)).is_some();
                    if scalar_param && !shape.fits_scalar_param() {
                        let expected = schema
                            .and_then(|s| s.get_param(param))
                            .map(|p| p.param_type.to_string())
                            .unwrap_or_default();
                        pass.push(
                            index,
                            action,
                            ViolationKind::TypeMismatch {
                                param: param.clone(),
                                expected,
                                found: shape.to_string(),
                            },
                        );
                    }
                }
                ParamValue::CurrentItem { .. } if step.foreach.is_none() => {
                    pass.push(
                        index,
                        action,
                        ViolationKind::ItemOutsideForeach {
                            param: param.clone(),
                        },
                    );
                }
                _ => {}
            }
        }

        // foreach target
        if let Some(target) = step.foreach.as_deref() {
            match pass.bound.get(target).copied() {
                Some(binding) if !binding.shape.is_iterable() => pass.push(
                    index,
                    action,
                    ViolationKind::ForeachNotSequence {
                        name: target.to_string(),
                        shape: binding.shape.to_string(),
                    },
                ),
                Some(_) => {}
                None => {
                    let kind = match pass.binding_sites.get(target) {
                        Some(&bound_at) => ViolationKind::ForeachForward {
                            name: target.to_string(),
                            bound_at,
                        },
                        None => ViolationKind::ForeachUnbound {
                            name: target.to_string(),
                        },
                    };
                    pass.push(index, action, kind);
                }
            }
        }

        // store_as
        if let Some(name) = step.store_as.as_deref() {
            match pass.bound.get(name).copied() {
                Some(existing) => pass.push(
                    index,
                    action,
                    ViolationKind::DuplicateBinding {
                        name: name.to_string(),
                        first_step: existing.step,
                    },
                ),
                None => {
                    let shape = if step.foreach.is_some() {
                        ResultShape::Sequence
                    } else {
                        schema.map(|s| s.returns).unwrap_or(ResultShape::Any)
                    };
                    pass.bound.insert(name, Binding { step: index, shape });
                }
            }
        }

        params
    }

    /// Steps 3-5: presence, declaration, literal types
    fn check_params(
        &self,
        index: usize,
        step: &PlanStep,
        schema: &ActionSchema,
        params: &mut std::collections::BTreeMap<String, ParamValue>,
        pass: &mut Pass<'_>,
    ) {
        let action = step.action.as_str();

        for spec in schema.required_params() {
            let present = match step.params.get(&spec.name) {
                None => false,
                Some(ParamValue::Literal(value)) => !value.is_null(),
                Some(_) => true,
            };
            if !present {
                pass.push(
                    index,
                    action,
                    ViolationKind::MissingParam {
                        param: spec.name.clone(),
                    },
                );
            }
        }

        for (name, value) in &step.params {
            let Some(spec) = schema.get_param(name) else {
                pass.push(
                    index,
                    action,
                    ViolationKind::UnexpectedParam {
                        param: name.clone(),
                    },
                );
                continue;
            };

            let ParamValue::Literal(literal) = value else {
                continue;
            };
            if literal.is_null() {
                continue;
            }

            match spec.param_type.coerce(literal) {
                Some(coerced) => {
                    params.insert(name.clone(), ParamValue::Literal(coerced));
                }
                None => pass.push(
                    index,
                    action,
                    ViolationKind::TypeMismatch {
                        param: name.clone(),
                        expected: spec.param_type.to_string(),
                        found: json_type_name(literal).to_string(),
                    },
                ),
            }
        }
    }

    /// Returns the referenced binding's shape when it is bound earlier
    fn check_reference(
        &self,
        index: usize,
        action: &str,
        param: &str,
        name: &str,
        pass: &mut Pass<'_>,
    ) -> Option<ResultShape> {
        if let Some(binding) = pass.bound.get(name) {
            return Some(binding.shape);
        }

        let kind = match pass.binding_sites.get(name) {
            Some(&bound_at) => ViolationKind::ForwardReference {
                param: param.to_string(),
                name: name.to_string(),
                bound_at,
            },
            None => ViolationKind::UnboundReference {
                param: param.to_string(),
                name: name.to_string(),
            },
        };
        pass.push(index, action, kind);
        None
    }
}
