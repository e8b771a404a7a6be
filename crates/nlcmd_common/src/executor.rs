//! Plan Executor - runs a validated plan step by step
//!
//! Steps run strictly in order, one at a time, against a fresh
//! `ExecutionContext`. Every attempted step leaves a `StepResult`, so the
//! trace is complete even when the plan fails halfway.
//!
//! The structural checks are repeated here against the registry the executor
//! was built with: action lookup, parameters, references and foreach targets.
//! The safety policy (deny list, maximum risk) is enforced by the validator
//! alone; `ValidatedPlan` is the only input `execute` accepts.

use crate::config::ExecutorConfig;
use crate::context::ExecutionContext;
use crate::error::StepFault;
use crate::plan::{ParamValue, PlanStep};
use crate::registry::{ActionRegistry, RegisteredAction, ResolvedParams};
use crate::schema::{json_type_name, ActionSchema};
use crate::validator::ValidatedPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Policies
// ============================================================================

/// What a failed step does to the rest of the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failed step, then stop
    #[default]
    Abort,
    /// Keep going; the plan as a whole is marked unsuccessful
    Continue,
}

/// What a failed `foreach` item does to the rest of its step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFailurePolicy {
    #[default]
    StopStep,
    ContinueItems,
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    /// Not attempted because an input it reads was never produced
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

/// One failed `foreach` element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub index: usize,
    pub message: String,
}

/// Trace record for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub action: String,
    pub status: StepStatus,
    pub duration_ms: u64,

    /// Handler output; for `foreach`, one entry per element (`null` where
    /// the element failed or was never attempted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_errors: Vec<ItemError>,

    /// Number of handler invocations
    pub iterations: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
}

impl StepResult {
    fn new(index: usize, step: &PlanStep) -> Self {
        Self {
            index,
            action: step.action.clone(),
            status: StepStatus::Success,
            duration_ms: 0,
            output: None,
            error: None,
            item_errors: Vec::new(),
            iterations: 0,
            store_as: step.store_as.clone(),
        }
    }

    fn fail(&mut self, message: String) {
        self.status = StepStatus::Failed;
        self.error = Some(message);
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Full trace of one plan run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub trace_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub success: bool,

    /// Index of the step whose failure stopped the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<usize>,

    #[serde(default)]
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed)
    }

    /// Output of the last step that succeeded
    pub fn final_output(&self) -> Option<&Value> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.is_success())
            .and_then(|s| s.output.as_ref())
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag checked between steps
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct PlanExecutor {
    registry: Arc<ActionRegistry>,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(registry: Arc<ActionRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn execute(&self, plan: &ValidatedPlan) -> ExecutionResult {
        self.execute_with_cancel(plan, &CancelFlag::new())
    }

    pub fn execute_with_cancel(&self, plan: &ValidatedPlan, cancel: &CancelFlag) -> ExecutionResult {
        let trace_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(%trace_id, steps = plan.len(), name = ?plan.plan().metadata.name, "Executing plan");

        let mut ctx = ExecutionContext::new();
        // Names whose producing step failed or was skipped
        let mut lost: HashSet<&str> = HashSet::new();
        let mut steps = Vec::with_capacity(plan.len());
        let mut success = true;
        let mut aborted_at = None;
        let mut cancelled = false;

        for (index, step) in plan.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                info!(%trace_id, step = index, "Plan cancelled");
                cancelled = true;
                success = false;
                break;
            }

            if let Some(missing) = step.dependencies().find(|name| lost.contains(name)) {
                warn!(%trace_id, step = index, input = missing, "Skipping step, input unavailable");
                debug!(%trace_id, step = index, bound = ?ctx.names(), "Bindings at skip");
                let mut result = StepResult::new(index, step);
                result.status = StepStatus::Skipped;
                result.error = Some(format!(
                    "input '{}' unavailable: its producing step did not succeed",
                    missing
                ));
                if let Some(name) = step.store_as.as_deref() {
                    lost.insert(name);
                }
                success = false;
                steps.push(result);
                continue;
            }

            let result = self.run_step(index, step, &mut ctx);

            if result.is_success() {
                debug!(
                    %trace_id,
                    step = index,
                    action = %step.action,
                    iterations = result.iterations,
                    duration_ms = result.duration_ms,
                    "Step succeeded"
                );
                steps.push(result);
                continue;
            }

            warn!(
                %trace_id,
                step = index,
                action = %step.action,
                error = result.error.as_deref().unwrap_or(""),
                "Step failed"
            );
            success = false;
            if let Some(name) = step.store_as.as_deref() {
                lost.insert(name);
            }
            steps.push(result);

            let policy = step.on_error.unwrap_or(self.config.failure_policy);
            if policy == FailurePolicy::Abort {
                aborted_at = Some(index);
                break;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(%trace_id, success, steps = steps.len(), duration_ms, "Plan finished");

        ExecutionResult {
            trace_id,
            started_at,
            duration_ms,
            steps,
            success,
            aborted_at,
            cancelled,
        }
    }

    fn run_step(&self, index: usize, step: &PlanStep, ctx: &mut ExecutionContext) -> StepResult {
        let start = Instant::now();
        let mut result = StepResult::new(index, step);

        let outcome = match self.registry.get(&step.action) {
            None => Err(StepFault::UnknownAction(step.action.clone())),
            Some(action) => match step.foreach.as_deref() {
                None => self.run_once(action, step, ctx, &mut result),
                Some(target) => self.run_foreach(action, step, target, ctx, &mut result),
            },
        };

        match outcome {
            Ok(output) => {
                if let Some(name) = step.store_as.as_deref() {
                    if let Err(fault) = ctx.bind(name, output.clone()) {
                        result.fail(fault.to_string());
                    }
                }
                result.output = Some(output);
            }
            Err(fault) => result.fail(fault.to_string()),
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    fn run_once(
        &self,
        action: &RegisteredAction,
        step: &PlanStep,
        ctx: &ExecutionContext,
        result: &mut StepResult,
    ) -> Result<Value, StepFault> {
        let params = resolve_params(&action.schema, step, ctx, None)?;
        result.iterations = 1;
        Ok(action.invoke(&params)?)
    }

    /// Output is set on `result` directly when items fail, so the partial
    /// list survives in the trace
    fn run_foreach(
        &self,
        action: &RegisteredAction,
        step: &PlanStep,
        target: &str,
        ctx: &ExecutionContext,
        result: &mut StepResult,
    ) -> Result<Value, StepFault> {
        let items = match ctx.get(target) {
            None => return Err(StepFault::ForeachUnbound(target.to_string())),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(StepFault::ForeachNotSequence {
                    name: target.to_string(),
                    found: json_type_name(other),
                })
            }
        };

        let mut outputs = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let outcome = match resolve_params(&action.schema, step, ctx, Some(item)) {
                Ok(params) => {
                    result.iterations += 1;
                    action.invoke(&params).map_err(StepFault::from)
                }
                Err(fault) => Err(fault),
            };

            match outcome {
                Ok(value) => outputs.push(value),
                Err(fault) => {
                    debug!(action = %step.action, item = i, error = %fault, "Item failed");
                    outputs.push(Value::Null);
                    result.item_errors.push(ItemError {
                        index: i,
                        message: fault.to_string(),
                    });
                    if self.config.item_failure_policy == ItemFailurePolicy::StopStep {
                        break;
                    }
                }
            }
        }
        outputs.resize(items.len(), Value::Null);

        if result.item_errors.is_empty() {
            return Ok(Value::Array(outputs));
        }

        result.output = Some(Value::Array(outputs));
        Err(StepFault::ItemsFailed {
            failed: result.item_errors.len(),
            total: items.len(),
        })
    }
}

/// Turn plan parameters into concrete, type-checked handler input
fn resolve_params(
    schema: &ActionSchema,
    step: &PlanStep,
    ctx: &ExecutionContext,
    item: Option<&Value>,
) -> Result<ResolvedParams, StepFault> {
    for spec in schema.required_params() {
        if !step.params.contains_key(&spec.name) {
            return Err(StepFault::MissingParam(spec.name.clone()));
        }
    }

    let mut values = BTreeMap::new();
    for (name, param) in &step.params {
        let spec = schema
            .get_param(name)
            .ok_or_else(|| StepFault::UnexpectedParam(name.clone()))?;

        let raw = match param {
            ParamValue::Literal(value) => value.clone(),
            ParamValue::Reference(binding) => {
                ctx.get(binding)
                    .cloned()
                    .ok_or_else(|| StepFault::UnboundReference {
                        param: name.clone(),
                        name: binding.clone(),
                    })?
            }
            ParamValue::CurrentItem { field } => {
                let item = item.ok_or_else(|| StepFault::ItemOutsideForeach {
                    param: name.clone(),
                })?;
                match field {
                    None => item.clone(),
                    Some(field) => item.get(field).cloned().ok_or_else(|| {
                        StepFault::ItemFieldMissing {
                            param: name.clone(),
                            field: field.clone(),
                        }
                    })?,
                }
            }
        };

        if raw.is_null() {
            if spec.required {
                return Err(StepFault::MissingParam(name.clone()));
            }
            continue;
        }

        let coerced = spec
            .param_type
            .coerce(&raw)
            .ok_or_else(|| StepFault::TypeMismatch {
                param: name.clone(),
                expected: spec.param_type,
                found: json_type_name(&raw),
            })?;
        values.insert(name.clone(), coerced);
    }

    Ok(ResolvedParams::new(values))
}
