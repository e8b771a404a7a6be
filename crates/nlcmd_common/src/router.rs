//! Decision Router - direct dispatch or planned execution
//!
//! ## Flow
//!
//! ```text
//! NormalizedRequest ─┬─ allow-listed intent, confident ─→ one-step plan ─┐
//!                    │                                                   ├→ Validator → Executor
//!                    └─ otherwise ─→ Planner (time-bounded) ─────────────┘
//!                                       │ fails
//!                                       └→ allow-listed action for the intent, or Unplannable
//! ```
//!
//! The direct path never calls the planner. Plans from either path pass the
//! same validator before the executor sees them.

use crate::config::{EngineConfig, RouterConfig};
use crate::error::{EngineError, PlanningError};
use crate::executor::{CancelFlag, ExecutionResult, PlanExecutor};
use crate::plan::{ExecutionPlan, PlanStep};
use crate::planner::{Planner, PlannerRequest};
use crate::registry::ActionRegistry;
use crate::validator::{PlanValidator, ValidatedPlan};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Request and Decisions
// ============================================================================

/// Output of the upstream NL classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub intent: String,

    #[serde(default)]
    pub entities: BTreeMap<String, Value>,

    #[serde(default)]
    pub raw_text: String,

    /// Classifier confidence, 0.0-1.0
    pub confidence: f64,
}

impl NormalizedRequest {
    pub fn new(intent: impl Into<String>, raw_text: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            entities: BTreeMap::new(),
            raw_text: raw_text.into(),
            confidence,
        }
    }

    pub fn entity(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entities.insert(name.into(), value.into());
        self
    }
}

/// Why a request goes to the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PlanReason {
    UnknownIntent,
    LowConfidence { confidence: f64, threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum RouteDecision {
    Direct { action: String },
    Plan(PlanReason),
}

/// Path the request actually took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTaken {
    Direct,
    Planned,
    /// Planner failed; the allow-listed action for the intent ran instead
    Fallback,
}

impl RouteTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteTaken::Direct => "direct",
            RouteTaken::Planned => "planned",
            RouteTaken::Fallback => "fallback",
        }
    }
}

/// Everything the caller gets back for one request
#[derive(Debug, Clone, Serialize)]
pub struct RouteOutcome {
    pub decision: RouteDecision,
    pub route: RouteTaken,
    /// Why the planner path was abandoned, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planning_error: Option<String>,
    pub plan: ExecutionPlan,
    pub result: ExecutionResult,
}

impl RouteOutcome {
    pub fn fallback_used(&self) -> bool {
        self.route == RouteTaken::Fallback
    }
}

// ============================================================================
// Router
// ============================================================================

pub struct DecisionRouter {
    registry: Arc<ActionRegistry>,
    validator: PlanValidator,
    executor: Arc<PlanExecutor>,
    planner: Arc<dyn Planner>,
    config: RouterConfig,
}

impl DecisionRouter {
    pub fn new(registry: Arc<ActionRegistry>, config: &EngineConfig, planner: Arc<dyn Planner>) -> Self {
        Self {
            validator: PlanValidator::new(Arc::clone(&registry), config.policy.clone()),
            executor: Arc::new(PlanExecutor::new(Arc::clone(&registry), config.executor)),
            registry,
            planner,
            config: config.router.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn validator(&self) -> &PlanValidator {
        &self.validator
    }

    /// Pure routing decision, no side effects
    pub fn decide(&self, request: &NormalizedRequest) -> RouteDecision {
        let threshold = self.config.effective_threshold();
        match self.config.direct_intents.get(&request.intent) {
            None => RouteDecision::Plan(PlanReason::UnknownIntent),
            Some(action) if request.confidence >= threshold => RouteDecision::Direct {
                action: action.clone(),
            },
            Some(_) => RouteDecision::Plan(PlanReason::LowConfidence {
                confidence: request.confidence,
                threshold,
            }),
        }
    }

    /// One-step plan for `action`, filled from the request's entities
    ///
    /// Entities the action does not declare are dropped.
    pub fn direct_plan(&self, action: &str, request: &NormalizedRequest) -> Result<ExecutionPlan, EngineError> {
        let schema = &self.registry.lookup(action)?.schema;

        let mut step = PlanStep::new(action);
        for (name, value) in &request.entities {
            if schema.get_param(name).is_some() {
                step = step.literal(name.clone(), value.clone());
            } else {
                debug!(action, entity = %name, "Dropping entity not declared by action");
            }
        }

        Ok(ExecutionPlan::named(request.intent.clone()).step(step))
    }

    pub async fn handle(&self, request: &NormalizedRequest) -> Result<RouteOutcome, EngineError> {
        self.handle_with_cancel(request, CancelFlag::new()).await
    }

    pub async fn handle_with_cancel(
        &self,
        request: &NormalizedRequest,
        cancel: CancelFlag,
    ) -> Result<RouteOutcome, EngineError> {
        let decision = self.decide(request);
        info!(intent = %request.intent, confidence = request.confidence, ?decision, "Routing request");

        let mut planning_error = None;
        let (route, plan) = match &decision {
            RouteDecision::Direct { action } => (RouteTaken::Direct, self.direct_plan(action, request)?),
            RouteDecision::Plan(_) => match self.plan_remote(request).await {
                Ok(plan) => (RouteTaken::Planned, plan),
                Err(err) => {
                    let Some(action) = self.config.direct_intents.get(&request.intent) else {
                        warn!(intent = %request.intent, error = %err, "Planning failed, no fallback");
                        return Err(EngineError::Unplannable {
                            intent: request.intent.clone(),
                            reason: err.to_string(),
                        });
                    };
                    warn!(intent = %request.intent, error = %err, fallback = %action, "Planning failed, falling back");
                    planning_error = Some(err.to_string());
                    (RouteTaken::Fallback, self.direct_plan(action, request)?)
                }
            },
        };

        let validated = self.validator.validate(&plan)?;
        let result = self.execute(validated, cancel).await?;

        Ok(RouteOutcome {
            decision,
            route,
            planning_error,
            plan,
            result,
        })
    }

    /// Ask the planner, bounded by the configured budget
    async fn plan_remote(&self, request: &NormalizedRequest) -> Result<ExecutionPlan, PlanningError> {
        let planner = Arc::clone(&self.planner);
        let planner_request = PlannerRequest::new(request.raw_text.clone(), self.registry.catalog());
        let budget = self.config.planner_timeout();

        let task = tokio::task::spawn_blocking(move || planner.plan(&planner_request));
        match tokio::time::timeout(budget, task).await {
            Err(_) => Err(PlanningError::Timeout(budget.as_millis() as u64)),
            Ok(Err(join)) => Err(PlanningError::Backend(format!("planner task failed: {}", join))),
            Ok(Ok(result)) => result,
        }
    }

    async fn execute(&self, plan: ValidatedPlan, cancel: CancelFlag) -> Result<ExecutionResult, EngineError> {
        let executor = Arc::clone(&self.executor);
        tokio::task::spawn_blocking(move || executor.execute_with_cancel(&plan, &cancel))
            .await
            .map_err(|e| EngineError::Internal(format!("executor task failed: {}", e)))
    }
}
