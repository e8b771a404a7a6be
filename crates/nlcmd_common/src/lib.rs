//! nlcmd Common - plan execution core
//!
//! Typed action catalog, untrusted-plan validation, sequential execution with
//! `foreach` fan-out, and routing between direct dispatch and an external
//! planner. No action ever runs arbitrary code: everything a plan can do is
//! declared in the registry up front.

pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod context;
pub mod display_format;
pub mod error;
pub mod executor;
pub mod llm_client;
pub mod plan;
pub mod planner;
pub mod registry;
pub mod router;
pub mod schema;
pub mod validator;

pub use aggregator::{aggregate, aggregate_as, AggregatedResult, OutputFormat, StepSummary};
pub use catalog::{builtin_registry, builtin_schemas};
pub use config::{EngineConfig, ExecutorConfig, LogConfig, PolicyConfig, RouterConfig, CONFIG_ENV};
pub use context::ExecutionContext;
pub use error::{
    AggregationError, EngineError, HandlerError, PlanningError, RegistryError, StepFault,
};
pub use executor::{
    CancelFlag, ExecutionResult, FailurePolicy, ItemError, ItemFailurePolicy, PlanExecutor,
    StepResult, StepStatus,
};
pub use llm_client::{HttpLlmClient, LlmClient, LlmConfig, LlmError, ScriptedLlmClient};
pub use plan::{ExecutionPlan, ParamValue, PlanMetadata, PlanStep};
pub use planner::{LlmPlanner, Planner, PlannerRequest};
pub use registry::{ActionHandler, ActionRegistry, RegisteredAction, ResolvedParams};
pub use router::{
    DecisionRouter, NormalizedRequest, PlanReason, RouteDecision, RouteOutcome, RouteTaken,
};
pub use schema::{ActionRisk, ActionSchema, ParamSource, ParamSpec, ParamType, ResultShape};
pub use validator::{PlanValidator, ValidatedPlan, ValidationErrors, Violation, ViolationKind};
