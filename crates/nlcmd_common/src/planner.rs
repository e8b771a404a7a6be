//! Planner contract - turns a free-form request into a candidate plan
//!
//! The planner is an untrusted collaborator. Whatever it returns is only a
//! candidate: it goes through strict wire decoding here and then through the
//! validator before anything runs.
//!
//! ```text
//! raw text + catalog → Planner → ExecutionPlan (candidate) → Validator
//! ```

use crate::error::PlanningError;
use crate::llm_client::{LlmClient, LlmError};
use crate::plan::ExecutionPlan;
use crate::schema::ActionSchema;
use std::fmt::Write;
use tracing::{debug, warn};

/// Description of the wire shape, handed to the model verbatim
pub const PLAN_SCHEMA: &str = r#"{
  "metadata": {"name": "<short-kebab-name>"},
  "steps": [
    {
      "action": "<action id from the catalog>",
      "params": {"<param>": <literal> | {"$ref": "<earlier store_as name>"} | {"$item": true}},
      "foreach": "<optional: earlier store_as name holding a list>",
      "store_as": "<optional: name for this step's result>"
    }
  ]
}"#;

const SYSTEM_PROMPT: &str = "You are a command planner. You translate a request into an ordered \
plan of catalog actions. You may ONLY use actions from the catalog, with exactly the parameters \
they declare. Never invent actions, never write shell code. Respond with JSON only.";

/// Everything a planner may look at
#[derive(Debug, Clone)]
pub struct PlannerRequest {
    pub text: String,
    pub catalog: Vec<ActionSchema>,
}

impl PlannerRequest {
    pub fn new(text: impl Into<String>, catalog: Vec<ActionSchema>) -> Self {
        Self {
            text: text.into(),
            catalog,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    /// User prompt: the catalog, then the request
    pub fn prompt(&self) -> String {
        let mut out = String::from("CATALOG:\n");
        for schema in &self.catalog {
            let _ = writeln!(out, "- {} ({}): {}", schema.id, schema.returns, schema.description);
            for param in &schema.params {
                let _ = writeln!(
                    out,
                    "    {} : {}{}",
                    param.name,
                    param.param_type,
                    if param.required { " (required)" } else { "" }
                );
            }
        }
        let _ = write!(out, "\nREQUEST: \"{}\"", self.text);
        out
    }
}

/// Anything that can propose a plan
pub trait Planner: Send + Sync {
    fn plan(&self, request: &PlannerRequest) -> Result<ExecutionPlan, PlanningError>;
}

impl From<LlmError> for PlanningError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(secs) => PlanningError::Timeout(secs.saturating_mul(1000)),
            LlmError::InvalidJson(msg) => PlanningError::Malformed(msg),
            LlmError::EmptyResponse => PlanningError::Malformed(err.to_string()),
            LlmError::Disabled | LlmError::HttpError(_) => PlanningError::Backend(err.to_string()),
        }
    }
}

/// Planner backed by a language model
pub struct LlmPlanner<C: LlmClient> {
    client: C,
}

impl<C: LlmClient> LlmPlanner<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: LlmClient> Planner for LlmPlanner<C> {
    fn plan(&self, request: &PlannerRequest) -> Result<ExecutionPlan, PlanningError> {
        debug!(catalog = request.catalog.len(), "Requesting plan from LLM");

        let raw = self
            .client
            .call_json(request.system_prompt(), &request.prompt(), PLAN_SCHEMA)?;

        let plan = ExecutionPlan::from_wire(raw).map_err(|e| {
            warn!(error = %e, "LLM returned an off-shape plan");
            e
        })?;

        debug!(steps = plan.len(), "LLM proposed plan");
        Ok(plan)
    }
}
