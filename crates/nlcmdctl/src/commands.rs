//! Command implementations
//!
//! Each subcommand gets the loaded config and the shared built-in registry
//! through `App`. Results go to stdout, diagnostics to stderr.

use crate::output;
use anyhow::{bail, Context, Result};
use nlcmd_common::{
    aggregate, builtin_registry, ActionRegistry, DecisionRouter, EngineConfig, ExecutionPlan,
    FailurePolicy, HttpLlmClient, LlmPlanner, NormalizedRequest, OutputFormat, PlanExecutor,
    PlanValidator, RouteOutcome,
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded configuration plus the action catalog
pub struct App {
    pub config: EngineConfig,
    pub registry: Arc<ActionRegistry>,
}

impl App {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let registry = builtin_registry()
            .context("Failed to build the built-in action catalog")?
            .into_shared();
        Ok(Self { config, registry })
    }

    pub fn validator(&self) -> PlanValidator {
        PlanValidator::new(Arc::clone(&self.registry), self.config.policy.clone())
    }

    /// Router backed by the configured HTTP planner
    pub fn router(&self) -> DecisionRouter {
        let planner = LlmPlanner::new(HttpLlmClient::new(self.config.planner.clone()));
        DecisionRouter::new(Arc::clone(&self.registry), &self.config, Arc::new(planner))
    }
}

// ============================================================================
// Input parsing
// ============================================================================

/// Parse `KEY=VALUE`; scalar JSON values (numbers, booleans) keep their type
pub fn parse_entity(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Invalid entity '{}': expected KEY=VALUE", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid entity '{}': empty key", raw);
    }

    let value = match serde_json::from_str::<Value>(value) {
        Ok(parsed @ (Value::Number(_) | Value::Bool(_))) => parsed,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

pub fn load_plan(path: &Path) -> Result<ExecutionPlan> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    ExecutionPlan::from_json_str(&text)
        .with_context(|| format!("Failed to parse plan file {}", path.display()))
}

/// One `NormalizedRequest` per non-blank line
pub fn load_requests(path: &Path) -> Result<Vec<NormalizedRequest>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid request", path.display(), n + 1))
        })
        .collect()
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    Ok(format.parse::<OutputFormat>()?)
}

// ============================================================================
// Commands
// ============================================================================

pub fn catalog(app: &App, json: bool) -> Result<()> {
    let schemas = app.registry.list();
    if json {
        println!("{}", serde_json::to_string_pretty(&schemas)?);
    } else {
        print!("{}", output::render_catalog(&schemas));
    }
    Ok(())
}

pub fn validate(app: &App, path: &Path) -> Result<()> {
    let plan = load_plan(path)?;
    match app.validator().validate(&plan) {
        Ok(validated) => {
            println!("{} {} step(s)", output::ok_label("[VALID]"), validated.len());
            Ok(())
        }
        Err(errors) => {
            print!("{}", output::render_violations(&errors));
            bail!("Plan {} was rejected", path.display())
        }
    }
}

pub fn run(app: &App, path: &Path, format: &str, continue_on_error: bool) -> Result<()> {
    let format = parse_format(format)?;
    let plan = load_plan(path)?;

    let validated = match app.validator().validate(&plan) {
        Ok(validated) => validated,
        Err(errors) => {
            eprint!("{}", output::render_violations(&errors));
            bail!("Plan {} was rejected", path.display());
        }
    };

    let mut executor_config = app.config.executor;
    if continue_on_error {
        executor_config.failure_policy = FailurePolicy::Continue;
    }
    debug!(?executor_config, steps = validated.len(), "Executing plan");

    let result = PlanExecutor::new(Arc::clone(&app.registry), executor_config).execute(&validated);
    let aggregated = aggregate(&result, format)?;
    println!("{}", aggregated.formatted_output.trim_end());

    if !aggregated.success {
        bail!("Plan finished with failures (trace {})", aggregated.trace_id);
    }
    Ok(())
}

fn print_outcome(outcome: &RouteOutcome, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!("{}", output::render_route(outcome));
    println!("{}", aggregate(&outcome.result, format)?.formatted_output.trim_end());
    Ok(())
}

pub async fn ask(app: &App, request: NormalizedRequest, format: &str) -> Result<()> {
    let format = parse_format(format)?;
    let router = app.router();

    let outcome = router.handle(&request).await?;
    info!(route = outcome.route.as_str(), trace_id = %outcome.result.trace_id, "Request handled");
    print_outcome(&outcome, format)?;

    if !outcome.result.success {
        bail!("Plan finished with failures (trace {})", outcome.result.trace_id);
    }
    Ok(())
}

/// Route every request concurrently; output keeps input order
pub async fn batch(app: &App, path: &Path, format: &str) -> Result<()> {
    let format = parse_format(format)?;
    let requests = load_requests(path)?;
    let router = Arc::new(app.router());

    let tasks: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.handle(&request).await })
        })
        .collect();

    let mut failures = 0usize;
    let total = tasks.len();
    for (index, task) in tasks.into_iter().enumerate() {
        let outcome = task.await.context("request task panicked")?;

        match (&outcome, format) {
            (Ok(outcome), OutputFormat::Json) => {
                println!("{}", serde_json::json!({"request": index, "outcome": outcome}));
            }
            (Err(err), OutputFormat::Json) => {
                println!("{}", serde_json::json!({"request": index, "error": err.to_string()}));
            }
            (Ok(outcome), _) => {
                println!("# request {}", index);
                print_outcome(outcome, format)?;
            }
            (Err(err), _) => {
                println!("# request {}", index);
                output::display_error(&err.to_string());
            }
        }

        if !matches!(&outcome, Ok(o) if o.result.success) {
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{} of {} requests failed", failures, total);
    }
    Ok(())
}

pub fn config(app: &App) -> Result<()> {
    print!("{}", app.config.to_toml_string()?);
    Ok(())
}
