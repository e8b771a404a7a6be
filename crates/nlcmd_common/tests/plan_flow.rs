//! Plan flow tests - wire plan in, validated, executed, aggregated
//!
//! Uses an in-memory "filesystem" so counts are deterministic:
//! - find_files under /var/log      -> app.log, error.log, access.log, debug.log
//! - count_matches ERROR per file   -> 15, 127, 3, 0 (sum 145)

use nlcmd_common::{
    aggregate, ActionRegistry, ActionSchema, ExecutionPlan, ExecutorConfig, FailurePolicy,
    HandlerError, ItemFailurePolicy, OutputFormat, ParamSpec, ParamType, PlanExecutor, PlanStep,
    PlanValidator, PolicyConfig, ResolvedParams, ResultShape, StepStatus, ViolationKind,
};
use serde_json::{json, Value};
use std::sync::Arc;

const LOG_FILES: [(&str, i64); 4] = [
    ("/var/log/app.log", 15),
    ("/var/log/error.log", 127),
    ("/var/log/access.log", 3),
    ("/var/log/debug.log", 0),
];

fn find_files(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let path = params.str("path")?;
    if path != "/var/log" {
        return Err(HandlerError::new(format!("no such directory: {}", path)));
    }
    Ok(json!(LOG_FILES.iter().map(|(name, _)| *name).collect::<Vec<_>>()))
}

fn count_matches(params: &ResolvedParams) -> Result<Value, HandlerError> {
    let file = params.str("file")?;
    if params.str("pattern")? != "ERROR" {
        return Ok(json!(0));
    }
    LOG_FILES
        .iter()
        .find(|(name, _)| *name == file)
        .map(|(_, count)| json!(count))
        .ok_or_else(|| HandlerError::new(format!("cannot read {}", file)))
}

fn registry() -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            ActionSchema::new("shell.find_files", "List files under a path")
                .param(ParamSpec::required("path", ParamType::String))
                .returns(ResultShape::Sequence),
            find_files,
        )
        .unwrap();
    registry
        .register(
            ActionSchema::new("shell.count_matches", "Count pattern matches in a file")
                .param(ParamSpec::required("file", ParamType::String))
                .param(ParamSpec::required("pattern", ParamType::String))
                .returns(ResultShape::Scalar),
            count_matches,
        )
        .unwrap();
    registry.into_shared()
}

fn log_plan_wire() -> Value {
    json!({
        "metadata": {"name": "error-count"},
        "steps": [
            {"action": "shell.find_files", "params": {"path": "/var/log"}, "store_as": "log_files"},
            {"action": "shell.count_matches",
             "params": {"pattern": "ERROR", "file": {"$item": true}},
             "foreach": "log_files",
             "store_as": "error_counts"}
        ]
    })
}

fn run(plan: &ExecutionPlan, config: ExecutorConfig) -> nlcmd_common::ExecutionResult {
    let registry = registry();
    let validated = PlanValidator::new(Arc::clone(&registry), PolicyConfig::default())
        .validate(plan)
        .expect("plan should validate");
    PlanExecutor::new(registry, config).execute(&validated)
}

#[test]
fn log_error_count_scenario() {
    let plan = ExecutionPlan::from_wire(log_plan_wire()).unwrap();
    let result = run(&plan, ExecutorConfig::default());

    assert!(result.success);
    assert_eq!(result.steps.len(), 2);

    let counts = &result.steps[1];
    assert_eq!(counts.iterations, 4);
    assert_eq!(counts.output, Some(json!([15, 127, 3, 0])));

    let sum: i64 = counts
        .output
        .as_ref()
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .sum();
    assert_eq!(sum, 145);
}

#[test]
fn wire_round_trip_preserves_structure() {
    let plan = ExecutionPlan::from_wire(log_plan_wire()).unwrap();
    let again = ExecutionPlan::from_wire(plan.to_wire()).unwrap();

    assert_eq!(again, plan);
    assert_eq!(again.steps[1].foreach.as_deref(), Some("log_files"));
    assert_eq!(again.steps[1].store_as.as_deref(), Some("error_counts"));
    assert_eq!(plan.to_wire()["steps"][1]["params"]["file"], json!({"$item": true}));
}

#[test]
fn n_steps_give_n_results() {
    for n in 1..=5 {
        let mut plan = ExecutionPlan::new();
        for i in 0..n {
            plan = plan.step(
                PlanStep::new("shell.find_files")
                    .literal("path", "/var/log")
                    .store_as(format!("files_{}", i)),
            );
        }
        let result = run(&plan, ExecutorConfig::default());
        assert_eq!(result.steps.len(), n);
        assert!(result.success);
    }
}

#[test]
fn abort_at_k_gives_k_results() {
    for k in 1..=4 {
        let mut plan = ExecutionPlan::new();
        for i in 0..6 {
            let path = if i + 1 == k { "/nope" } else { "/var/log" };
            plan = plan.step(PlanStep::new("shell.find_files").literal("path", path));
        }
        let result = run(&plan, ExecutorConfig::default());

        assert_eq!(result.steps.len(), k, "abort at step {}", k);
        assert_eq!(result.aborted_at, Some(k - 1));
        assert_eq!(result.steps[k - 1].status, StepStatus::Failed);
    }
}

#[test]
fn foreach_item_failure_policies() {
    let wire = json!({
        "steps": [
            {"action": "shell.find_files", "params": {"path": "/var/log"}, "store_as": "files"},
            {"action": "shell.count_matches",
             "params": {"pattern": "ERROR", "file": {"$item": "path"}},
             "foreach": "files"}
        ]
    });
    let plan = ExecutionPlan::from_wire(wire).unwrap();

    // Items are plain strings, so reading a field fails on every item
    let stop = run(&plan, ExecutorConfig::default());
    assert_eq!(stop.steps[1].iterations, 0);
    assert_eq!(stop.steps[1].item_errors.len(), 1);
    assert_eq!(stop.steps[1].output, Some(json!([null, null, null, null])));

    let keep_going = run(
        &plan,
        ExecutorConfig {
            failure_policy: FailurePolicy::Continue,
            item_failure_policy: ItemFailurePolicy::ContinueItems,
        },
    );
    assert_eq!(keep_going.steps[1].item_errors.len(), 4);
    assert_eq!(keep_going.steps[1].status, StepStatus::Failed);
    assert!(!keep_going.success);
}

#[test]
fn invalid_step_never_executes_anything() {
    let plan = ExecutionPlan::from_wire(json!({
        "steps": [
            {"action": "shell.find_files", "params": {"path": "/var/log"}, "store_as": "files"},
            {"action": "shell.rm", "params": {"path": "/"}}
        ]
    }))
    .unwrap();

    let errors = PlanValidator::new(registry(), PolicyConfig::default())
        .validate(&plan)
        .unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.violations()[0].step, Some(1));
    assert!(errors.to_string().contains("shell.rm"));
}

#[test]
fn forward_reference_rejected() {
    let plan = ExecutionPlan::from_wire(json!({
        "steps": [
            {"action": "shell.count_matches",
             "params": {"pattern": "ERROR", "file": {"$ref": "first_file"}}},
            {"action": "shell.find_files", "params": {"path": "/var/log"}, "store_as": "first_file"}
        ]
    }))
    .unwrap();

    let errors = PlanValidator::new(registry(), PolicyConfig::default())
        .validate(&plan)
        .unwrap_err();
    assert!(matches!(
        errors.violations()[0].kind,
        ViolationKind::ForwardReference { bound_at: 1, .. }
    ));
}

#[test]
fn aggregated_table_lists_every_step() {
    let plan = ExecutionPlan::from_wire(log_plan_wire()).unwrap();
    let result = run(&plan, ExecutorConfig::default());
    let aggregated = aggregate(&result, OutputFormat::Table).unwrap();

    assert_eq!(aggregated.trace_id, result.trace_id);
    assert!(aggregated.formatted_output.contains("shell.count_matches"));
    assert!(aggregated.formatted_output.contains("[15,127,3,0]"));
    assert!(aggregated.success);
}

#[test]
fn concurrent_plans_share_one_registry() {
    let registry = registry();
    let plan = ExecutionPlan::from_wire(log_plan_wire()).unwrap();
    let validated = Arc::new(
        PlanValidator::new(Arc::clone(&registry), PolicyConfig::default())
            .validate(&plan)
            .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let validated = Arc::clone(&validated);
            std::thread::spawn(move || {
                PlanExecutor::new(registry, ExecutorConfig::default()).execute(&validated)
            })
        })
        .collect();

    let mut trace_ids = Vec::new();
    for handle in handles {
        let result = handle.join().unwrap();
        assert_eq!(result.steps[1].output, Some(json!([15, 127, 3, 0])));
        trace_ids.push(result.trace_id);
    }
    trace_ids.sort();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 4);
}
