//! Router flow tests over the built-in catalog
//!
//! The planner is an `LlmPlanner` over a scripted client, so the number of
//! model calls is observable.

use nlcmd_common::{
    builtin_registry, DecisionRouter, EngineConfig, EngineError, ExecutionPlan, LlmError,
    LlmPlanner, NormalizedRequest, Planner, PlannerRequest, PlanningError, RouteTaken,
    ScriptedLlmClient, ViolationKind,
};
use serde_json::json;
use std::sync::Arc;

/// Forwards to a shared scripted planner so the test keeps a handle on it
struct SharedPlanner(Arc<LlmPlanner<ScriptedLlmClient>>);

impl Planner for SharedPlanner {
    fn plan(&self, request: &PlannerRequest) -> Result<ExecutionPlan, PlanningError> {
        self.0.plan(request)
    }
}

fn router(responses: Vec<Result<serde_json::Value, LlmError>>) -> (DecisionRouter, Arc<LlmPlanner<ScriptedLlmClient>>) {
    let planner = Arc::new(LlmPlanner::new(ScriptedLlmClient::new(responses)));
    let registry = builtin_registry().unwrap().into_shared();
    let router = DecisionRouter::new(
        registry,
        &EngineConfig::default(),
        Arc::new(SharedPlanner(Arc::clone(&planner))),
    );
    (router, planner)
}

#[tokio::test]
async fn confident_allow_listed_intent_skips_planner() {
    let (router, planner) = router(vec![Err(LlmError::Disabled)]);

    for confidence in [0.75, 0.8, 0.99, 1.0] {
        let request = NormalizedRequest::new("container_logs", "logs for web", confidence)
            .entity("container", "web")
            .entity("tail", "100");
        let outcome = router.handle(&request).await.unwrap();

        assert_eq!(outcome.route, RouteTaken::Direct);
        assert_eq!(
            outcome.result.steps[0].output.as_ref().unwrap()["command"],
            json!("docker logs --tail 100 web")
        );
    }
    assert_eq!(planner.client().call_count(), 0);
}

#[tokio::test]
async fn planner_builds_foreach_plan() {
    let plan = json!({
        "metadata": {"name": "grep-each"},
        "steps": [
            {"action": "text.split", "params": {"text": "app.log, db.log"}, "store_as": "files"},
            {"action": "shell.count_matches",
             "params": {"file": {"$item": true}, "pattern": "ERROR"},
             "foreach": "files", "store_as": "commands"}
        ]
    });
    let (router, planner) = router(vec![Ok(plan)]);

    let outcome = router
        .handle(&NormalizedRequest::new("unknown", "count errors in app.log and db.log", 0.2))
        .await
        .unwrap();

    assert_eq!(outcome.route, RouteTaken::Planned);
    assert_eq!(outcome.result.steps[1].iterations, 2);
    assert_eq!(
        outcome.result.steps[1].output.as_ref().unwrap()[1]["command"],
        json!("grep -c -- ERROR db.log")
    );
    assert_eq!(planner.client().call_count(), 1);
    assert!(planner.client().prompts()[0].contains("text.split"));
}

#[tokio::test]
async fn planned_literals_are_coerced() {
    let (router, _) = router(vec![Ok(json!({
        "steps": [{"action": "docker.ps", "params": {"all": "true"}}]
    }))]);

    let outcome = router
        .handle(&NormalizedRequest::new("inventory", "what containers exist?", 0.9))
        .await
        .unwrap();
    assert_eq!(
        outcome.result.steps[0].output.as_ref().unwrap()["command"],
        json!("docker ps --all")
    );
}

#[tokio::test]
async fn malformed_plan_falls_back_to_direct_action() {
    let (router, planner) = router(vec![Err(LlmError::InvalidJson("not a plan".into()))]);

    let request = NormalizedRequest::new("list_containers", "uh, containers maybe?", 0.4).entity("all", true);
    let outcome = router.handle(&request).await.unwrap();

    assert_eq!(outcome.route, RouteTaken::Fallback);
    assert!(outcome.result.success);
    assert_eq!(planner.client().call_count(), 1);
}

#[tokio::test]
async fn unknown_intent_without_plan_is_unplannable() {
    let (router, _) = router(vec![Err(LlmError::Disabled)]);

    let err = router
        .handle(&NormalizedRequest::new("write_poem", "write me a poem", 0.99))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unplannable { .. }));
}

#[tokio::test]
async fn high_risk_planned_action_is_forbidden() {
    let (router, _) = router(vec![Ok(json!({
        "steps": [{"action": "shell.remove_files", "params": {"path": "/var/log"}}]
    }))]);

    let err = router
        .handle(&NormalizedRequest::new("cleanup", "delete all logs", 0.9))
        .await
        .unwrap_err();

    match err {
        EngineError::Validation(errors) => assert!(matches!(
            errors.violations()[0].kind,
            ViolationKind::ForbiddenAction { .. }
        )),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn concurrent_requests_are_isolated() {
    let (router, _) = router(vec![Err(LlmError::Disabled)]);
    let router = Arc::new(router);

    let tasks: Vec<_> = ["web", "db", "cache"]
        .into_iter()
        .map(|name| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                let request = NormalizedRequest::new("container_logs", "logs", 0.9).entity("container", name);
                router.handle(&request).await
            })
        })
        .collect();

    for (task, name) in tasks.into_iter().zip(["web", "db", "cache"]) {
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(
            outcome.result.steps[0].output.as_ref().unwrap()["command"],
            json!(format!("docker logs {}", name))
        );
    }
}

#[tokio::test]
async fn option_like_path_never_renders_a_command() {
    let (router, _) = router(vec![Ok(json!({
        "steps": [{"action": "shell.find_files", "params": {"path": "-delete"}}]
    }))]);

    let outcome = router
        .handle(&NormalizedRequest::new("cleanup", "find my files", 0.9))
        .await
        .unwrap();

    let step = &outcome.result.steps[0];
    assert!(!outcome.result.success);
    assert!(step.output.is_none());
    assert!(step.error.as_deref().unwrap().contains("must not start with '-'"));
}
