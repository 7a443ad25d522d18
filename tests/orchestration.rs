mod common;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;

use common::*;
use planrunner::events::OrchestrationSignal;
use planrunner::model::{
    parse_plan, ExecutionMode, FacilitatorResponse, FailureType, InterruptState, Plan, PlanNode,
    Status, TimeoutState,
};
use planrunner::orchestration::{FacilitationContext, Facilitator};
use planrunner::task::TaskHandler;
use planrunner::EngineConfig;
use planrunner::OrchestrationService;

#[tokio::test(flavor = "multi_thread")]
async fn test_next_step_chain_passes_outcomes() {
    let service = service();
    let plan = Plan::new("a")
        .with_node(
            PlanNode::new("a", "NOOP")
                .with_parameters(json!({"outcomes": {"version": "1.2"}}))
                .with_adviser("ON_SUCCESS", json!({"next_node": "b"})),
        )
        .with_node(PlanNode::new("b", "NOOP").with_parameters(json!({
            "outcomes": {"seen": "${outcome.a.version}", "region": "${setup.region}"}
        })));
    let mut setup = BTreeMap::new();
    setup.insert("region".to_string(), "eu-west-1".to_string());

    let handle = start_with(&service, plan, setup);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Succeeded);
    assert!(finished.failure_info.is_none());

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert_eq!(nodes.len(), 2);
    let a = node(&nodes, "a");
    let b = node(&nodes, "b");
    assert_eq!(a.uuid, handle.node_execution_id);
    assert_eq!(a.status, Status::Succeeded);
    assert_eq!(a.next_id.as_deref(), Some(b.uuid.as_str()));
    assert_eq!(b.previous_id.as_deref(), Some(a.uuid.as_str()));

    let store = service.store();
    assert_eq!(
        store.outcome(&handle.plan_execution_id, "b.seen").unwrap(),
        Some(json!("1.2"))
    );
    assert_eq!(
        store.outcome(&handle.plan_execution_id, "b.region").unwrap(),
        Some(json!("eu-west-1"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fork_aggregates_children() {
    let service = service();
    let plan = Plan::new("fork")
        .with_node(PlanNode::new("fork", "FORK").with_parameters(json!({
            "children": ["ok", "bad", "skipped"]
        })))
        .with_node(PlanNode::new("ok", "NOOP"))
        .with_node(PlanNode::new("bad", "FAIL"))
        .with_node(PlanNode::new("skipped", "NOOP").with_when_condition("false"));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Failed);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert_eq!(nodes.len(), 4);
    assert_eq!(node(&nodes, "ok").status, Status::Succeeded);
    assert_eq!(node(&nodes, "bad").status, Status::Failed);
    assert_eq!(node(&nodes, "skipped").status, Status::Skipped);

    let fork = node(&nodes, "fork");
    assert_eq!(fork.status, Status::Failed);
    assert_eq!(fork.unit_progresses.len(), 3);
    let failure = fork.failure_info.as_ref().unwrap();
    assert!(failure.message.contains("bad broke"));
    for child in nodes.iter().filter(|n| n.identifier != "fork") {
        assert_eq!(child.parent_id.as_deref(), Some(fork.uuid.as_str()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fork_adviser_decides_plan_status() {
    let service = service();
    let plan = Plan::new("fork")
        .with_node(
            PlanNode::new("fork", "FORK")
                .with_parameters(json!({"children": ["ok", "bad"]}))
                .with_adviser("IGNORE", Value::Null),
        )
        .with_node(PlanNode::new("ok", "NOOP"))
        .with_node(PlanNode::new("bad", "FAIL"));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert_eq!(node(&nodes, "bad").status, Status::Failed);
    assert_eq!(node(&nodes, "fork").status, Status::IgnoreFailed);
    assert_eq!(finished.status, Status::Succeeded);
    assert!(finished.failure_info.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fork_of_skipped_children_is_skipped() {
    let service = service();
    let plan = Plan::new("fork")
        .with_node(PlanNode::new("fork", "FORK").with_parameters(json!({"children": ["x", "y"]})))
        .with_node(PlanNode::new("x", "NOOP").with_when_condition("false"))
        .with_node(PlanNode::new("y", "NOOP").with_skip_condition("true"));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Skipped);
    assert!(finished.status.is_positive());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_max_concurrency_runs_children_one_at_a_time() {
    let service = service();
    let plan = Plan::new("fork")
        .with_node(PlanNode::new("fork", "FORK").with_parameters(json!({
            "children": ["c1", "c2", "c3"],
            "max_concurrency": 1
        })))
        .with_node(PlanNode::new("c1", "SLEEP").with_parameters(json!({"ms": 80})))
        .with_node(PlanNode::new("c2", "SLEEP").with_parameters(json!({"ms": 80})))
        .with_node(PlanNode::new("c3", "SLEEP").with_parameters(json!({"ms": 80})));

    let handle = start(&service, plan);
    assert_eq!(finish(&service, &handle).await.status, Status::Succeeded);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    let ids: HashMap<&str, &str> = nodes
        .iter()
        .map(|n| (n.uuid.as_str(), n.identifier.as_str()))
        .collect();

    // Replay the timeline and count children running at each step.
    let mut running = 0usize;
    let mut max_running = 0usize;
    for event in service.timeline().get_events() {
        let Some(identifier) = ids.get(event.node_execution_id.as_str()) else {
            continue;
        };
        if *identifier == "fork" {
            continue;
        }
        if event.status == Status::Running {
            running += 1;
        } else if event.status.is_terminal() && event.previous == Some(Status::Running) {
            running = running.saturating_sub(1);
        }
        max_running = max_running.max(running);
    }
    assert_eq!(max_running, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_until_success_links_attempts() {
    let flaky = Arc::new(FlakyStep::new(2));
    let service = service_with(registry().with_executable("FLAKY", flaky.clone()));
    let plan = Plan::new("flaky")
        .with_node(PlanNode::new("flaky", "FLAKY").with_adviser("RETRY", json!({"retry_count": 3})));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Succeeded);
    assert_eq!(flaky.calls(), 3);

    let mut nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    nodes.sort_by_key(|n| n.retry_ids.len());
    assert_eq!(nodes.len(), 3);

    let (old, current) = nodes.split_at(2);
    for attempt in old {
        assert!(attempt.old_retry);
        assert_eq!(attempt.status, Status::Failed);
    }
    assert_eq!(old[0].next_id.as_deref(), Some(old[1].uuid.as_str()));
    assert_eq!(old[1].next_id.as_deref(), Some(current[0].uuid.as_str()));

    let last = &current[0];
    assert!(!last.old_retry);
    assert_eq!(last.status, Status::Succeeded);
    assert_eq!(last.retry_ids, vec![old[0].uuid.clone(), old[1].uuid.clone()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_retry_fails_plan() {
    let flaky = Arc::new(FlakyStep::new(5));
    let service = service_with(registry().with_executable("FLAKY", flaky.clone()));
    let plan = Plan::new("flaky").with_node(
        PlanNode::new("flaky", "FLAKY")
            .with_adviser("RETRY", json!({"retry_count": 1, "wait_intervals_ms": [20]})),
    );

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Failed);
    assert_eq!(flaky.calls(), 2);
    assert!(finished.failure_info.unwrap().message.contains("attempt 2 failed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_on_fail_hands_off_to_cleanup() {
    let service = service();
    let plan = Plan::new("deploy")
        .with_node(PlanNode::new("deploy", "FAIL").with_adviser(
            "ON_FAIL",
            json!({"next_node": "rollback", "ignore_failure": true}),
        ))
        .with_node(PlanNode::new("rollback", "NOOP"));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Succeeded);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert_eq!(node(&nodes, "deploy").status, Status::IgnoreFailed);
    assert_eq!(node(&nodes, "rollback").status, Status::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_section_takes_status_of_child_chain() {
    let service = service();
    let plan = Plan::new("section")
        .with_node(PlanNode::new("section", "SECTION").with_parameters(json!({"child": "first"})))
        .with_node(PlanNode::new("first", "NOOP").with_adviser("ON_SUCCESS", json!({"next_node": "second"})))
        .with_node(PlanNode::new("second", "FAIL"));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Failed);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    let section = node(&nodes, "section");
    assert_eq!(section.status, Status::Failed);
    assert_eq!(node(&nodes, "first").status, Status::Succeeded);
    assert_eq!(
        node(&nodes, "second").parent_id.as_deref(),
        Some(section.uuid.as_str())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_end_plan_adviser_stops_siblings() {
    let service = service();
    let plan = Plan::new("fork")
        .with_node(PlanNode::new("fork", "FORK").with_parameters(json!({"children": ["wait", "bad"]})))
        .with_node(PlanNode::new("wait", "CALLBACK"))
        .with_node(PlanNode::new("bad", "FAIL").with_adviser("END_PLAN", json!({})));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Failed);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert_eq!(node(&nodes, "bad").status, Status::Failed);
    assert_eq!(node(&nodes, "wait").status, Status::Aborted);
    assert_eq!(node(&nodes, "fork").status, Status::Aborted);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_callback_resumes_async_node() {
    let service = service();
    let plan = Plan::new("wait").with_node(PlanNode::new("wait", "CALLBACK"));

    let handle = start(&service, plan);
    let waiting = wait_for_node(&service, &handle.plan_execution_id, |n| {
        n.status == Status::AsyncWaiting
    })
    .await;
    assert_eq!(waiting.callback_ids, vec![callback_id(&waiting.uuid)]);

    service
        .complete_callback(&callback_id(&waiting.uuid), json!({"ok": true}))
        .unwrap();
    assert_eq!(finish(&service, &handle).await.status, Status::Succeeded);
    assert_eq!(
        service
            .store()
            .outcome(&handle.plan_execution_id, "wait.callbacks")
            .unwrap(),
        Some(json!(1))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_expires_node_and_late_callback_is_ignored() {
    let service = service();
    let plan = Plan::new("wait").with_node(PlanNode::new("wait", "CALLBACK").with_timeout(100));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Expired);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    let expired = node(&nodes, "wait");
    assert_eq!(expired.status, Status::Expired);
    assert!(expired
        .failure_info
        .as_ref()
        .unwrap()
        .matches_any(&[FailureType::Timeout]));

    service
        .complete_callback(&callback_id(&expired.uuid), json!({"late": true}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert_eq!(node(&nodes, "wait").status, Status::Expired);
    assert_eq!(
        service.plan_execution(&handle.plan_execution_id).unwrap().status,
        Status::Expired
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timer_firing_after_conclusion_is_ignored() {
    let service = service();
    let mut signals = service.subscribe();
    let plan = Plan::new("a")
        .with_node(
            PlanNode::new("a", "NOOP")
                .with_timeout(60_000)
                .with_adviser("ON_SUCCESS", json!({"next_node": "wait"})),
        )
        .with_node(PlanNode::new("wait", "CALLBACK"));

    let handle = start(&service, plan);
    let waiting = wait_for_node(&service, &handle.plan_execution_id, |ne| {
        ne.identifier == "wait" && ne.status == Status::AsyncWaiting
    })
    .await;

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    let concluded = node(&nodes, "a").clone();
    assert_eq!(concluded.status, Status::Succeeded);
    let instance_id = concluded.timeout_instance_ids[0].clone();
    let history = service.timeline().statuses_for(&concluded.uuid);

    // The timer already left ACTIVE when the node concluded.
    service.engine().on_timeout(&instance_id);
    assert_eq!(
        service.store().timeout(&instance_id).unwrap().state,
        TimeoutState::Cancelled
    );

    // A timer that fired just before cancellation reaches the node too late.
    assert!(service
        .store()
        .update_timeout_state(&instance_id, TimeoutState::Cancelled, TimeoutState::Active)
        .unwrap());
    service.engine().on_timeout(&instance_id);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert_eq!(node(&nodes, "a").status, Status::Succeeded);
    assert_eq!(service.timeline().statuses_for(&concluded.uuid), history);
    assert_eq!(
        service.plan_execution(&handle.plan_execution_id).unwrap().status,
        Status::Running
    );
    let interrupts = service.interrupts(&handle.plan_execution_id).unwrap();
    assert_eq!(interrupts.len(), 1);
    assert_eq!(interrupts[0].state, InterruptState::Discarded);

    service
        .complete_callback(&callback_id(&waiting.uuid), json!({}))
        .unwrap();
    assert_eq!(finish(&service, &handle).await.status, Status::Succeeded);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ended = 0;
    while let Ok(signal) = signals.try_recv() {
        if let OrchestrationSignal::PlanEnded { .. } = signal {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lifecycle_signals() {
    let service = service();
    let mut signals = service.subscribe();
    let plan = Plan::new("a")
        .with_node(PlanNode::new("a", "NOOP").with_adviser("ON_SUCCESS", json!({"next_node": "b"})))
        .with_node(PlanNode::new("b", "NOOP"));

    let handle = start(&service, plan);
    finish(&service, &handle).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut started = 0;
    let mut ended = Vec::new();
    let mut changes = 0;
    while let Ok(signal) = signals.try_recv() {
        match signal {
            OrchestrationSignal::PlanStarted { plan_execution_id } => {
                assert_eq!(plan_execution_id, handle.plan_execution_id);
                started += 1;
            }
            OrchestrationSignal::NodeStatusChanged { .. } => changes += 1,
            OrchestrationSignal::PlanEnded { status, .. } => ended.push(status),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(ended, vec![Status::Succeeded]);
    assert!(changes >= 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_terminal_statuses_never_change() {
    let flaky = Arc::new(FlakyStep::new(1));
    let service = service_with(registry().with_executable("FLAKY", flaky));
    let plan = Plan::new("fork")
        .with_node(PlanNode::new("fork", "FORK").with_parameters(json!({
            "children": ["flaky", "bad", "wait"]
        })))
        .with_node(PlanNode::new("flaky", "FLAKY").with_adviser("RETRY", json!({"retry_count": 2})))
        .with_node(PlanNode::new("bad", "FAIL"))
        .with_node(PlanNode::new("wait", "CALLBACK").with_timeout(100));

    let handle = start(&service, plan);
    finish(&service, &handle).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let timeline = service.timeline();
    for ne in service.node_executions(&handle.plan_execution_id).unwrap() {
        let statuses = timeline.statuses_for(&ne.uuid);
        let first_terminal = statuses.iter().position(|s| s.is_terminal());
        if let Some(index) = first_terminal {
            assert_eq!(
                index,
                statuses.len() - 1,
                "'{}' changed after {}: {:?}",
                ne.identifier,
                statuses[index],
                statuses
            );
        }
        assert_eq!(statuses.last().copied(), Some(ne.status));
    }
}

struct EchoTask;

impl TaskHandler for EchoTask {
    fn run(&self, parameters: &Value) -> Result<Value, String> {
        match parameters.get("fail").and_then(Value::as_str) {
            Some(message) => Err(message.to_string()),
            None => Ok(parameters.clone()),
        }
    }
}

struct SlowTask;

impl TaskHandler for SlowTask {
    fn run(&self, _parameters: &Value) -> Result<Value, String> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(Value::Null)
    }
}

fn task_service() -> OrchestrationService {
    service_with(
        registry()
            .with_task_handler("ECHO", Arc::new(EchoTask))
            .with_task_handler("SLOW", Arc::new(SlowTask)),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delegated_task_result_becomes_outcome() {
    let service = task_service();
    let plan = Plan::new("package").with_node(PlanNode::new("package", "DELEGATE").with_parameters(json!({
        "task_type": "ECHO",
        "parameters": {"artifact": "${setup.artifact}"}
    })));
    let mut setup = BTreeMap::new();
    setup.insert("artifact".to_string(), "app.tgz".to_string());

    let handle = start_with(&service, plan, setup);
    assert_eq!(finish(&service, &handle).await.status, Status::Succeeded);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    assert!(node(&nodes, "package").task_id.is_some());
    assert_eq!(
        service
            .store()
            .outcome(&handle.plan_execution_id, "package.result")
            .unwrap(),
        Some(json!({"artifact": "app.tgz"}))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_task_fails_node() {
    let service = task_service();
    let plan = Plan::new("package").with_node(PlanNode::new("package", "DELEGATE").with_parameters(json!({
        "task_type": "ECHO",
        "parameters": {"fail": "disk full"}
    })));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Failed);
    let failure = finished.failure_info.unwrap();
    assert!(failure.message.contains("disk full"));
    assert!(failure.matches_any(&[FailureType::TaskDelegation]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_task_deadline_fails_node() {
    let service = task_service();
    let plan = Plan::new("slow").with_node(PlanNode::new("slow", "DELEGATE").with_parameters(json!({
        "task_type": "SLOW",
        "timeout_ms": 50
    })));

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert_eq!(finished.status, Status::Failed);
    assert!(finished.failure_info.unwrap().message.contains("timed out"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_condition_reads_setup() {
    let service = service();
    let plan = Plan::new("migrate").with_node(
        PlanNode::new("migrate", "FAIL").with_skip_condition("${setup.env} == 'prod'"),
    );
    let mut setup = BTreeMap::new();
    setup.insert("env".to_string(), "prod".to_string());

    let handle = start_with(&service, plan, setup);
    assert_eq!(finish(&service, &handle).await.status, Status::Skipped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unresolved_expression_fails_node() {
    let service = service();
    let plan = Plan::new("a").with_node(
        PlanNode::new("a", "NOOP").with_parameters(json!({"outcomes": {"x": "${setup.missing}"}})),
    );

    let handle = start(&service, plan);
    let finished = finish(&service, &handle).await;
    assert!(!finished.status.is_positive());
    assert!(finished.failure_info.unwrap().message.contains("setup.missing"));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_yaml_plan_with_shell_steps() {
    let plan = parse_plan(
        r#"
starting_node: greet
nodes:
  - id: greet
    step_type: SHELL
    step_parameters:
      command: echo "hello ${setup.name}"
    advisers:
      - type: ON_SUCCESS
        parameters:
          next_node: check
  - id: check
    step_type: SHELL
    step_parameters:
      command: test "${outcome.greet.stdout}" = "hello ops"
"#,
    )
    .unwrap();
    let service = service();
    let mut setup = BTreeMap::new();
    setup.insert("name".to_string(), "ops".to_string());

    let handle = start_with(&service, plan, setup);
    assert_eq!(finish(&service, &handle).await.status, Status::Succeeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recover_from_state_dir() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        state_dir: Some(dir.path().to_path_buf()),
        ..config()
    };
    let plan = Plan::new("wait").with_node(PlanNode::new("wait", "CALLBACK"));

    let first = OrchestrationService::builder(config.clone())
        .registry(registry())
        .build()
        .unwrap();
    let handle = start(&first, plan);
    let waiting = wait_for_node(&first, &handle.plan_execution_id, |n| {
        n.status == Status::AsyncWaiting
    })
    .await;
    // The node parks before its wait is registered.
    while first.engine().wait_notify().pending_waits() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    first.shutdown();

    let second = OrchestrationService::builder(config)
        .registry(registry())
        .build()
        .unwrap();
    let report = second.recover().unwrap();
    assert_eq!(report.timeouts_rearmed, 1);
    assert_eq!(report.nodes_redispatched, 0);

    second
        .complete_callback(&callback_id(&waiting.uuid), json!({}))
        .unwrap();
    let finished = finish(&second, &handle).await;
    assert_eq!(finished.status, Status::Succeeded);
}

/// Delays every node it facilitates by its `delay_ms` parameter.
struct DelayFacilitator;

impl Facilitator for DelayFacilitator {
    fn facilitate(&self, ctx: &FacilitationContext<'_>) -> planrunner::Result<Option<FacilitatorResponse>> {
        let delay = ctx.parameters.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
        Ok(Some(FacilitatorResponse::new(ExecutionMode::Sync).with_initial_wait(delay)))
    }

    fn is_custom(&self) -> bool {
        true
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_custom_facilitator_with_initial_wait() {
    let service = service_with(registry().with_facilitator("DELAY", Arc::new(DelayFacilitator)));
    let plan = Plan::new("late").with_node(
        PlanNode::new("late", "NOOP").with_facilitator_parameters("DELAY", json!({"delay_ms": 50})),
    );

    let handle = start(&service, plan);
    assert_eq!(finish(&service, &handle).await.status, Status::Succeeded);

    let nodes = service.node_executions(&handle.plan_execution_id).unwrap();
    let late = node(&nodes, "late");
    assert_eq!(late.mode, Some(ExecutionMode::Sync));
    assert_eq!(
        service.timeline().statuses_for(&late.uuid),
        vec![Status::Queued, Status::TimedWaiting, Status::Running, Status::Succeeded]
    );
}
