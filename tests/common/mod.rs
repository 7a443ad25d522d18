//! Shared fixtures for engine scenarios.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use planrunner::model::{
    ExecutionMode, FailureType, NodeExecution, Plan, PlanExecution, ResponseMap, StepResponse,
    TriggerInfo,
};
use planrunner::orchestration::{Executable, PlanExecutionHandle, StartResponse, StepContext};
use planrunner::{EngineConfig, OrchestrationService, Registry, Result};

pub const WAIT: Duration = Duration::from_secs(10);

/// Always fails with an application error.
pub struct FailStep;

impl Executable for FailStep {
    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        Ok(StartResponse::Completed(StepResponse::failed(
            format!("{} broke", ctx.identifier()),
            FailureType::Application,
        )))
    }
}

/// Fails its first `failures` starts, then succeeds.
pub struct FlakyStep {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyStep {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Executable for FlakyStep {
    fn start(&self, _ctx: &StepContext) -> Result<StartResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Ok(StartResponse::Completed(StepResponse::failed(
                format!("attempt {} failed", call + 1),
                FailureType::Application,
            )));
        }
        Ok(StartResponse::Completed(StepResponse::succeeded()))
    }
}

/// Sleeps for its `ms` parameter, then succeeds.
pub struct SleepStep;

impl Executable for SleepStep {
    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        let ms = ctx.parameters.get("ms").and_then(Value::as_u64).unwrap_or(50);
        thread::sleep(Duration::from_millis(ms));
        Ok(StartResponse::Completed(StepResponse::succeeded()))
    }
}

/// Waits on one external callback, `cb-<node execution id>`.
pub struct CallbackStep;

impl Executable for CallbackStep {
    fn default_mode(&self) -> ExecutionMode {
        ExecutionMode::Async
    }

    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        Ok(StartResponse::Callbacks {
            callback_ids: vec![callback_id(&ctx.node_execution_id)],
        })
    }

    fn resume(&self, _ctx: &StepContext, responses: &ResponseMap) -> Result<StepResponse> {
        Ok(StepResponse::succeeded().with_outcome("callbacks", json!(responses.len())))
    }
}

pub fn callback_id(node_execution_id: &str) -> String {
    format!("cb-{}", node_execution_id)
}

pub fn config() -> EngineConfig {
    EngineConfig {
        worker_threads: 4,
        poll_interval_ms: 10,
        ..EngineConfig::default()
    }
}

pub fn registry() -> Registry {
    Registry::with_builtins()
        .with_executable("FAIL", Arc::new(FailStep))
        .with_executable("SLEEP", Arc::new(SleepStep))
        .with_executable("CALLBACK", Arc::new(CallbackStep))
}

pub fn service_with(registry: Registry) -> OrchestrationService {
    OrchestrationService::builder(config())
        .registry(registry)
        .build()
        .unwrap()
}

pub fn service() -> OrchestrationService {
    service_with(registry())
}

pub fn start(service: &OrchestrationService, plan: Plan) -> PlanExecutionHandle {
    start_with(service, plan, BTreeMap::new())
}

pub fn start_with(
    service: &OrchestrationService,
    plan: Plan,
    setup: BTreeMap<String, String>,
) -> PlanExecutionHandle {
    service
        .start_execution(plan, setup, TriggerInfo::manual("tests"))
        .unwrap()
}

pub async fn finish(service: &OrchestrationService, handle: &PlanExecutionHandle) -> PlanExecution {
    service
        .wait_for_completion(&handle.plan_execution_id, WAIT)
        .await
        .unwrap()
}

/// Polls until a node execution of the plan satisfies `predicate`.
pub async fn wait_for_node<F>(
    service: &OrchestrationService,
    plan_execution_id: &str,
    predicate: F,
) -> NodeExecution
where
    F: Fn(&NodeExecution) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let found = service
            .node_executions(plan_execution_id)
            .unwrap()
            .into_iter()
            .find(|ne| predicate(ne));
        if let Some(ne) = found {
            return ne;
        }
        assert!(Instant::now() < deadline, "node never reached the expected state");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn node<'a>(nodes: &'a [NodeExecution], identifier: &str) -> &'a NodeExecution {
    nodes
        .iter()
        .find(|ne| ne.identifier == identifier && !ne.old_retry)
        .unwrap_or_else(|| panic!("no node execution for '{}'", identifier))
}
