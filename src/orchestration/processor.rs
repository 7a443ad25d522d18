//! Executable Processors
//!
//! The [`Executable`] trait is what a step type implements. The START and
//! RESUME listeners here call into it and turn its answer into the next
//! engine transition according to the facilitated mode.

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::children;
use super::engine::OrchestrationEngine;
use super::listeners::EventListener;
use crate::error::{EngineError, Result};
use crate::events::{EventPayload, OrchestrationEvent};
use crate::model::{
    aggregate_status, Ambiance, ExecutionMode, FailureInfo, FailureType, NodeExecution, PlanNode,
    ResponseData, ResponseMap, Status, StepResponse, UnitProgress,
};
use crate::task::{self, TaskSpec};
use crate::waitnotify::NotifyCallback;

/// Everything a step sees when it starts or resumes.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub node_execution_id: String,
    pub ambiance: Ambiance,
    pub node: PlanNode,
    /// Step parameters with expressions resolved
    pub parameters: Value,
    /// Opaque data from the facilitator
    pub pass_through: Value,
}

impl StepContext {
    pub fn identifier(&self) -> &str {
        &self.node.identifier
    }

    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T> {
        parse_parameters(&self.node.identifier, &self.parameters)
    }
}

/// Deserializes obtainment or step parameters; `null` reads as `{}`.
pub fn parse_parameters<T: DeserializeOwned>(owner: &str, value: &Value) -> Result<T> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|e| EngineError::InvalidParameters {
        owner: owner.to_string(),
        message: e.to_string(),
    })
}

/// What a step returns from `start`.
#[derive(Debug, Clone, PartialEq)]
pub enum StartResponse {
    /// Finished synchronously
    Completed(StepResponse),
    /// Resume once every callback id is completed through wait-notify
    Callbacks { callback_ids: Vec<String> },
    /// Fan out to these plan nodes; `0` runs them all at once
    Children {
        children: Vec<String>,
        max_concurrency: usize,
    },
    Child { child_node_id: String },
    /// Delegate to the task executor
    Task(TaskSpec),
}

impl StartResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            StartResponse::Completed(_) => "COMPLETED",
            StartResponse::Callbacks { .. } => "CALLBACKS",
            StartResponse::Children { .. } => "CHILDREN",
            StartResponse::Child { .. } => "CHILD",
            StartResponse::Task(_) => "TASK",
        }
    }

    fn allowed_in(&self, mode: ExecutionMode) -> bool {
        match self {
            StartResponse::Completed(_) => true,
            StartResponse::Callbacks { .. } => mode == ExecutionMode::Async,
            StartResponse::Children { .. } => mode == ExecutionMode::Children,
            StartResponse::Child { .. } => mode == ExecutionMode::Child,
            StartResponse::Task(_) => mode == ExecutionMode::Task,
        }
    }
}

pub trait Executable: Send + Sync {
    /// Mode used when the node declares no facilitator.
    fn default_mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }

    fn start(&self, ctx: &StepContext) -> Result<StartResponse>;

    /// Called once every awaited callback, child or task has answered.
    ///
    /// The default aggregates child notifications.
    fn resume(&self, ctx: &StepContext, responses: &ResponseMap) -> Result<StepResponse> {
        let _ = ctx;
        Ok(aggregate_children(responses))
    }
}

/// Folds child notifications into one response: all skipped is skipped,
/// otherwise the most severe broken status, otherwise success.
pub fn aggregate_children(responses: &ResponseMap) -> StepResponse {
    let notifications: Vec<_> = responses
        .values()
        .filter_map(|data| match data {
            ResponseData::Step(notification) => Some(notification),
            _ => None,
        })
        .collect();

    let status = aggregate_status(notifications.iter().map(|n| n.status));
    let mut response = StepResponse::with_status(status);
    for notification in &notifications {
        response.unit_progresses.push(UnitProgress {
            unit_name: notification.identifier.clone(),
            status: notification.status,
        });
    }
    if status.is_positive() {
        return response;
    }

    let mut messages = Vec::new();
    let mut failure_types: Vec<FailureType> = Vec::new();
    for notification in notifications.iter().filter(|n| !n.status.is_positive()) {
        match &notification.failure_info {
            Some(info) => {
                messages.push(format!("{}: {}", notification.identifier, info.message));
                for failure_type in &info.failure_types {
                    if !failure_types.contains(failure_type) {
                        failure_types.push(*failure_type);
                    }
                }
            }
            None => messages.push(format!("{}: {}", notification.identifier, notification.status)),
        }
    }
    if failure_types.is_empty() {
        failure_types.push(FailureType::Application);
    }
    response.failure_info = Some(FailureInfo {
        message: messages.join("; "),
        failure_types,
    });
    response
}

fn step_context(node_execution: &NodeExecution, node: PlanNode, parameters: Value) -> StepContext {
    StepContext {
        node_execution_id: node_execution.uuid.clone(),
        ambiance: node_execution.ambiance.clone(),
        node,
        parameters,
        pass_through: node_execution
            .facilitator_response
            .as_ref()
            .map(|r| r.pass_through.clone())
            .unwrap_or(Value::Null),
    }
}

/// Current record when the node is still `Running`, `None` for stale events.
fn running_node(engine: &OrchestrationEngine, event: &OrchestrationEvent) -> Result<Option<NodeExecution>> {
    let current = engine.store().node_execution(event.node_execution_id())?;
    if current.status != Status::Running {
        debug!(
            "Ignoring {} event {} for node '{}' in {}",
            event.event_type, event.id, current.identifier, current.status
        );
        return Ok(None);
    }
    Ok(Some(current))
}

/// Starts the executable and routes its answer.
pub struct StartListener;

impl EventListener for StartListener {
    fn on_event(&self, engine: &OrchestrationEngine, event: OrchestrationEvent) -> Result<()> {
        let Some(node_execution) = running_node(engine, &event)? else {
            return Ok(());
        };
        let EventPayload::Start {
            facilitator_response,
            resolved_parameters,
        } = event.payload
        else {
            return Err(EngineError::InvalidPlan(
                "START listener received another event type".to_string(),
            ));
        };

        let plan_node = engine.plan_node(&node_execution)?;
        let executable = engine.registry().executable(&plan_node.step_type)?;
        let ctx = step_context(&node_execution, plan_node, resolved_parameters);
        let response = executable.start(&ctx)?;

        if !response.allowed_in(facilitator_response.mode) {
            return Err(EngineError::ModeMismatch {
                step: node_execution.identifier.clone(),
                expected: facilitator_response.mode,
                actual: response.kind(),
            });
        }

        match response {
            StartResponse::Completed(step_response) => {
                engine.handle_step_response(&node_execution.uuid, step_response)
            }
            StartResponse::Callbacks { callback_ids } => {
                await_callbacks(engine, &node_execution, callback_ids)
            }
            StartResponse::Children {
                children,
                max_concurrency,
            } => children::spawn_children(engine, &node_execution, &children, max_concurrency),
            StartResponse::Child { child_node_id } => {
                children::spawn_children(engine, &node_execution, &[child_node_id], 0)
            }
            StartResponse::Task(spec) => task::delegate(engine, &node_execution, spec),
        }
    }
}

fn await_callbacks(
    engine: &OrchestrationEngine,
    node_execution: &NodeExecution,
    callback_ids: Vec<String>,
) -> Result<()> {
    let parked = engine.update_node(&node_execution.uuid, &[Status::Running], |ne| {
        ne.status = Status::AsyncWaiting;
        ne.callback_ids = callback_ids.clone();
    })?;
    if parked.is_none() {
        return Ok(());
    }
    info!(
        "Node '{}' waiting on {} callbacks",
        node_execution.identifier,
        callback_ids.len()
    );
    engine.wait_for_all(
        callback_ids,
        NotifyCallback::Resume {
            node_execution_id: node_execution.uuid.clone(),
        },
    )
}

/// Resumes the executable with the collected responses.
pub struct ResumeListener;

impl EventListener for ResumeListener {
    fn on_event(&self, engine: &OrchestrationEngine, event: OrchestrationEvent) -> Result<()> {
        let Some(node_execution) = running_node(engine, &event)? else {
            return Ok(());
        };
        let EventPayload::Resume {
            responses,
            async_error,
        } = event.payload
        else {
            return Err(EngineError::InvalidPlan(
                "RESUME listener received another event type".to_string(),
            ));
        };

        if async_error {
            let message = responses
                .values()
                .filter_map(ResponseData::error_message)
                .collect::<Vec<_>>()
                .join("; ");
            return engine.handle_step_response(
                &node_execution.uuid,
                StepResponse::failed(message, FailureType::TaskDelegation),
            );
        }

        let plan_node = engine.plan_node(&node_execution)?;
        let executable = engine.registry().executable(&plan_node.step_type)?;
        let parameters = node_execution
            .resolved_step_parameters
            .clone()
            .unwrap_or(Value::Null);
        let ctx = step_context(&node_execution, plan_node, parameters);
        let response = executable.resume(&ctx, &responses)?;
        engine.handle_step_response(&node_execution.uuid, response)
    }
}
