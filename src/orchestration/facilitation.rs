//! Facilitation
//!
//! Decides how a node runs before it is invoked. Built-in facilitators
//! map directly to an [`ExecutionMode`]; custom ones report
//! `is_custom() == true` and are run out of band through a FACILITATE
//! event, their answer arriving through wait-notify.

use std::sync::Arc;

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::engine::OrchestrationEngine;
use super::listeners::EventListener;
use super::processor::parse_parameters;
use super::registry::Registry;
use crate::error::{EngineError, Result};
use crate::events::{EventPayload, OrchestrationEvent};
use crate::model::{ExecutionMode, FacilitatorResponse, NodeExecution, PlanNode, ResponseData};

/// What a facilitator sees.
pub struct FacilitationContext<'a> {
    pub node_execution: &'a NodeExecution,
    pub plan_node: &'a PlanNode,
    pub resolved_parameters: &'a Value,
    /// Parameters of this facilitator's obtainment
    pub parameters: &'a Value,
}

pub trait Facilitator: Send + Sync {
    /// Returns `None` to defer to the next declared facilitator.
    fn facilitate(&self, ctx: &FacilitationContext<'_>) -> Result<Option<FacilitatorResponse>>;

    fn is_custom(&self) -> bool {
        false
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModeParameters {
    initial_wait_ms: u64,
    pass_through: Value,
}

/// Facilitator that always picks one mode.
pub struct ModeFacilitator {
    mode: ExecutionMode,
}

impl ModeFacilitator {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }
}

impl Facilitator for ModeFacilitator {
    fn facilitate(&self, ctx: &FacilitationContext<'_>) -> Result<Option<FacilitatorResponse>> {
        let params: ModeParameters = parse_parameters(&ctx.plan_node.identifier, ctx.parameters)?;
        Ok(Some(FacilitatorResponse {
            mode: self.mode,
            initial_wait_ms: params.initial_wait_ms,
            pass_through: params.pass_through,
        }))
    }
}

pub fn builtin_facilitators() -> Vec<(&'static str, Arc<dyn Facilitator>)> {
    [
        ("SYNC", ExecutionMode::Sync),
        ("ASYNC", ExecutionMode::Async),
        ("CHILDREN", ExecutionMode::Children),
        ("CHILD", ExecutionMode::Child),
        ("TASK", ExecutionMode::Task),
    ]
    .into_iter()
    .map(|(name, mode)| (name, Arc::new(ModeFacilitator::new(mode)) as Arc<dyn Facilitator>))
    .collect()
}

/// Runs the node's facilitators in declared order; the first answer wins.
///
/// A node without facilitators runs in its executable's default mode.
pub fn facilitate(
    registry: &Registry,
    plan_node: &PlanNode,
    node_execution: &NodeExecution,
    resolved_parameters: &Value,
) -> Result<FacilitatorResponse> {
    if plan_node.facilitators.is_empty() {
        let executable = registry.executable(&plan_node.step_type)?;
        return Ok(FacilitatorResponse::new(executable.default_mode()));
    }

    for obtainment in &plan_node.facilitators {
        let facilitator = registry.facilitator(&obtainment.facilitator_type)?;
        let ctx = FacilitationContext {
            node_execution,
            plan_node,
            resolved_parameters,
            parameters: &obtainment.parameters,
        };
        if let Some(response) = facilitator.facilitate(&ctx)? {
            debug!(
                "Facilitator {} chose {} for node '{}'",
                obtainment.facilitator_type, response.mode, plan_node.identifier
            );
            return Ok(response);
        }
    }

    Err(EngineError::FacilitationFailed(plan_node.identifier.clone()))
}

/// Runs facilitation for FACILITATE events and completes the event's
/// correlation id with the answer.
pub struct FacilitateListener;

impl EventListener for FacilitateListener {
    fn on_event(&self, engine: &OrchestrationEngine, event: OrchestrationEvent) -> Result<()> {
        let EventPayload::Facilitate { resolved_parameters } = &event.payload else {
            return Err(EngineError::InvalidPlan(format!(
                "FACILITATE listener received {} event",
                event.event_type
            )));
        };
        let plan_node = engine.plan_node(&event.node_execution)?;
        let response = facilitate(
            engine.registry(),
            &plan_node,
            &event.node_execution,
            resolved_parameters,
        )?;
        engine.notify(&event.id, ResponseData::Facilitation(response))
    }
}
