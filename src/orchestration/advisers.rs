//! Advisers
//!
//! Post-step policies deciding what follows a finished node. A node's
//! advisers are asked in declared order; the first whose `can_advise`
//! holds produces the [`AdviserResponse`].

use std::sync::Arc;

use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use super::engine::OrchestrationEngine;
use super::listeners::EventListener;
use super::processor::parse_parameters;
use super::registry::Registry;
use crate::error::{EngineError, Result};
use crate::events::{EventPayload, OrchestrationEvent};
use crate::model::{
    AdviserResponse, FailureInfo, FailureType, InterruptType, NodeExecution, PlanNode,
    RepairAction, ResponseData, Status,
};

/// What an adviser sees.
pub struct AdvisingContext<'a> {
    pub node_execution: &'a NodeExecution,
    pub plan_node: &'a PlanNode,
    /// Status the step finished with
    pub to_status: Status,
    pub failure_info: Option<&'a FailureInfo>,
    /// Parameters of this adviser's obtainment
    pub parameters: &'a Value,
}

impl AdvisingContext<'_> {
    /// Earlier attempts of this node.
    pub fn attempts(&self) -> usize {
        self.node_execution.retry_ids.len()
    }

    /// True when the failure carries one of `types`; an empty list matches
    /// any failure.
    pub fn failure_matches(&self, types: &[FailureType]) -> bool {
        if types.is_empty() {
            return true;
        }
        self.failure_info
            .map(|info| info.matches_any(types))
            .unwrap_or(false)
    }

    fn params<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        parse_parameters(&self.plan_node.identifier, self.parameters)
    }
}

pub trait Adviser: Send + Sync {
    fn can_advise(&self, ctx: &AdvisingContext<'_>) -> Result<bool>;
    fn on_advise(&self, ctx: &AdvisingContext<'_>) -> Result<AdviserResponse>;
}

#[derive(Debug, Deserialize)]
struct NextStepParameters {
    next_node: String,
}

/// Proceeds to `next_node`. Registered as `ON_SUCCESS` (positive outcomes
/// only) and `NEXT_STEP` (any outcome).
pub struct NextStepAdviser {
    on_success_only: bool,
}

impl Adviser for NextStepAdviser {
    fn can_advise(&self, ctx: &AdvisingContext<'_>) -> Result<bool> {
        Ok(!self.on_success_only || ctx.to_status.is_positive())
    }

    fn on_advise(&self, ctx: &AdvisingContext<'_>) -> Result<AdviserResponse> {
        let params: NextStepParameters = ctx.params()?;
        Ok(AdviserResponse::NextStep {
            next_node_id: params.next_node,
            to_status: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OnFailParameters {
    next_node: String,
    #[serde(default)]
    failure_types: Vec<FailureType>,
    /// Conclude the failed node as `IGNORE_FAILED` instead of its own status
    #[serde(default)]
    ignore_failure: bool,
}

/// Hands a broken node off to a failure-handling node.
pub struct OnFailAdviser;

impl Adviser for OnFailAdviser {
    fn can_advise(&self, ctx: &AdvisingContext<'_>) -> Result<bool> {
        let params: OnFailParameters = ctx.params()?;
        Ok(ctx.to_status.is_broken() && ctx.failure_matches(&params.failure_types))
    }

    fn on_advise(&self, ctx: &AdvisingContext<'_>) -> Result<AdviserResponse> {
        let params: OnFailParameters = ctx.params()?;
        Ok(AdviserResponse::NextStep {
            next_node_id: params.next_node,
            to_status: params.ignore_failure.then_some(Status::IgnoreFailed),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RetryParameters {
    retry_count: usize,
    #[serde(default)]
    wait_intervals_ms: Vec<u64>,
    #[serde(default)]
    repair_action: RepairAction,
    #[serde(default)]
    next_node: Option<String>,
    #[serde(default)]
    end_status: Option<Status>,
    #[serde(default)]
    intervention_timeout_ms: u64,
    #[serde(default)]
    failure_types: Vec<FailureType>,
}

/// Retries a broken node up to `retry_count` times, then applies
/// `repair_action`.
///
/// Wait intervals are taken by attempt index; the last one repeats.
pub struct RetryAdviser;

impl Adviser for RetryAdviser {
    fn can_advise(&self, ctx: &AdvisingContext<'_>) -> Result<bool> {
        let params: RetryParameters = ctx.params()?;
        if !ctx.to_status.is_broken() || !ctx.failure_matches(&params.failure_types) {
            return Ok(false);
        }
        Ok(ctx.attempts() < params.retry_count
            || params.repair_action != RepairAction::MarkAsFailure)
    }

    fn on_advise(&self, ctx: &AdvisingContext<'_>) -> Result<AdviserResponse> {
        let params: RetryParameters = ctx.params()?;
        let attempts = ctx.attempts();

        if attempts < params.retry_count {
            let wait_interval_ms = params
                .wait_intervals_ms
                .get(attempts)
                .or(params.wait_intervals_ms.last())
                .copied()
                .unwrap_or(0);
            return Ok(AdviserResponse::Retry { wait_interval_ms });
        }

        info!(
            "Node '{}' exhausted {} retries; repair action {:?}",
            ctx.plan_node.identifier, params.retry_count, params.repair_action
        );
        let response = match params.repair_action {
            RepairAction::MarkAsFailure => AdviserResponse::Unknown,
            RepairAction::Ignore => AdviserResponse::MarkSuccess {
                to_status: Status::IgnoreFailed,
                next_node_id: params.next_node,
            },
            RepairAction::OnFail => AdviserResponse::NextStep {
                next_node_id: params.next_node.ok_or_else(|| EngineError::InvalidParameters {
                    owner: ctx.plan_node.identifier.clone(),
                    message: "ON_FAIL repair action needs next_node".to_string(),
                })?,
                to_status: None,
            },
            RepairAction::EndPlan => AdviserResponse::EndPlan {
                status: params.end_status.unwrap_or(ctx.to_status),
            },
            RepairAction::ManualIntervention => AdviserResponse::InterventionWait {
                timeout_ms: params.intervention_timeout_ms,
                timeout_action: InterruptType::MarkFailed,
            },
        };
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct OverrideParameters {
    #[serde(default)]
    next_node: Option<String>,
    #[serde(default)]
    failure_types: Vec<FailureType>,
}

/// Overrides a broken outcome and continues. Registered as `IGNORE`
/// (`IGNORE_FAILED`) and `MARK_SUCCESS` (`SUCCEEDED`).
pub struct OverrideAdviser {
    to_status: Status,
}

impl Adviser for OverrideAdviser {
    fn can_advise(&self, ctx: &AdvisingContext<'_>) -> Result<bool> {
        let params: OverrideParameters = ctx.params()?;
        Ok(ctx.to_status.is_broken() && ctx.failure_matches(&params.failure_types))
    }

    fn on_advise(&self, ctx: &AdvisingContext<'_>) -> Result<AdviserResponse> {
        let params: OverrideParameters = ctx.params()?;
        Ok(AdviserResponse::MarkSuccess {
            to_status: self.to_status,
            next_node_id: params.next_node,
        })
    }
}

fn default_timeout_action() -> InterruptType {
    InterruptType::MarkFailed
}

#[derive(Debug, Deserialize)]
struct InterventionParameters {
    #[serde(default)]
    timeout_ms: u64,
    #[serde(default = "default_timeout_action")]
    timeout_action: InterruptType,
    #[serde(default)]
    failure_types: Vec<FailureType>,
}

/// Parks a broken node until an operator decides.
pub struct ManualInterventionAdviser;

impl Adviser for ManualInterventionAdviser {
    fn can_advise(&self, ctx: &AdvisingContext<'_>) -> Result<bool> {
        let params: InterventionParameters = ctx.params()?;
        Ok(ctx.to_status.is_broken() && ctx.failure_matches(&params.failure_types))
    }

    fn on_advise(&self, ctx: &AdvisingContext<'_>) -> Result<AdviserResponse> {
        let params: InterventionParameters = ctx.params()?;
        Ok(AdviserResponse::InterventionWait {
            timeout_ms: params.timeout_ms,
            timeout_action: params.timeout_action,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EndPlanParameters {
    #[serde(default)]
    status: Option<Status>,
    #[serde(default)]
    on_statuses: Vec<Status>,
}

/// Ends the whole plan execution. Applies to non-positive outcomes
/// unless `on_statuses` says otherwise.
pub struct EndPlanAdviser;

impl Adviser for EndPlanAdviser {
    fn can_advise(&self, ctx: &AdvisingContext<'_>) -> Result<bool> {
        let params: EndPlanParameters = ctx.params()?;
        if params.on_statuses.is_empty() {
            return Ok(!ctx.to_status.is_positive());
        }
        Ok(params.on_statuses.contains(&ctx.to_status))
    }

    fn on_advise(&self, ctx: &AdvisingContext<'_>) -> Result<AdviserResponse> {
        let params: EndPlanParameters = ctx.params()?;
        Ok(AdviserResponse::EndPlan {
            status: params.status.unwrap_or(ctx.to_status),
        })
    }
}

pub fn builtin_advisers() -> Vec<(&'static str, Arc<dyn Adviser>)> {
    vec![
        ("ON_SUCCESS", Arc::new(NextStepAdviser { on_success_only: true }) as Arc<dyn Adviser>),
        ("NEXT_STEP", Arc::new(NextStepAdviser { on_success_only: false }) as Arc<dyn Adviser>),
        ("ON_FAIL", Arc::new(OnFailAdviser) as Arc<dyn Adviser>),
        ("RETRY", Arc::new(RetryAdviser) as Arc<dyn Adviser>),
        ("IGNORE", Arc::new(OverrideAdviser { to_status: Status::IgnoreFailed }) as Arc<dyn Adviser>),
        ("MARK_SUCCESS", Arc::new(OverrideAdviser { to_status: Status::Succeeded }) as Arc<dyn Adviser>),
        ("MANUAL_INTERVENTION", Arc::new(ManualInterventionAdviser) as Arc<dyn Adviser>),
        ("END_PLAN", Arc::new(EndPlanAdviser) as Arc<dyn Adviser>),
    ]
}

/// Asks the node's advisers in order, leaving out `skip` types.
///
/// `Unknown` when none applies, or when one that applies answers
/// `Unknown` and no later adviser does better.
pub fn obtain_advice(
    registry: &Registry,
    plan_node: &PlanNode,
    node_execution: &NodeExecution,
    to_status: Status,
    failure_info: Option<&FailureInfo>,
    skip: &[String],
) -> Result<AdviserResponse> {
    for obtainment in &plan_node.advisers {
        if skip.contains(&obtainment.adviser_type) {
            continue;
        }
        let adviser = registry.adviser(&obtainment.adviser_type)?;
        let ctx = AdvisingContext {
            node_execution,
            plan_node,
            to_status,
            failure_info,
            parameters: &obtainment.parameters,
        };
        if !adviser.can_advise(&ctx)? {
            continue;
        }
        let response = adviser.on_advise(&ctx)?;
        if response != AdviserResponse::Unknown {
            debug!(
                "Adviser {} answered {} for node '{}'",
                obtainment.adviser_type,
                response.kind(),
                plan_node.identifier
            );
            return Ok(response);
        }
    }
    Ok(AdviserResponse::Unknown)
}

/// Runs the adviser chain for ADVISE events and completes the event's
/// correlation id with the decision.
pub struct AdviseListener;

impl EventListener for AdviseListener {
    fn on_event(&self, engine: &OrchestrationEngine, event: OrchestrationEvent) -> Result<()> {
        let EventPayload::Advise {
            to_status,
            failure_info,
            skip_adviser_types,
        } = &event.payload
        else {
            return Err(EngineError::InvalidPlan(format!(
                "ADVISE listener received {} event",
                event.event_type
            )));
        };
        let plan_node = engine.plan_node(&event.node_execution)?;
        let advice = obtain_advice(
            engine.registry(),
            &plan_node,
            &event.node_execution,
            *to_status,
            failure_info.as_ref(),
            skip_adviser_types,
        )?;
        engine.notify(&event.id, ResponseData::Advise(advice))
    }
}
