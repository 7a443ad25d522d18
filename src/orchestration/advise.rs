//! Adviser Response Handling
//!
//! Applies the adviser chain's decision to a node held in ADVISING. Each
//! [`AdviserResponse`] variant maps to one transition; all of them start
//! from a guarded update out of ADVISING so a decision is applied once.

use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use super::engine::OrchestrationEngine;
use crate::error::{EngineError, Result};
use crate::model::{
    new_id, AdviserResponse, InterruptType, NodeExecution, ResponseData, Status, TimeoutInstance,
    TimeoutPurpose,
};
use crate::waitnotify::NotifyCallback;

/// Adviser types left out when a node is re-advised after an intervention.
const INTERVENTION_SKIP: &[&str] = &["MANUAL_INTERVENTION", "RETRY"];

const RETRYABLE: &[Status] = &[Status::Advising, Status::InterventionWaiting];

impl OrchestrationEngine {
    pub fn handle_advise(&self, node_execution_id: &str, advice: AdviserResponse) -> Result<()> {
        let node_execution = self.store().node_execution(node_execution_id)?;
        if node_execution.status != Status::Advising {
            debug!(
                "Node '{}' is {}, advice {} dropped",
                node_execution.identifier,
                node_execution.status,
                advice.kind()
            );
            return Ok(());
        }
        let to_status = node_execution.pending_status.ok_or_else(|| {
            EngineError::step(&node_execution.identifier, "advising without a pending status")
        })?;
        info!("Node '{}' advised {}", node_execution.identifier, advice.kind());

        match advice.clone() {
            AdviserResponse::Unknown => {
                if let Some(concluded) = self.conclude_advised(node_execution_id, to_status, None)? {
                    self.end_transition(&concluded)?;
                }
                Ok(())
            }
            AdviserResponse::NextStep {
                next_node_id,
                to_status: status_override,
            } => {
                let status = status_override.unwrap_or(to_status);
                let Some(concluded) = self.conclude_advised(node_execution_id, status, Some(advice))?
                else {
                    return Ok(());
                };
                self.trigger_next(&concluded, &next_node_id)
            }
            AdviserResponse::Retry { wait_interval_ms } => {
                self.schedule_retry(&node_execution, wait_interval_ms)
            }
            AdviserResponse::InterventionWait {
                timeout_ms,
                timeout_action,
            } => self.start_intervention(&node_execution, timeout_ms, timeout_action, advice),
            AdviserResponse::MarkSuccess {
                to_status: status,
                next_node_id,
            } => {
                let Some(concluded) = self.conclude_advised(node_execution_id, status, Some(advice))?
                else {
                    return Ok(());
                };
                match next_node_id {
                    Some(next) => self.trigger_next(&concluded, &next),
                    None => self.end_transition(&concluded),
                }
            }
            AdviserResponse::EndPlan { status } => {
                let Some(concluded) = self.conclude_advised(node_execution_id, to_status, Some(advice))?
                else {
                    return Ok(());
                };
                warn!(
                    "Node '{}' ends plan execution {} as {}",
                    concluded.identifier,
                    concluded.plan_execution_id(),
                    status
                );
                self.force_end_plan(
                    concluded.plan_execution_id(),
                    status,
                    Status::Aborted,
                    concluded.failure_info.clone(),
                )?;
                Ok(())
            }
        }
    }

    /// Moves an advised node to its final status.
    fn conclude_advised(
        &self,
        node_execution_id: &str,
        status: Status,
        advice: Option<AdviserResponse>,
    ) -> Result<Option<NodeExecution>> {
        let now = Utc::now();
        self.update_node(node_execution_id, &[Status::Advising], |ne| {
            ne.status = status;
            ne.end_ts = Some(now);
            ne.adviser_response = advice.clone();
            if status == Status::Succeeded {
                ne.failure_info = None;
            }
        })
    }

    fn trigger_next(&self, concluded: &NodeExecution, next_node_id: &str) -> Result<()> {
        let plan = self.plan_for(concluded)?;
        let next = plan
            .node(next_node_id)
            .ok_or_else(|| EngineError::NodeNotFound(next_node_id.to_string()))?;
        self.trigger_execution(&concluded.ambiance, next)?;
        Ok(())
    }

    fn schedule_retry(&self, ne: &NodeExecution, wait_interval_ms: u64) -> Result<()> {
        if wait_interval_ms == 0 {
            return self.retry_node(&ne.uuid);
        }

        let correlation_id = new_id();
        self.wait_for_all(
            vec![correlation_id.clone()],
            NotifyCallback::RetryWake {
                node_execution_id: ne.uuid.clone(),
            },
        )?;
        let engine = self.clone();
        self.pool().schedule_after(Duration::from_millis(wait_interval_ms), move || {
            if let Err(e) = engine.notify(&correlation_id, ResponseData::Wake) {
                warn!("Failed to end retry wait {}: {}", correlation_id, e);
            }
        })?;
        info!("Retrying node '{}' in {} ms", ne.identifier, wait_interval_ms);
        Ok(())
    }

    /// Closes the current attempt and starts a fresh one linked to it.
    pub(crate) fn retry_node(&self, node_execution_id: &str) -> Result<()> {
        let retry_id = new_id();
        let now = Utc::now();
        let Some(old) = self.update_node(node_execution_id, RETRYABLE, |ne| {
            ne.status = ne.pending_status.unwrap_or(Status::Failed);
            ne.old_retry = true;
            ne.next_id = Some(retry_id.clone());
            ne.end_ts = Some(now);
        })?
        else {
            debug!("Node execution {} no longer retryable", node_execution_id);
            return Ok(());
        };
        self.timeouts().cancel(&old.timeout_instance_ids)?;

        let plan_node = self.plan_node(&old)?;
        let mut retry = NodeExecution::successor_of(&old, retry_id, &plan_node);
        retry.retry_ids = old.retry_ids.clone();
        retry.retry_ids.push(old.uuid.clone());
        info!(
            "Retrying node '{}' (attempt {})",
            old.identifier,
            retry.retry_ids.len() + 1
        );

        let retry = self.create_node(retry)?;
        self.restore_plan_running(old.plan_execution_id())?;
        self.dispatch_node(&retry.uuid)
    }

    fn start_intervention(
        &self,
        ne: &NodeExecution,
        timeout_ms: u64,
        timeout_action: InterruptType,
        advice: AdviserResponse,
    ) -> Result<()> {
        let Some(waiting) = self.update_node(&ne.uuid, &[Status::Advising], |n| {
            n.status = Status::InterventionWaiting;
            n.adviser_response = Some(advice.clone());
        })?
        else {
            return Ok(());
        };
        self.update_plan(waiting.plan_execution_id(), &[Status::Running], |pe| {
            pe.status = Status::InterventionWaiting;
        })?;

        if timeout_ms > 0 {
            let instance = TimeoutInstance::new(
                &waiting,
                timeout_ms,
                TimeoutPurpose::Intervention {
                    action: timeout_action,
                },
            );
            let timeout_id = self.arm_timeout(instance)?;
            self.update_node(&waiting.uuid, Status::ALL, |n| {
                n.timeout_instance_ids.push(timeout_id.clone());
            })?;
        }
        warn!(
            "Node '{}' waiting for manual intervention (timeout {} ms, then {})",
            waiting.identifier, timeout_ms, timeout_action
        );
        Ok(())
    }

    /// Takes a node out of INTERVENTION_WAITING and runs its remaining
    /// advisers against `to_status`.
    pub(crate) fn resolve_intervention(
        &self,
        node_execution_id: &str,
        to_status: Status,
    ) -> Result<Option<NodeExecution>> {
        let Some(ne) = self.update_node(node_execution_id, &[Status::InterventionWaiting], |n| {
            n.status = Status::Advising;
            n.pending_status = Some(to_status);
            if to_status == Status::Succeeded {
                n.failure_info = None;
            }
        })?
        else {
            return Ok(None);
        };

        self.timeouts().cancel(&ne.timeout_instance_ids)?;
        self.restore_plan_running(ne.plan_execution_id())?;
        info!("Intervention on '{}' resolved as {}", ne.identifier, to_status);
        self.queue_advise(
            &ne,
            to_status,
            ne.failure_info.clone(),
            INTERVENTION_SKIP.iter().map(|s| s.to_string()).collect(),
        )?;
        Ok(Some(ne))
    }

    /// Puts the plan back to RUNNING once no node waits for an operator.
    pub(crate) fn restore_plan_running(&self, plan_execution_id: &str) -> Result<()> {
        let still_waiting = self
            .store()
            .node_executions(plan_execution_id)?
            .iter()
            .any(|n| n.status == Status::InterventionWaiting);
        if !still_waiting {
            self.update_plan(plan_execution_id, &[Status::InterventionWaiting], |pe| {
                pe.status = Status::Running;
            })?;
        }
        Ok(())
    }
}
