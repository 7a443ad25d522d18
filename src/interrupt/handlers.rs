//! Interrupt Handlers
//!
//! One handler per [`InterruptType`]. Each returns the state the
//! interrupt record should move to, or an error when the interrupt does
//! not apply to its target.

use chrono::Utc;
use log::{debug, info};

use super::checks::blocking_interrupt;
use crate::error::{InterruptError, Result};
use crate::model::{
    FailureInfo, FailureType, Interrupt, InterruptState, InterruptType, NodeExecution, Status,
};
use crate::orchestration::OrchestrationEngine;

pub fn handle(engine: &OrchestrationEngine, interrupt: &Interrupt) -> Result<InterruptState> {
    match interrupt.interrupt_type {
        InterruptType::Abort => abort(engine, interrupt),
        InterruptType::Pause => pause(engine, interrupt),
        InterruptType::Resume => resume(engine, interrupt),
        InterruptType::Retry => retry(engine, interrupt),
        InterruptType::MarkSuccess => resolve_waiting(engine, interrupt, Status::Succeeded),
        InterruptType::Ignore => resolve_waiting(engine, interrupt, Status::IgnoreFailed),
        InterruptType::MarkFailed => mark(engine, interrupt, Status::Failed, FailureType::Interrupted),
        InterruptType::MarkExpired => mark(engine, interrupt, Status::Expired, FailureType::Timeout),
    }
}

/// Forces an active node to ABORTED, skipping its advisers, and ends its
/// transition.
pub(crate) fn abort_node(
    engine: &OrchestrationEngine,
    node_execution_id: &str,
    failure_info: FailureInfo,
) -> Result<Option<NodeExecution>> {
    let now = Utc::now();
    let Some(aborted) = engine.update_node(node_execution_id, Status::ACTIVE, |ne| {
        ne.status = Status::Aborted;
        ne.end_ts = Some(now);
        ne.failure_info = Some(failure_info.clone());
    })?
    else {
        return Ok(None);
    };

    info!("Node '{}' aborted", aborted.identifier);
    engine.discontinue_work(&aborted)?;
    engine.restore_plan_running(aborted.plan_execution_id())?;
    engine.end_transition(&aborted)?;
    Ok(Some(aborted))
}

fn target<'a>(interrupt: &'a Interrupt) -> Result<&'a str> {
    interrupt
        .node_execution_id
        .as_deref()
        .ok_or_else(|| InterruptError::NodeRequired(interrupt.interrupt_type.to_string()).into())
}

fn not_applicable(interrupt: &Interrupt, ne: &NodeExecution) -> InterruptError {
    InterruptError::NotApplicable {
        interrupt: interrupt.interrupt_type.to_string(),
        node_execution_id: ne.uuid.clone(),
        status: ne.status.to_string(),
    }
}

fn interrupted(interrupt: &Interrupt, failure_type: FailureType) -> FailureInfo {
    FailureInfo::new(
        format!("{} by interrupt {}", interrupt.interrupt_type, interrupt.uuid),
        failure_type,
    )
}

fn abort(engine: &OrchestrationEngine, interrupt: &Interrupt) -> Result<InterruptState> {
    let failure = interrupted(interrupt, FailureType::Interrupted);
    match &interrupt.node_execution_id {
        None => {
            let ended = engine.force_end_plan(
                &interrupt.plan_execution_id,
                Status::Aborted,
                Status::Aborted,
                Some(failure),
            )?;
            if ended.is_none() {
                return Err(InterruptError::PlanFinished(interrupt.plan_execution_id.clone()).into());
            }
            Ok(InterruptState::Processed)
        }
        Some(node_execution_id) => {
            let current = engine.store().node_execution(node_execution_id)?;
            match abort_node(engine, node_execution_id, failure)? {
                Some(_) => Ok(InterruptState::Processed),
                None => Err(not_applicable(interrupt, &current).into()),
            }
        }
    }
}

fn pause(engine: &OrchestrationEngine, interrupt: &Interrupt) -> Result<InterruptState> {
    let already_paused = engine
        .store()
        .interrupts(&interrupt.plan_execution_id)?
        .iter()
        .any(|i| {
            i.uuid != interrupt.uuid
                && i.is_active()
                && i.interrupt_type == InterruptType::Pause
                && i.node_execution_id == interrupt.node_execution_id
        });
    if already_paused {
        return Err(InterruptError::AlreadyPaused(interrupt.plan_execution_id.clone()).into());
    }

    match &interrupt.node_execution_id {
        None => {
            engine.update_plan(&interrupt.plan_execution_id, &[Status::Running], |pe| {
                pe.status = Status::Paused;
            })?;
            info!("Plan execution {} paused", interrupt.plan_execution_id);
        }
        Some(node_execution_id) => {
            let current = engine.store().node_execution(node_execution_id)?;
            if current.status.is_terminal() {
                return Err(not_applicable(interrupt, &current).into());
            }
            info!("Node '{}' and its descendants paused", current.identifier);
        }
    }
    // Stays in force until a RESUME processes it.
    Ok(InterruptState::Processing)
}

fn resume(engine: &OrchestrationEngine, interrupt: &Interrupt) -> Result<InterruptState> {
    if let Some(node_execution_id) = &interrupt.node_execution_id {
        let current = engine.store().node_execution(node_execution_id)?;
        if current.status == Status::InterventionWaiting {
            let status = current.pending_status.unwrap_or(Status::Failed);
            engine.resolve_intervention(node_execution_id, status)?;
            return Ok(InterruptState::Processed);
        }
    }

    let store = engine.store();
    let pauses: Vec<Interrupt> = store
        .interrupts(&interrupt.plan_execution_id)?
        .into_iter()
        .filter(|i| i.is_active() && i.interrupt_type == InterruptType::Pause)
        .filter(|i| {
            interrupt.node_execution_id.is_none() || i.node_execution_id == interrupt.node_execution_id
        })
        .collect();
    if pauses.is_empty() {
        return Err(InterruptError::NothingToResume(interrupt.plan_execution_id.clone()).into());
    }
    for pause in &pauses {
        store.update_interrupt_state(
            &pause.uuid,
            &[InterruptState::Registered, InterruptState::Processing],
            InterruptState::Processed,
        )?;
    }

    let plan_paused = store
        .interrupts(&interrupt.plan_execution_id)?
        .iter()
        .any(|i| i.is_active() && i.interrupt_type == InterruptType::Pause && i.node_execution_id.is_none());
    if !plan_paused {
        engine.update_plan(&interrupt.plan_execution_id, &[Status::Paused], |pe| {
            pe.status = Status::Running;
        })?;
    }

    restart_paused_nodes(engine, &interrupt.plan_execution_id)?;
    info!("Plan execution {} resumed", interrupt.plan_execution_id);
    Ok(InterruptState::Processed)
}

/// Re-dispatches paused nodes no longer covered by a pause.
fn restart_paused_nodes(engine: &OrchestrationEngine, plan_execution_id: &str) -> Result<()> {
    for ne in engine.store().node_executions(plan_execution_id)? {
        if ne.status != Status::Paused || blocking_interrupt(engine, &ne)?.is_some() {
            continue;
        }
        match ne.mode {
            None => {
                let queued = engine.update_node(&ne.uuid, &[Status::Paused], |n| {
                    n.status = Status::Queued;
                })?;
                if queued.is_some() {
                    engine.dispatch_node(&ne.uuid)?;
                }
            }
            Some(_) => {
                let id = ne.uuid.clone();
                engine.submit(&ne.uuid, move |engine| engine.invoke_executable(&id))?;
            }
        }
        debug!("Restarted paused node '{}'", ne.identifier);
    }
    Ok(())
}

fn waiting_node(engine: &OrchestrationEngine, interrupt: &Interrupt) -> Result<NodeExecution> {
    let node_execution = engine.store().node_execution(target(interrupt)?)?;
    if node_execution.status != Status::InterventionWaiting {
        return Err(not_applicable(interrupt, &node_execution).into());
    }
    Ok(node_execution)
}

fn retry(engine: &OrchestrationEngine, interrupt: &Interrupt) -> Result<InterruptState> {
    let node_execution = waiting_node(engine, interrupt)?;
    engine.retry_node(&node_execution.uuid)?;
    Ok(InterruptState::Processed)
}

fn resolve_waiting(
    engine: &OrchestrationEngine,
    interrupt: &Interrupt,
    status: Status,
) -> Result<InterruptState> {
    let node_execution = waiting_node(engine, interrupt)?;
    match engine.resolve_intervention(&node_execution.uuid, status)? {
        Some(_) => Ok(InterruptState::Processed),
        None => Err(not_applicable(interrupt, &node_execution).into()),
    }
}

fn mark(
    engine: &OrchestrationEngine,
    interrupt: &Interrupt,
    status: Status,
    failure_type: FailureType,
) -> Result<InterruptState> {
    let node_execution = engine.store().node_execution(target(interrupt)?)?;

    let applied = if node_execution.status == Status::InterventionWaiting {
        engine.resolve_intervention(&node_execution.uuid, status)?
    } else {
        engine.conclude_node_execution(
            &node_execution.uuid,
            status,
            Status::CONCLUDABLE,
            Some(interrupted(interrupt, failure_type)),
        )?
    };
    match applied {
        Some(_) => Ok(InterruptState::Processed),
        None => Err(not_applicable(interrupt, &node_execution).into()),
    }
}
