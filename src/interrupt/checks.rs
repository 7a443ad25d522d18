//! Execution Checkpoints
//!
//! A chain of checkers run before facilitation and again right before
//! invocation. The first checker that stops the node wins; it has already
//! moved the node (paused, aborted or skipped) when it reports.

use log::{debug, info};

use super::handlers::abort_node;
use crate::error::Result;
use crate::model::{FailureInfo, FailureType, Interrupt, InterruptType, NodeExecution, Status, StepResponse};
use crate::orchestration::OrchestrationEngine;

/// Statuses a checkpoint may park a node from.
const PAUSABLE: &[Status] = &[Status::Queued, Status::TimedWaiting, Status::Paused];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCheck {
    pub proceed: bool,
    pub reason: String,
}

impl ExecutionCheck {
    pub fn proceed() -> Self {
        Self {
            proceed: true,
            reason: String::new(),
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            proceed: false,
            reason: reason.into(),
        }
    }
}

trait Checker {
    fn check(&self, engine: &OrchestrationEngine, ne: &NodeExecution) -> Result<ExecutionCheck>;
}

/// Stops nodes covered by an active abort or pause.
struct InterruptChecker;

impl Checker for InterruptChecker {
    fn check(&self, engine: &OrchestrationEngine, ne: &NodeExecution) -> Result<ExecutionCheck> {
        let Some(interrupt) = blocking_interrupt(engine, ne)? else {
            return Ok(ExecutionCheck::proceed());
        };

        match interrupt.interrupt_type {
            InterruptType::Abort => {
                abort_node(
                    engine,
                    &ne.uuid,
                    FailureInfo::new(
                        format!("Aborted by interrupt {}", interrupt.uuid),
                        FailureType::Interrupted,
                    ),
                )?;
                Ok(ExecutionCheck::stop(format!("aborted by interrupt {}", interrupt.uuid)))
            }
            _ => {
                engine.update_node(&ne.uuid, PAUSABLE, |n| {
                    n.status = Status::Paused;
                })?;
                Ok(ExecutionCheck::stop(format!("paused by interrupt {}", interrupt.uuid)))
            }
        }
    }
}

/// Skips the node when its `when_condition` evaluates false.
struct RunChecker;

impl Checker for RunChecker {
    fn check(&self, engine: &OrchestrationEngine, ne: &NodeExecution) -> Result<ExecutionCheck> {
        let plan_node = engine.plan_node(ne)?;
        let Some(condition) = &plan_node.when_condition else {
            return Ok(ExecutionCheck::proceed());
        };
        if engine.resolver().evaluate_condition(&ne.ambiance, condition)? {
            return Ok(ExecutionCheck::proceed());
        }
        info!("Node '{}' skipped: when condition '{}' is false", ne.identifier, condition);
        engine.handle_step_response(&ne.uuid, StepResponse::skipped())?;
        Ok(ExecutionCheck::stop("when condition is false"))
    }
}

/// Skips the node when its `skip_condition` evaluates true.
struct SkipChecker;

impl Checker for SkipChecker {
    fn check(&self, engine: &OrchestrationEngine, ne: &NodeExecution) -> Result<ExecutionCheck> {
        let plan_node = engine.plan_node(ne)?;
        let Some(condition) = &plan_node.skip_condition else {
            return Ok(ExecutionCheck::proceed());
        };
        if !engine.resolver().evaluate_condition(&ne.ambiance, condition)? {
            return Ok(ExecutionCheck::proceed());
        }
        info!("Node '{}' skipped: skip condition '{}' holds", ne.identifier, condition);
        engine.handle_step_response(&ne.uuid, StepResponse::skipped())?;
        Ok(ExecutionCheck::stop("skip condition holds"))
    }
}

fn run_chain(
    engine: &OrchestrationEngine,
    ne: &NodeExecution,
    chain: &[&dyn Checker],
) -> Result<ExecutionCheck> {
    for checker in chain {
        let check = checker.check(engine, ne)?;
        if !check.proceed {
            return Ok(check);
        }
    }
    Ok(ExecutionCheck::proceed())
}

pub fn run_pre_facilitation(engine: &OrchestrationEngine, ne: &NodeExecution) -> Result<ExecutionCheck> {
    run_chain(engine, ne, &[&InterruptChecker, &RunChecker, &SkipChecker])
}

pub fn run_pre_invocation(engine: &OrchestrationEngine, ne: &NodeExecution) -> Result<ExecutionCheck> {
    run_chain(engine, ne, &[&InterruptChecker])
}

/// The active abort or pause covering `ne`, aborts first.
pub fn blocking_interrupt(engine: &OrchestrationEngine, ne: &NodeExecution) -> Result<Option<Interrupt>> {
    let interrupts: Vec<Interrupt> = engine
        .store()
        .interrupts(ne.plan_execution_id())?
        .into_iter()
        .filter(|i| i.is_active() && i.applies_to(ne))
        .collect();

    let blocking = interrupts
        .iter()
        .find(|i| i.interrupt_type == InterruptType::Abort)
        .or_else(|| interrupts.iter().find(|i| i.interrupt_type == InterruptType::Pause))
        .cloned();
    if let Some(interrupt) = &blocking {
        debug!(
            "Node '{}' blocked by {} interrupt {}",
            ne.identifier, interrupt.interrupt_type, interrupt.uuid
        );
    }
    Ok(blocking)
}
