//! Interrupt Service
//!
//! Operator and timer requests that change a running plan execution.
//! Every interrupt is persisted first, then applied by its handler. Abort
//! and pause records additionally stay in force for the pre-facilitation
//! and pre-invocation checkpoints (see [`checks`]).
//!
//! Timeouts register their interrupts through this same service, so a
//! fired timer and an operator's request follow one enforcement path.

pub mod checks;
pub mod handlers;

use log::{info, warn};

use crate::error::{EngineError, InterruptError, Result};
use crate::model::{Interrupt, InterruptHandle, InterruptSpec, InterruptState};
use crate::orchestration::OrchestrationEngine;
use crate::store::with_retries;

pub struct InterruptService {
    engine: OrchestrationEngine,
}

impl InterruptService {
    pub fn new(engine: OrchestrationEngine) -> Self {
        Self { engine }
    }

    /// Persists and applies an interrupt.
    ///
    /// An interrupt that cannot be applied is kept as `Discarded` and the
    /// reason is returned as the error.
    pub fn register_interrupt(&self, spec: InterruptSpec) -> Result<InterruptHandle> {
        let plan_execution = self.engine.store().plan_execution(&spec.plan_execution_id)?;
        if plan_execution.is_finished() {
            return Err(InterruptError::PlanFinished(spec.plan_execution_id).into());
        }
        if spec.interrupt_type.requires_node() && spec.node_execution_id.is_none() {
            return Err(InterruptError::NodeRequired(spec.interrupt_type.to_string()).into());
        }

        let interrupt = Interrupt::new(&spec);
        let retry = &self.engine.config().transaction_retry;
        with_retries(retry, "interrupt insert", || {
            self.engine.store().insert_interrupt(interrupt.clone())
        })?;
        info!(
            "Registered {} interrupt {} on plan execution {}{}",
            interrupt.interrupt_type,
            interrupt.uuid,
            interrupt.plan_execution_id,
            interrupt
                .node_execution_id
                .as_deref()
                .map(|id| format!(" (node execution {})", id))
                .unwrap_or_default()
        );

        match handlers::handle(&self.engine, &interrupt) {
            Ok(state) => {
                self.move_to(&interrupt, state)?;
                Ok(InterruptHandle {
                    interrupt_id: interrupt.uuid,
                    state,
                })
            }
            Err(e) => {
                warn!("Interrupt {} discarded: {}", interrupt.uuid, e);
                self.move_to(&interrupt, InterruptState::Discarded)?;
                Err(e)
            }
        }
    }

    fn move_to(&self, interrupt: &Interrupt, state: InterruptState) -> Result<()> {
        if state == InterruptState::Registered {
            return Ok(());
        }
        let moved = self.engine.store().update_interrupt_state(
            &interrupt.uuid,
            &[InterruptState::Registered],
            state,
        )?;
        if !moved {
            return Err(EngineError::step(
                interrupt.interrupt_type.to_string(),
                format!("interrupt {} changed state concurrently", interrupt.uuid),
            ));
        }
        Ok(())
    }
}
