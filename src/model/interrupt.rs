//! Interrupt Records
//!
//! Operator or system requests that alter a running plan execution.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::NodeExecution;
use super::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    Abort,
    Pause,
    Resume,
    Retry,
    MarkFailed,
    MarkExpired,
    MarkSuccess,
    Ignore,
}

impl InterruptType {
    /// Interrupts that only make sense against a single node execution.
    pub fn requires_node(self) -> bool {
        matches!(
            self,
            InterruptType::Retry
                | InterruptType::MarkFailed
                | InterruptType::MarkExpired
                | InterruptType::MarkSuccess
                | InterruptType::Ignore
        )
    }
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterruptType::Abort => "ABORT",
            InterruptType::Pause => "PAUSE",
            InterruptType::Resume => "RESUME",
            InterruptType::Retry => "RETRY",
            InterruptType::MarkFailed => "MARK_FAILED",
            InterruptType::MarkExpired => "MARK_EXPIRED",
            InterruptType::MarkSuccess => "MARK_SUCCESS",
            InterruptType::Ignore => "IGNORE",
        };
        f.write_str(name)
    }
}

/// Processing state of an interrupt.
///
/// `Registered -> Processing -> Processed`, or `Discarded` when the
/// interrupt could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    Registered,
    Processing,
    Processed,
    Discarded,
}

/// Who raised the interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterruptOrigin {
    Manual { user: String },
    Timeout { instance_id: String },
}

impl Default for InterruptOrigin {
    fn default() -> Self {
        InterruptOrigin::Manual {
            user: "system".to_string(),
        }
    }
}

/// Request to register an interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptSpec {
    pub plan_execution_id: String,
    pub node_execution_id: Option<String>,
    pub interrupt_type: InterruptType,
    #[serde(default)]
    pub origin: InterruptOrigin,
}

impl InterruptSpec {
    pub fn plan(plan_execution_id: impl Into<String>, interrupt_type: InterruptType) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            node_execution_id: None,
            interrupt_type,
            origin: InterruptOrigin::default(),
        }
    }

    pub fn node(
        plan_execution_id: impl Into<String>,
        node_execution_id: impl Into<String>,
        interrupt_type: InterruptType,
    ) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            node_execution_id: Some(node_execution_id.into()),
            interrupt_type,
            origin: InterruptOrigin::default(),
        }
    }

    pub fn with_origin(mut self, origin: InterruptOrigin) -> Self {
        self.origin = origin;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub uuid: String,
    pub interrupt_type: InterruptType,
    pub plan_execution_id: String,
    pub node_execution_id: Option<String>,
    pub state: InterruptState,
    pub origin: InterruptOrigin,
    pub created_at: DateTime<Utc>,
}

impl Interrupt {
    pub fn new(spec: &InterruptSpec) -> Self {
        Self {
            uuid: new_id(),
            interrupt_type: spec.interrupt_type,
            plan_execution_id: spec.plan_execution_id.clone(),
            node_execution_id: spec.node_execution_id.clone(),
            state: InterruptState::Registered,
            origin: spec.origin.clone(),
            created_at: Utc::now(),
        }
    }

    /// Still in force for checkpoints.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            InterruptState::Registered | InterruptState::Processing
        )
    }

    /// Plan-wide interrupts apply to every node; node interrupts apply to
    /// the node and everything beneath it.
    pub fn applies_to(&self, node_execution: &NodeExecution) -> bool {
        if self.plan_execution_id != node_execution.ambiance.plan_execution_id {
            return false;
        }
        match &self.node_execution_id {
            None => true,
            Some(id) => node_execution.ambiance.descends_from(id),
        }
    }
}

/// Returned to callers of interrupt registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptHandle {
    pub interrupt_id: String,
    pub state: InterruptState,
}
