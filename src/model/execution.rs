//! Execution Records
//!
//! Durable records for plan executions, node executions and timeout
//! trackers. Records are only changed through guarded store updates.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ambiance::{Ambiance, ExecutionMetadata, Level};
use super::interrupt::InterruptType;
use super::new_id;
use super::plan::{Plan, PlanNode};
use super::response::{
    AdviserResponse, ExecutionMode, FacilitatorResponse, FailureInfo, StepNotification,
    UnitProgress,
};
use super::status::Status;

/// One run of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    pub uuid: String,
    pub plan: Plan,
    pub status: Status,
    pub setup_abstractions: BTreeMap<String, String>,
    pub metadata: ExecutionMetadata,
    pub failure_info: Option<FailureInfo>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
}

impl PlanExecution {
    pub fn new(
        plan: Plan,
        setup_abstractions: BTreeMap<String, String>,
        metadata: ExecutionMetadata,
    ) -> Self {
        Self {
            uuid: new_id(),
            plan,
            status: Status::Running,
            setup_abstractions,
            metadata,
            failure_info: None,
            start_ts: Utc::now(),
            end_ts: None,
        }
    }

    /// Root ambiance with no levels.
    pub fn ambiance(&self) -> Ambiance {
        Ambiance::new(
            self.uuid.clone(),
            self.setup_abstractions.clone(),
            self.metadata.clone(),
        )
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One attempt at running one plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub uuid: String,
    pub node_id: String,
    pub identifier: String,
    pub ambiance: Ambiance,
    pub status: Status,
    pub mode: Option<ExecutionMode>,
    pub facilitator_response: Option<FacilitatorResponse>,

    /// Parent node execution for children
    pub parent_id: Option<String>,
    /// Correlation id completed when this node finishes
    pub notify_id: Option<String>,
    pub previous_id: Option<String>,
    pub next_id: Option<String>,
    /// Earlier attempts of the same node, oldest first
    pub retry_ids: Vec<String>,
    /// Superseded by a retry; excluded from plan aggregation
    pub old_retry: bool,

    pub resolved_step_parameters: Option<Value>,
    /// Status reported by the step while advisers decide
    pub pending_status: Option<Status>,
    pub outcome_refs: Vec<String>,
    pub failure_info: Option<FailureInfo>,
    pub adviser_response: Option<AdviserResponse>,
    pub timeout_instance_ids: Vec<String>,
    pub unit_progresses: Vec<UnitProgress>,

    /// Correlation ids an async or fan-out node waits on
    pub callback_ids: Vec<String>,
    pub task_id: Option<String>,
    /// Children created but held back by `max_concurrency`
    pub pending_children: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
}

impl NodeExecution {
    /// Creates a queued record; `ambiance` must already carry this node's level.
    pub fn new(uuid: impl Into<String>, node: &PlanNode, ambiance: Ambiance) -> Self {
        Self {
            uuid: uuid.into(),
            node_id: node.uuid.clone(),
            identifier: node.identifier.clone(),
            ambiance,
            status: Status::Queued,
            mode: None,
            facilitator_response: None,
            parent_id: None,
            notify_id: None,
            previous_id: None,
            next_id: None,
            retry_ids: Vec::new(),
            old_retry: false,
            resolved_step_parameters: None,
            pending_status: None,
            outcome_refs: Vec::new(),
            failure_info: None,
            adviser_response: None,
            timeout_instance_ids: Vec::new(),
            unit_progresses: Vec::new(),
            callback_ids: Vec::new(),
            task_id: None,
            pending_children: Vec::new(),
            created_at: Utc::now(),
            start_ts: None,
            end_ts: None,
        }
    }

    /// Creates a child record one level below `parent`.
    pub fn child_of(
        parent: &NodeExecution,
        uuid: impl Into<String>,
        node: &PlanNode,
        notify_id: impl Into<String>,
    ) -> Self {
        let uuid = uuid.into();
        let ambiance = parent.ambiance.with_level(Level::for_node(&uuid, node));
        let mut child = Self::new(uuid, node, ambiance);
        child.parent_id = Some(parent.uuid.clone());
        child.notify_id = Some(notify_id.into());
        child
    }

    /// Creates the record that follows `previous` at the same depth.
    ///
    /// The successor inherits the parent and notify ids so the parent keeps
    /// waiting on the same correlation.
    pub fn successor_of(previous: &NodeExecution, uuid: impl Into<String>, node: &PlanNode) -> Self {
        let uuid = uuid.into();
        let ambiance = previous
            .ambiance
            .with_sibling_level(Level::for_node(&uuid, node));
        let mut next = Self::new(uuid, node, ambiance);
        next.parent_id = previous.parent_id.clone();
        next.notify_id = previous.notify_id.clone();
        next.previous_id = Some(previous.uuid.clone());
        next
    }

    pub fn plan_execution_id(&self) -> &str {
        &self.ambiance.plan_execution_id
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn notification(&self) -> StepNotification {
        StepNotification {
            node_execution_id: self.uuid.clone(),
            identifier: self.identifier.clone(),
            status: self.status,
            failure_info: self.failure_info.clone(),
            outcome_refs: self.outcome_refs.clone(),
            adviser_response: self.adviser_response.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutState {
    Active,
    Cancelled,
    Fired,
}

/// What a timeout does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPurpose {
    /// Node ran too long; it is marked expired
    Node,
    /// Nobody answered a manual intervention; the interrupt is applied
    Intervention { action: InterruptType },
}

impl TimeoutPurpose {
    pub fn interrupt_type(self) -> InterruptType {
        match self {
            TimeoutPurpose::Node => InterruptType::MarkExpired,
            TimeoutPurpose::Intervention { action } => action,
        }
    }
}

/// A durable timer bound to one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutInstance {
    pub uuid: String,
    pub plan_execution_id: String,
    pub node_execution_id: String,
    pub timeout_ms: u64,
    pub expires_at: DateTime<Utc>,
    pub state: TimeoutState,
    pub purpose: TimeoutPurpose,
}

impl TimeoutInstance {
    pub fn new(node_execution: &NodeExecution, timeout_ms: u64, purpose: TimeoutPurpose) -> Self {
        let millis = i64::try_from(timeout_ms).unwrap_or(i64::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ChronoDuration::milliseconds(millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            uuid: new_id(),
            plan_execution_id: node_execution.plan_execution_id().to_string(),
            node_execution_id: node_execution.uuid.clone(),
            timeout_ms,
            expires_at,
            state: TimeoutState::Active,
            purpose,
        }
    }

    /// Time left before expiry, zero when already past.
    pub fn remaining(&self) -> std::time::Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_node() -> NodeExecution {
        let plan = Plan::new("a").with_node(PlanNode::new("a", "NOOP"));
        let execution = PlanExecution::new(plan, BTreeMap::new(), ExecutionMetadata::default());
        let node = PlanNode::new("a", "NOOP");
        let ambiance = execution.ambiance().with_level(Level::for_node("ne-1", &node));
        NodeExecution::new("ne-1", &node, ambiance)
    }

    #[test]
    fn test_child_of_links_parent() {
        let parent = root_node();
        let child = NodeExecution::child_of(&parent, "ne-2", &PlanNode::new("b", "NOOP"), "n-1");

        assert_eq!(child.parent_id.as_deref(), Some("ne-1"));
        assert_eq!(child.notify_id.as_deref(), Some("n-1"));
        assert_eq!(child.ambiance.depth(), 2);
        assert!(child.ambiance.descends_from("ne-1"));
        assert_eq!(child.status, Status::Queued);
    }

    #[test]
    fn test_successor_inherits_notify() {
        let parent = root_node();
        let child = NodeExecution::child_of(&parent, "ne-2", &PlanNode::new("b", "NOOP"), "n-1");
        let next = NodeExecution::successor_of(&child, "ne-3", &PlanNode::new("c", "NOOP"));

        assert_eq!(next.previous_id.as_deref(), Some("ne-2"));
        assert_eq!(next.notify_id.as_deref(), Some("n-1"));
        assert_eq!(next.parent_id.as_deref(), Some("ne-1"));
        assert_eq!(next.ambiance.depth(), 2);
        assert_eq!(next.ambiance.node_execution_id(), Some("ne-3"));
    }

    #[test]
    fn test_timeout_instance_expiry() {
        let node = root_node();
        let instance = TimeoutInstance::new(&node, 60_000, TimeoutPurpose::Node);
        assert_eq!(instance.state, TimeoutState::Active);
        assert!(instance.remaining() > std::time::Duration::from_secs(50));
        assert_eq!(instance.purpose.interrupt_type(), InterruptType::MarkExpired);
    }
}
