//! Step, Facilitator and Adviser Responses
//!
//! Values exchanged between steps, facilitators, advisers and the engine,
//! and the payloads delivered through wait-notify.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::interrupt::InterruptType;
use super::status::Status;
use crate::error::EngineError;

/// How a node's executable runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Sync,
    Async,
    Children,
    Child,
    Task,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Sync => "SYNC",
            ExecutionMode::Async => "ASYNC",
            ExecutionMode::Children => "CHILDREN",
            ExecutionMode::Child => "CHILD",
            ExecutionMode::Task => "TASK",
        };
        f.write_str(name)
    }
}

/// Category of a failure, used by advisers to decide whether they apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    #[default]
    Application,
    Expression,
    Timeout,
    TaskDelegation,
    Interrupted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    pub failure_types: Vec<FailureType>,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>, failure_type: FailureType) -> Self {
        Self {
            message: message.into(),
            failure_types: vec![failure_type],
        }
    }

    /// Returns true when the failure carries any of the given types.
    ///
    /// An empty filter matches every failure.
    pub fn matches_any(&self, types: &[FailureType]) -> bool {
        types.is_empty() || self.failure_types.iter().any(|t| types.contains(t))
    }
}

impl From<&EngineError> for FailureInfo {
    fn from(error: &EngineError) -> Self {
        let failure_type = match error {
            EngineError::Expression(_) => FailureType::Expression,
            EngineError::Task(_) => FailureType::TaskDelegation,
            EngineError::Interrupt(_) => FailureType::Interrupted,
            _ => FailureType::Application,
        };
        FailureInfo::new(error.to_string(), failure_type)
    }
}

/// Progress of a sub-unit reported by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitProgress {
    pub unit_name: String,
    pub status: Status,
}

/// Result of running a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Status,
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
    /// Named values published as `${outcome.<identifier>.<name>}`
    #[serde(default)]
    pub outcomes: BTreeMap<String, Value>,
    #[serde(default)]
    pub unit_progresses: Vec<UnitProgress>,
}

impl StepResponse {
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            failure_info: None,
            outcomes: BTreeMap::new(),
            unit_progresses: Vec::new(),
        }
    }

    pub fn succeeded() -> Self {
        Self::with_status(Status::Succeeded)
    }

    pub fn skipped() -> Self {
        Self::with_status(Status::Skipped)
    }

    pub fn failed(message: impl Into<String>, failure_type: FailureType) -> Self {
        Self::failed_with(FailureInfo::new(message, failure_type))
    }

    pub fn failed_with(failure_info: FailureInfo) -> Self {
        let mut response = Self::with_status(Status::Failed);
        response.failure_info = Some(failure_info);
        response
    }

    pub fn with_outcome(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outcomes.insert(name.into(), value);
        self
    }

    pub fn with_unit(mut self, unit_name: impl Into<String>, status: Status) -> Self {
        self.unit_progresses.push(UnitProgress {
            unit_name: unit_name.into(),
            status,
        });
        self
    }
}

/// Facilitation decision: execution mode plus an optional delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorResponse {
    pub mode: ExecutionMode,
    #[serde(default)]
    pub initial_wait_ms: u64,
    /// Opaque data handed to the executable
    #[serde(default)]
    pub pass_through: Value,
}

impl FacilitatorResponse {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            initial_wait_ms: 0,
            pass_through: Value::Null,
        }
    }

    pub fn with_initial_wait(mut self, initial_wait_ms: u64) -> Self {
        self.initial_wait_ms = initial_wait_ms;
        self
    }
}

/// Recovery action taken when a retry adviser runs out of attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairAction {
    /// Leave the failure to the next adviser, or to the node's own status
    #[default]
    MarkAsFailure,
    Ignore,
    OnFail,
    EndPlan,
    ManualIntervention,
}

/// Decision of the adviser chain about what follows a finished step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdviserResponse {
    /// Conclude this node and start `next_node_id` in its place
    NextStep {
        next_node_id: String,
        to_status: Option<Status>,
    },
    /// Conclude this node as an old attempt and start a fresh one
    Retry { wait_interval_ms: u64 },
    /// Park until an operator interrupt or the intervention timeout
    InterventionWait {
        timeout_ms: u64,
        timeout_action: InterruptType,
    },
    /// Override the outcome, then continue to `next_node_id` or finish
    MarkSuccess {
        to_status: Status,
        next_node_id: Option<String>,
    },
    /// Force the plan execution to end
    EndPlan { status: Status },
    /// No adviser applied
    Unknown,
}

impl AdviserResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            AdviserResponse::NextStep { .. } => "NEXT_STEP",
            AdviserResponse::Retry { .. } => "RETRY",
            AdviserResponse::InterventionWait { .. } => "INTERVENTION_WAIT",
            AdviserResponse::MarkSuccess { .. } => "MARK_SUCCESS",
            AdviserResponse::EndPlan { .. } => "END_PLAN",
            AdviserResponse::Unknown => "UNKNOWN",
        }
    }
}

/// Summary a finished child sends to the parent waiting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNotification {
    pub node_execution_id: String,
    pub identifier: String,
    pub status: Status,
    pub failure_info: Option<FailureInfo>,
    pub outcome_refs: Vec<String>,
    pub adviser_response: Option<AdviserResponse>,
}

/// Completion report of a delegated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub data: Value,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, data: Value) -> Self {
        Self {
            task_id: task_id.into(),
            data,
            error: None,
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Payload stored against a correlation id in wait-notify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    Step(StepNotification),
    Task(TaskResult),
    Callback(Value),
    Facilitation(FacilitatorResponse),
    Advise(AdviserResponse),
    /// A timer elapsed
    Wake,
}

impl ResponseData {
    /// Error message when this payload reports a failed delegation.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ResponseData::Task(result) => result.error.as_deref(),
            _ => None,
        }
    }
}

/// Responses keyed by correlation id.
pub type ResponseMap = BTreeMap<String, ResponseData>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpressionError;

    #[test]
    fn test_failure_info_from_expression_error() {
        let error = EngineError::Expression(ExpressionError::Unresolved("setup.x".into()));
        let info = FailureInfo::from(&error);
        assert_eq!(info.failure_types, vec![FailureType::Expression]);
        assert!(info.message.contains("setup.x"));
    }

    #[test]
    fn test_failure_type_filter() {
        let info = FailureInfo::new("boom", FailureType::Timeout);
        assert!(info.matches_any(&[]));
        assert!(info.matches_any(&[FailureType::Application, FailureType::Timeout]));
        assert!(!info.matches_any(&[FailureType::Expression]));
    }

    #[test]
    fn test_step_response_builders() {
        let response = StepResponse::succeeded()
            .with_outcome("artifact", Value::String("app.tar".into()))
            .with_unit("compile", Status::Succeeded);
        assert_eq!(response.status, Status::Succeeded);
        assert_eq!(response.outcomes.len(), 1);
        assert_eq!(response.unit_progresses.len(), 1);

        let failed = StepResponse::failed("exit 1", FailureType::Application);
        assert_eq!(failed.status, Status::Failed);
        assert!(failed.failure_info.is_some());
    }

    #[test]
    fn test_response_data_error_message() {
        let failed = ResponseData::Task(TaskResult::failure("t1", "runner lost"));
        assert_eq!(failed.error_message(), Some("runner lost"));
        assert_eq!(ResponseData::Wake.error_message(), None);
    }
}
