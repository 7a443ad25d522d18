//! Error Types
//!
//! Unexpected faults raised while orchestrating a plan. Business failures
//! of a step are not errors: they travel as a
//! [`StepResponse`](crate::model::StepResponse) carrying a failed status.

use thiserror::Error;

use crate::model::ExecutionMode;

/// Failures of the durable record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: '{id}'")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: '{id}'")]
    Duplicate { kind: &'static str, id: String },

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true when retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Io(_))
    }
}

/// Failures while resolving expressions against an ambiance.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Unresolved expression: ${{{0}}}")]
    Unresolved(String),

    #[error("Unterminated expression in '{0}'")]
    Unterminated(String),

    #[error("Invalid condition: '{0}'")]
    InvalidCondition(String),
}

/// Failures while delegating work to the task executor.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("No task handler registered for '{0}'")]
    UnknownTaskType(String),

    #[error("Task submission failed: {0}")]
    Submission(String),
}

/// Reasons an interrupt cannot be registered or applied.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterruptError {
    #[error("Plan execution '{0}' has already finished")]
    PlanFinished(String),

    #[error("{0} interrupts require a node execution id")]
    NodeRequired(String),

    #[error("{interrupt} interrupt is not applicable to node execution '{node_execution_id}' in status {status}")]
    NotApplicable {
        interrupt: String,
        node_execution_id: String,
        status: String,
    },

    #[error("Plan execution '{0}' is already paused")]
    AlreadyPaused(String),

    #[error("Nothing to resume in plan execution '{0}'")]
    NothingToResume(String),
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Interrupt(#[from] InterruptError),

    #[error("Plan node not found: '{0}'")]
    NodeNotFound(String),

    #[error("No executable registered for step type '{0}'")]
    UnknownStepType(String),

    #[error("No facilitator registered for type '{0}'")]
    UnknownFacilitator(String),

    #[error("No adviser registered for type '{0}'")]
    UnknownAdviser(String),

    #[error("No facilitator produced a response for node '{0}'")]
    FacilitationFailed(String),

    #[error("Step '{step}' returned a {actual} response for a {expected} node")]
    ModeMismatch {
        step: String,
        expected: ExecutionMode,
        actual: &'static str,
    },

    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },

    #[error("Invalid parameters for '{owner}': {message}")]
    InvalidParameters { owner: String, message: String },

    #[error("Invalid plan:\n{0}")]
    InvalidPlan(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Event channel is closed")]
    ChannelClosed,

    #[error("Timed out waiting for plan execution '{0}'")]
    WaitTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Shorthand for a step fault with a message.
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
