//! Plan and Execution Model
//!
//! Data structures shared by every part of the engine.
//!
//! # Structure
//!
//! - [`plan`]: Immutable plans and plan nodes
//! - [`ambiance`]: Execution context carried by each node
//! - [`status`]: Status lattice and aggregation
//! - [`execution`]: Plan, node and timeout records
//! - [`response`]: Step, facilitator and adviser responses
//! - [`interrupt`]: Interrupt records
//! - [`parser`] / [`validator`]: YAML loading and plan checks

pub mod ambiance;
pub mod execution;
pub mod interrupt;
pub mod parser;
pub mod plan;
pub mod response;
pub mod status;
pub mod validator;

pub use ambiance::{Ambiance, ExecutionMetadata, Level, RunMode, TriggerInfo, TriggerType};
pub use execution::{
    NodeExecution, PlanExecution, TimeoutInstance, TimeoutPurpose, TimeoutState,
};
pub use interrupt::{
    Interrupt, InterruptHandle, InterruptOrigin, InterruptSpec, InterruptState, InterruptType,
};
pub use parser::{load_plan, parse_plan};
pub use plan::{AdviserObtainment, FacilitatorObtainment, Plan, PlanNode, TimeoutObtainment};
pub use response::{
    AdviserResponse, ExecutionMode, FacilitatorResponse, FailureInfo, FailureType, RepairAction,
    ResponseData, ResponseMap, StepNotification, StepResponse, TaskResult, UnitProgress,
};
pub use status::{aggregate_status, Status};
pub use validator::{validate_plan, ValidationError};

/// Generates a fresh record id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
