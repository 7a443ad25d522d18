//! Durable Record Store
//!
//! Persists plan executions, node executions, interrupts, timeout
//! instances and outcomes.
//!
//! Every status change goes through a guarded update: the caller names
//! the statuses it expects the record to be in, and the update is a no-op
//! when the record has already moved on. This is what keeps concurrent
//! transitions (a timeout racing a step result, a duplicate event) from
//! overwriting each other.

pub mod records;
pub mod retry;
pub mod snapshot;

use serde_json::Value;

use crate::error::StoreError;
use crate::model::{
    Interrupt, InterruptState, NodeExecution, PlanExecution, Status, TimeoutInstance, TimeoutState,
};

pub use records::{RecordStore, Records};
pub use retry::{with_retries, RetryPolicy};

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage seam for execution records.
pub trait ExecutionStore: Send + Sync {
    fn insert_plan_execution(&self, execution: PlanExecution) -> StoreResult<()>;

    fn plan_execution(&self, id: &str) -> StoreResult<PlanExecution>;

    fn plan_executions(&self) -> StoreResult<Vec<PlanExecution>>;

    /// Applies `update` only if the plan execution is in one of `allowed`.
    ///
    /// Returns the updated record, or `None` when the guard rejected it.
    fn update_plan_execution(
        &self,
        id: &str,
        allowed: &[Status],
        update: &mut dyn FnMut(&mut PlanExecution),
    ) -> StoreResult<Option<PlanExecution>>;

    fn insert_node_execution(&self, execution: NodeExecution) -> StoreResult<()>;

    fn node_execution(&self, id: &str) -> StoreResult<NodeExecution>;

    /// All node executions of a plan execution, oldest first.
    fn node_executions(&self, plan_execution_id: &str) -> StoreResult<Vec<NodeExecution>>;

    /// Applies `update` only if the node execution is in one of `allowed`.
    fn update_node_execution(
        &self,
        id: &str,
        allowed: &[Status],
        update: &mut dyn FnMut(&mut NodeExecution),
    ) -> StoreResult<Option<NodeExecution>>;

    fn insert_interrupt(&self, interrupt: Interrupt) -> StoreResult<()>;

    /// Interrupts of a plan execution in registration order.
    fn interrupts(&self, plan_execution_id: &str) -> StoreResult<Vec<Interrupt>>;

    /// Moves an interrupt to `state` if it is currently in one of `allowed`.
    fn update_interrupt_state(
        &self,
        id: &str,
        allowed: &[InterruptState],
        state: InterruptState,
    ) -> StoreResult<bool>;

    fn insert_timeout(&self, instance: TimeoutInstance) -> StoreResult<()>;

    fn timeout(&self, id: &str) -> StoreResult<TimeoutInstance>;

    fn active_timeouts(&self) -> StoreResult<Vec<TimeoutInstance>>;

    /// Compare-and-set on a timeout's state.
    fn update_timeout_state(
        &self,
        id: &str,
        from: TimeoutState,
        to: TimeoutState,
    ) -> StoreResult<bool>;

    fn put_outcome(&self, plan_execution_id: &str, name: &str, value: Value) -> StoreResult<()>;

    fn outcome(&self, plan_execution_id: &str, name: &str) -> StoreResult<Option<Value>>;
}
