//! Record Store
//!
//! Mutex-guarded maps of execution records. With a snapshot path the
//! whole record set is written to disk after every mutation, while the
//! lock is still held, so the file always reflects a consistent state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::snapshot::{load_snapshot, save_snapshot};
use super::{ExecutionStore, StoreResult};
use crate::error::StoreError;
use crate::model::{
    Interrupt, InterruptState, NodeExecution, PlanExecution, Status, TimeoutInstance, TimeoutState,
};

/// Everything the store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Records {
    pub plan_executions: HashMap<String, PlanExecution>,
    pub node_executions: HashMap<String, NodeExecution>,
    pub interrupts: HashMap<String, Interrupt>,
    pub timeouts: HashMap<String, TimeoutInstance>,
    /// Keyed by `<plan execution id>/<outcome name>`
    pub outcomes: HashMap<String, Value>,
}

fn outcome_key(plan_execution_id: &str, name: &str) -> String {
    format!("{}/{}", plan_execution_id, name)
}

pub struct RecordStore {
    records: Mutex<Records>,
    snapshot: Option<PathBuf>,
}

impl RecordStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Records::default()),
            snapshot: None,
        }
    }

    /// A store backed by a JSON snapshot file, loading it if present.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records: Records = load_snapshot(&path)?;
        debug!(
            "Opened record store at {} ({} plan executions)",
            path.display(),
            records.plan_executions.len()
        );
        Ok(Self {
            records: Mutex::new(records),
            snapshot: Some(path),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Records>> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&Records) -> StoreResult<T>) -> StoreResult<T> {
        let records = self.lock()?;
        f(&records)
    }

    /// Runs a mutation and, when it changed something, persists the snapshot.
    ///
    /// With a snapshot the mutation is staged on a copy and only becomes
    /// visible once the file is written, so a failed write leaves the
    /// records as they were and the caller may retry.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut Records) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let mut records = self.lock()?;
        let Some(path) = &self.snapshot else {
            return f(&mut *records).map(|(value, _)| value);
        };

        let mut staged = records.clone();
        let (value, changed) = f(&mut staged)?;
        if changed {
            save_snapshot(path, &staged)?;
            *records = staged;
        }
        Ok(value)
    }

    /// Copy of every record, for inspection and tests.
    pub fn records(&self) -> StoreResult<Records> {
        self.read(|records| Ok(records.clone()))
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ExecutionStore for RecordStore {
    fn insert_plan_execution(&self, execution: PlanExecution) -> StoreResult<()> {
        self.write(|records| {
            if records.plan_executions.contains_key(&execution.uuid) {
                return Err(StoreError::Duplicate {
                    kind: "plan execution",
                    id: execution.uuid,
                });
            }
            records
                .plan_executions
                .insert(execution.uuid.clone(), execution);
            Ok(((), true))
        })
    }

    fn plan_execution(&self, id: &str) -> StoreResult<PlanExecution> {
        self.read(|records| {
            records
                .plan_executions
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    kind: "plan execution",
                    id: id.to_string(),
                })
        })
    }

    fn plan_executions(&self) -> StoreResult<Vec<PlanExecution>> {
        self.read(|records| {
            let mut executions: Vec<PlanExecution> =
                records.plan_executions.values().cloned().collect();
            executions.sort_by_key(|e| e.start_ts);
            Ok(executions)
        })
    }

    fn update_plan_execution(
        &self,
        id: &str,
        allowed: &[Status],
        update: &mut dyn FnMut(&mut PlanExecution),
    ) -> StoreResult<Option<PlanExecution>> {
        self.write(|records| {
            let execution =
                records
                    .plan_executions
                    .get_mut(id)
                    .ok_or_else(|| StoreError::NotFound {
                        kind: "plan execution",
                        id: id.to_string(),
                    })?;
            if !allowed.contains(&execution.status) {
                return Ok((None, false));
            }
            update(execution);
            Ok((Some(execution.clone()), true))
        })
    }

    fn insert_node_execution(&self, execution: NodeExecution) -> StoreResult<()> {
        self.write(|records| {
            if records.node_executions.contains_key(&execution.uuid) {
                return Err(StoreError::Duplicate {
                    kind: "node execution",
                    id: execution.uuid,
                });
            }
            records
                .node_executions
                .insert(execution.uuid.clone(), execution);
            Ok(((), true))
        })
    }

    fn node_execution(&self, id: &str) -> StoreResult<NodeExecution> {
        self.read(|records| {
            records
                .node_executions
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    kind: "node execution",
                    id: id.to_string(),
                })
        })
    }

    fn node_executions(&self, plan_execution_id: &str) -> StoreResult<Vec<NodeExecution>> {
        self.read(|records| {
            let mut executions: Vec<NodeExecution> = records
                .node_executions
                .values()
                .filter(|n| n.ambiance.plan_execution_id == plan_execution_id)
                .cloned()
                .collect();
            executions.sort_by_key(|n| n.created_at);
            Ok(executions)
        })
    }

    fn update_node_execution(
        &self,
        id: &str,
        allowed: &[Status],
        update: &mut dyn FnMut(&mut NodeExecution),
    ) -> StoreResult<Option<NodeExecution>> {
        self.write(|records| {
            let execution =
                records
                    .node_executions
                    .get_mut(id)
                    .ok_or_else(|| StoreError::NotFound {
                        kind: "node execution",
                        id: id.to_string(),
                    })?;
            if !allowed.contains(&execution.status) {
                return Ok((None, false));
            }
            update(execution);
            Ok((Some(execution.clone()), true))
        })
    }

    fn insert_interrupt(&self, interrupt: Interrupt) -> StoreResult<()> {
        self.write(|records| {
            records.interrupts.insert(interrupt.uuid.clone(), interrupt);
            Ok(((), true))
        })
    }

    fn interrupts(&self, plan_execution_id: &str) -> StoreResult<Vec<Interrupt>> {
        self.read(|records| {
            let mut interrupts: Vec<Interrupt> = records
                .interrupts
                .values()
                .filter(|i| i.plan_execution_id == plan_execution_id)
                .cloned()
                .collect();
            interrupts.sort_by_key(|i| i.created_at);
            Ok(interrupts)
        })
    }

    fn update_interrupt_state(
        &self,
        id: &str,
        allowed: &[InterruptState],
        state: InterruptState,
    ) -> StoreResult<bool> {
        self.write(|records| {
            let interrupt = records
                .interrupts
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound {
                    kind: "interrupt",
                    id: id.to_string(),
                })?;
            if !allowed.contains(&interrupt.state) {
                return Ok((false, false));
            }
            interrupt.state = state;
            Ok((true, true))
        })
    }

    fn insert_timeout(&self, instance: TimeoutInstance) -> StoreResult<()> {
        self.write(|records| {
            records.timeouts.insert(instance.uuid.clone(), instance);
            Ok(((), true))
        })
    }

    fn timeout(&self, id: &str) -> StoreResult<TimeoutInstance> {
        self.read(|records| {
            records
                .timeouts
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    kind: "timeout instance",
                    id: id.to_string(),
                })
        })
    }

    fn active_timeouts(&self) -> StoreResult<Vec<TimeoutInstance>> {
        self.read(|records| {
            let mut active: Vec<TimeoutInstance> = records
                .timeouts
                .values()
                .filter(|t| t.state == TimeoutState::Active)
                .cloned()
                .collect();
            active.sort_by_key(|t| t.expires_at);
            Ok(active)
        })
    }

    fn update_timeout_state(
        &self,
        id: &str,
        from: TimeoutState,
        to: TimeoutState,
    ) -> StoreResult<bool> {
        self.write(|records| {
            let instance = records
                .timeouts
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound {
                    kind: "timeout instance",
                    id: id.to_string(),
                })?;
            if instance.state != from {
                return Ok((false, false));
            }
            instance.state = to;
            Ok((true, true))
        })
    }

    fn put_outcome(&self, plan_execution_id: &str, name: &str, value: Value) -> StoreResult<()> {
        self.write(|records| {
            records
                .outcomes
                .insert(outcome_key(plan_execution_id, name), value);
            Ok(((), true))
        })
    }

    fn outcome(&self, plan_execution_id: &str, name: &str) -> StoreResult<Option<Value>> {
        self.read(|records| {
            Ok(records
                .outcomes
                .get(&outcome_key(plan_execution_id, name))
                .cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionMetadata, Level, Plan, PlanNode, TimeoutPurpose};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn seed(store: &RecordStore) -> (PlanExecution, NodeExecution) {
        let node = PlanNode::new("a", "NOOP");
        let plan = Plan::new("a").with_node(node.clone());
        let execution = PlanExecution::new(plan, BTreeMap::new(), ExecutionMetadata::default());
        let ambiance = execution.ambiance().with_level(Level::for_node("ne-1", &node));
        let node_execution = NodeExecution::new("ne-1", &node, ambiance);

        store.insert_plan_execution(execution.clone()).unwrap();
        store.insert_node_execution(node_execution.clone()).unwrap();
        (execution, node_execution)
    }

    #[test]
    fn test_guarded_update_applies_once() {
        let store = RecordStore::in_memory();
        seed(&store);

        let allowed = [Status::Queued, Status::Running];
        let first = store
            .update_node_execution("ne-1", &allowed, &mut |n| n.status = Status::Succeeded)
            .unwrap();
        let second = store
            .update_node_execution("ne-1", &allowed, &mut |n| n.status = Status::Failed)
            .unwrap();

        assert_eq!(first.unwrap().status, Status::Succeeded);
        assert!(second.is_none());
        assert_eq!(store.node_execution("ne-1").unwrap().status, Status::Succeeded);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = RecordStore::in_memory();
        let (_, node_execution) = seed(&store);
        let result = store.insert_node_execution(node_execution);
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[test]
    fn test_missing_record() {
        let store = RecordStore::in_memory();
        assert!(matches!(
            store.node_execution("ghost"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_timeout_compare_and_set() {
        let store = RecordStore::in_memory();
        let (_, node_execution) = seed(&store);
        let instance = TimeoutInstance::new(&node_execution, 1000, TimeoutPurpose::Node);
        let id = instance.uuid.clone();
        store.insert_timeout(instance).unwrap();

        assert_eq!(store.active_timeouts().unwrap().len(), 1);
        assert!(store
            .update_timeout_state(&id, TimeoutState::Active, TimeoutState::Cancelled)
            .unwrap());
        assert!(!store
            .update_timeout_state(&id, TimeoutState::Active, TimeoutState::Fired)
            .unwrap());
        assert!(store.active_timeouts().unwrap().is_empty());
    }

    #[test]
    fn test_outcomes_scoped_by_plan_execution() {
        let store = RecordStore::in_memory();
        store
            .put_outcome("pe-1", "build.artifact", Value::String("app.tar".into()))
            .unwrap();

        assert_eq!(
            store.outcome("pe-1", "build.artifact").unwrap(),
            Some(Value::String("app.tar".into()))
        );
        assert_eq!(store.outcome("pe-2", "build.artifact").unwrap(), None);
    }

    #[test]
    fn test_failed_snapshot_write_leaves_record_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = RecordStore::open(&path).unwrap();
        seed(&store);

        // A directory where the temporary file goes makes the write fail.
        let blocker = path.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        let policy = crate::store::RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        };
        let result = crate::store::with_retries(&policy, "node execution update", || {
            store.update_node_execution("ne-1", &[Status::Queued], &mut |n| {
                n.status = Status::Running
            })
        });
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(store.node_execution("ne-1").unwrap().status, Status::Queued);

        std::fs::remove_dir(&blocker).unwrap();
        let updated = store
            .update_node_execution("ne-1", &[Status::Queued], &mut |n| n.status = Status::Running)
            .unwrap();
        assert_eq!(updated.unwrap().status, Status::Running);
        assert_eq!(
            RecordStore::open(&path).unwrap().node_execution("ne-1").unwrap().status,
            Status::Running
        );
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let plan_execution_id = {
            let store = RecordStore::open(&path).unwrap();
            let (execution, _) = seed(&store);
            execution.uuid
        };

        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(
            reopened.plan_execution(&plan_execution_id).unwrap().status,
            Status::Running
        );
        assert_eq!(reopened.node_executions(&plan_execution_id).unwrap().len(), 1);
    }
}
