//! Task Delegation
//!
//! Nodes facilitated in TASK mode hand their work to a [`TaskExecutor`].
//! The executor answers through wait-notify under the task id, so the
//! node holds no thread while the task runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{Result, TaskError};
use crate::model::{new_id, NodeExecution, ResponseData, Status, TaskResult};
use crate::orchestration::{OrchestrationEngine, WorkerPool};
use crate::waitnotify::NotifyCallback;

/// Work handed to the task executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: String,
    #[serde(default)]
    pub parameters: Value,
    /// Deadline for the task itself; `None` leaves it to node timeouts
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Runs one kind of task. Errors are reported as the task's failure.
pub trait TaskHandler: Send + Sync {
    fn run(&self, parameters: &Value) -> std::result::Result<Value, String>;
}

/// Delivers task results back to the engine.
#[derive(Clone)]
pub struct Notifier {
    engine: OrchestrationEngine,
}

impl Notifier {
    pub(crate) fn new(engine: OrchestrationEngine) -> Self {
        Self { engine }
    }

    pub fn complete(&self, result: TaskResult) -> Result<()> {
        let task_id = result.task_id.clone();
        self.engine.notify(&task_id, ResponseData::Task(result))
    }
}

pub trait TaskExecutor: Send + Sync {
    /// Accepts a task and returns its id; the result arrives later
    /// through `notifier`.
    fn submit(&self, spec: TaskSpec, notifier: Notifier) -> std::result::Result<String, TaskError>;

    /// Best-effort cancellation.
    fn abort(&self, task_id: &str) -> std::result::Result<(), TaskError>;
}

/// Task id -> deadline timer, for tasks whose result is still wanted.
type InFlight = Arc<Mutex<HashMap<String, Option<JoinHandle<()>>>>>;

/// Runs registered handlers on the engine's worker pool.
///
/// Whoever settles a task first (its handler, its deadline or an abort)
/// removes it from the in-flight table; the others find it gone and
/// drop their result.
pub struct LocalTaskExecutor {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    pool: WorkerPool,
    in_flight: InFlight,
}

impl LocalTaskExecutor {
    pub fn new(handlers: HashMap<String, Arc<dyn TaskHandler>>, pool: WorkerPool) -> Self {
        Self {
            handlers,
            pool,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Tasks submitted and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    /// Claims a task; true only for the first caller. Stops its deadline timer.
    fn settle(in_flight: &InFlight, task_id: &str) -> bool {
        let entry = match in_flight.lock() {
            Ok(mut tasks) => tasks.remove(task_id),
            Err(_) => {
                warn!("Task table lock poisoned; task {} settled without claim", task_id);
                return true;
            }
        };
        match entry {
            Some(deadline) => {
                if let Some(timer) = deadline {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }
}

impl TaskExecutor for LocalTaskExecutor {
    fn submit(&self, spec: TaskSpec, notifier: Notifier) -> std::result::Result<String, TaskError> {
        let handler = self
            .handlers
            .get(&spec.task_type)
            .cloned()
            .ok_or_else(|| TaskError::UnknownTaskType(spec.task_type.clone()))?;
        let task_id = new_id();
        let task_type = spec.task_type.clone();
        self.in_flight
            .lock()
            .map_err(|_| TaskError::Submission("task table lock poisoned".to_string()))?
            .insert(task_id.clone(), None);

        if let Some(timeout_ms) = spec.timeout_ms {
            let id = task_id.clone();
            let in_flight = Arc::clone(&self.in_flight);
            let deadline_notifier = notifier.clone();
            let scheduled = self.pool.schedule_after(Duration::from_millis(timeout_ms), move || {
                if !Self::settle(&in_flight, &id) {
                    return;
                }
                let result = TaskResult::failure(&id, format!("task timed out after {} ms", timeout_ms));
                if let Err(e) = deadline_notifier.complete(result) {
                    warn!("Failed to report deadline of task {}: {}", id, e);
                }
            });
            let timer = match scheduled {
                Ok(timer) => timer,
                Err(e) => {
                    Self::settle(&self.in_flight, &task_id);
                    return Err(TaskError::Submission(e.to_string()));
                }
            };
            if let Ok(mut tasks) = self.in_flight.lock() {
                match tasks.get_mut(&task_id) {
                    Some(slot) => *slot = Some(timer),
                    None => timer.abort(),
                }
            }
        }

        let id = task_id.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let submitted = self.pool.submit(move || {
            let result = match handler.run(&spec.parameters) {
                Ok(data) => TaskResult::success(&id, data),
                Err(message) => TaskResult::failure(&id, message),
            };
            if !Self::settle(&in_flight, &id) {
                debug!("Task {} finished after abort or deadline; result dropped", id);
                return;
            }
            if let Err(e) = notifier.complete(result) {
                warn!("Failed to report result of task {}: {}", id, e);
            }
        });
        if let Err(e) = submitted {
            Self::settle(&self.in_flight, &task_id);
            return Err(TaskError::Submission(e.to_string()));
        }

        debug!("Submitted {} task {}", task_type, task_id);
        Ok(task_id)
    }

    fn abort(&self, task_id: &str) -> std::result::Result<(), TaskError> {
        if Self::settle(&self.in_flight, task_id) {
            debug!("Task {} aborted", task_id);
        }
        Ok(())
    }
}

/// Hands a running node's work to the task executor and parks the node
/// until the task answers.
pub(crate) fn delegate(engine: &OrchestrationEngine, ne: &NodeExecution, spec: TaskSpec) -> Result<()> {
    let task_type = spec.task_type.clone();
    let task_id = engine
        .task_executor()
        .submit(spec, Notifier::new(engine.clone()))?;

    let parked = engine.update_node(&ne.uuid, &[Status::Running], |n| {
        n.status = Status::AsyncWaiting;
        n.task_id = Some(task_id.clone());
        n.callback_ids = vec![task_id.clone()];
    })?;
    if parked.is_none() {
        if let Err(e) = engine.task_executor().abort(&task_id) {
            warn!("Could not abort orphaned task {}: {}", task_id, e);
        }
        return Ok(());
    }

    info!("Node '{}' delegated {} task {}", ne.identifier, task_type, task_id);
    engine.wait_for_all(
        vec![task_id],
        NotifyCallback::Resume {
            node_execution_id: ne.uuid.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::orchestration::OrchestrationService;
    use serde_json::json;
    use std::thread;
    use std::time::Instant;

    struct Echo;

    impl TaskHandler for Echo {
        fn run(&self, parameters: &Value) -> std::result::Result<Value, String> {
            Ok(parameters.clone())
        }
    }

    struct Sleep(u64);

    impl TaskHandler for Sleep {
        fn run(&self, _parameters: &Value) -> std::result::Result<Value, String> {
            thread::sleep(Duration::from_millis(self.0));
            Ok(json!("done"))
        }
    }

    fn setup() -> (OrchestrationService, LocalTaskExecutor, Notifier) {
        let service = OrchestrationService::new(EngineConfig {
            worker_threads: 2,
            ..EngineConfig::default()
        })
        .unwrap();
        let mut handlers: HashMap<String, Arc<dyn TaskHandler>> = HashMap::new();
        handlers.insert("ECHO".to_string(), Arc::new(Echo));
        handlers.insert("SLEEP".to_string(), Arc::new(Sleep(200)));
        let executor = LocalTaskExecutor::new(handlers, service.engine().pool().clone());
        let notifier = Notifier::new(service.engine().clone());
        (service, executor, notifier)
    }

    async fn settled(executor: &LocalTaskExecutor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while executor.in_flight() > 0 {
            assert!(Instant::now() < deadline, "task never settled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_finished_task_leaves_table() {
        let (service, executor, notifier) = setup();
        let spec = TaskSpec::new("ECHO", json!({"n": 1})).with_timeout(5_000);
        let task_id = executor.submit(spec, notifier).unwrap();

        settled(&executor).await;
        match service.engine().wait_notify().response(&task_id) {
            Some(ResponseData::Task(result)) => {
                assert!(result.error.is_none());
                assert_eq!(result.data, json!({"n": 1}));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_abort_drops_result() {
        let (service, executor, notifier) = setup();
        let task_id = executor
            .submit(TaskSpec::new("SLEEP", Value::Null).with_timeout(50), notifier)
            .unwrap();
        assert_eq!(executor.in_flight(), 1);

        executor.abort(&task_id).unwrap();
        assert_eq!(executor.in_flight(), 0);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(service.engine().wait_notify().response(&task_id).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deadline_settles_task() {
        let (service, executor, notifier) = setup();
        let task_id = executor
            .submit(TaskSpec::new("SLEEP", Value::Null).with_timeout(50), notifier)
            .unwrap();

        settled(&executor).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        match service.engine().wait_notify().response(&task_id) {
            Some(ResponseData::Task(result)) => {
                assert!(result.error.unwrap().contains("timed out after 50 ms"));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_task_type() {
        let (_service, executor, notifier) = setup();
        let result = executor.submit(TaskSpec::new("MISSING", Value::Null), notifier);
        assert!(matches!(result, Err(TaskError::UnknownTaskType(_))));
        assert_eq!(executor.in_flight(), 0);
    }
}
