//! Orchestration Service
//!
//! The public entry point: assembles an engine from its parts, starts
//! plan executions and answers queries about them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! use planrunner::model::{Plan, PlanNode, TriggerInfo};
//! use planrunner::{EngineConfig, OrchestrationService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = OrchestrationService::new(EngineConfig::default())?;
//!     let plan = Plan::new("hello").with_node(PlanNode::new("hello", "NOOP"));
//!
//!     let handle = service.start_execution(plan, BTreeMap::new(), TriggerInfo::manual("ops"))?;
//!     let finished = service
//!         .wait_for_completion(&handle.plan_execution_id, Duration::from_secs(10))
//!         .await?;
//!     println!("{}", finished.status);
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::engine::{EngineParts, OrchestrationEngine};
use super::pool::WorkerPool;
use super::registry::Registry;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventChannel, OrchestrationSignal, SignalBus};
use crate::expression::{ExpressionResolver, StoreResolver};
use crate::interrupt::InterruptService;
use crate::model::{
    validate_plan, ExecutionMetadata, Interrupt, InterruptHandle, InterruptSpec, NodeExecution,
    Plan, PlanExecution, ResponseData, RunMode, Status, TriggerInfo, TriggerType,
};
use crate::monitoring::ExecutionTimeline;
use crate::store::{with_retries, ExecutionStore, RecordStore};
use crate::task::{LocalTaskExecutor, TaskExecutor};
use crate::timeout::TimeoutEngine;
use crate::waitnotify::WaitNotifyRegistry;

const STORE_FILE: &str = "store.json";
const WAITS_FILE: &str = "waits.json";

/// Ids of a freshly started plan execution and its first node.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanExecutionHandle {
    pub plan_execution_id: String,
    pub node_execution_id: String,
}

/// What [`OrchestrationService::recover`] picked back up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    pub timeouts_rearmed: usize,
    pub nodes_redispatched: usize,
}

/// Assembles an [`OrchestrationService`].
///
/// Everything but the configuration is optional; missing parts get the
/// built-in implementations.
pub struct ServiceBuilder {
    config: EngineConfig,
    registry: Option<Registry>,
    store: Option<Arc<dyn ExecutionStore>>,
    resolver: Option<Arc<dyn ExpressionResolver>>,
    task_executor: Option<Arc<dyn TaskExecutor>>,
}

impl ServiceBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: None,
            store: None,
            resolver: None,
            task_executor: None,
        }
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ExpressionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn task_executor(mut self, task_executor: Arc<dyn TaskExecutor>) -> Self {
        self.task_executor = Some(task_executor);
        self
    }

    /// Builds the service and starts its event dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<OrchestrationService> {
        self.config.validate()?;
        let handle = Handle::try_current()
            .map_err(|e| EngineError::Config(format!("No tokio runtime available: {}", e)))?;

        let (default_store, wait_notify): (Arc<dyn ExecutionStore>, WaitNotifyRegistry) =
            match &self.config.state_dir {
                Some(dir) => {
                    fs::create_dir_all(dir)?;
                    info!("Persisting engine state under {}", dir.display());
                    (
                        Arc::new(RecordStore::open(dir.join(STORE_FILE))?),
                        WaitNotifyRegistry::open(dir.join(WAITS_FILE))?,
                    )
                }
                None => (Arc::new(RecordStore::in_memory()), WaitNotifyRegistry::new()),
            };
        let store = self.store.unwrap_or(default_store);

        let registry = self.registry.unwrap_or_else(Registry::with_builtins);
        let pool = WorkerPool::new(handle.clone(), self.config.worker_threads);
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(StoreResolver::new(Arc::clone(&store))));
        let task_executor = self.task_executor.unwrap_or_else(|| {
            Arc::new(LocalTaskExecutor::new(registry.task_handlers(), pool.clone()))
        });
        let timeouts = Arc::new(TimeoutEngine::new(Arc::clone(&store), handle));
        let (events, receiver) = EventChannel::new();

        debug!(
            "Building orchestration service with {} workers and step types {:?}",
            self.config.worker_threads,
            registry.step_types()
        );

        let engine = OrchestrationEngine::new(EngineParts {
            config: self.config,
            store,
            registry,
            events,
            wait_notify: Arc::new(wait_notify),
            timeouts,
            pool,
            signals: Arc::new(SignalBus::default()),
            resolver,
            task_executor,
        });
        engine.start_dispatcher(receiver);

        Ok(OrchestrationService { engine })
    }
}

#[derive(Clone)]
pub struct OrchestrationService {
    engine: OrchestrationEngine,
}

impl OrchestrationService {
    /// Service with the built-in registry and an in-memory store, unless
    /// `config.state_dir` asks for durable state.
    pub fn new(config: EngineConfig) -> Result<Self> {
        ServiceBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    /// Validates `plan`, persists a new plan execution and triggers its
    /// starting node.
    pub fn start_execution(
        &self,
        plan: Plan,
        setup_abstractions: BTreeMap<String, String>,
        trigger_info: TriggerInfo,
    ) -> Result<PlanExecutionHandle> {
        validate_plan(&plan, Some(self.engine.registry()))?;
        let starting_node = plan
            .starting_node()
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(plan.starting_node_id.clone()))?;

        let store = self.engine.store();
        let previous_runs = store
            .plan_executions()?
            .iter()
            .filter(|pe| pe.plan.uuid == plan.uuid)
            .count() as u64;
        let run_mode = if trigger_info.rerun_of.is_some() {
            RunMode::Rerun
        } else {
            RunMode::Normal
        };
        let metadata = ExecutionMetadata {
            run_sequence: previous_runs + 1,
            trigger_info,
            run_mode,
        };

        let plan_execution = PlanExecution::new(plan, setup_abstractions, metadata);
        with_retries(
            &self.engine.config().transaction_retry,
            "plan execution insert",
            || store.insert_plan_execution(plan_execution.clone()),
        )?;
        info!(
            "Started plan execution {} (run {}) triggered by {}",
            plan_execution.uuid,
            plan_execution.metadata.run_sequence,
            plan_execution.metadata.trigger_info.triggered_by
        );
        self.engine.signals().publish(OrchestrationSignal::PlanStarted {
            plan_execution_id: plan_execution.uuid.clone(),
        });

        match self
            .engine
            .trigger_execution(&plan_execution.ambiance(), &starting_node)
        {
            Ok(first) => Ok(PlanExecutionHandle {
                plan_execution_id: plan_execution.uuid,
                node_execution_id: first.uuid,
            }),
            Err(e) => {
                self.engine.error_out_plan_execution(&plan_execution.uuid, &e);
                Err(e)
            }
        }
    }

    /// Runs a finished plan execution again with the same plan and setup.
    pub fn rerun_execution(
        &self,
        plan_execution_id: &str,
        triggered_by: impl Into<String>,
    ) -> Result<PlanExecutionHandle> {
        let previous = self.engine.store().plan_execution(plan_execution_id)?;
        let trigger_info = TriggerInfo {
            trigger_type: TriggerType::Rerun,
            triggered_by: triggered_by.into(),
            rerun_of: Some(previous.uuid.clone()),
        };
        self.start_execution(previous.plan, previous.setup_abstractions, trigger_info)
    }

    pub fn register_interrupt(&self, spec: InterruptSpec) -> Result<InterruptHandle> {
        InterruptService::new(self.engine.clone()).register_interrupt(spec)
    }

    pub fn plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution> {
        Ok(self.engine.store().plan_execution(plan_execution_id)?)
    }

    pub fn node_executions(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        Ok(self.engine.store().node_executions(plan_execution_id)?)
    }

    pub fn interrupts(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        Ok(self.engine.store().interrupts(plan_execution_id)?)
    }

    /// Completes a correlation id, resuming whatever waits on it.
    pub fn notify(&self, correlation_id: &str, data: ResponseData) -> Result<()> {
        self.engine.notify(correlation_id, data)
    }

    /// Answers an async step's callback id with an external payload.
    pub fn complete_callback(&self, callback_id: &str, payload: Value) -> Result<()> {
        self.engine.notify(callback_id, ResponseData::Callback(payload))
    }

    /// Waits until the plan execution reaches a terminal status.
    pub async fn wait_for_completion(
        &self,
        plan_execution_id: &str,
        timeout: Duration,
    ) -> Result<PlanExecution> {
        let deadline = Instant::now() + timeout;
        let poll_interval = Duration::from_millis(self.engine.config().poll_interval_ms);
        loop {
            let plan_execution = self.plan_execution(plan_execution_id)?;
            if plan_execution.is_finished() {
                return Ok(plan_execution);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::WaitTimeout(plan_execution_id.to_string()));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationSignal> {
        self.engine.signals().subscribe()
    }

    pub fn timeline(&self) -> ExecutionTimeline {
        self.engine.timeline()
    }

    pub fn engine(&self) -> &OrchestrationEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        self.engine.store()
    }

    /// Stops accepting work. Jobs already running finish.
    pub fn shutdown(&self) {
        info!("Shutting down orchestration service");
        self.engine.pool().shutdown();
    }

    /// Picks up work persisted by an earlier process.
    ///
    /// Active timers are re-armed with their remaining time. In unfinished
    /// plans, queued nodes are dispatched again, nodes in an initial wait
    /// are invoked at once and nodes that were being advised are advised
    /// again. Nodes parked on wait-notify need nothing: their waits are
    /// part of the persisted state.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let store = self.engine.store();

        for instance in store.active_timeouts()? {
            self.engine
                .timeouts()
                .arm(&instance, self.engine.expiry_callback());
            report.timeouts_rearmed += 1;
        }

        for plan_execution in store.plan_executions()? {
            if plan_execution.is_finished() {
                continue;
            }
            let nodes = store.node_executions(&plan_execution.uuid)?;
            let held: HashSet<&str> = nodes
                .iter()
                .flat_map(|ne| ne.pending_children.iter().map(String::as_str))
                .collect();

            for ne in &nodes {
                match ne.status {
                    Status::Queued if !held.contains(ne.uuid.as_str()) => {
                        self.engine.dispatch_node(&ne.uuid)?;
                    }
                    Status::TimedWaiting => {
                        let id = ne.uuid.clone();
                        self.engine
                            .submit(&ne.uuid, move |engine| engine.invoke_executable(&id))?;
                    }
                    Status::Advising => match ne.pending_status {
                        Some(pending) => {
                            self.engine
                                .queue_advise(ne, pending, ne.failure_info.clone(), Vec::new())?;
                        }
                        None => {
                            warn!("Node '{}' is advising without an outcome", ne.identifier);
                            continue;
                        }
                    },
                    _ => continue,
                }
                debug!("Recovered node '{}' ({})", ne.identifier, ne.status);
                report.nodes_redispatched += 1;
            }
        }

        info!(
            "Recovery re-armed {} timeouts and resumed {} nodes",
            report.timeouts_rearmed, report.nodes_redispatched
        );
        Ok(report)
    }
}
