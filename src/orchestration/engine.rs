//! Orchestration Engine
//!
//! Owns the node lifecycle transitions:
//!
//! ```text
//! trigger -> facilitate -> invoke -> respond -> advise -> end
//! ```
//!
//! Every transition is a guarded store update: it applies only when the
//! record is still in one of the statuses the caller expects, so
//! duplicate events and late timers fall through as no-ops. Work is
//! handed to the worker pool; nothing here blocks on another node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::Value;

use super::children;
use super::facilitation;
use super::listeners::{default_listeners, EventListener};
use super::pool::WorkerPool;
use super::registry::Registry;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{
    EventChannel, EventPayload, EventReceiver, EventType, OrchestrationEvent,
    OrchestrationSignal, SignalBus,
};
use crate::expression::ExpressionResolver;
use crate::interrupt::{checks, InterruptService};
use crate::model::{
    aggregate_status, new_id, AdviserResponse, Ambiance, FacilitatorResponse, FailureInfo,
    InterruptOrigin, InterruptSpec, Level, NodeExecution, Plan, PlanExecution, PlanNode,
    ResponseData, ResponseMap, Status, StepResponse, TimeoutInstance, TimeoutPurpose,
};
use crate::monitoring::ExecutionTimeline;
use crate::store::{with_retries, ExecutionStore};
use crate::task::TaskExecutor;
use crate::timeout::{ExpiryCallback, TimeoutEngine};
use crate::waitnotify::{Notification, NotifyCallback, WaitNotifyRegistry};

/// Statuses a step response may be applied from.
pub(crate) const RESPONSE_STATUSES: &[Status] =
    &[Status::Queued, Status::Running, Status::AsyncWaiting];

/// Statuses an executable may be invoked from.
const INVOCABLE: &[Status] = &[Status::Queued, Status::TimedWaiting, Status::Paused];

/// Collaborators the engine is assembled from.
pub struct EngineParts {
    pub config: EngineConfig,
    pub store: Arc<dyn ExecutionStore>,
    pub registry: Registry,
    pub events: EventChannel,
    pub wait_notify: Arc<WaitNotifyRegistry>,
    pub timeouts: Arc<TimeoutEngine>,
    pub pool: WorkerPool,
    pub signals: Arc<SignalBus>,
    pub resolver: Arc<dyn ExpressionResolver>,
    pub task_executor: Arc<dyn TaskExecutor>,
}

#[derive(Clone)]
pub struct OrchestrationEngine {
    config: Arc<EngineConfig>,
    store: Arc<dyn ExecutionStore>,
    registry: Arc<Registry>,
    events: EventChannel,
    wait_notify: Arc<WaitNotifyRegistry>,
    timeouts: Arc<TimeoutEngine>,
    pool: WorkerPool,
    signals: Arc<SignalBus>,
    timeline: Arc<Mutex<ExecutionTimeline>>,
    resolver: Arc<dyn ExpressionResolver>,
    task_executor: Arc<dyn TaskExecutor>,
    listeners: Arc<HashMap<EventType, Arc<dyn EventListener>>>,
}

impl OrchestrationEngine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            config: Arc::new(parts.config),
            store: parts.store,
            registry: Arc::new(parts.registry),
            events: parts.events,
            wait_notify: parts.wait_notify,
            timeouts: parts.timeouts,
            pool: parts.pool,
            signals: parts.signals,
            timeline: Arc::new(Mutex::new(ExecutionTimeline::new())),
            resolver: parts.resolver,
            task_executor: parts.task_executor,
            listeners: Arc::new(default_listeners()),
        }
    }

    /// Spawns the task that hands published events to their listeners.
    pub(crate) fn start_dispatcher(&self, mut receiver: EventReceiver) {
        let engine = self.clone();
        self.pool.handle().spawn(async move {
            while let Some(event) = receiver.next().await {
                engine.dispatch_event(event);
            }
            debug!("Event dispatcher stopped");
        });
    }

    fn dispatch_event(&self, event: OrchestrationEvent) {
        let Some(listener) = self.listeners.get(&event.event_type).cloned() else {
            warn!("No listener for {} events", event.event_type);
            return;
        };
        let node_execution_id = event.node_execution_id().to_string();
        if let Err(e) = self.submit(&node_execution_id, move |engine| listener.on_event(engine, event)) {
            error!(
                "Failed to dispatch event for node execution {}: {}",
                node_execution_id, e
            );
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn wait_notify(&self) -> &WaitNotifyRegistry {
        &self.wait_notify
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub(crate) fn timeouts(&self) -> &TimeoutEngine {
        &self.timeouts
    }

    pub(crate) fn resolver(&self) -> &dyn ExpressionResolver {
        self.resolver.as_ref()
    }

    pub(crate) fn task_executor(&self) -> &dyn TaskExecutor {
        self.task_executor.as_ref()
    }

    /// Snapshot of every status transition recorded so far.
    pub fn timeline(&self) -> ExecutionTimeline {
        self.timeline
            .lock()
            .map(|timeline| timeline.clone())
            .unwrap_or_default()
    }

    // ---- store helpers ----

    /// Guarded node update with transaction retries.
    ///
    /// Returns `None` when the node is not in one of `allowed`.
    pub(crate) fn update_node<F>(
        &self,
        node_execution_id: &str,
        allowed: &[Status],
        mut update: F,
    ) -> Result<Option<NodeExecution>>
    where
        F: FnMut(&mut NodeExecution),
    {
        let mut previous = None;
        let updated = with_retries(&self.config.transaction_retry, "node execution update", || {
            self.store.update_node_execution(node_execution_id, allowed, &mut |ne: &mut NodeExecution| {
                previous = Some(ne.status);
                update(ne);
            })
        })?;

        if let (Some(ne), Some(previous)) = (&updated, previous) {
            if ne.status != previous {
                self.record_transition(ne, Some(previous));
            }
        }
        Ok(updated)
    }

    pub(crate) fn update_plan<F>(
        &self,
        plan_execution_id: &str,
        allowed: &[Status],
        mut update: F,
    ) -> Result<Option<PlanExecution>>
    where
        F: FnMut(&mut PlanExecution),
    {
        Ok(with_retries(&self.config.transaction_retry, "plan execution update", || {
            self.store
                .update_plan_execution(plan_execution_id, allowed, &mut update)
        })?)
    }

    /// Persists a new node record.
    pub(crate) fn create_node(&self, execution: NodeExecution) -> Result<NodeExecution> {
        with_retries(&self.config.transaction_retry, "node execution insert", || {
            self.store.insert_node_execution(execution.clone())
        })?;
        info!(
            "Queued node '{}' ({}) in plan execution {}",
            execution.identifier,
            execution.uuid,
            execution.plan_execution_id()
        );
        self.record_transition(&execution, None);
        Ok(execution)
    }

    fn record_transition(&self, ne: &NodeExecution, previous: Option<Status>) {
        match previous {
            Some(previous) => debug!(
                "Node '{}' ({}) {} -> {}",
                ne.identifier, ne.uuid, previous, ne.status
            ),
            None => debug!("Node '{}' ({}) created {}", ne.identifier, ne.uuid, ne.status),
        }
        match self.timeline.lock() {
            Ok(mut timeline) => timeline.record(
                ne.plan_execution_id(),
                &ne.uuid,
                &ne.identifier,
                previous,
                ne.status,
            ),
            Err(_) => warn!("Timeline lock poisoned; transition of {} not recorded", ne.uuid),
        }
        self.signals.publish(OrchestrationSignal::NodeStatusChanged {
            plan_execution_id: ne.plan_execution_id().to_string(),
            node_execution_id: ne.uuid.clone(),
            identifier: ne.identifier.clone(),
            status: ne.status,
        });
    }

    pub(crate) fn plan_for(&self, ne: &NodeExecution) -> Result<Plan> {
        Ok(self.store.plan_execution(ne.plan_execution_id())?.plan)
    }

    pub(crate) fn plan_node(&self, ne: &NodeExecution) -> Result<PlanNode> {
        let plan = self.plan_for(ne)?;
        plan.node(&ne.node_id)
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(ne.node_id.clone()))
    }

    // ---- scheduling ----

    /// Runs `job` on the worker pool; its error goes to [`handle_error`].
    ///
    /// [`handle_error`]: OrchestrationEngine::handle_error
    pub(crate) fn submit<F>(&self, node_execution_id: &str, job: F) -> Result<()>
    where
        F: FnOnce(&OrchestrationEngine) -> Result<()> + Send + 'static,
    {
        let engine = self.clone();
        let node_execution_id = node_execution_id.to_string();
        self.pool.submit(move || {
            if let Err(e) = job(&engine) {
                engine.handle_error(&node_execution_id, e);
            }
        })
    }

    /// Schedules facilitation of a queued node.
    pub(crate) fn dispatch_node(&self, node_execution_id: &str) -> Result<()> {
        let id = node_execution_id.to_string();
        self.submit(node_execution_id, move |engine| {
            engine.facilitate_and_start_step(&id)
        })
    }

    /// Registers a wait and dispatches it at once when already satisfied.
    pub(crate) fn wait_for_all(
        &self,
        correlation_ids: Vec<String>,
        callback: NotifyCallback,
    ) -> Result<()> {
        let (wait_id, ready) = self.wait_notify.wait_for_all(correlation_ids, callback)?;
        debug!("Registered wait {}", wait_id);
        if let Some(notification) = ready {
            self.dispatch_notification(notification)?;
        }
        Ok(())
    }

    /// Completes a correlation id and resumes whatever was waiting on it.
    pub fn notify(&self, correlation_id: &str, data: ResponseData) -> Result<()> {
        for notification in self.wait_notify.complete(correlation_id, data)? {
            self.dispatch_notification(notification)?;
        }
        Ok(())
    }

    fn dispatch_notification(&self, notification: Notification) -> Result<()> {
        let node_execution_id = notification.callback.node_execution_id().to_string();
        debug!(
            "Wait {} done; resuming node execution {}",
            notification.wait_id, node_execution_id
        );
        self.submit(&node_execution_id, move |engine| {
            engine.on_notification(notification)
        })
    }

    fn on_notification(&self, notification: Notification) -> Result<()> {
        let Notification {
            callback,
            responses,
            ..
        } = notification;
        match callback {
            NotifyCallback::Resume { node_execution_id } => {
                self.resume(&node_execution_id, responses)
            }
            NotifyCallback::Facilitation { node_execution_id } => {
                let response = responses.into_values().find_map(|data| match data {
                    ResponseData::Facilitation(response) => Some(response),
                    _ => None,
                });
                match response {
                    Some(response) => self.facilitate_execution(&node_execution_id, response),
                    None => Err(EngineError::FacilitationFailed(node_execution_id)),
                }
            }
            NotifyCallback::Advise { node_execution_id } => {
                let advice = responses
                    .into_values()
                    .find_map(|data| match data {
                        ResponseData::Advise(advice) => Some(advice),
                        _ => None,
                    })
                    .unwrap_or(AdviserResponse::Unknown);
                self.handle_advise(&node_execution_id, advice)
            }
            NotifyCallback::Invoke { node_execution_id } => {
                self.invoke_executable(&node_execution_id)
            }
            NotifyCallback::RetryWake { node_execution_id } => self.retry_node(&node_execution_id),
        }
    }

    // ---- lifecycle ----

    /// Starts `node` after the node execution the ambiance points at, or as
    /// a top-level node when the ambiance has no levels.
    ///
    /// The previous node gets its `next_id` and, if still open, `end_ts`.
    pub fn trigger_execution(&self, ambiance: &Ambiance, node: &PlanNode) -> Result<NodeExecution> {
        let uuid = new_id();
        let execution = match ambiance.node_execution_id() {
            Some(previous_id) => {
                let now = Utc::now();
                let previous = self
                    .update_node(previous_id, Status::ALL, |ne| {
                        ne.next_id = Some(uuid.clone());
                        if ne.end_ts.is_none() {
                            ne.end_ts = Some(now);
                        }
                    })?
                    .ok_or_else(|| EngineError::NodeNotFound(previous_id.to_string()))?;
                NodeExecution::successor_of(&previous, uuid.clone(), node)
            }
            None => {
                let level = Level::for_node(&uuid, node);
                NodeExecution::new(uuid.clone(), node, ambiance.with_level(level))
            }
        };

        let execution = self.create_node(execution)?;
        self.dispatch_node(&execution.uuid)?;
        Ok(execution)
    }

    /// Runs the pre-facilitation checks, resolves parameters and facilitates.
    pub fn facilitate_and_start_step(&self, node_execution_id: &str) -> Result<()> {
        let node_execution = self.store.node_execution(node_execution_id)?;
        if node_execution.status != Status::Queued {
            debug!(
                "Node '{}' is {}, not starting again",
                node_execution.identifier, node_execution.status
            );
            return Ok(());
        }

        let check = checks::run_pre_facilitation(self, &node_execution)?;
        if !check.proceed {
            info!("Node '{}' held: {}", node_execution.identifier, check.reason);
            return Ok(());
        }

        let plan_node = self.plan_node(&node_execution)?;
        let resolved = self.resolver.resolve(
            &node_execution.ambiance,
            &plan_node.step_parameters,
            plan_node.skip_unresolved_check,
        )?;
        let Some(node_execution) = self.update_node(node_execution_id, &[Status::Queued], |ne| {
            ne.resolved_step_parameters = Some(resolved.clone());
        })?
        else {
            return Ok(());
        };

        if self.registry.requires_async_facilitation(&plan_node) {
            let event = OrchestrationEvent::new(
                &node_execution,
                EventPayload::Facilitate {
                    resolved_parameters: resolved,
                },
            );
            self.wait_for_all(
                vec![event.id.clone()],
                NotifyCallback::Facilitation {
                    node_execution_id: node_execution_id.to_string(),
                },
            )?;
            return self.events.publish(event);
        }

        let response =
            facilitation::facilitate(&self.registry, &plan_node, &node_execution, &resolved)?;
        self.facilitate_execution(node_execution_id, response)
    }

    /// Records the chosen mode, then invokes now or after the initial wait.
    pub fn facilitate_execution(
        &self,
        node_execution_id: &str,
        response: FacilitatorResponse,
    ) -> Result<()> {
        let waits = response.initial_wait_ms > 0;
        let Some(node_execution) = self.update_node(node_execution_id, &[Status::Queued], |ne| {
            ne.mode = Some(response.mode);
            ne.facilitator_response = Some(response.clone());
            if waits {
                ne.status = Status::TimedWaiting;
            }
        })?
        else {
            debug!("Node execution {} left QUEUED during facilitation", node_execution_id);
            return Ok(());
        };

        if !waits {
            return self.invoke_executable(node_execution_id);
        }

        let correlation_id = new_id();
        self.wait_for_all(
            vec![correlation_id.clone()],
            NotifyCallback::Invoke {
                node_execution_id: node_execution_id.to_string(),
            },
        )?;
        let engine = self.clone();
        self.pool.schedule_after(
            Duration::from_millis(response.initial_wait_ms),
            move || {
                if let Err(e) = engine.notify(&correlation_id, ResponseData::Wake) {
                    warn!("Failed to end initial wait {}: {}", correlation_id, e);
                }
            },
        )?;
        info!(
            "Node '{}' waiting {} ms before start",
            node_execution.identifier, response.initial_wait_ms
        );
        Ok(())
    }

    /// Moves the node to RUNNING, arms its timeouts and emits START.
    pub fn invoke_executable(&self, node_execution_id: &str) -> Result<()> {
        let node_execution = self.store.node_execution(node_execution_id)?;
        if !INVOCABLE.contains(&node_execution.status) {
            debug!(
                "Node '{}' is {}, not invoking",
                node_execution.identifier, node_execution.status
            );
            return Ok(());
        }

        let check = checks::run_pre_invocation(self, &node_execution)?;
        if !check.proceed {
            info!("Node '{}' held: {}", node_execution.identifier, check.reason);
            return Ok(());
        }

        let facilitator_response = node_execution
            .facilitator_response
            .clone()
            .ok_or_else(|| EngineError::FacilitationFailed(node_execution.identifier.clone()))?;
        let plan_node = self.plan_node(&node_execution)?;
        let now = Utc::now();
        let Some(node_execution) = self.update_node(node_execution_id, INVOCABLE, |ne| {
            ne.status = Status::Running;
            ne.start_ts.get_or_insert(now);
        })?
        else {
            return Ok(());
        };

        let timeout_ids = self.register_timeouts(&node_execution, &plan_node)?;
        let node_execution = self
            .update_node(node_execution_id, Status::ALL, |ne| {
                ne.timeout_instance_ids.extend(timeout_ids.iter().cloned());
            })?
            .unwrap_or(node_execution);

        info!(
            "Starting node '{}' ({}) in {} mode",
            node_execution.identifier, node_execution.uuid, facilitator_response.mode
        );
        let resolved_parameters = node_execution
            .resolved_step_parameters
            .clone()
            .unwrap_or(Value::Null);
        self.events.publish(OrchestrationEvent::new(
            &node_execution,
            EventPayload::Start {
                facilitator_response,
                resolved_parameters,
            },
        ))
    }

    fn register_timeouts(&self, ne: &NodeExecution, plan_node: &PlanNode) -> Result<Vec<String>> {
        let durations: Vec<u64> = if plan_node.timeouts.is_empty() {
            vec![self.config.default_timeout_ms()]
        } else {
            plan_node.timeouts.iter().map(|t| t.timeout_ms).collect()
        };
        durations
            .into_iter()
            .map(|ms| self.arm_timeout(TimeoutInstance::new(ne, ms, TimeoutPurpose::Node)))
            .collect()
    }

    pub(crate) fn arm_timeout(&self, instance: TimeoutInstance) -> Result<String> {
        self.timeouts.register(instance, self.expiry_callback())
    }

    pub(crate) fn expiry_callback(&self) -> ExpiryCallback {
        let engine = self.clone();
        Box::new(move |instance_id: String| {
            let job_engine = engine.clone();
            let id = instance_id.clone();
            if let Err(e) = engine.pool.submit(move || job_engine.on_timeout(&id)) {
                warn!("Timeout {} dropped: {}", instance_id, e);
            }
        })
    }

    /// Applies a fired timer through the interrupt service.
    ///
    /// A timer that lost the race with its node's conclusion is a no-op.
    pub fn on_timeout(&self, instance_id: &str) {
        let instance = match self.timeouts.fire(instance_id) {
            Ok(Some(instance)) => instance,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to fire timeout {}: {}", instance_id, e);
                return;
            }
        };

        let interrupt_type = instance.purpose.interrupt_type();
        warn!(
            "Timeout {} fired for node execution {} after {} ms; applying {}",
            instance.uuid, instance.node_execution_id, instance.timeout_ms, interrupt_type
        );
        let spec = InterruptSpec::node(
            &instance.plan_execution_id,
            &instance.node_execution_id,
            interrupt_type,
        )
        .with_origin(InterruptOrigin::Timeout {
            instance_id: instance.uuid.clone(),
        });
        if let Err(e) = InterruptService::new(self.clone()).register_interrupt(spec) {
            debug!("Timeout {} had no effect: {}", instance.uuid, e);
        }
    }

    /// Applies a step's outcome.
    ///
    /// Without advisers the node concludes at once; otherwise it enters
    /// ADVISING with the outcome kept as its pending status.
    pub fn handle_step_response(&self, node_execution_id: &str, response: StepResponse) -> Result<()> {
        let node_execution = self.store.node_execution(node_execution_id)?;
        if !response.status.is_terminal() {
            return Err(EngineError::step(
                &node_execution.identifier,
                format!("returned non-terminal status {}", response.status),
            ));
        }

        let plan_node = self.plan_node(&node_execution)?;
        let has_advisers = !plan_node.advisers.is_empty();
        let outcome_refs: Vec<String> = response
            .outcomes
            .keys()
            .map(|name| format!("{}.{}", node_execution.identifier, name))
            .collect();
        let now = Utc::now();

        let Some(updated) = self.update_node(node_execution_id, RESPONSE_STATUSES, |ne| {
            if has_advisers {
                ne.status = Status::Advising;
                ne.pending_status = Some(response.status);
            } else {
                ne.status = response.status;
                ne.end_ts = Some(now);
            }
            ne.failure_info = response.failure_info.clone();
            ne.outcome_refs = outcome_refs.clone();
            ne.unit_progresses = response.unit_progresses.clone();
        })?
        else {
            debug!(
                "Dropping stale {} response for node execution {}",
                response.status, node_execution_id
            );
            return Ok(());
        };

        self.persist_outcomes(&updated, &response)?;
        self.timeouts.cancel(&updated.timeout_instance_ids)?;
        info!("Node '{}' finished with {}", updated.identifier, response.status);

        if has_advisers {
            self.queue_advise(&updated, response.status, response.failure_info, Vec::new())
        } else {
            self.end_transition(&updated)
        }
    }

    fn persist_outcomes(&self, ne: &NodeExecution, response: &StepResponse) -> Result<()> {
        for (name, value) in &response.outcomes {
            let key = format!("{}.{}", ne.identifier, name);
            with_retries(&self.config.transaction_retry, "outcome write", || {
                self.store
                    .put_outcome(ne.plan_execution_id(), &key, value.clone())
            })?;
        }
        Ok(())
    }

    /// Publishes an ADVISE event and waits on its id for the decision.
    pub(crate) fn queue_advise(
        &self,
        ne: &NodeExecution,
        to_status: Status,
        failure_info: Option<FailureInfo>,
        skip_adviser_types: Vec<String>,
    ) -> Result<()> {
        let event = OrchestrationEvent::new(
            ne,
            EventPayload::Advise {
                to_status,
                failure_info,
                skip_adviser_types,
            },
        );
        self.wait_for_all(
            vec![event.id.clone()],
            NotifyCallback::Advise {
                node_execution_id: ne.uuid.clone(),
            },
        )?;
        self.events.publish(event)
    }

    /// Re-enters a node parked in ASYNC_WAITING once its waits completed.
    pub fn resume(&self, node_execution_id: &str, responses: ResponseMap) -> Result<()> {
        let async_error = responses.values().any(|r| r.error_message().is_some());
        let Some(ne) = self.update_node(node_execution_id, &[Status::AsyncWaiting], |ne| {
            ne.status = Status::Running;
        })?
        else {
            debug!("Node execution {} not waiting; resume dropped", node_execution_id);
            return Ok(());
        };
        debug!("Resuming node '{}' with {} responses", ne.identifier, responses.len());
        self.events.publish(OrchestrationEvent::new(
            &ne,
            EventPayload::Resume {
                responses,
                async_error,
            },
        ))
    }

    /// Concludes a node from outside its step (interrupts, timeouts).
    ///
    /// A no-op returning `None` unless the node is in one of `overridable`.
    pub fn conclude_node_execution(
        &self,
        node_execution_id: &str,
        status: Status,
        overridable: &[Status],
        failure_info: Option<FailureInfo>,
    ) -> Result<Option<NodeExecution>> {
        let current = self.store.node_execution(node_execution_id)?;
        let has_advisers = !self.plan_node(&current)?.advisers.is_empty();
        let now = Utc::now();

        let Some(concluded) = self.update_node(node_execution_id, overridable, |ne| {
            if has_advisers {
                ne.status = Status::Advising;
                ne.pending_status = Some(status);
            } else {
                ne.status = status;
                ne.end_ts = Some(now);
            }
            if let Some(info) = &failure_info {
                ne.failure_info = Some(info.clone());
            }
        })?
        else {
            return Ok(None);
        };

        info!("Node '{}' concluded as {}", concluded.identifier, status);
        self.discontinue_work(&concluded)?;
        if has_advisers {
            self.queue_advise(&concluded, status, concluded.failure_info.clone(), Vec::new())?;
        } else {
            self.end_transition(&concluded)?;
        }
        Ok(Some(concluded))
    }

    /// Notifies the waiting parent, or ends the plan for a top-level node.
    pub fn end_transition(&self, ne: &NodeExecution) -> Result<()> {
        match &ne.notify_id {
            Some(notify_id) => {
                debug!("Node '{}' notifying {}", ne.identifier, notify_id);
                self.notify(notify_id, ResponseData::Step(ne.notification()))?;
                if let Some(parent_id) = &ne.parent_id {
                    children::start_next_pending(self, parent_id)?;
                }
                Ok(())
            }
            None => {
                self.end_plan_execution(ne.plan_execution_id(), ne.failure_info.clone())?;
                Ok(())
            }
        }
    }

    /// Ends the plan with the aggregate status of its current top-level
    /// attempts. Children are already folded into their parent's status,
    /// after the parent's advisers had their say.
    pub(crate) fn end_plan_execution(
        &self,
        plan_execution_id: &str,
        failure_info: Option<FailureInfo>,
    ) -> Result<Option<PlanExecution>> {
        let nodes = self.store.node_executions(plan_execution_id)?;
        let current: Vec<&NodeExecution> = nodes
            .iter()
            .filter(|n| n.parent_id.is_none() && !n.old_retry)
            .collect();
        let status = aggregate_status(current.iter().map(|n| n.status));
        let failure_info = if status.is_positive() {
            None
        } else {
            failure_info.or_else(|| {
                current
                    .iter()
                    .filter(|n| !n.status.is_positive())
                    .find_map(|n| n.failure_info.clone())
            })
        };
        self.finish_plan(plan_execution_id, status, failure_info)
    }

    fn finish_plan(
        &self,
        plan_execution_id: &str,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) -> Result<Option<PlanExecution>> {
        let now = Utc::now();
        let ended = self.update_plan(plan_execution_id, Status::PLAN_ACTIVE, |pe| {
            pe.status = status;
            pe.end_ts = Some(now);
            pe.failure_info = failure_info.clone();
        })?;

        match &ended {
            Some(_) => {
                info!("Plan execution {} finished with {}", plan_execution_id, status);
                match self.timeline.lock() {
                    Ok(mut timeline) => timeline.plan_ended(plan_execution_id),
                    Err(_) => warn!("Timeline lock poisoned; {} not retired", plan_execution_id),
                }
                self.signals.publish(OrchestrationSignal::PlanEnded {
                    plan_execution_id: plan_execution_id.to_string(),
                    status,
                });
            }
            None => debug!("Plan execution {} already finished", plan_execution_id),
        }
        Ok(ended)
    }

    /// Ends the plan with `status` regardless of its nodes; every active
    /// node is stopped as `node_status`.
    pub(crate) fn force_end_plan(
        &self,
        plan_execution_id: &str,
        status: Status,
        node_status: Status,
        failure_info: Option<FailureInfo>,
    ) -> Result<Option<PlanExecution>> {
        for ne in self.store.node_executions(plan_execution_id)? {
            if ne.is_active() {
                self.stop_node(&ne.uuid, node_status)?;
            }
        }
        self.finish_plan(plan_execution_id, status, failure_info)
    }

    /// Forces an active node terminal without running its advisers.
    pub(crate) fn stop_node(&self, node_execution_id: &str, status: Status) -> Result<Option<NodeExecution>> {
        let now = Utc::now();
        let stopped = self.update_node(node_execution_id, Status::ACTIVE, |ne| {
            ne.status = status;
            ne.end_ts = Some(now);
        })?;
        if let Some(ne) = &stopped {
            self.timeouts.cancel(&ne.timeout_instance_ids)?;
            self.abort_task(ne);
        }
        Ok(stopped)
    }

    /// Cancels a concluded node's timers and task, and aborts its descendants.
    pub(crate) fn discontinue_work(&self, ne: &NodeExecution) -> Result<()> {
        self.timeouts.cancel(&ne.timeout_instance_ids)?;
        self.abort_task(ne);
        for descendant in self.store.node_executions(ne.plan_execution_id())? {
            if descendant.uuid != ne.uuid
                && descendant.is_active()
                && descendant.ambiance.descends_from(&ne.uuid)
            {
                self.stop_node(&descendant.uuid, Status::Aborted)?;
            }
        }
        Ok(())
    }

    fn abort_task(&self, ne: &NodeExecution) {
        if let Some(task_id) = &ne.task_id {
            if let Err(e) = self.task_executor.abort(task_id) {
                warn!("Could not abort task {} of '{}': {}", task_id, ne.identifier, e);
            }
        }
    }

    /// Error boundary for every engine job.
    ///
    /// A node still able to take a response is failed through the normal
    /// response path; anything else, or a failure while doing so, errors
    /// out the whole plan execution.
    pub fn handle_error(&self, node_execution_id: &str, error: EngineError) {
        error!("Node execution {} failed: {}", node_execution_id, error);
        let node_execution = match self.store.node_execution(node_execution_id) {
            Ok(ne) => ne,
            Err(e) => {
                error!(
                    "Cannot load node execution {} to record failure: {}",
                    node_execution_id, e
                );
                return;
            }
        };
        if node_execution.status.is_terminal() {
            debug!(
                "Node execution {} already {}; error ignored",
                node_execution_id, node_execution.status
            );
            return;
        }

        if RESPONSE_STATUSES.contains(&node_execution.status) {
            let response = StepResponse::failed_with(FailureInfo::from(&error));
            match self.handle_step_response(node_execution_id, response) {
                Ok(()) => return,
                Err(second) => {
                    error!(
                        "Failed to record failure of node execution {}: {}",
                        node_execution_id, second
                    );
                    self.error_out_plan_execution(node_execution.plan_execution_id(), &second);
                    return;
                }
            }
        }
        self.error_out_plan_execution(node_execution.plan_execution_id(), &error);
    }

    /// Gives up on a plan execution: active nodes and the plan become ERRORED.
    pub fn error_out_plan_execution(&self, plan_execution_id: &str, error: &EngineError) {
        error!("Erroring out plan execution {}: {}", plan_execution_id, error);
        if let Err(e) = self.force_end_plan(
            plan_execution_id,
            Status::Errored,
            Status::Errored,
            Some(FailureInfo::from(error)),
        ) {
            error!("Failed to error out plan execution {}: {}", plan_execution_id, e);
        }
    }
}
