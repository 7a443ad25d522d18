//! Orchestration Event Channel
//!
//! Work items that move a node through its lifecycle (start, resume,
//! advise, custom facilitation) are published here and consumed by one
//! listener per event type. Every published event is kept in an
//! append-only log; the dispatcher skips event ids it has already seen.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{EngineError, Result};
use crate::model::{
    new_id, FacilitatorResponse, FailureInfo, NodeExecution, ResponseMap, Status,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Start,
    Resume,
    Advise,
    Facilitate,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Start => "START",
            EventType::Resume => "RESUME",
            EventType::Advise => "ADVISE",
            EventType::Facilitate => "FACILITATE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Start {
        facilitator_response: FacilitatorResponse,
        resolved_parameters: Value,
    },
    Resume {
        responses: ResponseMap,
        async_error: bool,
    },
    Advise {
        to_status: Status,
        failure_info: Option<FailureInfo>,
        /// Adviser types left out of this round
        skip_adviser_types: Vec<String>,
    },
    Facilitate {
        resolved_parameters: Value,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Start { .. } => EventType::Start,
            EventPayload::Resume { .. } => EventType::Resume,
            EventPayload::Advise { .. } => EventType::Advise,
            EventPayload::Facilitate { .. } => EventType::Facilitate,
        }
    }
}

/// An event together with the node snapshot it was raised for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub id: String,
    pub event_type: EventType,
    pub node_execution: NodeExecution,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl OrchestrationEvent {
    pub fn new(node_execution: &NodeExecution, payload: EventPayload) -> Self {
        Self {
            id: new_id(),
            event_type: payload.event_type(),
            node_execution: node_execution.clone(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn node_execution_id(&self) -> &str {
        &self.node_execution.uuid
    }
}

/// Publishing side of the event channel.
#[derive(Clone)]
pub struct EventChannel {
    tx: mpsc::UnboundedSender<OrchestrationEvent>,
    log: Arc<Mutex<Vec<OrchestrationEvent>>>,
}

/// Consuming side; owned by the dispatcher task.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<OrchestrationEvent>,
    seen: HashSet<String>,
}

impl EventChannel {
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            tx,
            log: Arc::new(Mutex::new(Vec::new())),
        };
        let receiver = EventReceiver {
            rx,
            seen: HashSet::new(),
        };
        (channel, receiver)
    }

    pub fn publish(&self, event: OrchestrationEvent) -> Result<()> {
        debug!(
            "Publishing {} event {} for node execution {}",
            event.event_type,
            event.id,
            event.node_execution_id()
        );
        match self.log.lock() {
            Ok(mut log) => log.push(event.clone()),
            Err(_) => warn!("Event log lock poisoned; event {} not logged", event.id),
        }
        self.tx.send(event).map_err(|_| EngineError::ChannelClosed)
    }

    /// Copy of every event published so far, in publish order.
    pub fn published(&self) -> Vec<OrchestrationEvent> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

impl EventReceiver {
    /// Next event not delivered before; `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<OrchestrationEvent> {
        while let Some(event) = self.rx.recv().await {
            if self.seen.insert(event.id.clone()) {
                return Some(event);
            }
            debug!("Dropping duplicate event {}", event.id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionMetadata, Level, Plan, PlanExecution, PlanNode};
    use std::collections::BTreeMap;

    fn node_execution() -> NodeExecution {
        let node = PlanNode::new("a", "NOOP");
        let plan = Plan::new("a").with_node(node.clone());
        let execution = PlanExecution::new(plan, BTreeMap::new(), ExecutionMetadata::default());
        let ambiance = execution.ambiance().with_level(Level::for_node("ne-1", &node));
        NodeExecution::new("ne-1", &node, ambiance)
    }

    fn advise_event() -> OrchestrationEvent {
        OrchestrationEvent::new(
            &node_execution(),
            EventPayload::Advise {
                to_status: Status::Failed,
                failure_info: None,
                skip_adviser_types: Vec::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let (channel, mut receiver) = EventChannel::new();
        let event = advise_event();
        channel.publish(event.clone()).unwrap();

        let received = receiver.next().await.unwrap();
        assert_eq!(received.id, event.id);
        assert_eq!(received.event_type, EventType::Advise);
        assert_eq!(channel.published().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_events_delivered_once() {
        let (channel, mut receiver) = EventChannel::new();
        let event = advise_event();
        let other = advise_event();
        channel.publish(event.clone()).unwrap();
        channel.publish(event.clone()).unwrap();
        channel.publish(other.clone()).unwrap();
        drop(channel);

        assert_eq!(receiver.next().await.unwrap().id, event.id);
        assert_eq!(receiver.next().await.unwrap().id, other.id);
        assert!(receiver.next().await.is_none());
    }
}
