//! Lifecycle Signals
//!
//! Broadcast notifications for observers outside the engine: plan
//! start, node status changes and plan end. Exactly one `PlanEnded` is
//! published per plan execution.

use tokio::sync::broadcast;

use crate::model::Status;

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationSignal {
    PlanStarted {
        plan_execution_id: String,
    },
    NodeStatusChanged {
        plan_execution_id: String,
        node_execution_id: String,
        identifier: String,
        status: Status,
    },
    PlanEnded {
        plan_execution_id: String,
        status: Status,
    },
}

/// Signal bus using tokio broadcast channel.
/// All subscribers receive all signals.
pub struct SignalBus {
    tx: broadcast::Sender<OrchestrationSignal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, signal: OrchestrationSignal) {
        // Ignore error if no receivers
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationSignal> {
        self.tx.subscribe()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(256)
    }
}
