//! Fan-out / Fan-in
//!
//! A parent spawns child node executions, each with its own notify id,
//! and waits on all of them with a single wait. With `max_concurrency`
//! set, the remaining children are parked on the parent record and one
//! is released each time a child chain finishes.

use log::{debug, info};

use super::engine::OrchestrationEngine;
use crate::error::{EngineError, Result};
use crate::model::{new_id, NodeExecution, Status};
use crate::waitnotify::NotifyCallback;

pub(crate) fn spawn_children(
    engine: &OrchestrationEngine,
    parent: &NodeExecution,
    child_node_ids: &[String],
    max_concurrency: usize,
) -> Result<()> {
    let plan = engine.plan_for(parent)?;
    let mut children = Vec::with_capacity(child_node_ids.len());
    for node_id in child_node_ids {
        let node = plan
            .node(node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.clone()))?;
        children.push(NodeExecution::child_of(parent, new_id(), node, new_id()));
    }

    let limit = match max_concurrency {
        0 => children.len(),
        n => n.min(children.len()),
    };
    let notify_ids: Vec<String> = children.iter().filter_map(|c| c.notify_id.clone()).collect();
    let held: Vec<String> = children[limit..].iter().map(|c| c.uuid.clone()).collect();

    let parked = engine.update_node(&parent.uuid, &[Status::Running], |ne| {
        ne.status = Status::AsyncWaiting;
        ne.callback_ids = notify_ids.clone();
        ne.pending_children = held.clone();
    })?;
    if parked.is_none() {
        debug!("Parent '{}' no longer running; children not spawned", parent.identifier);
        return Ok(());
    }

    for child in &children {
        engine.create_node(child.clone())?;
    }
    info!(
        "Node '{}' spawned {} children ({} running)",
        parent.identifier,
        children.len(),
        limit
    );

    engine.wait_for_all(
        notify_ids,
        NotifyCallback::Resume {
            node_execution_id: parent.uuid.clone(),
        },
    )?;
    for child in children.iter().take(limit) {
        engine.dispatch_node(&child.uuid)?;
    }
    Ok(())
}

/// Releases the next held-back child of `parent_id`, if any.
pub(crate) fn start_next_pending(engine: &OrchestrationEngine, parent_id: &str) -> Result<()> {
    let mut next = None;
    engine.update_node(parent_id, &[Status::AsyncWaiting], |ne| {
        next = if ne.pending_children.is_empty() {
            None
        } else {
            Some(ne.pending_children.remove(0))
        };
    })?;

    if let Some(child_id) = next {
        debug!("Releasing held child {} of {}", child_id, parent_id);
        engine.dispatch_node(&child_id)?;
    }
    Ok(())
}
