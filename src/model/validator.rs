//! Plan Validation
//!
//! Checks a plan before it is executed:
//! - Node field validation
//! - Reference integrity for next nodes and children
//! - No cycles in the hand-off graph
//! - Step, facilitator and adviser types are registered

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info, warn};

use super::plan::{Plan, PlanNode};
use crate::error::{EngineError, Result};
use crate::orchestration::Registry;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyPlan,
    DuplicateNodeId(String),
    EmptyNodeId,
    EmptyStepType(String),
    MissingStartingNode(String),
    InvalidReference { node: String, reference: String },
    CyclicReference,
    UnknownStepType { node: String, step_type: String },
    UnknownFacilitator { node: String, facilitator: String },
    UnknownAdviser { node: String, adviser: String },
    ZeroTimeout(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPlan => write!(f, "Plan has no nodes"),
            Self::DuplicateNodeId(id) => write!(f, "Duplicate node ID: '{}'", id),
            Self::EmptyNodeId => write!(f, "Node has empty or whitespace-only ID"),
            Self::EmptyStepType(node) => write!(f, "Node '{}' has no step type", node),
            Self::MissingStartingNode(id) => {
                write!(f, "Starting node '{}' is not part of the plan", id)
            }
            Self::InvalidReference { node, reference } => {
                write!(f, "Node '{}' references unknown node '{}'", node, reference)
            }
            Self::CyclicReference => {
                write!(f, "Plan contains a cycle (nodes hand off to each other in a loop)")
            }
            Self::UnknownStepType { node, step_type } => {
                write!(f, "Node '{}' uses unregistered step type '{}'", node, step_type)
            }
            Self::UnknownFacilitator { node, facilitator } => {
                write!(f, "Node '{}' uses unregistered facilitator '{}'", node, facilitator)
            }
            Self::UnknownAdviser { node, adviser } => {
                write!(f, "Node '{}' uses unregistered adviser '{}'", node, adviser)
            }
            Self::ZeroTimeout(node) => write!(f, "Node '{}' declares a zero timeout", node),
        }
    }
}

/// Validates a single node's fields.
fn validate_node(node: &PlanNode, registry: Option<&Registry>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if node.uuid.trim().is_empty() {
        errors.push(ValidationError::EmptyNodeId);
        return errors;
    }

    if node.step_type.trim().is_empty() {
        errors.push(ValidationError::EmptyStepType(node.uuid.clone()));
    }

    if node.timeouts.iter().any(|t| t.timeout_ms == 0) {
        errors.push(ValidationError::ZeroTimeout(node.uuid.clone()));
    }

    if node.facilitators.is_empty() {
        debug!("Node '{}' has no facilitators, defaulting to SYNC", node.uuid);
    }

    if let Some(registry) = registry {
        if !node.step_type.is_empty() && !registry.has_executable(&node.step_type) {
            errors.push(ValidationError::UnknownStepType {
                node: node.uuid.clone(),
                step_type: node.step_type.clone(),
            });
        }
        for obtainment in &node.facilitators {
            if !registry.has_facilitator(&obtainment.facilitator_type) {
                errors.push(ValidationError::UnknownFacilitator {
                    node: node.uuid.clone(),
                    facilitator: obtainment.facilitator_type.clone(),
                });
            }
        }
        for obtainment in &node.advisers {
            if !registry.has_adviser(&obtainment.adviser_type) {
                errors.push(ValidationError::UnknownAdviser {
                    node: node.uuid.clone(),
                    adviser: obtainment.adviser_type.clone(),
                });
            }
        }
    }

    errors
}

/// Validates the entire plan structure.
///
/// Performs the following checks:
/// 1. Plan is not empty
/// 2. No duplicate node IDs
/// 3. All nodes have valid fields
/// 4. The starting node and every reference point to existing nodes
/// 5. No cycles between nodes
///
/// Registry checks are skipped when no registry is given.
pub fn validate_plan(plan: &Plan, registry: Option<&Registry>) -> Result<()> {
    info!("Validating plan with {} nodes", plan.len());

    if plan.is_empty() {
        return Err(EngineError::InvalidPlan(ValidationError::EmptyPlan.to_string()));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &plan.nodes {
        if !seen_ids.insert(node.uuid.as_str()) {
            return Err(EngineError::InvalidPlan(
                ValidationError::DuplicateNodeId(node.uuid.clone()).to_string(),
            ));
        }
    }

    let mut all_errors = Vec::new();

    if !seen_ids.contains(plan.starting_node_id.as_str()) {
        all_errors.push(ValidationError::MissingStartingNode(
            plan.starting_node_id.clone(),
        ));
    }

    for node in &plan.nodes {
        all_errors.extend(validate_node(node, registry));

        for reference in node.references() {
            if !seen_ids.contains(reference.as_str()) {
                all_errors.push(ValidationError::InvalidReference {
                    node: node.uuid.clone(),
                    reference,
                });
            }
        }
    }

    if !all_errors.is_empty() {
        let error_messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(EngineError::InvalidPlan(error_messages.join("\n")));
    }

    check_acyclic(plan)?;
    warn_unreachable(plan);

    info!("Plan validated: {} nodes", plan.len());
    Ok(())
}

/// Detects cycles in the hand-off graph using Kahn's algorithm.
fn check_acyclic(plan: &Plan) -> Result<()> {
    let mut in_degree: HashMap<&str, usize> =
        plan.nodes.iter().map(|n| (n.uuid.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<String>> = HashMap::new();

    for node in &plan.nodes {
        let refs = node.references();
        for reference in &refs {
            if let Some(degree) = in_degree.get_mut(reference.as_str()) {
                *degree += 1;
            }
        }
        successors.insert(node.uuid.as_str(), refs);
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut visited = 0;
    while let Some(current) = queue.pop_front() {
        visited += 1;
        for successor in successors.get(current).into_iter().flatten() {
            if let Some((id, degree)) = in_degree.get_key_value(successor.as_str()) {
                let id = *id;
                let remaining = degree.saturating_sub(1);
                in_degree.insert(id, remaining);
                if remaining == 0 {
                    queue.push_back(id);
                }
            }
        }
    }

    if visited != plan.len() {
        return Err(EngineError::InvalidPlan(
            ValidationError::CyclicReference.to_string(),
        ));
    }
    Ok(())
}

/// Logs nodes that nothing can ever start.
fn warn_unreachable(plan: &Plan) {
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(plan.starting_node_id.as_str());

    while let Some(current) = queue.pop_front() {
        if !reachable.insert(current) {
            continue;
        }
        if let Some(node) = plan.node(current) {
            for reference in node.references() {
                if let Some(next) = plan.node(&reference) {
                    queue.push_back(next.uuid.as_str());
                }
            }
        }
    }

    for node in &plan.nodes {
        if !reachable.contains(node.uuid.as_str()) {
            warn!("Node '{}' is not reachable from the starting node", node.uuid);
        }
    }
}
