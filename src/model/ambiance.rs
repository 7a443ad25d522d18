//! Execution Context
//!
//! The ambiance travels with every node execution. Its levels record the
//! path from the root of the plan execution down to the current node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::plan::PlanNode;

/// One frame of the execution path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Node execution id at this depth
    pub runtime_id: String,
    /// Plan node id at this depth
    pub node_id: String,
    pub identifier: String,
    pub step_type: String,
    pub group: Option<String>,
}

impl Level {
    pub fn for_node(runtime_id: &str, node: &PlanNode) -> Self {
        Self {
            runtime_id: runtime_id.to_string(),
            node_id: node.uuid.clone(),
            identifier: node.identifier.clone(),
            step_type: node.step_type.clone(),
            group: node.group.clone(),
        }
    }
}

/// Whether a run executes normally or replays a previous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    #[default]
    Normal,
    Rerun,
}

/// What started a plan execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    #[default]
    Manual,
    Webhook,
    Scheduled,
    Rerun,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub trigger_type: TriggerType,
    pub triggered_by: String,
    /// Plan execution this run repeats, for reruns
    #[serde(default)]
    pub rerun_of: Option<String>,
}

impl TriggerInfo {
    pub fn manual(triggered_by: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            triggered_by: triggered_by.into(),
            rerun_of: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub run_sequence: u64,
    pub trigger_info: TriggerInfo,
    pub run_mode: RunMode,
}

/// Context of a single node execution within a plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: String,
    pub levels: Vec<Level>,
    /// Tenant-like key/value pairs fixed for the whole plan execution
    pub setup_abstractions: BTreeMap<String, String>,
    pub metadata: ExecutionMetadata,
}

impl Ambiance {
    pub fn new(
        plan_execution_id: impl Into<String>,
        setup_abstractions: BTreeMap<String, String>,
        metadata: ExecutionMetadata,
    ) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            levels: Vec::new(),
            setup_abstractions,
            metadata,
        }
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Node execution this ambiance belongs to, if any.
    pub fn node_execution_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.runtime_id.as_str())
    }

    pub fn setup(&self, key: &str) -> Option<&str> {
        self.setup_abstractions.get(key).map(String::as_str)
    }

    /// Descends one level, used for the starting node and for children.
    pub fn with_level(&self, level: Level) -> Self {
        let mut ambiance = self.clone();
        ambiance.levels.push(level);
        ambiance
    }

    /// Replaces the current level, used for chained and retried nodes.
    pub fn with_sibling_level(&self, level: Level) -> Self {
        let mut ambiance = self.clone();
        ambiance.levels.pop();
        ambiance.levels.push(level);
        ambiance
    }

    /// Returns true if the given node execution is this one or an ancestor.
    pub fn descends_from(&self, node_execution_id: &str) -> bool {
        self.levels.iter().any(|l| l.runtime_id == node_execution_id)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}
