//! Plan Data Model
//!
//! A plan is an immutable set of nodes with one starting node. Edges
//! between nodes are not stored here: advisers and parent steps name the
//! nodes that run next.
//!
//! # Example YAML Format
//!
//! ```yaml
//! starting_node: build
//! nodes:
//!   - id: build
//!     step_type: SHELL
//!     step_parameters:
//!       command: make all
//!     facilitators: [SYNC]
//!     advisers:
//!       - type: RETRY
//!         parameters:
//!           retry_count: 2
//!       - type: ON_SUCCESS
//!         parameters:
//!           next_node: test
//!     timeouts:
//!       - timeout_ms: 600000
//!
//!   - id: test
//!     step_type: SHELL
//!     step_parameters:
//!       command: make test
//! ```

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::new_id;

/// Facilitator reference declared on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorObtainment {
    #[serde(rename = "type")]
    pub facilitator_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl From<String> for FacilitatorObtainment {
    fn from(facilitator_type: String) -> Self {
        Self {
            facilitator_type,
            parameters: Value::Null,
        }
    }
}

/// Adviser reference declared on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    #[serde(rename = "type")]
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl From<String> for AdviserObtainment {
    fn from(adviser_type: String) -> Self {
        Self {
            adviser_type,
            parameters: Value::Null,
        }
    }
}

/// Absolute timeout armed when the node starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutObtainment {
    pub timeout_ms: u64,
}

/// Deserializes a list whose entries are either a bare type name or a
/// full `{type, parameters}` mapping.
fn obtainments<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + From<String>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(vec![T::from(s)]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(T::from(s)),
                other @ Value::Object(_) => serde_json::from_value(other).map_err(de::Error::custom),
                _ => Err(de::Error::custom("Expected a type name or a mapping")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected a type name or a list")),
    }
}

/// A single unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Unique id used for references between nodes
    #[serde(rename = "id")]
    pub uuid: String,

    /// Human-facing name used in outcomes and logs; defaults to the id
    #[serde(default)]
    pub identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Key into the executable registry
    pub step_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Raw parameters; `${...}` expressions are resolved before the step starts
    #[serde(default)]
    pub step_parameters: Value,

    #[serde(default, deserialize_with = "obtainments")]
    pub facilitators: Vec<FacilitatorObtainment>,

    #[serde(default, deserialize_with = "obtainments")]
    pub advisers: Vec<AdviserObtainment>,

    #[serde(default)]
    pub timeouts: Vec<TimeoutObtainment>,

    /// Keep unresolvable expressions as literals instead of failing
    #[serde(default)]
    pub skip_unresolved_check: bool,

    /// Node runs only when this condition holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_condition: Option<String>,

    /// Node is skipped when this condition holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_condition: Option<String>,
}

impl PlanNode {
    /// Creates a node whose identifier equals its id.
    ///
    /// # Example
    ///
    /// ```
    /// use planrunner::model::PlanNode;
    ///
    /// let node = PlanNode::new("build", "SHELL")
    ///     .with_parameters(serde_json::json!({"command": "make"}))
    ///     .with_facilitator("SYNC")
    ///     .with_timeout(60_000);
    /// ```
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        let uuid = id.into().trim().to_string();
        Self {
            identifier: uuid.clone(),
            uuid,
            name: None,
            step_type: step_type.into().trim().to_string(),
            group: None,
            step_parameters: Value::Null,
            facilitators: Vec::new(),
            advisers: Vec::new(),
            timeouts: Vec::new(),
            skip_unresolved_check: false,
            when_condition: None,
            skip_condition: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_facilitator(mut self, facilitator_type: impl Into<String>) -> Self {
        self.facilitators
            .push(FacilitatorObtainment::from(facilitator_type.into()));
        self
    }

    pub fn with_facilitator_parameters(
        mut self,
        facilitator_type: impl Into<String>,
        parameters: Value,
    ) -> Self {
        self.facilitators.push(FacilitatorObtainment {
            facilitator_type: facilitator_type.into(),
            parameters,
        });
        self
    }

    pub fn with_adviser(mut self, adviser_type: impl Into<String>, parameters: Value) -> Self {
        self.advisers.push(AdviserObtainment {
            adviser_type: adviser_type.into(),
            parameters,
        });
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeouts.push(TimeoutObtainment { timeout_ms });
        self
    }

    pub fn with_when_condition(mut self, condition: impl Into<String>) -> Self {
        self.when_condition = Some(condition.into());
        self
    }

    pub fn with_skip_condition(mut self, condition: impl Into<String>) -> Self {
        self.skip_condition = Some(condition.into());
        self
    }

    pub fn skip_unresolved(mut self) -> Self {
        self.skip_unresolved_check = true;
        self
    }

    /// Ids of other nodes this node may hand control to.
    ///
    /// Collected from `next_node` adviser parameters and from the
    /// `children` and `child` step parameters of fork and section steps.
    pub fn references(&self) -> Vec<String> {
        let mut refs = Vec::new();

        for adviser in &self.advisers {
            if let Some(next) = adviser.parameters.get("next_node").and_then(Value::as_str) {
                refs.push(next.to_string());
            }
        }

        if let Some(children) = self.step_parameters.get("children").and_then(Value::as_array) {
            refs.extend(children.iter().filter_map(Value::as_str).map(String::from));
        }

        if let Some(child) = self.step_parameters.get("child").and_then(Value::as_str) {
            refs.push(child.to_string());
        }

        refs
    }
}

/// An immutable graph of plan nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "new_id")]
    pub uuid: String,

    #[serde(rename = "starting_node")]
    pub starting_node_id: String,

    pub nodes: Vec<PlanNode>,
}

impl Plan {
    pub fn new(starting_node_id: impl Into<String>) -> Self {
        Self {
            uuid: new_id(),
            starting_node_id: starting_node_id.into(),
            nodes: Vec::new(),
        }
    }

    /// Adds a node, rejecting duplicate ids.
    pub fn add_node(&mut self, node: PlanNode) -> Result<(), String> {
        if self.node(&node.uuid).is_some() {
            return Err(format!("Duplicate node id: {}", node.uuid));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Builder form of [`Plan::add_node`] for assembling plans in code.
    ///
    /// Duplicates are kept and reported later by plan validation.
    pub fn with_node(mut self, node: PlanNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.uuid == id)
    }

    pub fn starting_node(&self) -> Option<&PlanNode> {
        self.node(&self.starting_node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fills in identifiers left empty by the plan author.
    pub(crate) fn normalize(&mut self) {
        for node in &mut self.nodes {
            if node.identifier.trim().is_empty() {
                node.identifier = node.uuid.clone();
            }
        }
    }
}
