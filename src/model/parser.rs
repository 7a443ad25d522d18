//! Plan Parser
//!
//! Loads plan definitions from YAML files.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::plan::Plan;
use super::validator::validate_plan;
use crate::error::{EngineError, Result};

/// Parses a plan from YAML text and validates its structure.
///
/// Registry checks are left to the orchestration service, which knows
/// which steps, facilitators and advisers are available.
pub fn parse_plan(yaml_content: &str) -> Result<Plan> {
    let mut plan: Plan = serde_yaml::from_str(yaml_content).map_err(|e| {
        EngineError::InvalidPlan(format!(
            "Failed to parse plan YAML: {}. Check the file format.",
            e
        ))
    })?;

    plan.normalize();
    validate_plan(&plan, None)?;
    Ok(plan)
}

/// Loads a plan from a YAML file.
///
/// # Arguments
///
/// * `path` - Path to the plan YAML file
///
/// # Returns
///
/// * `Ok(Plan)` - Successfully loaded and validated plan
/// * `Err` - Read, parse or validation error
///
/// # Example
///
/// ```rust,no_run
/// use planrunner::model::load_plan;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let plan = load_plan("pipeline.yaml")?;
///     println!("Loaded {} nodes", plan.len());
///     Ok(())
/// }
/// ```
pub fn load_plan<P: AsRef<Path>>(path: P) -> Result<Plan> {
    let path = path.as_ref();
    info!("Loading plan from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        EngineError::InvalidPlan(format!(
            "Failed to read plan file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let plan = parse_plan(&yaml_content)?;
    info!("Plan loaded: {} nodes, starting at '{}'", plan.len(), plan.starting_node_id);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PLAN: &str = r#"
starting_node: build
nodes:
  - id: build
    step_type: SHELL
    step_parameters:
      command: echo building
    advisers:
      - type: ON_SUCCESS
        parameters:
          next_node: test
  - id: test
    identifier: unit_tests
    step_type: SHELL
    step_parameters:
      command: echo testing
    timeouts:
      - timeout_ms: 5000
"#;

    #[test]
    fn test_parse_plan() {
        let plan = parse_plan(PLAN).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.starting_node_id, "build");
        assert_eq!(plan.node("build").unwrap().identifier, "build");
        assert_eq!(plan.node("test").unwrap().identifier, "unit_tests");
        assert_eq!(plan.node("test").unwrap().timeouts[0].timeout_ms, 5000);
        assert!(!plan.uuid.is_empty());
    }

    #[test]
    fn test_load_plan_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", PLAN).unwrap();

        let plan = load_plan(file.path()).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_plan("nodes: [unclosed");
        assert!(matches!(result, Err(EngineError::InvalidPlan(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_plan("/nonexistent/plan.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read plan file"));
    }
}
