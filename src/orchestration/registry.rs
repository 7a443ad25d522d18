//! Extension Registry
//!
//! Maps type names used in plans to the code that implements them:
//! executables by step type, facilitators, advisers and task handlers.
//! Built once at startup and shared read-only by the engine.

use std::collections::HashMap;
use std::sync::Arc;

use super::advisers::{builtin_advisers, Adviser};
use super::facilitation::{builtin_facilitators, Facilitator};
use super::processor::Executable;
use crate::error::{EngineError, Result};
use crate::model::PlanNode;
use crate::steps;
use crate::task::TaskHandler;

#[derive(Clone, Default)]
pub struct Registry {
    executables: HashMap<String, Arc<dyn Executable>>,
    facilitators: HashMap<String, Arc<dyn Facilitator>>,
    advisers: HashMap<String, Arc<dyn Adviser>>,
    task_handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in step, facilitator, adviser and
    /// task handler.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, facilitator) in builtin_facilitators() {
            registry.register_facilitator(name, facilitator);
        }
        for (name, adviser) in builtin_advisers() {
            registry.register_adviser(name, adviser);
        }
        for (name, executable) in steps::builtin_executables() {
            registry.register_executable(name, executable);
        }
        for (name, handler) in steps::builtin_task_handlers() {
            registry.register_task_handler(name, handler);
        }
        registry
    }

    pub fn register_executable(
        &mut self,
        step_type: impl Into<String>,
        executable: Arc<dyn Executable>,
    ) -> &mut Self {
        self.executables.insert(step_type.into(), executable);
        self
    }

    pub fn register_facilitator(
        &mut self,
        facilitator_type: impl Into<String>,
        facilitator: Arc<dyn Facilitator>,
    ) -> &mut Self {
        self.facilitators.insert(facilitator_type.into(), facilitator);
        self
    }

    pub fn register_adviser(
        &mut self,
        adviser_type: impl Into<String>,
        adviser: Arc<dyn Adviser>,
    ) -> &mut Self {
        self.advisers.insert(adviser_type.into(), adviser);
        self
    }

    pub fn register_task_handler(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> &mut Self {
        self.task_handlers.insert(task_type.into(), handler);
        self
    }

    pub fn with_executable(
        mut self,
        step_type: impl Into<String>,
        executable: Arc<dyn Executable>,
    ) -> Self {
        self.register_executable(step_type, executable);
        self
    }

    pub fn with_facilitator(
        mut self,
        facilitator_type: impl Into<String>,
        facilitator: Arc<dyn Facilitator>,
    ) -> Self {
        self.register_facilitator(facilitator_type, facilitator);
        self
    }

    pub fn with_adviser(mut self, adviser_type: impl Into<String>, adviser: Arc<dyn Adviser>) -> Self {
        self.register_adviser(adviser_type, adviser);
        self
    }

    pub fn with_task_handler(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.register_task_handler(task_type, handler);
        self
    }

    pub fn executable(&self, step_type: &str) -> Result<Arc<dyn Executable>> {
        self.executables
            .get(step_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStepType(step_type.to_string()))
    }

    pub fn facilitator(&self, facilitator_type: &str) -> Result<Arc<dyn Facilitator>> {
        self.facilitators
            .get(facilitator_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownFacilitator(facilitator_type.to_string()))
    }

    pub fn adviser(&self, adviser_type: &str) -> Result<Arc<dyn Adviser>> {
        self.advisers
            .get(adviser_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAdviser(adviser_type.to_string()))
    }

    pub fn task_handlers(&self) -> HashMap<String, Arc<dyn TaskHandler>> {
        self.task_handlers.clone()
    }

    pub fn has_executable(&self, step_type: &str) -> bool {
        self.executables.contains_key(step_type)
    }

    pub fn has_facilitator(&self, facilitator_type: &str) -> bool {
        self.facilitators.contains_key(facilitator_type)
    }

    pub fn has_adviser(&self, adviser_type: &str) -> bool {
        self.advisers.contains_key(adviser_type)
    }

    /// Registered step types, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executables.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// True when any of the node's facilitators must run out of band.
    pub fn requires_async_facilitation(&self, node: &PlanNode) -> bool {
        node.facilitators.iter().any(|obtainment| {
            self.facilitators
                .get(&obtainment.facilitator_type)
                .map(|f| f.is_custom())
                .unwrap_or(false)
        })
    }
}
