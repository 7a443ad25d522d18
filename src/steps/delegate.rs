//! Delegate Step
//!
//! Hands its parameters to the task executor and publishes the task's
//! result as the `result` outcome.
//!
//! ```yaml
//! - id: package
//!   step_type: DELEGATE
//!   step_parameters:
//!     task_type: SHELL
//!     timeout_ms: 60000
//!     parameters:
//!       command: tar czf app.tgz dist/
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::model::{ExecutionMode, FailureType, ResponseData, ResponseMap, StepResponse};
use crate::orchestration::processor::{Executable, StartResponse, StepContext};
use crate::task::TaskSpec;

#[derive(Debug, Deserialize)]
struct DelegateParameters {
    task_type: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct DelegateStep;

impl Executable for DelegateStep {
    fn default_mode(&self) -> ExecutionMode {
        ExecutionMode::Task
    }

    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        let params: DelegateParameters = ctx.parameters_as()?;
        let mut spec = TaskSpec::new(params.task_type, params.parameters);
        spec.timeout_ms = params.timeout_ms;
        Ok(StartResponse::Task(spec))
    }

    fn resume(&self, ctx: &StepContext, responses: &ResponseMap) -> Result<StepResponse> {
        let result = responses.values().find_map(|data| match data {
            ResponseData::Task(result) => Some(result),
            _ => None,
        });
        Ok(match result {
            Some(result) => match &result.error {
                Some(error) => StepResponse::failed(error.clone(), FailureType::TaskDelegation),
                None => StepResponse::succeeded().with_outcome("result", result.data.clone()),
            },
            None => StepResponse::failed(
                format!("no task result for '{}'", ctx.identifier()),
                FailureType::TaskDelegation,
            ),
        })
    }
}
