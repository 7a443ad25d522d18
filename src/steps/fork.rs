//! Fork Step
//!
//! Fans out to a list of plan nodes and succeeds or fails with their
//! aggregate status.
//!
//! ```yaml
//! - id: tests
//!   step_type: FORK
//!   step_parameters:
//!     children: [unit, integration, lint]
//!     max_concurrency: 2
//! ```

use serde::Deserialize;

use crate::error::Result;
use crate::model::{ExecutionMode, StepResponse};
use crate::orchestration::processor::{Executable, StartResponse, StepContext};

#[derive(Debug, Deserialize)]
struct ForkParameters {
    children: Vec<String>,
    /// `0` starts every child at once
    #[serde(default)]
    max_concurrency: usize,
}

pub struct ForkStep;

impl Executable for ForkStep {
    fn default_mode(&self) -> ExecutionMode {
        ExecutionMode::Children
    }

    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        let params: ForkParameters = ctx.parameters_as()?;
        if params.children.is_empty() {
            return Ok(StartResponse::Completed(StepResponse::succeeded()));
        }
        Ok(StartResponse::Children {
            children: params.children,
            max_concurrency: params.max_concurrency,
        })
    }
}
