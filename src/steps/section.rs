//! Section Step
//!
//! Runs a single child chain (the child node and whatever its advisers
//! trigger after it) and takes the chain's final status.

use serde::Deserialize;

use crate::error::Result;
use crate::model::ExecutionMode;
use crate::orchestration::processor::{Executable, StartResponse, StepContext};

#[derive(Debug, Deserialize)]
struct SectionParameters {
    child: String,
}

pub struct SectionStep;

impl Executable for SectionStep {
    fn default_mode(&self) -> ExecutionMode {
        ExecutionMode::Child
    }

    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        let params: SectionParameters = ctx.parameters_as()?;
        Ok(StartResponse::Child {
            child_node_id: params.child,
        })
    }
}
