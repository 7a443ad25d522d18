//! Built-in Steps
//!
//! Infrastructure step types every registry starts with:
//!
//! - `NOOP`: succeeds at once, publishing its `outcomes` parameter
//! - `SHELL`: runs a bash command ([`shell`])
//! - `FORK`: fans out to several nodes ([`fork`])
//! - `SECTION`: runs one child chain ([`section`])
//! - `DELEGATE`: hands work to the task executor ([`delegate`])

pub mod delegate;
pub mod fork;
pub mod section;
pub mod shell;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::model::StepResponse;
use crate::orchestration::processor::{Executable, StartResponse, StepContext};
use crate::task::TaskHandler;

pub use delegate::DelegateStep;
pub use fork::ForkStep;
pub use section::SectionStep;
pub use shell::{run_shell, ShellOutput, ShellParameters, ShellStep, ShellTask};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NoopParameters {
    outcomes: BTreeMap<String, Value>,
}

pub struct NoopStep;

impl Executable for NoopStep {
    fn start(&self, ctx: &StepContext) -> Result<StartResponse> {
        let params: NoopParameters = ctx.parameters_as()?;
        let mut response = StepResponse::succeeded();
        response.outcomes = params.outcomes;
        Ok(StartResponse::Completed(response))
    }
}

pub fn builtin_executables() -> Vec<(&'static str, Arc<dyn Executable>)> {
    vec![
        ("NOOP", Arc::new(NoopStep) as Arc<dyn Executable>),
        ("SHELL", Arc::new(ShellStep) as Arc<dyn Executable>),
        ("FORK", Arc::new(ForkStep) as Arc<dyn Executable>),
        ("SECTION", Arc::new(SectionStep) as Arc<dyn Executable>),
        ("DELEGATE", Arc::new(DelegateStep) as Arc<dyn Executable>),
    ]
}

pub fn builtin_task_handlers() -> Vec<(&'static str, Arc<dyn TaskHandler>)> {
    vec![("SHELL", Arc::new(ShellTask) as Arc<dyn TaskHandler>)]
}
