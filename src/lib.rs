//! PlanRunner - Durable Plan Execution Engine
//!
//! Runs plans: graphs of typed steps connected by hand-offs, fan-outs
//! and sections. Every node execution is a persisted record that moves
//! through guarded status transitions, so concurrent events, late timers
//! and operator interrupts never corrupt a run.
//!
//! # Architecture
//!
//! - [`model`]: Plans, execution records, statuses and responses
//! - [`orchestration`]: The engine, its extension points and the public service
//! - [`store`]: Execution records with guarded updates and snapshots
//! - [`waitnotify`]: Correlation-id waits that resume parked nodes
//! - [`events`]: Engine event channel and lifecycle signals
//! - [`interrupt`]: Abort, pause, resume and manual intervention
//! - [`timeout`]: Durable node and intervention timers
//! - [`expression`]: `${...}` resolution in parameters and conditions
//! - [`task`]: Delegating work to a task executor
//! - [`steps`]: Built-in step types
//! - [`monitoring`]: Execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! use planrunner::model::TriggerInfo;
//! use planrunner::{load_plan, EngineConfig, OrchestrationService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plan = load_plan("pipeline.yaml")?;
//!     let service = OrchestrationService::new(EngineConfig::default())?;
//!
//!     let handle = service.start_execution(plan, BTreeMap::new(), TriggerInfo::manual("ops"))?;
//!     let finished = service
//!         .wait_for_completion(&handle.plan_execution_id, Duration::from_secs(600))
//!         .await?;
//!     println!("Plan finished: {}", finished.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod expression;
pub mod interrupt;
pub mod model;
pub mod monitoring;
pub mod orchestration;
pub mod steps;
pub mod store;
pub mod task;
pub mod timeout;
pub mod waitnotify;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use model::{load_plan, Plan, PlanNode, Status};
pub use orchestration::{OrchestrationService, Registry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "PlanRunner";
