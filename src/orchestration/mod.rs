//! Orchestration
//!
//! The engine that moves node executions through their lifecycle, and
//! the extension points it calls into.
//!
//! # Components
//!
//! - [`engine`]: Lifecycle transitions and the error boundary
//! - `advise`: Applying adviser decisions
//! - [`facilitation`] / [`advisers`] / [`processor`]: Extension traits and built-ins
//! - `children`: Fan-out and fan-in
//! - [`registry`]: Type name to implementation lookup
//! - [`pool`]: Bounded worker pool
//! - [`service`]: Public entry point

mod advise;
pub mod advisers;
mod children;
pub mod engine;
pub mod facilitation;
pub mod listeners;
pub mod pool;
pub mod processor;
pub mod registry;
pub mod service;

pub use advisers::{obtain_advice, Adviser, AdvisingContext};
pub use engine::{EngineParts, OrchestrationEngine};
pub use facilitation::{FacilitationContext, Facilitator, ModeFacilitator};
pub use listeners::EventListener;
pub use pool::WorkerPool;
pub use processor::{aggregate_children, Executable, StartResponse, StepContext};
pub use registry::Registry;
pub use service::{OrchestrationService, PlanExecutionHandle, RecoveryReport, ServiceBuilder};
