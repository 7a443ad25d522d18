//! Monitoring Module
//!
//! Execution timeline of node status transitions.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Per-node transition history and Gantt charts

pub mod timeline;

pub use timeline::{ExecutionTimeline, TimelineEvent};
