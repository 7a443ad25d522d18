//! Event Listeners
//!
//! One typed handler per event type. The dispatcher runs each handler on
//! the worker pool; an `Err` goes to the engine's error boundary.

use std::collections::HashMap;
use std::sync::Arc;

use super::advisers::AdviseListener;
use super::engine::OrchestrationEngine;
use super::facilitation::FacilitateListener;
use super::processor::{ResumeListener, StartListener};
use crate::error::Result;
use crate::events::{EventType, OrchestrationEvent};

pub trait EventListener: Send + Sync {
    fn on_event(&self, engine: &OrchestrationEngine, event: OrchestrationEvent) -> Result<()>;
}

pub fn default_listeners() -> HashMap<EventType, Arc<dyn EventListener>> {
    let mut listeners: HashMap<EventType, Arc<dyn EventListener>> = HashMap::new();
    listeners.insert(EventType::Start, Arc::new(StartListener));
    listeners.insert(EventType::Resume, Arc::new(ResumeListener));
    listeners.insert(EventType::Advise, Arc::new(AdviseListener));
    listeners.insert(EventType::Facilitate, Arc::new(FacilitateListener));
    listeners
}
