//! Events
//!
//! - [`channel`]: internal work events consumed by engine listeners
//! - [`signals`]: broadcast lifecycle signals for outside observers

pub mod channel;
pub mod signals;

pub use channel::{EventChannel, EventPayload, EventReceiver, EventType, OrchestrationEvent};
pub use signals::{OrchestrationSignal, SignalBus};
