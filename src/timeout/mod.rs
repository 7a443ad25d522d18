//! Timeout Engine
//!
//! Durable timers bound to node executions. Each instance is persisted
//! in the store and armed as a tokio timer. State changes are
//! compare-and-set, so a timer that fires after its node concluded (and
//! had its timers cancelled) does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::model::{TimeoutInstance, TimeoutState};
use crate::store::ExecutionStore;

/// Called with the instance id when a timer elapses.
pub type ExpiryCallback = Box<dyn FnOnce(String) + Send + 'static>;

pub struct TimeoutEngine {
    store: Arc<dyn ExecutionStore>,
    handle: Handle,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimeoutEngine {
    pub fn new(store: Arc<dyn ExecutionStore>, handle: Handle) -> Self {
        Self {
            store,
            handle,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Persists a new instance and arms its timer.
    pub fn register(&self, instance: TimeoutInstance, on_expiry: ExpiryCallback) -> Result<String> {
        self.store.insert_timeout(instance.clone())?;
        let id = instance.uuid.clone();
        self.arm(&instance, on_expiry);
        debug!(
            "Registered {} ms timeout {} for node execution {}",
            instance.timeout_ms, id, instance.node_execution_id
        );
        Ok(id)
    }

    /// Arms a timer for an instance that is already persisted.
    pub fn arm(&self, instance: &TimeoutInstance, on_expiry: ExpiryCallback) {
        let id = instance.uuid.clone();
        let delay = instance.remaining();
        let timer_id = id.clone();
        let timer = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            on_expiry(timer_id);
        });

        match self.timers.lock() {
            Ok(mut timers) => {
                timers.insert(id, timer);
            }
            Err(_) => warn!("Timer table lock poisoned; timer {} cannot be aborted early", id),
        }
    }

    /// Marks an active instance as fired.
    ///
    /// Returns the instance only for the caller that won the transition.
    pub fn fire(&self, instance_id: &str) -> Result<Option<TimeoutInstance>> {
        self.forget(instance_id);
        let fired = self.store.update_timeout_state(
            instance_id,
            TimeoutState::Active,
            TimeoutState::Fired,
        )?;
        if !fired {
            debug!("Timeout {} no longer active", instance_id);
            return Ok(None);
        }
        Ok(Some(self.store.timeout(instance_id)?))
    }

    /// Cancels instances that have not fired yet.
    pub fn cancel(&self, instance_ids: &[String]) -> Result<()> {
        for id in instance_ids {
            if let Some(timer) = self.forget(id) {
                timer.abort();
            }
            if self
                .store
                .update_timeout_state(id, TimeoutState::Active, TimeoutState::Cancelled)?
            {
                debug!("Cancelled timeout {}", id);
            }
        }
        Ok(())
    }

    pub fn armed(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn forget(&self, instance_id: &str) -> Option<JoinHandle<()>> {
        self.timers
            .lock()
            .ok()
            .and_then(|mut timers| timers.remove(instance_id))
    }
}
