//! Wait-Notify
//!
//! Correlation-id based rendezvous between a waiter and whoever produces
//! the result. A waiter registers a set of correlation ids with a
//! callback; producers complete ids with a payload. When the last id of a
//! wait is completed the registry hands back a [`Notification`] for the
//! engine to dispatch.
//!
//! Completions that arrive before the wait is registered are kept, so a
//! fast producer never loses a wakeup. Once every wait on an id has taken
//! its response the payload is dropped and only the id is remembered, so
//! completing it again is ignored.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{new_id, ResponseData, ResponseMap};
use crate::store::snapshot::{load_snapshot, save_snapshot};

/// What to do when a wait completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotifyCallback {
    /// Async callbacks, children or a task finished
    Resume { node_execution_id: String },
    /// A custom facilitator answered
    Facilitation { node_execution_id: String },
    /// The adviser chain answered
    Advise { node_execution_id: String },
    /// An initial wait elapsed
    Invoke { node_execution_id: String },
    /// A retry wait interval elapsed
    RetryWake { node_execution_id: String },
}

impl NotifyCallback {
    pub fn node_execution_id(&self) -> &str {
        match self {
            NotifyCallback::Resume { node_execution_id }
            | NotifyCallback::Facilitation { node_execution_id }
            | NotifyCallback::Advise { node_execution_id }
            | NotifyCallback::Invoke { node_execution_id }
            | NotifyCallback::RetryWake { node_execution_id } => node_execution_id,
        }
    }
}

/// A completed wait, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub wait_id: String,
    pub callback: NotifyCallback,
    pub responses: ResponseMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WaitInstance {
    correlation_ids: Vec<String>,
    callback: NotifyCallback,
    created_at: DateTime<Utc>,
}

/// Consumed correlation ids remembered to reject duplicate completions.
const CONSUMED_MARKERS: usize = 4096;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct WaitState {
    /// Completed ids whose payload has not been taken yet
    responses: HashMap<String, ResponseData>,
    waits: HashMap<String, WaitInstance>,
    /// correlation id -> waits still interested in it
    by_correlation: HashMap<String, Vec<String>>,
    consumed: HashSet<String>,
    /// Oldest first
    consumed_order: VecDeque<String>,
}

impl WaitState {
    fn ready(&self, wait: &WaitInstance) -> bool {
        wait.correlation_ids
            .iter()
            .all(|id| self.responses.contains_key(id))
    }

    fn is_completed(&self, correlation_id: &str) -> bool {
        self.responses.contains_key(correlation_id) || self.consumed.contains(correlation_id)
    }

    /// Drops the payload of an id nobody waits on any more.
    fn consume(&mut self, correlation_id: &str) -> Option<ResponseData> {
        let data = self.responses.remove(correlation_id)?;
        if self.consumed.insert(correlation_id.to_string()) {
            self.consumed_order.push_back(correlation_id.to_string());
        }
        while self.consumed_order.len() > CONSUMED_MARKERS {
            if let Some(oldest) = self.consumed_order.pop_front() {
                self.consumed.remove(&oldest);
            }
        }
        Some(data)
    }

    /// Removes a finished wait and collects its responses.
    fn take(&mut self, wait_id: &str) -> Option<Notification> {
        let wait = self.waits.remove(wait_id)?;
        let mut responses = ResponseMap::new();
        for id in &wait.correlation_ids {
            let mut last_waiter = true;
            if let Some(waiters) = self.by_correlation.get_mut(id) {
                waiters.retain(|w| w != wait_id);
                last_waiter = waiters.is_empty();
                if last_waiter {
                    self.by_correlation.remove(id);
                }
            }
            let data = if last_waiter {
                self.consume(id)
            } else {
                self.responses.get(id).cloned()
            };
            if let Some(data) = data {
                responses.insert(id.clone(), data);
            }
        }
        Some(Notification {
            wait_id: wait_id.to_string(),
            callback: wait.callback,
            responses,
        })
    }
}

pub struct WaitNotifyRegistry {
    state: Mutex<WaitState>,
    snapshot: Option<PathBuf>,
}

impl WaitNotifyRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaitState::default()),
            snapshot: None,
        }
    }

    /// A registry persisted to a JSON snapshot, loading it if present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state: WaitState = load_snapshot(&path)?;
        debug!(
            "Opened wait-notify registry at {} ({} pending waits)",
            path.display(),
            state.waits.len()
        );
        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, WaitState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Applies a change; with a snapshot it is staged on a copy and only
    /// kept once written.
    fn mutate<T>(&self, f: impl FnOnce(&mut WaitState) -> (T, bool)) -> Result<T, StoreError> {
        let mut state = self.lock()?;
        let Some(path) = &self.snapshot else {
            return Ok(f(&mut *state).0);
        };

        let mut staged = state.clone();
        let (value, changed) = f(&mut staged);
        if changed {
            save_snapshot(path, &staged)?;
            *state = staged;
        }
        Ok(value)
    }

    /// Registers a wait on every id in `correlation_ids`.
    ///
    /// Returns the wait id, plus the notification right away when all ids
    /// were already completed (including the empty set).
    pub fn wait_for_all(
        &self,
        correlation_ids: Vec<String>,
        callback: NotifyCallback,
    ) -> Result<(String, Option<Notification>), StoreError> {
        let wait_id = new_id();
        let notification = self.mutate(|state| {
            for id in &correlation_ids {
                state
                    .by_correlation
                    .entry(id.clone())
                    .or_default()
                    .push(wait_id.clone());
            }
            let wait = WaitInstance {
                correlation_ids,
                callback,
                created_at: Utc::now(),
            };
            let ready = state.ready(&wait);
            state.waits.insert(wait_id.clone(), wait);

            let notification = if ready { state.take(&wait_id) } else { None };
            (notification, true)
        })?;
        Ok((wait_id, notification))
    }

    pub fn wait_for(
        &self,
        correlation_id: impl Into<String>,
        callback: NotifyCallback,
    ) -> Result<(String, Option<Notification>), StoreError> {
        self.wait_for_all(vec![correlation_id.into()], callback)
    }

    /// Completes a correlation id and returns every wait it finished.
    pub fn complete(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> Result<Vec<Notification>, StoreError> {
        self.mutate(|state| {
            if state.is_completed(correlation_id) {
                debug!("Correlation id {} already completed", correlation_id);
                return (Vec::new(), false);
            }
            state.responses.insert(correlation_id.to_string(), data);

            let interested = state
                .by_correlation
                .get(correlation_id)
                .cloned()
                .unwrap_or_default();

            let mut notifications = Vec::new();
            for wait_id in interested {
                let ready = state
                    .waits
                    .get(&wait_id)
                    .map(|wait| state.ready(wait))
                    .unwrap_or(false);
                if ready {
                    if let Some(notification) = state.take(&wait_id) {
                        notifications.push(notification);
                    }
                }
            }
            (notifications, true)
        })
    }

    pub fn pending_waits(&self) -> usize {
        self.lock().map(|state| state.waits.len()).unwrap_or(0)
    }

    /// Payload of a completed id that no wait has taken yet.
    pub fn response(&self, correlation_id: &str) -> Option<ResponseData> {
        self.lock()
            .ok()
            .and_then(|state| state.responses.get(correlation_id).cloned())
    }

    /// Payloads held for ids no wait has taken yet.
    pub fn held_responses(&self) -> usize {
        self.lock().map(|state| state.responses.len()).unwrap_or(0)
    }
}

impl Default for WaitNotifyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn resume(id: &str) -> NotifyCallback {
        NotifyCallback::Resume {
            node_execution_id: id.to_string(),
        }
    }

    #[test]
    fn test_wait_then_complete() {
        let registry = WaitNotifyRegistry::new();
        let (_, ready) = registry
            .wait_for_all(vec!["c1".into(), "c2".into()], resume("ne-1"))
            .unwrap();
        assert!(ready.is_none());

        assert!(registry.complete("c1", ResponseData::Wake).unwrap().is_empty());
        let done = registry.complete("c2", ResponseData::Wake).unwrap();

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].callback, resume("ne-1"));
        assert_eq!(done[0].responses.len(), 2);
        assert_eq!(registry.pending_waits(), 0);
    }

    #[test]
    fn test_complete_before_wait_is_not_lost() {
        let registry = WaitNotifyRegistry::new();
        let early = registry
            .complete("c1", ResponseData::Callback(json!({"ok": true})))
            .unwrap();
        assert!(early.is_empty());

        let (_, ready) = registry.wait_for("c1", resume("ne-1")).unwrap();
        let notification = ready.unwrap();
        assert_eq!(
            notification.responses.get("c1"),
            Some(&ResponseData::Callback(json!({"ok": true})))
        );
    }

    #[test]
    fn test_duplicate_completion_ignored() {
        let registry = WaitNotifyRegistry::new();
        registry.wait_for("c1", resume("ne-1")).unwrap();

        assert_eq!(registry.complete("c1", ResponseData::Wake).unwrap().len(), 1);
        assert!(registry.complete("c1", ResponseData::Wake).unwrap().is_empty());
    }

    #[test]
    fn test_consumed_payload_is_dropped() {
        let registry = WaitNotifyRegistry::new();
        registry.wait_for("c1", resume("ne-1")).unwrap();
        registry
            .complete("c1", ResponseData::Callback(json!({"rows": 10})))
            .unwrap();

        assert_eq!(registry.held_responses(), 0);
        assert!(registry.response("c1").is_none());
        assert!(registry.complete("c1", ResponseData::Wake).unwrap().is_empty());
        assert_eq!(registry.held_responses(), 0);
    }

    #[test]
    fn test_consumed_markers_are_bounded() {
        let registry = WaitNotifyRegistry::new();
        for i in 0..CONSUMED_MARKERS + 10 {
            let id = format!("c{}", i);
            registry.wait_for(id.clone(), resume("ne-1")).unwrap();
            registry.complete(&id, ResponseData::Wake).unwrap();
        }
        let state = registry.lock().unwrap();
        assert_eq!(state.consumed.len(), CONSUMED_MARKERS);
        assert_eq!(state.consumed_order.len(), CONSUMED_MARKERS);
        assert!(!state.consumed.contains("c0"));
        assert!(state.responses.is_empty());
    }

    #[test]
    fn test_failed_snapshot_write_keeps_wait_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("waits.json");
        let registry = WaitNotifyRegistry::open(&path).unwrap();
        registry.wait_for("c1", resume("ne-1")).unwrap();

        let blocker = path.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(registry.complete("c1", ResponseData::Wake).is_err());
        assert_eq!(registry.pending_waits(), 1);
        assert_eq!(registry.held_responses(), 0);

        std::fs::remove_dir(&blocker).unwrap();
        let done = registry.complete("c1", ResponseData::Wake).unwrap();
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn test_empty_wait_fires_immediately() {
        let registry = WaitNotifyRegistry::new();
        let (_, ready) = registry.wait_for_all(Vec::new(), resume("ne-1")).unwrap();
        assert!(ready.unwrap().responses.is_empty());
    }

    #[test]
    fn test_two_waits_share_an_id() {
        let registry = WaitNotifyRegistry::new();
        registry.wait_for("c1", resume("ne-1")).unwrap();
        registry
            .wait_for_all(vec!["c1".into(), "c2".into()], resume("ne-2"))
            .unwrap();

        let first = registry.complete("c1", ResponseData::Wake).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].callback, resume("ne-1"));

        assert!(registry.response("c1").is_some());

        let second = registry.complete("c2", ResponseData::Wake).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].callback, resume("ne-2"));
        assert_eq!(second[0].responses.len(), 2);
        assert_eq!(registry.held_responses(), 0);
    }

    #[test]
    fn test_pending_wait_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("waits.json");
        {
            let registry = WaitNotifyRegistry::open(&path).unwrap();
            registry.wait_for("task-1", resume("ne-1")).unwrap();
        }

        let reopened = WaitNotifyRegistry::open(&path).unwrap();
        assert_eq!(reopened.pending_waits(), 1);
        let done = reopened
            .complete("task-1", ResponseData::Wake)
            .unwrap();
        assert_eq!(done[0].callback, resume("ne-1"));
    }
}
