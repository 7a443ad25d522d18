//! Execution Statuses
//!
//! Status lattice shared by node and plan executions:
//!
//! - Active statuses may move to any other status
//! - Terminal statuses never change once reached
//! - Positive terminal statuses count as success during aggregation

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a node or plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Queued,
    TimedWaiting,
    Running,
    AsyncWaiting,
    Paused,
    /// Step finished; advisers are deciding what happens next
    Advising,
    InterventionWaiting,
    Succeeded,
    IgnoreFailed,
    Skipped,
    Failed,
    Errored,
    Aborted,
    Expired,
}

impl Status {
    pub const ALL: &'static [Status] = &[
        Status::Queued,
        Status::TimedWaiting,
        Status::Running,
        Status::AsyncWaiting,
        Status::Paused,
        Status::Advising,
        Status::InterventionWaiting,
        Status::Succeeded,
        Status::IgnoreFailed,
        Status::Skipped,
        Status::Failed,
        Status::Errored,
        Status::Aborted,
        Status::Expired,
    ];

    /// Every non-terminal node status.
    pub const ACTIVE: &'static [Status] = &[
        Status::Queued,
        Status::TimedWaiting,
        Status::Running,
        Status::AsyncWaiting,
        Status::Paused,
        Status::Advising,
        Status::InterventionWaiting,
    ];

    /// Statuses a timeout or interrupt may conclude a node from.
    pub const CONCLUDABLE: &'static [Status] = &[
        Status::Queued,
        Status::TimedWaiting,
        Status::Running,
        Status::AsyncWaiting,
        Status::Paused,
        Status::InterventionWaiting,
    ];

    /// Non-terminal statuses of a plan execution.
    pub const PLAN_ACTIVE: &'static [Status] = &[
        Status::Running,
        Status::Paused,
        Status::InterventionWaiting,
    ];

    pub fn is_terminal(self) -> bool {
        !Self::ACTIVE.contains(&self)
    }

    pub fn is_positive(self) -> bool {
        matches!(self, Status::Succeeded | Status::IgnoreFailed | Status::Skipped)
    }

    pub fn is_broken(self) -> bool {
        matches!(self, Status::Failed | Status::Errored | Status::Expired)
    }

    /// Rank used when several negative outcomes compete.
    ///
    /// Zero for every status that never wins an aggregation.
    pub fn severity(self) -> u8 {
        match self {
            Status::Aborted => 4,
            Status::Errored => 3,
            Status::Failed => 2,
            Status::Expired => 1,
            _ => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "QUEUED",
            Status::TimedWaiting => "TIMED_WAITING",
            Status::Running => "RUNNING",
            Status::AsyncWaiting => "ASYNC_WAITING",
            Status::Paused => "PAUSED",
            Status::Advising => "ADVISING",
            Status::InterventionWaiting => "INTERVENTION_WAITING",
            Status::Succeeded => "SUCCEEDED",
            Status::IgnoreFailed => "IGNORE_FAILED",
            Status::Skipped => "SKIPPED",
            Status::Failed => "FAILED",
            Status::Errored => "ERRORED",
            Status::Aborted => "ABORTED",
            Status::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Folds child or node statuses into one parent status.
///
/// - No statuses, or only positive ones: `Succeeded`
/// - Only `Skipped`: `Skipped`
/// - Otherwise the most severe negative terminal status
///
/// The result does not depend on the order of the input.
pub fn aggregate_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let statuses: Vec<Status> = statuses.into_iter().collect();

    if !statuses.is_empty() && statuses.iter().all(|s| *s == Status::Skipped) {
        return Status::Skipped;
    }

    statuses
        .into_iter()
        .filter(|s| s.severity() > 0)
        .max_by_key(|s| s.severity())
        .unwrap_or(Status::Succeeded)
}
