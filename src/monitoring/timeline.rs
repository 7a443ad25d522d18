//! Execution Timeline
//!
//! Records every status transition applied to a node execution, for
//! timing reports and Gantt charts. Events of finished plans are kept for
//! the most recent [`RETAINED_PLANS`] plans only.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::model::Status;

/// Finished plans whose events stay on the timeline.
pub const RETAINED_PLANS: usize = 32;

/// A single applied transition.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub plan_execution_id: String,
    pub node_execution_id: String,
    /// Plan node identifier, used as the chart label
    pub identifier: String,
    /// `None` when the record was created
    pub previous: Option<Status>,
    pub status: Status,
    pub timestamp: Instant,
}

/// Tracks the status history of every node execution of an engine.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    /// Oldest first
    finished_plans: VecDeque<String>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            finished_plans: VecDeque::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record(
        &mut self,
        plan_execution_id: &str,
        node_execution_id: &str,
        identifier: &str,
        previous: Option<Status>,
        status: Status,
    ) {
        self.events.push(TimelineEvent {
            plan_execution_id: plan_execution_id.to_string(),
            node_execution_id: node_execution_id.to_string(),
            identifier: identifier.to_string(),
            previous,
            status,
            timestamp: Instant::now(),
        });
    }

    /// Marks a plan finished, dropping the events of the oldest finished
    /// plan once more than [`RETAINED_PLANS`] are held.
    pub fn plan_ended(&mut self, plan_execution_id: &str) {
        if self.finished_plans.iter().any(|id| id == plan_execution_id) {
            return;
        }
        self.finished_plans.push_back(plan_execution_id.to_string());
        while self.finished_plans.len() > RETAINED_PLANS {
            if let Some(oldest) = self.finished_plans.pop_front() {
                self.events.retain(|e| e.plan_execution_id != oldest);
            }
        }
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn events_for(&self, node_execution_id: &str) -> Vec<&TimelineEvent> {
        self.events
            .iter()
            .filter(|e| e.node_execution_id == node_execution_id)
            .collect()
    }

    /// Statuses a node execution went through, in order.
    pub fn statuses_for(&self, node_execution_id: &str) -> Vec<Status> {
        self.events_for(node_execution_id)
            .into_iter()
            .map(|e| e.status)
            .collect()
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// First RUNNING and first terminal offset of each node execution, in
    /// milliseconds since the timeline started.
    fn spans(&self) -> HashMap<String, (String, u128, Option<u128>)> {
        let mut spans: HashMap<String, (String, u128, Option<u128>)> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            if event.status == Status::Running {
                spans
                    .entry(event.node_execution_id.clone())
                    .or_insert((event.identifier.clone(), elapsed, None));
            } else if event.status.is_terminal() {
                if let Some(span) = spans.get_mut(&event.node_execution_id) {
                    span.2.get_or_insert(elapsed);
                }
            }
        }
        spans
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each node execution that ran is shown as a bar from its first
    /// RUNNING transition to its terminal status.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();

        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut sorted: Vec<(String, u128, u128)> = self
            .spans()
            .into_values()
            .filter_map(|(label, start, end)| end.map(|end| (label, start, end)))
            .collect();
        sorted.sort_by_key(|(_, start, _)| *start);

        for (label, start, end) in sorted {
            let start_pos = (start as f64 * scale) as usize;
            let duration = ((end.saturating_sub(start)) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(duration));

            output.push_str(&format!(
                "{:12} |{}| ({} ms)\n",
                truncate(&label, 12),
                bar,
                end.saturating_sub(start)
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Run durations in milliseconds, keyed by node execution id.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .filter_map(|(id, (_, start, end))| end.map(|end| (id, end.saturating_sub(start))))
            .collect()
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
