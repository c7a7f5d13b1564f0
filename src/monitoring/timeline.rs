//! Execution Timeline
//!
//! Tracks node start/end times for execution summaries
//! and Gantt charts.

use std::collections::HashMap;
use std::time::Instant;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Node dispatched to its executor
    Started,
    /// Node completed successfully
    Completed,
    /// Node failed or timed out
    Failed,
    /// Node skipped by an unmet condition
    Skipped,
    /// Node interrupted by cancellation or the global timeout
    Cancelled,
}

impl EventType {
    /// Whether this event closes a node's bar.
    pub fn is_finish(&self) -> bool {
        !matches!(self, Self::Started | Self::Skipped)
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// ID of the node
    pub node_id: String,
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a workflow.
///
/// Records when each node starts and finishes. A retried node keeps its
/// first start and its last finish.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a node.
    pub fn add_event(&mut self, node_id: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            node_id: node_id.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each node is shown as a bar indicating when it ran
    /// relative to the total execution time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();

        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut sorted_nodes: Vec<_> = self.spans().into_iter().collect();
        sorted_nodes.sort_by(|(a_id, (a_start, _)), (b_id, (b_start, _))| {
            a_start.cmp(b_start).then_with(|| a_id.cmp(b_id))
        });

        for (node_id, (start, end)) in sorted_nodes {
            if end > start {
                let start_pos = (start as f64 * scale) as usize;
                let duration = ((end - start) as f64 * scale).max(1.0) as usize;

                let mut bar = " ".repeat(start_pos);
                bar.push_str(&"#".repeat(duration));

                let duration_ms = end - start;
                output.push_str(&format!(
                    "{:12} |{}| ({} ms)\n",
                    truncate(&node_id, 12),
                    bar,
                    duration_ms
                ));
            }
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns node durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .filter(|(_, (start, end))| end >= start)
            .map(|(id, (start, end))| (id, end - start))
            .collect()
    }

    /// (first start, last finish) offsets per node that both started and finished.
    fn spans(&self) -> HashMap<String, (u128, u128)> {
        let mut starts: HashMap<String, u128> = HashMap::new();
        let mut spans: HashMap<String, (u128, u128)> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            if event.event_type == EventType::Started {
                starts.entry(event.node_id.clone()).or_insert(elapsed);
            } else if event.event_type.is_finish() {
                if let Some(&start) = starts.get(&event.node_id) {
                    spans.insert(event.node_id.clone(), (start, elapsed));
                }
            }
        }

        spans
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or shortens a node ID to `width` characters.
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        format!("{:width$}", s, width = width)
    } else {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.events.is_empty());
    }

    #[test]
    fn test_add_events() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("fetch".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(10));
        timeline.add_event("fetch".to_string(), EventType::Completed);

        assert_eq!(timeline.events.len(), 2);
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("fetch".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("fetch".to_string(), EventType::Completed);

        let durations = timeline.get_durations();
        assert!(durations.contains_key("fetch"));
        assert!(*durations.get("fetch").unwrap() >= 50);
    }

    #[test]
    fn test_timeline_elapsed() {
        let timeline = ExecutionTimeline::new();
        thread::sleep(Duration::from_millis(50));

        let elapsed = timeline.elapsed();
        assert!(elapsed.as_millis() >= 50);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("fetch".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("fetch".to_string(), EventType::Completed);

        timeline.add_event("parse".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("parse".to_string(), EventType::Completed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("fetch"));
        assert!(chart.contains("parse"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_timeline_failed_event() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("fetch".to_string(), EventType::Started);
        timeline.add_event("fetch".to_string(), EventType::Failed);

        let events = timeline.get_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::Failed);
    }

    #[test]
    fn test_get_durations_only_started() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("fetch".to_string(), EventType::Started);

        let durations = timeline.get_durations();
        assert!(!durations.contains_key("fetch"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = ExecutionTimeline::new();
        let chart = timeline.gantt_chart();
        // Should return header but no node bars
        assert!(chart.contains("Timeline"));
    }

    #[test]
    fn test_retried_node_spans_both_attempts() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("flaky", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("flaky", EventType::Failed);
        timeline.add_event("flaky", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("flaky", EventType::Completed);

        let durations = timeline.get_durations();
        assert!(*durations.get("flaky").unwrap() >= 40);
    }

    #[test]
    fn test_skipped_node_has_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("gated", EventType::Skipped);

        assert!(timeline.get_durations().is_empty());
        assert!(!EventType::Skipped.is_finish());
        assert!(EventType::Cancelled.is_finish());
    }

    #[test]
    fn test_overlapping_nodes_durations() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("fetch".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("parse".to_string(), EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("fetch".to_string(), EventType::Completed);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("parse".to_string(), EventType::Completed);

        let durations = timeline.get_durations();
        assert!(durations.contains_key("fetch"));
        assert!(durations.contains_key("parse"));
        assert!(*durations.get("fetch").unwrap() >= 20);
        assert!(*durations.get("parse").unwrap() >= 20);
    }
}
