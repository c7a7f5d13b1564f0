//! Workflow Execution State
//!
//! The mutable run record of one attempt to execute a workflow definition,
//! and the lifecycle state machine it moves through:
//!
//! ```text
//! Pending -> Planning -> Running <-> Paused
//!                           |
//!                           v
//!             Completed | Failed | Cancelled
//! ```
//!
//! A record is owned by the task driving the execution. Everything other
//! components see is an [`ExecutionSummary`] snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{log, Level};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, OrchestratorError};
use crate::execution::registry::NodeResult;
use crate::monitoring::timeline::{EventType, ExecutionTimeline};

use super::model::{OptimizationStrategy, WorkflowDefinition};
use super::planner::ExecutionPlan;

/// Number of node errors quoted in a failure summary.
const SUMMARY_ERROR_LIMIT: usize = 3;

/// Lifecycle status of an execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Planning,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        matches!(
            (self, next),
            (Pending, Planning)
                | (Pending, Cancelled)
                | (Planning, Running)
                | (Planning, Failed)
                | (Planning, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of an execution's own log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Snapshot of an execution for queries, events and history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    pub id: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub strategy: OptimizationStrategy,
    pub current_phase: usize,
    pub phase_count: usize,
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    pub cancelled_nodes: usize,
    pub success_rate: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_durations_ms: BTreeMap<String, u64>,
}

/// Mutable run record for one workflow execution.
#[derive(Debug)]
pub struct WorkflowExecution {
    pub id: String,
    pub definition: Arc<WorkflowDefinition>,
    pub status: ExecutionStatus,
    pub plan: ExecutionPlan,
    pub current_phase: usize,

    pub completed_nodes: BTreeSet<String>,
    pub failed_nodes: BTreeSet<String>,
    pub running_nodes: BTreeSet<String>,
    pub skipped_nodes: BTreeSet<String>,
    pub cancelled_nodes: BTreeSet<String>,

    pub node_results: HashMap<String, NodeResult>,
    pub node_errors: BTreeMap<String, NodeError>,
    /// Executor invocations per node
    pub attempts: HashMap<String, u32>,

    pub optimization_metrics: BTreeMap<String, f64>,
    pub logs: Vec<ExecutionLogEntry>,
    pub timeline: ExecutionTimeline,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Creates a pending execution record.
    pub fn new(id: impl Into<String>, definition: Arc<WorkflowDefinition>) -> Self {
        Self {
            id: id.into(),
            definition,
            status: ExecutionStatus::Pending,
            plan: ExecutionPlan::default(),
            current_phase: 0,
            completed_nodes: BTreeSet::new(),
            failed_nodes: BTreeSet::new(),
            running_nodes: BTreeSet::new(),
            skipped_nodes: BTreeSet::new(),
            cancelled_nodes: BTreeSet::new(),
            node_results: HashMap::new(),
            node_errors: BTreeMap::new(),
            attempts: HashMap::new(),
            optimization_metrics: BTreeMap::new(),
            logs: Vec::new(),
            timeline: ExecutionTimeline::new(),
            start_time: None,
            end_time: None,
        }
    }

    /// Moves to `next`, rejecting transitions the state machine does not allow.
    ///
    /// Leaving `Pending` stamps the start time; reaching a terminal status
    /// stamps the end time and the final success rate.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        if self.status == ExecutionStatus::Pending {
            self.start_time = Some(Utc::now());
        }
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
            self.optimization_metrics
                .insert("success_rate".to_string(), self.success_rate());
        }

        let from = self.status;
        self.status = next;
        self.log(Level::Debug, format!("Status {} -> {}", from, next));
        Ok(())
    }

    /// Appends to the execution log and mirrors the line to the `log` facade.
    pub fn log(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        log!(level, "[{}] {}", self.id, message);
        self.logs.push(ExecutionLogEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            message,
        });
    }

    /// Marks a node as dispatched and returns its attempt number.
    pub fn mark_running(&mut self, node_id: &str) -> u32 {
        self.running_nodes.insert(node_id.to_string());
        self.timeline.add_event(node_id, EventType::Started);

        let attempt = self.attempts.entry(node_id.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    /// Records a successful node. A retried node leaves the failed set.
    pub fn record_completed(&mut self, node_id: &str, result: NodeResult) {
        self.running_nodes.remove(node_id);
        self.failed_nodes.remove(node_id);
        self.node_errors.remove(node_id);
        self.completed_nodes.insert(node_id.to_string());
        self.node_results.insert(node_id.to_string(), result);
        self.timeline.add_event(node_id, EventType::Completed);
    }

    pub fn record_failed(&mut self, node_id: &str, error: NodeError) {
        self.running_nodes.remove(node_id);
        self.failed_nodes.insert(node_id.to_string());
        self.log(Level::Warn, error.to_string());
        self.node_errors.insert(node_id.to_string(), error);
        self.timeline.add_event(node_id, EventType::Failed);
    }

    pub fn record_skipped(&mut self, node_id: &str, reason: &str) {
        self.skipped_nodes.insert(node_id.to_string());
        self.log(Level::Info, format!("Skipped '{}': {}", node_id, reason));
        self.timeline.add_event(node_id, EventType::Skipped);
    }

    /// Records a node stopped by cancellation. A cancelled retry leaves the failed set.
    pub fn record_cancelled(&mut self, node_id: &str) {
        self.running_nodes.remove(node_id);
        self.failed_nodes.remove(node_id);
        self.node_errors.remove(node_id);
        self.cancelled_nodes.insert(node_id.to_string());
        self.timeline.add_event(node_id, EventType::Cancelled);
    }

    /// Number of nodes with a final outcome.
    pub fn resolved_count(&self) -> usize {
        self.completed_nodes.len()
            + self.failed_nodes.len()
            + self.skipped_nodes.len()
            + self.cancelled_nodes.len()
    }

    /// `completed / total`. Skipped nodes stay in the denominator.
    pub fn success_rate(&self) -> f64 {
        let total = self.definition.len();
        if total == 0 {
            return 0.0;
        }
        self.completed_nodes.len() as f64 / total as f64
    }

    /// Failed-node count plus the first few error messages.
    pub fn failure_summary(&self) -> Option<String> {
        if self.node_errors.is_empty() {
            return None;
        }

        let quoted: Vec<String> = self
            .node_errors
            .values()
            .take(SUMMARY_ERROR_LIMIT)
            .map(|e| e.to_string())
            .collect();

        let mut summary = format!(
            "{} node(s) failed: {}",
            self.node_errors.len(),
            quoted.join("; ")
        );
        if self.node_errors.len() > SUMMARY_ERROR_LIMIT {
            summary.push_str("; ...");
        }
        Some(summary)
    }

    pub fn summary(&self) -> ExecutionSummary {
        let duration_ms = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.signed_duration_since(start)),
            (Some(start), None) => Some(Utc::now().signed_duration_since(start)),
            _ => None,
        }
        .map(|d| d.num_milliseconds().max(0) as u64);

        let node_durations_ms = self
            .timeline
            .get_durations()
            .into_iter()
            .map(|(id, ms)| (id, ms as u64))
            .collect();

        ExecutionSummary {
            id: self.id.clone(),
            name: self.definition.name.clone(),
            status: self.status,
            strategy: self.definition.optimization_strategy,
            current_phase: self.current_phase,
            phase_count: self.plan.len(),
            total_nodes: self.definition.len(),
            completed_nodes: self.completed_nodes.len(),
            failed_nodes: self.failed_nodes.len(),
            skipped_nodes: self.skipped_nodes.len(),
            cancelled_nodes: self.cancelled_nodes.len(),
            success_rate: self.success_rate(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms,
            failure_summary: self.failure_summary(),
            node_durations_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowNode;

    fn execution(node_count: usize) -> WorkflowExecution {
        let nodes = (0..node_count)
            .map(|i| WorkflowNode::new(format!("n{}", i), "task"))
            .collect();
        WorkflowExecution::new("exec-1", Arc::new(WorkflowDefinition::from_nodes("wf", nodes)))
    }

    #[test]
    fn test_status_transitions() {
        use ExecutionStatus::*;

        assert!(Pending.can_transition_to(Planning));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
    }

    #[test]
    fn test_transition_stamps_times() {
        let mut exec = execution(1);
        assert!(exec.start_time.is_none());

        exec.transition(ExecutionStatus::Planning).unwrap();
        assert!(exec.start_time.is_some());
        assert!(exec.end_time.is_none());

        exec.transition(ExecutionStatus::Failed).unwrap();
        assert!(exec.end_time.is_some());
        assert_eq!(exec.optimization_metrics["success_rate"], 0.0);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut exec = execution(1);
        match exec.transition(ExecutionStatus::Completed) {
            Err(OrchestratorError::InvalidTransition { from, to }) => {
                assert_eq!(from, "pending");
                assert_eq!(to, "completed");
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(exec.status, ExecutionStatus::Pending);
    }

    #[test]
    fn test_success_rate_counts_skipped_in_total() {
        let mut exec = execution(4);
        exec.record_completed("n0", NodeResult::new("ok"));
        exec.record_completed("n1", NodeResult::new("ok"));
        exec.record_completed("n2", NodeResult::new("ok"));
        exec.record_skipped("n3", "condition unmet");

        assert_eq!(exec.success_rate(), 0.75);
        assert_eq!(exec.resolved_count(), 4);
    }

    #[test]
    fn test_retry_success_clears_failure() {
        let mut exec = execution(1);
        assert_eq!(exec.mark_running("n0"), 1);
        exec.record_failed("n0", NodeError::execution("n0", "boom"));
        assert!(exec.failed_nodes.contains("n0"));

        assert_eq!(exec.mark_running("n0"), 2);
        exec.record_completed("n0", NodeResult::new(1));

        assert!(exec.failed_nodes.is_empty());
        assert!(exec.node_errors.is_empty());
        assert!(exec.running_nodes.is_empty());
        assert_eq!(exec.success_rate(), 1.0);
    }

    #[test]
    fn test_cancelled_retry_counted_once() {
        let mut exec = execution(2);
        exec.mark_running("n0");
        exec.record_failed("n0", NodeError::execution("n0", "boom"));

        exec.mark_running("n0");
        exec.record_cancelled("n0");

        assert!(exec.failed_nodes.is_empty());
        assert!(exec.node_errors.is_empty());
        assert!(exec.cancelled_nodes.contains("n0"));
        assert_eq!(exec.resolved_count(), 1);

        let summary = exec.summary();
        assert_eq!(summary.failed_nodes, 0);
        assert_eq!(summary.cancelled_nodes, 1);
        assert_eq!(summary.failure_summary, None);
    }

    #[test]
    fn test_failure_summary_quotes_first_errors() {
        let mut exec = execution(5);
        assert!(exec.failure_summary().is_none());

        for i in 0..4 {
            let id = format!("n{}", i);
            exec.record_failed(&id, NodeError::execution(&id, "boom"));
        }

        let summary = exec.failure_summary().unwrap();
        assert!(summary.starts_with("4 node(s) failed"));
        assert!(summary.contains("Node 'n0' failed: boom"));
        assert!(!summary.contains("'n3'"));
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_summary_snapshot() {
        let mut exec = execution(2);
        exec.plan = ExecutionPlan::new(vec![vec!["n0".to_string()], vec!["n1".to_string()]]);
        exec.transition(ExecutionStatus::Planning).unwrap();
        exec.mark_running("n0");
        exec.record_completed("n0", NodeResult::new("ok"));
        exec.mark_running("n1");
        exec.record_cancelled("n1");

        let summary = exec.summary();
        assert_eq!(summary.name, "wf");
        assert_eq!(summary.phase_count, 2);
        assert_eq!(summary.completed_nodes, 1);
        assert_eq!(summary.cancelled_nodes, 1);
        assert_eq!(summary.success_rate, 0.5);
        assert!(summary.duration_ms.is_some());
        assert!(summary.node_durations_ms.contains_key("n0"));
    }

    #[test]
    fn test_log_entries_are_kept() {
        let mut exec = execution(1);
        exec.log(Level::Info, "hello");
        assert_eq!(exec.logs.len(), 1);
        assert_eq!(exec.logs[0].level, "INFO");
        assert_eq!(exec.logs[0].message, "hello");
    }
}
