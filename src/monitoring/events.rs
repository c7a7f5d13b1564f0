//! Workflow Events
//!
//! Typed notifications for dashboards and automation layers, delivered over
//! a broadcast channel. Publishing never blocks and never fails the
//! workflow; slow subscribers simply lag.

use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::execution::registry::NodeResult;
use crate::workflow::state::ExecutionSummary;
use crate::workflow::OptimizationStrategy;

/// Something observable happened to a workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowQueued {
        workflow_id: String,
        name: String,
    },
    WorkflowStarted {
        workflow_id: String,
        name: String,
        total_nodes: usize,
    },
    OptimizationApplied {
        workflow_id: String,
        strategy: OptimizationStrategy,
        phases_before: usize,
        phases_after: usize,
    },
    PhaseStarted {
        workflow_id: String,
        phase: usize,
        node_ids: Vec<String>,
    },
    Progress {
        workflow_id: String,
        completed: usize,
        total: usize,
    },
    NodeCompleted {
        workflow_id: String,
        node_id: String,
        result: NodeResult,
    },
    NodeFailed {
        workflow_id: String,
        node_id: String,
        error: String,
    },
    NodeSkipped {
        workflow_id: String,
        node_id: String,
        reason: String,
    },
    WorkflowPaused {
        workflow_id: String,
    },
    WorkflowResumed {
        workflow_id: String,
    },
    WorkflowCompleted(ExecutionSummary),
    WorkflowFailed(ExecutionSummary),
    WorkflowCancelled(ExecutionSummary),
}

impl WorkflowEvent {
    /// ID of the workflow the event belongs to.
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowQueued { workflow_id, .. }
            | Self::WorkflowStarted { workflow_id, .. }
            | Self::OptimizationApplied { workflow_id, .. }
            | Self::PhaseStarted { workflow_id, .. }
            | Self::Progress { workflow_id, .. }
            | Self::NodeCompleted { workflow_id, .. }
            | Self::NodeFailed { workflow_id, .. }
            | Self::NodeSkipped { workflow_id, .. }
            | Self::WorkflowPaused { workflow_id }
            | Self::WorkflowResumed { workflow_id } => workflow_id,
            Self::WorkflowCompleted(summary)
            | Self::WorkflowFailed(summary)
            | Self::WorkflowCancelled(summary) => &summary.id,
        }
    }

    /// True for the final event of an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted(_) | Self::WorkflowFailed(_) | Self::WorkflowCancelled(_)
        )
    }
}

/// Cloneable publishing handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: WorkflowEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
