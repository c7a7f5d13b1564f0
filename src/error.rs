//! Error Types
//!
//! Errors are split by the stage that raises them:
//!
//! - [`ValidationError`]: rejected at `create_workflow` time, the workflow never queues
//! - [`PlanningError`]: planner invariant violations, terminal for the execution
//! - [`NodeError`]: a single node failed, recorded per node and never propagated
//! - [`OrchestratorError`]: public API failures and workflow-terminal conditions

use std::time::Duration;

use thiserror::Error;

/// Structural problems found in a workflow definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Workflow has no nodes")]
    EmptyWorkflow,

    #[error("Node has empty or whitespace-only ID")]
    EmptyNodeId,

    #[error("Duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("Node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("Node '{node}' has a run condition referencing unknown node '{reference}'")]
    UnknownConditionReference { node: String, reference: String },

    #[error("Workflow contains cyclic dependencies: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("max_parallel_tasks must be at least 1")]
    InvalidParallelism,
}

/// Failures while turning a validated graph into phases.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Definition failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("Planner stalled with {} unscheduled nodes: {}", remaining.len(), remaining.join(", "))]
    Stalled { remaining: Vec<String> },

    #[error("Plan places node '{node}' no later than its dependency '{dependency}'")]
    InvariantViolated { node: String, dependency: String },
}

/// Failure of a single node's executor call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("No executor registered for action '{0}'")]
    UnknownAction(String),

    #[error("Node '{node}' timed out after {timeout:?}")]
    Timeout { node: String, timeout: Duration },

    #[error("Node '{node}' failed: {message}")]
    Execution { node: String, message: String },

    #[error("Node '{0}' was cancelled before completing")]
    Cancelled(String),
}

impl NodeError {
    /// Convenience constructor for executor implementations.
    pub fn execution(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            node: node.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the orchestrator's public operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid workflow: {0}")]
    Validation(#[from] ValidationError),

    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("Workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("Concurrent workflow limit reached (max: {max})")]
    ConcurrencyLimit { max: usize },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Workflow exceeded its global timeout of {timeout:?}")]
    GlobalTimeout { timeout: Duration },

    #[error("Execution task join error: {0}")]
    TaskJoin(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_shows_path() {
        let err = ValidationError::CyclicDependency {
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_planning_error_wraps_validation() {
        let err: PlanningError = ValidationError::EmptyWorkflow.into();
        assert!(err.to_string().contains("no nodes"));
    }

    #[test]
    fn test_node_error_display() {
        let err = NodeError::Timeout {
            node: "x".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("timed out"));

        let err = NodeError::execution("y", "boom");
        assert_eq!(err.to_string(), "Node 'y' failed: boom");
    }

    #[test]
    fn test_orchestrator_error_from_validation() {
        let err: OrchestratorError = ValidationError::InvalidParallelism.into();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}
