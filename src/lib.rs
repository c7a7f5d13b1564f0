//! PhaseKeeper - Phase-Parallel Workflow Orchestration
//!
//! Runs DAG-shaped workflows as an ordered list of phases. Nodes within a
//! phase run concurrently; each phase finishes before the next begins.
//! The side effects behind each node are performed by executors the host
//! registers per action tag, so the core itself does no I/O.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Definitions, validation, planning and optimization
//! - [`execution`]: Executor registry, phase execution and the orchestrator
//! - [`monitoring`]: Events, timelines and execution statistics
//! - [`config`]: Orchestrator settings
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use phasekeeper::execution::{DryRunExecutor, Orchestrator};
//! use phasekeeper::workflow::{OptimizationStrategy, WorkflowDefinition, WorkflowNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::default();
//!     orchestrator.register_executor("task", Arc::new(DryRunExecutor));
//!
//!     let definition = WorkflowDefinition::new("report")
//!         .with_node(WorkflowNode::new("fetch", "task"))
//!         .with_node(WorkflowNode::new("render", "task").depends_on("fetch"));
//!
//!     let id = orchestrator.create_workflow(
//!         "report",
//!         "nightly report",
//!         definition,
//!         OptimizationStrategy::Balanced,
//!     )?;
//!     let summary = orchestrator.execute_workflow(&id)?.wait().await?;
//!     println!("{}: {}", summary.name, summary.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use error::{NodeError, OrchestratorError, PlanningError, Result, ValidationError};
pub use execution::{Orchestrator, TaskExecutor};
pub use workflow::parser::load_definition;
pub use workflow::{WorkflowDefinition, WorkflowNode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "PhaseKeeper";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "PhaseKeeper");
    }

    #[test]
    fn test_module_exports_node() {
        let node = WorkflowNode::new("fetch", "task");
        assert_eq!(node.id, "fetch");
        assert_eq!(node.action, "task");
    }

    #[test]
    fn test_module_exports_definition() {
        let definition = WorkflowDefinition::new("empty");
        assert!(definition.is_empty());
    }
}
