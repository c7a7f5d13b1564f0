//! Workflow Definition Module
//!
//! Data structures for describing workflow graphs, and the passes that
//! turn a definition into an execution plan.
//!
//! # Structure
//!
//! - [`model`]: Nodes, steps, run conditions and strategies
//! - [`parser`]: YAML/JSON loading
//! - [`validator`]: Structural checks and the dependency graph
//! - [`planner`]: Topological phase planning
//! - [`optimizer`]: Strategy-driven reshaping of plans
//! - [`state`]: Execution status machine and run record

pub mod model;
pub mod optimizer;
pub mod parser;
pub mod planner;
pub mod state;
pub mod validator;

pub use model::{
    ComparisonOperator, ErrorHandlingStrategy, OptimizationStrategy, RetryPolicy, RunCondition,
    Step, WorkflowDefinition, WorkflowNode,
};
pub use parser::{load_definition, parse_definition, save_definition, DefinitionFormat};
pub use planner::{ExecutionPlan, ExecutionPlanner};
pub use state::{ExecutionStatus, ExecutionSummary, WorkflowExecution};
pub use validator::{validate, DependencyGraph};
