//! Workflow Execution Module
//!
//! Runs planned workflows against host-registered executors, one phase
//! at a time, and supervises their lifecycle.
//!
//! # Architecture
//!
//! - [`registry`]: The executor boundary and action-tag lookup
//! - [`conditions`]: Run-condition evaluation
//! - [`phase`]: Concurrent execution of one phase with retry
//! - [`orchestrator`]: Queue, lifecycle state machine, control and watchdog

pub mod conditions;
pub mod orchestrator;
pub mod phase;
pub mod registry;

pub use orchestrator::{ExecutionHandle, Orchestrator, WorkflowSummary};
pub use phase::{PhaseExecutor, PhaseOutcome};
pub use registry::{DryRunExecutor, ExecutionContext, ExecutorRegistry, NodeResult, TaskExecutor};
