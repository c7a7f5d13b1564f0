//! Monitoring Module
//!
//! What hosts can observe about running and finished workflows.
//!
//! # Components
//!
//! - [`EventBus`]: typed workflow events over a broadcast channel
//! - [`ExecutionTimeline`]: node start/end timing for Gantt charts
//! - [`ExecutionStats`]: aggregate results and per-strategy feedback

pub mod events;
pub mod stats;
pub mod timeline;

pub use events::{EventBus, WorkflowEvent};
pub use stats::{ExecutionStats, StrategyStats};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
