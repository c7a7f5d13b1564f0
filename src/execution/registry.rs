//! Task Executor Registry
//!
//! The boundary between the orchestration core and the host application.
//! Hosts register one [`TaskExecutor`] per action tag; the phase executor
//! resolves nodes to executors by tag and never performs side effects itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;
use crate::workflow::{Step, WorkflowDefinition};

/// Value produced by a successful node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct NodeResult {
    pub output: Value,
}

impl NodeResult {
    pub fn new(output: impl Into<Value>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

/// Everything an executor may need besides the node's own steps.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_name: String,
    pub node_id: String,
    /// 1 for the first attempt, 2 for the retry
    pub attempt: u32,
    /// Results of this node's completed dependencies
    pub dependency_results: HashMap<String, NodeResult>,
    /// Cancelled when the workflow is cancelled or times out
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Performs the side effects behind one action tag.
///
/// Implementations must be safe to call concurrently for distinct nodes and
/// should stop promptly once `context.cancellation` fires.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &str,
        steps: &[Step],
        timeout: Duration,
        context: ExecutionContext,
    ) -> Result<NodeResult, NodeError>;
}

/// Action tag -> executor map, populated by the host at startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` for `action`, returning any executor it replaced.
    pub fn register(
        &self,
        action: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Option<Arc<dyn TaskExecutor>> {
        let action = action.into();
        let mut executors = self
            .executors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = executors.insert(action.clone(), executor);
        if previous.is_some() {
            warn!("Replaced executor for action '{}'", action);
        } else {
            info!("Registered executor for action '{}'", action);
        }
        previous
    }

    /// Looks up the executor for `action`.
    pub fn resolve(&self, action: &str) -> Result<Arc<dyn TaskExecutor>, NodeError> {
        self.executors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(action)
            .cloned()
            .ok_or_else(|| NodeError::UnknownAction(action.to_string()))
    }

    pub fn contains(&self, action: &str) -> bool {
        self.executors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(action)
    }

    /// Registered action tags, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self
            .executors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        actions.sort();
        actions
    }

    /// Action tags used by `definition` that have no executor.
    pub fn missing_actions(&self, definition: &WorkflowDefinition) -> Vec<String> {
        definition
            .actions()
            .into_iter()
            .filter(|action| !self.contains(action))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

/// Logs each step instead of performing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl TaskExecutor for DryRunExecutor {
    async fn execute(
        &self,
        action: &str,
        steps: &[Step],
        _timeout: Duration,
        context: ExecutionContext,
    ) -> Result<NodeResult, NodeError> {
        for (index, step) in steps.iter().enumerate() {
            if context.is_cancelled() {
                return Err(NodeError::Cancelled(context.node_id.clone()));
            }
            debug!(
                "[DRY RUN] {} step {}/{}: {} ({})",
                context.node_id,
                index + 1,
                steps.len(),
                step.description,
                step.action
            );
        }

        Ok(NodeResult::new(json!({
            "action": action,
            "steps": steps.len(),
            "dry_run": true,
        })))
    }
}
