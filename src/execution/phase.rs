//! Phase Execution
//!
//! Runs every node of one phase concurrently and waits for all of them:
//!
//! 1. Run conditions are checked first; unmet nodes are skipped
//! 2. Ready nodes are dispatched to their executors, bounded by
//!    `max_parallel_tasks` and each node's own timeout
//! 3. Results are recorded as they arrive
//! 4. Under `RetryAndContinue`, failed nodes get exactly one more attempt

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, Level};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;
use crate::monitoring::events::{EventBus, WorkflowEvent};
use crate::workflow::state::WorkflowExecution;
use crate::workflow::validator::effective_dependencies;
use crate::workflow::{ErrorHandlingStrategy, WorkflowDefinition, WorkflowNode};

use super::conditions::{self, ConditionContext};
use super::registry::{ExecutionContext, ExecutorRegistry, NodeResult, TaskExecutor};

/// What happened to the nodes of one phase, after retries.
#[derive(Debug, Default, Clone)]
pub struct PhaseOutcome {
    pub completed: HashMap<String, NodeResult>,
    pub failed: HashMap<String, NodeError>,
    pub skipped: Vec<String>,
    pub cancelled: Vec<String>,
    /// Nodes that were given a second attempt
    pub retried: Vec<String>,
}

impl PhaseOutcome {
    /// True if at least one node is still failed after retries.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Dispatches phases of an execution to registered executors.
#[derive(Debug, Clone)]
pub struct PhaseExecutor {
    registry: Arc<ExecutorRegistry>,
    events: Option<EventBus>,
}

impl PhaseExecutor {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    /// Publishes node events to `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs one phase to completion.
    ///
    /// Nodes still in flight when `cancel` fires are recorded as cancelled.
    pub async fn run_phase(
        &self,
        execution: &mut WorkflowExecution,
        phase: &[String],
        cancel: &CancellationToken,
    ) -> PhaseOutcome {
        let definition = Arc::clone(&execution.definition);
        let mut outcome = PhaseOutcome::default();
        let mut ready = Vec::with_capacity(phase.len());

        let now = Local::now().time();
        for node_id in phase {
            let Some(node) = definition.get_node(node_id) else {
                let error = NodeError::execution(node_id, "node is not part of the definition");
                execution.record_failed(node_id, error.clone());
                outcome.failed.insert(node_id.clone(), error);
                continue;
            };

            let check = conditions::check_node(
                node,
                &ConditionContext {
                    completed: &execution.completed_nodes,
                    results: &execution.node_results,
                    now,
                },
            );

            match check {
                Ok(()) => ready.push(node_id.clone()),
                Err(reason) => {
                    execution.record_skipped(node_id, &reason);
                    self.publish(WorkflowEvent::NodeSkipped {
                        workflow_id: execution.id.clone(),
                        node_id: node_id.clone(),
                        reason,
                    });
                    outcome.skipped.push(node_id.clone());
                }
            }
        }

        self.dispatch(execution, &definition, &ready, cancel, &mut outcome)
            .await;

        if definition.error_handling_strategy == ErrorHandlingStrategy::RetryAndContinue
            && outcome.has_failures()
            && !cancel.is_cancelled()
        {
            let retry: Vec<String> = ready
                .iter()
                .filter(|id| outcome.failed.contains_key(*id))
                .filter(|id| {
                    definition
                        .get_node(id)
                        .map_or(false, |node| node.retry_policy.retryable)
                })
                .cloned()
                .collect();

            if !retry.is_empty() {
                execution.log(
                    Level::Info,
                    format!("Retrying {} failed node(s): {}", retry.len(), retry.join(", ")),
                );
                outcome.retried = retry.clone();
                self.dispatch(execution, &definition, &retry, cancel, &mut outcome)
                    .await;
            }
        }

        debug!(
            "[{}] Phase done: {} completed, {} failed, {} skipped, {} cancelled",
            execution.id,
            outcome.completed.len(),
            outcome.failed.len(),
            outcome.skipped.len(),
            outcome.cancelled.len()
        );

        outcome
    }

    /// Runs `node_ids` concurrently and records each result as it arrives.
    async fn dispatch(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        node_ids: &[String],
        cancel: &CancellationToken,
        outcome: &mut PhaseOutcome,
    ) {
        let semaphore = Arc::new(Semaphore::new(definition.max_parallel_tasks.max(1)));
        let mut pending = FuturesUnordered::new();

        for node_id in node_ids {
            let Some(node) = definition.get_node(node_id) else {
                continue;
            };

            let attempt = execution.mark_running(node_id);
            let delay = if attempt > 1 {
                node.retry_policy.delay
            } else {
                Duration::ZERO
            };

            let dependency_results = effective_dependencies(node)
                .into_iter()
                .filter_map(|dep| {
                    execution
                        .node_results
                        .get(dep)
                        .map(|result| (dep.to_string(), result.clone()))
                })
                .collect();

            let context = ExecutionContext {
                execution_id: execution.id.clone(),
                workflow_name: definition.name.clone(),
                node_id: node_id.clone(),
                attempt,
                dependency_results,
                cancellation: cancel.child_token(),
            };

            info!(
                "[{}] Dispatching '{}' ({}), attempt {}",
                execution.id, node_id, node.action, attempt
            );

            let executor = self.registry.resolve(&node.action);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            pending.push(async move {
                let result = run_node(executor, node, delay, context, semaphore, cancel).await;
                (node.id.clone(), result)
            });
        }

        while let Some((node_id, result)) = pending.next().await {
            match result {
                Ok(result) => {
                    execution.record_completed(&node_id, result.clone());
                    outcome.failed.remove(&node_id);
                    self.publish(WorkflowEvent::NodeCompleted {
                        workflow_id: execution.id.clone(),
                        node_id: node_id.clone(),
                        result: result.clone(),
                    });
                    outcome.completed.insert(node_id, result);
                }
                Err(NodeError::Cancelled(_)) => {
                    execution.record_cancelled(&node_id);
                    outcome.failed.remove(&node_id);
                    outcome.cancelled.push(node_id);
                }
                Err(error) => {
                    execution.record_failed(&node_id, error.clone());
                    self.publish(WorkflowEvent::NodeFailed {
                        workflow_id: execution.id.clone(),
                        node_id: node_id.clone(),
                        error: error.to_string(),
                    });
                    outcome.failed.insert(node_id, error);
                }
            }

            self.publish(WorkflowEvent::Progress {
                workflow_id: execution.id.clone(),
                completed: execution.completed_nodes.len(),
                total: definition.len(),
            });
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

/// One executor call with its concurrency slot, retry delay and timeout.
async fn run_node(
    executor: Result<Arc<dyn TaskExecutor>, NodeError>,
    node: &WorkflowNode,
    delay: Duration,
    context: ExecutionContext,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> Result<NodeResult, NodeError> {
    let executor = executor?;
    let node_id = node.id.clone();

    let work = async {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| NodeError::Cancelled(node.id.clone()))?;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let call = executor.execute(&node.action, &node.steps, node.timeout, context);
        match tokio::time::timeout(node.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout {
                node: node.id.clone(),
                timeout: node.timeout,
            }),
        }
    };

    tokio::select! {
        result = work => result,
        _ = cancel.cancelled() => Err(NodeError::Cancelled(node_id)),
    }
}
