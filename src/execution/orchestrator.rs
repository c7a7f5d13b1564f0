//! Workflow Orchestrator
//!
//! Owns the lifecycle of every workflow it is given:
//!
//! 1. `create_workflow` validates a definition and queues it
//! 2. `execute_workflow` dequeues it and spawns a task that plans the
//!    execution, then runs its phases in order
//! 3. The per-phase error strategy decides whether to continue
//! 4. Finished executions move to a bounded history and feed the statistics
//!
//! Queue, active registry, history and statistics live behind one mutex.
//! The execution record itself is owned by the task driving it; queries
//! only ever see [`ExecutionSummary`] snapshots.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn, Level};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result, ValidationError};
use crate::monitoring::events::{EventBus, WorkflowEvent};
use crate::monitoring::stats::{ExecutionStats, MIN_RUNS_FOR_RECOMMENDATION};
use crate::workflow::planner::ExecutionPlanner;
use crate::workflow::state::{ExecutionStatus, ExecutionSummary, WorkflowExecution};
use crate::workflow::validator;
use crate::workflow::{ErrorHandlingStrategy, OptimizationStrategy, WorkflowDefinition};

use super::phase::PhaseExecutor;
use super::registry::{ExecutorRegistry, TaskExecutor};

/// Shortest polling period the watchdog runs with.
pub const MIN_WATCHDOG_INTERVAL: Duration = Duration::from_millis(10);

/// Queue entry as seen by `get_queue`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub node_count: usize,
    pub strategy: OptimizationStrategy,
    pub queued_at: DateTime<Utc>,
}

/// Why an execution was stopped from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortReason {
    Cancelled,
    TimedOut,
}

/// Control signals shared between the public API and a driving task.
#[derive(Debug)]
struct ExecutionControl {
    token: CancellationToken,
    abort: Mutex<Option<AbortReason>>,
    paused_tx: watch::Sender<bool>,
    paused_rx: watch::Receiver<bool>,
}

impl ExecutionControl {
    fn new() -> Self {
        let (paused_tx, paused_rx) = watch::channel(false);
        Self {
            token: CancellationToken::new(),
            abort: Mutex::new(None),
            paused_tx,
            paused_rx,
        }
    }

    /// Stops the execution. The first reason wins; returns false if it was already stopping.
    fn abort(&self, reason: AbortReason) -> bool {
        let mut abort = self.abort.lock().unwrap_or_else(|p| p.into_inner());
        if abort.is_some() {
            return false;
        }
        *abort = Some(reason);
        self.token.cancel();
        true
    }

    fn abort_reason(&self) -> Option<AbortReason> {
        *self.abort.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_paused(&self) -> bool {
        *self.paused_rx.borrow()
    }

    /// Sets the pause flag; returns false if it already had that value.
    fn set_paused(&self, paused: bool) -> bool {
        self.paused_tx.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        })
    }

    /// Returns once the execution is resumed or aborted.
    async fn wait_while_paused(&self) {
        let mut rx = self.paused_rx.clone();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.token.cancelled() => return,
            }
        }
    }
}

struct QueuedWorkflow {
    summary: WorkflowSummary,
    definition: Arc<WorkflowDefinition>,
}

struct ActiveExecution {
    control: Arc<ExecutionControl>,
    summary: ExecutionSummary,
    started: Instant,
    global_timeout: Duration,
}

#[derive(Default)]
struct SharedState {
    queue: VecDeque<QueuedWorkflow>,
    active: HashMap<String, ActiveExecution>,
    history: VecDeque<ExecutionSummary>,
    stats: ExecutionStats,
}

struct Inner {
    config: OrchestratorConfig,
    registry: Arc<ExecutorRegistry>,
    events: EventBus,
    state: Mutex<SharedState>,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refreshes the snapshot `get_active` returns for `execution`.
    fn update_snapshot(&self, execution: &WorkflowExecution) {
        let summary = execution.summary();
        if let Some(active) = self.lock().active.get_mut(&execution.id) {
            active.summary = summary;
        }
    }
}

/// How the phase loop ended.
enum RunEnd {
    /// Every phase was processed
    Finished,
    /// The error strategy stopped the run after this phase
    Halted(usize),
    /// Cancelled or timed out from outside
    Aborted,
    /// Planning failed
    Error(OrchestratorError),
}

/// Handle to a spawned execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: String,
    join: JoinHandle<ExecutionSummary>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the execution to reach a terminal status.
    pub async fn wait(self) -> Result<ExecutionSummary> {
        self.join
            .await
            .map_err(|e| OrchestratorError::TaskJoin(e.to_string()))
    }
}

/// Queues, runs and supervises workflows. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl Orchestrator {
    /// Creates an orchestrator with an empty executor registry.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(config, Arc::new(ExecutorRegistry::new()))
    }

    /// Creates an orchestrator that dispatches through `registry`.
    pub fn with_registry(config: OrchestratorConfig, registry: Arc<ExecutorRegistry>) -> Self {
        info!(
            "Orchestrator ready: max {} concurrent workflows, history {}",
            config.max_concurrent_workflows, config.history_limit
        );

        Self {
            inner: Arc::new(Inner {
                events: EventBus::new(config.event_buffer),
                config,
                registry,
                state: Mutex::new(SharedState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.inner.registry
    }

    /// Registers the executor for an action tag.
    pub fn register_executor(&self, action: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.inner.registry.register(action, executor);
    }

    /// Receives every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.events.subscribe()
    }

    /// Validates `definition` and queues it under a fresh ID.
    ///
    /// Invalid definitions are rejected and never enter the queue.
    pub fn create_workflow(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        mut definition: WorkflowDefinition,
        strategy: OptimizationStrategy,
    ) -> std::result::Result<String, ValidationError> {
        let id = Uuid::new_v4().to_string();
        definition.id = id.clone();
        definition.name = name.into();
        definition.description = description.into();
        definition.optimization_strategy = strategy;

        if let Err(e) = validator::validate(&definition) {
            warn!("Rejected workflow '{}': {}", definition.name, e);
            return Err(e);
        }

        let missing = self.inner.registry.missing_actions(&definition);
        if !missing.is_empty() {
            warn!(
                "Workflow '{}' uses actions without executors: {}",
                definition.name,
                missing.join(", ")
            );
        }

        let summary = WorkflowSummary {
            id: id.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            node_count: definition.len(),
            strategy,
            queued_at: Utc::now(),
        };

        info!(
            "Queued workflow '{}' ({}): {} nodes, strategy {}",
            summary.name, id, summary.node_count, strategy
        );
        self.inner.events.publish(WorkflowEvent::WorkflowQueued {
            workflow_id: id.clone(),
            name: summary.name.clone(),
        });

        self.inner.lock().queue.push_back(QueuedWorkflow {
            summary,
            definition: Arc::new(definition),
        });

        Ok(id)
    }

    /// Dequeues a workflow and starts executing it in a background task.
    ///
    /// Fails if the ID is not queued or the concurrent-workflow limit is reached.
    pub fn execute_workflow(&self, workflow_id: &str) -> Result<ExecutionHandle> {
        let (definition, control) = {
            let mut state = self.inner.lock();

            let position = state
                .queue
                .iter()
                .position(|q| q.summary.id == workflow_id)
                .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;

            let max = self.inner.config.max_concurrent_workflows;
            if state.active.len() >= max {
                warn!("Cannot start '{}': {} workflows already running", workflow_id, max);
                return Err(OrchestratorError::ConcurrencyLimit { max });
            }

            let queued = state
                .queue
                .remove(position)
                .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))?;

            let control = Arc::new(ExecutionControl::new());
            let snapshot = WorkflowExecution::new(workflow_id, Arc::clone(&queued.definition));
            state.active.insert(
                workflow_id.to_string(),
                ActiveExecution {
                    control: Arc::clone(&control),
                    summary: snapshot.summary(),
                    started: Instant::now(),
                    global_timeout: queued.definition.global_timeout,
                },
            );

            (queued.definition, control)
        };

        let execution = WorkflowExecution::new(workflow_id, definition);
        let join = tokio::spawn(drive(Arc::clone(&self.inner), execution, control));

        Ok(ExecutionHandle {
            id: workflow_id.to_string(),
            join,
        })
    }

    /// Drops a queued workflow, or stops an active one.
    pub fn cancel(&self, workflow_id: &str) -> bool {
        let mut state = self.inner.lock();

        if let Some(position) = state.queue.iter().position(|q| q.summary.id == workflow_id) {
            state.queue.remove(position);
            info!("Removed queued workflow {}", workflow_id);
            return true;
        }

        match state.active.get(workflow_id) {
            Some(active) => {
                let cancelled = active.control.abort(AbortReason::Cancelled);
                if cancelled {
                    info!("Cancelling workflow {}", workflow_id);
                }
                cancelled
            }
            None => false,
        }
    }

    /// Holds a running execution before its next phase.
    ///
    /// Only `Running` executions can be paused. Nodes already dispatched keep running.
    pub fn pause(&self, workflow_id: &str) -> bool {
        let paused = {
            let state = self.inner.lock();
            match state.active.get(workflow_id) {
                Some(active)
                    if active.summary.status == ExecutionStatus::Running
                        && active.control.abort_reason().is_none() =>
                {
                    active.control.set_paused(true)
                }
                _ => false,
            }
        };

        if paused {
            info!("Pausing workflow {}", workflow_id);
            self.inner.events.publish(WorkflowEvent::WorkflowPaused {
                workflow_id: workflow_id.to_string(),
            });
        }
        paused
    }

    /// Lets a paused execution continue with its next phase.
    pub fn resume(&self, workflow_id: &str) -> bool {
        let resumed = {
            let state = self.inner.lock();
            match state.active.get(workflow_id) {
                Some(active) => active.control.set_paused(false),
                None => false,
            }
        };

        if resumed {
            info!("Resuming workflow {}", workflow_id);
            self.inner.events.publish(WorkflowEvent::WorkflowResumed {
                workflow_id: workflow_id.to_string(),
            });
        }
        resumed
    }

    /// Workflows waiting to be executed, oldest first.
    pub fn get_queue(&self) -> Vec<WorkflowSummary> {
        self.inner
            .lock()
            .queue
            .iter()
            .map(|q| q.summary.clone())
            .collect()
    }

    /// Snapshots of running executions.
    pub fn get_active(&self) -> Vec<ExecutionSummary> {
        let state = self.inner.lock();
        let mut active: Vec<ExecutionSummary> = state
            .active
            .values()
            .map(|a| {
                let mut summary = a.summary.clone();
                if a.control.is_paused() && summary.status == ExecutionStatus::Running {
                    summary.status = ExecutionStatus::Paused;
                }
                summary
            })
            .collect();
        active.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        active
    }

    /// Up to `limit` finished executions, newest first.
    pub fn get_history(&self, limit: usize) -> Vec<ExecutionSummary> {
        self.inner
            .lock()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> ExecutionStats {
        self.inner.lock().stats.clone()
    }

    /// Strategy that has worked best so far, once it has enough runs.
    pub fn recommended_strategy(&self) -> Option<OptimizationStrategy> {
        self.inner
            .lock()
            .stats
            .recommended_strategy(MIN_RUNS_FOR_RECOMMENDATION)
    }

    /// Fails every running execution that has outlived its global timeout.
    ///
    /// Returns the IDs that were timed out by this call.
    pub fn check_timeouts(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut timed_out = Vec::new();

        for (id, active) in &state.active {
            let running = active.summary.status == ExecutionStatus::Running
                && !active.control.is_paused();

            if running
                && active.started.elapsed() > active.global_timeout
                && active.control.abort(AbortReason::TimedOut)
            {
                warn!(
                    "Workflow {} exceeded its global timeout of {:?}",
                    id, active.global_timeout
                );
                timed_out.push(id.clone());
            }
        }

        timed_out
    }

    /// Starts the global-timeout watchdog. It stops on [`shutdown`](Self::shutdown).
    ///
    /// Intervals below [`MIN_WATCHDOG_INTERVAL`] are raised to it.
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let configured = self.inner.config.watchdog_interval;
        let period = configured.max(MIN_WATCHDOG_INTERVAL);
        if period != configured {
            warn!(
                "Watchdog interval {:?} is too short, using {:?}",
                configured, period
            );
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            debug!("Watchdog started, checking every {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.check_timeouts();
                    }
                    _ = orchestrator.inner.shutdown.cancelled() => {
                        debug!("Watchdog stopped");
                        return;
                    }
                }
            }
        })
    }

    /// Stops the watchdog and cancels every active execution.
    pub fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.inner.shutdown.cancel();

        let state = self.inner.lock();
        for active in state.active.values() {
            active.control.abort(AbortReason::Cancelled);
        }
    }
}

/// Runs one execution to a terminal status and files it into history.
async fn drive(
    inner: Arc<Inner>,
    mut execution: WorkflowExecution,
    control: Arc<ExecutionControl>,
) -> ExecutionSummary {
    inner.events.publish(WorkflowEvent::WorkflowStarted {
        workflow_id: execution.id.clone(),
        name: execution.definition.name.clone(),
        total_nodes: execution.definition.len(),
    });

    let end = run_phases(&inner, &mut execution, &control).await;
    finalize(&inner, &mut execution, &control, end)
}

/// Plans the execution and walks its phases.
async fn run_phases(
    inner: &Inner,
    execution: &mut WorkflowExecution,
    control: &ExecutionControl,
) -> RunEnd {
    if control.abort_reason().is_some() {
        return RunEnd::Aborted;
    }
    if let Err(e) = execution.transition(ExecutionStatus::Planning) {
        return RunEnd::Error(e);
    }
    inner.update_snapshot(execution);

    let definition = Arc::clone(&execution.definition);
    let strategy = definition.optimization_strategy;

    let planned = ExecutionPlanner::new(&definition).and_then(|planner| {
        let base = planner.plan()?;
        let before = base.len();
        planner.optimize(base, strategy).map(|plan| (before, plan))
    });
    let (phases_before, plan) = match planned {
        Ok(planned) => planned,
        Err(e) => return RunEnd::Error(e.into()),
    };

    execution
        .optimization_metrics
        .insert("phases_before".to_string(), phases_before as f64);
    execution
        .optimization_metrics
        .insert("phases_after".to_string(), plan.len() as f64);
    execution
        .optimization_metrics
        .insert("widest_phase".to_string(), plan.widest_phase() as f64);
    execution.log(
        Level::Info,
        format!(
            "Planned {} phases ({} before {} optimization)",
            plan.len(),
            phases_before,
            strategy
        ),
    );

    if strategy != OptimizationStrategy::Balanced {
        inner.events.publish(WorkflowEvent::OptimizationApplied {
            workflow_id: execution.id.clone(),
            strategy,
            phases_before,
            phases_after: plan.len(),
        });
    }

    execution.plan = plan;
    if let Err(e) = execution.transition(ExecutionStatus::Running) {
        return RunEnd::Error(e);
    }
    inner.update_snapshot(execution);

    let phase_executor =
        PhaseExecutor::new(Arc::clone(&inner.registry)).with_events(inner.events.clone());
    let phases = execution.plan.phases.clone();

    for (index, phase) in phases.iter().enumerate() {
        if control.abort_reason().is_some() {
            return RunEnd::Aborted;
        }

        if control.is_paused() {
            if let Err(e) = execution.transition(ExecutionStatus::Paused) {
                return RunEnd::Error(e);
            }
            inner.update_snapshot(execution);

            control.wait_while_paused().await;
            if control.abort_reason().is_some() {
                return RunEnd::Aborted;
            }

            if let Err(e) = execution.transition(ExecutionStatus::Running) {
                return RunEnd::Error(e);
            }
            inner.update_snapshot(execution);
        }

        execution.current_phase = index;
        execution.log(
            Level::Info,
            format!("Phase {}/{}: {}", index + 1, phases.len(), phase.join(", ")),
        );
        inner.events.publish(WorkflowEvent::PhaseStarted {
            workflow_id: execution.id.clone(),
            phase: index,
            node_ids: phase.clone(),
        });

        let outcome = phase_executor
            .run_phase(execution, phase, &control.token)
            .await;
        inner.update_snapshot(execution);

        if control.abort_reason().is_some() {
            return RunEnd::Aborted;
        }

        if outcome.has_failures() {
            match definition.error_handling_strategy {
                ErrorHandlingStrategy::FailFast | ErrorHandlingStrategy::FailOnCritical => {
                    execution.log(
                        Level::Error,
                        format!(
                            "Phase {} left {} node(s) failed, stopping ({})",
                            index + 1,
                            outcome.failed.len(),
                            definition.error_handling_strategy
                        ),
                    );
                    return RunEnd::Halted(index);
                }
                ErrorHandlingStrategy::RetryAndContinue | ErrorHandlingStrategy::ContinueOnError => {
                    execution.log(
                        Level::Warn,
                        format!(
                            "Phase {} left {} node(s) failed, continuing",
                            index + 1,
                            outcome.failed.len()
                        ),
                    );
                }
            }
        }
    }

    RunEnd::Finished
}

/// Chooses the terminal status, publishes it and moves the record to history.
fn finalize(
    inner: &Inner,
    execution: &mut WorkflowExecution,
    control: &ExecutionControl,
    end: RunEnd,
) -> ExecutionSummary {
    let status = match (control.abort_reason(), end) {
        (Some(AbortReason::Cancelled), _) => ExecutionStatus::Cancelled,
        (Some(AbortReason::TimedOut), _) => {
            let timeout = OrchestratorError::GlobalTimeout {
                timeout: execution.definition.global_timeout,
            };
            execution.log(Level::Error, timeout.to_string());
            ExecutionStatus::Failed
        }
        (None, RunEnd::Error(e)) => {
            execution.log(Level::Error, e.to_string());
            ExecutionStatus::Failed
        }
        (None, RunEnd::Halted(phase)) => {
            debug!("[{}] Halted after phase {}", execution.id, phase + 1);
            ExecutionStatus::Failed
        }
        (None, RunEnd::Aborted) => ExecutionStatus::Cancelled,
        (None, RunEnd::Finished) => {
            let rate = execution.success_rate();
            let threshold = inner.config.success_threshold;
            if rate >= threshold {
                ExecutionStatus::Completed
            } else {
                execution.log(
                    Level::Warn,
                    format!(
                        "Success rate {:.0}% is below the {:.0}% threshold",
                        rate * 100.0,
                        threshold * 100.0
                    ),
                );
                ExecutionStatus::Failed
            }
        }
    };

    if let Err(e) = execution.transition(status) {
        error!("[{}] {}", execution.id, e);
    }

    debug!("[{}] {}", execution.id, execution.timeline.gantt_chart());

    let summary = execution.summary();
    match summary.status {
        ExecutionStatus::Completed => info!(
            "Workflow '{}' completed: {}/{} nodes",
            summary.name, summary.completed_nodes, summary.total_nodes
        ),
        _ => warn!(
            "Workflow '{}' {}: {}",
            summary.name,
            summary.status,
            summary.failure_summary.as_deref().unwrap_or("no node errors")
        ),
    }

    let event = match summary.status {
        ExecutionStatus::Completed => WorkflowEvent::WorkflowCompleted(summary.clone()),
        ExecutionStatus::Cancelled => WorkflowEvent::WorkflowCancelled(summary.clone()),
        _ => WorkflowEvent::WorkflowFailed(summary.clone()),
    };

    {
        let mut state = inner.lock();
        state.active.remove(&execution.id);
        state.history.push_back(summary.clone());
        while state.history.len() > inner.config.history_limit {
            state.history.pop_front();
        }
        state.stats.record(&summary);
    }

    inner.events.publish(event);
    summary
}
