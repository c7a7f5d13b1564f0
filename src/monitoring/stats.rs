//! Execution Statistics
//!
//! Aggregates finished executions and keeps per-strategy averages, which
//! hosts can use to pick an optimization strategy for the next run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::workflow::state::{ExecutionStatus, ExecutionSummary};
use crate::workflow::OptimizationStrategy;

/// Runs a strategy needs before it can be recommended.
pub const MIN_RUNS_FOR_RECOMMENDATION: usize = 3;

/// Running averages for one optimization strategy.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct StrategyStats {
    pub runs: usize,
    pub average_success_rate: f64,
    pub average_duration_ms: f64,
}

impl StrategyStats {
    fn record(&mut self, success_rate: f64, duration_ms: f64) {
        self.runs += 1;
        let n = self.runs as f64;
        self.average_success_rate += (success_rate - self.average_success_rate) / n;
        self.average_duration_ms += (duration_ms - self.average_duration_ms) / n;
    }
}

/// Totals over all finished executions.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub total_executions: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub average_duration_ms: f64,
    pub average_success_rate: f64,
    pub per_strategy: BTreeMap<String, StrategyStats>,
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a terminal execution into the totals. Non-terminal summaries are ignored.
    pub fn record(&mut self, summary: &ExecutionSummary) {
        match summary.status {
            ExecutionStatus::Completed => self.completed += 1,
            ExecutionStatus::Failed => self.failed += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            _ => return,
        }

        self.total_executions += 1;
        let n = self.total_executions as f64;
        let duration = summary.duration_ms.unwrap_or(0) as f64;

        self.average_duration_ms += (duration - self.average_duration_ms) / n;
        self.average_success_rate += (summary.success_rate - self.average_success_rate) / n;

        self.per_strategy
            .entry(summary.strategy.to_string())
            .or_default()
            .record(summary.success_rate, duration);
    }

    /// Fraction of finished executions that completed.
    pub fn completion_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total_executions as f64
    }

    /// Strategy with the best average success rate among those with at
    /// least `min_runs` runs. Ties go to the lower average duration.
    pub fn recommended_strategy(&self, min_runs: usize) -> Option<OptimizationStrategy> {
        self.per_strategy
            .iter()
            .filter(|(_, stats)| stats.runs >= min_runs.max(1))
            .max_by(|(_, a), (_, b)| {
                a.average_success_rate
                    .total_cmp(&b.average_success_rate)
                    .then_with(|| b.average_duration_ms.total_cmp(&a.average_duration_ms))
            })
            .and_then(|(name, _)| name.parse().ok())
    }
}
