//! Execution Planner
//!
//! Turns a validated workflow into an ordered list of phases:
//! - Kahn-style topological layering
//! - Priority ordering among simultaneously eligible nodes
//! - Phase size bounded by `max_parallel_tasks`
//! - Optional reshaping by the optimization advisor

use std::collections::{BTreeSet, HashMap};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;

use super::model::{OptimizationStrategy, WorkflowDefinition};
use super::optimizer::OptimizationAdvisor;
use super::validator::{self, DependencyGraph};

/// Ordered phases; each phase holds node IDs that may run concurrently.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub phases: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn new(phases: Vec<Vec<String>>) -> Self {
        Self { phases }
    }

    /// Number of phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Total number of scheduled nodes across all phases.
    pub fn node_count(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    /// Index of the phase containing `node_id`.
    pub fn phase_of(&self, node_id: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.iter().any(|id| id == node_id))
    }

    /// Size of the largest phase.
    pub fn widest_phase(&self) -> usize {
        self.phases.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Checks that every node appears exactly once and strictly after all
    /// of its dependencies.
    pub fn verify(&self, graph: &DependencyGraph) -> Result<(), PlanningError> {
        let mut phase_index: HashMap<&str, usize> = HashMap::new();
        for (index, phase) in self.phases.iter().enumerate() {
            for id in phase {
                phase_index.insert(id.as_str(), index);
            }
        }

        let missing: Vec<String> = graph
            .order
            .iter()
            .filter(|id| !phase_index.contains_key(id.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() || self.node_count() != graph.len() {
            return Err(PlanningError::Stalled { remaining: missing });
        }

        for id in &graph.order {
            let node_phase = phase_index[id.as_str()];
            for dep in graph.dependencies(id) {
                if phase_index.get(dep.as_str()).map_or(true, |&p| p >= node_phase) {
                    return Err(PlanningError::InvariantViolated {
                        node: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Plans a single definition.
///
/// # Example
///
/// ```
/// use phasekeeper::workflow::{ExecutionPlanner, WorkflowDefinition, WorkflowNode};
///
/// let definition = WorkflowDefinition::from_nodes(
///     "example",
///     vec![
///         WorkflowNode::new("a", "task"),
///         WorkflowNode::new("b", "task").depends_on("a"),
///     ],
/// );
/// let plan = ExecutionPlanner::new(&definition).unwrap().plan().unwrap();
/// assert_eq!(plan.phases, vec![vec!["a".to_string()], vec!["b".to_string()]]);
/// ```
pub struct ExecutionPlanner<'a> {
    definition: &'a WorkflowDefinition,
    graph: DependencyGraph,
}

impl<'a> ExecutionPlanner<'a> {
    /// Validates the definition and builds its dependency graph.
    pub fn new(definition: &'a WorkflowDefinition) -> Result<Self, PlanningError> {
        validator::validate(definition)?;
        let graph = validator::build(definition);

        info!(
            "Creating planner for '{}': {} nodes, max {} parallel",
            definition.name,
            graph.len(),
            definition.max_parallel_tasks
        );

        Ok(Self { definition, graph })
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Groups nodes into phases by topological layer.
    ///
    /// Each round takes every node whose dependencies are all scheduled,
    /// orders them by priority (descending, ties by definition order) and
    /// keeps the first `max_parallel_tasks` as the next phase. Deterministic
    /// for a fixed definition.
    pub fn plan(&self) -> Result<ExecutionPlan, PlanningError> {
        let nodes = &self.definition.nodes;
        let max_parallel = self.definition.max_parallel_tasks.max(1);

        let mut unresolved: HashMap<&str, usize> = nodes
            .iter()
            .map(|n| (n.id.as_str(), self.graph.in_degree(&n.id)))
            .collect();
        let mut unscheduled: BTreeSet<usize> = (0..nodes.len()).collect();
        let mut phases = Vec::new();

        while !unscheduled.is_empty() {
            let mut candidates: Vec<usize> = unscheduled
                .iter()
                .copied()
                .filter(|&i| unresolved[nodes[i].id.as_str()] == 0)
                .collect();

            if candidates.is_empty() {
                let remaining = unscheduled.iter().map(|&i| nodes[i].id.clone()).collect();
                return Err(PlanningError::Stalled { remaining });
            }

            candidates.sort_by(|&a, &b| {
                nodes[b]
                    .priority
                    .cmp(&nodes[a].priority)
                    .then_with(|| a.cmp(&b))
            });
            candidates.truncate(max_parallel);

            for &i in &candidates {
                unscheduled.remove(&i);
                for dependent in self.graph.dependents(&nodes[i].id) {
                    if let Some(count) = unresolved.get_mut(dependent.as_str()) {
                        *count = count.saturating_sub(1);
                    }
                }
            }

            let phase: Vec<String> = candidates.iter().map(|&i| nodes[i].id.clone()).collect();
            debug!("Phase {}: {:?}", phases.len(), phase);
            phases.push(phase);
        }

        Ok(ExecutionPlan::new(phases))
    }

    /// Reshapes `base` with `strategy` and re-checks the dependency ordering
    /// of the result.
    pub fn optimize(
        &self,
        base: ExecutionPlan,
        strategy: OptimizationStrategy,
    ) -> Result<ExecutionPlan, PlanningError> {
        let optimized =
            OptimizationAdvisor::new(self.definition, &self.graph).optimize(base, strategy);
        optimized.verify(&self.graph)?;
        Ok(optimized)
    }

    /// Plans, then applies `strategy`.
    pub fn plan_with_strategy(
        &self,
        strategy: OptimizationStrategy,
    ) -> Result<ExecutionPlan, PlanningError> {
        self.optimize(self.plan()?, strategy)
    }
}

/// Plans a definition with its own optimization strategy.
pub fn plan(definition: &WorkflowDefinition) -> Result<ExecutionPlan, PlanningError> {
    ExecutionPlanner::new(definition)?.plan_with_strategy(definition.optimization_strategy)
}
