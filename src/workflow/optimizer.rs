//! Optimization Advisor
//!
//! Reshapes planner output according to a workflow's optimization strategy.
//! Every transformation keeps each node strictly after the phases holding its
//! dependencies.

use std::collections::HashMap;

use log::{debug, info};
use once_cell::sync::Lazy;

use super::model::{OptimizationStrategy, WorkflowDefinition, WorkflowNode};
use super::planner::ExecutionPlan;
use super::validator::DependencyGraph;

/// Nodes above this estimated reliability run in the "reliable" phase.
pub const RELIABILITY_THRESHOLD: f64 = 0.8;

/// Node timeout that maps to a cost multiplier of 1.0.
const REFERENCE_TIMEOUT_SECS: f64 = 300.0;

/// Reliability lost per declared step.
const STEP_RELIABILITY_PENALTY: f64 = 0.02;

const DEFAULT_BASE_COST: f64 = 1.0;
const DEFAULT_BASE_RELIABILITY: f64 = 0.8;

/// Relative cost of each action type.
static BASE_COST: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("file_operation", 0.5),
        ("task", 1.0),
        ("system_command", 1.0),
        ("workflow", 2.0),
        ("llm_call", 3.0),
    ])
});

/// Baseline success probability of each action type.
static BASE_RELIABILITY: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("file_operation", 0.95),
        ("task", 0.9),
        ("system_command", 0.85),
        ("workflow", 0.85),
        ("llm_call", 0.75),
    ])
});

/// Estimated cost: `base_cost(action) * (timeout / 300s)`.
pub fn estimate_cost(node: &WorkflowNode) -> f64 {
    let base = BASE_COST
        .get(node.action.as_str())
        .copied()
        .unwrap_or(DEFAULT_BASE_COST);
    base * (node.timeout.as_secs_f64() / REFERENCE_TIMEOUT_SECS)
}

/// Estimated reliability in `[0, 1]`, reduced by step count.
pub fn estimate_reliability(node: &WorkflowNode) -> f64 {
    let base = BASE_RELIABILITY
        .get(node.action.as_str())
        .copied()
        .unwrap_or(DEFAULT_BASE_RELIABILITY);
    (base - STEP_RELIABILITY_PENALTY * node.steps.len() as f64).clamp(0.0, 1.0)
}

pub struct OptimizationAdvisor<'a> {
    definition: &'a WorkflowDefinition,
    graph: &'a DependencyGraph,
    nodes: HashMap<&'a str, &'a WorkflowNode>,
}

impl<'a> OptimizationAdvisor<'a> {
    pub fn new(definition: &'a WorkflowDefinition, graph: &'a DependencyGraph) -> Self {
        let nodes = definition
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n))
            .collect();
        Self {
            definition,
            graph,
            nodes,
        }
    }

    /// Applies `strategy` to `plan` and returns the replacement plan.
    pub fn optimize(&self, plan: ExecutionPlan, strategy: OptimizationStrategy) -> ExecutionPlan {
        let before = plan.len();

        let optimized = match strategy {
            OptimizationStrategy::TimeOptimal => self.merge_phases(plan),
            OptimizationStrategy::ResourceOptimal => self.split_by_resources(plan),
            OptimizationStrategy::CostOptimal => self.order_by_cost(plan),
            OptimizationStrategy::ReliabilityOptimal => self.split_by_reliability(plan),
            OptimizationStrategy::Balanced => plan,
        };

        info!(
            "Applied {} optimization: {} phases -> {} phases",
            strategy,
            before,
            optimized.len()
        );
        optimized
    }

    fn node(&self, id: &str) -> Option<&'a WorkflowNode> {
        self.nodes.get(id).copied()
    }

    /// Folds each phase into its predecessor while the combined size fits
    /// `max_parallel_tasks` and nothing in it depends on the predecessor.
    fn merge_phases(&self, plan: ExecutionPlan) -> ExecutionPlan {
        let max_parallel = self.definition.max_parallel_tasks.max(1);
        let mut merged: Vec<Vec<String>> = Vec::new();

        for phase in plan.phases {
            if let Some(last) = merged.last_mut() {
                let fits = last.len() + phase.len() <= max_parallel;
                let independent = !phase.iter().any(|id| {
                    self.graph
                        .dependencies(id)
                        .any(|dep| last.iter().any(|other| other == dep))
                });

                if fits && independent {
                    debug!("Merging phase {:?} into {:?}", phase, last);
                    last.extend(phase);
                    continue;
                }
            }
            merged.push(phase);
        }

        ExecutionPlan::new(merged)
    }

    /// First-fit grouping so that no two nodes in a group share a resource name.
    fn split_by_resources(&self, plan: ExecutionPlan) -> ExecutionPlan {
        let mut phases = Vec::new();

        for phase in plan.phases {
            let mut groups: Vec<Vec<String>> = Vec::new();

            for id in phase {
                let slot = self.node(&id).and_then(|node| {
                    groups.iter().position(|group| {
                        group.iter().all(|other| {
                            self.node(other)
                                .map_or(true, |o| !node.shares_resources_with(o))
                        })
                    })
                });

                match slot {
                    Some(index) => groups[index].push(id),
                    None => {
                        if !groups.is_empty() {
                            debug!("Node '{}' conflicts with every group, opening a new one", id);
                        }
                        groups.push(vec![id]);
                    }
                }
            }

            phases.extend(groups);
        }

        ExecutionPlan::new(phases)
    }

    /// Cheapest first within each phase; ties keep planner order.
    fn order_by_cost(&self, plan: ExecutionPlan) -> ExecutionPlan {
        let phases = plan
            .phases
            .into_iter()
            .map(|mut phase| {
                phase.sort_by(|a, b| {
                    let cost_a = self.node(a).map_or(f64::MAX, estimate_cost);
                    let cost_b = self.node(b).map_or(f64::MAX, estimate_cost);
                    cost_a.total_cmp(&cost_b)
                });
                phase
            })
            .collect();

        ExecutionPlan::new(phases)
    }

    /// Reliable nodes run first; risky ones get their own following phase.
    fn split_by_reliability(&self, plan: ExecutionPlan) -> ExecutionPlan {
        let mut phases = Vec::new();

        for phase in plan.phases {
            let (reliable, risky): (Vec<String>, Vec<String>) = phase.into_iter().partition(|id| {
                self.node(id)
                    .map_or(false, |n| estimate_reliability(n) > RELIABILITY_THRESHOLD)
            });

            if !reliable.is_empty() {
                phases.push(reliable);
            }
            if !risky.is_empty() {
                phases.push(risky);
            }
        }

        ExecutionPlan::new(phases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Step;
    use crate::workflow::planner::ExecutionPlanner;
    use crate::workflow::validator::build;
    use std::time::Duration;

    fn ids(phase: &[&str]) -> Vec<String> {
        phase.iter().map(|s| s.to_string()).collect()
    }

    fn optimize(def: &WorkflowDefinition, plan: ExecutionPlan, strategy: OptimizationStrategy) -> ExecutionPlan {
        let graph = build(def);
        let result = OptimizationAdvisor::new(def, &graph).optimize(plan, strategy);
        assert!(result.verify(&graph).is_ok(), "optimized plan broke dependency order");
        result
    }

    #[test]
    fn test_resource_optimal_splits_conflicts() {
        let def = WorkflowDefinition::from_nodes(
            "gpu",
            vec![
                WorkflowNode::new("P", "llm_call").with_resource("gpu", 1),
                WorkflowNode::new("Q", "llm_call").with_resource("gpu", 1),
                WorkflowNode::new("R", "task"),
            ],
        )
        .with_max_parallel(3);
        let plan = ExecutionPlanner::new(&def).unwrap().plan().unwrap();
        assert_eq!(plan.len(), 1);

        let result = optimize(&def, plan, OptimizationStrategy::ResourceOptimal);
        assert_eq!(result.phases, vec![ids(&["P", "R"]), ids(&["Q"])]);
    }

    #[test]
    fn test_resource_optimal_keeps_disjoint_together() {
        let def = WorkflowDefinition::from_nodes(
            "disjoint",
            vec![
                WorkflowNode::new("a", "task").with_resource("disk", 1),
                WorkflowNode::new("b", "task").with_resource("network", 1),
            ],
        )
        .with_max_parallel(2);
        let plan = ExecutionPlanner::new(&def).unwrap().plan().unwrap();
        let result = optimize(&def, plan, OptimizationStrategy::ResourceOptimal);
        assert_eq!(result.phases, vec![ids(&["a", "b"])]);
    }

    #[test]
    fn test_time_optimal_merges_independent_phases() {
        let def = WorkflowDefinition::from_nodes(
            "merge",
            vec![
                WorkflowNode::new("a", "task"),
                WorkflowNode::new("b", "task"),
                WorkflowNode::new("c", "task").depends_on("a"),
            ],
        )
        .with_max_parallel(3);
        // A hand-built plan with an unnecessary split
        let plan = ExecutionPlan::new(vec![ids(&["a"]), ids(&["b"]), ids(&["c"])]);

        let result = optimize(&def, plan, OptimizationStrategy::TimeOptimal);
        assert_eq!(result.phases, vec![ids(&["a", "b"]), ids(&["c"])]);
    }

    #[test]
    fn test_time_optimal_never_merges_dependents() {
        let def = WorkflowDefinition::from_nodes(
            "chain",
            vec![
                WorkflowNode::new("a", "task"),
                WorkflowNode::new("b", "task").depends_on("a"),
            ],
        )
        .with_max_parallel(4);
        let plan = ExecutionPlanner::new(&def).unwrap().plan().unwrap();
        let result = optimize(&def, plan, OptimizationStrategy::TimeOptimal);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_time_optimal_respects_parallel_limit() {
        let def = WorkflowDefinition::from_nodes(
            "limit",
            vec![
                WorkflowNode::new("a", "task"),
                WorkflowNode::new("b", "task"),
                WorkflowNode::new("c", "task"),
            ],
        )
        .with_max_parallel(2);
        let plan = ExecutionPlan::new(vec![ids(&["a"]), ids(&["b"]), ids(&["c"])]);
        let result = optimize(&def, plan, OptimizationStrategy::TimeOptimal);
        assert_eq!(result.phases, vec![ids(&["a", "b"]), ids(&["c"])]);
    }

    #[test]
    fn test_cost_optimal_reorders_within_phase() {
        let def = WorkflowDefinition::from_nodes(
            "cost",
            vec![
                WorkflowNode::new("expensive", "llm_call"),
                WorkflowNode::new("cheap", "file_operation"),
                WorkflowNode::new("short", "llm_call").with_timeout(Duration::from_secs(30)),
            ],
        )
        .with_max_parallel(3);
        let plan = ExecutionPlanner::new(&def).unwrap().plan().unwrap();
        let result = optimize(&def, plan, OptimizationStrategy::CostOptimal);

        assert_eq!(result.len(), 1);
        assert_eq!(result.phases[0], ids(&["short", "cheap", "expensive"]));
    }

    #[test]
    fn test_reliability_optimal_partitions() {
        let def = WorkflowDefinition::from_nodes(
            "reliability",
            vec![
                WorkflowNode::new("llm", "llm_call"),
                WorkflowNode::new("file", "file_operation"),
                WorkflowNode::new("after", "task").depends_on("llm"),
            ],
        )
        .with_max_parallel(3);
        let plan = ExecutionPlanner::new(&def).unwrap().plan().unwrap();
        let result = optimize(&def, plan, OptimizationStrategy::ReliabilityOptimal);

        assert_eq!(
            result.phases,
            vec![ids(&["file"]), ids(&["llm"]), ids(&["after"])]
        );
    }

    #[test]
    fn test_balanced_is_identity() {
        let def = WorkflowDefinition::from_nodes(
            "identity",
            vec![WorkflowNode::new("a", "llm_call"), WorkflowNode::new("b", "task")],
        );
        let plan = ExecutionPlanner::new(&def).unwrap().plan().unwrap();
        let result = optimize(&def, plan.clone(), OptimizationStrategy::Balanced);
        assert_eq!(result, plan);
    }

    #[test]
    fn test_estimates() {
        let node = WorkflowNode::new("n", "llm_call").with_timeout(Duration::from_secs(600));
        assert!((estimate_cost(&node) - 6.0).abs() < 1e-9);

        let unknown = WorkflowNode::new("u", "mystery");
        assert!((estimate_cost(&unknown) - 1.0).abs() < 1e-9);
        assert!(estimate_reliability(&unknown) <= RELIABILITY_THRESHOLD);

        let mut busy = WorkflowNode::new("b", "system_command");
        assert!(estimate_reliability(&busy) > RELIABILITY_THRESHOLD);
        for i in 0..5 {
            busy = busy.with_step(Step::new(format!("step {}", i), "run"));
        }
        assert!(estimate_reliability(&busy) < RELIABILITY_THRESHOLD);
    }
}
