//! Workflow Validation
//!
//! Structural checks for workflow definitions and construction of the
//! dependency graph used by the planner:
//! - Node field validation
//! - Reference integrity (dependencies and run conditions)
//! - Cycle detection (DFS with a recursion stack, O(V+E))

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, info};

use crate::error::ValidationError;

use super::model::{WorkflowDefinition, WorkflowNode};

/// Adjacency maps over node IDs.
///
/// `forward` maps a node to the nodes that depend on it (execution direction);
/// `reverse` maps a node to the nodes it depends on. Nodes referenced by a run
/// condition count as dependencies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    pub forward: HashMap<String, BTreeSet<String>>,
    pub reverse: HashMap<String, BTreeSet<String>>,
    /// Node IDs in definition order
    pub order: Vec<String>,
}

impl DependencyGraph {
    /// Nodes that must finish before `id`.
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &String> {
        self.reverse.get(id).into_iter().flatten()
    }

    /// Nodes that wait on `id`.
    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &String> {
        self.forward.get(id).into_iter().flatten()
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.reverse.get(id).map_or(0, BTreeSet::len)
    }

    /// Nodes with no dependencies, in definition order.
    pub fn roots(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.in_degree(id) == 0)
            .map(String::as_str)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Every node ID this node waits on: declared dependencies plus condition references.
pub fn effective_dependencies(node: &WorkflowNode) -> BTreeSet<&str> {
    node.dependencies
        .iter()
        .map(String::as_str)
        .chain(
            node.dependency_conditions
                .iter()
                .filter_map(|c| c.referenced_node()),
        )
        .collect()
}

/// Builds adjacency and reverse-adjacency maps. Pure; does not validate.
pub fn build(definition: &WorkflowDefinition) -> DependencyGraph {
    let mut graph = DependencyGraph::default();

    for node in &definition.nodes {
        graph.order.push(node.id.clone());
        graph.forward.entry(node.id.clone()).or_default();
        graph.reverse.entry(node.id.clone()).or_default();
    }

    for node in &definition.nodes {
        for dep in effective_dependencies(node) {
            graph
                .reverse
                .entry(node.id.clone())
                .or_default()
                .insert(dep.to_string());
            graph
                .forward
                .entry(dep.to_string())
                .or_default()
                .insert(node.id.clone());
        }
    }

    graph
}

/// Validates a definition, returning the first problem found.
pub fn validate(definition: &WorkflowDefinition) -> Result<(), ValidationError> {
    info!(
        "Validating workflow '{}' with {} nodes",
        definition.name,
        definition.nodes.len()
    );

    match validation_errors(definition).into_iter().next() {
        Some(err) => Err(err),
        None => {
            debug!("Workflow '{}' is structurally valid", definition.name);
            Ok(())
        }
    }
}

/// Collects every validation problem in a definition.
///
/// Cycle detection only runs once references are known to be sound. Useful
/// for showing all problems at once.
pub fn validation_errors(definition: &WorkflowDefinition) -> Vec<ValidationError> {
    if definition.nodes.is_empty() {
        return vec![ValidationError::EmptyWorkflow];
    }

    let mut errors = Vec::new();

    if definition.max_parallel_tasks == 0 {
        errors.push(ValidationError::InvalidParallelism);
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &definition.nodes {
        if node.id.trim().is_empty() {
            errors.push(ValidationError::EmptyNodeId);
        } else if !seen_ids.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    for node in &definition.nodes {
        for dep in &node.dependencies {
            if !seen_ids.contains(dep.as_str()) {
                errors.push(ValidationError::UnknownDependency {
                    node: node.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        for reference in node
            .dependency_conditions
            .iter()
            .filter_map(|c| c.referenced_node())
        {
            if !seen_ids.contains(reference) {
                errors.push(ValidationError::UnknownConditionReference {
                    node: node.id.clone(),
                    reference: reference.to_string(),
                });
            }
        }
    }

    if errors.is_empty() {
        if let Some(path) = find_cycle(definition) {
            errors.push(ValidationError::CyclicDependency { path });
        }
    }

    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search along dependency edges. Returns the cycle as a path
/// whose first and last elements are the same node.
fn find_cycle(definition: &WorkflowDefinition) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = definition
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let edges: Vec<Vec<usize>> = definition
        .nodes
        .iter()
        .map(|n| {
            effective_dependencies(n)
                .into_iter()
                .filter_map(|dep| index.get(dep).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; definition.nodes.len()];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..definition.nodes.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            if cursor == edges[node].len() {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let next = edges[node][cursor];
            match marks[next] {
                Mark::Unvisited => {
                    marks[next] = Mark::OnStack;
                    stack.push((next, 0));
                }
                Mark::OnStack => {
                    let start = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|(n, _)| definition.nodes[*n].id.clone())
                        .collect();
                    path.push(definition.nodes[next].id.clone());
                    debug!("Cycle detected: {}", path.join(" -> "));
                    return Some(path);
                }
                Mark::Done => {}
            }
        }
    }

    None
}
