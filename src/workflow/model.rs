//! Workflow Data Model
//!
//! Immutable description of a workflow graph: nodes, their dependencies,
//! run conditions, and per-node execution parameters.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: nightly_report
//! optimization_strategy: resource_optimal
//! error_handling_strategy: retry_and_continue
//! max_parallel_tasks: 2
//! global_timeout: 600
//! nodes:
//!   - id: fetch
//!     action: system_command
//!     steps:
//!       - description: Download the export
//!         action: run
//!         parameters: { command: "curl -o export.csv https://example.org/export" }
//!     timeout: 60
//!
//!   - id: summarize
//!     action: llm_call
//!     dependencies: [fetch]
//!     priority: 5
//!     resources_required: { gpu: 1 }
//!     dependency_conditions:
//!       - depends_on_result: { node_id: fetch, operator: equals, value: "ok" }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default per-node timeout (five minutes).
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default global workflow timeout (one hour).
pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Serializes durations as (fractional) seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

fn default_node_timeout() -> Duration {
    DEFAULT_NODE_TIMEOUT
}

fn default_global_timeout() -> Duration {
    DEFAULT_GLOBAL_TIMEOUT
}

fn default_max_parallel() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

/// One step of a node's work. Opaque to the orchestrator and handed to the executor as-is.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    #[serde(default)]
    pub description: String,

    pub action: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,

    #[serde(with = "duration_secs", default = "default_node_timeout")]
    pub timeout: Duration,

    #[serde(default)]
    pub max_retries: u32,
}

impl Step {
    pub fn new(description: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: action.into(),
            parameters: BTreeMap::new(),
            timeout: DEFAULT_NODE_TIMEOUT,
            max_retries: 0,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Comparison applied by [`RunCondition::DependsOnResult`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
}

/// Predicate that must hold before a node is dispatched.
///
/// When a condition is unmet the node is skipped, not failed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    /// The referenced node must have completed successfully.
    DependsOnSuccess { node_id: String },

    /// The referenced node's recorded result must satisfy `operator value`.
    DependsOnResult {
        node_id: String,
        operator: ComparisonOperator,
        value: Value,
    },

    /// Wall-clock time of day must fall in `[start, end]`. Windows may wrap midnight.
    TimeWindow { start: NaiveTime, end: NaiveTime },
}

impl RunCondition {
    /// The node this condition reads from, if any.
    pub fn referenced_node(&self) -> Option<&str> {
        match self {
            Self::DependsOnSuccess { node_id } | Self::DependsOnResult { node_id, .. } => {
                Some(node_id)
            }
            Self::TimeWindow { .. } => None,
        }
    }
}

/// Per-node participation in the workflow-level retry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Whether this node may be retried under `RetryAndContinue`.
    #[serde(default = "default_true")]
    pub retryable: bool,

    /// Pause before the retry attempt.
    #[serde(with = "duration_secs", default)]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retryable: true,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn never() -> Self {
        Self {
            retryable: false,
            delay: Duration::ZERO,
        }
    }
}

/// A single schedulable unit of work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowNode {
    /// Unique key within the definition
    pub id: String,

    /// Tag selecting the registered executor
    pub action: String,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// IDs of nodes that must finish before this one starts
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// Written as single-key maps (`- depends_on_success: { node_id: a }`) in YAML and JSON alike
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub dependency_conditions: Vec<RunCondition>,

    /// Higher runs earlier among simultaneously eligible nodes
    #[serde(default)]
    pub priority: i32,

    #[serde(with = "duration_secs", default = "default_node_timeout")]
    pub timeout: Duration,

    /// Named resource -> quantity
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources_required: BTreeMap<String, u32>,

    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl WorkflowNode {
    /// Creates a node with no dependencies and default parameters.
    ///
    /// # Example
    ///
    /// ```
    /// use phasekeeper::workflow::WorkflowNode;
    /// use std::time::Duration;
    ///
    /// let node = WorkflowNode::new("summarize", "llm_call")
    ///     .depends_on("fetch")
    ///     .with_priority(5)
    ///     .with_timeout(Duration::from_secs(30))
    ///     .with_resource("gpu", 1);
    /// assert!(node.dependencies.contains("fetch"));
    /// ```
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            action: action.into().trim().to_string(),
            steps: Vec::new(),
            dependencies: BTreeSet::new(),
            dependency_conditions: Vec::new(),
            priority: 0,
            timeout: DEFAULT_NODE_TIMEOUT,
            resources_required: BTreeMap::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
        self.dependencies.insert(node_id.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, quantity: u32) -> Self {
        self.resources_required.insert(name.into(), quantity);
        self
    }

    pub fn with_condition(mut self, condition: RunCondition) -> Self {
        self.dependency_conditions.push(condition);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Returns true if the two nodes declare any resource name in common.
    pub fn shares_resources_with(&self, other: &WorkflowNode) -> bool {
        self.resources_required
            .keys()
            .any(|name| other.resources_required.contains_key(name))
    }
}

/// Post-processing applied to the planner's phases.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    TimeOptimal,
    ResourceOptimal,
    CostOptimal,
    ReliabilityOptimal,
    #[default]
    Balanced,
}

impl OptimizationStrategy {
    pub const ALL: [OptimizationStrategy; 5] = [
        Self::TimeOptimal,
        Self::ResourceOptimal,
        Self::CostOptimal,
        Self::ReliabilityOptimal,
        Self::Balanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeOptimal => "time_optimal",
            Self::ResourceOptimal => "resource_optimal",
            Self::CostOptimal => "cost_optimal",
            Self::ReliabilityOptimal => "reliability_optimal",
            Self::Balanced => "balanced",
        }
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| format!("Unknown optimization strategy: {}", s))
    }
}

/// How the orchestrator reacts to a phase that still has failures after retries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandlingStrategy {
    FailFast,
    #[default]
    RetryAndContinue,
    ContinueOnError,
    FailOnCritical,
}

impl fmt::Display for ErrorHandlingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FailFast => "fail_fast",
            Self::RetryAndContinue => "retry_and_continue",
            Self::ContinueOnError => "continue_on_error",
            Self::FailOnCritical => "fail_on_critical",
        };
        f.write_str(name)
    }
}

/// A complete workflow graph. Read-only once queued.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Nodes in definition order (used to break priority ties)
    pub nodes: Vec<WorkflowNode>,

    #[serde(with = "duration_secs", default = "default_global_timeout")]
    pub global_timeout: Duration,

    #[serde(default)]
    pub optimization_strategy: OptimizationStrategy,

    #[serde(default)]
    pub error_handling_strategy: ErrorHandlingStrategy,

    #[serde(default = "default_max_parallel")]
    pub max_parallel_tasks: usize,
}

impl WorkflowDefinition {
    /// Creates an empty definition with default strategies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            global_timeout: DEFAULT_GLOBAL_TIMEOUT,
            optimization_strategy: OptimizationStrategy::default(),
            error_handling_strategy: ErrorHandlingStrategy::default(),
            max_parallel_tasks: default_max_parallel(),
        }
    }

    /// Creates a definition from a list of nodes.
    pub fn from_nodes(name: impl Into<String>, nodes: Vec<WorkflowNode>) -> Self {
        Self {
            nodes,
            ..Self::new(name)
        }
    }

    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_strategy(mut self, strategy: OptimizationStrategy) -> Self {
        self.optimization_strategy = strategy;
        self
    }

    pub fn with_error_handling(mut self, strategy: ErrorHandlingStrategy) -> Self {
        self.error_handling_strategy = strategy;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel_tasks = max;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    /// Gets a node by ID.
    pub fn get_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Unique action tags used by the workflow, sorted.
    pub fn actions(&self) -> Vec<String> {
        let tags: BTreeSet<&str> = self.nodes.iter().map(|n| n.action.as_str()).collect();
        tags.into_iter().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = WorkflowNode::new(" build ", "system_command")
            .depends_on("fetch")
            .depends_on("fetch")
            .with_priority(3)
            .with_resource("cpu", 2)
            .with_step(Step::new("compile", "run").with_parameter("command", "make"));

        assert_eq!(node.id, "build");
        assert_eq!(node.dependencies.len(), 1);
        assert_eq!(node.priority, 3);
        assert_eq!(node.resources_required.get("cpu"), Some(&2));
        assert_eq!(node.steps[0].parameters["command"], Value::from("make"));
        assert_eq!(node.timeout, DEFAULT_NODE_TIMEOUT);
    }

    #[test]
    fn test_shares_resources() {
        let p = WorkflowNode::new("p", "llm_call").with_resource("gpu", 1);
        let q = WorkflowNode::new("q", "llm_call").with_resource("gpu", 2);
        let r = WorkflowNode::new("r", "task");

        assert!(p.shares_resources_with(&q));
        assert!(!p.shares_resources_with(&r));
        assert!(!r.shares_resources_with(&r));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "time-optimal".parse::<OptimizationStrategy>().unwrap(),
            OptimizationStrategy::TimeOptimal
        );
        assert_eq!(
            "Balanced".parse::<OptimizationStrategy>().unwrap(),
            OptimizationStrategy::Balanced
        );
        assert!("fastest".parse::<OptimizationStrategy>().is_err());
    }

    #[test]
    fn test_definition_defaults() {
        let def = WorkflowDefinition::new("empty");
        assert!(def.is_empty());
        assert_eq!(def.optimization_strategy, OptimizationStrategy::Balanced);
        assert_eq!(
            def.error_handling_strategy,
            ErrorHandlingStrategy::RetryAndContinue
        );
        assert!(def.max_parallel_tasks >= 1);
    }

    #[test]
    fn test_definition_actions_unique_sorted() {
        let def = WorkflowDefinition::from_nodes(
            "wf",
            vec![
                WorkflowNode::new("a", "task"),
                WorkflowNode::new("b", "file_operation"),
                WorkflowNode::new("c", "task"),
            ],
        );
        assert_eq!(def.actions(), vec!["file_operation", "task"]);
        assert!(def.get_node("b").is_some());
        assert!(def.get_node("z").is_none());
    }

    #[test]
    fn test_deserialize_yaml_node() {
        let yaml = r#"
id: summarize
action: llm_call
dependencies: [fetch]
timeout: 1.5
retry_policy: { retryable: false }
dependency_conditions:
  - depends_on_result: { node_id: fetch, operator: equals, value: ok }
  - time_window: { start: "08:00:00", end: "18:00:00" }
"#;
        let node: WorkflowNode = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.timeout, Duration::from_millis(1500));
        assert!(!node.retry_policy.retryable);
        assert_eq!(node.dependency_conditions.len(), 2);
        assert_eq!(
            node.dependency_conditions[0],
            RunCondition::DependsOnResult {
                node_id: "fetch".to_string(),
                operator: ComparisonOperator::Equals,
                value: Value::from("ok"),
            }
        );
        assert_eq!(node.dependency_conditions[0].referenced_node(), Some("fetch"));
        assert_eq!(node.dependency_conditions[1].referenced_node(), None);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let yaml = "id: a\naction: task\ntimeout: -1\n";
        assert!(serde_yaml::from_str::<WorkflowNode>(yaml).is_err());
    }

    #[test]
    fn test_overflowing_duration_rejected() {
        let yaml = "id: a\naction: task\ntimeout: 1e30\n";
        assert!(serde_yaml::from_str::<WorkflowNode>(yaml).is_err());

        let json = r#"{"id": "a", "action": "task", "timeout": 1e30}"#;
        assert!(serde_json::from_str::<WorkflowNode>(json).is_err());
    }

    #[test]
    fn test_conditions_same_shape_in_yaml_and_json() {
        let node = WorkflowNode::new("b", "task")
            .with_condition(RunCondition::DependsOnSuccess {
                node_id: "a".to_string(),
            })
            .with_condition(RunCondition::DependsOnResult {
                node_id: "a".to_string(),
                operator: ComparisonOperator::GreaterThan,
                value: Value::from(3),
            });

        let yaml = serde_yaml::to_string(&node).unwrap();
        assert!(yaml.contains("depends_on_success:"));
        assert!(!yaml.contains('!'));
        assert_eq!(serde_yaml::from_str::<WorkflowNode>(&yaml).unwrap(), node);

        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains(r#"{"depends_on_success":{"node_id":"a"}}"#));
        assert_eq!(serde_json::from_str::<WorkflowNode>(&json).unwrap(), node);
    }
}
