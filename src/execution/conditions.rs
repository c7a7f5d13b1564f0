//! Run Condition Evaluation
//!
//! Decides whether a node may be dispatched. A node runs only when every
//! declared dependency completed and each of its run conditions holds;
//! otherwise it is skipped with a reason.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveTime;
use serde_json::Value;

use crate::workflow::{ComparisonOperator, RunCondition, WorkflowNode};

use super::registry::NodeResult;

/// Snapshot of execution state that conditions read.
pub struct ConditionContext<'a> {
    pub completed: &'a BTreeSet<String>,
    pub results: &'a HashMap<String, NodeResult>,
    /// Local time of day used for time windows
    pub now: NaiveTime,
}

/// Checks the node's dependencies and run conditions.
///
/// Returns `Err(reason)` when the node should be skipped.
pub fn check_node(node: &WorkflowNode, ctx: &ConditionContext<'_>) -> Result<(), String> {
    if let Some(dep) = node.dependencies.iter().find(|d| !ctx.completed.contains(*d)) {
        return Err(format!("dependency '{}' did not complete", dep));
    }

    for condition in &node.dependency_conditions {
        evaluate(condition, ctx)?;
    }

    Ok(())
}

/// Evaluates one condition.
pub fn evaluate(condition: &RunCondition, ctx: &ConditionContext<'_>) -> Result<(), String> {
    match condition {
        RunCondition::DependsOnSuccess { node_id } => {
            if ctx.completed.contains(node_id) {
                Ok(())
            } else {
                Err(format!("'{}' did not succeed", node_id))
            }
        }
        RunCondition::DependsOnResult {
            node_id,
            operator,
            value,
        } => {
            let actual = ctx
                .results
                .get(node_id)
                .ok_or_else(|| format!("'{}' has no recorded result", node_id))?;

            if compare(&actual.output, *operator, value) {
                Ok(())
            } else {
                Err(format!(
                    "result of '{}' ({}) is not {:?} {}",
                    node_id, actual.output, operator, value
                ))
            }
        }
        RunCondition::TimeWindow { start, end } => {
            if in_window(ctx.now, *start, *end) {
                Ok(())
            } else {
                Err(format!("{} is outside window {}-{}", ctx.now, start, end))
            }
        }
    }
}

/// Applies `operator` with `actual` on the left.
pub fn compare(actual: &Value, operator: ComparisonOperator, expected: &Value) -> bool {
    match operator {
        ComparisonOperator::Equals => values_equal(actual, expected),
        ComparisonOperator::Contains => match actual {
            Value::String(s) => scalar_text(expected).map_or(false, |needle| s.contains(&needle)),
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            Value::Object(map) => expected.as_str().map_or(false, |key| map.contains_key(key)),
            _ => false,
        },
        ComparisonOperator::GreaterThan => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ComparisonOperator::LessThan => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
    }
}

/// True when `now` lies in `[start, end]`; a window with `start > end` wraps midnight.
pub fn in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    // "5" and 5 compare equal
    match (a, b) {
        (Value::String(s), other) | (other, Value::String(s)) => {
            scalar_text(other).map_or(false, |text| &text == s)
        }
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
