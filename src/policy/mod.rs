//! # Policy Model
//!
//! Declarative placement policies: typed documents with condition
//! combinators (`all` conjunction, `any` disjunction), ordered actions, and
//! priorities. The evaluator and engine in the submodules turn these
//! documents plus a system-state snapshot into executable actions.

mod engine;
mod evaluator;
mod manager;
mod parser;
mod store;

pub use engine::{ActionExecutor, Engine, MetricProvider};
pub use evaluator::{AdvancedEvaluator, Evaluator};
pub use manager::PolicyManager;
pub use parser::Parser;
pub use store::{HistoryAction, InMemoryPolicyStore, PersistentPolicyStore, PolicyHistoryEntry,
    PolicyStore};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Action type handled by the placement controller.
pub const ACTION_MIGRATE_SHARD: &str = "migrate_shard";
/// Action type folded into chained evaluation state.
pub const ACTION_UPDATE_METRICS: &str = "update_metrics";
/// Best-effort operator notification.
pub const ACTION_NOTIFY_ADMIN: &str = "notify_admin";

/// The category a policy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Placement,
    Migration,
    Replication,
    LoadBalancing,
    CostOptimization,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Placement => "placement",
            PolicyType::Migration => "migration",
            PolicyType::Replication => "replication",
            PolicyType::LoadBalancing => "load_balancing",
            PolicyType::CostOptimization => "cost_optimization",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "placement" => Some(PolicyType::Placement),
            "migration" => Some(PolicyType::Migration),
            "replication" => Some(PolicyType::Replication),
            "load_balancing" => Some(PolicyType::LoadBalancing),
            "cost_optimization" => Some(PolicyType::CostOptimization),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator inside a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Lt,
    Gt,
    Eq,
    Ne,
}

/// A single metric comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: String,
    pub operator: Operator,
    pub value: Value,
}

/// Condition combinators: the policy matches iff every `all` condition holds
/// and at least one `any` condition holds. An empty list is vacuously true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<Condition>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }
}

/// A tagged action: the `type` string selects the handler, the constraints
/// map carries the per-variant payload and stays opaque for forward
/// compatibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub constraints: Map<String, Value>,
}

/// A complete policy definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub policy_type: PolicyType,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// The outcome of evaluating one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub policy_id: Uuid,
    pub success: bool,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A sampled metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricValue {
    pub fn now(value: f64) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Evaluator view of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub metrics: HashMap<String, MetricValue>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Evaluator view of a shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardState {
    pub id: String,
    pub node_id: String,
    pub status: String,
    #[serde(default)]
    pub metrics: HashMap<String, MetricValue>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Ephemeral snapshot passed to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    #[serde(default)]
    pub nodes: HashMap<String, NodeState>,
    #[serde(default)]
    pub shards: HashMap<String, ShardState>,
    #[serde(default)]
    pub metrics: HashMap<String, MetricValue>,
}

/// Compare a sampled metric against a condition value.
///
/// `lt`/`gt` require a numeric condition value. `eq`/`ne` compare the sample
/// against the value's numeric reading; a non-numeric value never equals a
/// sample, so `eq` is false and `ne` is true.
pub(crate) fn compare(operator: Operator, sample: f64, value: &Value) -> Result<bool> {
    match operator {
        Operator::Lt => {
            let bound = numeric(value, "lt")?;
            Ok(sample < bound)
        }
        Operator::Gt => {
            let bound = numeric(value, "gt")?;
            Ok(sample > bound)
        }
        Operator::Eq => Ok(value.as_f64() == Some(sample)),
        Operator::Ne => Ok(value.as_f64() != Some(sample)),
    }
}

fn numeric(value: &Value, operator: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        Error::invalid(format!(
            "operator {operator} requires a numeric value, got {value}"
        ))
    })
}
