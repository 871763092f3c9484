//! # Data Model
//!
//! Core entities tracked by the coordinator: nodes, shards, shard version
//! history, migration attempts, and failure reports. Nodes host the data;
//! these records only describe who owns what.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Inactive,
    Draining,
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
            NodeStatus::Draining => "draining",
            NodeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(NodeStatus::Active),
            "inactive" => Some(NodeStatus::Inactive),
            "draining" => Some(NodeStatus::Draining),
            "failed" => Some(NodeStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Pending,
    Active,
    Migrating,
    Failed,
}

impl ShardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Pending => "pending",
            ShardStatus::Active => "active",
            ShardStatus::Migrating => "migrating",
            ShardStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ShardStatus::Pending),
            "active" => Some(ShardStatus::Active),
            "migrating" => Some(ShardStatus::Migrating),
            "failed" => Some(ShardStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An application node advertising capacity and hosting shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    /// Address of the node's shard-service endpoint.
    pub location: String,
    pub capacity: i64,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub current_load: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: Uuid, location: impl Into<String>, capacity: i64, status: NodeStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            location: location.into(),
            capacity,
            status,
            last_heartbeat: None,
            current_load: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A node is eligible as an assignment target iff it is active.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// A logical data unit owned by at most one node at a time.
///
/// Any mutation that changes the owner, status, or metadata increments
/// `version`; the pre-mutation state may be archived as a [`ShardVersion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    /// Caller-supplied identity; the coordinator never generates shard ids.
    pub id: Uuid,
    pub shard_type: String,
    pub size: i64,
    pub node_id: Option<Uuid>,
    pub status: ShardStatus,
    /// Strictly increasing, starts at 1.
    pub version: i64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shard {
    pub fn new(
        id: Uuid,
        shard_type: impl Into<String>,
        size: i64,
        node_id: Option<Uuid>,
        status: ShardStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            shard_type: shard_type.into(),
            size,
            node_id,
            status,
            version: 1,
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only snapshot of a shard at some historical version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardVersion {
    pub id: i64,
    pub shard_id: Uuid,
    pub version: i64,
    pub shard_type: String,
    pub size: i64,
    pub node_id: Option<Uuid>,
    pub status: ShardStatus,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Started,
    Completed,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Started => "started",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(MigrationStatus::Started),
            "completed" => Some(MigrationStatus::Completed),
            "failed" => Some(MigrationStatus::Failed),
            "rolled_back" => Some(MigrationStatus::RolledBack),
            _ => None,
        }
    }
}

/// One migration attempt driven by the placement controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub shard_id: Uuid,
    pub from_node: Uuid,
    pub to_node: Uuid,
    pub status: MigrationStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    pub fn new(shard_id: Uuid, from_node: Uuid, to_node: Uuid) -> Self {
        Self {
            id: 0,
            shard_id,
            from_node,
            to_node,
            status: MigrationStatus::Started,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Lightweight per-type policy parameters stored in the metadata store.
///
/// The rich policy documents with conditions and actions live in the policy
/// store; this record backs the wire-level SetPolicy/GetPolicy surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: Uuid,
    pub policy_type: String,
    pub parameters: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyRecord {
    pub fn new(policy_type: impl Into<String>, parameters: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            policy_type: policy_type.into(),
            parameters,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only failure report retained for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub id: i64,
    pub failure_type: String,
    pub entity_id: Uuid,
    pub details: Value,
    pub reported_at: DateTime<Utc>,
}

/// Aggregate health counters exposed through the monitoring service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub active_nodes: i64,
    pub failed_nodes: i64,
    pub pending_shards: i64,
    pub migrating_shards: i64,
}
