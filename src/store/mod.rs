//! # Metadata Store
//!
//! Typed persistence for nodes, shards, version history, policies, and
//! failure reports. One trait, multiple backends: a relational store backed
//! by postgres or embedded sqlite (selected from the DSN) and an in-memory
//! store for tests and ephemeral configurations.
//!
//! Mutations propagate the backend's error unchanged; the store never
//! retries internally. The registry layer decides what is transient.

mod memory;
mod sql;

pub use memory::MemoryMetadataStore;
pub use sql::SqlMetadataStore;

pub(crate) use sql::Dialect;

use crate::error::Result;
use crate::model::{
    FailureReport, MigrationRecord, MigrationStatus, Node, NodeStatus, PolicyRecord, Shard,
    ShardStatus, ShardVersion,
};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    // Node operations.

    /// Insert a node, filling its created/updated timestamps.
    async fn register_node(&self, node: &mut Node) -> Result<()>;

    /// Administrative update of location, capacity, and status.
    async fn update_node(&self, node: &Node) -> Result<()>;

    /// Update status, load, and last-heartbeat. Absent ids are a no-op.
    async fn update_node_heartbeat(
        &self,
        node_id: Uuid,
        status: NodeStatus,
        load: i64,
    ) -> Result<()>;

    async fn get_node_info(&self, node_id: Uuid) -> Result<Option<Node>>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    // Shard operations.

    /// Insert a shard with version 1 and metadata defaulting to `{}`.
    async fn register_shard(&self, shard: &mut Shard) -> Result<()>;

    async fn list_shards(&self) -> Result<Vec<Shard>>;

    async fn get_shard_info(&self, shard_id: Uuid) -> Result<Option<Shard>>;

    /// Set the owner and increment the version in one statement.
    async fn assign_shard(&self, shard_id: Uuid, node_id: Uuid) -> Result<()>;

    /// Set the status and increment the version in one statement.
    async fn update_shard_status(&self, shard_id: Uuid, status: ShardStatus) -> Result<()>;

    // Versioned mutations.

    /// In one transaction: archive the current row into the version history,
    /// apply the structural mutation, and bump the version. The new version
    /// is written back onto `shard`.
    async fn update_shard_version(&self, shard: &mut Shard) -> Result<()>;

    /// In one transaction: archive the current row, then overwrite the shard
    /// with the target version's fields. The rollback itself is recorded as a
    /// new version, never an overwrite of the past.
    async fn rollback_shard_version(&self, shard_id: Uuid, version: i64) -> Result<()>;

    async fn get_shard_version(&self, shard_id: Uuid, version: i64)
        -> Result<Option<ShardVersion>>;

    /// Version history, newest first.
    async fn list_shard_versions(&self, shard_id: Uuid) -> Result<Vec<ShardVersion>>;

    // Migration bookkeeping.

    /// Append a migration attempt; the assigned id is written back.
    async fn record_migration(&self, record: &mut MigrationRecord) -> Result<()>;

    async fn finish_migration(&self, migration_id: i64, status: MigrationStatus) -> Result<()>;

    // Policy parameters.

    async fn set_policy(&self, policy: &mut PolicyRecord) -> Result<()>;

    /// Most recently stored record for the given type.
    async fn get_policy(&self, policy_type: &str) -> Result<Option<PolicyRecord>>;

    // Failure reports.

    async fn report_failure(&self, failure_type: &str, entity_id: Uuid, details: Value)
        -> Result<()>;

    /// Reports for one entity, newest first.
    async fn list_failures(&self, entity_id: Uuid) -> Result<Vec<FailureReport>>;
}
