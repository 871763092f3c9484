//! In-memory metadata store for tests and ephemeral configurations.
//!
//! Semantics match the relational backend: version bumps on every mutating
//! shard operation, append-only version history, writer-wins heartbeats.

use super::MetadataStore;
use crate::error::{Error, Result};
use crate::model::{
    FailureReport, MigrationRecord, MigrationStatus, Node, NodeStatus, PolicyRecord, Shard,
    ShardStatus, ShardVersion,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct State {
    nodes: HashMap<Uuid, Node>,
    shards: HashMap<Uuid, Shard>,
    versions: Vec<ShardVersion>,
    migrations: Vec<MigrationRecord>,
    policies: Vec<PolicyRecord>,
    failures: Vec<FailureReport>,
    next_version_id: i64,
    next_migration_id: i64,
    next_failure_id: i64,
}

/// Readers-writer-locked maps: concurrent reads, exclusive writes.
#[derive(Default)]
pub struct MemoryMetadataStore {
    state: RwLock<State>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn snapshot(state: &mut State, shard: &Shard) {
    state.next_version_id += 1;
    state.versions.push(ShardVersion {
        id: state.next_version_id,
        shard_id: shard.id,
        version: shard.version,
        shard_type: shard.shard_type.clone(),
        size: shard.size,
        node_id: shard.node_id,
        status: shard.status,
        metadata: shard.metadata.clone(),
        created_at: Utc::now(),
    });
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn register_node(&self, node: &mut Node) -> Result<()> {
        let mut state = self.state.write();
        let now = Utc::now();
        node.created_at = now;
        node.updated_at = now;
        state.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn update_node(&self, node: &Node) -> Result<()> {
        let mut state = self.state.write();
        match state.nodes.get_mut(&node.id) {
            Some(existing) => {
                existing.location = node.location.clone();
                existing.capacity = node.capacity;
                existing.status = node.status;
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(Error::not_found(format!("node {} not found", node.id))),
        }
    }

    async fn update_node_heartbeat(
        &self,
        node_id: Uuid,
        status: NodeStatus,
        load: i64,
    ) -> Result<()> {
        let mut state = self.state.write();
        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.status = status;
            node.current_load = load;
            node.last_heartbeat = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_node_info(&self, node_id: Uuid) -> Result<Option<Node>> {
        Ok(self.state.read().nodes.get(&node_id).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let state = self.state.read();
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(nodes)
    }

    async fn register_shard(&self, shard: &mut Shard) -> Result<()> {
        let mut state = self.state.write();
        if state.shards.contains_key(&shard.id) {
            return Err(Error::internal(format!(
                "shard {} already registered",
                shard.id
            )));
        }
        let now = Utc::now();
        shard.version = 1;
        shard.created_at = now;
        shard.updated_at = now;
        state.shards.insert(shard.id, shard.clone());
        Ok(())
    }

    async fn list_shards(&self) -> Result<Vec<Shard>> {
        let state = self.state.read();
        let mut shards: Vec<Shard> = state.shards.values().cloned().collect();
        shards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(shards)
    }

    async fn get_shard_info(&self, shard_id: Uuid) -> Result<Option<Shard>> {
        Ok(self.state.read().shards.get(&shard_id).cloned())
    }

    async fn assign_shard(&self, shard_id: Uuid, node_id: Uuid) -> Result<()> {
        let mut state = self.state.write();
        if let Some(shard) = state.shards.get_mut(&shard_id) {
            shard.node_id = Some(node_id);
            shard.version += 1;
            shard.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_shard_status(&self, shard_id: Uuid, status: ShardStatus) -> Result<()> {
        let mut state = self.state.write();
        if let Some(shard) = state.shards.get_mut(&shard_id) {
            shard.status = status;
            shard.version += 1;
            shard.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_shard_version(&self, shard: &mut Shard) -> Result<()> {
        let mut state = self.state.write();
        let current = match state.shards.get(&shard.id) {
            Some(current) => current.clone(),
            None => return Err(Error::not_found(format!("shard {} not found", shard.id))),
        };
        snapshot(&mut state, &current);
        let entry = state.shards.get_mut(&shard.id).expect("shard present");
        entry.shard_type = shard.shard_type.clone();
        entry.size = shard.size;
        entry.node_id = shard.node_id;
        entry.status = shard.status;
        entry.metadata = shard.metadata.clone();
        entry.version = current.version + 1;
        entry.updated_at = Utc::now();
        shard.version = entry.version;
        Ok(())
    }

    async fn rollback_shard_version(&self, shard_id: Uuid, version: i64) -> Result<()> {
        let mut state = self.state.write();
        let target = state
            .versions
            .iter()
            .find(|v| v.shard_id == shard_id && v.version == version)
            .cloned()
            .ok_or_else(|| {
                Error::not_found(format!("version {version} of shard {shard_id} not found"))
            })?;
        let current = match state.shards.get(&shard_id) {
            Some(current) => current.clone(),
            None => return Err(Error::not_found(format!("shard {shard_id} not found"))),
        };
        snapshot(&mut state, &current);
        let entry = state.shards.get_mut(&shard_id).expect("shard present");
        entry.shard_type = target.shard_type.clone();
        entry.size = target.size;
        entry.node_id = target.node_id;
        entry.status = target.status;
        entry.metadata = target.metadata.clone();
        entry.version = current.version + 1;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn get_shard_version(
        &self,
        shard_id: Uuid,
        version: i64,
    ) -> Result<Option<ShardVersion>> {
        Ok(self
            .state
            .read()
            .versions
            .iter()
            .find(|v| v.shard_id == shard_id && v.version == version)
            .cloned())
    }

    async fn list_shard_versions(&self, shard_id: Uuid) -> Result<Vec<ShardVersion>> {
        let state = self.state.read();
        let mut versions: Vec<ShardVersion> = state
            .versions
            .iter()
            .filter(|v| v.shard_id == shard_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn record_migration(&self, record: &mut MigrationRecord) -> Result<()> {
        let mut state = self.state.write();
        state.next_migration_id += 1;
        record.id = state.next_migration_id;
        state.migrations.push(record.clone());
        Ok(())
    }

    async fn finish_migration(&self, migration_id: i64, status: MigrationStatus) -> Result<()> {
        let mut state = self.state.write();
        if let Some(record) = state.migrations.iter_mut().find(|m| m.id == migration_id) {
            record.status = status;
            record.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_policy(&self, policy: &mut PolicyRecord) -> Result<()> {
        let mut state = self.state.write();
        let now = Utc::now();
        policy.created_at = now;
        policy.updated_at = now;
        state.policies.push(policy.clone());
        Ok(())
    }

    async fn get_policy(&self, policy_type: &str) -> Result<Option<PolicyRecord>> {
        let state = self.state.read();
        Ok(state
            .policies
            .iter()
            .filter(|p| p.policy_type == policy_type)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn report_failure(
        &self,
        failure_type: &str,
        entity_id: Uuid,
        details: Value,
    ) -> Result<()> {
        let mut state = self.state.write();
        state.next_failure_id += 1;
        let report = FailureReport {
            id: state.next_failure_id,
            failure_type: failure_type.to_string(),
            entity_id,
            details,
            reported_at: Utc::now(),
        };
        state.failures.push(report);
        Ok(())
    }

    async fn list_failures(&self, entity_id: Uuid) -> Result<Vec<FailureReport>> {
        let state = self.state.read();
        let mut reports: Vec<FailureReport> = state
            .failures
            .iter()
            .filter(|f| f.entity_id == entity_id)
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shard(id: Uuid) -> Shard {
        Shard::new(id, "kv", 100, None, ShardStatus::Pending)
    }

    #[tokio::test]
    async fn register_then_get_returns_identical_fields() {
        let store = MemoryMetadataStore::new();
        let id = Uuid::new_v4();
        let mut node = Node::new(id, "localhost:5001", 100, NodeStatus::Active);
        store.register_node(&mut node).await.unwrap();
        let fetched = store.get_node_info(id).await.unwrap().unwrap();
        assert_eq!(fetched, node);
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_node_is_a_no_op() {
        let store = MemoryMetadataStore::new();
        store
            .update_node_heartbeat(Uuid::new_v4(), NodeStatus::Active, 5)
            .await
            .unwrap();
        assert!(store.list_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeats_are_writer_wins() {
        let store = MemoryMetadataStore::new();
        let id = Uuid::new_v4();
        let mut node = Node::new(id, "localhost:5001", 100, NodeStatus::Active);
        store.register_node(&mut node).await.unwrap();

        for load in 1..=10 {
            store
                .update_node_heartbeat(id, NodeStatus::Active, load)
                .await
                .unwrap();
        }
        let fetched = store.get_node_info(id).await.unwrap().unwrap();
        assert_eq!(fetched.current_load, 10);
    }

    #[tokio::test]
    async fn mutations_bump_version() {
        let store = MemoryMetadataStore::new();
        let id = Uuid::new_v4();
        let node_id = Uuid::new_v4();
        let mut s = shard(id);
        store.register_shard(&mut s).await.unwrap();
        assert_eq!(s.version, 1);

        store.assign_shard(id, node_id).await.unwrap();
        store
            .update_shard_status(id, ShardStatus::Active)
            .await
            .unwrap();
        let fetched = store.get_shard_info(id).await.unwrap().unwrap();
        assert_eq!(fetched.version, 3);
        assert_eq!(fetched.node_id, Some(node_id));
        assert_eq!(fetched.status, ShardStatus::Active);
    }

    #[tokio::test]
    async fn status_update_is_idempotent_in_value_but_not_version() {
        let store = MemoryMetadataStore::new();
        let id = Uuid::new_v4();
        store.register_shard(&mut shard(id)).await.unwrap();
        store
            .update_shard_status(id, ShardStatus::Active)
            .await
            .unwrap();
        store
            .update_shard_status(id, ShardStatus::Active)
            .await
            .unwrap();
        let fetched = store.get_shard_info(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ShardStatus::Active);
        assert_eq!(fetched.version, 3);
    }

    #[tokio::test]
    async fn version_history_and_rollback() {
        let store = MemoryMetadataStore::new();
        let id = Uuid::new_v4();
        let mut s = Shard::new(id, "a", 100, None, ShardStatus::Pending);
        store.register_shard(&mut s).await.unwrap();

        s.shard_type = "b".into();
        s.size = 200;
        s.metadata = json!({"tier": "hot"});
        store.update_shard_version(&mut s).await.unwrap();
        assert_eq!(s.version, 2);

        let history = store.list_shard_versions(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].shard_type, "a");
        assert_eq!(history[0].size, 100);

        let archived = store.get_shard_version(id, 1).await.unwrap().unwrap();
        assert_eq!(archived.shard_type, "a");
        assert!(store.get_shard_version(id, 5).await.unwrap().is_none());

        store.rollback_shard_version(id, 1).await.unwrap();
        let current = store.get_shard_info(id).await.unwrap().unwrap();
        assert_eq!(current.version, 3);
        assert_eq!(current.shard_type, "a");
        assert_eq!(current.size, 100);

        let history = store.list_shard_versions(id).await.unwrap();
        let recorded: Vec<i64> = history.iter().map(|v| v.version).collect();
        assert_eq!(recorded, vec![2, 1]);
    }

    #[tokio::test]
    async fn rollback_to_missing_version_fails() {
        let store = MemoryMetadataStore::new();
        let id = Uuid::new_v4();
        store.register_shard(&mut shard(id)).await.unwrap();
        let err = store.rollback_shard_version(id, 7).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn latest_policy_record_wins() {
        let store = MemoryMetadataStore::new();
        let mut first = PolicyRecord::new("placement", json!({"strategy": "spread"}));
        store.set_policy(&mut first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let mut second = PolicyRecord::new("placement", json!({"strategy": "pack"}));
        store.set_policy(&mut second).await.unwrap();

        let latest = store.get_policy("placement").await.unwrap().unwrap();
        assert_eq!(latest.parameters, json!({"strategy": "pack"}));
        assert!(store.get_policy("migration").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_reports_are_append_only() {
        let store = MemoryMetadataStore::new();
        let entity = Uuid::new_v4();
        store
            .report_failure("node_unreachable", entity, json!({"attempt": 1}))
            .await
            .unwrap();
        store
            .report_failure("node_unreachable", entity, json!({"attempt": 2}))
            .await
            .unwrap();
        let reports = store.list_failures(entity).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].details, json!({"attempt": 2}));
    }
}
