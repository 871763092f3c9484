//! # Placement Controller
//!
//! Owns placement decisions and the per-shard migration state machine.
//!
//! Initial placement picks the active node with the fewest shards. Migration
//! drives active -> migrating -> active with a status revert as compensation
//! when the assignment fails. All transition steps run under the per-shard
//! lock; node notifications are scheduled post-commit, never under the lock,
//! and their failure does not revert metadata.

use crate::error::{Error, Result};
use crate::model::{MigrationRecord, MigrationStatus, Shard, ShardStatus};
use crate::notifier::{NodeNotifier, PRIMARY_ROLE};
use crate::registry::Registry;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct PlacementController {
    registry: Arc<Registry>,
    notifier: Arc<dyn NodeNotifier>,
}

impl PlacementController {
    pub fn new(registry: Arc<Registry>, notifier: Arc<dyn NodeNotifier>) -> Self {
        Self { registry, notifier }
    }

    /// Place an unassigned shard on the least-loaded active node and
    /// register it. Returns the chosen node.
    pub async fn place_shard(&self, shard: &mut Shard) -> Result<Uuid> {
        let nodes = self.registry.list_nodes().await?;
        let mut candidates: Vec<_> = nodes.into_iter().filter(|n| n.is_active()).collect();
        if candidates.is_empty() {
            return Err(Error::precondition("no active nodes available"));
        }

        let mut shard_counts: HashMap<Uuid, usize> = HashMap::new();
        for existing in self.registry.list_shards().await? {
            if let Some(owner) = existing.node_id {
                *shard_counts.entry(owner).or_insert(0) += 1;
            }
        }
        // Fewest shards wins; ties break on the lowest node id so placement
        // is deterministic.
        candidates.sort_by_key(|n| (shard_counts.get(&n.id).copied().unwrap_or(0), n.id));
        let target = candidates[0].id;

        shard.node_id = Some(target);
        self.registry.register_shard(shard).await?;
        info!(shard = %shard.id, node = %target, "placed shard");

        self.notify_add(target, shard.id);
        Ok(target)
    }

    /// Move a shard between nodes.
    ///
    /// Transitions: active@from -> migrating -> active@to, rolling the status
    /// back to active@from when the assignment fails. Compensation is
    /// best-effort and never masks the original error.
    pub async fn migrate_shard(&self, shard_id: Uuid, from: Uuid, to: Uuid) -> Result<()> {
        let guard = self.registry.lock_shard(shard_id).await;

        self.registry.check_migration_source(shard_id, from).await?;

        let mut record = MigrationRecord::new(shard_id, from, to);
        if let Err(err) = self.registry.store().record_migration(&mut record).await {
            warn!(shard = %shard_id, error = %err, "failed to record migration attempt");
        }

        self.registry
            .update_shard_status_locked(shard_id, ShardStatus::Migrating)
            .await?;

        if let Err(err) = self.registry.assign_shard_locked(shard_id, to).await {
            match self
                .registry
                .update_shard_status_locked(shard_id, ShardStatus::Active)
                .await
            {
                Ok(()) => self.finish_migration(record.id, MigrationStatus::RolledBack).await,
                Err(revert_err) => {
                    warn!(shard = %shard_id, error = %revert_err,
                        "failed to revert shard status after failed assignment");
                    if let Err(fail_err) = self
                        .registry
                        .update_shard_status_locked(shard_id, ShardStatus::Failed)
                        .await
                    {
                        warn!(shard = %shard_id, error = %fail_err,
                            "failed to mark shard failed");
                    }
                    self.finish_migration(record.id, MigrationStatus::Failed).await;
                }
            }
            return Err(err);
        }

        self.registry
            .update_shard_status_locked(shard_id, ShardStatus::Active)
            .await?;
        self.finish_migration(record.id, MigrationStatus::Completed).await;
        drop(guard);

        info!(shard = %shard_id, from = %from, to = %to, "migrated shard");
        // The metadata is authoritative; reconciliation is the node's job on
        // its next heartbeat if this notification is lost.
        self.notify_add(to, shard_id);
        Ok(())
    }

    /// Apply a structural change (type, size, metadata), archiving the
    /// pre-image in the version history.
    pub async fn update_shard(&self, shard: &mut Shard) -> Result<()> {
        self.registry.update_shard_version(shard).await
    }

    /// Restore a shard to a historical version. The rollback is recorded as
    /// a new version on top of the history.
    pub async fn rollback_shard(&self, shard_id: Uuid, version: i64) -> Result<()> {
        self.registry.rollback_shard_version(shard_id, version).await
    }

    async fn finish_migration(&self, migration_id: i64, status: MigrationStatus) {
        if migration_id == 0 {
            return;
        }
        if let Err(err) = self
            .registry
            .store()
            .finish_migration(migration_id, status)
            .await
        {
            warn!(migration = migration_id, error = %err, "failed to close migration record");
        }
    }

    /// Fire-and-forget AddShard to the new owner, after commit.
    fn notify_add(&self, node_id: Uuid, shard_id: Uuid) {
        let notifier = Arc::clone(&self.notifier);
        let store = Arc::clone(self.registry.store());
        tokio::spawn(async move {
            if let Err(err) = notifier.add_shard(node_id, shard_id, PRIMARY_ROLE).await {
                warn!(node = %node_id, shard = %shard_id, error = %err,
                    "shard notification failed");
                let details = json!({
                    "rpc": "AddShard",
                    "shard_id": shard_id.to_string(),
                    "error": err.to_string(),
                });
                if let Err(report_err) = store
                    .report_failure("notify_failed", node_id, details)
                    .await
                {
                    warn!(node = %node_id, error = %report_err,
                        "failed to record notification failure");
                }
            }
        });
    }
}
