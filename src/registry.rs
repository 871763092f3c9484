//! # Registry
//!
//! In-process mediator for all metadata mutations. Serialises state-changing
//! calls per shard with a keyed lock table, enforces the cross-row invariants
//! the store cannot (active assignment targets, migration source checks), and
//! fans out change events to subscribers.
//!
//! Per-shard locks MUST NOT be held across node-notifier calls; notification
//! is always scheduled post-commit by the placement controller.

use crate::error::{Error, Result};
use crate::model::{Node, NodeStatus, Shard, ShardStatus};
use crate::store::MetadataStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Change event emitted when a shard's owner or status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEvent {
    pub shard_id: Uuid,
    pub kind: ShardEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEventKind {
    OwnerChanged { node_id: Option<Uuid> },
    StatusChanged { status: ShardStatus },
}

/// Keyed lock table hashed on shard id. Entries are reclaimed once no task
/// holds or waits on them.
pub(crate) struct ShardLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ShardLocks {
    fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    pub(crate) async fn lock(&self, shard_id: Uuid) -> ShardGuard {
        let cell = self
            .locks
            .entry(shard_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let permit = cell.lock_owned().await;
        ShardGuard {
            shard_id,
            permit: Some(permit),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one shard's state transitions.
pub struct ShardGuard {
    shard_id: Uuid,
    permit: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Drop for ShardGuard {
    fn drop(&mut self) {
        // Release before reclaiming: the entry may only be removed while the
        // map slot holds the last reference, which excludes concurrent
        // lockers (they clone under the same map shard lock).
        self.permit.take();
        self.locks
            .remove_if(&self.shard_id, |_, cell| Arc::strong_count(cell) == 1);
    }
}

/// The authoritative in-process view of nodes and shards.
pub struct Registry {
    store: Arc<dyn MetadataStore>,
    locks: ShardLocks,
    events: broadcast::Sender<ShardEvent>,
}

impl Registry {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            locks: ShardLocks::new(),
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Subscribe to owner/status change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ShardEvent) {
        // No receivers is fine; events are best-effort fan-out.
        let _ = self.events.send(event);
    }

    /// Acquire the per-shard lock for a multi-step transition.
    pub(crate) async fn lock_shard(&self, shard_id: Uuid) -> ShardGuard {
        self.locks.lock(shard_id).await
    }

    // Node surface ----------------------------------------------------------

    pub async fn register_node(&self, node: &mut Node) -> Result<()> {
        self.store.register_node(node).await
    }

    pub async fn update_node(&self, node: &Node) -> Result<()> {
        self.store.update_node(node).await
    }

    pub async fn heartbeat(&self, node_id: Uuid, status: NodeStatus, load: i64) -> Result<()> {
        self.store.update_node_heartbeat(node_id, status, load).await
    }

    pub async fn get_node_info(&self, node_id: Uuid) -> Result<Option<Node>> {
        self.store.get_node_info(node_id).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.store.list_nodes().await
    }

    // Shard surface ---------------------------------------------------------

    /// Register a shard. A pre-assigned owner must be an active node.
    pub async fn register_shard(&self, shard: &mut Shard) -> Result<()> {
        if let Some(node_id) = shard.node_id {
            self.require_active_node(node_id).await?;
        }
        self.store.register_shard(shard).await?;
        self.emit(ShardEvent {
            shard_id: shard.id,
            kind: ShardEventKind::OwnerChanged {
                node_id: shard.node_id,
            },
        });
        Ok(())
    }

    pub async fn list_shards(&self) -> Result<Vec<Shard>> {
        self.store.list_shards().await
    }

    pub async fn get_shard_info(&self, shard_id: Uuid) -> Result<Option<Shard>> {
        self.store.get_shard_info(shard_id).await
    }

    pub async fn assign_shard(&self, shard_id: Uuid, node_id: Uuid) -> Result<()> {
        let _guard = self.lock_shard(shard_id).await;
        self.assign_shard_locked(shard_id, node_id).await
    }

    /// Assignment body; the caller already holds the per-shard lock.
    pub(crate) async fn assign_shard_locked(&self, shard_id: Uuid, node_id: Uuid) -> Result<()> {
        self.require_shard(shard_id).await?;
        self.require_active_node(node_id).await?;
        self.store.assign_shard(shard_id, node_id).await?;
        self.emit(ShardEvent {
            shard_id,
            kind: ShardEventKind::OwnerChanged {
                node_id: Some(node_id),
            },
        });
        Ok(())
    }

    pub async fn update_shard_status(&self, shard_id: Uuid, status: ShardStatus) -> Result<()> {
        let _guard = self.lock_shard(shard_id).await;
        self.update_shard_status_locked(shard_id, status).await
    }

    pub(crate) async fn update_shard_status_locked(
        &self,
        shard_id: Uuid,
        status: ShardStatus,
    ) -> Result<()> {
        self.require_shard(shard_id).await?;
        self.store.update_shard_status(shard_id, status).await?;
        self.emit(ShardEvent {
            shard_id,
            kind: ShardEventKind::StatusChanged { status },
        });
        Ok(())
    }

    /// Apply a structural mutation, archiving the pre-image.
    pub async fn update_shard_version(&self, shard: &mut Shard) -> Result<()> {
        let _guard = self.lock_shard(shard.id).await;
        self.store.update_shard_version(shard).await
    }

    pub async fn rollback_shard_version(&self, shard_id: Uuid, version: i64) -> Result<()> {
        let _guard = self.lock_shard(shard_id).await;
        self.store.rollback_shard_version(shard_id, version).await
    }

    // Guards ----------------------------------------------------------------

    async fn require_shard(&self, shard_id: Uuid) -> Result<Shard> {
        self.store
            .get_shard_info(shard_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("shard {shard_id} not found")))
    }

    async fn require_active_node(&self, node_id: Uuid) -> Result<Node> {
        let node = self
            .store
            .get_node_info(node_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("node {node_id} not found")))?;
        if !node.is_active() {
            return Err(Error::precondition(format!(
                "node {node_id} is {}, not an eligible assignment target",
                node.status
            )));
        }
        Ok(node)
    }

    /// Check the migration guard: the shard must be active and owned by the
    /// claimed source. Returns the shard on success. The caller holds the
    /// per-shard lock.
    pub(crate) async fn check_migration_source(&self, shard_id: Uuid, from: Uuid) -> Result<Shard> {
        let shard = self.require_shard(shard_id).await?;
        if shard.node_id != Some(from) {
            return Err(Error::precondition(format!(
                "shard {shard_id} is not on the source node {from}"
            )));
        }
        if shard.status != ShardStatus::Active {
            return Err(Error::precondition(format!(
                "shard {shard_id} is {}, migration requires an active shard",
                shard.status
            )));
        }
        Ok(shard)
    }
}
