//! Metric samples derived from registry state.
//!
//! The metric collection pipeline is external; the policy engine only
//! consumes the [`MetricProvider`](crate::policy::MetricProvider) interface.
//! This provider serves the handful of fleet metrics the coordinator can
//! compute from its own records, mostly heartbeat-reported load.

use crate::error::{Error, Result};
use crate::policy::MetricProvider;
use crate::registry::Registry;
use async_trait::async_trait;
use std::sync::Arc;

/// Fleet metrics computed from the metadata store.
pub struct StoreMetricProvider {
    registry: Arc<Registry>,
}

impl StoreMetricProvider {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MetricProvider for StoreMetricProvider {
    async fn get_metric(&self, name: &str) -> Result<f64> {
        match name {
            "node_count" => Ok(self.registry.list_nodes().await?.len() as f64),
            "active_node_count" => Ok(self
                .registry
                .list_nodes()
                .await?
                .iter()
                .filter(|n| n.is_active())
                .count() as f64),
            "shard_count" => Ok(self.registry.list_shards().await?.len() as f64),
            "unassigned_shard_count" => Ok(self
                .registry
                .list_shards()
                .await?
                .iter()
                .filter(|s| s.node_id.is_none())
                .count() as f64),
            "total_node_load" => Ok(self
                .registry
                .list_nodes()
                .await?
                .iter()
                .map(|n| n.current_load as f64)
                .sum()),
            "avg_node_load" => {
                let nodes = self.registry.list_nodes().await?;
                if nodes.is_empty() {
                    return Ok(0.0);
                }
                let total: f64 = nodes.iter().map(|n| n.current_load as f64).sum();
                Ok(total / nodes.len() as f64)
            }
            _ => Err(Error::not_found(format!("metric {name} not found"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeStatus, Shard, ShardStatus};
    use crate::store::MemoryMetadataStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn derives_fleet_metrics() {
        let registry = Arc::new(Registry::new(Arc::new(MemoryMetadataStore::new())));
        let provider = StoreMetricProvider::new(Arc::clone(&registry));

        let active = Uuid::new_v4();
        let mut node = Node::new(active, "localhost:1", 100, NodeStatus::Active);
        registry.register_node(&mut node).await.unwrap();
        let mut node = Node::new(Uuid::new_v4(), "localhost:2", 100, NodeStatus::Failed);
        registry.register_node(&mut node).await.unwrap();
        registry.heartbeat(active, NodeStatus::Active, 40).await.unwrap();

        let mut shard = Shard::new(Uuid::new_v4(), "kv", 1, None, ShardStatus::Pending);
        registry.register_shard(&mut shard).await.unwrap();

        assert_eq!(provider.get_metric("node_count").await.unwrap(), 2.0);
        assert_eq!(provider.get_metric("active_node_count").await.unwrap(), 1.0);
        assert_eq!(provider.get_metric("shard_count").await.unwrap(), 1.0);
        assert_eq!(
            provider.get_metric("unassigned_shard_count").await.unwrap(),
            1.0
        );
        assert_eq!(provider.get_metric("avg_node_load").await.unwrap(), 20.0);
        assert!(provider.get_metric("disk_usage").await.is_err());
    }
}
