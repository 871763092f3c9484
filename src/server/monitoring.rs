//! MonitoringService implementation.

use super::ShardManagerService;
use crate::model::{HealthSummary, NodeStatus, ShardStatus};
use crate::pb::monitoring_service_server::MonitoringService;
use crate::pb::{
    GetDistributionRequest, GetDistributionResponse, GetHealthRequest, GetHealthResponse,
    ShardList,
};
use std::collections::HashMap;
use tonic::{Request, Response, Status};

#[tonic::async_trait]
impl MonitoringService for ShardManagerService {
    async fn get_distribution(
        &self,
        _request: Request<GetDistributionRequest>,
    ) -> Result<Response<GetDistributionResponse>, Status> {
        let shards = self.registry.list_shards().await?;

        let mut distribution: HashMap<String, ShardList> = HashMap::new();
        for shard in shards {
            // Unassigned shards are not part of any node's distribution.
            let Some(node_id) = shard.node_id else {
                continue;
            };
            distribution
                .entry(node_id.to_string())
                .or_default()
                .shard_ids
                .push(shard.id.to_string());
        }

        Ok(Response::new(GetDistributionResponse {
            node_shards: distribution,
        }))
    }

    async fn get_health(
        &self,
        _request: Request<GetHealthRequest>,
    ) -> Result<Response<GetHealthResponse>, Status> {
        let nodes = self.registry.list_nodes().await?;
        let shards = self.registry.list_shards().await?;

        let mut summary = HealthSummary::default();
        for node in &nodes {
            match node.status {
                NodeStatus::Active => summary.active_nodes += 1,
                NodeStatus::Failed => summary.failed_nodes += 1,
                NodeStatus::Inactive | NodeStatus::Draining => {}
            }
        }
        for shard in &shards {
            match shard.status {
                ShardStatus::Pending => summary.pending_shards += 1,
                ShardStatus::Migrating => summary.migrating_shards += 1,
                ShardStatus::Active | ShardStatus::Failed => {}
            }
        }

        Ok(Response::new(GetHealthResponse {
            summary: format!(
                "{} active nodes, {} failed nodes, {} pending shards, {} migrating shards",
                summary.active_nodes,
                summary.failed_nodes,
                summary.pending_shards,
                summary.migrating_shards
            ),
            active_nodes: summary.active_nodes,
            failed_nodes: summary.failed_nodes,
            pending_shards: summary.pending_shards,
            migrating_shards: summary.migrating_shards,
        }))
    }
}
