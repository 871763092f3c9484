//! ShardService implementation.

use super::{parse_id, parse_shard_status, ShardManagerService};
use crate::model::{Shard, ShardStatus};
use crate::pb::shard_service_server::ShardService;
use crate::pb::{
    AssignShardRequest, AssignShardResponse, GetShardInfoRequest, GetShardInfoResponse,
    ListShardsRequest, ListShardsResponse, MigrateShardRequest, MigrateShardResponse,
    RegisterShardRequest, RegisterShardResponse, Shard as PbShard, UpdateShardStatusRequest,
    UpdateShardStatusResponse,
};
use tonic::{Request, Response, Status};

fn shard_to_pb(shard: &Shard) -> PbShard {
    PbShard {
        id: shard.id.to_string(),
        r#type: shard.shard_type.clone(),
        size: shard.size,
        node_id: shard
            .node_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        status: shard.status.as_str().to_string(),
    }
}

#[tonic::async_trait]
impl ShardService for ShardManagerService {
    async fn register_shard(
        &self,
        request: Request<RegisterShardRequest>,
    ) -> Result<Response<RegisterShardResponse>, Status> {
        let spec = request
            .into_inner()
            .shard
            .ok_or_else(|| Status::invalid_argument("shard is required"))?;
        let shard_id = parse_id("shard ID", &spec.id)?;
        let status = if spec.status.is_empty() {
            ShardStatus::Pending
        } else {
            parse_shard_status(&spec.status)?
        };

        let mut shard = Shard::new(shard_id, spec.r#type, spec.size, None, status);
        let message = if spec.node_id.is_empty() {
            // No owner supplied: the placement controller picks one and
            // schedules the primary notification.
            let node_id = self.placement.place_shard(&mut shard).await?;
            format!("shard {shard_id} registered on node {node_id}")
        } else {
            shard.node_id = Some(parse_id("node ID", &spec.node_id)?);
            self.registry.register_shard(&mut shard).await?;
            format!("shard {shard_id} registered successfully")
        };

        Ok(Response::new(RegisterShardResponse {
            success: true,
            message,
        }))
    }

    async fn list_shards(
        &self,
        _request: Request<ListShardsRequest>,
    ) -> Result<Response<ListShardsResponse>, Status> {
        let shards = self.registry.list_shards().await?;
        Ok(Response::new(ListShardsResponse {
            shards: shards.iter().map(shard_to_pb).collect(),
        }))
    }

    async fn get_shard_info(
        &self,
        request: Request<GetShardInfoRequest>,
    ) -> Result<Response<GetShardInfoResponse>, Status> {
        let shard_id = parse_id("shard ID", &request.into_inner().shard_id)?;
        let shard = self
            .registry
            .get_shard_info(shard_id)
            .await?
            .ok_or_else(|| Status::not_found("shard not found"))?;
        Ok(Response::new(GetShardInfoResponse {
            shard: Some(shard_to_pb(&shard)),
        }))
    }

    async fn assign_shard(
        &self,
        request: Request<AssignShardRequest>,
    ) -> Result<Response<AssignShardResponse>, Status> {
        let req = request.into_inner();
        let shard_id = parse_id("shard ID", &req.shard_id)?;
        let node_id = parse_id("node ID", &req.node_id)?;

        self.registry.assign_shard(shard_id, node_id).await?;

        Ok(Response::new(AssignShardResponse {
            success: true,
            message: "shard assigned successfully".to_string(),
        }))
    }

    async fn migrate_shard(
        &self,
        request: Request<MigrateShardRequest>,
    ) -> Result<Response<MigrateShardResponse>, Status> {
        let req = request.into_inner();
        let shard_id = parse_id("shard ID", &req.shard_id)?;
        let from = parse_id("source node ID", &req.from_node_id)?;
        let to = parse_id("destination node ID", &req.to_node_id)?;

        self.placement.migrate_shard(shard_id, from, to).await?;

        Ok(Response::new(MigrateShardResponse {
            success: true,
            message: "shard migrated successfully".to_string(),
        }))
    }

    async fn update_shard_status(
        &self,
        request: Request<UpdateShardStatusRequest>,
    ) -> Result<Response<UpdateShardStatusResponse>, Status> {
        let req = request.into_inner();
        let shard_id = parse_id("shard ID", &req.shard_id)?;
        let status = parse_shard_status(&req.status)?;

        self.registry.update_shard_status(shard_id, status).await?;

        Ok(Response::new(UpdateShardStatusResponse {
            success: true,
            message: "shard status updated successfully".to_string(),
        }))
    }
}
