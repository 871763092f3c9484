//! Reference application-node host.
//!
//! Implements the node-side AppShardService callback surface, registers
//! itself with the coordinator, and heartbeats on a fixed cadence. Real
//! deployments replace the in-memory shard set with actual data movement.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shardmgr::pb::app_shard_service_server::{AppShardService, AppShardServiceServer};
use shardmgr::pb::node_service_client::NodeServiceClient;
use shardmgr::pb::{
    AddShardRequest, AddShardResponse, ChangeRoleRequest, ChangeRoleResponse, DropShardRequest,
    DropShardResponse, HeartbeatRequest, Node, PrepareAddShardRequest, PrepareAddShardResponse,
    PrepareDropShardRequest, PrepareDropShardResponse, RegisterNodeRequest,
};
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, warn};
use uuid::Uuid;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

/// Hosted shards and their roles.
#[derive(Default)]
struct AppHost {
    shards: Mutex<HashMap<String, String>>,
}

#[tonic::async_trait]
impl AppShardService for AppHost {
    async fn add_shard(
        &self,
        request: Request<AddShardRequest>,
    ) -> Result<Response<AddShardResponse>, Status> {
        let req = request.into_inner();
        info!(shard = %req.shard_id, role = %req.role, "AddShard");
        self.shards.lock().insert(req.shard_id, req.role);
        Ok(Response::new(AddShardResponse {
            success: true,
            message: "shard added".to_string(),
        }))
    }

    async fn drop_shard(
        &self,
        request: Request<DropShardRequest>,
    ) -> Result<Response<DropShardResponse>, Status> {
        let req = request.into_inner();
        info!(shard = %req.shard_id, "DropShard");
        self.shards.lock().remove(&req.shard_id);
        Ok(Response::new(DropShardResponse {
            success: true,
            message: "shard dropped".to_string(),
        }))
    }

    async fn change_role(
        &self,
        request: Request<ChangeRoleRequest>,
    ) -> Result<Response<ChangeRoleResponse>, Status> {
        let req = request.into_inner();
        info!(shard = %req.shard_id, from = %req.current_role, to = %req.new_role, "ChangeRole");
        let mut shards = self.shards.lock();
        match shards.get_mut(&req.shard_id) {
            Some(role) => {
                *role = req.new_role;
                Ok(Response::new(ChangeRoleResponse {
                    success: true,
                    message: "role changed".to_string(),
                }))
            }
            None => Ok(Response::new(ChangeRoleResponse {
                success: false,
                message: "shard not hosted here".to_string(),
            })),
        }
    }

    async fn prepare_add_shard(
        &self,
        request: Request<PrepareAddShardRequest>,
    ) -> Result<Response<PrepareAddShardResponse>, Status> {
        let req = request.into_inner();
        info!(shard = %req.shard_id, owner = %req.current_owner, "PrepareAddShard");
        Ok(Response::new(PrepareAddShardResponse {
            success: true,
            message: "prepared to add shard".to_string(),
        }))
    }

    async fn prepare_drop_shard(
        &self,
        request: Request<PrepareDropShardRequest>,
    ) -> Result<Response<PrepareDropShardResponse>, Status> {
        let req = request.into_inner();
        info!(shard = %req.shard_id, new_owner = %req.new_owner, "PrepareDropShard");
        Ok(Response::new(PrepareDropShardResponse {
            success: true,
            message: "prepared to drop shard".to_string(),
        }))
    }
}

async fn register_with_coordinator(
    coordinator: &str,
    node_id: Uuid,
    location: &str,
    capacity: i64,
) -> anyhow::Result<()> {
    let mut client = NodeServiceClient::connect(coordinator.to_string()).await?;
    let response = client
        .register_node(RegisterNodeRequest {
            node: Some(Node {
                id: node_id.to_string(),
                location: location.to_string(),
                capacity,
                status: "active".to_string(),
            }),
        })
        .await?
        .into_inner();
    if !response.success {
        anyhow::bail!("RegisterNode failed: {}", response.message);
    }
    info!(message = %response.message, "registered with coordinator");
    Ok(())
}

fn spawn_heartbeats(coordinator: String, node_id: Uuid, host: Arc<AppHost>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let load = host.shards.lock().len() as i64;
            let request = HeartbeatRequest {
                node_id: node_id.to_string(),
                status: "active".to_string(),
                load,
            };
            match NodeServiceClient::connect(coordinator.clone()).await {
                Ok(mut client) => {
                    if let Err(err) = client.heartbeat(request).await {
                        warn!(error = %err, "heartbeat failed");
                    }
                }
                Err(err) => warn!(error = %err, "heartbeat connection failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let listen = parse_arg("--listen").unwrap_or_else(|| "127.0.0.1:50051".to_string());
    let coordinator =
        parse_arg("--coordinator").unwrap_or_else(|| "http://127.0.0.1:7427".to_string());
    let capacity: i64 = parse_arg("--capacity")
        .unwrap_or_else(|| "100".to_string())
        .parse()?;
    let node_id = match parse_arg("--node-id") {
        Some(raw) => raw.parse()?,
        None => Uuid::new_v4(),
    };

    let addr: SocketAddr = listen.parse()?;
    let host = Arc::new(AppHost::default());

    register_with_coordinator(&coordinator, node_id, &listen, capacity).await?;
    spawn_heartbeats(coordinator, node_id, Arc::clone(&host));

    info!(%addr, node = %node_id, "app shard host listening");
    Server::builder()
        .add_service(AppShardServiceServer::from_arc(Arc::clone(&host)))
        .serve(addr)
        .await?;

    Ok(())
}
