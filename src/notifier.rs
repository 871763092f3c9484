//! # Node Notifier
//!
//! Outbound client for the node-side shard lifecycle surface. Opens a
//! short-lived connection to the node's advertised location and invokes one
//! of the AppShardService calls. Every call is bounded by a timeout and never
//! blocks an inbound caller; failures are the caller's to log and report,
//! metadata is never reverted on notification failure.

use crate::error::{Error, Result};
use crate::model::Node;
use crate::pb::app_shard_service_client::AppShardServiceClient;
use crate::pb::{
    AddShardRequest, ChangeRoleRequest, DropShardRequest, PrepareAddShardRequest,
    PrepareDropShardRequest,
};
use crate::registry::Registry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

/// Default bound on every notification call.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Role assigned to the single owner of a shard.
pub const PRIMARY_ROLE: &str = "primary";

/// Resolves a node id to its current record.
#[async_trait]
pub trait NodeLookup: Send + Sync {
    async fn lookup_node(&self, node_id: Uuid) -> Result<Option<Node>>;
}

#[async_trait]
impl NodeLookup for Registry {
    async fn lookup_node(&self, node_id: Uuid) -> Result<Option<Node>> {
        self.get_node_info(node_id).await
    }
}

/// Node-side shard lifecycle operations as seen from the coordinator.
#[async_trait]
pub trait NodeNotifier: Send + Sync {
    /// Advisory; the node may reject.
    async fn prepare_add_shard(
        &self,
        node_id: Uuid,
        shard_id: Uuid,
        current_owner: Option<Uuid>,
        role: &str,
    ) -> Result<()>;

    /// Advisory; the node may reject.
    async fn prepare_drop_shard(
        &self,
        node_id: Uuid,
        shard_id: Uuid,
        new_owner: Option<Uuid>,
        role: &str,
    ) -> Result<()>;

    /// Commit the ownership to the node.
    async fn add_shard(&self, node_id: Uuid, shard_id: Uuid, role: &str) -> Result<()>;

    /// Commit the removal.
    async fn drop_shard(&self, node_id: Uuid, shard_id: Uuid) -> Result<()>;

    async fn change_role(
        &self,
        node_id: Uuid,
        shard_id: Uuid,
        current_role: &str,
        new_role: &str,
    ) -> Result<()>;
}

/// Notifier speaking the AppShardService protocol over short-lived channels.
pub struct GrpcNodeNotifier {
    lookup: Arc<dyn NodeLookup>,
    timeout: Duration,
}

impl GrpcNodeNotifier {
    pub fn new(lookup: Arc<dyn NodeLookup>) -> Self {
        Self::with_timeout(lookup, DEFAULT_NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(lookup: Arc<dyn NodeLookup>, timeout: Duration) -> Self {
        Self { lookup, timeout }
    }

    async fn client(&self, node_id: Uuid) -> Result<AppShardServiceClient<Channel>> {
        let node = self
            .lookup
            .lookup_node(node_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("node {node_id} not found")))?;
        let endpoint = Endpoint::from_shared(normalize_location(&node.location))
            .map_err(|err| Error::invalid(format!("bad node location {:?}: {err}", node.location)))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);
        let channel = endpoint.connect().await.map_err(|err| {
            Error::internal(format!("failed to connect to node {node_id}: {err}"))
        })?;
        Ok(AppShardServiceClient::new(channel))
    }
}

fn check(success: bool, message: String, rpc: &str) -> Result<()> {
    if success {
        Ok(())
    } else {
        Err(Error::internal(format!("{rpc} rejected by node: {message}")))
    }
}

fn rpc_error(rpc: &str, status: tonic::Status) -> Error {
    Error::internal(format!("{rpc} failed: {status}"))
}

#[async_trait]
impl NodeNotifier for GrpcNodeNotifier {
    async fn prepare_add_shard(
        &self,
        node_id: Uuid,
        shard_id: Uuid,
        current_owner: Option<Uuid>,
        role: &str,
    ) -> Result<()> {
        let mut client = self.client(node_id).await?;
        let response = client
            .prepare_add_shard(PrepareAddShardRequest {
                shard_id: shard_id.to_string(),
                current_owner: current_owner.map(|id| id.to_string()).unwrap_or_default(),
                role: role.to_string(),
            })
            .await
            .map_err(|status| rpc_error("PrepareAddShard", status))?
            .into_inner();
        check(response.success, response.message, "PrepareAddShard")
    }

    async fn prepare_drop_shard(
        &self,
        node_id: Uuid,
        shard_id: Uuid,
        new_owner: Option<Uuid>,
        role: &str,
    ) -> Result<()> {
        let mut client = self.client(node_id).await?;
        let response = client
            .prepare_drop_shard(PrepareDropShardRequest {
                shard_id: shard_id.to_string(),
                new_owner: new_owner.map(|id| id.to_string()).unwrap_or_default(),
                role: role.to_string(),
            })
            .await
            .map_err(|status| rpc_error("PrepareDropShard", status))?
            .into_inner();
        check(response.success, response.message, "PrepareDropShard")
    }

    async fn add_shard(&self, node_id: Uuid, shard_id: Uuid, role: &str) -> Result<()> {
        let mut client = self.client(node_id).await?;
        let response = client
            .add_shard(AddShardRequest {
                shard_id: shard_id.to_string(),
                role: role.to_string(),
            })
            .await
            .map_err(|status| rpc_error("AddShard", status))?
            .into_inner();
        check(response.success, response.message, "AddShard")
    }

    async fn drop_shard(&self, node_id: Uuid, shard_id: Uuid) -> Result<()> {
        let mut client = self.client(node_id).await?;
        let response = client
            .drop_shard(DropShardRequest {
                shard_id: shard_id.to_string(),
            })
            .await
            .map_err(|status| rpc_error("DropShard", status))?
            .into_inner();
        check(response.success, response.message, "DropShard")
    }

    async fn change_role(
        &self,
        node_id: Uuid,
        shard_id: Uuid,
        current_role: &str,
        new_role: &str,
    ) -> Result<()> {
        let mut client = self.client(node_id).await?;
        let response = client
            .change_role(ChangeRoleRequest {
                shard_id: shard_id.to_string(),
                current_role: current_role.to_string(),
                new_role: new_role.to_string(),
            })
            .await
            .map_err(|status| rpc_error("ChangeRole", status))?
            .into_inner();
        check(response.success, response.message, "ChangeRole")
    }
}

fn normalize_location(location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        format!("http://{location}")
    }
}
