use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shardmgr::pb::app_shard_service_server::{AppShardService, AppShardServiceServer};
use shardmgr::pb::node_service_client::NodeServiceClient;
use shardmgr::pb::{
    AddShardRequest, AddShardResponse, ChangeRoleRequest, ChangeRoleResponse, DropShardRequest,
    DropShardResponse, Node, PrepareAddShardRequest, PrepareAddShardResponse,
    PrepareDropShardRequest, PrepareDropShardResponse, RegisterNodeRequest,
};
use shardmgr::policy::InMemoryPolicyStore;
use shardmgr::server::{serve, Coordinator};
use shardmgr::store::{MemoryMetadataStore, MetadataStore};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use uuid::Uuid;

/// An AddShard delivery observed by a test app node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub shard_id: String,
    pub role: String,
}

/// Minimal node-side service that records shard deliveries.
pub struct TestAppNode {
    deliveries: mpsc::UnboundedSender<Delivery>,
}

#[tonic::async_trait]
impl AppShardService for TestAppNode {
    async fn add_shard(
        &self,
        request: Request<AddShardRequest>,
    ) -> Result<Response<AddShardResponse>, Status> {
        let req = request.into_inner();
        let _ = self.deliveries.send(Delivery {
            shard_id: req.shard_id,
            role: req.role,
        });
        Ok(Response::new(AddShardResponse {
            success: true,
            message: "shard added".to_string(),
        }))
    }

    async fn drop_shard(
        &self,
        _request: Request<DropShardRequest>,
    ) -> Result<Response<DropShardResponse>, Status> {
        Ok(Response::new(DropShardResponse {
            success: true,
            message: "shard dropped".to_string(),
        }))
    }

    async fn change_role(
        &self,
        _request: Request<ChangeRoleRequest>,
    ) -> Result<Response<ChangeRoleResponse>, Status> {
        Ok(Response::new(ChangeRoleResponse {
            success: true,
            message: "role changed".to_string(),
        }))
    }

    async fn prepare_add_shard(
        &self,
        _request: Request<PrepareAddShardRequest>,
    ) -> Result<Response<PrepareAddShardResponse>, Status> {
        Ok(Response::new(PrepareAddShardResponse {
            success: true,
            message: "prepared".to_string(),
        }))
    }

    async fn prepare_drop_shard(
        &self,
        _request: Request<PrepareDropShardRequest>,
    ) -> Result<Response<PrepareDropShardResponse>, Status> {
        Ok(Response::new(PrepareDropShardResponse {
            success: true,
            message: "prepared".to_string(),
        }))
    }
}

#[allow(dead_code)]
pub async fn spawn_app_node() -> anyhow::Result<(
    SocketAddr,
    mpsc::UnboundedReceiver<Delivery>,
    JoinHandle<()>,
)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (deliveries, rx) = mpsc::unbounded_channel();
    let node = TestAppNode { deliveries };
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(AppShardServiceServer::new(node))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .expect("app node server");
    });
    Ok((addr, rx, handle))
}

/// Spawn a coordinator over an in-memory store; returns its address and the
/// shutdown handle.
#[allow(dead_code)]
pub async fn spawn_coordinator(
) -> anyhow::Result<(SocketAddr, watch::Sender<bool>, JoinHandle<()>)> {
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
    let policy_store = Arc::new(InMemoryPolicyStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let coordinator = Coordinator::new(
        store,
        policy_store,
        Duration::from_secs(3600),
        shutdown_rx.clone(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        serve(&coordinator, listener, shutdown_rx)
            .await
            .expect("coordinator server");
    });
    Ok((addr, shutdown_tx, handle))
}

/// Register a node with the coordinator, advertising the given location.
#[allow(dead_code)]
pub async fn register_node(
    coordinator: SocketAddr,
    node_id: Uuid,
    location: SocketAddr,
) -> anyhow::Result<()> {
    let mut client = NodeServiceClient::connect(format!("http://{coordinator}")).await?;
    let response = client
        .register_node(RegisterNodeRequest {
            node: Some(Node {
                id: node_id.to_string(),
                location: location.to_string(),
                capacity: 100,
                status: "active".to_string(),
            }),
        })
        .await?
        .into_inner();
    anyhow::ensure!(response.success, "RegisterNode failed: {}", response.message);
    Ok(())
}

/// Await one delivery with a bounded wait.
#[allow(dead_code)]
pub async fn expect_delivery(
    rx: &mut mpsc::UnboundedReceiver<Delivery>,
    within: Duration,
) -> Option<Delivery> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}

/// In-process notifier for lib-level tests: records AddShard calls instead
/// of dialing a node.
#[allow(dead_code)]
pub struct RecordingNotifier {
    deliveries: mpsc::UnboundedSender<(Uuid, Uuid, String)>,
}

impl RecordingNotifier {
    #[allow(dead_code)]
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<(Uuid, Uuid, String)>) {
        let (deliveries, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { deliveries }), rx)
    }
}

#[tonic::async_trait]
impl shardmgr::NodeNotifier for RecordingNotifier {
    async fn prepare_add_shard(
        &self,
        _node_id: Uuid,
        _shard_id: Uuid,
        _current_owner: Option<Uuid>,
        _role: &str,
    ) -> shardmgr::Result<()> {
        Ok(())
    }

    async fn prepare_drop_shard(
        &self,
        _node_id: Uuid,
        _shard_id: Uuid,
        _new_owner: Option<Uuid>,
        _role: &str,
    ) -> shardmgr::Result<()> {
        Ok(())
    }

    async fn add_shard(&self, node_id: Uuid, shard_id: Uuid, role: &str) -> shardmgr::Result<()> {
        let _ = self.deliveries.send((node_id, shard_id, role.to_string()));
        Ok(())
    }

    async fn drop_shard(&self, _node_id: Uuid, _shard_id: Uuid) -> shardmgr::Result<()> {
        Ok(())
    }

    async fn change_role(
        &self,
        _node_id: Uuid,
        _shard_id: Uuid,
        _current_role: &str,
        _new_role: &str,
    ) -> shardmgr::Result<()> {
        Ok(())
    }
}
