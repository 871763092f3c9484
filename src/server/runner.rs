//! Coordinator assembly and the serving loop.
//!
//! Construction is topological: the notifier takes a node-lookup capability,
//! the placement controller takes the notifier, the dispatcher takes the
//! placement controller, and the policy manager drives the dispatcher. No
//! component reaches for global state.

use super::ShardManagerService;
use crate::dispatch::ActionDispatcher;
use crate::metrics::StoreMetricProvider;
use crate::notifier::{GrpcNodeNotifier, NodeLookup, NodeNotifier};
use crate::pb::failure_service_server::FailureServiceServer;
use crate::pb::monitoring_service_server::MonitoringServiceServer;
use crate::pb::node_service_server::NodeServiceServer;
use crate::pb::policy_service_server::PolicyServiceServer;
use crate::pb::shard_service_server::ShardServiceServer;
use crate::placement::PlacementController;
use crate::policy::{PolicyManager, PolicyStore};
use crate::registry::Registry;
use crate::store::MetadataStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

/// The wired-up control plane: registry, placement, and policy manager.
pub struct Coordinator {
    pub registry: Arc<Registry>,
    pub placement: Arc<PlacementController>,
    pub policy_manager: Arc<PolicyManager>,
}

impl Coordinator {
    /// Wire the components against the given stores. `shutdown` doubles as
    /// the policy manager's parent cancel signal.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        policy_store: Arc<dyn PolicyStore>,
        eval_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let registry = Arc::new(Registry::new(store));
        let notifier: Arc<dyn NodeNotifier> = Arc::new(GrpcNodeNotifier::new(
            Arc::clone(&registry) as Arc<dyn NodeLookup>,
        ));
        Self::with_notifier(registry, notifier, policy_store, eval_interval, shutdown)
    }

    /// Same wiring with an injected notifier (tests swap in a recording one).
    pub fn with_notifier(
        registry: Arc<Registry>,
        notifier: Arc<dyn NodeNotifier>,
        policy_store: Arc<dyn PolicyStore>,
        eval_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let placement = Arc::new(PlacementController::new(Arc::clone(&registry), notifier));
        let dispatcher = Arc::new(ActionDispatcher::new(Arc::clone(&placement)));
        let metrics = Arc::new(StoreMetricProvider::new(Arc::clone(&registry)));
        let policy_manager = Arc::new(
            PolicyManager::new(metrics, dispatcher, policy_store, eval_interval)
                .with_parent_cancel(shutdown),
        );
        Self {
            registry,
            placement,
            policy_manager,
        }
    }

    pub fn service(&self) -> ShardManagerService {
        ShardManagerService::new(Arc::clone(&self.registry), Arc::clone(&self.placement))
    }
}

/// Serve the five facade services until `shutdown` fires, then drain
/// in-flight requests and stop the policy manager.
pub async fn serve(
    coordinator: &Coordinator,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let svc = coordinator.service();

    coordinator.policy_manager.start();
    info!(%addr, "shard manager listening");

    let result = Server::builder()
        .add_service(NodeServiceServer::new(svc.clone()))
        .add_service(ShardServiceServer::new(svc.clone()))
        .add_service(PolicyServiceServer::new(svc.clone()))
        .add_service(MonitoringServiceServer::new(svc.clone()))
        .add_service(FailureServiceServer::new(svc))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown.changed().await;
        })
        .await;

    coordinator.policy_manager.stop().await;
    info!("shard manager stopped");
    result.map_err(Into::into)
}
