//! NodeService implementation.

use super::{parse_id, parse_node_status, ShardManagerService};
use crate::model::Node;
use crate::pb::node_service_server::NodeService;
use crate::pb::{
    HeartbeatRequest, HeartbeatResponse, ListNodesRequest, ListNodesResponse, Node as PbNode,
    RegisterNodeRequest, RegisterNodeResponse,
};
use tonic::{Request, Response, Status};
use uuid::Uuid;

fn node_to_pb(node: &Node) -> PbNode {
    PbNode {
        id: node.id.to_string(),
        location: node.location.clone(),
        capacity: node.capacity,
        status: node.status.as_str().to_string(),
    }
}

#[tonic::async_trait]
impl NodeService for ShardManagerService {
    async fn register_node(
        &self,
        request: Request<RegisterNodeRequest>,
    ) -> Result<Response<RegisterNodeResponse>, Status> {
        let spec = request
            .into_inner()
            .node
            .ok_or_else(|| Status::invalid_argument("node is required"))?;
        // Nodes may register with their own id so later heartbeats can refer
        // to it; an absent id gets a generated one, echoed in the message.
        let id = if spec.id.is_empty() {
            Uuid::new_v4()
        } else {
            parse_id("node ID", &spec.id)?
        };
        let status = parse_node_status(&spec.status)?;

        let mut node = Node::new(id, spec.location, spec.capacity, status);
        self.registry.register_node(&mut node).await?;

        Ok(Response::new(RegisterNodeResponse {
            success: true,
            message: format!("node {id} registered successfully"),
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let node_id = parse_id("node ID", &req.node_id)?;
        let status = parse_node_status(&req.status)?;

        // Lenient mode: a heartbeat for an unknown node succeeds silently.
        self.registry.heartbeat(node_id, status, req.load).await?;

        Ok(Response::new(HeartbeatResponse { success: true }))
    }

    async fn list_nodes(
        &self,
        _request: Request<ListNodesRequest>,
    ) -> Result<Response<ListNodesResponse>, Status> {
        let nodes = self.registry.list_nodes().await?;
        Ok(Response::new(ListNodesResponse {
            nodes: nodes.iter().map(node_to_pb).collect(),
        }))
    }
}
