//! # Service Facade
//!
//! Exposes the registry to external callers as five logical services over
//! the schema-typed RPC surface. One facade struct implements all five; the
//! runner registers it with the transport and owns graceful shutdown.

mod failure;
mod monitoring;
mod node;
mod policy;
mod runner;
mod shard;

pub use runner::{serve, Coordinator};

use crate::model::{NodeStatus, ShardStatus};
use crate::placement::PlacementController;
use crate::registry::Registry;
use std::sync::Arc;
use tonic::Status;
use uuid::Uuid;

/// The facade holds one registry reference and passes it explicitly to each
/// service method; there is no process-wide state.
#[derive(Clone)]
pub struct ShardManagerService {
    registry: Arc<Registry>,
    placement: Arc<PlacementController>,
}

impl ShardManagerService {
    pub fn new(registry: Arc<Registry>, placement: Arc<PlacementController>) -> Self {
        Self {
            registry,
            placement,
        }
    }
}

/// Wire ids are canonical textual encodings; anything else is
/// `invalid-argument`.
fn parse_id(field: &str, raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument(format!("invalid {field}")))
}

fn parse_node_status(raw: &str) -> Result<NodeStatus, Status> {
    NodeStatus::parse(raw)
        .ok_or_else(|| Status::invalid_argument(format!("unknown node status {raw:?}")))
}

fn parse_shard_status(raw: &str) -> Result<ShardStatus, Status> {
    ShardStatus::parse(raw)
        .ok_or_else(|| Status::invalid_argument(format!("unknown shard status {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_ids_are_invalid_argument() {
        let err = parse_id("shard ID", "not-a-uuid").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        parse_id("shard ID", &Uuid::new_v4().to_string()).unwrap();
    }
}
