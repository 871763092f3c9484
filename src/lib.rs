//! # Shardmgr
//!
//! A shard-manager control plane: the coordinator tracks a fleet of
//! application nodes, owns the authoritative mapping of logical shards to
//! nodes, evaluates declarative policies against live metrics, and instructs
//! nodes to add, drop, or change the role of the shards they host.
//!
//! The coordinator is the control plane only; nodes host the data.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod model;
pub mod notifier;
pub mod placement;
pub mod policy;
pub mod registry;
pub mod server;
pub mod store;

/// Generated wire types for the coordinator and node-side services.
pub mod pb {
    tonic::include_proto!("shardmgr.v1");
}

// Re-export the main types for convenience
pub use error::{Error, Result};
pub use model::{HealthSummary, Node, NodeStatus, Shard, ShardStatus, ShardVersion};
pub use notifier::{GrpcNodeNotifier, NodeLookup, NodeNotifier};
pub use placement::PlacementController;
pub use registry::{Registry, ShardEvent, ShardEventKind};
pub use store::{MemoryMetadataStore, MetadataStore, SqlMetadataStore};
