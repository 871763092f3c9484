//! # Action Dispatcher
//!
//! Routes policy actions by their `type` tag. Migrations go to the placement
//! controller; admin notifications are best-effort; unknown types are logged
//! and treated as successful no-ops so newer policies stay forward
//! compatible.

use crate::error::{Error, Result};
use crate::placement::PlacementController;
use crate::policy::{Action, ActionExecutor, ACTION_MIGRATE_SHARD, ACTION_NOTIFY_ADMIN};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ActionDispatcher {
    placement: Arc<PlacementController>,
}

impl ActionDispatcher {
    pub fn new(placement: Arc<PlacementController>) -> Self {
        Self { placement }
    }
}

fn constraint_id(action: &Action, key: &str) -> Result<Uuid> {
    let raw = action
        .constraints
        .get(key)
        .and_then(|value| value.as_str())
        .ok_or_else(|| {
            Error::invalid(format!(
                "action {} is missing constraint {key}",
                action.action_type
            ))
        })?;
    Uuid::parse_str(raw)
        .map_err(|_| Error::invalid(format!("constraint {key} is not a valid id: {raw:?}")))
}

#[async_trait]
impl ActionExecutor for ActionDispatcher {
    async fn execute_action(&self, action: &Action) -> Result<()> {
        match action.action_type.as_str() {
            ACTION_MIGRATE_SHARD => {
                let shard_id = constraint_id(action, "shard_id")?;
                let source = constraint_id(action, "source_node")?;
                let target = constraint_id(action, "target_node")?;
                self.placement.migrate_shard(shard_id, source, target).await
            }
            ACTION_NOTIFY_ADMIN => {
                info!(constraints = ?action.constraints, "admin notification");
                Ok(())
            }
            other => {
                warn!(action_type = other, "unknown action type, ignoring");
                Ok(())
            }
        }
    }
}
