//! The executing policy engine: pulls metric samples from a provider,
//! evaluates conditions, and hands matched actions to an executor.

use super::{compare, Action, Conditions, Policy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Source of live metric samples. How metrics are gathered is external; the
/// engine only consumes this interface.
#[async_trait]
pub trait MetricProvider: Send + Sync {
    async fn get_metric(&self, name: &str) -> Result<f64>;
}

/// Executes the actions of matched policies.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute_action(&self, action: &Action) -> Result<()>;
}

/// Evaluates policies and executes their actions.
pub struct Engine {
    metrics: Arc<dyn MetricProvider>,
    executor: Arc<dyn ActionExecutor>,
}

impl Engine {
    pub fn new(metrics: Arc<dyn MetricProvider>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self { metrics, executor }
    }

    /// Evaluate one policy; on a match execute its actions in declaration
    /// order. Returns whether the policy matched.
    pub async fn evaluate_policy(&self, policy: &Policy) -> Result<bool> {
        let matched = self
            .evaluate_conditions(&policy.conditions)
            .await
            .map_err(|err| {
                Error::internal(format!("failed to evaluate conditions: {err}"))
            })?;
        if !matched {
            return Ok(false);
        }
        for action in &policy.actions {
            self.executor.execute_action(action).await.map_err(|err| {
                Error::internal(format!(
                    "failed to execute action {}: {err}",
                    action.action_type
                ))
            })?;
        }
        Ok(true)
    }

    /// Evaluate policies in priority order, highest first; ties keep input
    /// order. Every policy still gets its chance after an error; only the
    /// first error is surfaced, after all policies have been tried.
    pub async fn evaluate_policies(&self, policies: &[Policy]) -> Result<()> {
        let mut sorted: Vec<&Policy> = policies.iter().collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut first_err: Option<Error> = None;
        for policy in sorted {
            if let Err(err) = self.evaluate_policy(policy).await {
                debug!(policy = %policy.id, error = %err, "policy evaluation failed");
                if first_err.is_none() {
                    first_err = Some(Error::internal(format!(
                        "failed to evaluate policy {}: {err}",
                        policy.id
                    )));
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn evaluate_conditions(&self, conditions: &Conditions) -> Result<bool> {
        for condition in &conditions.all {
            let sample = self.metrics.get_metric(&condition.metric).await?;
            if !compare(condition.operator, sample, &condition.value)? {
                return Ok(false);
            }
        }
        if !conditions.any.is_empty() {
            let mut any_met = false;
            for condition in &conditions.any {
                let sample = self.metrics.get_metric(&condition.metric).await?;
                if compare(condition.operator, sample, &condition.value)? {
                    any_met = true;
                    break;
                }
            }
            if !any_met {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
