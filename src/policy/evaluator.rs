//! Pure policy evaluation over a system-state snapshot, plus the history
//! overlay used for trend analysis and chained evaluation.

use super::{
    compare, Action, Condition, EvaluationResult, MetricValue, Policy, SystemState,
    ACTION_MIGRATE_SHARD, ACTION_UPDATE_METRICS,
};
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

/// Deterministic evaluator: (policy, state) in, {matched, actions} out.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one policy against a snapshot.
    ///
    /// The policy matches iff every `all` condition holds and at least one
    /// `any` condition holds; empty lists are vacuously true. On a match the
    /// returned actions are the policy's actions in declaration order.
    pub fn evaluate(&self, policy: &Policy, state: &SystemState) -> Result<EvaluationResult> {
        let mut all_ok = true;
        for condition in &policy.conditions.all {
            if !evaluate_condition(condition, state)? {
                all_ok = false;
                break;
            }
        }

        let mut any_ok = policy.conditions.any.is_empty();
        for condition in &policy.conditions.any {
            if evaluate_condition(condition, state)? {
                any_ok = true;
                break;
            }
        }

        let matched = all_ok && any_ok;
        Ok(EvaluationResult {
            policy_id: policy.id,
            success: true,
            matched,
            actions: if matched {
                policy.actions.clone()
            } else {
                Vec::new()
            },
            error: String::new(),
            evaluated_at: Utc::now(),
            details: None,
        })
    }
}

fn evaluate_condition(condition: &Condition, state: &SystemState) -> Result<bool> {
    // An absent metric is an error, not a false match.
    let sample = state.metrics.get(&condition.metric).ok_or_else(|| {
        Error::not_found(format!(
            "metric {} not found in system state",
            condition.metric
        ))
    })?;
    compare(condition.operator, sample.value, &condition.value)
}

/// Evaluator with a bounded per-policy history of past results.
///
/// History entries older than the sliding time window are pruned on every
/// write; a hard per-policy cap bounds memory even if the clock stalls.
pub struct AdvancedEvaluator {
    evaluator: Evaluator,
    time_window: Duration,
    max_entries_per_policy: usize,
    history: Mutex<HashMap<Uuid, VecDeque<EvaluationResult>>>,
}

const DEFAULT_MAX_HISTORY_ENTRIES: usize = 256;

impl AdvancedEvaluator {
    pub fn new(time_window: Duration) -> Self {
        Self::with_capacity(time_window, DEFAULT_MAX_HISTORY_ENTRIES)
    }

    pub fn with_capacity(time_window: Duration, max_entries_per_policy: usize) -> Self {
        Self {
            evaluator: Evaluator::new(),
            time_window,
            max_entries_per_policy: max_entries_per_policy.max(1),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate and record the result in the per-policy history ring.
    pub fn evaluate_with_history(
        &self,
        policy: &Policy,
        state: &SystemState,
    ) -> Result<EvaluationResult> {
        let result = self.evaluator.evaluate(policy, state)?;
        self.record(policy.id, result.clone());
        Ok(result)
    }

    /// Evaluate and attach a trend summary computed over the recorded
    /// history within the time window.
    pub fn evaluate_with_time_window(
        &self,
        policy: &Policy,
        state: &SystemState,
    ) -> Result<EvaluationResult> {
        let prior = self.policy_history(policy.id);
        let mut result = self.evaluator.evaluate(policy, state)?;
        self.record(policy.id, result.clone());

        let mut window: Vec<EvaluationResult> = prior;
        window.push(result.clone());
        if let Some(trend) = analyze_trend(&window, self.time_window) {
            result.details = Some(trend);
        }
        Ok(result)
    }

    /// Evaluate policies in sequence, folding each matched policy's actions
    /// into a copy of the state before the next evaluation. The final folded
    /// state is written back to the caller's reference.
    pub fn evaluate_policy_chain(
        &self,
        policies: &[Policy],
        state: &mut SystemState,
    ) -> Result<Vec<EvaluationResult>> {
        let mut results = Vec::with_capacity(policies.len());
        let mut current = state.clone();

        for policy in policies {
            let result = self
                .evaluator
                .evaluate(policy, &current)
                .map_err(|err| {
                    Error::internal(format!("error evaluating policy {}: {err}", policy.id))
                })?;
            if result.matched && !result.actions.is_empty() {
                current = apply_actions_to_state(&current, &result.actions);
            }
            results.push(result);
        }

        *state = current;
        Ok(results)
    }

    pub fn policy_history(&self, policy_id: Uuid) -> Vec<EvaluationResult> {
        self.history
            .lock()
            .get(&policy_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, policy_id: Uuid, result: EvaluationResult) {
        let mut history = self.history.lock();
        let ring = history.entry(policy_id).or_default();
        ring.push_back(result);
        while ring.len() > self.max_entries_per_policy {
            ring.pop_front();
        }
        // Prune on write: everything older than now - window goes.
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.time_window).unwrap_or(chrono::Duration::zero());
        for ring in history.values_mut() {
            ring.retain(|entry| entry.evaluated_at > cutoff);
        }
    }
}

fn analyze_trend(history: &[EvaluationResult], window: Duration) -> Option<serde_json::Value> {
    if history.len() < 2 {
        return None;
    }
    let total = history.len();
    let matches = history.iter().filter(|r| r.matched).count();
    Some(json!({
        "match_rate": matches as f64 / total as f64,
        "total_evaluations": total,
        "time_window": format!("{window:?}"),
        "last_matched": history[total - 1].matched,
        "trend_stable": matches > total / 2,
    }))
}

/// Fold actions into a copy of the state. Only `update_metrics` and
/// `migrate_shard` have state-level effects; other types are no-ops here.
fn apply_actions_to_state(state: &SystemState, actions: &[Action]) -> SystemState {
    let mut next = state.clone();
    for action in actions {
        match action.action_type.as_str() {
            ACTION_MIGRATE_SHARD => {
                if let (Some(shard_id), Some(target)) = (
                    action.constraints.get("shard_id").and_then(|v| v.as_str()),
                    action
                        .constraints
                        .get("target_node")
                        .and_then(|v| v.as_str()),
                ) {
                    if let Some(shard) = next.shards.get_mut(shard_id) {
                        shard.node_id = target.to_string();
                    }
                }
            }
            ACTION_UPDATE_METRICS => {
                if let (Some(metric), Some(value)) = (
                    action.constraints.get("metric").and_then(|v| v.as_str()),
                    action.constraints.get("value").and_then(|v| v.as_f64()),
                ) {
                    next.metrics
                        .insert(metric.to_string(), MetricValue::now(value));
                }
            }
            _ => {}
        }
    }
    next
}
