//! Parsing and validation of policy documents.

use super::{Condition, Operator, Policy};
use crate::error::{Error, Result};
use uuid::Uuid;

/// Parses policy JSON and enforces structural validity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a policy from JSON, filling a missing id, and validate it.
    pub fn parse(&self, policy_json: &[u8]) -> Result<Policy> {
        let mut policy: Policy = serde_json::from_slice(policy_json)
            .map_err(|err| Error::invalid(format!("failed to parse policy: {err}")))?;
        if policy.id.is_nil() {
            policy.id = Uuid::new_v4();
        }
        self.validate(&policy)?;
        Ok(policy)
    }

    pub fn validate(&self, policy: &Policy) -> Result<()> {
        if policy.name.is_empty() {
            return Err(Error::invalid("policy name is required"));
        }
        if policy.conditions.is_empty() {
            return Err(Error::invalid("policy must have at least one condition"));
        }
        if policy.actions.is_empty() {
            return Err(Error::invalid("policy must have at least one action"));
        }
        for condition in &policy.conditions.all {
            validate_condition(condition)
                .map_err(|err| Error::invalid(format!("invalid condition in 'all': {err}")))?;
        }
        for condition in &policy.conditions.any {
            validate_condition(condition)
                .map_err(|err| Error::invalid(format!("invalid condition in 'any': {err}")))?;
        }
        for (index, action) in policy.actions.iter().enumerate() {
            if action.action_type.is_empty() {
                return Err(Error::invalid(format!(
                    "action type is required for action at index {index}"
                )));
            }
        }
        Ok(())
    }
}

fn validate_condition(condition: &Condition) -> Result<()> {
    if condition.metric.is_empty() {
        return Err(Error::invalid("metric name is required"));
    }
    match condition.operator {
        Operator::Lt | Operator::Gt => {
            if !condition.value.is_number() {
                return Err(Error::invalid(format!(
                    "operator {:?} requires a numeric value, got {}",
                    condition.operator, condition.value
                )));
            }
        }
        Operator::Eq | Operator::Ne => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> Parser {
        Parser::new()
    }

    #[test]
    fn parse_fills_missing_id() {
        let raw = json!({
            "name": "spread",
            "type": "placement",
            "conditions": {"all": [{"metric": "cpu_usage", "operator": "gt", "value": 80}]},
            "actions": [{"type": "migrate_shard"}]
        });
        let policy = parser().parse(raw.to_string().as_bytes()).unwrap();
        assert!(!policy.id.is_nil());
    }

    #[test]
    fn rejects_policy_without_conditions() {
        let raw = json!({
            "name": "no-conditions",
            "type": "placement",
            "actions": [{"type": "notify_admin"}]
        });
        let err = parser().parse(raw.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("at least one condition"));
    }

    #[test]
    fn rejects_policy_without_actions() {
        let raw = json!({
            "name": "no-actions",
            "type": "placement",
            "conditions": {"any": [{"metric": "cpu_usage", "operator": "gt", "value": 80}]}
        });
        let err = parser().parse(raw.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("at least one action"));
    }

    #[test]
    fn rejects_non_numeric_threshold() {
        let raw = json!({
            "name": "bad-threshold",
            "type": "placement",
            "conditions": {"all": [{"metric": "cpu_usage", "operator": "lt", "value": "low"}]},
            "actions": [{"type": "notify_admin"}]
        });
        let err = parser().parse(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rejects_unknown_operator() {
        let raw = json!({
            "name": "bad-operator",
            "type": "placement",
            "conditions": {"all": [{"metric": "cpu_usage", "operator": "ge", "value": 80}]},
            "actions": [{"type": "notify_admin"}]
        });
        let err = parser().parse(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn eq_accepts_non_numeric_values() {
        let raw = json!({
            "name": "tag-match",
            "type": "cost_optimization",
            "conditions": {"all": [{"metric": "region", "operator": "eq", "value": "us-east"}]},
            "actions": [{"type": "notify_admin"}]
        });
        parser().parse(raw.to_string().as_bytes()).unwrap();
    }
}
