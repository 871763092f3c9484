//! Policy catalog storage.
//!
//! Two backends behind one interface: an in-memory store for tests and
//! ephemeral configurations, and a transactional relational store that also
//! keeps an append-only `policy_history` log of store/delete operations.

use super::{Policy, PolicyType};
use crate::error::{Error, Result};
use crate::store::Dialect;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Persist a policy, generating an id if absent.
    async fn store(&self, policy: &mut Policy) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Policy>;
    async fn list(&self) -> Result<Vec<Policy>>;
    async fn list_by_type(&self, policy_type: PolicyType) -> Result<Vec<Policy>>;
    /// Update an existing policy; absent ids are an error.
    async fn update(&self, policy: &mut Policy) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Store,
    Delete,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Store => "store",
            HistoryAction::Delete => "delete",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "store" => Some(HistoryAction::Store),
            "delete" => Some(HistoryAction::Delete),
            _ => None,
        }
    }
}

/// One append-only policy change record.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyHistoryEntry {
    pub id: i64,
    pub policy_id: Uuid,
    pub action: HistoryAction,
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------

/// Readers-writer-locked map store.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<Uuid, Policy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn store(&self, policy: &mut Policy) -> Result<()> {
        if policy.id.is_nil() {
            policy.id = Uuid::new_v4();
        }
        let now = Utc::now();
        policy.created_at = now;
        policy.updated_at = now;
        self.policies.write().insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Policy> {
        self.policies
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("policy not found: {id}")))
    }

    async fn list(&self) -> Result<Vec<Policy>> {
        Ok(self.policies.read().values().cloned().collect())
    }

    async fn list_by_type(&self, policy_type: PolicyType) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .read()
            .values()
            .filter(|p| p.policy_type == policy_type)
            .cloned()
            .collect())
    }

    async fn update(&self, policy: &mut Policy) -> Result<()> {
        let mut policies = self.policies.write();
        if !policies.contains_key(&policy.id) {
            return Err(Error::not_found(format!("policy not found: {}", policy.id)));
        }
        policy.updated_at = Utc::now();
        policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        if self.policies.write().remove(&id).is_none() {
            return Err(Error::not_found(format!("policy not found: {id}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// Relational policy store with an append-only change history.
pub struct PersistentPolicyStore {
    pool: AnyPool,
    dialect: Dialect,
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| Error::internal(format!("corrupt timestamp {raw:?}: {err}")))
}

impl PersistentPolicyStore {
    pub async fn connect(dsn: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_dsn(dsn)?;
        let max_connections = match dialect {
            Dialect::Postgres => 8,
            Dialect::Sqlite => 1,
        };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        let store = Self { pool, dialect };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let auto_id = match self.dialect {
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        };
        let statements = [
            "CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                type TEXT NOT NULL,
                priority BIGINT NOT NULL,
                conditions TEXT NOT NULL,
                actions TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS policy_history (
                    {auto_id},
                    policy_id TEXT NOT NULL,
                    action TEXT NOT NULL,
                    details TEXT,
                    timestamp TEXT NOT NULL
                )"
            ),
        ];
        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn ph(&self, n: usize) -> String {
        self.dialect.placeholder(n)
    }

    /// Read the append-only change log for one policy, oldest first.
    pub async fn get_history(&self, policy_id: Uuid) -> Result<Vec<PolicyHistoryEntry>> {
        let sql = format!(
            "SELECT id, policy_id, action, details, timestamp
             FROM policy_history WHERE policy_id = {} ORDER BY id",
            self.ph(1),
        );
        let rows = sqlx::query(&sql)
            .bind(policy_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let action: String = row.try_get("action")?;
                let details: Option<String> = row.try_get("details")?;
                Ok(PolicyHistoryEntry {
                    id: row.try_get("id")?,
                    policy_id: Uuid::parse_str(&row.try_get::<String, _>("policy_id")?)
                        .map_err(|err| Error::internal(format!("corrupt policy id: {err}")))?,
                    action: HistoryAction::parse(&action).ok_or_else(|| {
                        Error::internal(format!("unknown history action {action:?}"))
                    })?,
                    details: details
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()
                        .map_err(|err| Error::internal(format!("corrupt history details: {err}")))?,
                    timestamp: parse_ts(&row.try_get::<String, _>("timestamp")?)?,
                })
            })
            .collect()
    }

    async fn upsert(&self, policy: &Policy) -> Result<()> {
        let conditions = serde_json::to_string(&policy.conditions)?;
        let actions = serde_json::to_string(&policy.actions)?;
        let details = serde_json::to_string(policy)?;

        let mut tx = self.pool.begin().await?;
        let upsert = format!(
            "INSERT INTO policies (id, name, description, type, priority, conditions, actions,
                                   created_at, updated_at)
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {})
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 type = excluded.type,
                 priority = excluded.priority,
                 conditions = excluded.conditions,
                 actions = excluded.actions,
                 updated_at = excluded.updated_at",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
            self.ph(6),
            self.ph(7),
            self.ph(8),
            self.ph(9),
        );
        sqlx::query(&upsert)
            .bind(policy.id.to_string())
            .bind(&policy.name)
            .bind(&policy.description)
            .bind(policy.policy_type.as_str())
            .bind(policy.priority as i64)
            .bind(conditions)
            .bind(actions)
            .bind(fmt_ts(policy.created_at))
            .bind(fmt_ts(policy.updated_at))
            .execute(&mut *tx)
            .await?;

        let history = format!(
            "INSERT INTO policy_history (policy_id, action, details, timestamp)
             VALUES ({}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
        );
        sqlx::query(&history)
            .bind(policy.id.to_string())
            .bind(HistoryAction::Store.as_str())
            .bind(Some(details))
            .bind(fmt_ts(Utc::now()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    fn policy_from_row(row: &sqlx::any::AnyRow) -> Result<Policy> {
        let policy_type: String = row.try_get("type")?;
        Ok(Policy {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)
                .map_err(|err| Error::internal(format!("corrupt policy id: {err}")))?,
            name: row.try_get("name")?,
            description: row
                .try_get::<Option<String>, _>("description")?
                .unwrap_or_default(),
            policy_type: PolicyType::parse(&policy_type)
                .ok_or_else(|| Error::internal(format!("unknown policy type {policy_type:?}")))?,
            priority: row.try_get::<i64, _>("priority")? as i32,
            conditions: serde_json::from_str(&row.try_get::<String, _>("conditions")?)
                .map_err(|err| Error::internal(format!("corrupt conditions: {err}")))?,
            actions: serde_json::from_str(&row.try_get::<String, _>("actions")?)
                .map_err(|err| Error::internal(format!("corrupt actions: {err}")))?,
            created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}

#[async_trait]
impl PolicyStore for PersistentPolicyStore {
    async fn store(&self, policy: &mut Policy) -> Result<()> {
        if policy.id.is_nil() {
            policy.id = Uuid::new_v4();
        }
        // Truncated to the stored precision so a read-back compares equal.
        let now = Utc::now().trunc_subsecs(6);
        policy.created_at = now;
        policy.updated_at = now;
        self.upsert(policy).await
    }

    async fn get(&self, id: Uuid) -> Result<Policy> {
        let sql = format!(
            "SELECT id, name, description, type, priority, conditions, actions,
                    created_at, updated_at
             FROM policies WHERE id = {}",
            self.ph(1),
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("policy not found: {id}")))?;
        Self::policy_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Policy>> {
        let rows = sqlx::query(
            "SELECT id, name, description, type, priority, conditions, actions,
                    created_at, updated_at
             FROM policies ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::policy_from_row).collect()
    }

    async fn list_by_type(&self, policy_type: PolicyType) -> Result<Vec<Policy>> {
        let sql = format!(
            "SELECT id, name, description, type, priority, conditions, actions,
                    created_at, updated_at
             FROM policies WHERE type = {} ORDER BY created_at DESC",
            self.ph(1),
        );
        let rows = sqlx::query(&sql)
            .bind(policy_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::policy_from_row).collect()
    }

    async fn update(&self, policy: &mut Policy) -> Result<()> {
        // Reuses the upsert path after an existence check so the history log
        // still records the operation as a store.
        self.get(policy.id).await?;
        policy.updated_at = Utc::now().trunc_subsecs(6);
        self.upsert(policy).await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let delete = format!("DELETE FROM policies WHERE id = {}", self.ph(1));
        let result = sqlx::query(&delete)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("policy not found: {id}")));
        }
        let history = format!(
            "INSERT INTO policy_history (policy_id, action, details, timestamp)
             VALUES ({}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
        );
        sqlx::query(&history)
            .bind(id.to_string())
            .bind(HistoryAction::Delete.as_str())
            .bind(Option::<String>::None)
            .bind(fmt_ts(Utc::now()))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
