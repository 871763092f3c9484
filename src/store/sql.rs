//! Relational metadata store over sqlx.
//!
//! One implementation serves both backends: a postgres DSN selects the
//! postgres dialect, a sqlite DSN the embedded file-backed dialect.
//! Placeholder style is chosen at query-build time; everything else is the
//! same SQL. Ids are stored as canonical uuid text, timestamps as RFC 3339
//! UTC text (fixed-width, so lexicographic ordering is chronological), and
//! JSON blobs as text.

use super::MetadataStore;
use crate::error::{Error, Result};
use crate::model::{
    FailureReport, MigrationRecord, MigrationStatus, Node, NodeStatus, PolicyRecord, Shard,
    ShardStatus, ShardVersion,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub(crate) fn from_dsn(dsn: &str) -> Result<Self> {
        if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if dsn.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            Err(Error::invalid(format!(
                "unsupported store DSN (expected postgres:// or sqlite:): {dsn}"
            )))
        }
    }

    pub(crate) fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    fn auto_id_column(self) -> &'static str {
        match self {
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }
}

/// Metadata store backed by a transactional relational database.
pub struct SqlMetadataStore {
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

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|err| Error::internal(format!("corrupt id {raw:?}: {err}")))
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|err| Error::internal(format!("corrupt JSON blob: {err}")))
}

fn node_from_row(row: &AnyRow) -> Result<Node> {
    let status: String = row.try_get("status")?;
    let last_heartbeat: Option<String> = row.try_get("last_heartbeat")?;
    Ok(Node {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        location: row.try_get("location")?,
        capacity: row.try_get("capacity")?,
        status: NodeStatus::parse(&status)
            .ok_or_else(|| Error::internal(format!("unknown node status {status:?}")))?,
        last_heartbeat: last_heartbeat.as_deref().map(parse_ts).transpose()?,
        current_load: row.try_get("current_load")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn shard_from_row(row: &AnyRow) -> Result<Shard> {
    let status: String = row.try_get("status")?;
    let node_id: Option<String> = row.try_get("node_id")?;
    Ok(Shard {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        shard_type: row.try_get("type")?,
        size: row.try_get("size")?,
        node_id: node_id.as_deref().map(parse_id).transpose()?,
        status: ShardStatus::parse(&status)
            .ok_or_else(|| Error::internal(format!("unknown shard status {status:?}")))?,
        version: row.try_get("version")?,
        metadata: parse_json(&row.try_get::<String, _>("metadata")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn shard_version_from_row(row: &AnyRow) -> Result<ShardVersion> {
    let status: String = row.try_get("status")?;
    let node_id: Option<String> = row.try_get("node_id")?;
    Ok(ShardVersion {
        id: row.try_get("id")?,
        shard_id: parse_id(&row.try_get::<String, _>("shard_id")?)?,
        version: row.try_get("version")?,
        shard_type: row.try_get("type")?,
        size: row.try_get("size")?,
        node_id: node_id.as_deref().map(parse_id).transpose()?,
        status: ShardStatus::parse(&status)
            .ok_or_else(|| Error::internal(format!("unknown shard status {status:?}")))?,
        metadata: parse_json(&row.try_get::<String, _>("metadata")?)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
    })
}

impl SqlMetadataStore {
    /// Connect and bootstrap the schema. The dialect is detected from the
    /// DSN prefix.
    pub async fn connect(dsn: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_dsn(dsn)?;
        // The embedded backend is a single-writer database; one pooled
        // connection also keeps `sqlite::memory:` coherent across calls.
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
        let auto_id = self.dialect.auto_id_column();
        let statements = [
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                location TEXT NOT NULL,
                capacity BIGINT NOT NULL,
                status TEXT NOT NULL,
                last_heartbeat TEXT,
                current_load BIGINT NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS shards (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                size BIGINT NOT NULL,
                node_id TEXT,
                status TEXT NOT NULL,
                version BIGINT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS shard_versions (
                    {auto_id},
                    shard_id TEXT NOT NULL,
                    version BIGINT NOT NULL,
                    type TEXT NOT NULL,
                    size BIGINT NOT NULL,
                    node_id TEXT,
                    status TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (shard_id, version)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS shard_migrations (
                    {auto_id},
                    shard_id TEXT NOT NULL,
                    from_node TEXT NOT NULL,
                    to_node TEXT NOT NULL,
                    status TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    finished_at TEXT
                )"
            ),
            "CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                policy_type TEXT NOT NULL,
                parameters TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS failure_reports (
                    {auto_id},
                    type TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    details TEXT NOT NULL,
                    reported_at TEXT NOT NULL
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_shards_node_id ON shards (node_id)".to_string(),
            "CREATE INDEX IF NOT EXISTS idx_shards_status ON shards (status)".to_string(),
            "CREATE INDEX IF NOT EXISTS idx_shards_version ON shards (version)".to_string(),
            "CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes (status)".to_string(),
            "CREATE INDEX IF NOT EXISTS idx_nodes_last_heartbeat ON nodes (last_heartbeat)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_shard_versions_shard_id ON shard_versions (shard_id)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS idx_failure_reports_entity_id
                ON failure_reports (entity_id)"
                .to_string(),
        ];
        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn ph(&self, n: usize) -> String {
        self.dialect.placeholder(n)
    }
}

#[async_trait]
impl MetadataStore for SqlMetadataStore {
    async fn register_node(&self, node: &mut Node) -> Result<()> {
        let now = Utc::now().trunc_subsecs(6);
        node.created_at = now;
        node.updated_at = now;
        let sql = format!(
            "INSERT INTO nodes (id, location, capacity, status, current_load, created_at, updated_at)
             VALUES ({}, {}, {}, {}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
            self.ph(6),
            self.ph(7),
        );
        sqlx::query(&sql)
            .bind(node.id.to_string())
            .bind(&node.location)
            .bind(node.capacity)
            .bind(node.status.as_str())
            .bind(node.current_load)
            .bind(fmt_ts(node.created_at))
            .bind(fmt_ts(node.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_node(&self, node: &Node) -> Result<()> {
        let sql = format!(
            "UPDATE nodes SET location = {}, capacity = {}, status = {}, updated_at = {}
             WHERE id = {}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
        );
        let result = sqlx::query(&sql)
            .bind(&node.location)
            .bind(node.capacity)
            .bind(node.status.as_str())
            .bind(fmt_ts(Utc::now()))
            .bind(node.id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("node {} not found", node.id)));
        }
        Ok(())
    }

    async fn update_node_heartbeat(
        &self,
        node_id: Uuid,
        status: NodeStatus,
        load: i64,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE nodes SET last_heartbeat = {}, status = {}, current_load = {} WHERE id = {}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
        );
        sqlx::query(&sql)
            .bind(fmt_ts(Utc::now()))
            .bind(status.as_str())
            .bind(load)
            .bind(node_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_node_info(&self, node_id: Uuid) -> Result<Option<Node>> {
        let sql = format!(
            "SELECT id, location, capacity, status, last_heartbeat, current_load,
                    created_at, updated_at
             FROM nodes WHERE id = {}",
            self.ph(1)
        );
        let row = sqlx::query(&sql)
            .bind(node_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT id, location, capacity, status, last_heartbeat, current_load,
                    created_at, updated_at
             FROM nodes ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn register_shard(&self, shard: &mut Shard) -> Result<()> {
        let now = Utc::now().trunc_subsecs(6);
        shard.version = 1;
        shard.created_at = now;
        shard.updated_at = now;
        let sql = format!(
            "INSERT INTO shards (id, type, size, node_id, status, version, metadata,
                                 created_at, updated_at)
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {})",
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
        sqlx::query(&sql)
            .bind(shard.id.to_string())
            .bind(&shard.shard_type)
            .bind(shard.size)
            .bind(shard.node_id.map(|id| id.to_string()))
            .bind(shard.status.as_str())
            .bind(shard.version)
            .bind(shard.metadata.to_string())
            .bind(fmt_ts(shard.created_at))
            .bind(fmt_ts(shard.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_shards(&self) -> Result<Vec<Shard>> {
        let rows = sqlx::query(
            "SELECT id, type, size, node_id, status, version, metadata, created_at, updated_at
             FROM shards ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(shard_from_row).collect()
    }

    async fn get_shard_info(&self, shard_id: Uuid) -> Result<Option<Shard>> {
        let sql = format!(
            "SELECT id, type, size, node_id, status, version, metadata, created_at, updated_at
             FROM shards WHERE id = {}",
            self.ph(1)
        );
        let row = sqlx::query(&sql)
            .bind(shard_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(shard_from_row).transpose()
    }

    async fn assign_shard(&self, shard_id: Uuid, node_id: Uuid) -> Result<()> {
        let sql = format!(
            "UPDATE shards SET node_id = {}, version = version + 1, updated_at = {}
             WHERE id = {}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
        );
        sqlx::query(&sql)
            .bind(node_id.to_string())
            .bind(fmt_ts(Utc::now()))
            .bind(shard_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_shard_status(&self, shard_id: Uuid, status: ShardStatus) -> Result<()> {
        let sql = format!(
            "UPDATE shards SET status = {}, version = version + 1, updated_at = {}
             WHERE id = {}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
        );
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(fmt_ts(Utc::now()))
            .bind(shard_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_shard_version(&self, shard: &mut Shard) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT version FROM shards WHERE id = {}", self.ph(1));
        let row = sqlx::query(&select)
            .bind(shard.id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::not_found(format!("shard {} not found", shard.id)))?;
        let current_version: i64 = row.try_get("version")?;

        let archive = format!(
            "INSERT INTO shard_versions (shard_id, version, type, size, node_id, status,
                                         metadata, created_at)
             SELECT id, version, type, size, node_id, status, metadata, {}
             FROM shards WHERE id = {}",
            self.ph(1),
            self.ph(2),
        );
        sqlx::query(&archive)
            .bind(fmt_ts(Utc::now()))
            .bind(shard.id.to_string())
            .execute(&mut *tx)
            .await?;

        let update = format!(
            "UPDATE shards SET type = {}, size = {}, node_id = {}, status = {},
                               metadata = {}, version = version + 1, updated_at = {}
             WHERE id = {}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
            self.ph(6),
            self.ph(7),
        );
        sqlx::query(&update)
            .bind(&shard.shard_type)
            .bind(shard.size)
            .bind(shard.node_id.map(|id| id.to_string()))
            .bind(shard.status.as_str())
            .bind(shard.metadata.to_string())
            .bind(fmt_ts(Utc::now()))
            .bind(shard.id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        shard.version = current_version + 1;
        Ok(())
    }

    async fn rollback_shard_version(&self, shard_id: Uuid, version: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT id, shard_id, version, type, size, node_id, status, metadata, created_at
             FROM shard_versions WHERE shard_id = {} AND version = {}",
            self.ph(1),
            self.ph(2),
        );
        let row = sqlx::query(&select)
            .bind(shard_id.to_string())
            .bind(version)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("version {version} of shard {shard_id} not found"))
            })?;
        let target = shard_version_from_row(&row)?;

        let archive = format!(
            "INSERT INTO shard_versions (shard_id, version, type, size, node_id, status,
                                         metadata, created_at)
             SELECT id, version, type, size, node_id, status, metadata, {}
             FROM shards WHERE id = {}",
            self.ph(1),
            self.ph(2),
        );
        sqlx::query(&archive)
            .bind(fmt_ts(Utc::now()))
            .bind(shard_id.to_string())
            .execute(&mut *tx)
            .await?;

        let update = format!(
            "UPDATE shards SET type = {}, size = {}, node_id = {}, status = {},
                               metadata = {}, version = version + 1, updated_at = {}
             WHERE id = {}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
            self.ph(6),
            self.ph(7),
        );
        sqlx::query(&update)
            .bind(&target.shard_type)
            .bind(target.size)
            .bind(target.node_id.map(|id| id.to_string()))
            .bind(target.status.as_str())
            .bind(target.metadata.to_string())
            .bind(fmt_ts(Utc::now()))
            .bind(shard_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_shard_version(
        &self,
        shard_id: Uuid,
        version: i64,
    ) -> Result<Option<ShardVersion>> {
        let sql = format!(
            "SELECT id, shard_id, version, type, size, node_id, status, metadata, created_at
             FROM shard_versions WHERE shard_id = {} AND version = {}",
            self.ph(1),
            self.ph(2),
        );
        let row = sqlx::query(&sql)
            .bind(shard_id.to_string())
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(shard_version_from_row).transpose()
    }

    async fn list_shard_versions(&self, shard_id: Uuid) -> Result<Vec<ShardVersion>> {
        let sql = format!(
            "SELECT id, shard_id, version, type, size, node_id, status, metadata, created_at
             FROM shard_versions WHERE shard_id = {} ORDER BY version DESC",
            self.ph(1),
        );
        let rows = sqlx::query(&sql)
            .bind(shard_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(shard_version_from_row).collect()
    }

    async fn record_migration(&self, record: &mut MigrationRecord) -> Result<()> {
        let insert = format!(
            "INSERT INTO shard_migrations (shard_id, from_node, to_node, status, started_at)
             VALUES ({}, {}, {}, {}, {}) RETURNING id",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
        );
        let row = sqlx::query(&insert)
            .bind(record.shard_id.to_string())
            .bind(record.from_node.to_string())
            .bind(record.to_node.to_string())
            .bind(record.status.as_str())
            .bind(fmt_ts(record.started_at))
            .fetch_one(&self.pool)
            .await?;
        record.id = row.try_get("id")?;
        Ok(())
    }

    async fn finish_migration(&self, migration_id: i64, status: MigrationStatus) -> Result<()> {
        let sql = format!(
            "UPDATE shard_migrations SET status = {}, finished_at = {} WHERE id = {}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
        );
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(fmt_ts(Utc::now()))
            .bind(migration_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_policy(&self, policy: &mut PolicyRecord) -> Result<()> {
        let now = Utc::now().trunc_subsecs(6);
        policy.created_at = now;
        policy.updated_at = now;
        let sql = format!(
            "INSERT INTO policies (id, policy_type, parameters, created_at, updated_at)
             VALUES ({}, {}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
        );
        sqlx::query(&sql)
            .bind(policy.id.to_string())
            .bind(&policy.policy_type)
            .bind(policy.parameters.to_string())
            .bind(fmt_ts(policy.created_at))
            .bind(fmt_ts(policy.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_policy(&self, policy_type: &str) -> Result<Option<PolicyRecord>> {
        let sql = format!(
            "SELECT id, policy_type, parameters, created_at, updated_at
             FROM policies WHERE policy_type = {}
             ORDER BY created_at DESC LIMIT 1",
            self.ph(1),
        );
        let row = sqlx::query(&sql)
            .bind(policy_type)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(PolicyRecord {
                id: parse_id(&row.try_get::<String, _>("id")?)?,
                policy_type: row.try_get("policy_type")?,
                parameters: parse_json(&row.try_get::<String, _>("parameters")?)?,
                created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
            })
        })
        .transpose()
    }

    async fn report_failure(
        &self,
        failure_type: &str,
        entity_id: Uuid,
        details: Value,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO failure_reports (type, entity_id, details, reported_at)
             VALUES ({}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
        );
        sqlx::query(&sql)
            .bind(failure_type)
            .bind(entity_id.to_string())
            .bind(details.to_string())
            .bind(fmt_ts(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_failures(&self, entity_id: Uuid) -> Result<Vec<FailureReport>> {
        let sql = format!(
            "SELECT id, type, entity_id, details, reported_at
             FROM failure_reports WHERE entity_id = {} ORDER BY id DESC",
            self.ph(1),
        );
        let rows = sqlx::query(&sql)
            .bind(entity_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(FailureReport {
                    id: row.try_get("id")?,
                    failure_type: row.try_get("type")?,
                    entity_id: parse_id(&row.try_get::<String, _>("entity_id")?)?,
                    details: parse_json(&row.try_get::<String, _>("details")?)?,
                    reported_at: parse_ts(&row.try_get::<String, _>("reported_at")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_store() -> SqlMetadataStore {
        SqlMetadataStore::connect("sqlite::memory:")
            .await
            .expect("sqlite store")
    }

    #[test]
    fn dialect_detection() {
        assert_eq!(
            Dialect::from_dsn("postgres://localhost/shardmgr").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_dsn("sqlite://coordinator.db").unwrap(),
            Dialect::Sqlite
        );
        assert!(Dialect::from_dsn("mysql://nope").is_err());
    }

    #[test]
    fn placeholders_differ_by_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
    }

    #[tokio::test]
    async fn node_round_trip() {
        let store = memory_store().await;
        let id = Uuid::new_v4();
        let mut node = Node::new(id, "localhost:5001", 100, NodeStatus::Active);
        store.register_node(&mut node).await.unwrap();

        let fetched = store.get_node_info(id).await.unwrap().unwrap();
        assert_eq!(fetched.location, "localhost:5001");
        assert_eq!(fetched.capacity, 100);
        assert_eq!(fetched.status, NodeStatus::Active);
        assert!(fetched.last_heartbeat.is_none());

        store
            .update_node_heartbeat(id, NodeStatus::Draining, 42)
            .await
            .unwrap();
        let fetched = store.get_node_info(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, NodeStatus::Draining);
        assert_eq!(fetched.current_load, 42);
        assert!(fetched.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn shard_version_history_and_rollback() {
        let store = memory_store().await;
        let id = Uuid::new_v4();
        let mut shard = Shard::new(id, "a", 100, None, ShardStatus::Pending);
        store.register_shard(&mut shard).await.unwrap();

        shard.shard_type = "b".into();
        shard.size = 200;
        shard.metadata = json!({"tier": "hot"});
        store.update_shard_version(&mut shard).await.unwrap();
        assert_eq!(shard.version, 2);

        let current = store.get_shard_info(id).await.unwrap().unwrap();
        assert_eq!(current.shard_type, "b");
        assert_eq!(current.size, 200);
        assert_eq!(current.version, 2);

        let history = store.list_shard_versions(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].shard_type, "a");

        let archived = store.get_shard_version(id, 1).await.unwrap().unwrap();
        assert_eq!(archived.size, 100);
        assert!(store.get_shard_version(id, 9).await.unwrap().is_none());

        store.rollback_shard_version(id, 1).await.unwrap();
        let current = store.get_shard_info(id).await.unwrap().unwrap();
        assert_eq!(current.version, 3);
        assert_eq!(current.shard_type, "a");
        assert_eq!(current.size, 100);
        assert_eq!(current.metadata, json!({}));

        let versions: Vec<i64> = store
            .list_shard_versions(id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(versions, vec![2, 1]);
    }

    #[tokio::test]
    async fn rollback_missing_version_is_not_found() {
        let store = memory_store().await;
        let id = Uuid::new_v4();
        let mut shard = Shard::new(id, "a", 1, None, ShardStatus::Pending);
        store.register_shard(&mut shard).await.unwrap();
        let err = store.rollback_shard_version(id, 9).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn assign_and_status_bump_version_once_each() {
        let store = memory_store().await;
        let id = Uuid::new_v4();
        let node = Uuid::new_v4();
        let mut shard = Shard::new(id, "kv", 1, None, ShardStatus::Pending);
        store.register_shard(&mut shard).await.unwrap();

        store.assign_shard(id, node).await.unwrap();
        store
            .update_shard_status(id, ShardStatus::Active)
            .await
            .unwrap();

        let fetched = store.get_shard_info(id).await.unwrap().unwrap();
        assert_eq!(fetched.version, 3);
        assert_eq!(fetched.node_id, Some(node));
        assert_eq!(fetched.status, ShardStatus::Active);
    }

    #[tokio::test]
    async fn migration_records_progress() {
        let store = memory_store().await;
        let mut record = MigrationRecord::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.record_migration(&mut record).await.unwrap();
        assert!(record.id > 0);
        store
            .finish_migration(record.id, MigrationStatus::Completed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn policy_and_failure_round_trip() {
        let store = memory_store().await;
        let mut policy = PolicyRecord::new("placement", json!({"strategy": "least_loaded"}));
        store.set_policy(&mut policy).await.unwrap();
        let fetched = store.get_policy("placement").await.unwrap().unwrap();
        assert_eq!(fetched.parameters, json!({"strategy": "least_loaded"}));

        let entity = Uuid::new_v4();
        store
            .report_failure("notify_failed", entity, json!({"rpc": "AddShard"}))
            .await
            .unwrap();
        let failures = store.list_failures(entity).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].failure_type, "notify_failed");
    }
}
