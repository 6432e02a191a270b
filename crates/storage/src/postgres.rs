//! PostgreSQL-backed stores.
//!
//! Schema-less columns (filters, filter limits, sessions) are read with the
//! lenient document policy: a malformed value loads as an empty document
//! instead of failing the whole row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use sn_core::config::PostgresConfig;
use sn_core::{
    Account, AccountId, Document, MonitoringTask, NewAccount, NewTask, ObjectSnapshot, Relation,
    TaskId,
};

use crate::error::StoreError;
use crate::store::{AccountStore, SnapshotStore, TaskStore};

/// Connect a pool and apply migrations. Any failure here is fatal for the caller.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string()?)
        .await?;
    info!(host = %config.host, db = %config.database, "PostgreSQL connected");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ── Rows ─────────────────────────────────────────────────────────────

const TASK_COLUMNS: &str = "id, network, owner_type, owner_id, period_minutes, last_timestamp, \
     filters, filter_limits, account_group_id, is_unlockable, unlock_ids, is_unlocked";

const ACCOUNT_COLUMNS: &str =
    "id, network, login, password, session, proxy, is_blocked, info, unavailable_until, group_id";

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: i64,
    network: String,
    owner_type: String,
    owner_id: i64,
    period_minutes: i32,
    last_timestamp: DateTime<Utc>,
    filters: serde_json::Value,
    filter_limits: serde_json::Value,
    account_group_id: i32,
    is_unlockable: bool,
    unlock_ids: Vec<i64>,
    is_unlocked: bool,
}

impl From<TaskRow> for MonitoringTask {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            network: row.network,
            owner_type: row.owner_type,
            owner_id: row.owner_id,
            period_minutes: row.period_minutes,
            last_timestamp: row.last_timestamp,
            filters: Document::decode_or_default(row.filters, "filters"),
            filter_limits: Document::decode_or_default(row.filter_limits, "filter_limits"),
            account_group_id: row.account_group_id,
            is_unlockable: row.is_unlockable,
            unlock_ids: row.unlock_ids,
            is_unlocked: row.is_unlocked,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    network: String,
    login: String,
    password: Option<String>,
    session: serde_json::Value,
    proxy: Option<String>,
    is_blocked: bool,
    info: String,
    unavailable_until: Option<DateTime<Utc>>,
    group_id: i32,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            network: row.network,
            login: row.login,
            password: row.password,
            session: Document::decode_or_default(row.session, "session"),
            proxy: row.proxy.filter(|p| !p.is_empty()),
            is_blocked: row.is_blocked,
            info: row.info,
            unavailable_until: row.unavailable_until,
            group_id: row.group_id,
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Task, account and snapshot stores over one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn due_tasks(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<MonitoringTask>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM monitoring_tasks
             WHERE is_unlocked
                OR last_timestamp + make_interval(mins => period_minutes) <= $1
             ORDER BY is_unlocked DESC, last_timestamp ASC
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<MonitoringTask>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM monitoring_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn touch_task(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE monitoring_tasks SET last_timestamp = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::task_not_found(id));
        }
        Ok(())
    }

    async fn set_unlocked(&self, ids: &[TaskId], unlocked: bool) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE monitoring_tasks SET is_unlocked = $2
             WHERE id = ANY($1) AND is_unlockable",
        )
        .bind(ids)
        .bind(unlocked)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn force_due(&self, id: TaskId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE monitoring_tasks
             SET is_unlocked = is_unlockable,
                 last_timestamp = CASE WHEN is_unlockable THEN last_timestamp ELSE to_timestamp(0) END
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::task_not_found(id));
        }
        Ok(())
    }

    async fn create_task(&self, task: NewTask) -> Result<MonitoringTask, StoreError> {
        task.validate()?;
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO monitoring_tasks
                (network, owner_type, owner_id, period_minutes, filters, filter_limits,
                 account_group_id, is_unlockable, unlock_ids)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&task.network)
        .bind(task.owner_type.as_str())
        .bind(task.owner_id)
        .bind(task.period_minutes)
        .bind(task.filters.to_value())
        .bind(task.filter_limits.to_value())
        .bind(task.account_group_id)
        .bind(task.is_unlockable)
        .bind(&task.unlock_ids)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list_tasks(&self) -> Result<Vec<MonitoringTask>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM monitoring_tasks ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM monitoring_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn eligible_accounts(
        &self,
        network: &str,
        group_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE network = $1 AND group_id = $2 AND NOT is_blocked
               AND (unavailable_until IS NULL OR unavailable_until <= $3)"
        ))
        .bind(network)
        .bind(group_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_session(&self, id: AccountId, session: &Document) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET session = $2, is_changed = TRUE WHERE id = $1")
            .bind(id)
            .bind(session.to_value())
            .execute(&self.pool)
            .await?;
        expect_account_row(result.rows_affected(), id)
    }

    async fn mark_blocked(&self, id: AccountId, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET is_blocked = TRUE, info = $2, is_changed = TRUE WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        expect_account_row(result.rows_affected(), id)
    }

    async fn set_unavailable_until(&self, id: AccountId, until: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET unavailable_until = $2, is_changed = TRUE WHERE id = $1",
        )
        .bind(id)
        .bind(until)
        .execute(&self.pool)
        .await?;
        expect_account_row(result.rows_affected(), id)
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "INSERT INTO accounts (network, login, password, session, proxy, group_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&account.network)
        .bind(&account.login)
        .bind(&account.password)
        .bind(account.session.to_value())
        .bind(&account.proxy)
        .bind(account.group_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn expect_account_row(rows: u64, id: AccountId) -> Result<(), StoreError> {
    if rows == 0 {
        Err(StoreError::account_not_found(id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn write_relation(&self, relation: &Relation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO relations (timestamp, network, owner_type, owner_id, relation_type, details, ids)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (network, owner_type, owner_id, relation_type, details)
             DO UPDATE SET timestamp = EXCLUDED.timestamp, ids = EXCLUDED.ids",
        )
        .bind(relation.timestamp)
        .bind(&relation.network)
        .bind(relation.owner.kind.as_str())
        .bind(relation.owner.id)
        .bind(relation.relation_type.as_str())
        .bind(relation.details.to_value())
        .bind(&relation.ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_object(&self, object: &ObjectSnapshot) -> Result<(), StoreError> {
        // Table name comes from a closed enum, never from input.
        let sql = upsert_object_sql(object.object_type.table_name());
        sqlx::query(&sql)
            .bind(object.timestamp)
            .bind(&object.network)
            .bind(object.owner.kind.as_str())
            .bind(object.owner.id)
            .bind(object.details.to_value())
            .bind(&object.data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn upsert_object_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (timestamp, network, owner_type, owner_id, details, data, is_changed)
         VALUES ($1, $2, $3, $4, $5, $6, TRUE)
         ON CONFLICT (network, owner_type, owner_id, details)
         DO UPDATE SET timestamp = EXCLUDED.timestamp, data = EXCLUDED.data, is_changed = TRUE"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_row(filters: serde_json::Value) -> TaskRow {
        TaskRow {
            id: 3,
            network: "vk".into(),
            owner_type: "user".into(),
            owner_id: 1,
            period_minutes: 60,
            last_timestamp: Utc::now(),
            filters,
            filter_limits: serde_json::Value::Null,
            account_group_id: 2,
            is_unlockable: false,
            unlock_ids: vec![4, 5],
            is_unlocked: false,
        }
    }

    #[test]
    fn malformed_filters_load_as_empty() {
        let task: MonitoringTask = task_row(json!(["friends"])).into();
        assert!(task.filters.is_empty());
        assert!(task.filter_limits.is_empty());
        assert_eq!(task.unlock_ids, vec![4, 5]);
    }

    #[test]
    fn well_formed_filters_survive_conversion() {
        let task: MonitoringTask = task_row(json!({"friends": false})).into();
        assert_eq!(task.filters.get_bool("friends"), Some(false));
    }

    #[test]
    fn blank_proxy_reads_as_none() {
        let row = AccountRow {
            id: 1,
            network: "vk".into(),
            login: "a".into(),
            password: None,
            session: json!("not-an-object"),
            proxy: Some(String::new()),
            is_blocked: false,
            info: String::new(),
            unavailable_until: None,
            group_id: 0,
        };
        let account: Account = row.into();
        assert!(account.proxy.is_none());
        assert!(account.session.is_empty());
    }

    #[test]
    fn object_upsert_targets_type_table() {
        let sql = upsert_object_sql("objects_post");
        assert!(sql.starts_with("INSERT INTO objects_post "));
        assert!(sql.contains("is_changed = TRUE"));
    }
}
