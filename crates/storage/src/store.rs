use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sn_core::{
    Account, AccountId, Document, MonitoringTask, NewAccount, NewTask, ObjectSnapshot, Relation,
    TaskId,
};

use crate::error::StoreError;

/// Monitoring task table.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Up to `limit` tasks due at `now`: unlocked tasks first, then oldest `last_timestamp`.
    async fn due_tasks(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<MonitoringTask>, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<MonitoringTask>, StoreError>;

    /// Set `last_timestamp`.
    async fn touch_task(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Set or clear the unlocked flag. Only unlockable tasks are affected;
    /// returns how many rows changed.
    async fn set_unlocked(&self, ids: &[TaskId], unlocked: bool) -> Result<u64, StoreError>;

    /// Make a task due on the next poll: unlockable tasks get the unlocked
    /// flag, others have `last_timestamp` reset to the epoch.
    async fn force_due(&self, id: TaskId) -> Result<(), StoreError>;

    async fn create_task(&self, task: NewTask) -> Result<MonitoringTask, StoreError>;

    async fn list_tasks(&self) -> Result<Vec<MonitoringTask>, StoreError>;

    /// Returns false when no such task existed.
    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError>;
}

/// Account table. Every mutation marks the row changed.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Unblocked accounts of `(network, group_id)` whose parking has expired by `now`.
    async fn eligible_accounts(
        &self,
        network: &str,
        group_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError>;

    async fn update_session(&self, id: AccountId, session: &Document) -> Result<(), StoreError>;

    async fn mark_blocked(&self, id: AccountId, reason: &str) -> Result<(), StoreError>;

    async fn set_unavailable_until(&self, id: AccountId, until: DateTime<Utc>) -> Result<(), StoreError>;

    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn delete_account(&self, id: AccountId) -> Result<bool, StoreError>;
}

/// Upsert sink for collected relations and objects.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write_relation(&self, relation: &Relation) -> Result<(), StoreError>;

    async fn write_object(&self, object: &ObjectSnapshot) -> Result<(), StoreError>;
}
