//! In-memory stores with the same upsert and eligibility semantics as the
//! PostgreSQL implementation. Used by tests and local dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sn_core::{
    Account, AccountId, Document, MonitoringTask, NewAccount, NewTask, ObjectSnapshot, ObjectType,
    Owner, Relation, RelationType, TaskId,
};

use crate::error::StoreError;
use crate::store::{AccountStore, SnapshotStore, TaskStore};

type RelationKey = (String, Owner, RelationType, String);
type ObjectKey = (ObjectType, String, Owner, String);

/// Stored object plus its downstream "changed" marker.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub snapshot: ObjectSnapshot,
    pub is_changed: bool,
}

#[derive(Debug, Clone)]
struct StoredAccount {
    account: Account,
    is_changed: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    tasks: RwLock<BTreeMap<TaskId, MonitoringTask>>,
    accounts: RwLock<BTreeMap<AccountId, StoredAccount>>,
    relations: RwLock<HashMap<RelationKey, Relation>>,
    objects: RwLock<HashMap<ObjectKey, StoredObject>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert or overwrite a task verbatim.
    pub fn put_task(&self, task: MonitoringTask) {
        let id = task.id;
        write(&self.tasks).insert(id, task);
        self.next_id.fetch_max(id, Ordering::Relaxed);
    }

    pub fn task(&self, id: TaskId) -> Option<MonitoringTask> {
        read(&self.tasks).get(&id).cloned()
    }

    /// Insert or overwrite an account verbatim.
    pub fn put_account(&self, account: Account) {
        let id = account.id;
        write(&self.accounts).insert(id, StoredAccount { account, is_changed: false });
        self.next_id.fetch_max(id, Ordering::Relaxed);
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        read(&self.accounts).get(&id).map(|s| s.account.clone())
    }

    pub fn account_changed(&self, id: AccountId) -> bool {
        read(&self.accounts).get(&id).is_some_and(|s| s.is_changed)
    }

    pub fn relation(
        &self,
        network: &str,
        owner: Owner,
        relation_type: RelationType,
        details: &Document,
    ) -> Option<Relation> {
        let key = (network.to_string(), owner, relation_type, details.canonical());
        read(&self.relations).get(&key).cloned()
    }

    pub fn relations(&self) -> Vec<Relation> {
        read(&self.relations).values().cloned().collect()
    }

    pub fn relation_count(&self) -> usize {
        read(&self.relations).len()
    }

    pub fn object(
        &self,
        object_type: ObjectType,
        network: &str,
        owner: Owner,
        details: &Document,
    ) -> Option<StoredObject> {
        let key = (object_type, network.to_string(), owner, details.canonical());
        read(&self.objects).get(&key).cloned()
    }

    pub fn object_count(&self, object_type: ObjectType) -> usize {
        read(&self.objects).keys().filter(|k| k.0 == object_type).count()
    }

    /// Clear the changed marker as a downstream consumer would.
    pub fn acknowledge_object(&self, object_type: ObjectType, network: &str, owner: Owner, details: &Document) {
        let key = (object_type, network.to_string(), owner, details.canonical());
        if let Some(stored) = write(&self.objects).get_mut(&key) {
            stored.is_changed = false;
        }
    }

    fn update_account(&self, id: AccountId, f: impl FnOnce(&mut Account)) -> Result<(), StoreError> {
        let mut accounts = write(&self.accounts);
        let stored = accounts.get_mut(&id).ok_or_else(|| StoreError::account_not_found(id))?;
        f(&mut stored.account);
        stored.is_changed = true;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn due_tasks(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<MonitoringTask>, StoreError> {
        let mut due: Vec<MonitoringTask> = read(&self.tasks)
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| (!t.is_unlocked, t.last_timestamp));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<MonitoringTask>, StoreError> {
        Ok(self.task(id))
    }

    async fn touch_task(&self, id: TaskId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tasks = write(&self.tasks);
        let task = tasks.get_mut(&id).ok_or_else(|| StoreError::task_not_found(id))?;
        task.last_timestamp = at;
        Ok(())
    }

    async fn set_unlocked(&self, ids: &[TaskId], unlocked: bool) -> Result<u64, StoreError> {
        let mut tasks = write(&self.tasks);
        let mut changed = 0;
        for id in ids {
            if let Some(task) = tasks.get_mut(id).filter(|t| t.is_unlockable) {
                task.is_unlocked = unlocked;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn force_due(&self, id: TaskId) -> Result<(), StoreError> {
        let mut tasks = write(&self.tasks);
        let task = tasks.get_mut(&id).ok_or_else(|| StoreError::task_not_found(id))?;
        if task.is_unlockable {
            task.is_unlocked = true;
        } else {
            task.last_timestamp = DateTime::<Utc>::UNIX_EPOCH;
        }
        Ok(())
    }

    async fn create_task(&self, task: NewTask) -> Result<MonitoringTask, StoreError> {
        task.validate()?;
        let created = MonitoringTask {
            id: self.allocate_id(),
            network: task.network,
            owner_type: task.owner_type.as_str().to_string(),
            owner_id: task.owner_id,
            period_minutes: task.period_minutes,
            last_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            filters: task.filters,
            filter_limits: task.filter_limits,
            account_group_id: task.account_group_id,
            is_unlockable: task.is_unlockable,
            unlock_ids: task.unlock_ids,
            is_unlocked: false,
        };
        write(&self.tasks).insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_tasks(&self) -> Result<Vec<MonitoringTask>, StoreError> {
        Ok(read(&self.tasks).values().cloned().collect())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(write(&self.tasks).remove(&id).is_some())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn eligible_accounts(
        &self,
        network: &str,
        group_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        Ok(read(&self.accounts)
            .values()
            .map(|s| &s.account)
            .filter(|a| a.network == network && a.group_id == group_id && a.is_eligible(now))
            .cloned()
            .collect())
    }

    async fn update_session(&self, id: AccountId, session: &Document) -> Result<(), StoreError> {
        self.update_account(id, |a| a.session = session.clone())
    }

    async fn mark_blocked(&self, id: AccountId, reason: &str) -> Result<(), StoreError> {
        self.update_account(id, |a| {
            a.is_blocked = true;
            a.info = reason.to_string();
        })
    }

    async fn set_unavailable_until(&self, id: AccountId, until: DateTime<Utc>) -> Result<(), StoreError> {
        self.update_account(id, |a| a.unavailable_until = Some(until))
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let created = Account {
            id: self.allocate_id(),
            network: account.network,
            login: account.login,
            password: account.password,
            session: account.session,
            proxy: account.proxy,
            is_blocked: false,
            info: String::new(),
            unavailable_until: None,
            group_id: account.group_id,
        };
        write(&self.accounts).insert(
            created.id,
            StoredAccount { account: created.clone(), is_changed: true },
        );
        Ok(created)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(read(&self.accounts).values().map(|s| s.account.clone()).collect())
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
        Ok(write(&self.accounts).remove(&id).is_some())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn write_relation(&self, relation: &Relation) -> Result<(), StoreError> {
        let key = (
            relation.network.clone(),
            relation.owner,
            relation.relation_type,
            relation.details.canonical(),
        );
        write(&self.relations).insert(key, relation.clone());
        Ok(())
    }

    async fn write_object(&self, object: &ObjectSnapshot) -> Result<(), StoreError> {
        let key = (
            object.object_type,
            object.network.clone(),
            object.owner,
            object.details.canonical(),
        );
        write(&self.objects).insert(
            key,
            StoredObject { snapshot: object.clone(), is_changed: true },
        );
        Ok(())
    }
}
