//! Exclusive per-task claim locks.
//!
//! A claim must be exclusive across every process polling the same task
//! table, and must become reclaimable if its holder disappears:
//!
//! - [`PgTaskLock`]: session advisory lock pinned to a pooled connection.
//!   If the process dies the connection closes and the server drops the lock.
//!   Each held claim keeps one pool connection checked out until release.
//! - [`RedisLeaseLock`]: `SET NX PX` lease with a random token, extended every
//!   third of its TTL while held. If the holder dies renewal stops and the
//!   lease expires after its TTL.
//! - [`MemoryTaskLock`]: process-local, for tests and single-node runs.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use sn_core::TaskId;

use crate::error::StoreError;

#[async_trait]
pub trait TaskLock: Send + Sync {
    /// Try to take the claim on `id` without waiting. `false` means someone else holds it.
    async fn try_acquire(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Give up a claim taken by this instance. Releasing an unheld id is a no-op.
    async fn release(&self, id: TaskId) -> Result<(), StoreError>;
}

// ── PostgreSQL advisory lock ─────────────────────────────────────────

pub struct PgTaskLock {
    pool: PgPool,
    /// Connections currently holding an advisory lock, by task id.
    held: Mutex<HashMap<TaskId, PoolConnection<Postgres>>>,
}

impl PgTaskLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    async fn is_held(&self, id: TaskId) -> bool {
        self.held.lock().await.contains_key(&id)
    }
}

#[async_trait]
impl TaskLock for PgTaskLock {
    async fn try_acquire(&self, id: TaskId) -> Result<bool, StoreError> {
        if self.held.lock().await.contains_key(&id) {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        if !locked {
            return Ok(false);
        }

        // Another session of ours cannot hold it too, so the slot is free.
        self.held.lock().await.insert(id, conn);
        Ok(true)
    }

    async fn release(&self, id: TaskId) -> Result<(), StoreError> {
        let conn = self.held.lock().await.remove(&id);
        match conn {
            Some(conn) => unlock_or_discard(conn, id).await,
            None => debug!(task_id = id, "release of unheld advisory lock ignored"),
        }
        Ok(())
    }
}

/// Unlock on the holding connection. If that fails the connection is closed
/// instead of returned to the pool, which drops the lock server-side.
async fn unlock_or_discard(mut conn: PoolConnection<Postgres>, id: TaskId) {
    let unlocked: Result<(bool,), sqlx::Error> = sqlx::query_as("SELECT pg_advisory_unlock($1)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await;
    match unlocked {
        Ok((true,)) => {}
        Ok((false,)) => warn!(task_id = id, "advisory lock was not held by its connection"),
        Err(e) => {
            warn!(task_id = id, error = %e, "advisory unlock failed, closing connection");
            drop(conn.detach());
        }
    }
}

// ── Redis lease ──────────────────────────────────────────────────────

/// Delete the key only if it still carries our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Push the expiry out only if the key still carries our token.
const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

struct Lease {
    token: String,
    renewal: JoinHandle<()>,
}

pub struct RedisLeaseLock {
    conn: ConnectionManager,
    ttl: Duration,
    leases: Mutex<HashMap<TaskId, Lease>>,
}

impl RedisLeaseLock {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn,
            ttl,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(id: TaskId) -> String {
        format!("monitoring:task:{id}:lock")
    }

    #[cfg(test)]
    async fn is_held(&self, id: TaskId) -> bool {
        self.leases.lock().await.contains_key(&id)
    }

    /// Keep extending the lease until aborted or the key stops carrying `token`.
    fn spawn_renewal(&self, id: TaskId, token: String) -> JoinHandle<()> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl_millis(self.ttl);
        let period = renewal_period(self.ttl);
        tokio::spawn(async move {
            let script = redis::Script::new(RENEW_SCRIPT);
            loop {
                tokio::time::sleep(period).await;
                let renewed: Result<i64, redis::RedisError> = script
                    .key(Self::key(id))
                    .arg(&token)
                    .arg(ttl_ms)
                    .invoke_async(&mut conn)
                    .await;
                match renewed {
                    Ok(0) => {
                        warn!(task_id = id, "lease lost, renewal stopped");
                        break;
                    }
                    Ok(_) => trace!(task_id = id, "lease renewed"),
                    Err(e) => warn!(task_id = id, error = %e, "lease renewal failed"),
                }
            }
        })
    }
}

impl Drop for RedisLeaseLock {
    fn drop(&mut self) {
        for lease in self.leases.get_mut().values() {
            lease.renewal.abort();
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// How often a held lease is extended: three times per TTL.
fn renewal_period(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(1))
}

#[async_trait]
impl TaskLock for RedisLeaseLock {
    async fn try_acquire(&self, id: TaskId) -> Result<bool, StoreError> {
        let token = uuid::Uuid::new_v4().to_string();
        let ttl_ms = ttl_millis(self.ttl);

        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            return Ok(false);
        }
        let renewal = self.spawn_renewal(id, token.clone());
        self.leases.lock().await.insert(id, Lease { token, renewal });
        Ok(true)
    }

    async fn release(&self, id: TaskId) -> Result<(), StoreError> {
        let Some(Lease { token, renewal }) = self.leases.lock().await.remove(&id) else {
            debug!(task_id = id, "release of unheld lease ignored");
            return Ok(());
        };
        renewal.abort();

        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(id))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            warn!(task_id = id, "lease expired before release");
        }
        Ok(())
    }
}

// ── In-memory ────────────────────────────────────────────────────────

/// Process-local lock set. Share one instance (behind `Arc`) between
/// schedulers to simulate several service instances.
#[derive(Default)]
pub struct MemoryTaskLock {
    held: Mutex<HashSet<TaskId>>,
}

impl MemoryTaskLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, id: TaskId) -> bool {
        self.held.lock().await.contains(&id)
    }
}

#[async_trait]
impl TaskLock for MemoryTaskLock {
    async fn try_acquire(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.held.lock().await.insert(id))
    }

    async fn release(&self, id: TaskId) -> Result<(), StoreError> {
        self.held.lock().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn memory_lock_is_exclusive_until_released() {
        let lock = MemoryTaskLock::new();
        assert!(lock.try_acquire(1).await.unwrap());
        assert!(!lock.try_acquire(1).await.unwrap());
        assert!(lock.try_acquire(2).await.unwrap());

        lock.release(1).await.unwrap();
        assert!(!lock.is_held(1).await);
        assert!(lock.try_acquire(1).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_claimants_see_exactly_one_winner() {
        let lock = Arc::new(MemoryTaskLock::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move { lock.try_acquire(7).await.unwrap() }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn releasing_unheld_id_is_noop() {
        let lock = MemoryTaskLock::new();
        lock.release(99).await.unwrap();
        assert!(!lock.is_held(99).await);
    }

    #[test]
    fn lease_keys_share_task_namespace() {
        assert_eq!(RedisLeaseLock::key(12), "monitoring:task:12:lock");
    }

    #[test]
    fn lease_is_renewed_three_times_per_ttl() {
        assert_eq!(renewal_period(Duration::from_secs(900)), Duration::from_secs(300));
        assert_eq!(renewal_period(Duration::ZERO), Duration::from_millis(1));
    }

    fn unreachable_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://sn:sn@127.0.0.1:1/sn")
            .unwrap()
    }

    #[tokio::test]
    async fn pg_release_of_unheld_id_is_noop() {
        let lock = PgTaskLock::new(unreachable_pool());
        lock.release(5).await.unwrap();
        assert!(!lock.is_held(5).await);
    }

    #[tokio::test]
    async fn pg_acquire_error_leaves_nothing_held() {
        let lock = PgTaskLock::new(unreachable_pool());
        assert!(lock.try_acquire(5).await.is_err());
        assert!(!lock.is_held(5).await);
    }

    // Needs a running PostgreSQL at DATABASE_URL.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn pg_advisory_lock_has_one_winner_across_sessions() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await
            .unwrap();
        let id: TaskId = 9_000_001;

        let first = PgTaskLock::new(pool.clone());
        let second = PgTaskLock::new(pool.clone());
        assert!(first.try_acquire(id).await.unwrap());
        assert!(!first.try_acquire(id).await.unwrap());
        assert!(!second.try_acquire(id).await.unwrap());
        assert!(!second.is_held(id).await);

        first.release(id).await.unwrap();
        assert!(second.try_acquire(id).await.unwrap());
        second.release(id).await.unwrap();

        let lockers: Vec<_> = (0..8).map(|_| Arc::new(PgTaskLock::new(pool.clone()))).collect();
        let mut handles = Vec::new();
        for lock in &lockers {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move { lock.try_acquire(id).await.unwrap() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        for lock in &lockers {
            lock.release(id).await.unwrap();
        }
    }

    // Needs a running Redis at REDIS_URL.
    #[tokio::test]
    #[ignore]
    async fn redis_lease_outlives_its_ttl_while_held() {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL not set");
        let client = redis::Client::open(url).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        let id: TaskId = 9_000_002;

        let holder = RedisLeaseLock::new(conn.clone(), Duration::from_millis(300));
        let rival = RedisLeaseLock::new(conn.clone(), Duration::from_millis(300));
        assert!(holder.try_acquire(id).await.unwrap());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!rival.try_acquire(id).await.unwrap());

        holder.release(id).await.unwrap();
        assert!(!holder.is_held(id).await);
        assert!(rival.try_acquire(id).await.unwrap());
        rival.release(id).await.unwrap();
    }
}
