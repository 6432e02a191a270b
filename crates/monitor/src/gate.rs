//! Gating control: per-task enable flag and cooldown window kept in Redis.
//!
//! Keys:
//! - `monitoring:task:<id>:enabled` = `"true"` / `"false"`; absent means enabled
//! - `monitoring:task:<id>:cooldown` = presence-only, expires with the window

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;

use sn_core::TaskId;

use crate::error::GateError;

pub fn enabled_key(id: TaskId) -> String {
    format!("monitoring:task:{id}:enabled")
}

pub fn cooldown_key(id: TaskId) -> String {
    format!("monitoring:task:{id}:cooldown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    Disabled,
    CoolingDown,
}

#[async_trait]
pub trait TaskGate: Send + Sync {
    async fn is_enabled(&self, id: TaskId) -> Result<bool, GateError>;

    async fn in_cooldown(&self, id: TaskId) -> Result<bool, GateError>;

    async fn set_enabled(&self, id: TaskId, enabled: bool) -> Result<(), GateError>;

    async fn set_cooldown(&self, id: TaskId, window: Duration) -> Result<(), GateError>;

    async fn clear_cooldown(&self, id: TaskId) -> Result<(), GateError>;

    /// Disabled takes precedence over cooldown.
    async fn check(&self, id: TaskId) -> Result<GateDecision, GateError> {
        if !self.is_enabled(id).await? {
            return Ok(GateDecision::Disabled);
        }
        if self.in_cooldown(id).await? {
            return Ok(GateDecision::CoolingDown);
        }
        Ok(GateDecision::Open)
    }
}

// ── Redis ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisGate {
    conn: ConnectionManager,
}

impl RedisGate {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TaskGate for RedisGate {
    async fn is_enabled(&self, id: TaskId) -> Result<bool, GateError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(enabled_key(id)).await?;
        Ok(value.map_or(true, |v| v == "true"))
    }

    async fn in_cooldown(&self, id: TaskId) -> Result<bool, GateError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(cooldown_key(id)).await?;
        Ok(exists)
    }

    async fn set_enabled(&self, id: TaskId, enabled: bool) -> Result<(), GateError> {
        let mut conn = self.conn.clone();
        let value = if enabled { "true" } else { "false" };
        let _: () = conn.set(enabled_key(id), value).await?;
        Ok(())
    }

    async fn set_cooldown(&self, id: TaskId, window: Duration) -> Result<(), GateError> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::cmd("SET")
            .arg(cooldown_key(id))
            .arg("1")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear_cooldown(&self, id: TaskId) -> Result<(), GateError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(cooldown_key(id)).await?;
        Ok(())
    }
}

// ── In-memory ────────────────────────────────────────────────────────

/// Process-local gate with the same semantics; cooldowns follow tokio time.
#[derive(Default)]
pub struct MemoryGate {
    disabled: Mutex<HashSet<TaskId>>,
    cooldowns: Mutex<HashMap<TaskId, Instant>>,
}

impl MemoryGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskGate for MemoryGate {
    async fn is_enabled(&self, id: TaskId) -> Result<bool, GateError> {
        Ok(!self.disabled.lock().await.contains(&id))
    }

    async fn in_cooldown(&self, id: TaskId) -> Result<bool, GateError> {
        let mut cooldowns = self.cooldowns.lock().await;
        match cooldowns.get(&id) {
            Some(until) if *until > Instant::now() => Ok(true),
            Some(_) => {
                cooldowns.remove(&id);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_enabled(&self, id: TaskId, enabled: bool) -> Result<(), GateError> {
        let mut disabled = self.disabled.lock().await;
        if enabled {
            disabled.remove(&id);
        } else {
            disabled.insert(id);
        }
        Ok(())
    }

    async fn set_cooldown(&self, id: TaskId, window: Duration) -> Result<(), GateError> {
        self.cooldowns.lock().await.insert(id, Instant::now() + window);
        Ok(())
    }

    async fn clear_cooldown(&self, id: TaskId) -> Result<(), GateError> {
        self.cooldowns.lock().await.remove(&id);
        Ok(())
    }
}
