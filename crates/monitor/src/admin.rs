//! Operator actions on a single task.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use sn_core::TaskId;
use sn_storage::{StoreError, TaskStore};

use crate::error::MonitorError;
use crate::gate::TaskGate;

/// Flips gating flags and forces runs. Every action checks the task exists
/// first, so a typo never leaves stray keys behind.
#[derive(Clone)]
pub struct Operator {
    tasks: Arc<dyn TaskStore>,
    gate: Arc<dyn TaskGate>,
}

impl Operator {
    pub fn new(tasks: Arc<dyn TaskStore>, gate: Arc<dyn TaskGate>) -> Self {
        Self { tasks, gate }
    }

    pub async fn enable_task(&self, id: TaskId) -> Result<(), MonitorError> {
        self.ensure_exists(id).await?;
        self.gate.set_enabled(id, true).await?;
        info!(task_id = id, "task enabled");
        Ok(())
    }

    pub async fn disable_task(&self, id: TaskId) -> Result<(), MonitorError> {
        self.ensure_exists(id).await?;
        self.gate.set_enabled(id, false).await?;
        info!(task_id = id, "task disabled");
        Ok(())
    }

    /// Hold the task back for `window`, whatever its schedule says.
    pub async fn set_cooldown(&self, id: TaskId, window: Duration) -> Result<(), MonitorError> {
        self.ensure_exists(id).await?;
        self.gate.set_cooldown(id, window).await?;
        info!(task_id = id, window_secs = window.as_secs(), "task cooling down");
        Ok(())
    }

    /// Clear any cooldown and make the task due on the next poll.
    /// A disabled task stays disabled.
    pub async fn trigger_now(&self, id: TaskId) -> Result<(), MonitorError> {
        self.ensure_exists(id).await?;
        self.gate.clear_cooldown(id).await?;
        self.tasks.force_due(id).await?;
        info!(task_id = id, "task triggered");
        Ok(())
    }

    async fn ensure_exists(&self, id: TaskId) -> Result<(), MonitorError> {
        match self.tasks.get_task(id).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::task_not_found(id).into()),
        }
    }
}
