use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::entity::{Owner, OwnerType, TaskId};
use crate::error::CoreError;

/// A recurring collection job for one owner on one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringTask {
    pub id: TaskId,
    pub network: String,
    /// Kept as stored text; an unknown value fails the attempt, not the load.
    pub owner_type: String,
    pub owner_id: i64,
    pub period_minutes: i32,
    pub last_timestamp: DateTime<Utc>,
    pub filters: Document,
    pub filter_limits: Document,
    pub account_group_id: i32,
    pub is_unlockable: bool,
    pub unlock_ids: Vec<TaskId>,
    pub is_unlocked: bool,
}

impl MonitoringTask {
    pub fn owner(&self) -> Result<Owner, CoreError> {
        let kind: OwnerType = self.owner_type.parse()?;
        Ok(Owner { kind, id: self.owner_id })
    }

    /// When the period alone makes the task due again.
    pub fn next_due_at(&self) -> DateTime<Utc> {
        self.last_timestamp + Duration::minutes(i64::from(self.period_minutes))
    }

    /// Due once the period has elapsed, or at any time while unlocked.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_unlocked || now >= self.next_due_at()
    }
}

/// Fields accepted when creating a task through the management boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub network: String,
    pub owner_type: OwnerType,
    pub owner_id: i64,
    pub period_minutes: i32,
    #[serde(default)]
    pub filters: Document,
    #[serde(default)]
    pub filter_limits: Document,
    #[serde(default)]
    pub account_group_id: i32,
    #[serde(default)]
    pub is_unlockable: bool,
    #[serde(default)]
    pub unlock_ids: Vec<TaskId>,
}

impl NewTask {
    pub fn new(network: impl Into<String>, owner: Owner, period_minutes: i32) -> Self {
        Self {
            network: network.into(),
            owner_type: owner.kind,
            owner_id: owner.id,
            period_minutes,
            filters: Document::new(),
            filter_limits: Document::new(),
            account_group_id: 0,
            is_unlockable: false,
            unlock_ids: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.period_minutes <= 0 {
            return Err(CoreError::Validation(format!(
                "period_minutes must be positive, got {}",
                self.period_minutes
            )));
        }
        if self.network.trim().is_empty() {
            return Err(CoreError::Validation("network must not be empty".into()));
        }
        Ok(())
    }
}
