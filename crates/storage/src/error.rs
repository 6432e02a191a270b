use sn_core::{AccountId, CoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid record: {0}")]
    Invalid(#[from] CoreError),
}

impl StoreError {
    pub fn task_not_found(id: i64) -> Self {
        Self::NotFound { entity: "task", id }
    }

    pub fn account_not_found(id: AccountId) -> Self {
        Self::NotFound { entity: "account", id }
    }
}
