use std::time::Duration;

use thiserror::Error;

use sn_core::{AccountId, CoreError};
use sn_ingest::CollectError;
use sn_storage::StoreError;
use sn_vk::ApiError;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("no available account for network {network}, group {group_id}")]
    NotFound { network: String, group_id: i32 },

    #[error("duration out of range: {0:?}")]
    InvalidDuration(Duration),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Why one task attempt failed.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("no access token for account {0}")]
    NoCredential(AccountId),

    #[error("api client error: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("gate error: {0}")]
    Gate(#[from] GateError),

    #[error("task attempt aborted: {0}")]
    Aborted(String),
}

impl From<CoreError> for MonitorError {
    fn from(e: CoreError) -> Self {
        Self::Collect(e.into())
    }
}
