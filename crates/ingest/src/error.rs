use thiserror::Error;

use sn_core::{CoreError, Owner};
use sn_storage::StoreError;
use sn_vk::ApiError;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("unsupported entity type: {0}")]
    UnsupportedEntity(String),

    /// The owner itself could not be fetched; nothing else is collected.
    #[error("profile fetch failed for {owner}: {source}")]
    Profile {
        owner: Owner,
        #[source]
        source: ApiError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<CoreError> for CollectError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnsupportedOwnerType(kind) => Self::UnsupportedEntity(kind),
            other => Self::Store(StoreError::Invalid(other)),
        }
    }
}

impl CollectError {
    /// The API error behind a failed profile fetch, if that is what happened.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Profile { source, .. } => Some(source),
            _ => None,
        }
    }
}
