//! API clients bound to a pooled account.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use sn_core::config::VkConfig;
use sn_core::{Account, AccountId, Document, ACCESS_TOKEN_KEY};
use sn_vk::{ApiError, ApiErrorKind, LikeTarget, SocialApi, VkClient};

use crate::pool::AccountPool;

/// Session key recording why the stored token was dropped.
pub const AUTH_ERROR_KEY: &str = "auth_error";

/// Builds a source-API client for one account.
pub trait ApiFactory: Send + Sync {
    fn connect(&self, account: &Account, access_token: &str) -> Result<Box<dyn SocialApi>, ApiError>;
}

pub struct VkApiFactory {
    config: VkConfig,
}

impl VkApiFactory {
    pub fn new(config: VkConfig) -> Self {
        Self { config }
    }
}

impl ApiFactory for VkApiFactory {
    fn connect(&self, account: &Account, access_token: &str) -> Result<Box<dyn SocialApi>, ApiError> {
        let client = VkClient::new(access_token, account.proxy.as_deref(), &self.config)?;
        Ok(Box::new(client))
    }
}

/// Wraps a client so API errors update the account they were issued with:
/// auth failures drop the token, bans block the account, throttling parks it.
///
/// The first such error per attempt is acted on and returned unchanged. From
/// then on the account is out of use: every later call fails with that same
/// error without reaching the API.
pub struct AccountBoundApi {
    inner: Box<dyn SocialApi>,
    pool: AccountPool,
    account_id: AccountId,
    session: Document,
    throttle: Duration,
    /// `(code, message)` of the error that took the account out of use.
    tripped: OnceLock<(i64, String)>,
}

impl AccountBoundApi {
    pub fn new(inner: Box<dyn SocialApi>, pool: AccountPool, account: &Account, throttle: Duration) -> Self {
        Self {
            inner,
            pool,
            account_id: account.id,
            session: account.session.clone(),
            throttle,
            tripped: OnceLock::new(),
        }
    }

    /// Fail fast once the account has been taken out of use.
    fn guard(&self) -> Result<(), ApiError> {
        match self.tripped.get() {
            Some((code, message)) => Err(ApiError::Api {
                code: *code,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn observe<T: Send>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            self.react(e).await;
        }
        result
    }

    async fn react(&self, err: &ApiError) {
        let kind = err.kind();
        let ApiError::Api { code, message } = err else {
            return;
        };
        if kind == ApiErrorKind::Other || self.tripped.set((*code, message.clone())).is_err() {
            return;
        }
        warn!(account_id = self.account_id, reaction = ?kind, error = %err, "api error affects account");

        let recorded = match kind {
            ApiErrorKind::AuthFailed => {
                let mut session = self.session.clone();
                session.remove(ACCESS_TOKEN_KEY);
                session.insert(AUTH_ERROR_KEY, err.to_string());
                self.pool.record_session_update(self.account_id, &session).await
            }
            ApiErrorKind::AccountBanned => self.pool.record_blocked(self.account_id, &err.to_string()).await,
            ApiErrorKind::Throttled => self.pool.record_unavailable(self.account_id, self.throttle).await,
            ApiErrorKind::Other => return,
        };
        if let Err(e) = recorded {
            error!(account_id = self.account_id, error = %e, "failed to record account state");
        }
    }
}

#[async_trait]
impl SocialApi for AccountBoundApi {
    async fn user_profile(&self, user_id: i64) -> Result<Value, ApiError> {
        self.guard()?;
        self.observe(self.inner.user_profile(user_id).await).await
    }

    async fn group_profile(&self, group_id: i64) -> Result<Value, ApiError> {
        self.guard()?;
        self.observe(self.inner.group_profile(group_id).await).await
    }

    async fn friends(&self, user_id: i64) -> Result<Vec<i64>, ApiError> {
        self.guard()?;
        self.observe(self.inner.friends(user_id).await).await
    }

    async fn user_groups(&self, user_id: i64) -> Result<Vec<i64>, ApiError> {
        self.guard()?;
        self.observe(self.inner.user_groups(user_id).await).await
    }

    async fn followers(&self, user_id: i64, count: u32) -> Result<Vec<i64>, ApiError> {
        self.guard()?;
        self.observe(self.inner.followers(user_id, count).await).await
    }

    async fn wall_posts(&self, owner_id: i64, count: u32) -> Result<Vec<Value>, ApiError> {
        self.guard()?;
        self.observe(self.inner.wall_posts(owner_id, count).await).await
    }

    async fn photos(&self, owner_id: i64, album: &str, count: u32) -> Result<Vec<Value>, ApiError> {
        self.guard()?;
        self.observe(self.inner.photos(owner_id, album, count).await).await
    }

    async fn likes(&self, owner_id: i64, target: LikeTarget, count: u32) -> Result<Vec<i64>, ApiError> {
        self.guard()?;
        self.observe(self.inner.likes(owner_id, target, count).await).await
    }

    async fn group_members(&self, group_id: i64, count: u32) -> Result<Vec<i64>, ApiError> {
        self.guard()?;
        self.observe(self.inner.group_members(group_id, count).await).await
    }
}
