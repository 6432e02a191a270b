use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info};

use sn_core::{Account, AccountId, Document};
use sn_storage::AccountStore;

use crate::error::PoolError;

/// Draws accounts for task attempts and records what the API told us about them.
#[derive(Clone)]
pub struct AccountPool {
    store: Arc<dyn AccountStore>,
}

impl AccountPool {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// A random eligible account of `(network, group_id)`, spreading load
    /// across the group.
    pub async fn acquire(&self, network: &str, group_id: i32) -> Result<Account, PoolError> {
        let now = Utc::now();
        let mut eligible = self.store.eligible_accounts(network, group_id, now).await?;
        eligible.retain(|a| a.is_eligible(now));

        if eligible.is_empty() {
            return Err(PoolError::NotFound {
                network: network.to_string(),
                group_id,
            });
        }
        let candidates = eligible.len();
        let pick = rand::thread_rng().gen_range(0..candidates);
        let account = eligible.swap_remove(pick);
        debug!(account_id = account.id, candidates, "account acquired");
        Ok(account)
    }

    pub async fn record_session_update(&self, id: AccountId, session: &Document) -> Result<(), PoolError> {
        self.store.update_session(id, session).await?;
        info!(account_id = id, "account session updated");
        Ok(())
    }

    pub async fn record_blocked(&self, id: AccountId, reason: &str) -> Result<(), PoolError> {
        self.store.mark_blocked(id, reason).await?;
        info!(account_id = id, reason, "account blocked");
        Ok(())
    }

    /// Park the account for `duration` from now.
    pub async fn record_unavailable(&self, id: AccountId, duration: Duration) -> Result<(), PoolError> {
        let delta = chrono::Duration::from_std(duration).map_err(|_| PoolError::InvalidDuration(duration))?;
        let until = Utc::now() + delta;
        self.store.set_unavailable_until(id, until).await?;
        info!(account_id = id, until = %until, "account parked");
        Ok(())
    }
}
