use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::entity::AccountId;

/// Session key holding the API access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// An authenticated account on the external network, drawn from the pool to run tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub network: String,
    pub login: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub session: Document,
    pub proxy: Option<String>,
    pub is_blocked: bool,
    pub info: String,
    pub unavailable_until: Option<DateTime<Utc>>,
    pub group_id: i32,
}

impl Account {
    /// Not blocked, and not parked until some future instant.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.is_blocked && self.unavailable_until.map_or(true, |until| until <= now)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.session.get_str(ACCESS_TOKEN_KEY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub network: String,
    pub login: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub session: Document,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub group_id: i32,
}

impl NewAccount {
    pub fn new(network: impl Into<String>, login: impl Into<String>, group_id: i32) -> Self {
        Self {
            network: network.into(),
            login: login.into(),
            password: None,
            session: Document::new(),
            proxy: None,
            group_id,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.session.insert(ACCESS_TOKEN_KEY, token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account() -> Account {
        Account {
            id: 1,
            network: "vk".into(),
            login: "bot".into(),
            password: Some("secret".into()),
            session: Document::new().with(ACCESS_TOKEN_KEY, "tok"),
            proxy: None,
            is_blocked: false,
            info: String::new(),
            unavailable_until: None,
            group_id: 0,
        }
    }

    #[test]
    fn eligibility_respects_block_and_parking() {
        let now = Utc::now();
        let mut a = account();
        assert!(a.is_eligible(now));

        a.unavailable_until = Some(now + Duration::minutes(5));
        assert!(!a.is_eligible(now));

        a.unavailable_until = Some(now - Duration::minutes(5));
        assert!(a.is_eligible(now));

        a.is_blocked = true;
        assert!(!a.is_eligible(now));
    }

    #[test]
    fn token_comes_from_session() {
        let mut a = account();
        assert_eq!(a.access_token(), Some("tok"));
        a.session.remove(ACCESS_TOKEN_KEY);
        assert_eq!(a.access_token(), None);
    }

    #[test]
    fn password_never_serialized() {
        let json = serde_json::to_value(account()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["login"], "bot");
    }
}
