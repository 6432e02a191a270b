use thiserror::Error;

/// Account-level meaning of an API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Token rejected; the session needs re-authorization.
    AuthFailed,
    /// The calling account itself is banned or deactivated.
    AccountBanned,
    /// Too many requests; park the account for a while.
    Throttled,
    Other,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid proxy {0}")]
    InvalidProxy(String),
}

const AUTH_FAILED: i64 = 5;
const TOO_MANY_REQUESTS: i64 = 6;
const FLOOD_CONTROL: i64 = 9;
const RATE_LIMIT_REACHED: i64 = 29;

impl ApiError {
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        let Self::Api { code, message } = self else {
            return ApiErrorKind::Other;
        };
        match *code {
            AUTH_FAILED => {
                let message = message.to_ascii_lowercase();
                if ["blocked", "banned", "deactivated"].iter().any(|w| message.contains(w)) {
                    ApiErrorKind::AccountBanned
                } else {
                    ApiErrorKind::AuthFailed
                }
            }
            TOO_MANY_REQUESTS | FLOOD_CONTROL | RATE_LIMIT_REACHED => ApiErrorKind::Throttled,
            _ => ApiErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: i64, message: &str) -> ApiError {
        ApiError::Api { code, message: message.into() }
    }

    #[test]
    fn classifies_auth_failures() {
        assert_eq!(api(5, "User authorization failed: invalid access_token").kind(), ApiErrorKind::AuthFailed);
        assert_eq!(
            api(5, "User authorization failed: user is blocked.").kind(),
            ApiErrorKind::AccountBanned
        );
        assert_eq!(api(5, "user Deactivated").kind(), ApiErrorKind::AccountBanned);
    }

    #[test]
    fn classifies_throttling() {
        for code in [6, 9, 29] {
            assert_eq!(api(code, "slow down").kind(), ApiErrorKind::Throttled);
        }
    }

    #[test]
    fn other_errors_do_not_touch_accounts() {
        assert_eq!(api(18, "User was deleted or banned").kind(), ApiErrorKind::Other);
        assert_eq!(ApiError::NotFound("user 1".into()).kind(), ApiErrorKind::Other);
        assert_eq!(ApiError::NotFound("user 1".into()).code(), None);
    }

    #[test]
    fn display_includes_code_and_message() {
        assert_eq!(api(15, "Access denied").to_string(), "API error 15: Access denied");
    }
}
