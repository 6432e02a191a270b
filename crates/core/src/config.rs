use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub monitor: MonitorConfig,
    pub vk: VkConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// With a profile (e.g. `PROD`) every key is first looked up as
    /// `{PROFILE}_{KEY}`, falling back to `{KEY}`. Empty string = default.
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            redis: RedisConfig::from_env_profiled(p),
            monitor: MonitorConfig::from_env_profiled(p),
            vk: VkConfig::from_env_profiled(p),
        }
    }

    /// Worker loops to start. With the Postgres lock every in-flight claim
    /// pins a pool connection, so the count is capped to leave one free.
    pub fn worker_count(&self) -> usize {
        let workers = self.monitor.workers.max(1);
        if self.monitor.lock_backend != LockBackend::Postgres {
            return workers;
        }
        let limit = usize::try_from(self.postgres.max_connections.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .max(1);
        if workers > limit {
            tracing::warn!(
                workers,
                max_connections = self.postgres.max_connections,
                "too few PostgreSQL connections for workers, running {limit}"
            );
            return limit;
        }
        workers
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Log a summary of loaded config (no secrets).
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!("  redis:       {}", self.redis.redacted_url());
        tracing::info!(
            "  monitor:     workers={}, tick={}s, batch={}, lock={}",
            self.monitor.workers,
            self.monitor.tick_secs,
            self.monitor.batch_size,
            self.monitor.lock_backend
        );
        tracing::info!(
            "  vk:          url={}, v={}, min_interval={}ms",
            self.vk.api_url,
            self.vk.api_version,
            self.vk.min_interval_ms
        );
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full URL; overrides the individual fields when set.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "DATABASE_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "sn"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    /// Connection URL; credentials are percent-encoded.
    pub fn connection_string(&self) -> Result<String, CoreError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let address = format!("postgres://{}:{}/{}", self.host, self.port, self.database);
        let mut url = url::Url::parse(&address)
            .map_err(|e| CoreError::Config(format!("invalid postgres address {address}: {e}")))?;
        let no_credentials = |()| CoreError::Config(format!("postgres address {address} cannot carry credentials"));
        url.set_username(self.username.as_deref().unwrap_or("postgres"))
            .map_err(no_credentials)?;
        if let Some(password) = self.password.as_deref() {
            url.set_password(Some(password)).map_err(no_credentials)?;
        }
        url.query_pairs_mut().append_pair("sslmode", &self.ssl_mode);
        Ok(url.into())
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Redis ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "REDIS_URL", "redis://127.0.0.1:6379"),
        }
    }

    /// URL with any password replaced.
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &self.url[..scheme_end], &self.url[at..])
            }
            _ => self.url.clone(),
        }
    }
}

// ── Monitoring scheduler ──────────────────────────────────────

/// Where the per-task claim lock lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Session advisory lock; released when the holding connection drops.
    Postgres,
    /// `SET NX PX` lease; released on expiry if the holder disappears.
    Redis,
}

impl FromStr for LockBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(LockBackend::Postgres),
            "redis" => Ok(LockBackend::Redis),
            other => Err(CoreError::Config(format!("unknown lock backend: {other}"))),
        }
    }
}

impl std::fmt::Display for LockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockBackend::Postgres => write!(f, "postgres"),
            LockBackend::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub workers: usize,
    pub tick_secs: u64,
    /// Due tasks fetched per poll.
    pub batch_size: i64,
    pub lock_backend: LockBackend,
    pub lock_ttl_secs: u64,
    /// How long an account is parked after the API reports throttling.
    pub account_throttle_secs: u64,
}

impl MonitorConfig {
    fn from_env_profiled(p: &str) -> Self {
        let lock_backend = profiled_env_or(p, "MONITOR_LOCK_BACKEND", "postgres");
        let lock_backend = lock_backend.parse().unwrap_or_else(|e: CoreError| {
            tracing::warn!(error = %e, "falling back to postgres lock backend");
            LockBackend::Postgres
        });
        Self {
            workers: profiled_env_parse(p, "MONITOR_WORKERS", 4),
            tick_secs: profiled_env_parse(p, "MONITOR_TICK_SECS", 60),
            batch_size: profiled_env_parse(p, "MONITOR_BATCH_SIZE", 100),
            lock_backend,
            lock_ttl_secs: profiled_env_parse(p, "MONITOR_LOCK_TTL_SECS", 900),
            account_throttle_secs: profiled_env_parse(p, "ACCOUNT_THROTTLE_SECS", 600),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs.max(1))
    }

    pub fn account_throttle(&self) -> Duration {
        Duration::from_secs(self.account_throttle_secs)
    }
}

// ── VK API ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VkConfig {
    pub api_url: String,
    pub api_version: String,
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

impl VkConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_url: profiled_env_or(p, "VK_API_URL", "https://api.vk.com/method/"),
            api_version: profiled_env_or(p, "VK_API_VERSION", "5.131"),
            min_interval_ms: profiled_env_parse(p, "VK_MIN_INTERVAL_MS", 350),
            timeout_secs: profiled_env_parse(p, "VK_TIMEOUT_SECS", 30),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.vk.com/method/".into(),
            api_version: "5.131".into(),
            min_interval_ms: 350,
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_backend_parses_aliases() {
        assert_eq!("PG".parse::<LockBackend>().unwrap(), LockBackend::Postgres);
        assert_eq!("redis".parse::<LockBackend>().unwrap(), LockBackend::Redis);
        assert!("zookeeper".parse::<LockBackend>().is_err());
    }

    #[test]
    fn database_url_overrides_fields() {
        let mut pg = PostgresConfig {
            url: None,
            host: "db".into(),
            port: 5433,
            database: "sn".into(),
            username: Some("sn".into()),
            password: Some("pw".into()),
            ssl_mode: "disable".into(),
            max_connections: 5,
        };
        assert_eq!(pg.connection_string().unwrap(), "postgres://sn:pw@db:5433/sn?sslmode=disable");

        pg.url = Some("postgres://other/x".into());
        assert_eq!(pg.connection_string().unwrap(), "postgres://other/x");
    }

    #[test]
    fn credentials_are_percent_encoded() {
        let pg = PostgresConfig {
            url: None,
            host: "db".into(),
            port: 5432,
            database: "sn".into(),
            username: Some("ops@corp".into()),
            password: Some("p@ss:/w#1".into()),
            ssl_mode: "require".into(),
            max_connections: 5,
        };
        let dsn = pg.connection_string().unwrap();
        assert_eq!(dsn, "postgres://ops%40corp:p%40ss%3A%2Fw%231@db:5432/sn?sslmode=require");

        let parsed = url::Url::parse(&dsn).unwrap();
        assert_eq!(parsed.host_str(), Some("db"));
        assert_eq!(parsed.path(), "/sn");
    }

    fn config(workers: usize, lock_backend: LockBackend, max_connections: u32) -> Config {
        Config {
            profile: String::new(),
            postgres: PostgresConfig {
                url: None,
                host: "localhost".into(),
                port: 5432,
                database: "sn".into(),
                username: None,
                password: None,
                ssl_mode: "prefer".into(),
                max_connections,
            },
            redis: RedisConfig { url: "redis://127.0.0.1:6379".into() },
            monitor: MonitorConfig {
                workers,
                tick_secs: 60,
                batch_size: 100,
                lock_backend,
                lock_ttl_secs: 900,
                account_throttle_secs: 600,
            },
            vk: VkConfig::default(),
        }
    }

    #[test]
    fn postgres_lock_leaves_a_connection_free() {
        assert_eq!(config(4, LockBackend::Postgres, 10).worker_count(), 4);
        assert_eq!(config(10, LockBackend::Postgres, 10).worker_count(), 9);
        assert_eq!(config(8, LockBackend::Postgres, 1).worker_count(), 1);
        assert_eq!(config(10, LockBackend::Redis, 10).worker_count(), 10);
        assert_eq!(config(0, LockBackend::Redis, 10).worker_count(), 1);
    }

    #[test]
    fn redis_url_redaction_hides_credentials() {
        let r = RedisConfig { url: "redis://:hunter2@cache:6379/0".into() };
        assert_eq!(r.redacted_url(), "redis://***@cache:6379/0");

        let plain = RedisConfig { url: "redis://127.0.0.1:6379".into() };
        assert_eq!(plain.redacted_url(), "redis://127.0.0.1:6379");
    }

    #[test]
    fn vk_defaults_match_public_api() {
        let vk = VkConfig::default();
        assert_eq!(vk.min_interval(), Duration::from_millis(350));
        assert_eq!(vk.timeout(), Duration::from_secs(30));
        assert_eq!(vk.api_version, "5.131");
    }
}
