//! monitor-worker: runs the monitoring scheduler against shared storage.
//!
//! Connects to:
//! - PostgreSQL: tasks, accounts, collected snapshots (and advisory locks)
//! - Redis: per-task gating flags (and lease locks when selected)

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use sn_core::config::{load_dotenv, LockBackend};
use sn_core::Config;
use sn_monitor::{AccountPool, RedisGate, Scheduler, SchedulerConfig, SchedulerDeps, VkApiFactory};
use sn_storage::{PgStore, PgTaskLock, RedisLeaseLock, TaskLock};

// ── CLI ─────────────────────────────────────────────────────────────

/// Monitoring worker: claims due tasks and collects their entities.
#[derive(Parser, Debug)]
#[command(name = "monitor-worker", version, about)]
struct Cli {
    /// Config profile; keys are looked up as `{PROFILE}_{KEY}` first.
    #[arg(long, env = "SN_PROFILE", default_value = "")]
    profile: String,

    /// Number of worker loops (overrides MONITOR_WORKERS).
    #[arg(long)]
    workers: Option<usize>,

    /// Poll interval in seconds (overrides MONITOR_TICK_SECS).
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Poll once per worker and exit.
    #[arg(long)]
    once: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::for_profile(&cli.profile);
    if let Some(workers) = cli.workers {
        config.monitor.workers = workers;
    }
    if let Some(tick_secs) = cli.tick_secs {
        config.monitor.tick_secs = tick_secs;
    }
    config.log_summary();

    if !config.postgres.is_configured() {
        warn!("PostgreSQL not explicitly configured, using local defaults");
    }
    let pg = sn_storage::connect(&config.postgres).await?;
    let store = Arc::new(PgStore::new(pg.clone()));

    let redis = redis::Client::open(config.redis.url.as_str())?;
    let conn = redis::aio::ConnectionManager::new(redis).await?;
    info!("redis connected");

    let lock: Arc<dyn TaskLock> = match config.monitor.lock_backend {
        LockBackend::Postgres => Arc::new(PgTaskLock::new(pg)),
        LockBackend::Redis => Arc::new(RedisLeaseLock::new(conn.clone(), config.monitor.lock_ttl())),
    };
    info!(backend = %config.monitor.lock_backend, "task lock ready");

    let deps = SchedulerDeps {
        tasks: store.clone(),
        snapshots: store.clone(),
        lock,
        gate: Arc::new(RedisGate::new(conn)),
        pool: AccountPool::new(store),
        api: Arc::new(VkApiFactory::new(config.vk.clone())),
    };
    let scheduler = Scheduler::new(deps, SchedulerConfig::from(&config.monitor));
    let workers = config.worker_count();

    if cli.once {
        let attempts = scheduler.run_once(workers).await;
        let ran = attempts.iter().filter(|a| a.task_id().is_some()).count();
        info!(polls = attempts.len(), ran, "single pass complete");
        return Ok(());
    }

    let pool = scheduler.start(workers);
    info!(workers = pool.len(), "monitor-worker running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, waiting for in-flight tasks");
    pool.stop().await;
    info!("monitor-worker exited cleanly");

    Ok(())
}
