//! Worker pool that claims due tasks and runs them.
//!
//! One attempt: claim (lock + re-read + gate check) → execute → record
//! outcome → release. A gated candidate is released inside the claim and the
//! next candidate is tried, so a disabled task never holds up the rest of the
//! batch. The claim is released on every path, including a panic inside the
//! attempt, because the attempt runs as its own tokio task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sn_core::config::MonitorConfig;
use sn_core::{MonitoringTask, TaskId};
use sn_ingest::{CollectOptions, CollectReport, Collector};
use sn_storage::{SnapshotStore, StoreError, TaskLock, TaskStore};

use crate::error::MonitorError;
use crate::gate::{GateDecision, TaskGate};
use crate::pool::AccountPool;
use crate::session::{AccountBoundApi, ApiFactory};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between polls of one worker.
    pub tick: Duration,
    /// Due tasks fetched per poll.
    pub batch_size: i64,
    /// How long an account is parked after throttling.
    pub account_throttle: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            batch_size: 100,
            account_throttle: Duration::from_secs(600),
        }
    }
}

impl From<&MonitorConfig> for SchedulerConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            tick: config.tick(),
            batch_size: config.batch_size.max(1),
            account_throttle: config.account_throttle(),
        }
    }
}

/// Collaborators of the scheduler.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub lock: Arc<dyn TaskLock>,
    pub gate: Arc<dyn TaskGate>,
    pub pool: AccountPool,
    pub api: Arc<dyn ApiFactory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    CoolingDown,
    /// Gate flags could not be read; the task is not run blind.
    GateUnavailable,
}

/// Outcome of one poll.
#[derive(Debug)]
pub enum Attempt {
    /// Nothing due, or everything due is claimed elsewhere.
    Idle,
    /// Every claimable candidate was gated; names the first of them.
    Skipped { task_id: TaskId, reason: SkipReason },
    Succeeded { task_id: TaskId, report: CollectReport },
    Failed { task_id: TaskId, error: MonitorError },
}

impl Attempt {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Attempt::Idle => None,
            Attempt::Skipped { task_id, .. }
            | Attempt::Succeeded { task_id, .. }
            | Attempt::Failed { task_id, .. } => Some(*task_id),
        }
    }
}

struct Inner {
    deps: SchedulerDeps,
    config: SchedulerConfig,
}

enum Claim {
    Task(MonitoringTask),
    /// Nothing runnable; the first gated candidate seen.
    Gated { task_id: TaskId, reason: SkipReason },
    Nothing,
}

/// Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner { deps, config }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Claim and run at most one due task.
    pub async fn poll_once(&self, worker_id: usize) -> Attempt {
        let task = match self.inner.claim(worker_id).await {
            Ok(Claim::Task(task)) => task,
            Ok(Claim::Gated { task_id, reason }) => return Attempt::Skipped { task_id, reason },
            Ok(Claim::Nothing) => {
                debug!(worker_id, "no claimable task");
                return Attempt::Idle;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "claim failed");
                return Attempt::Idle;
            }
        };

        let task_id = task.id;
        let inner = self.inner.clone();
        let attempt = match tokio::spawn(async move { inner.run_claimed(task, worker_id).await }).await {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(task_id, worker_id, error = %e, "task attempt aborted");
                Attempt::Failed {
                    task_id,
                    error: MonitorError::Aborted(e.to_string()),
                }
            }
        };

        self.inner.release(task_id).await;
        attempt
    }

    /// One poll per worker, concurrently, then return.
    pub async fn run_once(&self, workers: usize) -> Vec<Attempt> {
        let mut set = JoinSet::new();
        for worker_id in 0..workers.max(1) {
            let scheduler = self.clone();
            set.spawn(async move { scheduler.poll_once(worker_id).await });
        }

        let mut attempts = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => error!(error = %e, "worker exited abnormally"),
            }
        }
        attempts
    }

    /// Launch `workers` polling loops. Each polls immediately, then every tick.
    pub fn start(&self, workers: usize) -> WorkerPool {
        let workers = workers.max(1);
        let stop = CancellationToken::new();
        let handles = (0..workers)
            .map(|worker_id| {
                let scheduler = self.clone();
                let stop = stop.clone();
                tokio::spawn(async move { scheduler.worker_loop(worker_id, stop).await })
            })
            .collect();

        info!(
            workers,
            tick_secs = self.inner.config.tick.as_secs(),
            "monitoring service started"
        );
        WorkerPool { stop, workers: handles }
    }

    async fn worker_loop(self, worker_id: usize, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                // The poll runs in the arm body, so a stop never interrupts it.
                _ = ticker.tick() => {
                    self.poll_once(worker_id).await;
                }
            }
        }
        debug!(worker_id, "worker stopped");
    }
}

impl Inner {
    /// Lock the first due candidate that is still due once locked and open
    /// at the gate. Gated candidates are released and passed over.
    async fn claim(&self, worker_id: usize) -> Result<Claim, StoreError> {
        let candidates = self
            .deps
            .tasks
            .due_tasks(Utc::now(), self.config.batch_size)
            .await?;

        let mut gated = None;
        for candidate in candidates {
            if !self.deps.lock.try_acquire(candidate.id).await? {
                debug!(task_id = candidate.id, "task claimed elsewhere");
                continue;
            }
            // Another instance may have finished it between the batch query and the lock.
            let task = match self.deps.tasks.get_task(candidate.id).await {
                Ok(Some(task)) if task.is_due(Utc::now()) => task,
                Ok(_) => {
                    debug!(task_id = candidate.id, "task no longer due");
                    self.release(candidate.id).await;
                    continue;
                }
                Err(e) => {
                    self.release(candidate.id).await;
                    return Err(e);
                }
            };

            match self.gate_reason(task.id).await {
                None => return Ok(Claim::Task(task)),
                Some(reason) => {
                    info!(task_id = task.id, worker_id, ?reason, "task gated, skipping");
                    self.release(task.id).await;
                    if gated.is_none() {
                        gated = Some(Claim::Gated { task_id: task.id, reason });
                    }
                }
            }
        }
        Ok(gated.unwrap_or(Claim::Nothing))
    }

    async fn gate_reason(&self, task_id: TaskId) -> Option<SkipReason> {
        match self.deps.gate.check(task_id).await {
            Ok(GateDecision::Open) => None,
            Ok(GateDecision::Disabled) => Some(SkipReason::Disabled),
            Ok(GateDecision::CoolingDown) => Some(SkipReason::CoolingDown),
            Err(e) => {
                warn!(task_id, error = %e, "gate unavailable");
                Some(SkipReason::GateUnavailable)
            }
        }
    }

    async fn release(&self, task_id: TaskId) {
        if let Err(e) = self.deps.lock.release(task_id).await {
            error!(task_id, error = %e, "failed to release task claim");
        }
    }

    async fn run_claimed(&self, task: MonitoringTask, worker_id: usize) -> Attempt {
        info!(
            task_id = task.id,
            worker_id,
            owner_type = %task.owner_type,
            owner_id = task.owner_id,
            "executing task"
        );
        let result = self.execute(&task).await;
        self.record(&task, result).await
    }

    async fn execute(&self, task: &MonitoringTask) -> Result<CollectReport, MonitorError> {
        let owner = task.owner()?;
        let account = self
            .deps
            .pool
            .acquire(&task.network, task.account_group_id)
            .await?;
        let token = account
            .access_token()
            .ok_or(MonitorError::NoCredential(account.id))?;

        let client = self.deps.api.connect(&account, token)?;
        let api = AccountBoundApi::new(
            client,
            self.deps.pool.clone(),
            &account,
            self.config.account_throttle,
        );
        let options = CollectOptions::from_task(&task.filters, &task.filter_limits);

        let report = Collector::new(&api, self.deps.snapshots.as_ref(), &task.network)
            .with_options(options)
            .collect(owner)
            .await?;
        Ok(report)
    }

    async fn record(&self, task: &MonitoringTask, result: Result<CollectReport, MonitorError>) -> Attempt {
        let task_id = task.id;
        if let Err(e) = self.deps.tasks.touch_task(task_id, Utc::now()).await {
            error!(task_id, error = %e, "failed to record task timestamp");
        }

        let report = match result {
            Ok(report) => report,
            Err(error) => {
                warn!(task_id, error = %error, "task failed");
                return Attempt::Failed { task_id, error };
            }
        };

        // Own flag first, so a task listing itself in unlock_ids stays unlocked.
        if task.is_unlockable {
            if let Err(e) = self.deps.tasks.set_unlocked(&[task_id], false).await {
                error!(task_id, error = %e, "failed to clear unlocked flag");
            }
        }
        if !task.unlock_ids.is_empty() {
            match self.deps.tasks.set_unlocked(&task.unlock_ids, true).await {
                Ok(unlocked) => debug!(task_id, unlocked, dependents = ?task.unlock_ids, "dependents unlocked"),
                Err(e) => error!(task_id, error = %e, "failed to unlock dependent tasks"),
            }
        }

        info!(task_id, skipped = report.skipped.len(), "task succeeded");
        Attempt::Succeeded { task_id, report }
    }
}

/// Handle to running worker loops.
pub struct WorkerPool {
    stop: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ask every loop to finish its current poll, then wait for all of them.
    pub async fn stop(self) {
        self.stop.cancel();
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "worker exited abnormally");
            }
        }
        info!("monitoring service stopped");
    }
}

#[cfg(test)]
mod tests;
