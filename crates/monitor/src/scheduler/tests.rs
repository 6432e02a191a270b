use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use sn_core::{Account, Document, MonitoringTask, NewAccount, TaskId};
use sn_ingest::CollectError;
use sn_storage::{AccountStore, MemoryStore, MemoryTaskLock};
use sn_vk::testing::FakeApi;
use sn_vk::{method, ApiError, SocialApi};

use super::*;
use crate::error::PoolError;
use crate::gate::MemoryGate;

const OWNER: i64 = 100;

struct FakeFactory {
    api: FakeApi,
}

impl ApiFactory for FakeFactory {
    fn connect(&self, _account: &Account, _token: &str) -> Result<Box<dyn SocialApi>, ApiError> {
        Ok(Box::new(self.api.clone()))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    lock: Arc<MemoryTaskLock>,
    gate: Arc<MemoryGate>,
    api: FakeApi,
}

impl Harness {
    async fn new(api: FakeApi) -> Self {
        let harness = Self::without_accounts(api);
        harness
            .store
            .create_account(NewAccount::new("vk", "bot", 0).with_token("tok"))
            .await
            .unwrap();
        harness
    }

    fn without_accounts(api: FakeApi) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            lock: Arc::new(MemoryTaskLock::new()),
            gate: Arc::new(MemoryGate::new()),
            api,
        }
    }

    fn scheduler(&self) -> Scheduler {
        let deps = SchedulerDeps {
            tasks: self.store.clone(),
            snapshots: self.store.clone(),
            lock: self.lock.clone(),
            gate: self.gate.clone(),
            pool: AccountPool::new(self.store.clone()),
            api: Arc::new(FakeFactory { api: self.api.clone() }),
        };
        Scheduler::new(
            deps,
            SchedulerConfig {
                tick: Duration::from_secs(3600),
                ..SchedulerConfig::default()
            },
        )
    }

    fn last_timestamp(&self, id: TaskId) -> DateTime<Utc> {
        self.store.task(id).unwrap().last_timestamp
    }
}

fn profile_api() -> FakeApi {
    FakeApi::new().with_user(OWNER, json!({"id": OWNER}))
}

fn task(id: TaskId, minutes_ago: i64) -> MonitoringTask {
    MonitoringTask {
        id,
        network: "vk".into(),
        owner_type: "user".into(),
        owner_id: OWNER,
        period_minutes: 60,
        last_timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
        filters: Document::new(),
        filter_limits: Document::new(),
        account_group_id: 0,
        is_unlockable: false,
        unlock_ids: vec![],
        is_unlocked: false,
    }
}

#[tokio::test]
async fn due_task_runs_and_advances_timestamp() {
    let h = Harness::new(profile_api()).await;
    h.store.put_task(task(1, 61));
    let before = Utc::now();

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(attempt, Attempt::Succeeded { task_id: 1, .. }));
    assert!(h.last_timestamp(1) >= before);
    assert!(!h.lock.is_held(1).await);
    assert_eq!(h.api.call_count(method::USERS_GET), 1);
}

#[tokio::test]
async fn task_inside_its_period_is_left_alone() {
    let h = Harness::new(profile_api()).await;
    h.store.put_task(task(1, 10));

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(attempt, Attempt::Idle));
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn success_unlocks_dependents_for_next_poll() {
    let h = Harness::new(profile_api()).await;
    let mut a = task(1, 61);
    a.unlock_ids = vec![2];
    let mut b = task(2, 1);
    b.is_unlockable = true;
    h.store.put_task(a);
    h.store.put_task(b);
    let scheduler = h.scheduler();

    assert!(matches!(scheduler.poll_once(0).await, Attempt::Succeeded { task_id: 1, .. }));
    assert!(h.store.task(2).unwrap().is_unlocked);

    assert!(matches!(scheduler.poll_once(0).await, Attempt::Succeeded { task_id: 2, .. }));
    assert!(!h.store.task(2).unwrap().is_unlocked);
    assert!(matches!(scheduler.poll_once(0).await, Attempt::Idle));
}

#[tokio::test]
async fn dependents_that_cannot_be_unlocked_keep_their_schedule() {
    let h = Harness::new(profile_api()).await;
    let mut a = task(1, 61);
    a.unlock_ids = vec![2];
    h.store.put_task(a);
    h.store.put_task(task(2, 1));

    h.scheduler().poll_once(0).await;

    assert!(!h.store.task(2).unwrap().is_unlocked);
}

#[tokio::test]
async fn failure_keeps_own_flag_and_skips_unlock() {
    let h = Harness::new(profile_api().failing(method::USERS_GET, 18, "User was deleted or banned")).await;
    let mut a = task(1, 10);
    a.is_unlockable = true;
    a.is_unlocked = true;
    a.unlock_ids = vec![2];
    let mut b = task(2, 1);
    b.is_unlockable = true;
    h.store.put_task(a);
    h.store.put_task(b);
    let before = Utc::now();

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(
        attempt,
        Attempt::Failed { task_id: 1, error: MonitorError::Collect(CollectError::Profile { .. }) }
    ));
    assert!(h.store.task(1).unwrap().is_unlocked);
    assert!(!h.store.task(2).unwrap().is_unlocked);
    assert!(h.last_timestamp(1) >= before);
    assert!(!h.lock.is_held(1).await);
}

#[tokio::test]
async fn partial_collection_still_counts_as_success() {
    let h = Harness::new(profile_api().failing(method::FRIENDS_GET, 15, "Access denied")).await;
    let mut a = task(1, 61);
    a.is_unlockable = true;
    a.is_unlocked = true;
    h.store.put_task(a);

    let attempt = h.scheduler().poll_once(0).await;

    let Attempt::Succeeded { report, .. } = attempt else {
        panic!("expected success");
    };
    assert_eq!(report.skipped, vec!["friends".to_string()]);
    assert!(!h.store.task(1).unwrap().is_unlocked);
}

#[tokio::test]
async fn disabled_task_is_never_executed() {
    let h = Harness::new(profile_api()).await;
    h.store.put_task(task(1, 120));
    h.gate.set_enabled(1, false).await.unwrap();
    let before = h.last_timestamp(1);

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(attempt, Attempt::Skipped { task_id: 1, reason: SkipReason::Disabled }));
    assert_eq!(h.last_timestamp(1), before);
    assert!(h.api.calls().is_empty());
    assert!(!h.lock.is_held(1).await);
}

#[tokio::test]
async fn gated_task_does_not_hold_up_later_candidates() {
    let h = Harness::new(profile_api()).await;
    h.store.put_task(task(1, 600));
    h.store.put_task(task(2, 61));
    h.gate.set_enabled(1, false).await.unwrap();
    let scheduler = h.scheduler();

    assert!(matches!(scheduler.poll_once(0).await, Attempt::Succeeded { task_id: 2, .. }));
    assert!(!h.store.task(2).unwrap().is_due(Utc::now()));
    assert!(!h.lock.is_held(1).await);
    assert_eq!(h.api.call_count(method::USERS_GET), 1);

    // Only the disabled task is left, and it stays put.
    for _ in 0..3 {
        assert!(matches!(
            scheduler.poll_once(0).await,
            Attempt::Skipped { task_id: 1, reason: SkipReason::Disabled }
        ));
    }
    assert!(h.store.task(1).unwrap().is_due(Utc::now()));
    assert_eq!(h.api.call_count(method::USERS_GET), 1);
}

#[tokio::test]
async fn disabled_tasks_cannot_occupy_every_worker() {
    let h = Harness::new(profile_api()).await;
    for id in 1..=3 {
        h.store.put_task(task(id, 600));
        h.gate.set_enabled(id, false).await.unwrap();
    }
    h.store.put_task(task(4, 61));

    let attempts = h.scheduler().run_once(3).await;

    let ran: Vec<_> = attempts
        .iter()
        .filter(|a| matches!(a, Attempt::Succeeded { .. }))
        .filter_map(Attempt::task_id)
        .collect();
    assert_eq!(ran, vec![4]);
}

#[tokio::test]
async fn cooling_down_task_is_skipped_even_when_unlocked() {
    let h = Harness::new(profile_api()).await;
    let mut t = task(1, 5);
    t.is_unlockable = true;
    t.is_unlocked = true;
    h.store.put_task(t);
    h.gate.set_cooldown(1, Duration::from_secs(300)).await.unwrap();
    let before = h.last_timestamp(1);

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(attempt, Attempt::Skipped { reason: SkipReason::CoolingDown, .. }));
    assert_eq!(h.last_timestamp(1), before);
    assert!(h.store.task(1).unwrap().is_unlocked);
}

#[tokio::test]
async fn missing_account_fails_and_waits_a_period() {
    let h = Harness::without_accounts(profile_api());
    h.store.put_task(task(1, 61));

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(
        attempt,
        Attempt::Failed { error: MonitorError::Pool(PoolError::NotFound { .. }), .. }
    ));
    assert!(!h.store.task(1).unwrap().is_due(Utc::now()));
}

#[tokio::test]
async fn account_without_token_fails_attempt() {
    let h = Harness::without_accounts(profile_api());
    h.store.create_account(NewAccount::new("vk", "fresh", 0)).await.unwrap();
    h.store.put_task(task(1, 61));

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(attempt, Attempt::Failed { error: MonitorError::NoCredential(_), .. }));
    assert!(h.api.calls().is_empty());
}

#[tokio::test]
async fn unsupported_owner_type_fails_attempt() {
    let h = Harness::new(profile_api()).await;
    let mut t = task(1, 61);
    t.owner_type = "page".into();
    h.store.put_task(t);

    let attempt = h.scheduler().poll_once(0).await;

    let Attempt::Failed { error, .. } = attempt else {
        panic!("expected failure");
    };
    assert_eq!(error.to_string(), "unsupported entity type: page");
}

#[tokio::test]
async fn task_claimed_elsewhere_is_not_touched() {
    let h = Harness::new(profile_api()).await;
    h.store.put_task(task(1, 61));
    let before = h.last_timestamp(1);
    assert!(h.lock.try_acquire(1).await.unwrap());

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(attempt, Attempt::Idle));
    assert_eq!(h.last_timestamp(1), before);
    assert!(h.lock.is_held(1).await);
}

#[tokio::test]
async fn unlocked_tasks_are_claimed_before_older_ones() {
    let h = Harness::new(profile_api()).await;
    h.store.put_task(task(1, 600));
    let mut urgent = task(2, 1);
    urgent.is_unlockable = true;
    urgent.is_unlocked = true;
    h.store.put_task(urgent);

    let attempt = h.scheduler().poll_once(0).await;

    assert_eq!(attempt.task_id(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_instances_execute_a_task_once() {
    let h = Harness::new(profile_api().with_delay(Duration::from_millis(50))).await;
    h.store.put_task(task(1, 61));
    // Two service instances over the same tables and lock service.
    let first = h.scheduler();
    let second = h.scheduler();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.run_once(4).await }),
        tokio::spawn(async move { second.run_once(4).await }),
    );
    let attempts: Vec<Attempt> = a.unwrap().into_iter().chain(b.unwrap()).collect();

    let succeeded = attempts.iter().filter(|a| matches!(a, Attempt::Succeeded { .. })).count();
    assert_eq!(succeeded, 1);
    assert_eq!(attempts.len(), 8);
    assert_eq!(h.api.call_count(method::USERS_GET), 1);
    assert!(!h.lock.is_held(1).await);
}

#[tokio::test]
async fn workers_run_immediately_on_start() {
    let h = Harness::new(profile_api()).await;
    h.store.put_task(task(1, 61));
    let before = Utc::now();

    let pool = h.scheduler().start(3);
    assert_eq!(pool.len(), 3);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.last_timestamp(1) < before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    pool.stop().await;

    assert_eq!(h.api.call_count(method::USERS_GET), 1);
}

#[tokio::test]
async fn stop_lets_in_flight_attempt_finish() {
    let h = Harness::new(profile_api().with_delay(Duration::from_millis(200))).await;
    h.store.put_task(task(1, 61));
    let before = Utc::now();

    let pool = h.scheduler().start(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.stop().await;

    assert!(h.last_timestamp(1) >= before);
    assert!(!h.lock.is_held(1).await);
}

#[tokio::test]
async fn throttled_account_is_parked_after_attempt() {
    let h = Harness::new(profile_api().failing(method::WALL_GET, 6, "Too many requests per second")).await;
    h.store.put_task(task(1, 61));

    let attempt = h.scheduler().poll_once(0).await;

    assert!(matches!(attempt, Attempt::Succeeded { .. }));
    let accounts = h.store.eligible_accounts("vk", 0, Utc::now()).await.unwrap();
    assert!(accounts.is_empty());
}

#[tokio::test]
async fn throttled_account_makes_no_further_calls() {
    let api = profile_api()
        .failing(method::FRIENDS_GET, 29, "Rate limit reached")
        .with_posts(OWNER, vec![json!({"id": 10}), json!({"id": 11}), json!({"id": 12})]);
    let h = Harness::new(api).await;
    h.store.put_task(task(1, 61));

    let attempt = h.scheduler().poll_once(0).await;

    let Attempt::Succeeded { report, .. } = attempt else {
        panic!("expected success");
    };
    assert_eq!(
        h.api.calls(),
        vec![method::USERS_GET.to_string(), method::FRIENDS_GET.to_string()]
    );
    assert_eq!(report.skipped, vec!["friends", "groups", "followers", "posts", "photos"]);
    assert_eq!(h.api.call_count(method::LIKES_GET_LIST), 0);
}
