//! Scripted [`SocialApi`] for tests: canned responses per method, injectable
//! failures, an optional per-call delay, and a call log.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{method, LikeTarget, SocialApi};
use crate::error::ApiError;

#[derive(Default)]
struct Script {
    users: HashMap<i64, Value>,
    groups: HashMap<i64, Value>,
    friends: HashMap<i64, Vec<i64>>,
    user_groups: HashMap<i64, Vec<i64>>,
    followers: HashMap<i64, Vec<i64>>,
    posts: HashMap<i64, Vec<Value>>,
    photos: HashMap<i64, Vec<Value>>,
    likes: HashMap<(i64, LikeTarget), Vec<i64>>,
    members: HashMap<i64, Vec<i64>>,
    failures: HashMap<&'static str, (i64, String)>,
    delay: Option<Duration>,
    calls: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
    seen_counts: HashSet<(&'static str, u32)>,
}

/// Cheap to clone; clones share the script and the call log.
#[derive(Clone, Default)]
pub struct FakeApi {
    script: Arc<Mutex<Script>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_user(self, id: i64, profile: Value) -> Self {
        self.script().users.insert(id, profile);
        self
    }

    pub fn with_group(self, id: i64, profile: Value) -> Self {
        self.script().groups.insert(id, profile);
        self
    }

    pub fn with_friends(self, id: i64, ids: Vec<i64>) -> Self {
        self.script().friends.insert(id, ids);
        self
    }

    pub fn with_user_groups(self, id: i64, ids: Vec<i64>) -> Self {
        self.script().user_groups.insert(id, ids);
        self
    }

    pub fn with_followers(self, id: i64, ids: Vec<i64>) -> Self {
        self.script().followers.insert(id, ids);
        self
    }

    pub fn with_posts(self, owner_id: i64, posts: Vec<Value>) -> Self {
        self.script().posts.insert(owner_id, posts);
        self
    }

    pub fn with_photos(self, owner_id: i64, photos: Vec<Value>) -> Self {
        self.script().photos.insert(owner_id, photos);
        self
    }

    pub fn with_likes(self, owner_id: i64, target: LikeTarget, ids: Vec<i64>) -> Self {
        self.script().likes.insert((owner_id, target), ids);
        self
    }

    pub fn with_members(self, group_id: i64, ids: Vec<i64>) -> Self {
        self.script().members.insert(group_id, ids);
        self
    }

    /// Make every call to `method` fail with the given API error.
    pub fn failing(self, method: &'static str, code: i64, message: &str) -> Self {
        self.script().failures.insert(method, (code, message.to_string()));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.script().delay = Some(delay);
        self
    }

    /// Method names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.script().calls.iter().filter(|c| c.as_str() == method).count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.script().max_in_flight
    }

    /// Whether `method` was ever called with this page size.
    pub fn saw_count(&self, method: &'static str, count: u32) -> bool {
        self.script().seen_counts.contains(&(method, count))
    }

    async fn enter(&self, method: &'static str, count: Option<u32>) -> Result<(), ApiError> {
        let delay = {
            let mut script = self.script();
            script.calls.push(method.to_string());
            if let Some(count) = count {
                script.seen_counts.insert((method, count));
            }
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script();
        script.in_flight -= 1;
        match script.failures.get(method) {
            Some((code, message)) => Err(ApiError::Api {
                code: *code,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SocialApi for FakeApi {
    async fn user_profile(&self, user_id: i64) -> Result<Value, ApiError> {
        self.enter(method::USERS_GET, None).await?;
        self.script()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("user {user_id}")))
    }

    async fn group_profile(&self, group_id: i64) -> Result<Value, ApiError> {
        self.enter(method::GROUPS_GET_BY_ID, None).await?;
        self.script()
            .groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("group {group_id}")))
    }

    async fn friends(&self, user_id: i64) -> Result<Vec<i64>, ApiError> {
        self.enter(method::FRIENDS_GET, None).await?;
        Ok(self.script().friends.get(&user_id).cloned().unwrap_or_default())
    }

    async fn user_groups(&self, user_id: i64) -> Result<Vec<i64>, ApiError> {
        self.enter(method::GROUPS_GET, None).await?;
        Ok(self.script().user_groups.get(&user_id).cloned().unwrap_or_default())
    }

    async fn followers(&self, user_id: i64, count: u32) -> Result<Vec<i64>, ApiError> {
        self.enter(method::USERS_GET_FOLLOWERS, Some(count)).await?;
        Ok(self.script().followers.get(&user_id).cloned().unwrap_or_default())
    }

    async fn wall_posts(&self, owner_id: i64, count: u32) -> Result<Vec<Value>, ApiError> {
        self.enter(method::WALL_GET, Some(count)).await?;
        Ok(self.script().posts.get(&owner_id).cloned().unwrap_or_default())
    }

    async fn photos(&self, owner_id: i64, _album: &str, count: u32) -> Result<Vec<Value>, ApiError> {
        self.enter(method::PHOTOS_GET, Some(count)).await?;
        Ok(self.script().photos.get(&owner_id).cloned().unwrap_or_default())
    }

    async fn likes(&self, owner_id: i64, target: LikeTarget, count: u32) -> Result<Vec<i64>, ApiError> {
        self.enter(method::LIKES_GET_LIST, Some(count)).await?;
        Ok(self.script().likes.get(&(owner_id, target)).cloned().unwrap_or_default())
    }

    async fn group_members(&self, group_id: i64, count: u32) -> Result<Vec<i64>, ApiError> {
        self.enter(method::GROUPS_GET_MEMBERS, Some(count)).await?;
        Ok(self.script().members.get(&group_id).cloned().unwrap_or_default())
    }
}
