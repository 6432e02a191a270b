use async_trait::async_trait;
use serde_json::Value;

use crate::client::VkClient;
use crate::error::ApiError;

/// Method names of the endpoints the collector uses.
pub mod method {
    pub const USERS_GET: &str = "users.get";
    pub const GROUPS_GET_BY_ID: &str = "groups.getById";
    pub const FRIENDS_GET: &str = "friends.get";
    pub const GROUPS_GET: &str = "groups.get";
    pub const USERS_GET_FOLLOWERS: &str = "users.getFollowers";
    pub const WALL_GET: &str = "wall.get";
    pub const PHOTOS_GET: &str = "photos.get";
    pub const LIKES_GET_LIST: &str = "likes.getList";
    pub const GROUPS_GET_MEMBERS: &str = "groups.getMembers";
}

const USER_FIELDS: &str = "sex,bdate,city,country,photo_max,status,last_seen";
const GROUP_FIELDS: &str = "description,members_count,city,country";

/// Item whose likes are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LikeTarget {
    Post(i64),
    Photo(i64),
}

impl LikeTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            LikeTarget::Post(_) => "post",
            LikeTarget::Photo(_) => "photo",
        }
    }

    pub fn item_id(&self) -> i64 {
        match self {
            LikeTarget::Post(id) | LikeTarget::Photo(id) => *id,
        }
    }
}

/// Source-API capability consumed by the collector. One implementation per
/// network; tests use a scripted fake.
#[async_trait]
pub trait SocialApi: Send + Sync {
    async fn user_profile(&self, user_id: i64) -> Result<Value, ApiError>;

    async fn group_profile(&self, group_id: i64) -> Result<Value, ApiError>;

    async fn friends(&self, user_id: i64) -> Result<Vec<i64>, ApiError>;

    /// Groups the user belongs to.
    async fn user_groups(&self, user_id: i64) -> Result<Vec<i64>, ApiError>;

    async fn followers(&self, user_id: i64, count: u32) -> Result<Vec<i64>, ApiError>;

    async fn wall_posts(&self, owner_id: i64, count: u32) -> Result<Vec<Value>, ApiError>;

    async fn photos(&self, owner_id: i64, album: &str, count: u32) -> Result<Vec<Value>, ApiError>;

    /// Ids of users who liked `target` on `owner_id`'s page.
    async fn likes(&self, owner_id: i64, target: LikeTarget, count: u32) -> Result<Vec<i64>, ApiError>;

    async fn group_members(&self, group_id: i64, count: u32) -> Result<Vec<i64>, ApiError>;
}

#[async_trait]
impl SocialApi for VkClient {
    async fn user_profile(&self, user_id: i64) -> Result<Value, ApiError> {
        let payload = self
            .call(
                method::USERS_GET,
                &[("user_ids", user_id.to_string()), ("fields", USER_FIELDS.into())],
            )
            .await?;
        first_entry(payload, || format!("user {user_id}"))
    }

    async fn group_profile(&self, group_id: i64) -> Result<Value, ApiError> {
        let payload = self
            .call(
                method::GROUPS_GET_BY_ID,
                &[("group_id", group_id.to_string()), ("fields", GROUP_FIELDS.into())],
            )
            .await?;
        // Newer API versions wrap the list as {"groups": [...]}.
        let payload = match payload {
            Value::Object(mut map) if map.contains_key("groups") => map.remove("groups").unwrap_or(Value::Null),
            other => other,
        };
        first_entry(payload, || format!("group {group_id}"))
    }

    async fn friends(&self, user_id: i64) -> Result<Vec<i64>, ApiError> {
        let payload = self
            .call(method::FRIENDS_GET, &[("user_id", user_id.to_string())])
            .await?;
        id_items(payload)
    }

    async fn user_groups(&self, user_id: i64) -> Result<Vec<i64>, ApiError> {
        let payload = self
            .call(method::GROUPS_GET, &[("user_id", user_id.to_string())])
            .await?;
        id_items(payload)
    }

    async fn followers(&self, user_id: i64, count: u32) -> Result<Vec<i64>, ApiError> {
        let payload = self
            .call(
                method::USERS_GET_FOLLOWERS,
                &[("user_id", user_id.to_string()), ("count", count.to_string())],
            )
            .await?;
        id_items(payload)
    }

    async fn wall_posts(&self, owner_id: i64, count: u32) -> Result<Vec<Value>, ApiError> {
        let payload = self
            .call(
                method::WALL_GET,
                &[
                    ("owner_id", owner_id.to_string()),
                    ("count", count.to_string()),
                    ("filter", "all".into()),
                ],
            )
            .await?;
        items(payload)
    }

    async fn photos(&self, owner_id: i64, album: &str, count: u32) -> Result<Vec<Value>, ApiError> {
        let payload = self
            .call(
                method::PHOTOS_GET,
                &[
                    ("owner_id", owner_id.to_string()),
                    ("album_id", album.into()),
                    ("count", count.to_string()),
                    ("photo_sizes", "1".into()),
                ],
            )
            .await?;
        items(payload)
    }

    async fn likes(&self, owner_id: i64, target: LikeTarget, count: u32) -> Result<Vec<i64>, ApiError> {
        let payload = self
            .call(
                method::LIKES_GET_LIST,
                &[
                    ("type", target.kind().into()),
                    ("owner_id", owner_id.to_string()),
                    ("item_id", target.item_id().to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;
        id_items(payload)
    }

    async fn group_members(&self, group_id: i64, count: u32) -> Result<Vec<i64>, ApiError> {
        let payload = self
            .call(
                method::GROUPS_GET_MEMBERS,
                &[("group_id", group_id.to_string()), ("count", count.to_string())],
            )
            .await?;
        id_items(payload)
    }
}

// ── Payload helpers ──────────────────────────────────────────────────

fn first_entry(payload: Value, what: impl FnOnce() -> String) -> Result<Value, ApiError> {
    match payload {
        Value::Array(entries) => entries.into_iter().next().ok_or_else(|| ApiError::NotFound(what())),
        other => Err(ApiError::Unexpected(format!("expected list for {}, got {other}", what()))),
    }
}

/// `{"count": n, "items": [...]}` → items.
fn items(payload: Value) -> Result<Vec<Value>, ApiError> {
    match payload {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(ApiError::Unexpected(format!("items is not a list: {other}"))),
            None => Ok(Vec::new()),
        },
        other => Err(ApiError::Unexpected(format!("expected object with items, got {other}"))),
    }
}

/// Items that are either bare ids or objects carrying `id`.
fn id_items(payload: Value) -> Result<Vec<i64>, ApiError> {
    Ok(items(payload)?
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_i64(),
            Value::Object(obj) => obj.get("id").and_then(Value::as_i64),
            _ => None,
        })
        .collect())
}
