//! Per-owner collection strategies.
//!
//! The owner's profile anchors everything else, so failing to fetch it fails
//! the whole collection. Every other sub-fetch (friends, groups, followers,
//! posts, photos, likes, members) is isolated: a failure is logged, recorded
//! in the [`CollectReport`], and the remaining sub-fetches still run.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use sn_core::{Document, ObjectSnapshot, ObjectType, Owner, OwnerType, Relation, RelationType};
use sn_storage::{SnapshotStore, StoreError};
use sn_vk::{ApiError, LikeTarget, SocialApi};

use crate::error::CollectError;
use crate::options::CollectOptions;

/// Album whose photos are collected for a user.
const PROFILE_ALBUM: &str = "profile";

/// What one collection wrote, and which sub-fetches were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub relations_written: usize,
    pub objects_written: usize,
    pub skipped: Vec<String>,
}

impl CollectReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Content listed on a user's page that gets per-item objects and like sets.
#[derive(Debug, Clone, Copy)]
enum Content {
    Posts,
    Photos,
}

impl Content {
    fn step(self) -> &'static str {
        match self {
            Content::Posts => "posts",
            Content::Photos => "photos",
        }
    }

    fn object_type(self) -> ObjectType {
        match self {
            Content::Posts => ObjectType::Post,
            Content::Photos => ObjectType::Photo,
        }
    }

    fn relation_type(self) -> RelationType {
        match self {
            Content::Posts => RelationType::Post,
            Content::Photos => RelationType::Photo,
        }
    }

    fn like_relation(self) -> RelationType {
        match self {
            Content::Posts => RelationType::PostLike,
            Content::Photos => RelationType::PhotoLike,
        }
    }

    /// Details key that separates like sets of different items.
    fn like_key(self) -> &'static str {
        match self {
            Content::Posts => "post_id",
            Content::Photos => "photo_id",
        }
    }

    fn like_target(self, item_id: i64) -> LikeTarget {
        match self {
            Content::Posts => LikeTarget::Post(item_id),
            Content::Photos => LikeTarget::Photo(item_id),
        }
    }
}

pub struct Collector<'a> {
    api: &'a dyn SocialApi,
    store: &'a dyn SnapshotStore,
    network: &'a str,
    options: CollectOptions,
}

impl<'a> Collector<'a> {
    pub fn new(api: &'a dyn SocialApi, store: &'a dyn SnapshotStore, network: &'a str) -> Self {
        Self {
            api,
            store,
            network,
            options: CollectOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CollectOptions) -> Self {
        self.options = options;
        self
    }

    /// Collect an owner given its stored type name.
    pub async fn collect_entity(&self, owner_type: &str, owner_id: i64) -> Result<CollectReport, CollectError> {
        let kind: OwnerType = owner_type.parse()?;
        self.collect(Owner { kind, id: owner_id }).await
    }

    pub async fn collect(&self, owner: Owner) -> Result<CollectReport, CollectError> {
        let report = match owner.kind {
            OwnerType::User => self.collect_user(owner).await?,
            OwnerType::Group => self.collect_group(owner).await?,
        };
        info!(
            owner = %owner,
            relations = report.relations_written,
            objects = report.objects_written,
            skipped = report.skipped.len(),
            "collection finished"
        );
        Ok(report)
    }

    async fn collect_user(&self, owner: Owner) -> Result<CollectReport, CollectError> {
        let mut report = CollectReport::default();

        let profile = self
            .api
            .user_profile(owner.id)
            .await
            .map_err(|source| CollectError::Profile { owner, source })?;
        self.write_object(owner, ObjectType::User, Document::new(), profile).await?;
        report.objects_written += 1;

        if self.options.friends {
            let fetched = self.api.friends(owner.id).await;
            self.relation_step(&mut report, owner, RelationType::Friend, Document::new(), "friends", fetched)
                .await;
        }
        if self.options.groups {
            let fetched = self.api.user_groups(owner.id).await;
            self.relation_step(&mut report, owner, RelationType::Group, Document::new(), "groups", fetched)
                .await;
        }
        if self.options.followers {
            let fetched = self.api.followers(owner.id, self.options.limits.followers).await;
            self.relation_step(&mut report, owner, RelationType::Follower, Document::new(), "followers", fetched)
                .await;
        }
        if self.options.posts {
            self.content_step(&mut report, owner, Content::Posts).await;
        }
        if self.options.photos {
            self.content_step(&mut report, owner, Content::Photos).await;
        }

        Ok(report)
    }

    async fn collect_group(&self, owner: Owner) -> Result<CollectReport, CollectError> {
        let mut report = CollectReport::default();

        let profile = self
            .api
            .group_profile(owner.id)
            .await
            .map_err(|source| CollectError::Profile { owner, source })?;
        self.write_object(owner, ObjectType::Group, Document::new(), profile).await?;
        report.objects_written += 1;

        if self.options.members {
            let fetched = self.api.group_members(owner.id, self.options.limits.members).await;
            self.relation_step(&mut report, owner, RelationType::Member, Document::new(), "members", fetched)
                .await;
        }

        Ok(report)
    }

    /// Fetch a content list, store one object per item plus the id set, then
    /// the like set of every item.
    async fn content_step(&self, report: &mut CollectReport, owner: Owner, content: Content) {
        let fetched = match content {
            Content::Posts => self.api.wall_posts(owner.id, self.options.limits.posts).await,
            Content::Photos => {
                self.api
                    .photos(owner.id, PROFILE_ALBUM, self.options.limits.photos)
                    .await
            }
        };
        let items = match fetched {
            Ok(items) => items,
            Err(e) => {
                skip(report, owner, content.step(), &e);
                return;
            }
        };

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let Some(item_id) = item.get("id").and_then(Value::as_i64) else {
                debug!(owner = %owner, step = content.step(), "item without id ignored");
                continue;
            };
            ids.push(item_id);

            let details = Document::new().with("id", item_id);
            match self.write_object(owner, content.object_type(), details, item).await {
                Ok(()) => report.objects_written += 1,
                Err(e) => {
                    warn!(owner = %owner, item_id, error = %e, "failed to store {}", content.object_type());
                    report.skipped.push(format!("{}:{item_id}", content.step()));
                }
            }
        }

        self.relation_step(
            report,
            owner,
            content.relation_type(),
            Document::new(),
            content.step(),
            Ok(ids.clone()),
        )
        .await;

        if !self.options.likes {
            return;
        }
        for item_id in ids {
            let fetched = self
                .api
                .likes(owner.id, content.like_target(item_id), self.options.limits.likes)
                .await;
            let details = Document::new().with(content.like_key(), item_id);
            let step = format!("{}.likes:{item_id}", content.step());
            self.relation_step(report, owner, content.like_relation(), details, &step, fetched)
                .await;
        }
    }

    /// Upsert one relation from a sub-fetch result, or record the skip.
    async fn relation_step(
        &self,
        report: &mut CollectReport,
        owner: Owner,
        relation_type: RelationType,
        details: Document,
        step: &str,
        fetched: Result<Vec<i64>, ApiError>,
    ) {
        let ids = match fetched {
            Ok(ids) => ids,
            Err(e) => {
                skip(report, owner, step, &e);
                return;
            }
        };

        let relation = Relation {
            network: self.network.to_string(),
            owner,
            relation_type,
            details,
            ids,
            timestamp: Utc::now(),
        };
        match self.store.write_relation(&relation).await {
            Ok(()) => report.relations_written += 1,
            Err(e) => skip(report, owner, step, &e),
        }
    }

    async fn write_object(
        &self,
        owner: Owner,
        object_type: ObjectType,
        details: Document,
        data: Value,
    ) -> Result<(), StoreError> {
        self.store
            .write_object(&ObjectSnapshot {
                network: self.network.to_string(),
                owner,
                object_type,
                details,
                data,
                timestamp: Utc::now(),
            })
            .await
    }
}

fn skip(report: &mut CollectReport, owner: Owner, step: &str, error: &dyn std::error::Error) {
    warn!(owner = %owner, step, error = %error, "sub-fetch failed, skipping");
    report.skipped.push(step.to_string());
}
