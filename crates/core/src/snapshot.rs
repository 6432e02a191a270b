use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::entity::{ObjectType, Owner, RelationType};

/// Edge set from an owner. Natural key: (network, owner, relation_type, details);
/// writing the key again replaces `ids` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub network: String,
    pub owner: Owner,
    pub relation_type: RelationType,
    /// Disambiguates sets of the same type, e.g. `{"post_id": 17}` for likes of one post.
    pub details: Document,
    pub ids: Vec<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of one entity. Natural key: (network, owner, details) within its object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub network: String,
    pub owner: Owner,
    pub object_type: ObjectType,
    pub details: Document,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}
