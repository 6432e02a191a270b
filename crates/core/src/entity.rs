use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub type TaskId = i64;
pub type AccountId = i64;

/// Kind of entity a task watches on the external network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    User,
    Group,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::User => "user",
            OwnerType::Group => "group",
        }
    }
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(OwnerType::User),
            "group" => Ok(OwnerType::Group),
            _ => Err(CoreError::UnsupportedOwnerType(s.to_string())),
        }
    }
}

/// (type, id) reference to a user or group; natural key prefix of relations and objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub kind: OwnerType,
    pub id: i64,
}

impl Owner {
    pub fn user(id: i64) -> Self {
        Self { kind: OwnerType::User, id }
    }

    pub fn group(id: i64) -> Self {
        Self { kind: OwnerType::Group, id }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    Friend,
    Follower,
    Group,
    Member,
    Post,
    Photo,
    PostLike,
    PhotoLike,
    PostComment,
    PhotoComment,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Friend => "friend",
            RelationType::Follower => "follower",
            RelationType::Group => "group",
            RelationType::Member => "member",
            RelationType::Post => "post",
            RelationType::Photo => "photo",
            RelationType::PostLike => "post.like",
            RelationType::PhotoLike => "photo.like",
            RelationType::PostComment => "post.comment",
            RelationType::PhotoComment => "photo.comment",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot kinds; each one is stored in its own `objects_<type>` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    User,
    Group,
    Post,
    Photo,
}

impl ObjectType {
    pub const ALL: [ObjectType; 4] = [ObjectType::User, ObjectType::Group, ObjectType::Post, ObjectType::Photo];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::User => "user",
            ObjectType::Group => "group",
            ObjectType::Post => "post",
            ObjectType::Photo => "photo",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            ObjectType::User => "objects_user",
            ObjectType::Group => "objects_group",
            ObjectType::Post => "objects_post",
            ObjectType::Photo => "objects_photo",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_type_parses_known_kinds() {
        assert_eq!("user".parse::<OwnerType>().unwrap(), OwnerType::User);
        assert_eq!(" Group ".parse::<OwnerType>().unwrap(), OwnerType::Group);
    }

    #[test]
    fn owner_type_rejects_unknown_kinds() {
        let err = "page".parse::<OwnerType>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported entity type: page");
    }

    #[test]
    fn relation_names_match_stored_values() {
        assert_eq!(RelationType::PostLike.to_string(), "post.like");
        assert_eq!(RelationType::Group.as_str(), "group");
    }

    #[test]
    fn object_tables_are_per_type() {
        let tables: Vec<_> = ObjectType::ALL.iter().map(|t| t.table_name()).collect();
        assert_eq!(tables, ["objects_user", "objects_group", "objects_post", "objects_photo"]);
    }
}
