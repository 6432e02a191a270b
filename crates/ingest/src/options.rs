use sn_core::Document;

/// Upper bound for any page size sent to the API.
pub const MAX_PAGE: u32 = 1000;

/// Page sizes for the bounded sub-fetches, read from a task's filter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLimits {
    pub posts: u32,
    pub photos: u32,
    pub followers: u32,
    pub likes: u32,
    pub members: u32,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            posts: 100,
            photos: 100,
            followers: 1000,
            likes: 1000,
            members: 1000,
        }
    }
}

impl FilterLimits {
    pub fn from_document(doc: &Document) -> Self {
        let defaults = Self::default();
        let limit = |key: &str, default: u32| {
            doc.get_i64(key)
                .map(|v| v.clamp(1, i64::from(MAX_PAGE)) as u32)
                .unwrap_or(default)
        };
        Self {
            posts: limit("posts", defaults.posts),
            photos: limit("photos", defaults.photos),
            followers: limit("followers", defaults.followers),
            likes: limit("likes", defaults.likes),
            members: limit("members", defaults.members),
        }
    }
}

/// Which sub-fetches run, from a task's filters. Everything a user has is
/// collected unless switched off; group members only when switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    pub friends: bool,
    pub groups: bool,
    pub followers: bool,
    pub posts: bool,
    pub photos: bool,
    pub likes: bool,
    pub members: bool,
    pub limits: FilterLimits,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            friends: true,
            groups: true,
            followers: true,
            posts: true,
            photos: true,
            likes: true,
            members: false,
            limits: FilterLimits::default(),
        }
    }
}

impl CollectOptions {
    pub fn from_task(filters: &Document, filter_limits: &Document) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| filters.get_bool(key).unwrap_or(default);
        Self {
            friends: flag("friends", defaults.friends),
            groups: flag("groups", defaults.groups),
            followers: flag("followers", defaults.followers),
            posts: flag("posts", defaults.posts),
            photos: flag("photos", defaults.photos),
            likes: flag("likes", defaults.likes),
            members: flag("members", defaults.members),
            limits: FilterLimits::from_document(filter_limits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_documents_give_defaults() {
        let opts = CollectOptions::from_task(&Document::new(), &Document::new());
        assert_eq!(opts, CollectOptions::default());
        assert!(opts.friends && opts.likes);
        assert!(!opts.members);
    }

    #[test]
    fn filters_switch_fetches() {
        let filters = Document::new().with("likes", false).with("members", "true");
        let opts = CollectOptions::from_task(&filters, &Document::new());
        assert!(!opts.likes);
        assert!(opts.members);
        assert!(opts.posts);
    }

    #[test]
    fn limits_are_clamped() {
        let limits = Document::new()
            .with("posts", 20)
            .with("photos", 0)
            .with("followers", 50_000)
            .with("likes", "abc");
        let parsed = FilterLimits::from_document(&limits);
        assert_eq!(parsed.posts, 20);
        assert_eq!(parsed.photos, 1);
        assert_eq!(parsed.followers, MAX_PAGE);
        assert_eq!(parsed.likes, 1000);
    }
}
