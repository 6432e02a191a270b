//! Ingestion pipeline: walks a monitored owner's profile, relations and
//! content through a [`SocialApi`](sn_vk::SocialApi) and upserts everything
//! into a [`SnapshotStore`](sn_storage::SnapshotStore).

pub mod collector;
pub mod error;
pub mod options;

pub use collector::{CollectReport, Collector};
pub use error::CollectError;
pub use options::{CollectOptions, FilterLimits};
