//! Rate-limited client for the VK API and the `SocialApi` capability the
//! collector consumes.

pub mod api;
pub mod client;
pub mod error;
pub mod rate_limit;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use api::{method, LikeTarget, SocialApi};
pub use client::{decode_envelope, VkClient};
pub use error::{ApiError, ApiErrorKind};
pub use rate_limit::RateLimiter;
