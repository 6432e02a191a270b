pub mod account;
pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod snapshot;
pub mod task;

pub use account::*;
pub use config::Config;
pub use document::*;
pub use entity::*;
pub use error::*;
pub use snapshot::*;
pub use task::*;
