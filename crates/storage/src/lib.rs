//! Persistence layer for the monitoring pipeline: store traits, the
//! PostgreSQL implementation, an in-memory implementation, and the
//! per-task claim locks.

pub mod error;
pub mod lock;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use lock::{MemoryTaskLock, PgTaskLock, RedisLeaseLock, TaskLock};
pub use memory::MemoryStore;
pub use postgres::{connect, PgStore};
pub use store::{AccountStore, SnapshotStore, TaskStore};
