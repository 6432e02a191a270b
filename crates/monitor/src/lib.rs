//! Monitoring service: claims due tasks, consults gating flags, runs the
//! collector with a pooled account, and records outcomes.

pub mod admin;
pub mod error;
pub mod gate;
pub mod pool;
pub mod scheduler;
pub mod session;

pub use admin::Operator;
pub use error::{GateError, MonitorError, PoolError};
pub use gate::{GateDecision, MemoryGate, RedisGate, TaskGate};
pub use pool::AccountPool;
pub use scheduler::{Attempt, Scheduler, SchedulerConfig, SchedulerDeps, SkipReason, WorkerPool};
pub use session::{AccountBoundApi, ApiFactory, VkApiFactory};
