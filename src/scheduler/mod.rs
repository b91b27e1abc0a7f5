//! Fan-out of independent work units over bounded worker pools.
//!
//! - **Unit**: one (disaster, location) task
//! - **UnitOutcome**: tagged per-unit result, never a fault
//! - **WorkerPool**: runs a closed list of jobs with a concurrency cap
//!
//! # Example
//!
//! ```rust,ignore
//! use change_forge::scheduler::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(4).with_name("locations"))?;
//! let results = pool.run_all(units, |unit| async move { process(unit).await }).await;
//! ```

pub mod job;
pub mod worker_pool;

pub use job::{Unit, UnitOutcome, UnitStatus};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
