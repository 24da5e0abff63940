//! Worker pool used by the dispatcher.
//!
//! This module contains the thread pool that runs connection handlers:
//! - [`builder`]: sizing of the pool ([`PoolConfig`]),
//! - [`executor`]: the pool itself and its worker threads,
//! - [`queue`]: the bounded job queue shared by the workers.
//!
//! Saturation is handled by running the job on the submitting thread
//! rather than growing the queue or dropping work.

mod executor;
mod queue;

pub(crate) mod builder;

pub use builder::{DEFAULT_QUEUE_CAPACITY, PoolConfig, default_workers};
pub use executor::core::{Job, Submitted, WorkerPool};
