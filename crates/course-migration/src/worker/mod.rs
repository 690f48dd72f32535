//! Background execution of migration work.
//!
//! Sweeps hand [`Task`]s to a [`WorkerPool`]; each worker thread passes them
//! to the [`MigrationTaskRunner`], which runs the backup, restore or cleanup
//! worker against a shared [`WorkerContext`].

pub mod backup;
pub mod cleanup;
pub mod context;
pub mod lock;
pub mod pool;
pub mod restore;
pub mod runner;
pub mod task;

pub use context::{WorkerContext, WorkerSettings, SYSTEM_USER};
pub use lock::{LockGuard, LockKey, LockRegistry};
pub use pool::{PoolHandle, WorkerPool};
pub use runner::MigrationTaskRunner;
pub use task::{QueuedTask, Task, TaskDispatcher, TaskOutcome, TaskRunner};

// Re-export crossbeam_channel for embedders draining outcomes
pub use crossbeam_channel;
