//! Cohort: predicate-driven synchronization and a cooperative task scheduler
//!
//! This crate provides:
//! - **Synchronization points** (`sync` module): a mutex-protected shared
//!   state with a FIFO list of waiters, each passing once its own predicate
//!   holds. Threads block on it; tasks suspend on it.
//! - **Primitives** built on it: `Mutex`, `Condition`,
//!   `PredicatedCondition` and `Semaphore`
//! - **Scheduler** (`scheduler` module): executor threads running fork/join
//!   `Task` trees whose bodies are futures
//!
//! # Example
//!
//! ```rust,ignore
//! use cohort::{Scheduler, SchedulerConfig};
//! use std::time::Duration;
//!
//! let mut scheduler = Scheduler::new(SchedulerConfig::default());
//! scheduler.start()?;
//!
//! let parent = scheduler.spawn(|ctx| async move {
//!     ctx.spawn_subtask(|ctx| async move { ctx.sleep(Duration::from_millis(50)).await }).unwrap();
//!     ctx.spawn_subtask(|ctx| async move { ctx.sleep(Duration::from_millis(200)).await }).unwrap();
//! })?;
//!
//! // Returns once the parent and both subtasks have finished
//! parent.wait();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod scheduler;
pub mod sync;

pub use scheduler::{
    wait_for_all, wait_for_any, Handle, Scheduler, SchedulerConfig, SchedulerError,
    SchedulerStats, Task, TaskContext, TaskError, TaskId, TaskState,
};
pub use sync::{Condition, Mutex, MutexGuard, PredicatedCondition, ResetMode, Semaphore, SyncPoint, WaitState};
