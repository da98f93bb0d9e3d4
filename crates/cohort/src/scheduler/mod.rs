//! Cooperative task scheduler
//!
//! A fixed pool of executor threads runs many more [`Task`]s than threads.
//! A task's body is a future; an executor resumes it by polling, and a task
//! that waits on a synchronization point suspends instead of blocking its
//! executor. The scheduler's ready queue is itself a synchronization point:
//! idle executors wait on it, and a task's waker triggers it to put the task
//! back in line.
//!
//! Tasks form fork/join trees. A task started with
//! [`TaskContext::subtask`] keeps its parent from finishing until it has
//! finished itself, so waiting on a task waits on all of its descendants.

mod config;
mod join;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;
mod timer;
mod worker;

pub use config::{SchedulerConfig, STACK_SIZE_ENV, WORKERS_ENV};
pub use join::{wait_for_all, wait_for_all_async, wait_for_any, wait_for_any_async, AnyFinished};
pub use scheduler::{Handle, Scheduler, SchedulerError, SchedulerStats};
pub use task::{Task, TaskContext, TaskError, TaskId, TaskState};
pub use timer::{Elapsed, Sleep, Timeout, YieldNow};
