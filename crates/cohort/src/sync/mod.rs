//! Synchronization primitives for threads and Tasks
//!
//! Everything here is built on one engine, [`SyncPoint`]: a mutex-protected
//! shared state with a FIFO list of waiters, each testing its own predicate
//! against that state. The same waiter list serves OS threads that block and
//! scheduler tasks that suspend; the point itself only sees the [`Waiter`]
//! capability set.

mod condition;
mod mutex;
mod parker;
mod point;
mod predicated;
mod semaphore;
mod wait;
mod waiter;

pub use condition::{Condition, Latch, ResetMode};
pub use mutex::{Lock, Mutex, MutexError, MutexGuard};
pub use parker::Parker;
pub use point::{SyncPoint, TriggerResult};
pub use predicated::{PredicatedCondition, Satisfy};
pub use semaphore::{Acquire, Semaphore, SemaphoreError};
pub use wait::{ParkedWaiter, WaitFuture, WaitPolicy};
pub use waiter::{WaitRecord, WaitState, Waiter, NO_INDEX};
