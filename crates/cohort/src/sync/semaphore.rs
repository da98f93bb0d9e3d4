//! Counting semaphore built on a synchronization point

use crate::sync::point::SyncPoint;
use crate::sync::wait::{ParkedWaiter, WaitFuture, WaitPolicy};
use crate::sync::waiter::WaitState;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Errors that can occur when using a Semaphore
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    /// Requested more permits than the semaphore can ever hold
    #[error("Invalid permit count: {0}")]
    InvalidCount(usize),

    /// The semaphore has been destroyed
    #[error("Semaphore has been destroyed")]
    Destroyed,
}

#[derive(Debug)]
struct Permits {
    available: usize,
    max: usize,
}

/// Acquire policy: proceed when `count` permits are available, then take them
struct Take {
    count: usize,
}

impl WaitPolicy<Permits> for Take {
    fn test(&self, permits: &Permits) -> bool {
        permits.available >= self.count
    }

    fn act(&self, permits: &mut Permits) {
        permits.available -= self.count;
    }

    fn undo(&self, permits: &mut Permits) -> usize {
        permits.available = (permits.available + self.count).min(permits.max);
        usize::MAX
    }
}

/// Counting semaphore that blocks threads or suspends tasks.
///
/// A semaphore maintains a count of available permits. Waiters acquire
/// permits (decrementing the count) and release permits (incrementing the
/// count). Grants go by fit: a release scans the queue front to back and
/// grants every waiter whose request fits the remaining permits, so a later
/// small request can pass an earlier large one. Acquires that find enough
/// permits free, including `try_acquire`, never queue behind waiters.
pub struct Semaphore {
    point: SyncPoint<Permits>,
    max_permits: usize,
}

impl Semaphore {
    /// Create a new semaphore with the given number of permits
    pub fn new(permits: usize) -> Self {
        Self {
            point: SyncPoint::new(Permits {
                available: permits,
                max: permits,
            }),
            max_permits: permits,
        }
    }

    /// Get the current number of available permits
    pub fn available_permits(&self) -> usize {
        self.point.with_shared(|permits| permits.available)
    }

    /// Get the maximum number of permits (capacity)
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Block the calling thread until `count` permits are acquired
    pub fn acquire(&self, count: usize) -> Result<(), SemaphoreError> {
        self.check(count)?;
        let waiter = ParkedWaiter::new(Take { count });
        outcome(self.point.block(&waiter))
    }

    /// Suspend the current task until `count` permits are acquired
    pub fn acquire_async(&self, count: usize) -> Acquire<'_> {
        let invalid = self.check(count).err();
        Acquire {
            wait: self.point.suspend(Take { count }),
            invalid,
        }
    }

    /// Acquire without waiting. Returns whether the permits were acquired.
    pub fn try_acquire(&self, count: usize) -> Result<bool, SemaphoreError> {
        self.check(count)?;
        let waiter = ParkedWaiter::new(Take { count });
        let state = match self.point.wait(&waiter) {
            WaitState::Waiting if self.point.cancel(&*waiter) => return Ok(false),
            // Resolved between enqueue and cancel
            _ => waiter.state(),
        };
        outcome(state).map(|()| true)
    }

    /// Release `count` permits (capped at capacity), granting queued waiters
    /// whose requests now fit. Returns the number of waiters granted.
    pub fn release(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        self.point.trigger(|permits| {
            permits.available = (permits.available + count).min(permits.max);
        })
    }

    /// Get number of waiting threads and tasks
    pub fn waiting_count(&self) -> usize {
        self.point.waiter_count()
    }

    /// Destroy the semaphore; queued and later acquires fail
    pub fn destroy(&self) -> usize {
        self.point.destroy()
    }

    fn check(&self, count: usize) -> Result<(), SemaphoreError> {
        if count > self.max_permits {
            Err(SemaphoreError::InvalidCount(count))
        } else {
            Ok(())
        }
    }
}

fn outcome(state: WaitState) -> Result<(), SemaphoreError> {
    match state {
        WaitState::Complete => Ok(()),
        _ => Err(SemaphoreError::Destroyed),
    }
}

/// Future returned by [`Semaphore::acquire_async`]
#[must_use = "futures do nothing unless polled"]
pub struct Acquire<'a> {
    wait: WaitFuture<'a, Permits, Take>,
    invalid: Option<SemaphoreError>,
}

impl Future for Acquire<'_> {
    type Output = Result<(), SemaphoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(err) = self.invalid.take() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.wait).poll(cx).map(outcome)
    }
}
