//! FIFO-fair mutex built on a synchronization point

use crate::sync::point::SyncPoint;
use crate::sync::wait::{ParkedWaiter, WaitFuture, WaitPolicy};
use crate::sync::waiter::WaitState;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Errors that can occur when using a Mutex
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutexError {
    /// Unlock called while the mutex was not held
    #[error("Mutex is not locked")]
    NotLocked,

    /// The mutex has been destroyed
    #[error("Mutex has been destroyed")]
    Destroyed,

    /// Destroy called while the mutex was held
    #[error("Cannot destroy a held mutex")]
    Held,
}

#[derive(Debug, Default)]
struct MutexState {
    held: bool,
}

/// Acquire policy: proceed when not held, then take it
struct Acquire;

impl WaitPolicy<MutexState> for Acquire {
    fn test(&self, state: &MutexState) -> bool {
        !state.held
    }

    fn act(&self, state: &mut MutexState) {
        state.held = true;
    }

    fn undo(&self, state: &mut MutexState) -> usize {
        state.held = false;
        1
    }
}

/// Non-reentrant mutex with FIFO-fair acquisition.
///
/// Holds no data and tracks no owner: it can block both OS threads
/// (`lock`) and scheduler tasks (`lock_async`). Locking it twice from the
/// same thread or task deadlocks.
pub struct Mutex {
    point: SyncPoint<MutexState>,
}

impl Mutex {
    /// Create an unlocked mutex
    pub fn new() -> Self {
        Self {
            point: SyncPoint::new(MutexState::default()),
        }
    }

    /// Block the calling thread until the mutex is acquired
    pub fn lock(&self) -> Result<(), MutexError> {
        let waiter = ParkedWaiter::new(Acquire);
        outcome(self.point.block(&waiter))
    }

    /// Suspend the current task until the mutex is acquired
    pub fn lock_async(&self) -> Lock<'_> {
        Lock {
            wait: self.point.suspend(Acquire),
        }
    }

    /// Acquire without waiting. Returns whether the mutex was acquired.
    pub fn try_lock(&self) -> bool {
        let waiter = ParkedWaiter::new(Acquire);
        match self.point.wait(&waiter) {
            WaitState::Complete => true,
            WaitState::Waiting => {
                if self.point.cancel(&*waiter) {
                    false
                } else {
                    // Granted between enqueue and cancel
                    waiter.state() == WaitState::Complete
                }
            }
            _ => false,
        }
    }

    /// Release the mutex, handing it to the longest-waiting waiter
    pub fn unlock(&self) -> Result<(), MutexError> {
        let mut was_held = false;
        self.point.trigger(|state| {
            was_held = std::mem::replace(&mut state.held, false);
            usize::from(was_held)
        });
        if was_held {
            Ok(())
        } else {
            Err(MutexError::NotLocked)
        }
    }

    /// Block until acquired and return a guard that unlocks on drop
    pub fn guard(&self) -> Result<MutexGuard<'_>, MutexError> {
        self.lock()?;
        Ok(MutexGuard::new(self))
    }

    /// Suspend until acquired and return a guard that unlocks on drop
    pub async fn guard_async(&self) -> Result<MutexGuard<'_>, MutexError> {
        self.lock_async().await?;
        Ok(MutexGuard::new(self))
    }

    /// Check if the mutex is held
    pub fn is_locked(&self) -> bool {
        self.point.with_shared(|state| state.held)
    }

    /// Get number of waiting threads and tasks
    pub fn waiting_count(&self) -> usize {
        self.point.waiter_count()
    }

    /// Destroy the mutex, failing every pending and future `lock` with
    /// `MutexError::Destroyed`. Fails if the mutex is held.
    pub fn destroy(&self) -> Result<(), MutexError> {
        match self.point.destroy_if(|state| !state.held) {
            Some(_) => Ok(()),
            None => Err(MutexError::Held),
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .field("waiting", &self.waiting_count())
            .finish()
    }
}

fn outcome(state: WaitState) -> Result<(), MutexError> {
    match state {
        WaitState::Complete => Ok(()),
        _ => Err(MutexError::Destroyed),
    }
}

/// Future returned by [`Mutex::lock_async`]
#[must_use = "futures do nothing unless polled"]
pub struct Lock<'a> {
    wait: WaitFuture<'a, MutexState, Acquire>,
}

impl Future for Lock<'_> {
    type Output = Result<(), MutexError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.wait).poll(cx).map(outcome)
    }
}

/// RAII guard for Mutex (auto-unlocks on drop)
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
    unlocked: bool,
}

impl<'a> MutexGuard<'a> {
    fn new(mutex: &'a Mutex) -> Self {
        Self {
            mutex,
            unlocked: false,
        }
    }

    /// Manually unlock the mutex early (before drop)
    pub fn unlock(mut self) -> Result<(), MutexError> {
        self.unlocked = true;
        self.mutex.unlock()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if !self.unlocked {
            let _ = self.mutex.unlock();
        }
    }
}
