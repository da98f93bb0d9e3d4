//! Two-phase arm/release suspension shared by thread and task waiters
//!
//! A waiter is armed under the synchronization point's lock and released by
//! whichever thread resolves it, possibly before the waiter has started its
//! client wait. The release is recorded in an atomic state, so it can never
//! be lost: a later `park` or `poll_park` observes it and returns at once.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Instant;

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const RELEASED: u8 = 2;

/// Suspension mechanism for one wait attempt (or one group of attempts)
pub struct Parker {
    state: AtomicU8,
    /// Waker of a suspended future; also the lock paired with `cvar`
    waker: Mutex<Option<Waker>>,
    cvar: Condvar,
}

impl Parker {
    /// Create an idle parker
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            waker: Mutex::new(None),
            cvar: Condvar::new(),
        }
    }

    /// Arm the parker. A parker that was already released stays released.
    pub fn arm(&self) {
        let _ = self
            .state
            .compare_exchange(IDLE, ARMED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Whether `unpark` has been called
    pub fn is_released(&self) -> bool {
        self.state.load(Ordering::Acquire) == RELEASED
    }

    /// Release the parker, waking a blocked thread and/or a suspended future
    pub fn unpark(&self) {
        let waker = {
            let mut slot = self.waker.lock();
            self.state.store(RELEASED, Ordering::Release);
            self.cvar.notify_all();
            slot.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Block the calling thread until released
    pub fn park(&self) {
        let mut slot = self.waker.lock();
        while !self.is_released() {
            self.cvar.wait(&mut slot);
        }
    }

    /// Block the calling thread until released or `deadline` passes.
    ///
    /// Returns whether the parker was released.
    pub fn park_until(&self, deadline: Instant) -> bool {
        let mut slot = self.waker.lock();
        while !self.is_released() {
            if self.cvar.wait_until(&mut slot, deadline).timed_out() {
                return self.is_released();
            }
        }
        true
    }

    /// Suspend the current future until released
    pub fn poll_park(&self, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_released() {
            return Poll::Ready(());
        }
        let mut slot = self.waker.lock();
        if self.is_released() {
            return Poll::Ready(());
        }
        match slot.as_ref() {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => *slot = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Parker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            IDLE => "idle",
            ARMED => "armed",
            _ => "released",
        };
        f.debug_struct("Parker").field("state", &state).finish()
    }
}
